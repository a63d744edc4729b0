use std::io::{stdin, stdout};
use std::path::PathBuf;

use anyhow::{Context as _, bail};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use bfvm::machine::{self, MachineConfig, TapeMachine};

#[derive(Parser)]
#[command(name = "bfvm", about = "Brainfuck tape machine")]
struct Cli {
    /// Path to the program file. Bytes outside the instruction set are
    /// comments.
    program: Option<PathBuf>,

    /// Program text given directly on the command line.
    #[arg(short = 'e', long, conflicts_with = "program")]
    eval: Option<String>,

    /// Abort after this many executed steps (default: unlimited).
    #[arg(long)]
    step_limit: Option<usize>,

    /// Abort when loops nest deeper than this (default: unlimited).
    #[arg(long)]
    max_loop_depth: Option<usize>,

    /// Reject programs with unbalanced brackets before executing.
    #[arg(long)]
    check: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let code: Vec<u8> = if let Some(text) = cli.eval {
        text.into_bytes()
    } else if let Some(path) = cli.program {
        std::fs::read(&path)
            .with_context(|| format!("unable to read program file {}", path.display()))?
    } else {
        bail!("expected a program file path or --eval <PROGRAM>");
    };

    let instructions = code.iter().filter(|&&b| machine::is_instruction(b)).count();
    debug!(bytes = code.len(), instructions, "program loaded");

    if cli.check {
        machine::validate(&code).context("program rejected")?;
    }

    let machine = TapeMachine::with_config(MachineConfig {
        step_limit: cli.step_limit,
        max_loop_depth: cli.max_loop_depth,
    });

    let halt = machine
        .execute(&code, stdin().lock(), stdout().lock())
        .context("execution failure")?;
    debug!(steps = halt.steps, pointer = halt.pointer, "halted normally");
    Ok(())
}
