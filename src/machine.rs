use std::io::{self, Read, Write};

use thiserror::Error;
use tracing::debug;

/// The Brainfuck tape machine.
///
/// Executes a flat instruction stream over a fixed tape:
/// - Tape: 30,000 cells, each a `u8`, zero-initialized. Cell arithmetic
///   wraps modulo 256.
/// - Data pointer: wraps modulo 30,000 in both directions.
/// - Program counter: the machine halts when it reaches the end of the
///   stream; there is no halt instruction.
/// - Loop stack: `[` pushes its own position and falls through (the zero
///   test happens at the matching `]`, so a loop body always runs at least
///   once); `]` pops and advances when the current cell is zero, otherwise
///   jumps back to the position on top of the stack without popping.
///
/// Bytes outside the eight-instruction set are comments. `,` against an
/// exhausted finite input source is a fatal [`ExecutionError::InputExhausted`]
/// fault rather than a silent store-zero; against a live stream it blocks
/// until a byte arrives.
#[derive(Debug, Clone, Default)]
pub struct TapeMachine {
    config: MachineConfig,
}

/// Number of cells on the tape.
pub const TAPE_LEN: usize = 30_000;

const PLUS: u8 = b'+';
const MINUS: u8 = b'-';
const LESS: u8 = b'<';
const GREATER: u8 = b'>';
const DOT: u8 = b'.';
const COMMA: u8 = b',';
const LBRACKET: u8 = b'[';
const RBRACKET: u8 = b']';

/// Returns true if the byte is a meaningful instruction (as opposed to a
/// comment byte).
pub fn is_instruction(byte: u8) -> bool {
    matches!(
        byte,
        PLUS | MINUS | LESS | GREATER | DOT | COMMA | LBRACKET | RBRACKET
    )
}

/// Optional execution limits. Both default to off, under which the machine
/// runs programs to natural termination exactly as written.
#[derive(Debug, Clone, Default)]
pub struct MachineConfig {
    /// Abort with `StepLimitExceeded` after this many executed steps.
    /// Every processed byte counts as one step, comment bytes included.
    pub step_limit: Option<usize>,
    /// Abort with `NestingLimitExceeded` when more than this many loops
    /// are open at once.
    pub max_loop_depth: Option<usize>,
}

/// Terminal state of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Halt {
    /// Final tape contents, `TAPE_LEN` cells.
    pub tape: Vec<u8>,
    /// Final data-pointer position.
    pub pointer: usize,
    /// Number of steps executed.
    pub steps: usize,
}

/// A fault that aborted execution. Every variant carries the
/// program-counter position at which it occurred. Output already written
/// before the fault remains written.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A bracket with no partner: at runtime, always a `]` executed with an
    /// empty loop stack. [`validate`] also reports an unclosed `[`.
    #[error("unmatched '{bracket}' at instruction {pc}")]
    MalformedProgram { pc: usize, bracket: char },

    /// `,` executed with no further bytes available from a finite input
    /// source.
    #[error("input exhausted at instruction {pc}")]
    InputExhausted { pc: usize },

    /// The configured step limit ran out.
    #[error("step limit of {limit} reached at instruction {pc}")]
    StepLimitExceeded { pc: usize, limit: usize },

    /// Loops nested deeper than the configured maximum.
    #[error("loop nesting deeper than {limit} at instruction {pc}")]
    NestingLimitExceeded { pc: usize, limit: usize },

    /// The input or output stream failed for a reason other than
    /// end-of-input.
    #[error("i/o failure at instruction {pc}")]
    Io {
        pc: usize,
        #[source]
        source: io::Error,
    },
}

impl ExecutionError {
    /// Program-counter position the fault occurred at.
    pub fn pc(&self) -> usize {
        match *self {
            ExecutionError::MalformedProgram { pc, .. }
            | ExecutionError::InputExhausted { pc }
            | ExecutionError::StepLimitExceeded { pc, .. }
            | ExecutionError::NestingLimitExceeded { pc, .. }
            | ExecutionError::Io { pc, .. } => pc,
        }
    }
}

impl TapeMachine {
    /// A machine with no execution limits.
    pub fn new() -> Self {
        Self {
            config: MachineConfig::default(),
        }
    }

    pub fn with_config(config: MachineConfig) -> Self {
        Self { config }
    }

    /// Execute `source`, reading one byte from `input` per `,` and writing
    /// one byte to `output` per `.`.
    ///
    /// All machine state is created fresh for this call and discarded at
    /// its end; nothing carries across calls. `output` is flushed once on
    /// normal halt. An unmatched `[` is not an error: the program counter
    /// runs off the end of the stream and the machine halts normally (use
    /// [`validate`] for a strict pre-check).
    pub fn execute<R: Read, W: Write>(
        &self,
        source: impl AsRef<[u8]>,
        mut input: R,
        mut output: W,
    ) -> Result<Halt, ExecutionError> {
        let code = source.as_ref();
        let mut tape = vec![0u8; TAPE_LEN];
        let mut pointer: usize = 0;
        let mut pc: usize = 0;
        let mut stack: Vec<usize> = Vec::new();
        let mut steps: usize = 0;

        while pc < code.len() {
            if let Some(limit) = self.config.step_limit {
                if steps >= limit {
                    return Err(ExecutionError::StepLimitExceeded { pc, limit });
                }
            }
            steps += 1;

            match code[pc] {
                PLUS => tape[pointer] = tape[pointer].wrapping_add(1),
                MINUS => tape[pointer] = tape[pointer].wrapping_sub(1),
                GREATER => pointer = (pointer + 1) % TAPE_LEN,
                LESS => pointer = (pointer + TAPE_LEN - 1) % TAPE_LEN,
                DOT => write_byte(&mut output, tape[pointer], pc)?,
                COMMA => tape[pointer] = read_byte(&mut input, pc)?,
                LBRACKET => {
                    if let Some(limit) = self.config.max_loop_depth {
                        if stack.len() >= limit {
                            return Err(ExecutionError::NestingLimitExceeded { pc, limit });
                        }
                    }
                    stack.push(pc);
                }
                RBRACKET => match stack.last().copied() {
                    None => {
                        return Err(ExecutionError::MalformedProgram { pc, bracket: ']' });
                    }
                    Some(open) => {
                        if tape[pointer] == 0 {
                            stack.pop();
                        } else {
                            // Resume just after the matching '[' once the
                            // unconditional increment below lands.
                            pc = open;
                        }
                    }
                },
                _ => {} // comment byte
            }

            pc += 1;
        }

        if let Err(e) = output.flush() {
            return Err(ExecutionError::Io { pc, source: e });
        }
        debug!(steps, pointer, "program halted");
        Ok(Halt {
            tape,
            pointer,
            steps,
        })
    }
}

/// Strict bracket check over `source`, without executing it.
///
/// Reports the first unmatched `]` or, failing that, the first unclosed
/// `[`. Normal execution never performs this check.
pub fn validate(source: impl AsRef<[u8]>) -> Result<(), ExecutionError> {
    let mut stack: Vec<usize> = Vec::new();
    for (pc, &byte) in source.as_ref().iter().enumerate() {
        match byte {
            LBRACKET => stack.push(pc),
            RBRACKET => {
                if stack.pop().is_none() {
                    return Err(ExecutionError::MalformedProgram { pc, bracket: ']' });
                }
            }
            _ => {}
        }
    }
    match stack.first().copied() {
        Some(pc) => Err(ExecutionError::MalformedProgram { pc, bracket: '[' }),
        None => Ok(()),
    }
}

fn read_byte<R: Read>(input: &mut R, pc: usize) -> Result<u8, ExecutionError> {
    let mut buf = [0u8; 1];
    match input.read_exact(&mut buf) {
        Ok(()) => Ok(buf[0]),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(ExecutionError::InputExhausted { pc })
        }
        Err(e) => Err(ExecutionError::Io { pc, source: e }),
    }
}

fn write_byte<W: Write>(output: &mut W, byte: u8, pc: usize) -> Result<(), ExecutionError> {
    output
        .write_all(&[byte])
        .map_err(|e| ExecutionError::Io { pc, source: e })
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Programs drawn from the instruction set plus comment bytes, ','
    /// excluded so runs never depend on an input stream.
    fn inputless_program() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(
            prop::sample::select(b"+-<>.[]# xyz".to_vec()),
            0..128,
        )
    }

    proptest! {
        #[test]
        fn random_programs_never_panic(source in inputless_program()) {
            let machine = TapeMachine::with_config(MachineConfig {
                step_limit: Some(4096),
                ..Default::default()
            });
            // Faults are fine; panics and hangs are not.
            let _ = machine.execute(&source, std::io::empty(), std::io::sink());
        }

        #[test]
        fn random_bytes_never_panic(source in prop::collection::vec(any::<u8>(), 0..256)) {
            let machine = TapeMachine::with_config(MachineConfig {
                step_limit: Some(4096),
                ..Default::default()
            });
            let _ = machine.execute(&source, std::io::empty(), std::io::sink());
        }

        #[test]
        fn halts_respect_step_limit(
            source in inputless_program(),
            limit in 1usize..2048,
        ) {
            let machine = TapeMachine::with_config(MachineConfig {
                step_limit: Some(limit),
                ..Default::default()
            });
            if let Ok(halt) = machine.execute(&source, std::io::empty(), std::io::sink()) {
                prop_assert!(halt.steps <= limit);
                prop_assert!(halt.pointer < TAPE_LEN);
                prop_assert_eq!(halt.tape.len(), TAPE_LEN);
            }
        }

        #[test]
        fn identical_runs_identical_output(
            source in inputless_program(),
            input in prop::collection::vec(any::<u8>(), 0..16),
        ) {
            let machine = TapeMachine::with_config(MachineConfig {
                step_limit: Some(4096),
                ..Default::default()
            });
            let mut out_a = Vec::new();
            let mut out_b = Vec::new();
            let res_a = machine.execute(&source, &input[..], &mut out_a);
            let res_b = machine.execute(&source, &input[..], &mut out_b);
            prop_assert_eq!(out_a, out_b);
            if let (Ok(a), Ok(b)) = (res_a, res_b) {
                prop_assert_eq!(a, b);
            }
        }

        #[test]
        fn output_bounded_by_steps(source in inputless_program()) {
            let machine = TapeMachine::with_config(MachineConfig {
                step_limit: Some(4096),
                ..Default::default()
            });
            let mut output = Vec::new();
            if let Ok(halt) = machine.execute(&source, std::io::empty(), &mut output) {
                // Each '.' is one step, so output can never outrun the
                // step count.
                prop_assert!(output.len() <= halt.steps);
            }
        }
    }
}
