//! Executes a compiled instruction stream against a tape.
//!
//! Loops are run by re-scanning: entering a loop remembers where its
//! body starts, and each `LoopEnd` either jumps back there or falls
//! through. No jump table is built, so the stream needs no
//! preprocessing, but skipping a loop whose cell is zero walks its body.

use crate::bfir::Instruction;
use crate::bfir::Instruction::*;
use crate::tape::Tape;
use std::io::{self, Read, Write};
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
use crate::peephole::OptimisationsFlags;
#[cfg(test)]
use pretty_assertions::assert_eq;

/// Errors here mean the instruction stream itself is malformed, which a
/// stream from [`crate::compile`] never is, or the I/O handles failed.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("found ] at instruction {pc} with no matching [")]
    StrayLoopEnd { pc: usize },
    #[error("found [ at instruction {pc} with no matching ]")]
    UnterminatedLoop { pc: usize },
    #[error("instruction pointer {pc} is past the end of the program")]
    InvalidInstructionPointer { pc: usize },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Outcome {
    /// `End` was reached.
    Completed,
    /// The step limit ran out first.
    OutOfSteps,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionState {
    pub tape: Tape,
    /// Value captured by the last capturing `Clear`, consumed by the
    /// `Mul` instructions that follow it.
    pub carry: u8,
    /// Instructions dispatched so far.
    pub steps: u64,
}

impl Default for ExecutionState {
    fn default() -> Self {
        ExecutionState::new()
    }
}

/// Run `instrs` to completion on a fresh tape.
pub fn execute<R: Read, W: Write>(
    instrs: &[Instruction],
    input: R,
    output: W,
) -> Result<ExecutionState, ExecutionError> {
    let mut state = ExecutionState::new();
    state.run(instrs, input, output, None)?;
    Ok(state)
}

impl ExecutionState {
    pub fn new() -> Self {
        ExecutionState::with_tape(Tape::new())
    }

    pub fn with_tape(tape: Tape) -> Self {
        ExecutionState {
            tape,
            carry: 0,
            steps: 0,
        }
    }

    /// Execute `instrs` from the start, stopping at `End` or after
    /// `max_steps` dispatched instructions. Output is flushed before
    /// every read and before returning.
    pub fn run<R: Read, W: Write>(
        &mut self,
        instrs: &[Instruction],
        mut input: R,
        mut output: W,
        max_steps: Option<u64>,
    ) -> Result<Outcome, ExecutionError> {
        debug!(instructions = instrs.len(), ?max_steps, "executing");
        let outcome = self.run_inner(instrs, &mut input, &mut output, max_steps);
        output.flush()?;
        debug!(steps = self.steps, ?outcome, "execution stopped");
        outcome
    }

    fn run_inner<R: Read, W: Write>(
        &mut self,
        instrs: &[Instruction],
        input: &mut R,
        output: &mut W,
        max_steps: Option<u64>,
    ) -> Result<Outcome, ExecutionError> {
        let tape = &mut self.tape;
        let mut pc = 0;
        // First body instruction of every loop we're currently inside.
        let mut loop_starts: Vec<usize> = vec![];

        loop {
            if let Some(max_steps) = max_steps {
                if self.steps >= max_steps {
                    return Ok(Outcome::OutOfSteps);
                }
            }

            let instr = *instrs
                .get(pc)
                .ok_or(ExecutionError::InvalidInstructionPointer { pc })?;
            self.steps += 1;
            pc += 1;

            match instr {
                Add { amount, offset } => {
                    tape.shift(offset);
                    tape.add_current(amount);
                }
                Move { amount } => tape.shift(amount),
                Clear { offset, capture } => {
                    tape.shift(offset);
                    if capture {
                        self.carry = tape.current();
                    }
                    tape.set_current(0);
                }
                Set { amount, offset } => {
                    tape.shift(offset);
                    tape.set_current(amount as u8);
                }
                SeekRight { stride, offset } => {
                    tape.shift(offset);
                    while tape.current() != 0 {
                        tape.shift(stride);
                    }
                }
                SeekLeft { stride, offset } => {
                    tape.shift(offset);
                    while tape.current() != 0 {
                        tape.shift(stride.wrapping_neg());
                    }
                }
                Mul { factor, offset } => {
                    tape.add_relative(offset, factor.wrapping_mul(i32::from(self.carry)));
                }
                Input { offset } => {
                    tape.shift(offset);
                    output.flush()?;
                    tape.set_current(read_byte(input)?);
                }
                Output { offset } => {
                    tape.shift(offset);
                    output.write_all(&[tape.current()])?;
                }
                LoopBegin { offset } => {
                    tape.shift(offset);
                    if tape.current() == 0 {
                        pc = skip_loop(instrs, pc - 1)?;
                    } else {
                        loop_starts.push(pc);
                    }
                }
                LoopEnd { offset } => {
                    tape.shift(offset);
                    let start = *loop_starts
                        .last()
                        .ok_or(ExecutionError::StrayLoopEnd { pc: pc - 1 })?;
                    if tape.current() != 0 {
                        pc = start;
                    } else {
                        loop_starts.pop();
                    }
                }
                End => {
                    if let Some(start) = loop_starts.last() {
                        return Err(ExecutionError::UnterminatedLoop { pc: start - 1 });
                    }
                    return Ok(Outcome::Completed);
                }
            }
        }
    }
}

/// Index just past the `LoopEnd` matching the `LoopBegin` at `begin`.
fn skip_loop(instrs: &[Instruction], begin: usize) -> Result<usize, ExecutionError> {
    let mut depth = 1;
    for (index, instr) in instrs.iter().enumerate().skip(begin + 1) {
        match instr {
            LoopBegin { .. } => depth += 1,
            LoopEnd { .. } => {
                depth -= 1;
                if depth == 0 {
                    return Ok(index + 1);
                }
            }
            End => break,
            _ => (),
        }
    }
    Err(ExecutionError::UnterminatedLoop { pc: begin })
}

/// Read one byte, treating end of input as zero.
fn read_byte<R: Read>(input: &mut R) -> io::Result<u8> {
    let mut buf = [0];
    loop {
        match input.read(&mut buf) {
            Ok(0) => return Ok(0),
            Ok(_) => return Ok(buf[0]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
fn run_source(source: &str, flags: OptimisationsFlags, input: &[u8]) -> (Vec<u8>, ExecutionState) {
    let instrs = crate::compile(source.as_bytes(), flags).unwrap();
    let mut output = vec![];
    let state = execute(&instrs, input, &mut output).unwrap();
    (output, state)
}

#[test]
fn multiply_scenario_with_and_without_optimisations() {
    for flags in [OptimisationsFlags::all(), OptimisationsFlags::empty()] {
        let (output, state) = run_source("++++[>++++<-]>.", flags, b"");
        assert_eq!(output, [16]);
        assert_eq!(state.tape.pos(), 1);
        assert_eq!(&state.tape.cells()[..2], [0, 16]);
    }
}

#[test]
fn multiply_loop_is_cheaper() {
    let (_, optimised) = run_source("++++[>++++<-]>.", OptimisationsFlags::all(), b"");
    let (_, plain) = run_source("++++[>++++<-]>.", OptimisationsFlags::empty(), b"");
    assert!(optimised.steps < plain.steps);
}

#[test]
fn hello_world() {
    let source = "++++++++[>++++[>++>+++>+++>+<<<<-]>+>+>->>+[<]<-]>>.>---.+++++++..+++.>>.<-.<.+++.------.--------.>>+.>++.";
    for flags in [OptimisationsFlags::all(), OptimisationsFlags::empty()] {
        let (output, _) = run_source(source, flags, b"");
        assert_eq!(output, b"Hello World!\n");
    }
}

#[test]
fn cat_until_end_of_input() {
    let (output, state) = run_source(",[.,]", OptimisationsFlags::all(), b"abc");
    assert_eq!(output, b"abc");
    assert_eq!(state.tape.current(), 0);
}

#[test]
fn read_at_end_of_input_is_zero() {
    let (output, _) = run_source("+++,.", OptimisationsFlags::all(), b"");
    assert_eq!(output, [0]);
}

#[test]
fn seek_finds_zero_cell() {
    // Cells 0, 2 and 4 hold 1, cell 6 is the first zero at stride 2.
    let (_, state) = run_source("+>>+>>+[>>]", OptimisationsFlags::all(), b"");
    assert_eq!(state.tape.pos(), 6);
    let (_, state) = run_source(">>>>+<<+<<+[<<]", OptimisationsFlags::all(), b"");
    assert_eq!(state.tape.pos(), u16::MAX - 1);
}

#[test]
fn skipped_loop_runs_nothing() {
    let (output, state) = run_source("[.[.]+]>.", OptimisationsFlags::empty(), b"");
    assert_eq!(output, [0]);
    assert_eq!(state.tape.get(0), 0);
}

#[test]
fn nested_loops() {
    // 3 * 4 * 5 = 60 via nested plain loops.
    let (_, state) = run_source("+++[>++++[>+++++<-]<-]", OptimisationsFlags::empty(), b"");
    assert_eq!(state.tape.get(2), 60);
    let (_, state) = run_source("+++[>++++[>+++++<-]<-]", OptimisationsFlags::all(), b"");
    assert_eq!(state.tape.get(2), 60);
}

#[test]
fn loop_revisiting_base_through_wraparound() {
    // Each iteration takes one from cell 0 directly and one more after
    // going all the way round the tape, so cell 1 only reaches 2.
    let source = format!("++++[->+{}-{}]>.", ">".repeat(65535), "<".repeat(65536));
    for flags in [OptimisationsFlags::all(), OptimisationsFlags::empty()] {
        let (output, state) = run_source(&source, flags, b"");
        assert_eq!(output, [2]);
        assert_eq!(state.tape.get(0), 0);
    }
}

#[test]
fn pointer_wraps_left_of_origin() {
    let (output, state) = run_source("<+.", OptimisationsFlags::all(), b"");
    assert_eq!(output, [1]);
    assert_eq!(state.tape.pos(), u16::MAX);
}

#[test]
fn trailing_move_is_executed() {
    let (_, state) = run_source(">>>", OptimisationsFlags::all(), b"");
    assert_eq!(state.tape.pos(), 3);
}

#[test]
fn multiply_from_prepared_tape() {
    let instrs = crate::compile(b"[->+>++>>+++<<<<]", OptimisationsFlags::all()).unwrap();
    let mut tape = Tape::new();
    tape.set(0, 7);
    tape.set(4, 1);
    let mut state = ExecutionState::with_tape(tape);
    let outcome = state.run(&instrs, io::empty(), io::sink(), None).unwrap();
    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(&state.tape.cells()[..5], [0, 7, 14, 0, 22]);
    assert_eq!(state.carry, 7);
}

#[test]
fn step_limit_stops_infinite_loop() {
    let instrs = crate::compile(b"+[]", OptimisationsFlags::all()).unwrap();
    let mut state = ExecutionState::new();
    let outcome = state
        .run(&instrs, io::empty(), io::sink(), Some(100))
        .unwrap();
    assert_eq!(outcome, Outcome::OutOfSteps);
    assert_eq!(state.steps, 100);
}

#[test]
fn stray_loop_end_is_reported() {
    let instrs = [LoopEnd { offset: 0 }, End];
    let result = execute(&instrs, io::empty(), io::sink());
    assert!(matches!(result, Err(ExecutionError::StrayLoopEnd { pc: 0 })));
}

#[test]
fn unterminated_loop_is_reported() {
    let instrs = [Add { amount: 1, offset: 0 }, LoopBegin { offset: 0 }, End];
    let result = execute(&instrs, io::empty(), io::sink());
    assert!(matches!(result, Err(ExecutionError::UnterminatedLoop { pc: 1 })));

    let instrs = [LoopBegin { offset: 0 }, End];
    let result = execute(&instrs, io::empty(), io::sink());
    assert!(matches!(result, Err(ExecutionError::UnterminatedLoop { pc: 0 })));
}

#[test]
fn missing_end_is_reported() {
    let instrs = [Add { amount: 1, offset: 0 }];
    let result = execute(&instrs, io::empty(), io::sink());
    assert!(matches!(result, Err(ExecutionError::InvalidInstructionPointer { pc: 1 })));
}
