#![warn(trivial_numeric_casts)]

//! bff compiles BF programs to a flat, optimised instruction stream and
//! interprets it on a 64KiB wrapping tape.
//!
//! ```
//! use bff::{compile, execute, OptimisationsFlags};
//!
//! let instrs = compile(b"++++[>++++<-]>.", OptimisationsFlags::all()).unwrap();
//! let mut output = vec![];
//! execute(&instrs, std::io::empty(), &mut output).unwrap();
//! assert_eq!(output, [16]);
//! ```

pub use bfir::{check_brackets, filter, listing, parse, CompileError, Instruction};
pub use diagnostics::{Diagnostic, Position};
pub use execution::{execute, ExecutionError, ExecutionState, Outcome};
pub use peephole::{optimize, OptimisationsFlags};
pub use tape::{Tape, TAPE_SIZE};

mod bfir;
mod diagnostics;
mod execution;
mod peephole;
mod tape;

#[cfg(test)]
mod soundness_tests;

/// Validate, lex and optimise `source` in one go.
pub fn compile(source: &[u8], flags: OptimisationsFlags) -> Result<Vec<Instruction>, CompileError> {
    let instrs = parse(source, flags)?;
    Ok(optimize(instrs, flags))
}
