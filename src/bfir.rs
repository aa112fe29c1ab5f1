//! bfir defines the flat instruction stream that BF programs are
//! compiled to, and the first compilation pass that produces it from
//! source code.
//!
//! Unlike a tree IR, loops are delimited by `LoopBegin`/`LoopEnd`
//! markers and every instruction may carry a pointer displacement that
//! is applied before its effect. The stream always ends with `End`.

use self::Instruction::*;
use crate::diagnostics::{Diagnostic, Position};
use crate::peephole::OptimisationsFlags;
use std::fmt;
use thiserror::Error;

#[cfg(test)]
use pretty_assertions::assert_eq;

/// The eight symbols of the language. Everything else is a comment.
const SYMBOLS: &[u8] = b"+-<>.,[]";

/// `Instruction` is a single step of a compiled program.
///
/// `offset` fields are a pointer displacement applied before the
/// instruction takes effect, except on `Mul` where it addresses a cell
/// relative to the pointer without moving it.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Instruction {
    Add {
        amount: i32,
        offset: i32,
    },
    /// Zero the cell. With `capture` set the old value becomes the carry
    /// for the `Mul` instructions that follow.
    Clear {
        offset: i32,
        capture: bool,
    },
    Move {
        amount: i32,
    },
    /// Step right by `stride` until a zero cell is found.
    SeekRight {
        stride: i32,
        offset: i32,
    },
    /// Step left by `stride` until a zero cell is found.
    SeekLeft {
        stride: i32,
        offset: i32,
    },
    Input {
        offset: i32,
    },
    Output {
        offset: i32,
    },
    LoopBegin {
        offset: i32,
    },
    LoopEnd {
        offset: i32,
    },
    /// Add `factor * carry` to the cell `offset` away from the pointer.
    Mul {
        factor: i32,
        offset: i32,
    },
    Set {
        amount: i32,
        offset: i32,
    },
    End,
}

impl Instruction {
    /// The pointer displacement applied before this instruction, if it
    /// has one. `Mul` offsets are addresses, not displacements.
    pub fn displacement_mut(&mut self) -> Option<&mut i32> {
        match self {
            Add { offset, .. }
            | Clear { offset, .. }
            | SeekRight { offset, .. }
            | SeekLeft { offset, .. }
            | Input { offset }
            | Output { offset }
            | LoopBegin { offset }
            | LoopEnd { offset }
            | Set { offset, .. } => Some(offset),
            Move { .. } | Mul { .. } | End => None,
        }
    }
}

struct Displacement(i32);

impl fmt::Display for Displacement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0 != 0 {
            write!(f, " @{:+}", self.0)?;
        }
        Ok(())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Add { amount, offset } => write!(f, "add {}{}", amount, Displacement(offset)),
            Clear { offset, capture } => {
                write!(f, "clear{}", Displacement(offset))?;
                if capture {
                    write!(f, " -> carry")?;
                }
                Ok(())
            }
            Move { amount } => write!(f, "move {}", amount),
            SeekRight { stride, offset } => write!(f, "seek> {}{}", stride, Displacement(offset)),
            SeekLeft { stride, offset } => write!(f, "seek< {}{}", stride, Displacement(offset)),
            Input { offset } => write!(f, "in{}", Displacement(offset)),
            Output { offset } => write!(f, "out{}", Displacement(offset)),
            LoopBegin { offset } => write!(f, "loop{}", Displacement(offset)),
            LoopEnd { offset } => write!(f, "endloop{}", Displacement(offset)),
            Mul { factor, offset } => write!(f, "mul carry*{}{}", factor, Displacement(offset)),
            Set { amount, offset } => write!(f, "set {}{}", amount, Displacement(offset)),
            End => write!(f, "end"),
        }
    }
}

/// Render a numbered listing of a stream, indenting loop bodies.
pub fn listing(instrs: &[Instruction]) -> String {
    let width = instrs.len().to_string().len();
    let mut depth = 0usize;
    let mut result = String::new();

    for (index, instr) in instrs.iter().enumerate() {
        if let LoopEnd { .. } = instr {
            depth = depth.saturating_sub(1);
        }
        result.push_str(&format!(
            "{:>width$}  {}{}\n",
            index,
            "  ".repeat(depth),
            instr,
            width = width
        ));
        if let LoopBegin { .. } = instr {
            depth += 1;
        }
    }
    result
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("unmatched `[`: this [ has no matching ]")]
    UnmatchedOpener { position: Position },
    #[error("unmatched `]`: this ] has no matching [")]
    UnmatchedCloser { position: Position },
}

impl CompileError {
    pub fn position(&self) -> Position {
        match *self {
            CompileError::UnmatchedOpener { position }
            | CompileError::UnmatchedCloser { position } => position,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic {
            message: self.to_string(),
            position: Some(self.position()),
        }
    }
}

/// Check that every `[` in `source` has a matching `]` and vice versa.
/// Bytes other than brackets are ignored, so raw program text can be
/// checked and positions point into it. The first mismatch in source
/// order is reported: a `]` as soon as it closes nothing, otherwise the
/// earliest `[` left open.
pub fn check_brackets(source: &[u8]) -> Result<(), CompileError> {
    // Offsets of the loops that are still open.
    let mut open = vec![];

    for (index, &c) in source.iter().enumerate() {
        match c {
            b'[' => open.push(index),
            b']' => {
                if open.pop().is_none() {
                    return Err(CompileError::UnmatchedCloser {
                        position: Position::at(index),
                    });
                }
            }
            _ => (),
        }
    }

    match open.first() {
        Some(&index) => Err(CompileError::UnmatchedOpener {
            position: Position::at(index),
        }),
        None => Ok(()),
    }
}

/// Drop every byte that isn't one of the eight BF symbols.
pub fn filter(source: &[u8]) -> Vec<u8> {
    source
        .iter()
        .copied()
        .filter(|c| SYMBOLS.contains(c))
        .collect()
}

/// Given BF source code, validate it and return the first pass
/// instruction stream. Runs of `+-<>` are collapsed and, if
/// `LOOP_IDIOMS` is set, clear and seek loops are recognised.
pub fn parse(source: &[u8], flags: OptimisationsFlags) -> Result<Vec<Instruction>, CompileError> {
    check_brackets(source)?;
    let symbols = filter(source);
    Ok(lex(&symbols, flags.contains(OptimisationsFlags::LOOP_IDIOMS)))
}

fn lex(symbols: &[u8], idioms: bool) -> Vec<Instruction> {
    let mut instrs = Vec::with_capacity(symbols.len() + 1);
    let mut index = 0;

    while let Some(&c) = symbols.get(index) {
        let rest = &symbols[index..];
        let (instr, consumed) = match c {
            b'+' | b'-' | b'>' | b'<' => {
                let run = rest.iter().take_while(|&&r| r == c).count();
                // Wrapping is harmless: cells and the cursor are both
                // reduced modulo a power of two much smaller than 2^32.
                let amount = if c == b'+' || c == b'>' {
                    run as i32
                } else {
                    (run as i32).wrapping_neg()
                };
                if c == b'+' || c == b'-' {
                    (Add { amount, offset: 0 }, run)
                } else {
                    (Move { amount }, run)
                }
            }
            b'.' => (Output { offset: 0 }, 1),
            b',' => (Input { offset: 0 }, 1),
            b'[' => match loop_idiom(rest) {
                Some(idiom) if idioms => idiom,
                _ => (LoopBegin { offset: 0 }, 1),
            },
            b']' => (LoopEnd { offset: 0 }, 1),
            _ => {
                index += 1;
                continue;
            }
        };
        instrs.push(instr);
        index += consumed;
    }

    instrs.push(End);
    instrs
}

/// Recognise `[-]`, `[+]`, `[>>..]` and `[<<..]` at the start of
/// `symbols`, returning the replacement and how many symbols it covers.
/// A nested loop anywhere in the body rules out both idioms.
fn loop_idiom(symbols: &[u8]) -> Option<(Instruction, usize)> {
    if let [b'[', b'+' | b'-', b']', ..] = symbols {
        return Some((
            Clear {
                offset: 0,
                capture: false,
            },
            3,
        ));
    }

    let body = symbols.get(1..)?;
    let direction = *body.first()?;
    if direction != b'>' && direction != b'<' {
        return None;
    }

    let stride = body.iter().take_while(|&&c| c == direction).count();
    if body.get(stride) != Some(&b']') {
        return None;
    }

    let seek = if direction == b'>' {
        SeekRight {
            stride: stride as i32,
            offset: 0,
        }
    } else {
        SeekLeft {
            stride: stride as i32,
            offset: 0,
        }
    };
    Some((seek, stride + 2))
}

#[cfg(test)]
fn parse_all(source: &str) -> Vec<Instruction> {
    parse(source.as_bytes(), OptimisationsFlags::all()).unwrap()
}

#[test]
fn parse_empty() {
    assert_eq!(parse_all(""), [End]);
}

#[test]
fn parse_increment_run() {
    assert_eq!(parse_all("++++"), [Add { amount: 4, offset: 0 }, End]);
    assert_eq!(parse_all("+"), [Add { amount: 1, offset: 0 }, End]);
}

#[test]
fn parse_decrement_run() {
    assert_eq!(parse_all("---"), [Add { amount: -3, offset: 0 }, End]);
}

#[test]
fn parse_pointer_runs() {
    assert_eq!(parse_all(">>"), [Move { amount: 2 }, End]);
    assert_eq!(parse_all("<<<<<"), [Move { amount: -5 }, End]);
}

#[test]
fn parse_alternating_runs_stay_separate() {
    assert_eq!(
        parse_all("++-><<"),
        [
            Add { amount: 2, offset: 0 },
            Add { amount: -1, offset: 0 },
            Move { amount: 1 },
            Move { amount: -2 },
            End
        ]
    );
}

#[test]
fn parse_io() {
    assert_eq!(
        parse_all(".,"),
        [Output { offset: 0 }, Input { offset: 0 }, End]
    );
}

#[test]
fn parse_comment() {
    assert_eq!(parse_all("foo! "), [End]);
    // Comments between symbols don't split runs.
    assert_eq!(parse_all("+ +\n+"), [Add { amount: 3, offset: 0 }, End]);
}

#[test]
fn parse_clear_idiom() {
    let clear = Clear {
        offset: 0,
        capture: false,
    };
    assert_eq!(parse_all("[-]"), [clear, End]);
    assert_eq!(parse_all("[+]"), [clear, End]);
}

#[test]
fn parse_seek_idiom() {
    assert_eq!(
        parse_all("[>>>]"),
        [
            SeekRight {
                stride: 3,
                offset: 0
            },
            End
        ]
    );
    assert_eq!(
        parse_all("[<<<<<]"),
        [
            SeekLeft {
                stride: 5,
                offset: 0
            },
            End
        ]
    );
}

#[test]
fn parse_mixed_body_is_plain_loop() {
    assert_eq!(
        parse_all("[+<<-]"),
        [
            LoopBegin { offset: 0 },
            Add { amount: 1, offset: 0 },
            Move { amount: -2 },
            Add { amount: -1, offset: 0 },
            LoopEnd { offset: 0 },
            End
        ]
    );
    assert_eq!(
        parse_all("[><]"),
        [
            LoopBegin { offset: 0 },
            Move { amount: 1 },
            Move { amount: -1 },
            LoopEnd { offset: 0 },
            End
        ]
    );
}

#[test]
fn parse_nested_loops_are_never_idioms() {
    assert_eq!(
        parse_all("[[]]"),
        [
            LoopBegin { offset: 0 },
            LoopBegin { offset: 0 },
            LoopEnd { offset: 0 },
            LoopEnd { offset: 0 },
            End
        ]
    );
    // The inner loop is still a seek, the outer one isn't.
    assert_eq!(
        parse_all("[[>]]"),
        [
            LoopBegin { offset: 0 },
            SeekRight {
                stride: 1,
                offset: 0
            },
            LoopEnd { offset: 0 },
            End
        ]
    );
    assert_eq!(
        parse_all("[>[>]]"),
        [
            LoopBegin { offset: 0 },
            Move { amount: 1 },
            SeekRight {
                stride: 1,
                offset: 0
            },
            LoopEnd { offset: 0 },
            End
        ]
    );
}

#[test]
fn parse_empty_and_double_step_loops() {
    assert_eq!(
        parse_all("[]"),
        [LoopBegin { offset: 0 }, LoopEnd { offset: 0 }, End]
    );
    assert_eq!(
        parse_all("[--]"),
        [
            LoopBegin { offset: 0 },
            Add { amount: -2, offset: 0 },
            LoopEnd { offset: 0 },
            End
        ]
    );
}

#[test]
fn parse_without_idioms() {
    let instrs = parse(b"[-][>]", OptimisationsFlags::empty()).unwrap();
    assert_eq!(
        instrs,
        [
            LoopBegin { offset: 0 },
            Add { amount: -1, offset: 0 },
            LoopEnd { offset: 0 },
            LoopBegin { offset: 0 },
            Move { amount: 1 },
            LoopEnd { offset: 0 },
            End
        ]
    );
}

#[test]
fn check_balanced() {
    assert_eq!(check_brackets(b"[[][]]"), Ok(()));
    assert_eq!(check_brackets(b""), Ok(()));
}

#[test]
fn check_unmatched_opener() {
    assert_eq!(
        check_brackets(b"[[]"),
        Err(CompileError::UnmatchedOpener {
            position: Position::at(0)
        })
    );
    assert_eq!(
        check_brackets(b"+[[+"),
        Err(CompileError::UnmatchedOpener {
            position: Position::at(1)
        })
    );
    assert_eq!(
        check_brackets(b"[[]]["),
        Err(CompileError::UnmatchedOpener {
            position: Position::at(4)
        })
    );
}

#[test]
fn check_unmatched_closer() {
    assert_eq!(
        check_brackets(b"[]]"),
        Err(CompileError::UnmatchedCloser {
            position: Position::at(2)
        })
    );
    assert_eq!(
        check_brackets(b"]["),
        Err(CompileError::UnmatchedCloser {
            position: Position::at(0)
        })
    );
}

#[test]
fn check_positions_count_comments() {
    assert_eq!(
        check_brackets(b"ab ] ["),
        Err(CompileError::UnmatchedCloser {
            position: Position::at(3)
        })
    );
}

#[test]
fn parse_unbalanced_emits_nothing() {
    assert!(parse(b"[", OptimisationsFlags::all()).is_err());
    assert!(parse(b"]", OptimisationsFlags::all()).is_err());
    assert!(parse(b"[][", OptimisationsFlags::all()).is_err());
}

#[test]
fn compile_error_messages() {
    let err = check_brackets(b"[").unwrap_err();
    assert_eq!(err.to_string(), "unmatched `[`: this [ has no matching ]");
    assert_eq!(err.to_diagnostic().position, Some(Position::at(0)));

    let err = check_brackets(b"]").unwrap_err();
    assert_eq!(err.to_string(), "unmatched `]`: this ] has no matching [");
}

#[test]
fn filter_keeps_symbols_only() {
    assert_eq!(filter(b"a+b-c<d>e.f,g[h]i\n"), b"+-<>.,[]".to_vec());
}

#[test]
fn display_instructions() {
    assert_eq!(Add { amount: -3, offset: 2 }.to_string(), "add -3 @+2");
    assert_eq!(
        Clear {
            offset: -1,
            capture: true
        }
        .to_string(),
        "clear @-1 -> carry"
    );
    assert_eq!(Mul { factor: 2, offset: 1 }.to_string(), "mul carry*2 @+1");
    assert_eq!(End.to_string(), "end");
}

#[test]
fn listing_indents_loop_bodies() {
    let instrs = parse_all(",[.,]");
    assert_eq!(listing(&instrs), "0  in\n1  loop\n2    out\n3    in\n4  endloop\n5  end\n");
}
