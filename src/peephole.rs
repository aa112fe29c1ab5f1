//! Optimisations that replace parts of the instruction stream with
//! cheaper equivalents.

use crate::bfir::Instruction;
use crate::bfir::Instruction::*;
use bitflags::bitflags;
use itertools::Itertools;
use tracing::{debug, trace};

bitflags! {
    /// Selects which optimisations run. Every combination is correct;
    /// `empty()` gives a straight one-to-one translation of the source.
    pub struct OptimisationsFlags: u32 {
        /// Compile `[-]`, `[+]`, `[>..]` and `[<..]` to dedicated
        /// instructions while lexing.
        const LOOP_IDIOMS = 0b0001;
        /// Fold pointer moves into the instruction that follows them.
        const FUSE_MOVES = 0b0010;
        /// Replace loops that provably run `cell` times with
        /// multiplications.
        const MULTIPLY_LOOPS = 0b0100;
        /// Turn clear-then-add into a single set.
        const FUSE_SETS = 0b1000;
    }
}

impl Default for OptimisationsFlags {
    fn default() -> Self {
        OptimisationsFlags::all()
    }
}

/// Run every enabled pass, in order: move fusion, multiplication
/// loops, set fusion.
pub fn optimize(instrs: Vec<Instruction>, flags: OptimisationsFlags) -> Vec<Instruction> {
    let before = instrs.len();
    let mut instrs = instrs;

    if flags.contains(OptimisationsFlags::FUSE_MOVES) {
        instrs = fuse_moves(instrs);
        debug!(instructions = instrs.len(), "fused pointer moves");
    }
    if flags.contains(OptimisationsFlags::MULTIPLY_LOOPS) {
        instrs = specialize_multiply_loops(instrs);
        debug!(instructions = instrs.len(), "specialized multiply loops");
    }
    if flags.contains(OptimisationsFlags::FUSE_SETS) {
        instrs = fuse_sets(instrs);
        debug!(instructions = instrs.len(), "fused sets");
    }

    debug!(before, after = instrs.len(), "optimisation finished");
    instrs
}

/// Fold each `Move` into the displacement of the instruction after
/// it. A `Move` right before `End`, another `Move` or a `Mul` is kept.
pub fn fuse_moves(instrs: Vec<Instruction>) -> Vec<Instruction> {
    instrs
        .into_iter()
        .coalesce(|prev, mut next| match prev {
            Move { amount } => match next.displacement_mut() {
                Some(offset) => {
                    *offset = offset.wrapping_add(amount);
                    Ok(next)
                }
                None => Err((prev, next)),
            },
            _ => Err((prev, next)),
        })
        .collect()
}

/// A loop body that is nothing but `Add`s, rewritten as multiplications.
#[derive(Debug, PartialEq, Eq)]
struct MultiplyLoop {
    /// Displacement of the loop itself, where the base cell lives.
    base_offset: i32,
    /// (offset from base, factor) for every non-base cell touched,
    /// offsets reduced to the range of an `i16`.
    targets: Vec<(i32, i32)>,
    /// Number of instructions covered, `LoopBegin` to `LoopEnd`.
    len: usize,
}

/// If `instrs` starts with a loop that only adds to cells, returns the
/// pointer to where it started and takes exactly one from the base cell
/// per iteration, describe it as a sequence of multiplications.
fn multiply_loop(instrs: &[Instruction]) -> Option<MultiplyLoop> {
    let base_offset = match instrs.first() {
        Some(LoopBegin { offset }) => *offset,
        _ => return None,
    };

    // Addresses wrap at the tape size, so the balance is kept as a tape
    // address: an offset of 65536 is the base cell again.
    let mut balance: u16 = 0;
    let mut change_on_base: i32 = 0;
    let mut targets = vec![];

    for (index, instr) in instrs.iter().enumerate().skip(1) {
        match *instr {
            Add { amount, offset } => {
                balance = balance.wrapping_add(offset as u16);
                if balance == 0 {
                    change_on_base = change_on_base.wrapping_add(amount);
                } else {
                    targets.push((i32::from(balance as i16), amount));
                }
            }
            LoopEnd { offset } => {
                balance = balance.wrapping_add(offset as u16);
                if balance == 0 && change_on_base == -1 {
                    return Some(MultiplyLoop {
                        base_offset,
                        targets,
                        len: index + 1,
                    });
                }
                return None;
            }
            _ => return None,
        }
    }
    None
}

/// Replace loops like `[->++>+++<<]` with a capturing `Clear` of the
/// base cell followed by one `Mul` per cell the body adds to. The
/// result runs in constant time however large the base cell is.
pub fn specialize_multiply_loops(instrs: Vec<Instruction>) -> Vec<Instruction> {
    let mut result = Vec::with_capacity(instrs.len());
    let mut index = 0;

    while index < instrs.len() {
        match multiply_loop(&instrs[index..]) {
            Some(mul) => {
                trace!(
                    at = index,
                    base_offset = mul.base_offset,
                    targets = mul.targets.len(),
                    "multiply loop"
                );
                result.push(Clear {
                    offset: mul.base_offset,
                    capture: true,
                });
                result.extend(
                    mul.targets
                        .iter()
                        .map(|&(offset, factor)| Mul { factor, offset }),
                );
                index += mul.len;
            }
            None => {
                result.push(instrs[index]);
                index += 1;
            }
        }
    }
    result
}

/// Combine `Clear`/`Set` with a following in-place `Add` into one
/// `Set`. The tape starts zeroed, so a leading in-place `Add` is a
/// `Set` too. A single scan reaches a fixed point.
pub fn fuse_sets(instrs: Vec<Instruction>) -> Vec<Instruction> {
    let mut instrs = instrs;
    if let Some(first) = instrs.first_mut() {
        if let Add { amount, offset: 0 } = *first {
            *first = Set { amount, offset: 0 };
        }
    }

    instrs
        .into_iter()
        .coalesce(|prev, next| match (prev, next) {
            (Clear { offset, .. }, Add { amount, offset: 0 }) => Ok(Set { amount, offset }),
            (
                Set { amount, offset },
                Add {
                    amount: extra,
                    offset: 0,
                },
            ) => Ok(Set {
                amount: amount.wrapping_add(extra),
                offset,
            }),
            _ => Err((prev, next)),
        })
        .collect()
}
