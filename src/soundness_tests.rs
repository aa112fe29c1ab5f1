//! Randomised checks that optimisations never change what a program
//! does.

use crate::bfir::{Instruction, Instruction::*};
use crate::compile;
use crate::execution::{ExecutionState, Outcome};
use crate::peephole::{fuse_sets, OptimisationsFlags};
use crate::tape::{Tape, TAPE_SIZE};
use pretty_assertions::assert_eq;
use quickcheck::{quickcheck, Arbitrary, Gen, TestResult};

const MAX_STEPS: u64 = 10_000;

/// Loop shapes the optimiser has special cases for.
const IDIOMS: &[&str] = &[
    "[-]", "[+]", "[>]", "[<<]", "[->+<]", "[-<<+++>>]", "[>+<-]", "[->+>--<<]",
];

#[derive(Clone, Debug)]
struct Source(String);

fn choose<G: Gen>(g: &mut G, n: usize) -> usize {
    usize::arbitrary(g) % n
}

fn arbitrary_code<G: Gen>(g: &mut G, depth: usize) -> String {
    let mut code = String::new();
    for _ in 0..choose(g, 10) {
        let repeat = 1 + choose(g, 3);
        match choose(g, 10) {
            0 | 1 => code.push_str(&"+".repeat(repeat)),
            2 | 3 => code.push_str(&"-".repeat(repeat)),
            4 => code.push_str(&">".repeat(repeat)),
            5 => code.push_str(&"<".repeat(repeat)),
            6 => code.push('.'),
            7 => code.push(','),
            8 if depth < 3 => {
                code.push('[');
                code.push_str(&arbitrary_code(g, depth + 1));
                code.push(']');
            }
            _ => code.push_str(IDIOMS[choose(g, IDIOMS.len())]),
        }
    }
    code
}

impl Arbitrary for Source {
    fn arbitrary<G: Gen>(g: &mut G) -> Self {
        Source(arbitrary_code(g, 0))
    }
}

/// A loop body that adds to cells around the base and returns the
/// pointer to it. Some moves detour once round the whole tape on the
/// way. Unless `aliases_base` is set it takes exactly one from the base;
/// with it set, a detour lands back on the base and takes one more.
#[derive(Clone, Debug)]
struct MultiplyBody {
    code: String,
    aliases_base: bool,
}

fn moves<G: Gen>(g: &mut G, from: i32, to: i32) -> String {
    let lap = match choose(g, 6) {
        0 => TAPE_SIZE as i32,
        1 => -(TAPE_SIZE as i32),
        _ => 0,
    };
    let distance = to - from + lap;
    if distance > 0 {
        ">".repeat(distance as usize)
    } else {
        "<".repeat(distance.unsigned_abs() as usize)
    }
}

impl Arbitrary for MultiplyBody {
    fn arbitrary<G: Gen>(g: &mut G) -> Self {
        let decrement_at = choose(g, 4);
        let aliases_base = bool::arbitrary(g);
        let mut code = String::new();
        let mut position = 0;

        for index in 0..4 {
            if index == decrement_at {
                code.push_str(&moves(g, position, 0));
                code.push('-');
                position = 0;
            }
            if bool::arbitrary(g) {
                let mut target = choose(g, 7) as i32 - 3;
                if target == 0 {
                    target = 1;
                }
                let amount = 1 + choose(g, 5);
                let symbol = if bool::arbitrary(g) { "+" } else { "-" };
                code.push_str(&moves(g, position, target));
                code.push_str(&symbol.repeat(amount));
                position = target;
            }
        }
        if aliases_base {
            let lap = if bool::arbitrary(g) {
                TAPE_SIZE as i32
            } else {
                -(TAPE_SIZE as i32)
            };
            code.push_str(&moves(g, position, lap));
            code.push('-');
            position = lap;
        }
        code.push_str(&moves(g, position, 0));
        MultiplyBody { code, aliases_base }
    }
}

impl Arbitrary for Instruction {
    fn arbitrary<G: Gen>(g: &mut G) -> Self {
        let amount = i32::from(i8::arbitrary(g));
        let offset = choose(g, 3) as i32 - 1;
        match choose(g, 6) {
            0 | 1 => Add { amount, offset },
            2 => Clear {
                offset,
                capture: bool::arbitrary(g),
            },
            3 => Set { amount, offset },
            4 => Output { offset },
            _ => Move { amount },
        }
    }
}

fn run_limited(
    instrs: &[Instruction],
    state: &mut ExecutionState,
    input: &[u8],
    max_steps: u64,
) -> (Outcome, Vec<u8>) {
    let mut output = vec![];
    let outcome = state
        .run(instrs, input, &mut output, Some(max_steps))
        .unwrap();
    (outcome, output)
}

fn loops_balanced(instrs: &[Instruction]) -> bool {
    let mut depth: i64 = 0;
    for instr in instrs {
        match instr {
            LoopBegin { .. } => depth += 1,
            LoopEnd { .. } => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => (),
        }
    }
    depth == 0
}

#[test]
fn optimisations_preserve_behaviour() {
    fn prop(source: Source, input: Vec<u8>) -> TestResult {
        let plain = compile(source.0.as_bytes(), OptimisationsFlags::empty()).unwrap();
        let mut plain_state = ExecutionState::new();
        let (outcome, plain_output) = run_limited(&plain, &mut plain_state, &input, MAX_STEPS);
        if outcome == Outcome::OutOfSteps {
            return TestResult::discard();
        }

        for flags in [
            OptimisationsFlags::all(),
            OptimisationsFlags::LOOP_IDIOMS,
            OptimisationsFlags::FUSE_MOVES | OptimisationsFlags::MULTIPLY_LOOPS,
            OptimisationsFlags::all() - OptimisationsFlags::FUSE_MOVES,
        ] {
            let optimised = compile(source.0.as_bytes(), flags).unwrap();
            let mut state = ExecutionState::new();
            // A skipped multiply loop costs one step unoptimised but
            // one per target once specialised, hence the headroom.
            let (outcome, output) = run_limited(&optimised, &mut state, &input, MAX_STEPS * 64);
            if outcome != Outcome::Completed
                || output != plain_output
                || state.tape != plain_state.tape
            {
                return TestResult::failed();
            }
        }
        TestResult::passed()
    }
    quickcheck(prop as fn(Source, Vec<u8>) -> TestResult);
}

#[test]
fn compiled_streams_are_well_formed() {
    fn prop(source: Source) -> bool {
        let instrs = compile(source.0.as_bytes(), OptimisationsFlags::all()).unwrap();
        let ends = instrs.iter().filter(|i| **i == End).count();
        ends == 1 && instrs.last() == Some(&End) && loops_balanced(&instrs)
    }
    quickcheck(prop as fn(Source) -> bool);
}

#[test]
fn multiply_loops_match_plain_loops() {
    fn prop(body: MultiplyBody, base: u8, neighbours: Vec<u8>) -> bool {
        let source = format!("[{}]", body.code);
        let specialised = compile(source.as_bytes(), OptimisationsFlags::all()).unwrap();
        let plain = compile(source.as_bytes(), OptimisationsFlags::empty()).unwrap();

        // Taking two from the base per iteration is not a multiplication.
        let kept_loop = specialised.iter().any(|i| matches!(i, LoopBegin { .. }));
        if kept_loop != body.aliases_base {
            return false;
        }

        let mut tape = Tape::new();
        for (index, &value) in neighbours.iter().take(7).enumerate() {
            tape.set(7 + index as u16, value);
        }
        tape.set(10, base);
        tape.set_pos(10);

        let mut specialised_state = ExecutionState::with_tape(tape.clone());
        let mut plain_state = ExecutionState::with_tape(tape);
        // At most 255 iterations of a body of at most 30 instructions.
        let (plain_outcome, _) = run_limited(&plain, &mut plain_state, &[], 1 << 14);
        let (outcome, _) = run_limited(&specialised, &mut specialised_state, &[], 1 << 14);

        plain_outcome == Outcome::Completed
            && outcome == Outcome::Completed
            && specialised_state.tape == plain_state.tape
            && plain_state.tape.get(10) == 0
    }
    quickcheck(prop as fn(MultiplyBody, u8, Vec<u8>) -> bool);
}

#[test]
fn multiply_loop_example_for_every_start_value() {
    let source = b"[->+>++>>+++<<<<]";
    let specialised = compile(source, OptimisationsFlags::all()).unwrap();
    let plain = compile(source, OptimisationsFlags::empty()).unwrap();

    for v in 0..=255u8 {
        let mut tape = Tape::new();
        tape.set(0, v);
        let mut specialised_state = ExecutionState::with_tape(tape.clone());
        let mut plain_state = ExecutionState::with_tape(tape);
        run_limited(&specialised, &mut specialised_state, &[], 1 << 16);
        run_limited(&plain, &mut plain_state, &[], 1 << 16);

        assert_eq!(specialised_state.tape, plain_state.tape);
        let cells = &plain_state.tape.cells()[..5];
        assert_eq!(
            cells,
            [
                0,
                v,
                v.wrapping_mul(2),
                0,
                v.wrapping_mul(3)
            ]
        );
    }
}

#[test]
fn fuse_sets_is_idempotent() {
    fn prop(mut instrs: Vec<Instruction>) -> bool {
        instrs.push(End);
        let once = fuse_sets(instrs);
        fuse_sets(once.clone()) == once
    }
    quickcheck(prop as fn(Vec<Instruction>) -> bool);
}
