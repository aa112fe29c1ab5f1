//! The memory tape programs run against.

use std::fmt;

/// Number of cells on the tape. The cursor is a `u16`, so cursor
/// arithmetic wraps at exactly this size and every access is in bounds.
pub const TAPE_SIZE: usize = 1 << 16;

/// Fixed size byte memory plus a cursor.
#[derive(Clone, PartialEq, Eq)]
pub struct Tape {
    cells: Box<[u8; TAPE_SIZE]>,
    pos: u16,
}

impl Tape {
    pub fn new() -> Self {
        Tape {
            cells: Box::new([0; TAPE_SIZE]),
            pos: 0,
        }
    }

    pub fn pos(&self) -> u16 {
        self.pos
    }

    pub fn set_pos(&mut self, pos: u16) {
        self.pos = pos;
    }

    /// Move the cursor by `amount`, wrapping around the ends of the tape.
    #[inline]
    pub fn shift(&mut self, amount: i32) {
        // Truncating to u16 is the same as reducing modulo TAPE_SIZE.
        self.pos = self.pos.wrapping_add(amount as u16);
    }

    #[inline]
    pub fn current(&self) -> u8 {
        self.cells[usize::from(self.pos)]
    }

    #[inline]
    pub fn set_current(&mut self, value: u8) {
        self.cells[usize::from(self.pos)] = value;
    }

    #[inline]
    pub fn add_current(&mut self, amount: i32) {
        let cell = &mut self.cells[usize::from(self.pos)];
        *cell = cell.wrapping_add(amount as u8);
    }

    /// Add to the cell `offset` cells away without moving the cursor.
    #[inline]
    pub fn add_relative(&mut self, offset: i32, amount: i32) {
        let index = self.pos.wrapping_add(offset as u16);
        let cell = &mut self.cells[usize::from(index)];
        *cell = cell.wrapping_add(amount as u8);
    }

    pub fn get(&self, index: u16) -> u8 {
        self.cells[usize::from(index)]
    }

    pub fn set(&mut self, index: u16, value: u8) {
        self.cells[usize::from(index)] = value;
    }

    pub fn cells(&self) -> &[u8] {
        &self.cells[..]
    }
}

impl Default for Tape {
    fn default() -> Self {
        Tape::new()
    }
}

impl fmt::Debug for Tape {
    // Dumping 64KiB is useless, show the populated prefix instead.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let used = self
            .cells
            .iter()
            .rposition(|&c| c != 0)
            .map_or(0, |last| last + 1);
        f.debug_struct("Tape")
            .field("pos", &self.pos)
            .field("cells", &&self.cells[..used])
            .finish()
    }
}

#[cfg(test)]
use pretty_assertions::assert_eq;

#[test]
fn shift_wraps_full_circle() {
    let mut tape = Tape::new();
    tape.set_pos(1234);
    for _ in 0..TAPE_SIZE {
        tape.shift(1);
    }
    assert_eq!(tape.pos(), 1234);

    tape.shift(TAPE_SIZE as i32);
    assert_eq!(tape.pos(), 1234);
    tape.shift(-(TAPE_SIZE as i32));
    assert_eq!(tape.pos(), 1234);
}

#[test]
fn shift_left_of_zero_wraps_to_end() {
    let mut tape = Tape::new();
    tape.shift(-1);
    assert_eq!(tape.pos(), (TAPE_SIZE - 1) as u16);
    tape.shift(1);
    assert_eq!(tape.pos(), 0);
}

#[test]
fn cell_increment_wraps() {
    let mut tape = Tape::new();
    tape.set_current(255);
    tape.add_current(1);
    assert_eq!(tape.current(), 0);

    tape.add_current(-1);
    assert_eq!(tape.current(), 255);

    tape.add_current(258);
    assert_eq!(tape.current(), 1);
}

#[test]
fn add_relative_leaves_cursor() {
    let mut tape = Tape::new();
    tape.set_pos(5);
    tape.add_relative(-6, 3);
    assert_eq!(tape.pos(), 5);
    assert_eq!(tape.get(u16::MAX), 3);
}

#[test]
fn debug_shows_used_prefix() {
    let mut tape = Tape::new();
    tape.set(2, 7);
    assert_eq!(format!("{:?}", tape), "Tape { pos: 0, cells: [0, 0, 7] }");
}
