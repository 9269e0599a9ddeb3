//! Bit-exact cells, builders and slices.
//!
//! A [`Cell`] is immutable once finalized.  A [`Builder`] enforces the
//! 1023-bit / 4-reference capacity on every write; a [`Slice`] is a read
//! cursor over a shared cell.

use std::rc::Rc;

use cellabi_types::{CELL_BIT_LENGTH, CELL_REF_LIMIT};
use num_bigint::BigInt;
use num_traits::{One, Signed, Zero};

use crate::error::{Trap, VmResult};

const MAX_BITS: usize = CELL_BIT_LENGTH as usize;
const MAX_REFS: usize = CELL_REF_LIMIT as usize;

// ══════════════════════════════════════════════════════════════════════════════
// Cell
// ══════════════════════════════════════════════════════════════════════════════

/// A finalized cell.  Equality is structural over the whole reference tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cell {
    bits: Vec<bool>,
    refs: Vec<Rc<Cell>>,
}

impl Cell {
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    pub fn refs(&self) -> &[Rc<Cell>] {
        &self.refs
    }

    /// This cell and the `links` continuations after it.  Every cell but
    /// the last holds its continuation in its last reference; the last
    /// cell's references are all data.  `None` if a link is missing.
    pub fn chain(&self, links: usize) -> Option<Vec<&Cell>> {
        let mut cells = vec![self];
        let mut current = self;
        for _ in 0..links {
            current = current.refs.last()?;
            cells.push(current);
        }
        Some(cells)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Builder
// ══════════════════════════════════════════════════════════════════════════════

/// A cell under construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Builder {
    bits: Vec<bool>,
    refs: Vec<Rc<Cell>>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bits_used(&self) -> usize {
        self.bits.len()
    }

    pub fn refs_used(&self) -> usize {
        self.refs.len()
    }

    pub fn store_bits(&mut self, bits: &[bool]) -> VmResult<()> {
        if self.bits.len() + bits.len() > MAX_BITS {
            return Err(Trap::CellOverflow);
        }
        self.bits.extend_from_slice(bits);
        Ok(())
    }

    pub fn store_bit(&mut self, bit: bool) -> VmResult<()> {
        self.store_bits(&[bit])
    }

    pub fn store_uint(&mut self, value: &BigInt, width: u32) -> VmResult<()> {
        if value.is_negative() || *value >= (BigInt::one() << width) {
            return Err(Trap::RangeCheck);
        }
        self.store_bits(&to_bits(value, width))
    }

    pub fn store_int(&mut self, value: &BigInt, width: u32) -> VmResult<()> {
        if width == 0 {
            return Err(Trap::RangeCheck);
        }
        let half = BigInt::one() << (width - 1);
        if *value < -&half || *value >= half {
            return Err(Trap::RangeCheck);
        }
        self.store_bits(&to_bits(value, width))
    }

    pub fn store_ref(&mut self, cell: Rc<Cell>) -> VmResult<()> {
        if self.refs.len() >= MAX_REFS {
            return Err(Trap::CellOverflow);
        }
        self.refs.push(cell);
        Ok(())
    }

    /// Append the remaining bits and references of `slice`.
    pub fn store_slice(&mut self, slice: &Slice) -> VmResult<()> {
        if self.refs.len() + slice.remaining_refs() > MAX_REFS {
            return Err(Trap::CellOverflow);
        }
        self.store_bits(slice.remaining_bit_slice())?;
        self.refs.extend(slice.remaining_ref_slice().iter().cloned());
        Ok(())
    }

    pub fn into_cell(self) -> Rc<Cell> {
        Rc::new(Cell {
            bits: self.bits,
            refs: self.refs,
        })
    }
}

/// Two's-complement big-endian rendering of `value` in `width` bits.
fn to_bits(value: &BigInt, width: u32) -> Vec<bool> {
    (0..u64::from(width)).rev().map(|i| value.bit(i)).collect()
}

// ══════════════════════════════════════════════════════════════════════════════
// Slice
// ══════════════════════════════════════════════════════════════════════════════

/// A read cursor over a cell.
#[derive(Debug, Clone)]
pub struct Slice {
    cell: Rc<Cell>,
    bit_pos: usize,
    bit_end: usize,
    ref_pos: usize,
    ref_end: usize,
}

impl Slice {
    pub fn new(cell: Rc<Cell>) -> Self {
        let bit_end = cell.bits.len();
        let ref_end = cell.refs.len();
        Self {
            cell,
            bit_pos: 0,
            bit_end,
            ref_pos: 0,
            ref_end,
        }
    }

    pub fn remaining_bits(&self) -> usize {
        self.bit_end - self.bit_pos
    }

    pub fn remaining_refs(&self) -> usize {
        self.ref_end - self.ref_pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0 && self.remaining_refs() == 0
    }

    fn remaining_bit_slice(&self) -> &[bool] {
        &self.cell.bits[self.bit_pos..self.bit_end]
    }

    fn remaining_ref_slice(&self) -> &[Rc<Cell>] {
        &self.cell.refs[self.ref_pos..self.ref_end]
    }

    pub fn load_bits(&mut self, n: usize) -> VmResult<Vec<bool>> {
        if self.remaining_bits() < n {
            return Err(Trap::CellUnderflow);
        }
        let bits = self.cell.bits[self.bit_pos..self.bit_pos + n].to_vec();
        self.bit_pos += n;
        Ok(bits)
    }

    pub fn load_bit(&mut self) -> VmResult<bool> {
        Ok(self.load_bits(1)?[0])
    }

    pub fn load_uint(&mut self, width: u32) -> VmResult<BigInt> {
        let bits = self.load_bits(width as usize)?;
        Ok(bits.iter().fold(BigInt::zero(), |acc, b| {
            (acc << 1u32) + if *b { 1 } else { 0 }
        }))
    }

    pub fn load_int(&mut self, width: u32) -> VmResult<BigInt> {
        let negative = self.remaining_bits() >= width as usize
            && width > 0
            && self.cell.bits[self.bit_pos];
        let raw = self.load_uint(width)?;
        if negative {
            Ok(raw - (BigInt::one() << width))
        } else {
            Ok(raw)
        }
    }

    pub fn load_ref(&mut self) -> VmResult<Rc<Cell>> {
        if self.remaining_refs() == 0 {
            return Err(Trap::CellUnderflow);
        }
        let cell = self.cell.refs[self.ref_pos].clone();
        self.ref_pos += 1;
        Ok(cell)
    }

    /// Reference `idx` of the remaining ones, without advancing.
    pub fn preload_ref(&self, idx: usize) -> VmResult<Rc<Cell>> {
        self.remaining_ref_slice()
            .get(idx)
            .cloned()
            .ok_or(Trap::CellUnderflow)
    }

    /// Split into the first `bits`/`refs` and the rest.
    pub fn split(&self, bits: usize, refs: usize) -> VmResult<(Slice, Slice)> {
        if bits > self.remaining_bits() || refs > self.remaining_refs() {
            return Err(Trap::CellUnderflow);
        }
        let mut head = self.clone();
        head.bit_end = self.bit_pos + bits;
        head.ref_end = self.ref_pos + refs;
        let mut tail = self.clone();
        tail.bit_pos += bits;
        tail.ref_pos += refs;
        Ok((head, tail))
    }

    pub fn skip_first(&self, bits: usize, refs: usize) -> VmResult<Slice> {
        Ok(self.split(bits, refs)?.1)
    }

    pub fn cut_last(&self, bits: usize, refs: usize) -> VmResult<Slice> {
        if bits > self.remaining_bits() || refs > self.remaining_refs() {
            return Err(Trap::CellUnderflow);
        }
        let mut last = self.clone();
        last.bit_pos = self.bit_end - bits;
        last.ref_pos = self.ref_end - refs;
        Ok(last)
    }

    /// The part of `self` already consumed by `after`, a later state of the
    /// same cursor.  Only the bits are kept.
    pub fn consumed_bits(&self, after: &Slice) -> Slice {
        let mut head = self.clone();
        head.bit_end = after.bit_pos;
        head.ref_end = head.ref_pos;
        head
    }

    /// Copy the remaining data into a standalone cell.
    pub fn to_cell(&self) -> Rc<Cell> {
        Rc::new(Cell {
            bits: self.remaining_bit_slice().to_vec(),
            refs: self.remaining_ref_slice().to_vec(),
        })
    }
}

impl PartialEq for Slice {
    fn eq(&self, other: &Self) -> bool {
        self.remaining_bit_slice() == other.remaining_bit_slice()
            && self.remaining_ref_slice() == other.remaining_ref_slice()
    }
}

impl Eq for Slice {}
