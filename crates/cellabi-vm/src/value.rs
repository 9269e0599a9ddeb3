//! Stack values of the cell machine.

use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::Zero;

use crate::cell::{Builder, Cell, Slice};
use crate::error::{Trap, VmResult};

/// One operand-stack entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Int(BigInt),
    Cell(Rc<Cell>),
    Slice(Slice),
    Builder(Builder),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn int(v: impl Into<BigInt>) -> Self {
        Value::Int(v.into())
    }

    /// Machine booleans are `-1` for true and `0` for false.
    pub fn bool(b: bool) -> Self {
        Value::int(if b { -1 } else { 0 })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "integer",
            Value::Cell(_) => "cell",
            Value::Slice(_) => "slice",
            Value::Builder(_) => "builder",
            Value::Tuple(_) => "tuple",
        }
    }

    fn mismatch(&self, expected: &'static str) -> Trap {
        Trap::TypeCheck {
            expected,
            found: self.kind(),
        }
    }

    pub fn into_int(self) -> VmResult<BigInt> {
        match self {
            Value::Int(v) => Ok(v),
            other => Err(other.mismatch("integer")),
        }
    }

    pub fn is_true(&self) -> VmResult<bool> {
        match self {
            Value::Int(v) => Ok(!v.is_zero()),
            other => Err(other.mismatch("integer")),
        }
    }

    pub fn into_cell(self) -> VmResult<Rc<Cell>> {
        match self {
            Value::Cell(c) => Ok(c),
            other => Err(other.mismatch("cell")),
        }
    }

    pub fn into_slice(self) -> VmResult<Slice> {
        match self {
            Value::Slice(s) => Ok(s),
            other => Err(other.mismatch("slice")),
        }
    }

    pub fn into_builder(self) -> VmResult<Builder> {
        match self {
            Value::Builder(b) => Ok(b),
            other => Err(other.mismatch("builder")),
        }
    }

    pub fn into_tuple(self) -> VmResult<Vec<Value>> {
        match self {
            Value::Tuple(items) => Ok(items),
            other => Err(other.mismatch("tuple")),
        }
    }

    /// An `addr_std` slice: workchain `wc`, account `hash`.
    pub fn std_address(wc: i8, hash: [u8; 32]) -> VmResult<Self> {
        let mut b = Builder::new();
        b.store_bits(&[true, false, false])?;
        b.store_int(&BigInt::from(wc), 8)?;
        for byte in hash {
            b.store_uint(&BigInt::from(byte), 8)?;
        }
        Ok(Value::Slice(Slice::new(b.into_cell())))
    }

    /// The empty address `addr_none`.
    pub fn addr_none() -> VmResult<Self> {
        let mut b = Builder::new();
        b.store_bits(&[false, false])?;
        Ok(Value::Slice(Slice::new(b.into_cell())))
    }

    /// A standalone cell holding `value` in `bits` bits.
    pub fn cell_of(value: u64, bits: u32) -> VmResult<Self> {
        let mut b = Builder::new();
        b.store_uint(&BigInt::from(value), bits)?;
        Ok(Value::Cell(b.into_cell()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std_address_is_267_bits() {
        let Value::Slice(s) = Value::std_address(0, [7; 32]).unwrap() else {
            panic!("expected slice");
        };
        assert_eq!(s.remaining_bits(), 267);
    }

    #[test]
    fn accessors_report_kind() {
        assert_eq!(
            Value::Null.into_int(),
            Err(Trap::TypeCheck {
                expected: "integer",
                found: "null"
            })
        );
        assert!(Value::bool(true).is_true().unwrap());
        assert!(!Value::bool(false).is_true().unwrap());
    }
}
