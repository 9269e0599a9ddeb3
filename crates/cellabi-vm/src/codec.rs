//! Bit-level store/load of one typed value, as performed by the machine's
//! typed store and load primitives.
//!
//! Value shapes on the stack:
//! - integral types, enums, function ids: `Int` (bool is `-1`/`0`)
//! - addresses: `Slice` holding exactly the address bits
//! - cell, bytes, string: `Cell`
//! - mapping: `Null` (empty) or `Cell` (dictionary root)
//! - array: `Tuple[Int length, Null | Cell]`
//! - optional: `Null` or the inner value; when the inner value can itself
//!   be null it is wrapped in a one-element `Tuple`
//! - struct, tuple: `Tuple` of members

use cellabi_types::size::{optional_is_inline, varint_len_bits};
use cellabi_types::{Type, TypeSize};
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::cell::{Builder, Slice};
use crate::error::{Trap, VmResult};
use crate::value::Value;

// ══════════════════════════════════════════════════════════════════════════════
// Store
// ══════════════════════════════════════════════════════════════════════════════

/// Append `value` of type `ty` to `b`.
pub fn store_value(b: &mut Builder, ty: &Type, value: Value) -> VmResult<()> {
    match ty {
        Type::Integer { .. }
        | Type::Bool
        | Type::FixedBytes(_)
        | Type::Function
        | Type::Enum { .. } => {
            let bits = ty.integral_bits().unwrap_or_default();
            let v = value.into_int()?;
            if ty.is_signed() {
                b.store_int(&v, bits)
            } else {
                b.store_uint(&v, bits)
            }
        }
        Type::Address => b.store_slice(&value.into_slice()?),
        Type::AddressStd => {
            let s = value.into_slice()?;
            if s.remaining_bits() != cellabi_types::size::STD_ADDRESS_BITS as usize {
                return Err(Trap::RangeCheck);
            }
            b.store_slice(&s)
        }
        Type::Cell | Type::Bytes | Type::String => b.store_ref(value.into_cell()?),
        Type::Mapping { .. } => store_dict(b, value),
        Type::Array { .. } => {
            let mut items = value.into_tuple()?;
            if items.len() != 2 {
                return Err(Trap::TypeCheck {
                    expected: "pair",
                    found: "tuple",
                });
            }
            let dict = items.pop().unwrap_or(Value::Null);
            let len = items.pop().unwrap_or(Value::Null).into_int()?;
            b.store_uint(&len, 32)?;
            store_dict(b, dict)
        }
        Type::VarInteger { bytes, signed } => {
            let v = value.into_int()?;
            store_var_integer(b, &v, *bytes, *signed)
        }
        Type::Optional(inner) => {
            if value == Value::Null {
                return b.store_bit(false);
            }
            let value = if inner.value_may_be_null() {
                let mut wrapped = value.into_tuple()?;
                match (wrapped.pop(), wrapped.is_empty()) {
                    (Some(v), true) => v,
                    _ => {
                        return Err(Trap::TypeCheck {
                            expected: "singleton",
                            found: "tuple",
                        })
                    }
                }
            } else {
                value
            };
            b.store_bit(true)?;
            if optional_is_inline(&TypeSize::of(inner)) {
                store_value(b, inner, value)
            } else {
                let mut boxed = Builder::new();
                store_value(&mut boxed, inner, value)?;
                b.store_ref(boxed.into_cell())
            }
        }
        Type::Struct(def) => {
            let members: Vec<&Type> = def.fields.iter().map(|f| &*f.ty).collect();
            store_members(b, &members, value)
        }
        Type::Tuple(items) => {
            let members: Vec<&Type> = items.iter().map(|t| &**t).collect();
            store_members(b, &members, value)
        }
        Type::UserDefined { underlying, .. } => store_value(b, underlying, value),
    }
}

fn store_members(b: &mut Builder, members: &[&Type], value: Value) -> VmResult<()> {
    let values = value.into_tuple()?;
    if values.len() != members.len() {
        return Err(Trap::TypeCheck {
            expected: "tuple of member count",
            found: "tuple",
        });
    }
    for (ty, v) in members.iter().zip(values) {
        store_value(b, ty, v)?;
    }
    Ok(())
}

fn store_dict(b: &mut Builder, value: Value) -> VmResult<()> {
    match value {
        Value::Null => b.store_bit(false),
        Value::Cell(root) => {
            b.store_bit(true)?;
            b.store_ref(root)
        }
        other => Err(Trap::TypeCheck {
            expected: "cell or null",
            found: other.kind(),
        }),
    }
}

/// Byte length of the shortest encoding of `v`.
fn var_byte_len(v: &BigInt, signed: bool) -> usize {
    if v.is_zero() {
        return 0;
    }
    let magnitude_bits = if signed {
        // one extra bit for the sign; -2^k needs only k+1
        if v.is_negative() {
            (-v - 1u32).bits() as usize + 1
        } else {
            v.bits() as usize + 1
        }
    } else {
        v.bits() as usize
    };
    magnitude_bits.div_ceil(8)
}

fn store_var_integer(b: &mut Builder, v: &BigInt, bytes: u8, signed: bool) -> VmResult<()> {
    if !signed && v.is_negative() {
        return Err(Trap::RangeCheck);
    }
    let len = var_byte_len(v, signed);
    if len >= usize::from(bytes) {
        return Err(Trap::RangeCheck);
    }
    b.store_uint(&BigInt::from(len), varint_len_bits(bytes))?;
    let width = (len * 8) as u32;
    if width == 0 {
        return Ok(());
    }
    if signed {
        b.store_int(v, width)
    } else {
        b.store_uint(v, width)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Load
// ══════════════════════════════════════════════════════════════════════════════

/// Read a value of type `ty` from `s`, advancing it.
pub fn load_value(s: &mut Slice, ty: &Type) -> VmResult<Value> {
    match ty {
        Type::Integer { .. }
        | Type::Bool
        | Type::FixedBytes(_)
        | Type::Function
        | Type::Enum { .. } => {
            let bits = ty.integral_bits().unwrap_or_default();
            let v = if ty.is_signed() {
                s.load_int(bits)?
            } else {
                s.load_uint(bits)?
            };
            Ok(Value::Int(v))
        }
        Type::Address => load_address(s),
        Type::AddressStd => {
            let start = s.clone();
            let tag = s.load_bits(3)?;
            if tag != [true, false, false] {
                return Err(Trap::CellUnderflow);
            }
            s.load_bits(264)?;
            Ok(Value::Slice(start.consumed_bits(s)))
        }
        Type::Cell | Type::Bytes | Type::String => Ok(Value::Cell(s.load_ref()?)),
        Type::Mapping { .. } => load_dict(s),
        Type::Array { .. } => {
            let len = s.load_uint(32)?;
            let dict = load_dict(s)?;
            Ok(Value::Tuple(vec![Value::Int(len), dict]))
        }
        Type::VarInteger { bytes, signed } => {
            let len = s.load_uint(varint_len_bits(*bytes))?;
            let width = len.to_u32().ok_or(Trap::RangeCheck)? * 8;
            let v = if width == 0 {
                BigInt::zero()
            } else if *signed {
                s.load_int(width)?
            } else {
                s.load_uint(width)?
            };
            Ok(Value::Int(v))
        }
        Type::Optional(inner) => {
            if !s.load_bit()? {
                return Ok(Value::Null);
            }
            let value = if optional_is_inline(&TypeSize::of(inner)) {
                load_value(s, inner)?
            } else {
                let mut boxed = Slice::new(s.load_ref()?);
                load_value(&mut boxed, inner)?
            };
            if inner.value_may_be_null() {
                Ok(Value::Tuple(vec![value]))
            } else {
                Ok(value)
            }
        }
        Type::Struct(def) => {
            let mut values = Vec::with_capacity(def.fields.len());
            for field in &def.fields {
                values.push(load_value(s, &field.ty)?);
            }
            Ok(Value::Tuple(values))
        }
        Type::Tuple(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(load_value(s, item)?);
            }
            Ok(Value::Tuple(values))
        }
        Type::UserDefined { underlying, .. } => load_value(s, underlying),
    }
}

fn load_dict(s: &mut Slice) -> VmResult<Value> {
    if s.load_bit()? {
        Ok(Value::Cell(s.load_ref()?))
    } else {
        Ok(Value::Null)
    }
}

fn load_uint_usize(s: &mut Slice, bits: u32) -> VmResult<usize> {
    s.load_uint(bits)?.to_usize().ok_or(Trap::RangeCheck)
}

/// `LDMSGADDR`: parse any `MsgAddress` and return its bits as a slice.
fn load_address(s: &mut Slice) -> VmResult<Value> {
    let start = s.clone();
    let tag = load_uint_usize(s, 2)?;
    match tag {
        0b00 => {}
        0b01 => {
            let len = load_uint_usize(s, 9)?;
            s.load_bits(len)?;
        }
        0b10 => {
            skip_anycast(s)?;
            s.load_bits(8 + 256)?;
        }
        _ => {
            skip_anycast(s)?;
            let len = load_uint_usize(s, 9)?;
            s.load_bits(32 + len)?;
        }
    }
    Ok(Value::Slice(start.consumed_bits(s)))
}

fn skip_anycast(s: &mut Slice) -> VmResult<()> {
    if s.load_bit()? {
        let depth = load_uint_usize(s, 5)?;
        if depth == 0 || depth > 30 {
            return Err(Trap::CellUnderflow);
        }
        s.load_bits(depth)?;
    }
    Ok(())
}

/// Convenience: store `value` into a fresh cell and reopen it.
pub fn pack_one(ty: &Type, value: Value) -> VmResult<Slice> {
    let mut b = Builder::new();
    store_value(&mut b, ty, value)?;
    Ok(Slice::new(b.into_cell()))
}

/// A dictionary root stand-in carrying `tag` so tests can tell roots apart.
pub fn dict_root(tag: u64) -> VmResult<Value> {
    let mut b = Builder::new();
    b.store_uint(&BigInt::from(tag), 64)?;
    Ok(Value::Cell(b.into_cell()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(ty: &Type, value: Value) {
        let mut s = pack_one(ty, value.clone()).unwrap();
        let back = load_value(&mut s, ty).unwrap();
        assert!(s.is_empty(), "{ty} left data behind");
        assert_eq!(back, value, "{ty}");
    }

    #[test]
    fn leaf_round_trips() {
        round_trip(&Type::Integer { bits: 256, signed: false }, Value::int(12345));
        round_trip(&Type::Integer { bits: 8, signed: true }, Value::int(-128));
        round_trip(&Type::Bool, Value::bool(true));
        round_trip(&Type::Bool, Value::bool(false));
        round_trip(&Type::Function, Value::int(0xdead_beefu32));
        round_trip(&Type::Cell, Value::cell_of(9, 16).unwrap());
        round_trip(&Type::Address, Value::std_address(-1, [3; 32]).unwrap());
        round_trip(&Type::Address, Value::addr_none().unwrap());
        round_trip(&Type::AddressStd, Value::std_address(0, [1; 32]).unwrap());
    }

    #[test]
    fn var_integers() {
        let vu = Type::VarInteger { bytes: 16, signed: false };
        let vi = Type::VarInteger { bytes: 32, signed: true };
        for v in [0i64, 1, 255, 256, 1_000_000_007] {
            round_trip(&vu, Value::int(v));
            round_trip(&vi, Value::int(-v));
            round_trip(&vi, Value::int(v));
        }
        round_trip(&vi, Value::int(-128));
        let mut b = Builder::new();
        assert_eq!(store_value(&mut b, &vu, Value::int(-1)), Err(Trap::RangeCheck));
        let s = pack_one(&vu, Value::int(256)).unwrap();
        assert_eq!(s.remaining_bits(), 4 + 16);
    }

    #[test]
    fn containers() {
        let arr = Type::Array {
            elem: Type::uint(8),
            len: None,
        };
        round_trip(&arr, Value::Tuple(vec![Value::int(3), dict_root(1).unwrap()]));
        round_trip(&arr, Value::Tuple(vec![Value::int(0), Value::Null]));

        let map = Type::Mapping {
            key: Type::uint(8),
            value: Type::cell(),
        };
        round_trip(&map, Value::Null);
        round_trip(&map, dict_root(2).unwrap());

        let opt = Type::Optional(Type::uint(64));
        round_trip(&opt, Value::Null);
        round_trip(&opt, Value::int(77));
        assert_eq!(pack_one(&opt, Value::int(1)).unwrap().remaining_bits(), 65);

        let nested = Type::Optional(Type::optional(Type::uint(8)));
        round_trip(&nested, Value::Tuple(vec![Value::Null]));
        round_trip(&nested, Value::Tuple(vec![Value::int(5)]));

        let boxed = Type::Optional(Type::tuple(vec![
            Type::uint(256),
            Type::uint(256),
            Type::uint(256),
            Type::uint(255),
        ]));
        let payload = Value::Tuple((0..4).map(Value::int).collect());
        round_trip(&boxed, payload.clone());
        let s = pack_one(&boxed, payload).unwrap();
        assert_eq!((s.remaining_bits(), s.remaining_refs()), (1, 1));
    }
}
