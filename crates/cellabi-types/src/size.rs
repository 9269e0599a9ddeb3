//! Wire size model for leaf types and the type flattener.
//!
//! A cell holds at most [`CELL_BIT_LENGTH`] data bits and [`CELL_REF_LIMIT`]
//! references.  [`TypeSize`] reports the worst case a value of a type can
//! occupy; dynamic types report a bounded maximum and are flagged non-fixed.

use crate::ty::{Type, TypeRef};

/// Maximum number of data bits in one cell.
pub const CELL_BIT_LENGTH: u32 = 1023;
/// Maximum number of references in one cell.
pub const CELL_REF_LIMIT: u32 = 4;
/// Longest possible `MsgAddress` encoding.
pub const ADDRESS_MAX_BITS: u32 = 591;
/// `addr_std` without anycast: tag(2) + anycast flag(1) + workchain(8) + address(256).
pub const STD_ADDRESS_BITS: u32 = 267;
/// Length of an array header inside the parent cell: uint32 length + dict presence bit.
pub const ARRAY_HEADER_BITS: u32 = 33;

/// Worst-case footprint of a type inside a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeSize {
    pub max_bits: u32,
    pub max_refs: u32,
    /// Every value occupies exactly `max_bits` and `max_refs`.
    pub fixed_size: bool,
    /// Every value occupies exactly `max_refs` references.
    pub fixed_refs: bool,
}

impl TypeSize {
    const fn fixed(bits: u32, refs: u32) -> Self {
        Self {
            max_bits: bits,
            max_refs: refs,
            fixed_size: true,
            fixed_refs: true,
        }
    }

    const fn dynamic(bits: u32, refs: u32, fixed_refs: bool) -> Self {
        Self {
            max_bits: bits,
            max_refs: refs,
            fixed_size: false,
            fixed_refs,
        }
    }

    /// Compute the size of `ty`.
    pub fn of(ty: &Type) -> Self {
        match ty {
            Type::Integer { .. }
            | Type::Bool
            | Type::FixedBytes(_)
            | Type::Function
            | Type::Enum { .. } => {
                // integral_bits is total on these categories
                Self::fixed(ty.integral_bits().unwrap_or_default(), 0)
            }
            Type::Address => Self::dynamic(ADDRESS_MAX_BITS, 0, true),
            Type::AddressStd => Self::fixed(STD_ADDRESS_BITS, 0),
            Type::Cell | Type::Bytes | Type::String => Self::fixed(0, 1),
            Type::VarInteger { bytes, .. } => {
                let len_bits = varint_len_bits(*bytes);
                Self::dynamic(len_bits + 8 * (u32::from(*bytes) - 1), 0, true)
            }
            Type::Array { .. } => Self::dynamic(ARRAY_HEADER_BITS, 1, false),
            Type::Mapping { .. } => Self::dynamic(1, 1, false),
            Type::Optional(inner) => {
                let inner = TypeSize::of(inner);
                if optional_is_inline(&inner) {
                    Self::dynamic(1 + inner.max_bits, inner.max_refs, inner.max_refs == 0)
                } else {
                    Self::dynamic(1, 1, false)
                }
            }
            Type::Struct(def) => Self::sum(def.fields.iter().map(|f| &*f.ty)),
            Type::Tuple(components) => Self::sum(components.iter().map(|c| &**c)),
            Type::UserDefined { underlying, .. } => TypeSize::of(underlying),
        }
    }

    fn sum<'a>(members: impl Iterator<Item = &'a Type>) -> Self {
        members.map(TypeSize::of).fold(Self::fixed(0, 0), |acc, s| Self {
            max_bits: acc.max_bits + s.max_bits,
            max_refs: acc.max_refs + s.max_refs,
            fixed_size: acc.fixed_size && s.fixed_size,
            fixed_refs: acc.fixed_refs && s.fixed_refs,
        })
    }
}

/// Width of the byte-length prefix of `varuintN` / `varintN`.
pub fn varint_len_bits(bytes: u8) -> u32 {
    // ceil(log2(bytes))
    u32::BITS - (u32::from(bytes) - 1).leading_zeros()
}

/// An optional is stored in the parent cell when its payload plus the
/// presence bit still fits one cell with a spare reference; otherwise the
/// payload goes to a separate cell behind one reference.
pub fn optional_is_inline(inner: &TypeSize) -> bool {
    inner.max_bits < CELL_BIT_LENGTH && inner.max_refs < CELL_REF_LIMIT
}

/// The first optional payload inside `ty` that is too large to stay inline
/// and also too large for the single cell it would be boxed into.
///
/// Such a type has a finite size in the model but no value of it can be
/// stored, so codegen rejects it up front.
pub fn oversized_payload(ty: &Type) -> Option<&Type> {
    match ty {
        Type::Optional(inner) => {
            let size = TypeSize::of(inner);
            if !optional_is_inline(&size)
                && (size.max_bits > CELL_BIT_LENGTH || size.max_refs > CELL_REF_LIMIT)
            {
                return Some(&**inner);
            }
            oversized_payload(inner)
        }
        Type::Struct(def) => def.fields.iter().find_map(|f| oversized_payload(&f.ty)),
        Type::Tuple(components) => components.iter().find_map(|c| oversized_payload(c)),
        Type::UserDefined { underlying, .. } => oversized_payload(underlying),
        _ => None,
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Flattening
// ══════════════════════════════════════════════════════════════════════════════

/// Append the primitive leaves of `ty` to `out`.
///
/// Structs expand member by member in declaration order, user-defined
/// wrappers expand to their underlying type.  Arrays, mappings, optionals
/// and tuples are leaves here.
pub fn unroll(out: &mut Vec<TypeRef>, ty: &TypeRef) {
    match &**ty {
        Type::Struct(def) => {
            for field in &def.fields {
                unroll(out, &field.ty);
            }
        }
        Type::UserDefined { underlying, .. } => unroll(out, underlying),
        _ => out.push(ty.clone()),
    }
}

/// Flatten a single type into its leaves.
pub fn flatten(ty: &TypeRef) -> Vec<TypeRef> {
    let mut out = Vec::new();
    unroll(&mut out, ty);
    out
}

/// Flatten an ordered list of types and concatenate their leaves.
pub fn flatten_all(types: &[TypeRef]) -> Vec<TypeRef> {
    let mut out = Vec::new();
    for ty in types {
        unroll(&mut out, ty);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ty::StructDef;

    #[test]
    fn primitive_sizes() {
        assert_eq!(TypeSize::of(&Type::uint(256)), TypeSize::fixed(256, 0));
        assert_eq!(TypeSize::of(&Type::bool()).max_bits, 1);
        assert_eq!(TypeSize::of(&Type::fixed_bytes(4)).max_bits, 32);
        assert_eq!(TypeSize::of(&Type::enumeration("Color", 3)).max_bits, 8);
        assert_eq!(TypeSize::of(&Type::cell()), TypeSize::fixed(0, 1));
        assert_eq!(TypeSize::of(&Type::address_std()), TypeSize::fixed(267, 0));
    }

    #[test]
    fn dynamic_types_report_a_single_ref_slot() {
        for ty in [
            Type::array(Type::uint(8)),
            Type::mapping(Type::uint(32), Type::cell()),
        ] {
            let size = TypeSize::of(&ty);
            assert_eq!(size.max_refs, 1);
            assert!(!size.fixed_size);
            assert!(!size.fixed_refs);
        }
        let addr = TypeSize::of(&Type::address());
        assert_eq!(addr.max_bits, ADDRESS_MAX_BITS);
        assert!(!addr.fixed_size);
        assert!(addr.fixed_refs);
    }

    #[test]
    fn varint_sizes() {
        assert_eq!(varint_len_bits(16), 4);
        assert_eq!(varint_len_bits(32), 5);
        assert_eq!(TypeSize::of(&Type::varuint(16)).max_bits, 124);
        assert_eq!(TypeSize::of(&Type::varint(32)).max_bits, 253);
    }

    #[test]
    fn optional_inline_and_boxed() {
        let small = TypeSize::of(&Type::optional(Type::uint(64)));
        assert_eq!((small.max_bits, small.max_refs), (65, 0));
        assert!(small.fixed_refs);

        let full = Type::tuple(vec![Type::uint(256), Type::uint(256), Type::uint(256), Type::uint(255)]);
        let boxed = TypeSize::of(&Type::optional(full));
        assert_eq!((boxed.max_bits, boxed.max_refs), (1, 1));
    }

    #[test]
    fn payloads_must_fit_their_box() {
        let full = Type::tuple(vec![Type::uint(256), Type::uint(256), Type::uint(256), Type::uint(255)]);
        assert_eq!(oversized_payload(&Type::optional(full)), None);

        let wide = Type::tuple(vec![Type::uint(256); 4]);
        let opt = Type::optional(wide.clone());
        assert_eq!(oversized_payload(&opt), Some(&*wide));

        let refs = Type::tuple(vec![Type::cell(); 5]);
        let holder = Type::structure(StructDef::new(
            "Holder",
            vec![("n", Type::uint(8)), ("o", Type::optional(refs.clone()))],
        ));
        assert_eq!(oversized_payload(&holder), Some(&*refs));
        assert_eq!(oversized_payload(&Type::uint(256)), None);
    }

    #[test]
    fn struct_size_is_member_sum() {
        let point = Type::structure(StructDef::new(
            "Point",
            vec![("x", Type::uint(128)), ("y", Type::uint(128))],
        ));
        assert_eq!(TypeSize::of(&point), TypeSize::fixed(256, 0));
    }

    #[test]
    fn flatten_struct_among_leaves() {
        let pair = Type::structure(StructDef::new(
            "Pair",
            vec![("a", Type::uint(128)), ("b", Type::uint(128))],
        ));
        let params = vec![Type::bool(), pair, Type::address(), Type::cell()];
        let leaves = flatten_all(&params);
        assert_eq!(leaves.len(), 5);
        assert_eq!(*leaves[1], Type::Integer { bits: 128, signed: false });
        assert_eq!(*leaves[2], Type::Integer { bits: 128, signed: false });
        assert_eq!(*leaves[3], Type::Address);
    }

    #[test]
    fn flatten_keeps_containers_as_leaves() {
        let inner = Type::structure(StructDef::new("In", vec![("v", Type::uint(8))]));
        for ty in [
            Type::array(inner.clone()),
            Type::optional(inner.clone()),
            Type::mapping(Type::uint(8), inner.clone()),
        ] {
            assert_eq!(flatten(&ty).len(), 1);
        }
    }

    #[test]
    fn flatten_nesting_depths() {
        // A chain of structs nested `depth` deep, each adding one leaf,
        // flattens to exactly `depth + 1` leaves wrapped any way.
        for depth in 0..12usize {
            let mut ty = Type::uint(8);
            for level in 0..depth {
                let name = format!("S{level}");
                let member = if level % 2 == 0 {
                    ty
                } else {
                    Type::user_defined(&format!("W{level}"), ty)
                };
                ty = Type::structure(StructDef::new(
                    name,
                    vec![("inner", member), ("tail", Type::bool())],
                ));
            }
            let leaves = flatten(&ty);
            assert_eq!(leaves.len(), depth + 1, "depth {depth}");
            assert_eq!(*leaves[0], Type::Integer { bits: 8, signed: false });
            assert!(leaves[1..].iter().all(|l| **l == Type::Bool));
        }
    }
}
