//! Semantic type representation consumed by the chain-data codec.
//!
//! [`Type`] is a closed tagged union: every category the codec can meet is
//! a variant, so an unhandled category is a compile error rather than a
//! silent fallthrough.  Types are immutable once built and shared through
//! [`TypeRef`] wherever they are reused.

use std::fmt;
use std::rc::Rc;

/// Shared, immutable handle to a [`Type`].
pub type TypeRef = Rc<Type>;

// ══════════════════════════════════════════════════════════════════════════════
// Type
// ══════════════════════════════════════════════════════════════════════════════

/// A semantic type as seen by the codec.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    // ── Primitives ──
    /// `uintN` / `intN`, 1 ≤ N ≤ 256 (257 for signed).
    Integer { bits: u16, signed: bool },
    Bool,
    /// Any message address (`MsgAddress`), variable length.
    Address,
    /// Standard internal address only, fixed length.
    AddressStd,
    /// An arbitrary cell, stored as a reference.
    Cell,
    Bytes,
    String,
    /// `fixedbytesN`, 1 ≤ N ≤ 32.
    FixedBytes(u8),
    /// A function reference, stored as its 32-bit id.
    Function,
    /// An enum with the given number of variants.
    Enum { name: std::string::String, variants: u32 },
    /// `varuintN` / `varintN` with N ∈ {16, 32}.
    VarInteger { bytes: u8, signed: bool },

    // ── Composites ──
    /// Fixed (`len = Some`) or dynamic array of `elem`.
    Array { elem: TypeRef, len: Option<u32> },
    /// `mapping(key => value)`.
    Mapping { key: TypeRef, value: TypeRef },
    /// `optional(T)`.
    Optional(TypeRef),
    /// A named struct; flattened member by member.
    Struct(Rc<StructDef>),
    /// An anonymous tuple.
    Tuple(Vec<TypeRef>),

    // ── User-Defined ──
    /// `type Name is Underlying`; transparent to the codec.
    UserDefined {
        name: std::string::String,
        underlying: TypeRef,
    },
}

/// A struct definition with ordered, named members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructDef {
    pub name: std::string::String,
    pub fields: Vec<Field>,
}

/// A struct member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: std::string::String,
    pub ty: TypeRef,
}

impl StructDef {
    pub fn new(name: impl Into<std::string::String>, fields: Vec<(&str, TypeRef)>) -> Self {
        Self {
            name: name.into(),
            fields: fields
                .into_iter()
                .map(|(name, ty)| Field {
                    name: name.to_string(),
                    ty,
                })
                .collect(),
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Constructors
// ══════════════════════════════════════════════════════════════════════════════

impl Type {
    pub fn uint(bits: u16) -> TypeRef {
        Rc::new(Type::Integer {
            bits,
            signed: false,
        })
    }

    pub fn int(bits: u16) -> TypeRef {
        Rc::new(Type::Integer { bits, signed: true })
    }

    pub fn bool() -> TypeRef {
        Rc::new(Type::Bool)
    }

    pub fn address() -> TypeRef {
        Rc::new(Type::Address)
    }

    pub fn address_std() -> TypeRef {
        Rc::new(Type::AddressStd)
    }

    pub fn cell() -> TypeRef {
        Rc::new(Type::Cell)
    }

    pub fn bytes() -> TypeRef {
        Rc::new(Type::Bytes)
    }

    pub fn string() -> TypeRef {
        Rc::new(Type::String)
    }

    pub fn fixed_bytes(n: u8) -> TypeRef {
        Rc::new(Type::FixedBytes(n))
    }

    pub fn function() -> TypeRef {
        Rc::new(Type::Function)
    }

    pub fn enumeration(name: &str, variants: u32) -> TypeRef {
        Rc::new(Type::Enum {
            name: name.to_string(),
            variants,
        })
    }

    pub fn varuint(bytes: u8) -> TypeRef {
        Rc::new(Type::VarInteger {
            bytes,
            signed: false,
        })
    }

    pub fn varint(bytes: u8) -> TypeRef {
        Rc::new(Type::VarInteger {
            bytes,
            signed: true,
        })
    }

    pub fn array(elem: TypeRef) -> TypeRef {
        Rc::new(Type::Array { elem, len: None })
    }

    pub fn fixed_array(elem: TypeRef, len: u32) -> TypeRef {
        Rc::new(Type::Array {
            elem,
            len: Some(len),
        })
    }

    pub fn mapping(key: TypeRef, value: TypeRef) -> TypeRef {
        Rc::new(Type::Mapping { key, value })
    }

    pub fn optional(inner: TypeRef) -> TypeRef {
        Rc::new(Type::Optional(inner))
    }

    pub fn structure(def: StructDef) -> TypeRef {
        Rc::new(Type::Struct(Rc::new(def)))
    }

    pub fn tuple(components: Vec<TypeRef>) -> TypeRef {
        Rc::new(Type::Tuple(components))
    }

    pub fn user_defined(name: &str, underlying: TypeRef) -> TypeRef {
        Rc::new(Type::UserDefined {
            name: name.to_string(),
            underlying,
        })
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Queries
// ══════════════════════════════════════════════════════════════════════════════

impl Type {
    /// Bit width of integral categories (integers, bool, enums, fixed bytes,
    /// function ids).  `None` for everything else.
    pub fn integral_bits(&self) -> Option<u32> {
        match self {
            Type::Integer { bits, .. } => Some(u32::from(*bits)),
            Type::Bool => Some(1),
            Type::FixedBytes(n) => Some(u32::from(*n) * 8),
            Type::Function => Some(32),
            Type::Enum { variants, .. } => Some(bits_for_enum(*variants)),
            _ => None,
        }
    }

    /// Returns true if the stored form is a signed two's-complement integer.
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Type::Integer { signed: true, .. } | Type::Bool | Type::VarInteger { signed: true, .. }
        )
    }

    /// Strips any number of user-defined wrappers.
    pub fn unwrap_user_defined(&self) -> &Type {
        match self {
            Type::UserDefined { underlying, .. } => underlying.unwrap_user_defined(),
            other => other,
        }
    }

    /// Returns true if a value of this type can itself be null, so an
    /// enclosing optional has to wrap it in a tuple to stay unambiguous.
    pub fn value_may_be_null(&self) -> bool {
        matches!(
            self.unwrap_user_defined(),
            Type::Optional(_) | Type::Mapping { .. }
        )
    }
}

/// Number of bits an enum with `variants` members occupies: whole bytes,
/// at least one.
pub fn bits_for_enum(variants: u32) -> u32 {
    let mut rest = variants.saturating_sub(1);
    let mut bytes = 0;
    loop {
        rest >>= 8;
        bytes += 1;
        if rest == 0 {
            break;
        }
    }
    8 * bytes
}

// ══════════════════════════════════════════════════════════════════════════════
// Display
// ══════════════════════════════════════════════════════════════════════════════

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Integer { bits, signed } => {
                write!(f, "{}{}", if *signed { "int" } else { "uint" }, bits)
            }
            Type::Bool => write!(f, "bool"),
            Type::Address => write!(f, "address"),
            Type::AddressStd => write!(f, "address_std"),
            Type::Cell => write!(f, "TvmCell"),
            Type::Bytes => write!(f, "bytes"),
            Type::String => write!(f, "string"),
            Type::FixedBytes(n) => write!(f, "bytes{}", n),
            Type::Function => write!(f, "function"),
            Type::Enum { name, .. } => write!(f, "enum {}", name),
            Type::VarInteger { bytes, signed } => {
                write!(f, "{}{}", if *signed { "varint" } else { "varuint" }, bytes)
            }
            Type::Array { elem, len: None } => write!(f, "{}[]", elem),
            Type::Array {
                elem,
                len: Some(n),
            } => write!(f, "{}[{}]", elem, n),
            Type::Mapping { key, value } => write!(f, "mapping({} => {})", key, value),
            Type::Optional(inner) => write!(f, "optional({})", inner),
            Type::Struct(def) => write!(f, "struct {}", def.name),
            Type::Tuple(components) => {
                write!(f, "tuple(")?;
                for (i, c) in components.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            Type::UserDefined { name, .. } => write!(f, "{}", name),
        }
    }
}
