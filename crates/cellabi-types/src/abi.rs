//! Canonical ABI type names and parameter breakdowns.
//!
//! Two renderings exist:
//! - [`signature_name`] is the string hashed into function selectors;
//!   composites render inline, e.g. `(uint256,bool)[]`.
//! - [`AbiParam`] is the `{name, type, components}` record consumed by
//!   interface-description emitters; structs render as `tuple` with a
//!   parallel components list.

use serde::{Deserialize, Serialize};

use crate::ty::{Type, TypeRef};

/// One entry of an ABI parameter list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiParam {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub components: Option<Vec<AbiParam>>,
}

impl AbiParam {
    /// Describe a parameter `name` of type `ty`.
    pub fn new(name: impl Into<String>, ty: &Type) -> Self {
        let name = name.into();
        let (ty, components) = abi_type_name(ty);
        Self {
            name,
            ty,
            components,
        }
    }
}

/// ABI type name of `ty` plus the components list when one is needed.
fn abi_type_name(ty: &Type) -> (String, Option<Vec<AbiParam>>) {
    match ty {
        Type::Integer { bits, signed } => {
            (format!("{}{}", if *signed { "int" } else { "uint" }, bits), None)
        }
        Type::Bool => ("bool".into(), None),
        Type::Address => ("address".into(), None),
        Type::AddressStd => ("address_std".into(), None),
        Type::Cell => ("cell".into(), None),
        Type::Bytes => ("bytes".into(), None),
        Type::String => ("string".into(), None),
        Type::FixedBytes(n) => (format!("fixedbytes{}", n), None),
        Type::Function => ("uint32".into(), None),
        Type::Enum { .. } => (format!("uint{}", ty.integral_bits().unwrap_or(8)), None),
        Type::VarInteger { bytes, signed } => (
            format!("{}{}", if *signed { "varint" } else { "varuint" }, bytes),
            None,
        ),
        Type::Array { elem, .. } => {
            let (inner, components) = abi_type_name(elem);
            (format!("{}[]", inner), components)
        }
        Type::Mapping { key, value } => {
            let (key, _) = abi_type_name(key);
            let (value, components) = abi_type_name(value);
            (format!("map({},{})", key, value), components)
        }
        Type::Optional(inner) => {
            if let Type::Tuple(items) = &**inner {
                ("optional(tuple)".into(), Some(tuple_components(items)))
            } else {
                let (inner, components) = abi_type_name(inner);
                (format!("optional({})", inner), components)
            }
        }
        Type::Struct(def) => (
            "tuple".into(),
            Some(
                def.fields
                    .iter()
                    .map(|f| AbiParam::new(f.name.clone(), &f.ty))
                    .collect(),
            ),
        ),
        Type::Tuple(items) => ("tuple".into(), Some(tuple_components(items))),
        Type::UserDefined { underlying, .. } => abi_type_name(underlying),
    }
}

fn tuple_components(items: &[TypeRef]) -> Vec<AbiParam> {
    items
        .iter()
        .enumerate()
        .map(|(i, c)| AbiParam::new(format!("value{}", i), c))
        .collect()
}

/// Describe a parameter list; unnamed parameters become `value<i>`.
pub fn encode_params(params: &[(String, TypeRef)]) -> Vec<AbiParam> {
    params
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| {
            let name = if name.is_empty() {
                format!("value{}", i)
            } else {
                name.clone()
            };
            AbiParam::new(name, ty)
        })
        .collect()
}

/// Describe the inputs of a function.  Responsible functions take a
/// leading `answerId: uint32`.
pub fn function_inputs(params: &[(String, TypeRef)], responsible: bool) -> Vec<AbiParam> {
    let mut inputs = encode_params(params);
    if responsible {
        inputs.insert(0, AbiParam::new("answerId", &Type::Integer { bits: 32, signed: false }));
    }
    inputs
}

/// Canonical rendering of `ty` inside a selector signature.
pub fn signature_name(ty: &Type) -> String {
    match ty {
        Type::Optional(inner) => format!("optional({})", signature_name(inner)),
        Type::Tuple(items) => {
            let items: Vec<String> = items.iter().map(|c| signature_name(c)).collect();
            format!("({})", items.join(","))
        }
        Type::Struct(def) => {
            let items: Vec<String> = def.fields.iter().map(|f| signature_name(&f.ty)).collect();
            format!("({})", items.join(","))
        }
        Type::Array { elem, .. } => format!("{}[]", signature_name(elem)),
        Type::Mapping { key, value } => {
            format!("map({},{})", signature_name(key), signature_name(value))
        }
        Type::UserDefined { underlying, .. } => signature_name(underlying),
        other => abi_type_name(other).0,
    }
}
