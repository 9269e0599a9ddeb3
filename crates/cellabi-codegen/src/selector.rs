//! Function id derivation.
//!
//! An id is the first four bytes (big-endian) of the SHA-256 of the
//! canonical signature `name(inputs)(outputs)v2`.  Bit 31 separates calls
//! from answers; a manually pinned id is used as is.

use std::collections::BTreeMap;

use cellabi_types::{signature_name, Type, TypeRef};
use sha2::{Digest, Sha256};

use crate::error::{CodegenError, CodegenResult};

/// Suffix appended to every signature before hashing.
pub const SIGNATURE_VERSION: &str = "v2";

const ANSWER_BIT: u32 = 0x8000_0000;

/// Why an outbound message is being built; decides bit 31 of the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundReason {
    EmitEventExternal,
    FunctionReturnExternal,
    RemoteCallInternal,
}

/// Everything that determines a function id.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub name: String,
    pub inputs: Vec<TypeRef>,
    /// `None` when the function declares no return list at all.
    pub outputs: Option<Vec<TypeRef>>,
    /// Takes a leading `answerId: uint32`.
    pub responsible: bool,
    /// Manually pinned id.
    pub function_id: Option<u32>,
}

impl FunctionSignature {
    pub fn new(name: impl Into<String>, inputs: Vec<TypeRef>, outputs: Option<Vec<TypeRef>>) -> Self {
        Self {
            name: name.into(),
            inputs,
            outputs,
            responsible: false,
            function_id: None,
        }
    }

    pub fn responsible(mut self) -> Self {
        self.responsible = true;
        self
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.function_id = Some(id);
        self
    }

    /// Inputs as they are hashed and laid out: responsible functions get
    /// the answer id first.
    pub fn effective_inputs(&self) -> Vec<TypeRef> {
        let mut inputs = Vec::with_capacity(self.inputs.len() + 1);
        if self.responsible {
            inputs.push(Type::uint(32));
        }
        inputs.extend(self.inputs.iter().cloned());
        inputs
    }

    /// Id used to dispatch an inbound call, and whether it was pinned.
    pub fn inbound_id(&self) -> CodegenResult<(u32, bool)> {
        if let Some(id) = self.function_id {
            return Ok((id, true));
        }
        let id = calculate_function_id(&self.name, &self.effective_inputs(), self.outputs.as_deref())?;
        Ok((id, false))
    }
}

/// First four bytes of SHA-256(`s`), big-endian.
pub fn to_hash256(s: &str) -> u32 {
    let digest = Sha256::digest(s.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

fn join_names(types: &[TypeRef]) -> CodegenResult<String> {
    let mut names = Vec::with_capacity(types.len());
    for ty in types {
        let name = signature_name(ty);
        if name.is_empty() {
            return Err(CodegenError::Unsupported(format!(
                "`{}` has no signature name",
                ty
            )));
        }
        names.push(name);
    }
    Ok(names.join(","))
}

/// Canonical signature string fed to the hash.
pub fn signature(name: &str, inputs: &[TypeRef], outputs: Option<&[TypeRef]>) -> CodegenResult<String> {
    let mut s = format!("{}({})", name, join_names(inputs)?);
    if let Some(outputs) = outputs {
        s.push('(');
        s.push_str(&join_names(outputs)?);
        s.push(')');
    }
    s.push_str(SIGNATURE_VERSION);
    Ok(s)
}

/// Raw id of a signature, before any direction bit is applied.
pub fn calculate_function_id(
    name: &str,
    inputs: &[TypeRef],
    outputs: Option<&[TypeRef]>,
) -> CodegenResult<u32> {
    Ok(to_hash256(&signature(name, inputs, outputs)?))
}

/// Id of an outbound message built for `reason`.
pub fn function_id_with_reason(sig: &FunctionSignature, reason: OutboundReason) -> CodegenResult<u32> {
    if let Some(id) = sig.function_id {
        return Ok(id);
    }
    let id = calculate_function_id(&sig.name, &sig.effective_inputs(), sig.outputs.as_deref())?;
    Ok(match reason {
        OutboundReason::FunctionReturnExternal => id | ANSWER_BIT,
        OutboundReason::EmitEventExternal | OutboundReason::RemoteCallInternal => id & !ANSWER_BIT,
    })
}

/// Id of the argument-less default constructor.
pub fn constructor_function_id() -> u32 {
    to_hash256(&format!("constructor()(){SIGNATURE_VERSION}")) & !ANSWER_BIT
}

/// `name → "0x%08x"` table of call ids, serialized as JSON.
pub fn function_ids_json(functions: &[FunctionSignature]) -> CodegenResult<String> {
    let mut table = BTreeMap::new();
    for sig in functions {
        let id = function_id_with_reason(sig, OutboundReason::RemoteCallInternal)?;
        table.insert(sig.name.clone(), format!("0x{:08x}", id));
    }
    serde_json::to_string_pretty(&table).map_err(|e| CodegenError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_strings() {
        let no_outputs: &[TypeRef] = &[];
        let s = signature("transfer", &[Type::address(), Type::uint(128)], Some(no_outputs)).unwrap();
        assert_eq!(s, "transfer(address,uint128)()v2");
        let s = signature("ping", &[], None).unwrap();
        assert_eq!(s, "ping()v2");
        assert_eq!(to_hash256("transfer(address,uint128)()v2"), 0x3b7a_c349);
    }

    #[test]
    fn constructor_id() {
        assert_eq!(to_hash256("constructor()()v2"), 0xe8b5_5f3f);
        assert_eq!(constructor_function_id(), 0x68b5_5f3f);
    }

    #[test]
    fn responsible_prepends_answer_id() {
        let plain = FunctionSignature::new("get", vec![Type::uint(32)], Some(vec![]));
        let resp = FunctionSignature::new("get", vec![], Some(vec![])).responsible();
        assert_eq!(plain.inbound_id().unwrap(), resp.inbound_id().unwrap());
    }
}
