//! Integration tests for function id derivation.
//!
//! Tests validate:
//! - Canonical signature strings for composite types
//! - Known hash values
//! - The bit-31 rule for calls and answers
//! - Pinned ids and the JSON id table

use cellabi_codegen::{
    calculate_function_id, function_id_with_reason, function_ids_json, signature, FunctionSignature,
    OutboundReason,
};
use cellabi_types::{StructDef, Type, TypeRef};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn sig(name: &str, inputs: Vec<TypeRef>, outputs: Vec<TypeRef>) -> FunctionSignature {
    FunctionSignature::new(name, inputs, Some(outputs))
}

fn id(s: &FunctionSignature, reason: OutboundReason) -> u32 {
    function_id_with_reason(s, reason).unwrap()
}

// ══════════════════════════════════════════════════════════════════════════════
// Signatures
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn composite_signature_names() {
    let pair = Type::structure(StructDef::new(
        "Pair",
        vec![("a", Type::uint(256)), ("b", Type::bool())],
    ));
    let inputs = vec![
        Type::array(pair),
        Type::mapping(Type::address(), Type::uint(128)),
        Type::optional(Type::cell()),
    ];
    let s = signature("f", &inputs, None).unwrap();
    assert_eq!(s, "f((uint256,bool)[],map(address,uint128),optional(cell))v2");
}

#[test]
fn known_ids() {
    let no_outputs: &[TypeRef] = &[];
    assert_eq!(
        calculate_function_id("transfer", &[Type::address(), Type::uint(128)], Some(no_outputs)).unwrap(),
        0x3b7a_c349
    );
    assert_eq!(calculate_function_id("ping", &[], None).unwrap(), 0x535b_255c);
    assert_eq!(
        calculate_function_id("balance", &[], Some(&[Type::uint(128)])).unwrap(),
        0x866d_b788
    );
}

// ══════════════════════════════════════════════════════════════════════════════
// Direction bit
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn answers_set_bit_31_and_calls_clear_it() {
    let balance = sig("balance", vec![], vec![Type::uint(128)]);
    assert_eq!(id(&balance, OutboundReason::FunctionReturnExternal), 0x866d_b788);
    assert_eq!(id(&balance, OutboundReason::RemoteCallInternal), 0x066d_b788);
    assert_eq!(id(&balance, OutboundReason::EmitEventExternal), 0x066d_b788);
}

#[test]
fn call_and_answer_differ_only_in_bit_31() {
    let names = ["a", "transfer", "onBounce", "get", "set_value", "x1"];
    let palette = [Type::uint(8), Type::address(), Type::cell(), Type::bool(), Type::bytes()];
    for (k, name) in names.iter().enumerate() {
        let inputs: Vec<TypeRef> = palette.iter().take(k).cloned().collect();
        let s = sig(name, inputs, vec![Type::uint(32)]);
        let call = id(&s, OutboundReason::RemoteCallInternal);
        let answer = id(&s, OutboundReason::FunctionReturnExternal);
        assert_eq!(call & 0x7fff_ffff, answer & 0x7fff_ffff, "{name}");
        assert_eq!(call ^ answer, 0x8000_0000, "{name}");
    }
}

#[test]
fn pinned_ids_are_used_as_is() {
    let s = sig("f", vec![], vec![]).with_id(0x8000_0001);
    assert_eq!(id(&s, OutboundReason::RemoteCallInternal), 0x8000_0001);
    assert_eq!(id(&s, OutboundReason::FunctionReturnExternal), 0x8000_0001);
    assert_eq!(s.inbound_id().unwrap(), (0x8000_0001, true));
}

#[test]
fn responsible_functions_hash_the_answer_id() {
    let get = sig("get", vec![], vec![]).responsible();
    assert_eq!(get.inbound_id().unwrap(), (0x1ca1_65d6, false));
}

// ══════════════════════════════════════════════════════════════════════════════
// Id table
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn id_table_is_sorted_json() {
    let functions = vec![
        sig("transfer", vec![Type::address(), Type::uint(128)], vec![]),
        FunctionSignature::new("ping", vec![], None),
        sig("balance", vec![], vec![Type::uint(128)]),
    ];
    let json = function_ids_json(&functions).unwrap();
    let table: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(table["transfer"], "0x3b7ac349");
    assert_eq!(table["ping"], "0x535b255c");
    assert_eq!(table["balance"], "0x066db788");
    assert!(json.find("balance").unwrap() < json.find("ping").unwrap());
}
