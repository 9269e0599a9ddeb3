//! Shared types for the cellabi codec.
//!
//! This crate defines the semantic type model, the per-type wire size
//! model and flattener, canonical ABI type names, and the abstract
//! instruction set that the code generator emits and the reference
//! machine executes.

pub mod abi;
pub mod instr;
pub mod size;
mod ty;

pub use abi::{encode_params, function_inputs, signature_name, AbiParam};
pub use instr::{listing, Instr, WRONG_VALUE_OF_ENUM};
pub use size::{
    flatten, flatten_all, oversized_payload, unroll, TypeSize, CELL_BIT_LENGTH, CELL_REF_LIMIT,
};
pub use ty::{bits_for_enum, Field, StructDef, Type, TypeRef};
