//! Store/load code generation for chain data.
//!
//! Values of semantic types are packed into chains of cells holding at
//! most 1023 bits and 4 references each.  A [`LayoutPlan`] decides where
//! the chain splits; the encoder, the decoder and [`PartialRepack`] all
//! follow the same plan, so the code they emit agrees on the wire format.
//!
//! Code is emitted through an explicit [`Emitter`] that tracks the operand
//! stack depth of the target machine.

pub mod config;
pub mod decoder;
pub mod emitter;
pub mod encoder;
pub mod error;
pub mod layout;
pub mod repack;
pub mod selector;

pub use config::{internal_offset, MessageHeaders, FUNCTION_ID_BITS, MAX_OPTIONAL_SIGN_LENGTH};
pub use decoder::{
    decode_data, decode_function_parameters, decode_parameter, decode_parameters,
    decode_parameters_q, decode_public_function_parameters, MessageDirection,
};
pub use cellabi_types::WRONG_VALUE_OF_ENUM;
pub use emitter::Emitter;
pub use encoder::{
    create_default_constructor_msg_body, create_msg_body, create_msg_body_and_append_to_builder,
    encode_parameters, FunctionId,
};
pub use error::{CodegenError, CodegenResult};
pub use layout::{LayoutPlan, Position, SingleSlicePosition};
pub use repack::PartialRepack;
pub use selector::{
    calculate_function_id, constructor_function_id, function_id_with_reason, function_ids_json,
    signature, to_hash256, FunctionSignature, OutboundReason,
};
