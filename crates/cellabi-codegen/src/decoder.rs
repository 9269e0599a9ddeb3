//! Load code generation.
//!
//! Decoding mirrors encoding: the slice stays on top and every decoded
//! value is left beneath it (`s → v s'`).  When the layout says a leaf
//! starts a new cell, the current slice must be exhausted except for its
//! link, which is followed.

use cellabi_types::{Instr, Type, TypeRef, WRONG_VALUE_OF_ENUM};
use tracing::debug;

use crate::config::{internal_offset, MessageHeaders};
use crate::emitter::Emitter;
use crate::error::{CodegenError, CodegenResult};
use crate::layout::{LayoutPlan, Position};

/// Which inbound messages a public function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    ExternalOnly,
    InternalOnly,
    /// Both; a direction flag under the slice picks the layout at run time.
    Both,
}

/// `s → s'`: follow the link of an exhausted slice.
fn load_next_slice(e: &mut Emitter) -> CodegenResult<()> {
    e.emit(Instr::LdRef)?;
    e.emit(Instr::Ends)?;
    e.emit(Instr::Ctos)
}

/// `s → s'`: like [`load_next_slice`], but when `s` is not exactly a bare
/// link leave through `bail_out` instead of faulting.
fn load_next_slice_q(e: &mut Emitter, pending: usize) -> CodegenResult<()> {
    e.push_s(0)?;
    e.emit(Instr::SBitRefs)?;
    // s bits refs
    e.push_int(1)?;
    e.emit(Instr::Equal)?;
    e.exchange(1)?;
    e.push_int(0)?;
    e.emit(Instr::Equal)?;
    e.emit(Instr::And)?;
    e.if_not_jmp(|e| bail_out(e, pending))?;
    load_next_slice(e)
}

/// `v s → v s`: abort with [`WRONG_VALUE_OF_ENUM`] unless `v < variants`.
fn check_enum(e: &mut Emitter, variants: u32) -> CodegenResult<()> {
    e.push_s(1)?;
    e.push_int(i128::from(variants))?;
    e.emit(Instr::Geq)?;
    e.emit(Instr::ThrowIf(WRONG_VALUE_OF_ENUM))
}

fn unsupported(ty: &Type) -> CodegenError {
    CodegenError::Unsupported(format!("cannot decode `{}` as a parameter", ty))
}

// ══════════════════════════════════════════════════════════════════════════════
// Strict decode
// ══════════════════════════════════════════════════════════════════════════════

/// `s → v s'`.
///
/// The first leaf of a value follows a planned split only when
/// `load_for_first_call_if_needed` is set; callers that have already moved
/// to the next cell pass `false`.
pub fn decode_parameter(
    e: &mut Emitter,
    ty: &TypeRef,
    position: &mut dyn Position,
    is_first_call: bool,
    load_for_first_call_if_needed: bool,
) -> CodegenResult<()> {
    match &**ty {
        Type::Struct(def) => {
            let mut first = is_first_call;
            for field in &def.fields {
                decode_parameter(e, &field.ty, position, first, load_for_first_call_if_needed)?;
                first = false;
            }
            let n = def.fields.len();
            // members… slice
            e.block_swap(n, 1)?;
            e.make_tuple(n)?;
            e.exchange(1)
        }
        Type::UserDefined { underlying, .. } => decode_parameter(
            e,
            underlying,
            position,
            is_first_call,
            load_for_first_call_if_needed,
        ),
        Type::Tuple(_) => Err(unsupported(ty)),
        leaf => {
            let split = position.skip_type(ty)?;
            if split && (!is_first_call || load_for_first_call_if_needed) {
                load_next_slice(e)?;
            }
            e.load(ty)?;
            if let Type::Enum { variants, .. } = leaf {
                check_enum(e, *variants)?;
            }
            Ok(())
        }
    }
}

/// `s → v1 … vn s'`.
pub fn decode_parameters(
    e: &mut Emitter,
    types: &[TypeRef],
    position: &mut dyn Position,
) -> CodegenResult<()> {
    if e.depth() == 0 {
        return Err(CodegenError::StackUnderflow {
            context: "decode_parameters".into(),
        });
    }
    for ty in types {
        let saved = e.depth();
        decode_parameter(e, ty, position, true, true)?;
        e.ensure_depth(saved + 1, "decode_parameter")?;
    }
    Ok(())
}

/// `s → v1 … vn`, or `v1 … vn s'` with `keep_slice`: decode a stored field
/// list that starts `offset` bits and `used_refs` references into the
/// current cell.
pub fn decode_data(
    e: &mut Emitter,
    offset: u32,
    used_refs: u32,
    types: &[TypeRef],
    keep_slice: bool,
) -> CodegenResult<()> {
    let mut position = LayoutPlan::new(offset, used_refs, types)?;
    decode_parameters(e, types, &mut position)?;
    if !keep_slice {
        e.emit(Instr::Ends)?;
    }
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// Quiet decode
// ══════════════════════════════════════════════════════════════════════════════

/// `s → r s'` where `r` is the decoded value (a tuple of all values when
/// there are several) or null when any load fails or an enum ordinal is
/// out of range, or when a planned link is missing.  Truncated or
/// malformed data never throws.
pub fn decode_parameters_q(
    e: &mut Emitter,
    types: &[TypeRef],
    position: &mut dyn Position,
) -> CodegenResult<()> {
    e.call_x(1, 2, |e| {
        let mut pending = 0;
        for ty in types {
            decode_parameter_q(e, ty, position, &mut pending)?;
        }
        let n = types.len();
        // s v1 … vn
        e.block_swap(n, 1)?;
        match types {
            [single] => {
                if single.value_may_be_null() {
                    e.make_tuple(1)?;
                }
            }
            _ => e.make_tuple(n)?,
        }
        e.block_swap(1, 1)
    })
}

/// Quiet counterpart of [`decode_parameter`].  `pending` counts the
/// values already decoded beneath the slice inside the current call; a
/// failure drops them and returns `null s`.
fn decode_parameter_q(
    e: &mut Emitter,
    ty: &TypeRef,
    position: &mut dyn Position,
    pending: &mut usize,
) -> CodegenResult<()> {
    match &**ty {
        Type::Struct(def) => {
            for field in &def.fields {
                decode_parameter_q(e, &field.ty, position, pending)?;
            }
            let n = def.fields.len();
            e.block_swap(n, 1)?;
            e.make_tuple(n)?;
            e.exchange(1)?;
            *pending = *pending + 1 - n;
            Ok(())
        }
        Type::UserDefined { underlying, .. } => decode_parameter_q(e, underlying, position, pending),
        Type::Tuple(_) => Err(unsupported(ty)),
        leaf => {
            if position.skip_type(ty)? {
                load_next_slice_q(e, *pending)?;
            }
            let before = e.depth();
            e.load_q(ty)?;
            let dropped = *pending;
            e.if_not_jmp_at(before, |e| bail_out(e, dropped))?;
            *pending += 1;
            if let Type::Enum { variants, .. } = leaf {
                e.push_s(1)?;
                e.push_int(i128::from(*variants))?;
                e.emit(Instr::Geq)?;
                let dropped = *pending;
                e.if_jmp(|e| bail_out(e, dropped))?;
            }
            Ok(())
        }
    }
}

/// `v1 … vk s → null s`.
fn bail_out(e: &mut Emitter, pending: usize) -> CodegenResult<()> {
    e.drop_under(pending, 1)?;
    e.push_null()?;
    e.block_swap(1, 1)
}

// ══════════════════════════════════════════════════════════════════════════════
// Public function arguments
// ══════════════════════════════════════════════════════════════════════════════

/// `s → v1 … vn`: decode the arguments of an inbound call whose body
/// slice is positioned right after the function id (and answer id).
pub fn decode_public_function_parameters(
    e: &mut Emitter,
    headers: &MessageHeaders,
    types: &[TypeRef],
    responsible: bool,
    internal: bool,
) -> CodegenResult<()> {
    let offset = if internal {
        internal_offset(responsible)
    } else {
        headers.external_offset(responsible)
    };
    let mut position = LayoutPlan::new(offset, 0, types)?;
    decode_parameters(e, types, &mut position)?;
    e.emit(Instr::Ends)
}

/// Decode inbound call arguments for the given direction.
///
/// With [`MessageDirection::Both`] the stack is `flag s`, where a non-zero
/// flag marks an external message; both layouts are generated and the
/// machine picks one.  The flag stays below the decoded values.
pub fn decode_function_parameters(
    e: &mut Emitter,
    headers: &MessageHeaders,
    types: &[TypeRef],
    responsible: bool,
    direction: MessageDirection,
) -> CodegenResult<()> {
    debug!(args = types.len(), responsible, ?direction, "decoding function arguments");
    match direction {
        MessageDirection::ExternalOnly => {
            decode_public_function_parameters(e, headers, types, responsible, false)
        }
        MessageDirection::InternalOnly => {
            decode_public_function_parameters(e, headers, types, responsible, true)
        }
        MessageDirection::Both => {
            let entry = e.depth();
            if entry < 2 {
                return Err(CodegenError::StackUnderflow {
                    context: "decode_function_parameters".into(),
                });
            }
            e.push_s(1)?;
            e.if_else(
                |e| decode_public_function_parameters(e, headers, types, responsible, false),
                |e| decode_public_function_parameters(e, headers, types, responsible, true),
            )?;
            e.ensure_depth(entry - 1 + types.len(), "decode_function_parameters")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::SingleSlicePosition;

    #[test]
    fn enum_is_range_checked() {
        let mut e = Emitter::new(1);
        let ty = Type::enumeration("Color", 3);
        decode_parameters(&mut e, &[ty], &mut SingleSlicePosition).unwrap();
        let code = e.finish();
        assert_eq!(code.last(), Some(&Instr::ThrowIf(WRONG_VALUE_OF_ENUM)));
        assert!(code.contains(&Instr::PushInt(3)));
    }

    #[test]
    fn split_follows_link() {
        let types = vec![Type::uint(256); 5];
        let mut e = Emitter::new(1);
        decode_data(&mut e, 0, 0, &types, false).unwrap();
        assert_eq!(e.depth(), 5);
        let code = e.finish();
        assert_eq!(&code[3..6], &[Instr::LdRef, Instr::Ends, Instr::Ctos]);
    }

    #[test]
    fn both_directions_share_shape() {
        let types = vec![Type::uint(32), Type::address()];
        let mut e = Emitter::new(2);
        decode_function_parameters(
            &mut e,
            &MessageHeaders::default(),
            &types,
            false,
            MessageDirection::Both,
        )
        .unwrap();
        assert_eq!(e.depth(), 3);
        assert!(matches!(e.code().last(), Some(Instr::IfElse { .. })));
    }

    #[test]
    fn quiet_split_checks_the_link() {
        let types = vec![Type::uint(256); 4];
        let mut plan = LayoutPlan::new(0, 0, &types).unwrap();
        let mut e = Emitter::new(1);
        decode_parameters_q(&mut e, &types, &mut plan).unwrap();
        assert_eq!(e.depth(), 2);
        let code = e.finish();
        let Some(Instr::CallX { body, .. }) = code.first() else {
            panic!("expected CALLX");
        };
        let link = body.iter().position(|i| *i == Instr::LdRef).unwrap();
        assert!(matches!(body[link - 1], Instr::IfNotJmp(_)));
        assert_eq!(body[link - 2], Instr::And);
    }

    #[test]
    fn quiet_decode_returns_two_values() {
        let types = vec![Type::uint(8), Type::bool()];
        let mut e = Emitter::new(1);
        decode_parameters_q(&mut e, &types, &mut SingleSlicePosition).unwrap();
        assert_eq!(e.depth(), 2);
    }
}
