//! Store code generation.
//!
//! Stack comments list the top of stack last.  Arguments arrive as
//! `arg[n-1] … arg[0] builder`: the first argument to store sits right
//! under the builder.

use cellabi_types::{Instr, Type, TypeRef};
use tracing::debug;

use crate::config::FUNCTION_ID_BITS;
use crate::emitter::Emitter;
use crate::error::{CodegenError, CodegenResult};
use crate::layout::{LayoutPlan, Position};
use crate::selector::constructor_function_id;

/// The function id written at the head of a message body.
pub enum FunctionId<'a> {
    /// A compile-time constant.
    Const(u32),
    /// Code that pushes the id onto the stack.
    Computed(&'a dyn Fn(&mut Emitter) -> CodegenResult<()>),
}

impl std::fmt::Debug for FunctionId<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionId::Const(id) => write!(f, "Const(0x{:08x})", id),
            FunctionId::Computed(_) => f.write_str("Computed"),
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Parameters
// ══════════════════════════════════════════════════════════════════════════════

/// Store `types` into the builder on top of the stack.
///
/// `arg[n-1] … arg[0] builder → builder`, or with `has_unpacked_tail`
/// `tail arg[n-1] … arg[0] builder → builder`, where `tail` is a raw slice
/// appended after the last argument.  A new builder is opened whenever
/// `position` reports a split; the chain is folded back into the first
/// builder at the end.
pub fn encode_parameters(
    e: &mut Emitter,
    types: &[TypeRef],
    position: &mut LayoutPlan,
    has_unpacked_tail: bool,
) -> CodegenResult<()> {
    let entry = e.depth();
    let mut builder_qty = 1;
    let mut pending: Vec<TypeRef> = types.iter().rev().cloned().collect();

    while let Some(ty) = pending.pop() {
        let arg_qty = pending.len() + 1 + usize::from(has_unpacked_tail);
        match &*ty {
            Type::Struct(def) => {
                let n = def.fields.len();
                // struct builder
                e.exchange(1)?;
                // builder m0 … m[n-1]
                e.untuple(n)?;
                // m[n-1] … m0 builder
                e.reverse(n + 1, 0)?;
                pending.extend(def.fields.iter().rev().map(|f| f.ty.clone()));
            }
            Type::UserDefined { underlying, .. } => pending.push(underlying.clone()),
            Type::Tuple(_) => {
                return Err(CodegenError::Unsupported(format!(
                    "cannot encode bare tuple `{}`",
                    ty
                )))
            }
            _ => {
                if position.skip_type(&ty)? {
                    e.block_swap(arg_qty, 1)?;
                    e.emit(Instr::Newc)?;
                    builder_qty += 1;
                }
                e.store(&ty)?;
            }
        }
    }

    if has_unpacked_tail {
        e.emit(Instr::StSlice)?;
    }
    for _ in 1..builder_qty {
        e.emit(Instr::StbRefR)?;
    }

    let consumed = types.len() + usize::from(has_unpacked_tail);
    e.ensure_depth(entry - consumed, "encode_parameters")
}

// ══════════════════════════════════════════════════════════════════════════════
// Message bodies
// ══════════════════════════════════════════════════════════════════════════════

/// `arg[n-1] … arg[0] builder → builder`: store the function id, the
/// optional callback id, then the arguments.
pub fn create_msg_body(
    e: &mut Emitter,
    types: &[TypeRef],
    function_id: &FunctionId<'_>,
    callback_id: Option<u32>,
    position: &mut LayoutPlan,
) -> CodegenResult<()> {
    match function_id {
        FunctionId::Const(id) => e.emit(Instr::StSliceConst(*id))?,
        FunctionId::Computed(push_id) => {
            push_id(e)?;
            e.emit(Instr::StUR(FUNCTION_ID_BITS as u16))?;
        }
    }
    if let Some(id) = callback_id {
        e.emit(Instr::StSliceConst(id))?;
    }
    encode_parameters(e, types, position, false)
}

/// Append a message body to the message builder on top of the stack.
///
/// Stack on entry is `arg[0] … arg[n-1] builder`, or
/// `arg[n-1] … arg[0] builder` when `reversed_args` is set.  If the whole
/// body fits behind `bit_size_builder` bits already in the builder it is
/// stored inline after a `0` bit; otherwise a `1` bit is stored and the
/// body goes to a new cell attached as a reference.
pub fn create_msg_body_and_append_to_builder(
    e: &mut Emitter,
    types: &[TypeRef],
    function_id: &FunctionId<'_>,
    callback_id: Option<u32>,
    bit_size_builder: u32,
    reversed_args: bool,
) -> CodegenResult<()> {
    let entry = e.depth();
    let n = types.len();
    let callback_bits = if callback_id.is_some() { FUNCTION_ID_BITS } else { 0 };

    let mut position = LayoutPlan::new(bit_size_builder + FUNCTION_ID_BITS + callback_bits, 0, types)?;
    let append = position.count_of_created_builders() == 0;
    debug!(
        args = n,
        append,
        ?function_id,
        "encoding message body"
    );

    e.emit(Instr::StBit(!append))?;
    if n >= 2 && !reversed_args {
        e.reverse(n, 1)?;
    }
    if !append {
        position = LayoutPlan::new(FUNCTION_ID_BITS + callback_bits, 0, types)?;
        // builder arg[n-1] … arg[0]
        e.block_swap(n, 1)?;
        e.emit(Instr::Newc)?;
    }

    create_msg_body(e, types, function_id, callback_id, &mut position)?;

    if !append {
        // builder body
        e.emit(Instr::StbRefR)?;
    }
    e.ensure_depth(entry - n, "create_msg_body_and_append_to_builder")
}

/// Append a constructor call without arguments to the builder on top of
/// the stack: inline when at most `bit_size_builder` bits are used so far
/// and the id still fits, otherwise in a referenced cell.
pub fn create_default_constructor_msg_body(
    e: &mut Emitter,
    bit_size_builder: u32,
) -> CodegenResult<()> {
    let id = constructor_function_id();
    if bit_size_builder < CONSTRUCTOR_INLINE_LIMIT {
        e.emit(Instr::StBit(false))?;
        e.emit(Instr::StSliceConst(id))
    } else {
        e.emit(Instr::StBit(true))?;
        e.emit(Instr::Newc)?;
        e.emit(Instr::StSliceConst(id))?;
        e.emit(Instr::StbRefR)
    }
}

/// Builders filled below this still take the body flag and the id inline.
const CONSTRUCTOR_INLINE_LIMIT: u32 = cellabi_types::CELL_BIT_LENGTH - FUNCTION_ID_BITS - 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_swap_builder_under_remaining_args() {
        let types = vec![Type::uint(256); 5];
        let mut plan = LayoutPlan::new(0, 0, &types).unwrap();
        let mut e = Emitter::new(6);
        encode_parameters(&mut e, &types, &mut plan, false).unwrap();
        assert_eq!(e.depth(), 1);
        let code = e.finish();
        // 3 stores, BLKSWAP 2,1, NEWC, 2 stores, STBREFR
        assert_eq!(code[3], Instr::BlkSwap(2, 1));
        assert_eq!(code[4], Instr::Newc);
        assert_eq!(code.last(), Some(&Instr::StbRefR));
        assert_eq!(code.len(), 8);
    }

    #[test]
    fn bare_tuple_is_unsupported() {
        let types = vec![Type::tuple(vec![Type::uint(8)])];
        let mut plan = LayoutPlan::new(0, 0, &types).unwrap();
        let mut e = Emitter::new(2);
        assert!(matches!(
            encode_parameters(&mut e, &types, &mut plan, false),
            Err(CodegenError::Unsupported(_))
        ));
    }

    #[test]
    fn constructor_body_inline_or_ref() {
        let mut e = Emitter::new(1);
        create_default_constructor_msg_body(&mut e, 989).unwrap();
        assert_eq!(e.code().len(), 2);
        let mut e = Emitter::new(1);
        create_default_constructor_msg_body(&mut e, 990).unwrap();
        assert_eq!(e.code().len(), 4);
        assert_eq!(e.depth(), 1);
    }
}
