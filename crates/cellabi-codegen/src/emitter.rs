//! Instruction sink with operand-stack depth tracking.
//!
//! Every codec operation takes an explicit `&mut Emitter`.  The emitter
//! appends to an instruction log and keeps the statically known depth of
//! the target machine's operand stack, so each operation can assert its
//! own stack effect.  Continuation bodies are built with closures; the
//! emitter checks that both arms of a conditional and every early exit
//! from a call leave the stack in the same shape.

use cellabi_types::{Instr, TypeRef};

use crate::error::{CodegenError, CodegenResult};

/// An open `CALLX` body: where its arguments start and how many values it
/// hands back.
#[derive(Debug, Clone, Copy)]
struct Frame {
    base: usize,
    rets: usize,
}

/// Append-only instruction log plus abstract operand-stack depth.
#[derive(Debug, Default)]
pub struct Emitter {
    code: Vec<Instr>,
    depth: usize,
    frames: Vec<Frame>,
}

impl Emitter {
    /// An emitter whose stack already holds `depth` values.
    pub fn new(depth: usize) -> Self {
        Self {
            code: Vec::new(),
            depth,
            frames: Vec::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn code(&self) -> &[Instr] {
        &self.code
    }

    pub fn finish(self) -> Vec<Instr> {
        self.code
    }

    /// Fail unless the stack holds exactly `expected` values.
    pub fn ensure_depth(&self, expected: usize, context: &str) -> CodegenResult<()> {
        if self.depth != expected {
            return Err(CodegenError::StackMismatch {
                context: context.to_string(),
                expected,
                found: self.depth,
            });
        }
        Ok(())
    }

    fn require(&self, n: usize, context: impl FnOnce() -> String) -> CodegenResult<()> {
        if self.depth < n {
            return Err(CodegenError::StackUnderflow { context: context() });
        }
        Ok(())
    }

    /// Append `instr`, applying its static stack effect.
    pub fn emit(&mut self, instr: Instr) -> CodegenResult<()> {
        let (pops, pushes) = instr.stack_effect();
        self.require(pops, || instr.to_string().trim_end().to_string())?;
        self.depth = self.depth - pops + pushes;
        self.code.push(instr);
        Ok(())
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Stack shuffles
    // ══════════════════════════════════════════════════════════════════════════

    pub fn push_s(&mut self, i: usize) -> CodegenResult<()> {
        self.emit(Instr::Push(small(i)?))
    }

    /// Move the top into `s(i)`; `i = 0` simply drops it.
    pub fn pop_s(&mut self, i: usize) -> CodegenResult<()> {
        if i == 0 {
            self.emit(Instr::Drop)
        } else {
            self.emit(Instr::Pop(small(i)?))
        }
    }

    pub fn exchange(&mut self, i: usize) -> CodegenResult<()> {
        if i == 0 {
            return Ok(());
        }
        self.emit(Instr::Xchg(small(i)?))
    }

    /// `a(i) b(j) → b(j) a(i)`.  Empty blocks emit nothing.
    pub fn block_swap(&mut self, i: usize, j: usize) -> CodegenResult<()> {
        if i == 0 || j == 0 {
            return Ok(());
        }
        self.emit(Instr::BlkSwap(small(i)?, small(j)?))
    }

    /// Reverse `s(j+n-1) … s(j)`.
    pub fn reverse(&mut self, n: usize, j: usize) -> CodegenResult<()> {
        if n < 2 {
            return Ok(());
        }
        self.emit(Instr::Reverse(small(n)?, small(j)?))
    }

    pub fn drop(&mut self, n: usize) -> CodegenResult<()> {
        for _ in 0..n {
            self.emit(Instr::Drop)?;
        }
        Ok(())
    }

    /// Drop `n` values lying under the top `m`.
    pub fn drop_under(&mut self, n: usize, m: usize) -> CodegenResult<()> {
        if n == 0 {
            return Ok(());
        }
        if m == 0 {
            return self.drop(n);
        }
        self.emit(Instr::BlkDrop2(small(n)?, small(m)?))
    }

    pub fn push_int(&mut self, v: i128) -> CodegenResult<()> {
        self.emit(Instr::PushInt(v))
    }

    pub fn push_null(&mut self) -> CodegenResult<()> {
        self.emit(Instr::PushNull)
    }

    pub fn make_tuple(&mut self, n: usize) -> CodegenResult<()> {
        self.emit(Instr::Tuple(small(n)?))
    }

    pub fn untuple(&mut self, n: usize) -> CodegenResult<()> {
        self.emit(Instr::Untuple(small(n)?))
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Typed leaves
    // ══════════════════════════════════════════════════════════════════════════

    /// `x b → b'`.
    pub fn store(&mut self, ty: &TypeRef) -> CodegenResult<()> {
        self.emit(Instr::Store(ty.clone()))
    }

    /// `s → x s'`.
    pub fn load(&mut self, ty: &TypeRef) -> CodegenResult<()> {
        self.emit(Instr::Load(ty.clone()))
    }

    /// `s → x s' -1 | s 0`; the depth reflects the success path.
    pub fn load_q(&mut self, ty: &TypeRef) -> CodegenResult<()> {
        self.emit(Instr::LoadQ(ty.clone()))
    }

    // ══════════════════════════════════════════════════════════════════════════
    // Continuations
    // ══════════════════════════════════════════════════════════════════════════

    /// Run `build` against an empty instruction log and return what it
    /// emitted.  The depth carries over.
    fn block(
        &mut self,
        build: impl FnOnce(&mut Self) -> CodegenResult<()>,
    ) -> CodegenResult<Vec<Instr>> {
        let saved = std::mem::take(&mut self.code);
        let result = build(self);
        let body = std::mem::replace(&mut self.code, saved);
        result.map(|_| body)
    }

    /// Pop a flag and branch.  Both arms must end at the same depth.
    pub fn if_else(
        &mut self,
        then: impl FnOnce(&mut Self) -> CodegenResult<()>,
        otherwise: impl FnOnce(&mut Self) -> CodegenResult<()>,
    ) -> CodegenResult<()> {
        self.require(1, || "IFELSE".into())?;
        self.depth -= 1;
        let entry = self.depth;
        let then = self.block(then)?;
        let then_exit = self.depth;
        self.depth = entry;
        let otherwise = self.block(otherwise)?;
        if self.depth != then_exit {
            return Err(CodegenError::StackMismatch {
                context: "IFELSE branches".into(),
                expected: then_exit,
                found: self.depth,
            });
        }
        self.code.push(Instr::IfElse { then, otherwise });
        Ok(())
    }

    /// Call `body` with the top `args` values; it must leave exactly `rets`.
    pub fn call_x(
        &mut self,
        args: usize,
        rets: usize,
        body: impl FnOnce(&mut Self) -> CodegenResult<()>,
    ) -> CodegenResult<()> {
        self.require(args, || "CALLX".into())?;
        let base = self.depth - args;
        self.frames.push(Frame { base, rets });
        let code = self.block(body);
        self.frames.pop();
        let code = code?;
        self.ensure_depth(base + rets, "CALLX exit")?;
        self.code.push(Instr::CallX {
            body: code,
            args: small(args)?,
            rets: small(rets)?,
        });
        Ok(())
    }

    /// Pop a flag; when it is zero run `body` and leave the enclosing call.
    pub fn if_not_jmp(
        &mut self,
        body: impl FnOnce(&mut Self) -> CodegenResult<()>,
    ) -> CodegenResult<()> {
        let entry = self.flag_popped("IFNOTJMP")?;
        let body = self.jump_body("IFNOTJMP", entry, body)?;
        self.code.push(Instr::IfNotJmp(body));
        Ok(())
    }

    /// Like [`Emitter::if_not_jmp`], for a jump taken with `entry` values on
    /// the stack instead of the fall-through depth.  Used after quiet loads,
    /// whose failure path leaves fewer values than their success path.
    pub fn if_not_jmp_at(
        &mut self,
        entry: usize,
        body: impl FnOnce(&mut Self) -> CodegenResult<()>,
    ) -> CodegenResult<()> {
        self.flag_popped("IFNOTJMP")?;
        let body = self.jump_body("IFNOTJMP", entry, body)?;
        self.code.push(Instr::IfNotJmp(body));
        Ok(())
    }

    /// Pop a flag; when it is non-zero run `body` and leave the enclosing call.
    pub fn if_jmp(&mut self, body: impl FnOnce(&mut Self) -> CodegenResult<()>) -> CodegenResult<()> {
        let entry = self.flag_popped("IFJMP")?;
        let body = self.jump_body("IFJMP", entry, body)?;
        self.code.push(Instr::IfJmp(body));
        Ok(())
    }

    fn flag_popped(&mut self, context: &str) -> CodegenResult<usize> {
        self.require(1, || context.to_string())?;
        self.depth -= 1;
        Ok(self.depth)
    }

    /// Build a jump body starting at `entry`; it must end in the shape the
    /// enclosing call returns.  The fall-through depth is left untouched.
    fn jump_body(
        &mut self,
        context: &str,
        entry: usize,
        body: impl FnOnce(&mut Self) -> CodegenResult<()>,
    ) -> CodegenResult<Vec<Instr>> {
        let frame = *self
            .frames
            .last()
            .ok_or_else(|| CodegenError::Internal(format!("{context} outside of a call")))?;
        let fall_through = self.depth;
        self.depth = entry;
        let code = self.block(body);
        let exit = self.depth;
        self.depth = fall_through;
        let code = code?;
        if exit != frame.base + frame.rets {
            return Err(CodegenError::StackMismatch {
                context: format!("{context} exit"),
                expected: frame.base + frame.rets,
                found: exit,
            });
        }
        Ok(code)
    }
}

/// Instruction operands are 8-bit.
fn small(n: usize) -> CodegenResult<u8> {
    u8::try_from(n).map_err(|_| CodegenError::Internal(format!("stack operand {n} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_depth() {
        let mut e = Emitter::new(2);
        e.push_s(1).unwrap();
        assert_eq!(e.depth(), 3);
        e.block_swap(2, 1).unwrap();
        e.make_tuple(3).unwrap();
        assert_eq!(e.depth(), 1);
        assert_eq!(e.code().len(), 3);
    }

    #[test]
    fn no_op_shuffles_emit_nothing() {
        let mut e = Emitter::new(3);
        e.block_swap(0, 2).unwrap();
        e.reverse(1, 0).unwrap();
        e.exchange(0).unwrap();
        e.drop_under(0, 1).unwrap();
        assert!(e.code().is_empty());
    }

    #[test]
    fn underflow_is_reported() {
        let mut e = Emitter::new(0);
        assert!(matches!(e.emit(Instr::Drop), Err(CodegenError::StackUnderflow { .. })));
    }

    #[test]
    fn unbalanced_branches_are_rejected() {
        let mut e = Emitter::new(1);
        let err = e
            .if_else(|e| e.push_int(1), |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, CodegenError::StackMismatch { .. }));
    }

    #[test]
    fn jump_must_leave_call_shape() {
        let mut e = Emitter::new(1);
        e.call_x(1, 1, |e| {
            e.push_int(0)?;
            e.if_not_jmp(|e| e.push_int(7))?;
            Ok(())
        })
        .unwrap_err();

        let mut e = Emitter::new(1);
        e.call_x(1, 1, |e| {
            e.push_int(0)?;
            e.if_not_jmp(|_| Ok(()))
        })
        .unwrap();
        assert_eq!(e.depth(), 1);
    }

    #[test]
    fn jump_outside_call_is_internal() {
        let mut e = Emitter::new(1);
        assert!(matches!(e.if_jmp(|_| Ok(())), Err(CodegenError::Internal(_))));
    }
}
