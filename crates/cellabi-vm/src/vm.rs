//! Interpreter for the abstract instruction set.

use cellabi_types::Instr;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use tracing::trace;

use crate::cell::{Builder, Slice};
use crate::codec::{load_value, store_value};
use crate::error::{Trap, VmResult};
use crate::value::Value;

/// How control leaves a block.
enum Flow {
    Next,
    /// An `IFJMP`/`IFNOTJMP` transferred control; the enclosing call returns.
    Exit,
}

/// A cell machine with a single operand stack.  The top is the last element.
#[derive(Debug, Default)]
pub struct Vm {
    stack: Vec<Value>,
}

impl Vm {
    pub fn new(stack: Vec<Value>) -> Self {
        Self { stack }
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn into_stack(self) -> Vec<Value> {
        self.stack
    }

    /// Execute `code` to completion.
    pub fn run(&mut self, code: &[Instr]) -> VmResult<()> {
        self.exec_block(code).map(|_| ())
    }

    fn exec_block(&mut self, code: &[Instr]) -> VmResult<Flow> {
        for instr in code {
            if let Flow::Exit = self.step(instr)? {
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Next)
    }

    // ── Stack helpers ──

    fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or(Trap::StackUnderflow)
    }

    fn need(&self, n: usize) -> VmResult<usize> {
        let len = self.stack.len();
        if len < n {
            Err(Trap::StackUnderflow)
        } else {
            Ok(len)
        }
    }

    fn pop_int(&mut self) -> VmResult<BigInt> {
        self.pop()?.into_int()
    }

    fn pop_slice(&mut self) -> VmResult<Slice> {
        self.pop()?.into_slice()
    }

    fn pop_builder(&mut self) -> VmResult<Builder> {
        self.pop()?.into_builder()
    }

    fn pop_usize(&mut self) -> VmResult<usize> {
        self.pop_int()?.to_usize().ok_or(Trap::RangeCheck)
    }

    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    // ── Dispatch ──

    fn step(&mut self, instr: &Instr) -> VmResult<Flow> {
        trace!(depth = self.stack.len(), "{}", instr);
        match instr {
            Instr::Push(i) => {
                let i = usize::from(*i);
                let len = self.need(i + 1)?;
                let v = self.stack[len - 1 - i].clone();
                self.push(v);
            }
            Instr::Pop(i) => {
                let i = usize::from(*i);
                self.need(i + 1)?;
                let x = self.pop()?;
                if i > 0 {
                    let len = self.stack.len();
                    self.stack[len - i] = x;
                }
            }
            Instr::Xchg(i) => {
                let i = usize::from(*i);
                let len = self.need(i + 1)?;
                self.stack.swap(len - 1, len - 1 - i);
            }
            Instr::BlkSwap(i, j) => {
                let (i, j) = (usize::from(*i), usize::from(*j));
                let len = self.need(i + j)?;
                self.stack[len - i - j..].rotate_left(i);
            }
            Instr::Reverse(n, j) => {
                let (n, j) = (usize::from(*n), usize::from(*j));
                let len = self.need(n + j)?;
                self.stack[len - j - n..len - j].reverse();
            }
            Instr::BlkDrop2(n, m) => {
                let (n, m) = (usize::from(*n), usize::from(*m));
                let len = self.need(n + m)?;
                self.stack.drain(len - m - n..len - m);
            }
            Instr::Drop => {
                self.pop()?;
            }
            Instr::PushInt(v) => self.push(Value::int(*v)),
            Instr::PushNull => self.push(Value::Null),
            Instr::Tuple(n) => {
                let len = self.need(usize::from(*n))?;
                let items = self.stack.split_off(len - usize::from(*n));
                self.push(Value::Tuple(items));
            }
            Instr::Untuple(n) => {
                let items = self.pop()?.into_tuple()?;
                if items.len() != usize::from(*n) {
                    return Err(Trap::TypeCheck {
                        expected: "tuple of requested size",
                        found: "tuple",
                    });
                }
                self.stack.extend(items);
            }
            Instr::Geq => {
                let y = self.pop_int()?;
                let x = self.pop_int()?;
                self.push(Value::bool(x >= y));
            }
            Instr::Equal => {
                let y = self.pop_int()?;
                let x = self.pop_int()?;
                self.push(Value::bool(x == y));
            }
            Instr::And => {
                let y = self.pop_int()?;
                let x = self.pop_int()?;
                self.push(Value::Int(x & y));
            }
            Instr::Dec => {
                let x = self.pop_int()?;
                self.push(Value::Int(x - 1));
            }
            Instr::ThrowIf(code) => {
                if self.pop()?.is_true()? {
                    return Err(Trap::Exception(*code));
                }
            }
            Instr::Newc => self.push(Value::Builder(Builder::new())),
            Instr::Endc => {
                let b = self.pop_builder()?;
                self.push(Value::Cell(b.into_cell()));
            }
            Instr::Ctos => {
                let c = self.pop()?.into_cell()?;
                self.push(Value::Slice(Slice::new(c)));
            }
            Instr::Ends => {
                if !self.pop_slice()?.is_empty() {
                    return Err(Trap::CellUnderflow);
                }
            }
            Instr::StbRefR => {
                let top = self.pop_builder()?;
                let mut b = self.pop_builder()?;
                b.store_ref(top.into_cell())?;
                self.push(Value::Builder(b));
            }
            Instr::StSlice => {
                let mut b = self.pop_builder()?;
                let s = self.pop_slice()?;
                b.store_slice(&s)?;
                self.push(Value::Builder(b));
            }
            Instr::StSliceConst(v) => {
                let mut b = self.pop_builder()?;
                b.store_uint(&BigInt::from(*v), 32)?;
                self.push(Value::Builder(b));
            }
            Instr::StBit(bit) => {
                let mut b = self.pop_builder()?;
                b.store_bit(*bit)?;
                self.push(Value::Builder(b));
            }
            Instr::StUR(bits) => {
                let x = self.pop_int()?;
                let mut b = self.pop_builder()?;
                b.store_uint(&x, u32::from(*bits))?;
                self.push(Value::Builder(b));
            }
            Instr::LdRef => {
                let mut s = self.pop_slice()?;
                let c = s.load_ref()?;
                self.push(Value::Cell(c));
                self.push(Value::Slice(s));
            }
            Instr::LdRefRtos => {
                let mut s = self.pop_slice()?;
                let c = s.load_ref()?;
                self.push(Value::Slice(s));
                self.push(Value::Slice(Slice::new(c)));
            }
            Instr::Split => {
                let r = self.pop_usize()?;
                let l = self.pop_usize()?;
                let s = self.pop_slice()?;
                let (head, tail) = s.split(l, r)?;
                self.push(Value::Slice(head));
                self.push(Value::Slice(tail));
            }
            Instr::SSkipFirst => {
                let r = self.pop_usize()?;
                let l = self.pop_usize()?;
                let s = self.pop_slice()?;
                self.push(Value::Slice(s.skip_first(l, r)?));
            }
            Instr::SCutLast => {
                let r = self.pop_usize()?;
                let l = self.pop_usize()?;
                let s = self.pop_slice()?;
                self.push(Value::Slice(s.cut_last(l, r)?));
            }
            Instr::SBitRefs => {
                let s = self.pop_slice()?;
                self.push(Value::int(s.remaining_bits() as u64));
                self.push(Value::int(s.remaining_refs() as u64));
            }
            Instr::PldRefIdx(n) => {
                let s = self.pop_slice()?;
                self.push(Value::Cell(s.preload_ref(usize::from(*n))?));
            }
            Instr::Store(ty) => {
                let mut b = self.pop_builder()?;
                let x = self.pop()?;
                store_value(&mut b, ty, x)?;
                self.push(Value::Builder(b));
            }
            Instr::Load(ty) => {
                let mut s = self.pop_slice()?;
                let x = load_value(&mut s, ty)?;
                self.push(x);
                self.push(Value::Slice(s));
            }
            Instr::LoadQ(ty) => {
                let s = self.pop_slice()?;
                let mut cursor = s.clone();
                match load_value(&mut cursor, ty) {
                    Ok(x) => {
                        self.push(x);
                        self.push(Value::Slice(cursor));
                        self.push(Value::bool(true));
                    }
                    Err(Trap::CellUnderflow | Trap::RangeCheck) => {
                        self.push(Value::Slice(s));
                        self.push(Value::bool(false));
                    }
                    Err(other) => return Err(other),
                }
            }
            Instr::IfElse { then, otherwise } => {
                let body = if self.pop()?.is_true()? { then } else { otherwise };
                self.exec_block(body)?;
            }
            Instr::CallX { body, args, rets } => {
                let (args, rets) = (usize::from(*args), usize::from(*rets));
                let len = self.need(args)?;
                let callee = self.stack.split_off(len - args);
                let caller = std::mem::replace(&mut self.stack, callee);
                let result = self.exec_block(body);
                let mut callee = std::mem::replace(&mut self.stack, caller);
                result?;
                if callee.len() < rets {
                    return Err(Trap::StackUnderflow);
                }
                let returned = callee.split_off(callee.len() - rets);
                self.stack.extend(returned);
            }
            Instr::IfJmp(body) => {
                if self.pop()?.is_true()? {
                    self.exec_block(body)?;
                    return Ok(Flow::Exit);
                }
            }
            Instr::IfNotJmp(body) => {
                if !self.pop()?.is_true()? {
                    self.exec_block(body)?;
                    return Ok(Flow::Exit);
                }
            }
        }
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellabi_types::Type;

    fn ints(vs: &[i64]) -> Vec<Value> {
        vs.iter().map(|v| Value::int(*v)).collect()
    }

    fn run(stack: Vec<Value>, code: Vec<Instr>) -> VmResult<Vec<Value>> {
        let mut vm = Vm::new(stack);
        vm.run(&code)?;
        Ok(vm.into_stack())
    }

    #[test]
    fn shuffles() {
        assert_eq!(run(ints(&[1, 2, 3]), vec![Instr::BlkSwap(1, 2)]).unwrap(), ints(&[2, 3, 1]));
        assert_eq!(run(ints(&[1, 2, 3]), vec![Instr::BlkSwap(2, 1)]).unwrap(), ints(&[3, 1, 2]));
        assert_eq!(run(ints(&[1, 2, 3, 4]), vec![Instr::Reverse(3, 1)]).unwrap(), ints(&[3, 2, 1, 4]));
        assert_eq!(run(ints(&[1, 2, 3]), vec![Instr::Pop(2)]).unwrap(), ints(&[3, 2]));
        assert_eq!(run(ints(&[1, 2, 3]), vec![Instr::Push(2)]).unwrap(), ints(&[1, 2, 3, 1]));
        assert_eq!(run(ints(&[1, 2, 3]), vec![Instr::Xchg(2)]).unwrap(), ints(&[3, 2, 1]));
        assert_eq!(run(ints(&[1, 2, 3, 4]), vec![Instr::BlkDrop2(2, 1)]).unwrap(), ints(&[1, 4]));
        assert_eq!(run(vec![], vec![Instr::Drop]), Err(Trap::StackUnderflow));
    }

    #[test]
    fn store_then_load() {
        let code = vec![
            Instr::Newc,
            Instr::Store(Type::uint(16)),
            Instr::Endc,
            Instr::Ctos,
            Instr::Load(Type::uint(16)),
            Instr::Ends,
        ];
        assert_eq!(run(ints(&[513]), code).unwrap(), ints(&[513]));
    }

    #[test]
    fn chained_builders() {
        let code = vec![
            Instr::Newc,
            Instr::StSliceConst(7),
            Instr::Newc,
            Instr::StBit(true),
            Instr::StbRefR,
            Instr::Endc,
        ];
        let stack = run(vec![], code).unwrap();
        let Value::Cell(cell) = &stack[0] else {
            panic!("expected cell");
        };
        assert_eq!(cell.bits().len(), 32);
        assert_eq!(cell.refs()[0].bits(), &[true]);
        assert_eq!(cell.chain(1).map(|c| c.len()), Some(2));
    }

    #[test]
    fn quiet_load_reports_failure() {
        let code = vec![Instr::Newc, Instr::Endc, Instr::Ctos, Instr::LoadQ(Type::uint(8))];
        let stack = run(vec![], code).unwrap();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack[1], Value::bool(false));
    }

    #[test]
    fn throw_and_jumps() {
        assert_eq!(
            run(ints(&[1]), vec![Instr::ThrowIf(73)]),
            Err(Trap::Exception(73))
        );
        // IFNOTJMP leaves the enclosing call, skipping the PUSHINT after it.
        let body = vec![Instr::PushInt(0), Instr::IfNotJmp(vec![Instr::PushInt(9)]), Instr::PushInt(5)];
        let code = vec![Instr::CallX { body, args: 0, rets: 1 }];
        assert_eq!(run(vec![], code).unwrap(), ints(&[9]));
    }

    #[test]
    fn if_else_picks_branch() {
        let code = vec![Instr::IfElse {
            then: vec![Instr::PushInt(1)],
            otherwise: vec![Instr::PushInt(2)],
        }];
        assert_eq!(run(ints(&[0]), code.clone()).unwrap(), ints(&[2]));
        assert_eq!(run(ints(&[-1]), code).unwrap(), ints(&[1]));
    }
}
