//! Abstract stack-machine instructions emitted by the codec.
//!
//! The set covers what store/load generation needs: stack shuffles, cell
//! builder/slice primitives, typed store/load of a leaf, and structured
//! continuations.  Every instruction has a statically known stack effect
//! (see [`Instr::stack_effect`]); continuation bodies are checked by the
//! emitter that builds them.
//!
//! Stack comments list the top of stack last: `x b → b'` means `b` is on
//! top before and `b'` after.

use std::fmt;
use std::fmt::Write as _;

use crate::size::TypeSize;
use crate::ty::{Type, TypeRef};

/// Exception raised by decode code for an out-of-range enum ordinal.
pub const WRONG_VALUE_OF_ENUM: u16 = 73;

/// One instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    // ── Stack ──
    /// `PUSH s(i)`: copy `s(i)` to the top.
    Push(u8),
    /// `POP s(i)`: move the top into `s(i)`.
    Pop(u8),
    /// `XCHG s(i)`: swap the top with `s(i)`.
    Xchg(u8),
    /// `BLKSWAP i, j`: `a(i) b(j) → b(j) a(i)`.
    BlkSwap(u8, u8),
    /// `REVERSE n, j`: reverse `s(j+n-1) … s(j)`.
    Reverse(u8, u8),
    /// `BLKDROP2 n, m`: drop `n` values lying under the top `m`.
    BlkDrop2(u8, u8),
    Drop,
    PushInt(i128),
    PushNull,
    /// `TUPLE n`: `x1 … xn → t`.
    Tuple(u8),
    /// `UNTUPLE n`: `t → x1 … xn`.
    Untuple(u8),
    /// `x y → x >= y`.
    Geq,
    /// `x y → x == y`.
    Equal,
    /// `x y → x & y`.
    And,
    Dec,
    /// Raise exception `code` when the popped flag is non-zero.
    ThrowIf(u16),

    // ── Cells ──
    Newc,
    /// `b → c`.
    Endc,
    /// `c → s`.
    Ctos,
    /// `s → `; faults unless `s` is empty.
    Ends,
    /// `b b' → b''`: finalize the top builder and store it as a reference.
    StbRefR,
    /// `s b → b'`.
    StSlice,
    /// Store a 32-bit constant: `b → b'`.
    StSliceConst(u32),
    /// Store a single constant bit: `b → b'`.
    StBit(bool),
    /// `b x → b'`: store `x` as an unsigned integer of the given width.
    StUR(u16),
    /// `s → c s'`.
    LdRef,
    /// `s → s' s''`: load the first reference as a slice.
    LdRefRtos,
    /// `s l r → s' s''`: split off the first `l` bits and `r` references.
    Split,
    /// `s l r → s'`: drop the first `l` bits and `r` references.
    SSkipFirst,
    /// `s l r → s'`: keep only the last `l` bits and `r` references.
    SCutLast,
    /// `s → l r`.
    SBitRefs,
    /// `s → c`: fetch reference `n` without consuming data.
    PldRefIdx(u8),

    // ── Typed leaves ──
    /// `x b → b'`.
    Store(TypeRef),
    /// `s → x s'`.
    Load(TypeRef),
    /// `s → x s' -1` on success, `s → s 0` on failure.
    LoadQ(TypeRef),

    // ── Continuations ──
    /// Pops a flag; runs `then` when non-zero, `otherwise` when zero.
    IfElse {
        then: Vec<Instr>,
        otherwise: Vec<Instr>,
    },
    /// Calls `body`; `args` values are consumed and `rets` returned.
    CallX {
        body: Vec<Instr>,
        args: u8,
        rets: u8,
    },
    /// Pops a flag; when non-zero jumps to `body`, leaving the enclosing call.
    IfJmp(Vec<Instr>),
    /// Pops a flag; when zero jumps to `body`, leaving the enclosing call.
    IfNotJmp(Vec<Instr>),
}

impl Instr {
    /// Net stack effect as `(pops, pushes)` along the fall-through path.
    pub fn stack_effect(&self) -> (usize, usize) {
        match self {
            Instr::Push(i) => (usize::from(*i) + 1, usize::from(*i) + 2),
            Instr::Pop(i) => (usize::from(*i) + 1, usize::from(*i)),
            Instr::Xchg(i) => (usize::from(*i) + 1, usize::from(*i) + 1),
            Instr::BlkSwap(i, j) | Instr::Reverse(i, j) => {
                let n = usize::from(*i) + usize::from(*j);
                (n, n)
            }
            Instr::BlkDrop2(n, m) => (
                usize::from(*n) + usize::from(*m),
                usize::from(*m),
            ),
            Instr::Drop => (1, 0),
            Instr::PushInt(_) | Instr::PushNull | Instr::Newc => (0, 1),
            Instr::Tuple(n) => (usize::from(*n), 1),
            Instr::Untuple(n) => (1, usize::from(*n)),
            Instr::Geq | Instr::Equal | Instr::And => (2, 1),
            Instr::Dec | Instr::Endc | Instr::Ctos | Instr::StSliceConst(_) | Instr::StBit(_) => {
                (1, 1)
            }
            Instr::PldRefIdx(_) => (1, 1),
            Instr::ThrowIf(_) | Instr::Ends => (1, 0),
            Instr::StbRefR | Instr::StSlice | Instr::StUR(_) | Instr::Store(_) => (2, 1),
            Instr::LdRef | Instr::LdRefRtos | Instr::Load(_) | Instr::SBitRefs => (1, 2),
            Instr::LoadQ(_) => (1, 3),
            Instr::Split => (3, 2),
            Instr::SSkipFirst | Instr::SCutLast => (3, 1),
            Instr::IfElse { .. } | Instr::IfJmp(_) | Instr::IfNotJmp(_) => (1, 0),
            Instr::CallX { args, rets, .. } => (usize::from(*args), usize::from(*rets)),
        }
    }

    /// Mnemonic line for non-block instructions.
    fn mnemonic(&self) -> String {
        match self {
            Instr::Push(i) => format!("PUSH s{}", i),
            Instr::Pop(i) => format!("POP s{}", i),
            Instr::Xchg(i) => format!("XCHG s{}", i),
            Instr::BlkSwap(i, j) => format!("BLKSWAP {}, {}", i, j),
            Instr::Reverse(n, j) => format!("REVERSE {}, {}", n, j),
            Instr::BlkDrop2(n, m) => format!("BLKDROP2 {}, {}", n, m),
            Instr::Drop => "DROP".into(),
            Instr::PushInt(v) => format!("PUSHINT {}", v),
            Instr::PushNull => "NULL".into(),
            Instr::Tuple(n) => format!("TUPLE {}", n),
            Instr::Untuple(n) => format!("UNTUPLE {}", n),
            Instr::Geq => "GEQ".into(),
            Instr::Equal => "EQUAL".into(),
            Instr::And => "AND".into(),
            Instr::Dec => "DEC".into(),
            Instr::ThrowIf(code) => format!("THROWIF {}", code),
            Instr::Newc => "NEWC".into(),
            Instr::Endc => "ENDC".into(),
            Instr::Ctos => "CTOS".into(),
            Instr::Ends => "ENDS".into(),
            Instr::StbRefR => "STBREFR".into(),
            Instr::StSlice => "STSLICE".into(),
            Instr::StSliceConst(v) => format!("STSLICECONST x{:08x}", v),
            Instr::StBit(b) => format!("STSLICECONST {}", u8::from(*b)),
            Instr::StUR(bits) => format!("STUR {}", bits),
            Instr::LdRef => "LDREF".into(),
            Instr::LdRefRtos => "LDREFRTOS".into(),
            Instr::Split => "SPLIT".into(),
            Instr::SSkipFirst => "SSKIPFIRST".into(),
            Instr::SCutLast => "SCUTLAST".into(),
            Instr::SBitRefs => "SBITREFS".into(),
            Instr::PldRefIdx(n) => format!("PLDREFIDX {}", n),
            Instr::Store(ty) => store_mnemonic(ty),
            Instr::Load(ty) => load_mnemonic(ty, false),
            Instr::LoadQ(ty) => load_mnemonic(ty, true),
            Instr::IfElse { .. } => "IFELSE".into(),
            Instr::CallX { .. } => "CALLX".into(),
            Instr::IfJmp(_) => "IFJMP".into(),
            Instr::IfNotJmp(_) => "IFNOTJMP".into(),
        }
    }
}

fn store_mnemonic(ty: &Type) -> String {
    match ty {
        t @ (Type::Integer { .. }
        | Type::Bool
        | Type::FixedBytes(_)
        | Type::Function
        | Type::Enum { .. }) => {
            let bits = t.integral_bits().unwrap_or_default();
            format!("{} {}", if t.is_signed() { "STI" } else { "STU" }, bits)
        }
        Type::Address | Type::AddressStd => "STSLICE".into(),
        Type::Cell | Type::Bytes | Type::String => "STREF".into(),
        Type::Mapping { .. } => "STDICT".into(),
        Type::Array { .. } => "UNPAIR; XCHG s2; STU 32; STDICT".into(),
        Type::VarInteger { bytes, signed } => {
            format!("STVAR{}INT{}", if *signed { "" } else { "U" }, bytes)
        }
        Type::Optional(inner) => {
            if crate::size::optional_is_inline(&TypeSize::of(inner)) {
                format!("STOPTIONAL {{ {} }}", store_mnemonic(inner))
            } else {
                format!("STOPTIONALREF {{ {} }}", store_mnemonic(inner))
            }
        }
        Type::Struct(def) => format!("STTUPLE {}", def.fields.len()),
        Type::Tuple(items) => format!("STTUPLE {}", items.len()),
        Type::UserDefined { underlying, .. } => store_mnemonic(underlying),
    }
}

fn load_mnemonic(ty: &Type, quiet: bool) -> String {
    let q = if quiet { "Q" } else { "" };
    match ty {
        t @ (Type::Integer { .. }
        | Type::Bool
        | Type::FixedBytes(_)
        | Type::Function
        | Type::Enum { .. }) => {
            let bits = t.integral_bits().unwrap_or_default();
            format!("{}{} {}", if t.is_signed() { "LDI" } else { "LDU" }, q, bits)
        }
        Type::Address | Type::AddressStd => format!("LDMSGADDR{}", q),
        Type::Cell | Type::Bytes | Type::String => format!("LDREF{}", q),
        Type::Mapping { .. } => format!("LDDICT{}", q),
        Type::Array { .. } => format!("LDU{} 32; LDDICT{}; ROTREV; PAIR; SWAP", q, q),
        Type::VarInteger { bytes, signed } => {
            format!("LDVAR{}INT{}{}", if *signed { "" } else { "U" }, bytes, q)
        }
        Type::Optional(inner) => format!("LDOPTIONAL{} {{ {} }}", q, load_mnemonic(inner, false)),
        Type::Struct(def) => format!("LDTUPLE{} {}", q, def.fields.len()),
        Type::Tuple(items) => format!("LDTUPLE{} {}", q, items.len()),
        Type::UserDefined { underlying, .. } => load_mnemonic(underlying, quiet),
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Listing
// ══════════════════════════════════════════════════════════════════════════════

/// Render `code` as an indented assembler listing, one instruction per line.
pub fn listing(code: &[Instr]) -> String {
    let mut out = String::new();
    write_block(&mut out, code, 0);
    out
}

fn write_block(out: &mut String, code: &[Instr], indent: usize) {
    let pad = "\t".repeat(indent);
    for instr in code {
        match instr {
            Instr::IfElse { then, otherwise } => {
                write_cont(out, then, indent);
                write_cont(out, otherwise, indent);
            }
            Instr::CallX { body, .. } | Instr::IfJmp(body) | Instr::IfNotJmp(body) => {
                write_cont(out, body, indent);
            }
            _ => {}
        }
        let _ = writeln!(out, "{}{}", pad, instr.mnemonic());
    }
}

fn write_cont(out: &mut String, body: &[Instr], indent: usize) {
    let pad = "\t".repeat(indent);
    let _ = writeln!(out, "{}PUSHCONT {{", pad);
    write_block(out, body, indent + 1);
    let _ = writeln!(out, "{}}}", pad);
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&listing(std::slice::from_ref(self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_mnemonics() {
        assert_eq!(Instr::Store(Type::uint(256)).mnemonic(), "STU 256");
        assert_eq!(Instr::Store(Type::int(8)).mnemonic(), "STI 8");
        assert_eq!(Instr::Store(Type::bool()).mnemonic(), "STI 1");
        assert_eq!(Instr::Load(Type::uint(64)).mnemonic(), "LDU 64");
        assert_eq!(Instr::LoadQ(Type::uint(64)).mnemonic(), "LDUQ 64");
        assert_eq!(Instr::Load(Type::cell()).mnemonic(), "LDREF");
        assert_eq!(Instr::Store(Type::varuint(16)).mnemonic(), "STVARUINT16");
        assert_eq!(Instr::Load(Type::address()).mnemonic(), "LDMSGADDR");
        assert_eq!(Instr::StSliceConst(0x68b5_5f3f).mnemonic(), "STSLICECONST x68b55f3f");
    }

    #[test]
    fn stack_effects() {
        assert_eq!(Instr::Store(Type::uint(8)).stack_effect(), (2, 1));
        assert_eq!(Instr::Load(Type::uint(8)).stack_effect(), (1, 2));
        assert_eq!(Instr::Split.stack_effect(), (3, 2));
        assert_eq!(Instr::BlkDrop2(2, 1).stack_effect(), (3, 1));
        assert_eq!(Instr::Push(1).stack_effect(), (2, 3));
    }

    #[test]
    fn listing_nests_continuations() {
        let code = vec![
            Instr::Push(1),
            Instr::IfElse {
                then: vec![Instr::Ends],
                otherwise: vec![Instr::Drop],
            },
        ];
        let text = listing(&code);
        assert_eq!(
            text,
            "PUSH s1\nPUSHCONT {\n\tENDS\n}\nPUSHCONT {\n\tDROP\n}\nIFELSE\n"
        );
    }
}
