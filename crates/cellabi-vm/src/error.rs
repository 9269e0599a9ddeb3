//! Machine-level exceptions raised by executing generated code.

use thiserror::Error;

/// A runtime fault of the cell machine.
///
/// These model exceptions raised by the target machine while running
/// generated code.  They are never compiler errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Trap {
    /// An instruction needed more stack entries than were present.
    #[error("stack underflow")]
    StackUnderflow,

    /// An integer did not fit the width it was stored with.
    #[error("integer out of expected range")]
    RangeCheck,

    /// A stack entry had the wrong kind.
    #[error("type check error: expected {expected}, found {found}")]
    TypeCheck {
        expected: &'static str,
        found: &'static str,
    },

    /// A builder exceeded 1023 bits or 4 references.
    #[error("cell overflow")]
    CellOverflow,

    /// A slice ran out of data, or `ENDS` met a non-empty slice.
    #[error("cell underflow")]
    CellUnderflow,

    /// Raised by `THROWIF`.
    #[error("exception {0}")]
    Exception(u16),
}

impl Trap {
    /// Numeric exit code as reported by the machine.
    pub fn exit_code(&self) -> u16 {
        match self {
            Self::StackUnderflow => 2,
            Self::RangeCheck => 5,
            Self::TypeCheck { .. } => 7,
            Self::CellOverflow => 8,
            Self::CellUnderflow => 9,
            Self::Exception(code) => *code,
        }
    }
}

/// VM result type alias.
pub type VmResult<T> = Result<T, Trap>;
