//! Codegen error types.

use thiserror::Error;

/// Errors that can occur while generating store/load code.
///
/// Every variant is a compile-time fault.  Malformed data met by the
/// *generated* code at run time is a machine exception, not one of these.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodegenError {
    /// A semantic type reached a codec path that cannot handle it.
    #[error("unsupported type: {0}")]
    Unsupported(String),

    /// A layout cursor was presented a different leaf than it planned.
    #[error("layout mismatch at leaf {index}: planned `{expected}`, got `{found}`")]
    LayoutMismatch {
        index: usize,
        expected: String,
        found: String,
    },

    /// A layout cursor was advanced past its last planned leaf.
    #[error("layout exhausted: only {planned} leaves were planned")]
    LayoutExhausted { planned: usize },

    /// An operation left the operand stack at an unexpected depth.
    #[error("stack mismatch in {context}: expected depth {expected}, found {found}")]
    StackMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    /// An instruction would pop more values than the stack holds.
    #[error("stack underflow in {context}")]
    StackUnderflow { context: String },

    /// An internal consistency check failed.
    #[error("internal codegen error: {0}")]
    Internal(String),

    /// Message header configuration could not be read.
    #[error("invalid header configuration: {0}")]
    Config(String),
}

/// Codegen result type alias.
pub type CodegenResult<T> = Result<T, CodegenError>;
