//! Reference cell machine for cellabi.
//!
//! Executes the abstract instruction set over bit-exact cells so that
//! generated store/load code can be checked end to end: values go in on
//! the operand stack, cells come out, and decoding them yields the values
//! back.

pub mod cell;
pub mod codec;
pub mod error;
pub mod value;
pub mod vm;

pub use cell::{Builder, Cell, Slice};
pub use error::{Trap, VmResult};
pub use value::Value;
pub use vm::Vm;

pub use cellabi_types::WRONG_VALUE_OF_ENUM;
