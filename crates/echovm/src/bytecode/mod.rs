//! Code units, their instruction set and the virtual machine that runs them.
//!
//! # Module Structure
//!
//! - `op` - Opcode, operator and operand-kind definitions
//! - `code` - The code unit, its validation and binary encoding
//! - `builder` - `CodeBuilder` for emitting code units programmatically
//! - `asm` - Textual listing parser
//! - `vm` - Frame execution, calls, attributes and exception unwinding

pub use asm::parse_listing;
pub use builder::{CodeBuilder, Label};
pub(crate) use code::BINARY_MAGIC;
pub use code::{Code, CodeFlags, Const, ISA_VERSION, Instruction, MIN_ISA_VERSION};
pub use op::{BinaryOp, CompareOp, Opcode, OperandKind, UnaryOp};
pub(crate) use vm::CallFrame;

mod asm;
mod builder;
mod code;
mod op;
pub(crate) mod vm;
