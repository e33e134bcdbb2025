//! Register machine with a fixed 16-byte instruction encoding.
//!
//! Source text is expanded by a [`preprocess::Preprocessor`], turned into a
//! [`program::Program`] by the [`assembler`], optionally persisted as an image,
//! and executed by [`vm::Machine`].
//!
//! # Architecture
//!
//! - **Registers**: `n_GPR` general-purpose 32-bit registers plus `pc`, `sr`
//!   and `tc`
//! - **Instruction format**: one opcode byte and three 5-byte operand slots
//! - **Memory**: separate data memory, instruction memory and a bounded stack,
//!   all sized by the program
//! - **Assembly**: optional partitioned assembly on scoped threads
//!
//! # Modules
//!
//! - [`assembler`]: Assembly parsing, partitioning, linking and diagnostics
//! - [`errors`]: Assembly, encoding and execution error types
//! - [`instruction`]: Decoded instructions and the 16-byte word format
//! - [`isa`]: Instruction set definition and opcode mappings
//! - [`operand`]: Operand kinds and slot encoding
//! - [`preprocess`]: Include expansion and assembly options
//! - [`program`]: Program container and image formats
//! - [`vm`]: Interpreter

pub mod assembler;
pub mod errors;
pub mod instruction;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod operand;
pub mod preprocess;
pub mod program;
pub mod vm;
