//! ASIM library.
//!
//! Provides the 16-byte instruction encoding, the program container and its
//! image formats, the assembler and the reference virtual machine.

pub mod types;
pub mod utils;
pub mod virtual_machine;
