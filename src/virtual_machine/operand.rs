//! Operand kinds and the 5-byte operand slot encoding.
//!
//! # Slot Format
//!
//! ```text
//! ┌──────────┬──────────────────────┐
//! │ kind: u8 │ value: u32 (LE)      │
//! └──────────┴──────────────────────┘
//! ```
//!
//! Kind tags: `0` memory, `1` register, `2` number, `3` absent. An absent slot
//! always carries a zero value.

use crate::virtual_machine::errors::VMError;

/// Size in bytes of one encoded operand slot.
pub const SLOT_SIZE: usize = 5;

/// Kind tag written for an unused slot.
pub const ABSENT_TAG: u8 = 3;

/// How a 32-bit operand value is interpreted.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// Data memory address.
    Memory = 0,
    /// Register index.
    Register = 1,
    /// Immediate literal or resolved label index.
    Number = 2,
}

impl TryFrom<u8> for OperandKind {
    type Error = VMError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(OperandKind::Memory),
            1 => Ok(OperandKind::Register),
            2 => Ok(OperandKind::Number),
            _ => Err(VMError::MalformedInstruction {
                reason: format!("unknown operand kind {tag}"),
            }),
        }
    }
}

/// A typed 32-bit operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand {
    pub value: u32,
    pub kind: OperandKind,
}

impl Operand {
    pub const fn memory(address: u32) -> Self {
        Self {
            value: address,
            kind: OperandKind::Memory,
        }
    }

    pub const fn register(index: u32) -> Self {
        Self {
            value: index,
            kind: OperandKind::Register,
        }
    }

    pub const fn number(value: u32) -> Self {
        Self {
            value,
            kind: OperandKind::Number,
        }
    }
}

/// Assembler syntax: `&N` memory, `r_N` register, `N` number.
impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            OperandKind::Memory => write!(f, "&{}", self.value),
            OperandKind::Register => write!(f, "r_{}", self.value),
            OperandKind::Number => write!(f, "{}", self.value),
        }
    }
}

/// Encodes an optional operand into one slot.
pub fn encode_slot(operand: Option<Operand>) -> [u8; SLOT_SIZE] {
    let (tag, value) = match operand {
        Some(op) => (op.kind as u8, op.value),
        None => (ABSENT_TAG, 0),
    };
    let mut slot = [0u8; SLOT_SIZE];
    slot[0] = tag;
    slot[1..].copy_from_slice(&value.to_le_bytes());
    slot
}

/// Decodes one slot. `bytes` must be exactly [`SLOT_SIZE`] long.
pub fn decode_slot(bytes: &[u8]) -> Result<Option<Operand>, VMError> {
    let &[tag, a, b, c, d] = bytes else {
        return Err(VMError::MalformedInstruction {
            reason: format!("operand slot is {} bytes, expected {SLOT_SIZE}", bytes.len()),
        });
    };
    let value = u32::from_le_bytes([a, b, c, d]);
    if tag == ABSENT_TAG {
        if value != 0 {
            return Err(VMError::MalformedInstruction {
                reason: format!("absent operand carries value {value}"),
            });
        }
        return Ok(None);
    }
    Ok(Some(Operand {
        value,
        kind: OperandKind::try_from(tag)?,
    }))
}

/// Parses a decimal or `0x`-prefixed hexadecimal `u32`.
pub fn parse_number(token: &str) -> Option<u32> {
    if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        return u32::from_str_radix(hex, 16).ok();
    }
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}
