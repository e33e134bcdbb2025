//! Decoded instructions and their fixed 16-byte encoding.
//!
//! # Layout
//!
//! ```text
//! byte  0      opcode
//! bytes 1..6   source slot
//! bytes 6..11  target slot
//! bytes 11..16 parameter slot
//! ```
//!
//! Every slot is present in the encoding, using the absent tag when unused, so
//! decoding never needs to know which slots an opcode reads.

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::Opcode;
use crate::virtual_machine::operand::{Operand, SLOT_SIZE, decode_slot, encode_slot};

/// Size in bytes of one encoded instruction.
pub const INSTRUCTION_SIZE: usize = 1 + 3 * SLOT_SIZE;

/// Encoded instruction word.
pub type Word = [u8; INSTRUCTION_SIZE];

/// One of the three operand positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Source = 0,
    Target = 1,
    Parameter = 2,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::Source, Slot::Target, Slot::Parameter];

    pub const fn name(&self) -> &'static str {
        match self {
            Slot::Source => "source",
            Slot::Target => "target",
            Slot::Parameter => "parameter",
        }
    }

    /// Byte offset of the slot's value field within an encoded word.
    pub const fn value_offset(&self) -> usize {
        1 + (*self as usize) * SLOT_SIZE + 1
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub source: Option<Operand>,
    pub target: Option<Operand>,
    pub parameter: Option<Operand>,
}

impl Instruction {
    /// Builds an instruction from up to three operands in slot order.
    pub fn new(opcode: Opcode, operands: &[Operand]) -> Result<Self, VMError> {
        if operands.len() > 3 {
            return Err(VMError::TooManyOperands {
                count: operands.len(),
            });
        }
        Ok(Self {
            opcode,
            source: operands.first().copied(),
            target: operands.get(1).copied(),
            parameter: operands.get(2).copied(),
        })
    }

    /// An instruction without operands.
    pub const fn bare(opcode: Opcode) -> Self {
        Self {
            opcode,
            source: None,
            target: None,
            parameter: None,
        }
    }

    pub fn operand(&self, slot: Slot) -> Option<Operand> {
        match slot {
            Slot::Source => self.source,
            Slot::Target => self.target,
            Slot::Parameter => self.parameter,
        }
    }

    /// Operands in slot order, stopping at the first absent slot.
    pub fn operands(&self) -> impl Iterator<Item = Operand> + '_ {
        Slot::ALL.into_iter().map_while(|slot| self.operand(slot))
    }

    pub fn encode(&self) -> Word {
        let mut word = [0u8; INSTRUCTION_SIZE];
        word[0] = self.opcode as u8;
        for slot in Slot::ALL {
            let start = 1 + slot as usize * SLOT_SIZE;
            word[start..start + SLOT_SIZE].copy_from_slice(&encode_slot(self.operand(slot)));
        }
        word
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, VMError> {
        if bytes.len() != INSTRUCTION_SIZE {
            return Err(VMError::MalformedInstruction {
                reason: format!(
                    "instruction is {} bytes, expected {INSTRUCTION_SIZE}",
                    bytes.len()
                ),
            });
        }
        let slot = |s: Slot| {
            let start = 1 + s as usize * SLOT_SIZE;
            decode_slot(&bytes[start..start + SLOT_SIZE])
        };
        Ok(Self {
            opcode: Opcode::try_from(bytes[0])?,
            source: slot(Slot::Source)?,
            target: slot(Slot::Target)?,
            parameter: slot(Slot::Parameter)?,
        })
    }

    /// Packs the encoded word into one little-endian `u128`.
    pub fn to_packed(&self) -> u128 {
        u128::from_le_bytes(self.encode())
    }

    pub fn from_packed(word: u128) -> Result<Self, VMError> {
        Self::decode(&word.to_le_bytes())
    }
}

/// Disassembles to a line the assembler accepts, e.g. `ADD r_0 r_1 r_0`.
impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.opcode.mnemonic())?;
        // A later slot cannot be written without the ones before it.
        for op in self.operands() {
            write!(f, " {op}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_operands() -> [Operand; 3] {
        [
            Operand::register(1),
            Operand::memory(0xDEAD),
            Operand::number(u32::MAX),
        ]
    }

    #[test]
    fn roundtrip_every_opcode_and_arity() {
        let ops = sample_operands();
        for &opcode in Opcode::ALL {
            for n in 0..=3 {
                let instr = Instruction::new(opcode, &ops[..n]).unwrap();
                let word = instr.encode();
                assert_eq!(word.len(), INSTRUCTION_SIZE);
                assert_eq!(Instruction::decode(&word).unwrap(), instr);
                assert_eq!(Instruction::from_packed(instr.to_packed()).unwrap(), instr);
            }
        }
    }

    #[test]
    fn encode_layout() {
        let instr = Instruction::new(
            Opcode::Add,
            &[Operand::register(0), Operand::register(1)],
        )
        .unwrap();
        assert_eq!(
            instr.encode(),
            [2, 1, 0, 0, 0, 0, 1, 1, 0, 0, 0, 3, 0, 0, 0, 0]
        );
    }

    #[test]
    fn packed_is_little_endian_word() {
        let instr = Instruction::bare(Opcode::Halt);
        assert_eq!(instr.to_packed() & 0xFF, Opcode::Halt as u128);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        for len in [0, 15, 17] {
            assert!(matches!(
                Instruction::decode(&vec![0u8; len]),
                Err(VMError::MalformedInstruction { .. })
            ));
        }
    }

    #[test]
    fn decode_rejects_unknown_opcode() {
        let mut word = Instruction::bare(Opcode::Nop).encode();
        word[0] = 0xEE;
        assert!(Instruction::decode(&word).is_err());
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let mut word = Instruction::bare(Opcode::Nop).encode();
        word[6] = 9;
        assert!(Instruction::decode(&word).is_err());
    }

    #[test]
    fn new_rejects_four_operands() {
        let op = Operand::number(1);
        assert!(matches!(
            Instruction::new(Opcode::Mov, &[op; 4]),
            Err(VMError::TooManyOperands { count: 4 })
        ));
    }

    #[test]
    fn value_offsets_point_at_operand_values() {
        let instr = Instruction::new(Opcode::Je, &sample_operands()).unwrap();
        let word = instr.encode();
        let at = |slot: Slot| {
            let o = slot.value_offset();
            u32::from_le_bytes(word[o..o + 4].try_into().unwrap())
        };
        assert_eq!(at(Slot::Source), 1);
        assert_eq!(at(Slot::Target), 0xDEAD);
        assert_eq!(at(Slot::Parameter), u32::MAX);
    }

    #[test]
    fn display_disassembles() {
        let instr = Instruction::new(
            Opcode::Jnz,
            &[Operand::memory(4), Operand::number(12)],
        )
        .unwrap();
        assert_eq!(instr.to_string(), "JNZ &4 12");
        assert_eq!(Instruction::bare(Opcode::Ret).to_string(), "RET");
    }
}
