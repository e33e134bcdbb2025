use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::instruction::Instruction;
use crate::virtual_machine::isa::Opcode;
use std::collections::HashMap;

/// Word-addressed data memory.
///
/// Only written cells are stored, so the declared size costs nothing until
/// used. Unwritten cells inside the declared size read as zero.
pub(super) struct DataMemory {
    cells: HashMap<u32, u32>,
    size: u32,
    strict: bool,
}

impl DataMemory {
    pub(super) fn new(size: u32, strict: bool) -> Self {
        Self {
            cells: HashMap::new(),
            size,
            strict,
        }
    }

    fn check(&self, address: u32) -> Result<u32, VMError> {
        if address >= self.size {
            return Err(VMError::MemoryOutOfBounds {
                address,
                size: self.size,
            });
        }
        Ok(address)
    }

    pub(super) fn read(&self, address: u32) -> Result<u32, VMError> {
        let address = self.check(address)?;
        Ok(self.cells.get(&address).copied().unwrap_or(0))
    }

    pub(super) fn write(&mut self, address: u32, value: u32) -> Result<(), VMError> {
        let address = self.check(address)?;
        self.cells
            .insert(address, if self.strict { value & 0xFF } else { value });
        Ok(())
    }

    pub(super) fn size(&self) -> u32 {
        self.size
    }
}

/// Instruction memory of packed words.
///
/// Only the loaded program is stored; slots between its end and the declared
/// capacity read as `HALT`.
pub(super) struct InstructionMemory {
    words: Vec<u128>,
    capacity: u32,
}

const HALT_WORD: Instruction = Instruction::bare(Opcode::Halt);

impl InstructionMemory {
    pub(super) fn new(words: Vec<u128>, capacity: u32) -> Self {
        Self { words, capacity }
    }

    pub(super) fn fetch(&self, pc: u32) -> Result<u128, VMError> {
        if pc >= self.capacity {
            return Err(VMError::InstructionOutOfBounds {
                pc: pc as u64,
                capacity: self.capacity,
            });
        }
        Ok(self
            .words
            .get(pc as usize)
            .copied()
            .unwrap_or_else(|| HALT_WORD.to_packed()))
    }

    pub(super) fn capacity(&self) -> u32 {
        self.capacity
    }
}
