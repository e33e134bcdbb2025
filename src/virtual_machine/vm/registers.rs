use crate::virtual_machine::errors::VMError;

/// General-purpose register file.
///
/// Holds `n_GPR` cells, all zero at start. In strict mode every write is
/// masked to 8 bits.
pub(super) struct Registers {
    regs: Vec<u32>,
    strict: bool,
}

impl Registers {
    /// Creates a register file with `count` registers.
    pub(super) fn new(count: usize, strict: bool) -> Self {
        Self {
            regs: vec![0; count],
            strict,
        }
    }

    /// Returns the value in register `idx`.
    ///
    /// Returns [`VMError::InvalidRegisterIndex`] if `idx` is out of bounds.
    pub(super) fn get(&self, idx: u32) -> Result<u32, VMError> {
        self.regs
            .get(idx as usize)
            .copied()
            .ok_or(VMError::InvalidRegisterIndex {
                index: idx,
                available: self.regs.len(),
            })
    }

    /// Stores a value into register `idx`.
    ///
    /// Returns [`VMError::InvalidRegisterIndex`] if `idx` is out of bounds.
    pub(super) fn set(&mut self, idx: u32, v: u32) -> Result<(), VMError> {
        let available = self.regs.len();
        let strict = self.strict;
        let slot = self
            .regs
            .get_mut(idx as usize)
            .ok_or(VMError::InvalidRegisterIndex {
                index: idx,
                available,
            })?;
        *slot = if strict { v & 0xFF } else { v };
        Ok(())
    }

    pub(super) fn len(&self) -> usize {
        self.regs.len()
    }
}
