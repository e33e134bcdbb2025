//! Opcode handlers.
//!
//! Three-operand ALU instructions compute `parameter = target OP source`.

use super::{Flow, Machine, Status};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::instruction::{Instruction, Slot};
use crate::virtual_machine::isa::OPCODE_COUNT;
use crate::virtual_machine::operand::OperandKind;
use std::io::Write;

type AluFn = fn(u32, u32) -> (u32, bool);

impl<W: Write> Machine<W> {
    /// Reads target and source, writes `f(target, source)` to parameter and
    /// updates the status flags.
    fn alu(&mut self, instr: &Instruction, f: AluFn) -> Result<Flow, VMError> {
        let source = self.read(instr, Slot::Source)?;
        let target = self.read(instr, Slot::Target)?;
        let (result, carry) = f(target, source);
        self.write(instr, Slot::Parameter, result)?;
        self.set_flags(result, carry);
        Ok(Flow::Next)
    }

    fn set_flags(&mut self, result: u32, carry: bool) {
        self.sr.set(Status::ZERO, result == 0);
        self.sr.set(Status::CARRY, carry);
    }

    // Moves

    pub(super) fn op_mov(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        let value = self.read(instr, Slot::Source)?;
        self.write(instr, Slot::Target, value)?;
        Ok(Flow::Next)
    }

    pub(super) fn op_exc(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        let source = self.operand(instr, Slot::Source)?;
        let target = self.operand(instr, Slot::Target)?;
        if source.kind == OperandKind::Number || target.kind == OperandKind::Number {
            return Err(VMError::ImmediateWrite {
                opcode: instr.opcode.mnemonic(),
            });
        }
        let a = self.read(instr, Slot::Source)?;
        let b = self.read(instr, Slot::Target)?;
        self.write(instr, Slot::Source, b)?;
        self.write(instr, Slot::Target, a)?;
        Ok(Flow::Next)
    }

    // Arithmetic

    pub(super) fn op_add(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.alu(instr, u32::overflowing_add)
    }

    pub(super) fn op_sub(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.alu(instr, u32::overflowing_sub)
    }

    pub(super) fn op_mul(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.alu(instr, u32::overflowing_mul)
    }

    pub(super) fn op_mod(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        if self.read(instr, Slot::Source)? == 0 {
            return Err(VMError::DivisionByZero);
        }
        self.alu(instr, |a, b| (a % b, false))
    }

    // Stack

    pub(super) fn op_push(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        let value = self.read(instr, Slot::Source)?;
        self.stack.push(value)?;
        Ok(Flow::Next)
    }

    pub(super) fn op_pop(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        // Validate the destination before consuming the top of the stack.
        let dest = self.operand(instr, Slot::Source)?;
        if dest.kind == OperandKind::Number {
            return Err(VMError::ImmediateWrite {
                opcode: instr.opcode.mnemonic(),
            });
        }
        let value = self.stack.pop();
        self.write(instr, Slot::Source, value)?;
        Ok(Flow::Next)
    }

    // Bitwise

    pub(super) fn op_and(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.alu(instr, |a, b| (a & b, false))
    }

    pub(super) fn op_or(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.alu(instr, |a, b| (a | b, false))
    }

    pub(super) fn op_xor(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.alu(instr, |a, b| (a ^ b, false))
    }

    pub(super) fn op_not(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        let result = !self.read(instr, Slot::Source)?;
        self.write(instr, Slot::Target, result)?;
        self.set_flags(result, false);
        Ok(Flow::Next)
    }

    pub(super) fn op_shl(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.alu(instr, |a, b| (a.wrapping_shl(b), false))
    }

    pub(super) fn op_shr(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.alu(instr, |a, b| (a.wrapping_shr(b), false))
    }

    // Control flow

    pub(super) fn op_call(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        let address = self.read(instr, Slot::Source)?;
        self.stack.push(self.pc + 1)?;
        Ok(Flow::Jump(address))
    }

    pub(super) fn op_ret(&mut self, _instr: &Instruction) -> Result<Flow, VMError> {
        Ok(Flow::Jump(self.stack.pop()))
    }

    pub(super) fn op_halt(&mut self, _instr: &Instruction) -> Result<Flow, VMError> {
        Ok(Flow::Halt)
    }

    pub(super) fn op_jmp(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        Ok(Flow::Jump(self.read(instr, Slot::Source)?))
    }

    /// Jumps to the target literal when `taken(source)` holds.
    fn test_jump(&mut self, instr: &Instruction, taken: fn(u32) -> bool) -> Result<Flow, VMError> {
        let value = self.read(instr, Slot::Source)?;
        let address = self.operand(instr, Slot::Target)?.value;
        Ok(if taken(value) {
            Flow::Jump(address)
        } else {
            Flow::Next
        })
    }

    pub(super) fn op_jnz(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.test_jump(instr, |v| v != 0)
    }

    pub(super) fn op_jz(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.test_jump(instr, |v| v == 0)
    }

    /// Jumps to `parameter` when `taken(source, target)` holds.
    fn compare_jump(
        &mut self,
        instr: &Instruction,
        taken: fn(u32, u32) -> bool,
    ) -> Result<Flow, VMError> {
        let a = self.read(instr, Slot::Source)?;
        let b = self.read(instr, Slot::Target)?;
        let address = self.read(instr, Slot::Parameter)?;
        Ok(if taken(a, b) {
            Flow::Jump(address)
        } else {
            Flow::Next
        })
    }

    pub(super) fn op_je(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.compare_jump(instr, |a, b| a == b)
    }

    pub(super) fn op_jne(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.compare_jump(instr, |a, b| a != b)
    }

    pub(super) fn op_jg(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.compare_jump(instr, |a, b| a > b)
    }

    pub(super) fn op_jb(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.compare_jump(instr, |a, b| a < b)
    }

    pub(super) fn op_jge(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.compare_jump(instr, |a, b| a >= b)
    }

    pub(super) fn op_jbe(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.compare_jump(instr, |a, b| a <= b)
    }

    pub(super) fn op_nop(&mut self, _instr: &Instruction) -> Result<Flow, VMError> {
        Ok(Flow::Next)
    }

    // Machine introspection

    pub(super) fn op_cpuid(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        let value = match self.read(instr, Slot::Source)? {
            0 => OPCODE_COUNT as u32,
            1 => self.registers.len() as u32,
            2 => self.data.size(),
            3 => self.code.capacity(),
            4 => self.stack.capacity() as u32,
            _ => 0,
        };
        self.write(instr, Slot::Target, value)?;
        Ok(Flow::Next)
    }

    pub(super) fn op_mpc(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.write(instr, Slot::Source, self.pc)?;
        Ok(Flow::Next)
    }

    pub(super) fn op_msr(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.write(instr, Slot::Source, self.sr.bits())?;
        Ok(Flow::Next)
    }

    pub(super) fn op_mtc(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        self.write(instr, Slot::Source, self.tc as u32)?;
        Ok(Flow::Next)
    }

    // Print channel

    pub(super) fn op_pnc(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        let value = self.read(instr, Slot::Source)?;
        write!(self.output, "{value}").map_err(|e| VMError::io("print channel", e))?;
        Ok(Flow::Next)
    }

    pub(super) fn op_pac(&mut self, instr: &Instruction) -> Result<Flow, VMError> {
        let value = self.read(instr, Slot::Source)?;
        let ch = char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER);
        write!(self.output, "{ch}").map_err(|e| VMError::io("print channel", e))?;
        Ok(Flow::Next)
    }
}
