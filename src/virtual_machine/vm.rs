//! Core virtual machine implementation.
//!
//! The machine executes a [`Program`] one 16-byte instruction at a time. All
//! arithmetic uses wrapping `u32` semantics. Each opcode is looked up in a
//! dispatch table built once per machine; opcodes without an entry fault with
//! [`VMError::UnsupportedInstruction`].

mod memory;
mod ops;
mod registers;
mod stack;
#[cfg(test)]
mod tests;

use crate::debug;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::instruction::{Instruction, Slot};
use crate::virtual_machine::isa::{OPCODE_COUNT, Opcode};
use crate::virtual_machine::operand::{Operand, OperandKind};
use crate::virtual_machine::program::Program;
use bitflags::bitflags;
use memory::{DataMemory, InstructionMemory};
use registers::Registers;
use stack::Stack;
use std::io::Write;

bitflags! {
    /// Status register flags set by ALU instructions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Status: u32 {
        /// Last result was zero.
        const ZERO = 0b01;
        /// Last ADD, SUB or MUL wrapped.
        const CARRY = 0b10;
    }
}

/// Runtime options that do not come from the program.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MachineConfig {
    /// Mask register writes to 8 bits.
    pub strict_registers: bool,
    /// Mask data memory writes to 8 bits.
    pub strict_memory: bool,
}

impl MachineConfig {
    pub fn strict() -> Self {
        Self {
            strict_registers: true,
            strict_memory: true,
        }
    }
}

/// What the machine does after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Continue at `pc + 1`.
    Next,
    /// Continue at the given address.
    Jump(u32),
    /// Stop.
    Halt,
}

/// Largest register file a machine allocates.
pub const MAX_REGISTERS: u32 = 1 << 16;

type Handler<W> = fn(&mut Machine<W>, &Instruction) -> Result<Flow, VMError>;

/// Builds the opcode-indexed handler table.
macro_rules! dispatch_table {
    ( $( $variant:ident => $handler:ident ),* $(,)? ) => {{
        let mut table: [Option<Handler<W>>; OPCODE_COUNT] = [None; OPCODE_COUNT];
        $( table[Opcode::$variant as usize] = Some(Machine::<W>::$handler as Handler<W>); )*
        table
    }};
}

/// Register machine executing one program.
///
/// Constructed per run from a [`Program`] and an output sink for the print
/// instructions. A machine that faulted or halted stays stopped.
pub struct Machine<W> {
    registers: Registers,
    data: DataMemory,
    code: InstructionMemory,
    stack: Stack,
    /// Program counter.
    pc: u32,
    /// Status register.
    sr: Status,
    /// Executed instruction count.
    tc: u64,
    halted: bool,
    handlers: [Option<Handler<W>>; OPCODE_COUNT],
    output: W,
}

impl<W: Write> Machine<W> {
    /// Creates a machine with the default configuration.
    pub fn new(program: &Program, output: W) -> Result<Self, VMError> {
        Self::with_config(program, output, MachineConfig::default())
    }

    /// Allocates state from the program's layout and loads its instructions.
    ///
    /// Every instruction is decoded once here, so a malformed word fails
    /// construction instead of faulting mid-run.
    pub fn with_config(
        program: &Program,
        output: W,
        config: MachineConfig,
    ) -> Result<Self, VMError> {
        if program.len() > program.inst_mem as usize {
            return Err(VMError::ProgramTooLarge {
                instructions: program.len(),
                capacity: program.inst_mem,
            });
        }
        if program.n_gpr > MAX_REGISTERS {
            return Err(VMError::TooManyRegisters {
                count: program.n_gpr,
                max: MAX_REGISTERS,
            });
        }
        let words = program
            .instructions
            .iter()
            .map(|word| Instruction::decode(word).map(|_| u128::from_le_bytes(*word)))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "loaded {} instructions (n_GPR={}, data_mem={}, stack_size={})",
            words.len(),
            program.n_gpr,
            program.data_mem,
            program.stack_size
        );

        Ok(Self {
            registers: Registers::new(program.n_gpr as usize, config.strict_registers),
            data: DataMemory::new(program.data_mem, config.strict_memory),
            code: InstructionMemory::new(words, program.inst_mem),
            stack: Stack::new(program.stack_size as usize),
            pc: 0,
            sr: Status::empty(),
            tc: 0,
            halted: false,
            handlers: Self::handlers(),
            output,
        })
    }

    fn handlers() -> [Option<Handler<W>>; OPCODE_COUNT] {
        dispatch_table! {
            Mov => op_mov,
            Exc => op_exc,
            Add => op_add,
            Sub => op_sub,
            Mul => op_mul,
            Mod => op_mod,
            Push => op_push,
            Pop => op_pop,
            And => op_and,
            Or => op_or,
            Xor => op_xor,
            Not => op_not,
            Shl => op_shl,
            Shr => op_shr,
            Call => op_call,
            Ret => op_ret,
            Halt => op_halt,
            Jmp => op_jmp,
            Jnz => op_jnz,
            Jz => op_jz,
            Je => op_je,
            Jg => op_jg,
            Jb => op_jb,
            Jne => op_jne,
            Nop => op_nop,
            Cpuid => op_cpuid,
            Mpc => op_mpc,
            Msr => op_msr,
            Mtc => op_mtc,
            Pnc => op_pnc,
            Pac => op_pac,
            Jge => op_jge,
            Jbe => op_jbe,
        }
    }

    /// Runs until `HALT`, then flushes the output.
    ///
    /// A fault is returned as [`VMError::RuntimeFault`] carrying the program
    /// counter of the faulting instruction.
    pub fn run(&mut self) -> Result<(), VMError> {
        while self.step()? {}
        self.output
            .flush()
            .map_err(|e| VMError::io("print channel", e))?;
        debug!("halted at pc {} after {} instructions", self.pc, self.tc);
        Ok(())
    }

    /// Executes one instruction. Returns `false` once the machine has stopped.
    pub fn step(&mut self) -> Result<bool, VMError> {
        if self.halted {
            return Ok(false);
        }
        let pc = self.pc;
        if let Err(err) = self.execute() {
            self.halted = true;
            return Err(VMError::RuntimeFault {
                pc,
                source: Box::new(err),
            });
        }
        Ok(!self.halted)
    }

    fn execute(&mut self) -> Result<(), VMError> {
        let instr = Instruction::from_packed(self.code.fetch(self.pc)?)?;
        let handler =
            self.handlers[instr.opcode as usize].ok_or(VMError::UnsupportedInstruction {
                opcode: instr.opcode.mnemonic(),
            })?;
        let flow = handler(self, &instr)?;
        self.tc += 1;
        match flow {
            Flow::Next => self.pc += 1,
            Flow::Jump(address) => self.pc = address,
            Flow::Halt => self.halted = true,
        }
        Ok(())
    }

    /// Returns the operand in `slot`, or [`VMError::MissingOperand`].
    fn operand(&self, instr: &Instruction, slot: Slot) -> Result<Operand, VMError> {
        instr.operand(slot).ok_or(VMError::MissingOperand {
            opcode: instr.opcode.mnemonic(),
            slot: slot.name(),
        })
    }

    /// Resolves the value of the operand in `slot`.
    fn read(&self, instr: &Instruction, slot: Slot) -> Result<u32, VMError> {
        let op = self.operand(instr, slot)?;
        match op.kind {
            OperandKind::Number => Ok(op.value),
            OperandKind::Register => self.registers.get(op.value),
            OperandKind::Memory => self.data.read(op.value),
        }
    }

    /// Stores `value` into the register or memory cell named by `slot`.
    fn write(&mut self, instr: &Instruction, slot: Slot, value: u32) -> Result<(), VMError> {
        let op = self.operand(instr, slot)?;
        match op.kind {
            OperandKind::Number => Err(VMError::ImmediateWrite {
                opcode: instr.opcode.mnemonic(),
            }),
            OperandKind::Register => self.registers.set(op.value, value),
            OperandKind::Memory => self.data.write(op.value, value),
        }
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn status(&self) -> Status {
        self.sr
    }

    /// Number of instructions executed so far.
    pub fn tc(&self) -> u64 {
        self.tc
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn register(&self, index: u32) -> Result<u32, VMError> {
        self.registers.get(index)
    }

    pub fn memory(&self, address: u32) -> Result<u32, VMError> {
        self.data.read(address)
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    pub fn into_output(self) -> W {
        self.output
    }
}
