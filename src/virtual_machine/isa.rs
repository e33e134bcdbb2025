//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_opcode!`](crate::for_each_opcode) macro holds the canonical
//! opcode list and invokes a callback macro for code generation, so the opcode
//! enum, the mnemonic table and the static check are generated from one place.
//!
//! Each entry lists the roles of the source, target and parameter slots in
//! order. Codes are persisted in program images and must never be renumbered.

use crate::virtual_machine::errors::VMError;

/// How an opcode uses one operand slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The operand's value is read.
    Read,
    /// The operand designates a register or memory cell that is written.
    Write,
    /// The operand's raw value is used as a jump address.
    Address,
}

/// Invokes a callback macro with the complete opcode definition list.
#[macro_export]
macro_rules! for_each_opcode {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Data movement
            // =========================
            /// MOV src dst ; dst = src
            Mov = 0, "MOV" => [Read, Write],
            /// EXC a b ; swap a and b
            Exc = 1, "EXC" => [Write, Write],
            // =========================
            // Arithmetic
            // =========================
            /// ADD src tgt dst ; dst = tgt + src
            Add = 2, "ADD" => [Read, Read, Write],
            /// SUB src tgt dst ; dst = tgt - src
            Sub = 3, "SUB" => [Read, Read, Write],
            /// MUL src tgt dst ; dst = tgt * src
            Mul = 4, "MUL" => [Read, Read, Write],
            /// MOD src tgt dst ; dst = tgt % src
            Mod = 5, "MOD" => [Read, Read, Write],
            // =========================
            // Stack
            // =========================
            /// PUSH src ; push src
            Push = 6, "PUSH" => [Read],
            /// POP dst ; dst = pop (0 when empty)
            Pop = 7, "POP" => [Write],
            // =========================
            // Bitwise
            // =========================
            /// AND src tgt dst ; dst = tgt & src
            And = 8, "AND" => [Read, Read, Write],
            /// OR src tgt dst ; dst = tgt | src
            Or = 9, "OR" => [Read, Read, Write],
            /// XOR src tgt dst ; dst = tgt ^ src
            Xor = 10, "XOR" => [Read, Read, Write],
            /// NOT src dst ; dst = !src
            Not = 11, "NOT" => [Read, Write],
            /// SHL src tgt dst ; dst = tgt << src
            Shl = 12, "SHL" => [Read, Read, Write],
            /// SHR src tgt dst ; dst = tgt >> src
            Shr = 13, "SHR" => [Read, Read, Write],
            // =========================
            // Control flow
            // =========================
            /// CALL addr ; push pc + 1, pc = addr
            Call = 14, "CALL" => [Read],
            /// RET ; pc = pop
            Ret = 15, "RET" => [],
            /// HALT ; stop the machine
            Halt = 16, "HALT" => [],
            /// JMP addr ; pc = addr
            Jmp = 17, "JMP" => [Read],
            /// JNZ src addr ; if src != 0 then pc = addr
            Jnz = 18, "JNZ" => [Read, Address],
            /// JZ src addr ; if src == 0 then pc = addr
            Jz = 19, "JZ" => [Read, Address],
            /// JE a b addr ; if a == b then pc = addr
            Je = 20, "JE" => [Read, Read, Read],
            /// JG a b addr ; if a > b then pc = addr
            Jg = 21, "JG" => [Read, Read, Read],
            /// JB a b addr ; if a < b then pc = addr
            Jb = 22, "JB" => [Read, Read, Read],
            /// JNE a b addr ; if a != b then pc = addr
            Jne = 23, "JNE" => [Read, Read, Read],
            /// NOP ; nothing
            Nop = 24, "NOP" => [],
            // =========================
            // Machine information
            // =========================
            /// CPUID leaf dst ; dst = machine information for leaf
            Cpuid = 25, "CPUID" => [Read, Write],
            /// MPC dst ; dst = pc
            Mpc = 26, "MPC" => [Write],
            /// MSR dst ; dst = sr
            Msr = 27, "MSR" => [Write],
            /// MTC dst ; dst = tc (low 32 bits)
            Mtc = 28, "MTC" => [Write],
            /// SDF ; reserved
            Sdf = 29, "SDF" => [],
            /// EDF ; reserved
            Edf = 30, "EDF" => [],
            // =========================
            // Print channel
            // =========================
            /// PNC src ; print src as a decimal number
            Pnc = 31, "PNC" => [Read],
            /// PAC src ; print src as a character
            Pac = 32, "PAC" => [Read],
            // =========================
            // Extended comparisons
            // =========================
            /// JGE a b addr ; if a >= b then pc = addr
            Jge = 33, "JGE" => [Read, Read, Read],
            /// JBE a b addr ; if a <= b then pc = addr
            Jbe = 34, "JBE" => [Read, Read, Read],
        }
    };
}

#[macro_export]
macro_rules! define_opcodes {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $code:literal, $mnemonic:literal => [ $( $role:ident ),* $(,)? ]
        ),* $(,)?
    ) => {
        #[repr(u8)]
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $code,
            )*
        }

        impl TryFrom<u8> for Opcode {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $code => Ok(Opcode::$name), )*
                    _ => Err(VMError::MalformedInstruction {
                        reason: format!("unknown opcode {value:#04x}"),
                    }),
                }
            }
        }

        impl Opcode {
            /// Every opcode, in code order.
            pub const ALL: &'static [Opcode] = &[ $( Opcode::$name, )* ];

            /// Returns the assembly mnemonic for this opcode.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Returns the roles of the source, target and parameter slots, in
            /// order. Slots past the end are unused.
            pub const fn roles(&self) -> &'static [Role] {
                match self {
                    $( Opcode::$name => &[ $( Role::$role ),* ], )*
                }
            }
        }
    };
}

for_each_opcode!(define_opcodes);

/// Number of opcodes. Codes are dense, so this also sizes dispatch tables.
pub const OPCODE_COUNT: usize = Opcode::ALL.len();

impl Opcode {
    /// Resolves a mnemonic case-insensitively.
    pub fn from_mnemonic(name: &str) -> Option<Opcode> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| op.mnemonic().eq_ignore_ascii_case(name))
    }

    /// Number of operand slots this opcode uses.
    pub const fn arity(&self) -> usize {
        self.roles().len()
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_try_from_invalid() {
        assert!(matches!(
            Opcode::try_from(0xFF),
            Err(VMError::MalformedInstruction { .. })
        ));
        assert!(Opcode::try_from(OPCODE_COUNT as u8).is_err());
    }

    #[test]
    fn mnemonic_lookup_is_case_insensitive() {
        assert_eq!(Opcode::from_mnemonic("mov"), Some(Opcode::Mov));
        assert_eq!(Opcode::from_mnemonic("Jge"), Some(Opcode::Jge));
        assert_eq!(Opcode::from_mnemonic("MOVE"), None);
    }

    #[test]
    fn arity_follows_roles() {
        assert_eq!(Opcode::Add.arity(), 3);
        assert_eq!(Opcode::Mov.arity(), 2);
        assert_eq!(Opcode::Push.arity(), 1);
        assert_eq!(Opcode::Halt.arity(), 0);
        assert_eq!(Opcode::Jz.roles(), &[Role::Read, Role::Address]);
    }
}
