#[cfg(test)]
mod tests {
    use crate::virtual_machine::isa::{OPCODE_COUNT, Opcode};

    /// Codes stored in existing program images.
    const FROZEN: &[(&str, u8)] = &[
        ("MOV", 0),
        ("EXC", 1),
        ("ADD", 2),
        ("SUB", 3),
        ("MUL", 4),
        ("MOD", 5),
        ("PUSH", 6),
        ("POP", 7),
        ("AND", 8),
        ("OR", 9),
        ("XOR", 10),
        ("NOT", 11),
        ("SHL", 12),
        ("SHR", 13),
        ("CALL", 14),
        ("RET", 15),
        ("HALT", 16),
        ("JMP", 17),
        ("JNZ", 18),
        ("JZ", 19),
        ("JE", 20),
        ("JG", 21),
        ("JB", 22),
        ("JNE", 23),
        ("NOP", 24),
        ("CPUID", 25),
        ("MPC", 26),
        ("MSR", 27),
        ("MTC", 28),
        ("SDF", 29),
        ("EDF", 30),
        ("PNC", 31),
        ("PAC", 32),
        ("JGE", 33),
        ("JBE", 34),
    ];

    macro_rules! collect_isa {
        (
            $( $(#[$doc:meta])* $name:ident = $code:literal, $mnemonic:literal => [ $( $role:ident ),* $(,)? ] ),* $(,)?
        ) => {
            vec![ $( ($mnemonic, Opcode::$name as u8) ),* ]
        };
    }

    #[test]
    fn opcode_numbers_unchanged() {
        let current: Vec<(&str, u8)> = crate::for_each_opcode!(collect_isa);
        assert_eq!(current, FROZEN);
    }

    #[test]
    fn codes_are_dense() {
        assert_eq!(OPCODE_COUNT, FROZEN.len());
        for (index, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(*op as usize, index);
            assert_eq!(Opcode::try_from(index as u8).unwrap(), *op);
        }
    }
}
