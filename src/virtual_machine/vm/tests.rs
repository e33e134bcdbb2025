use super::*;
use crate::virtual_machine::assembler::{assemble_parallel, assemble_source};
use crate::virtual_machine::errors::FaultKind;
use std::io;

fn machine(source: &str) -> Machine<Vec<u8>> {
    let program = assemble_source(source).expect("assembly failed");
    Machine::new(&program, Vec::new()).expect("load failed")
}

fn run_vm(source: &str) -> Machine<Vec<u8>> {
    let mut vm = machine(source);
    vm.run().expect("vm run failed");
    vm
}

fn run_and_get(source: &str, reg: u32) -> u32 {
    run_vm(source).register(reg).unwrap()
}

fn run_and_print(source: &str) -> String {
    String::from_utf8(run_vm(source).into_output()).unwrap()
}

/// Runs `source` and returns the fault with its pc.
fn run_expect_err(source: &str) -> (u32, VMError) {
    match machine(source).run() {
        Err(VMError::RuntimeFault { pc, source }) => (pc, *source),
        other => panic!("expected a runtime fault, got {other:?}"),
    }
}

fn program_of(instructions: &[Instruction]) -> Program {
    let mut program = Program::new();
    for instr in instructions {
        program.push(instr);
    }
    program
}

// ==================== End to end ====================

#[test]
fn add_and_print() {
    let vm = run_vm(".n_GPR 2\nMOV 5 r_0\nMOV 3 r_1\nADD r_0 r_1 r_0\nPNC r_0\nHALT");
    assert_eq!(vm.register(0).unwrap(), 8);
    assert_eq!(vm.tc(), 5);
    assert!(vm.is_halted());
    assert_eq!(vm.output().as_slice(), b"8");
}

#[test]
fn image_roundtrip_then_run() {
    let program = assemble_source("MOV 5 r_0\nADD 3 r_0 r_0\nPNC r_0").unwrap();
    for image in [program.dump().unwrap(), program.to_compressed(1).unwrap()] {
        let loaded = Program::load_any(&image).unwrap();
        let mut vm = Machine::new(&loaded, Vec::new()).unwrap();
        vm.run().unwrap();
        assert_eq!(vm.into_output(), b"8");
    }
}

#[test]
fn parallel_assembly_runs_identically() {
    let src = ".n_GPR 2\nMOV 5 r_0\nMOV 3 r_1\nADD r_0 r_1 r_0\nPNC r_0\nHALT";
    for workers in 1..=4 {
        let program = assemble_parallel(src, workers).unwrap();
        let mut vm = Machine::new(&program, Vec::new()).unwrap();
        vm.run().unwrap();
        assert_eq!(vm.into_output(), b"8", "{workers} workers");
    }
}

// ==================== Moves and memory ====================

#[test]
fn mov_register_and_memory() {
    let vm = run_vm("MOV 42 &100\nMOV &100 r_0\nMOV &7 r_1\nMOV r_0 r_2");
    assert_eq!(vm.register(0).unwrap(), 42);
    assert_eq!(vm.register(1).unwrap(), 0);
    assert_eq!(vm.register(2).unwrap(), 42);
    assert_eq!(vm.memory(100).unwrap(), 42);
}

#[test]
fn mov_to_immediate_faults() {
    let (pc, err) = run_expect_err("NOP\nMOV 1 2");
    assert_eq!(pc, 1);
    assert!(matches!(err, VMError::ImmediateWrite { opcode: "MOV" }));
}

#[test]
fn missing_operand_faults() {
    let (_, err) = run_expect_err("MOV 1");
    assert!(matches!(
        err,
        VMError::MissingOperand {
            opcode: "MOV",
            slot: "target"
        }
    ));
}

#[test]
fn exc_swaps() {
    let vm = run_vm("MOV 1 r_0\nMOV 2 &0\nEXC r_0 &0");
    assert_eq!(vm.register(0).unwrap(), 2);
    assert_eq!(vm.memory(0).unwrap(), 1);
}

#[test]
fn exc_with_immediate_faults_without_side_effects() {
    let mut vm = machine("MOV 7 r_0\nEXC r_0 1");
    let err = vm.run().unwrap_err();
    assert!(matches!(err.root(), VMError::ImmediateWrite { opcode: "EXC" }));
    assert_eq!(vm.register(0).unwrap(), 7);
    let (_, err) = run_expect_err("EXC 1 r_0");
    assert!(matches!(err, VMError::ImmediateWrite { .. }));
}

#[test]
fn memory_out_of_bounds() {
    let (_, err) = run_expect_err(".data_mem 4\nMOV 1 &3\nMOV 1 &4");
    assert!(matches!(
        err,
        VMError::MemoryOutOfBounds {
            address: 4,
            size: 4
        }
    ));
}

#[test]
fn register_out_of_bounds() {
    let mut program = program_of(&[
        Instruction::new(Opcode::Mov, &[Operand::number(1), Operand::register(3)]).unwrap(),
        Instruction::new(Opcode::Mov, &[Operand::number(1), Operand::register(4)]).unwrap(),
    ]);
    program.n_gpr = 4;
    let mut vm = Machine::new(&program, Vec::new()).unwrap();
    match vm.run() {
        Err(VMError::RuntimeFault { pc, source }) => {
            assert_eq!(pc, 1);
            assert!(matches!(
                *source,
                VMError::InvalidRegisterIndex {
                    index: 4,
                    available: 4
                }
            ));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(vm.register(3).unwrap(), 1);
}

#[test]
fn register_read_out_of_bounds() {
    let mut program = program_of(&[
        Instruction::new(Opcode::Mov, &[Operand::register(4), Operand::register(0)]).unwrap(),
    ]);
    program.n_gpr = 4;
    let mut vm = Machine::new(&program, Vec::new()).unwrap();
    match vm.run() {
        Err(VMError::RuntimeFault { pc, source }) => {
            assert_eq!(pc, 0);
            assert!(matches!(
                *source,
                VMError::InvalidRegisterIndex {
                    index: 4,
                    available: 4
                }
            ));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(vm.register(0).unwrap(), 0);
    assert_eq!(vm.tc(), 0);
}

#[test]
fn top_of_full_address_space_is_usable() {
    let vm = run_vm(".data_mem 0xFFFFFFFF\nMOV 7 &0xFFFFFFFE\nMOV &0xFFFFFFFE r_0\nHALT");
    assert_eq!(vm.register(0).unwrap(), 7);
    assert_eq!(vm.memory(0xFFFFFFFE).unwrap(), 7);
    assert_eq!(vm.memory(0x8000_0000).unwrap(), 0);
    assert!(matches!(
        vm.memory(0xFFFFFFFF),
        Err(VMError::MemoryOutOfBounds { .. })
    ));
}

// ==================== Arithmetic ====================

#[test]
fn sub_is_target_minus_source() {
    assert_eq!(run_and_get("MOV 10 r_0\nSUB 3 r_0 r_1", 1), 7);
}

#[test]
fn sub_wraps_and_sets_carry() {
    let vm = run_vm("SUB 1 0 r_0");
    assert_eq!(vm.register(0).unwrap(), u32::MAX);
    assert_eq!(vm.status(), Status::CARRY);
}

#[test]
fn add_wrapping() {
    let vm = run_vm("ADD 1 0xFFFFFFFF r_0");
    assert_eq!(vm.register(0).unwrap(), 0);
    assert_eq!(vm.status(), Status::ZERO | Status::CARRY);
}

#[test]
fn mul_and_mod() {
    assert_eq!(run_and_get("MUL 6 7 r_0", 0), 42);
    assert_eq!(run_and_get("MOD 5 17 r_0", 0), 2);
}

#[test]
fn mod_by_zero() {
    let (_, err) = run_expect_err("MOD 0 7 r_0");
    assert!(matches!(err, VMError::DivisionByZero));
}

#[test]
fn zero_flag_and_msr() {
    let vm = run_vm("SUB 5 5 r_0\nMSR r_1\nADD 1 1 r_0\nMSR r_2");
    assert_eq!(vm.register(1).unwrap(), Status::ZERO.bits());
    assert_eq!(vm.register(2).unwrap(), 0);
}

// ==================== Bitwise ====================

#[test]
fn bitwise_ops() {
    assert_eq!(run_and_get("AND 12 10 r_0", 0), 8);
    assert_eq!(run_and_get("OR 12 10 r_0", 0), 14);
    assert_eq!(run_and_get("XOR 12 10 r_0", 0), 6);
    assert_eq!(run_and_get("NOT 0 r_0", 0), u32::MAX);
}

#[test]
fn shifts_take_amount_modulo_32() {
    assert_eq!(run_and_get("SHL 3 1 r_0", 0), 8);
    assert_eq!(run_and_get("SHL 33 1 r_0", 0), 2);
    assert_eq!(run_and_get("SHR 4 0x100 r_0", 0), 16);
}

// ==================== Stack ====================

#[test]
fn stack_is_lifo_and_underflow_yields_zero() {
    let vm = run_vm("PUSH 1\nPUSH 2\nPOP r_0\nPOP r_1\nPOP r_2\nHALT");
    assert_eq!(vm.register(0).unwrap(), 2);
    assert_eq!(vm.register(1).unwrap(), 1);
    assert_eq!(vm.register(2).unwrap(), 0);
    assert_eq!(vm.stack_len(), 0);
}

#[test]
fn stack_overflow() {
    let (pc, err) = run_expect_err(".stack_size 2\nPUSH 1\nPUSH 2\nPUSH 3");
    assert_eq!(pc, 2);
    assert!(matches!(err, VMError::StackOverflow { capacity: 2 }));
}

#[test]
fn pop_into_immediate_keeps_stack() {
    let mut vm = machine("PUSH 9\nPOP 1");
    assert!(vm.run().is_err());
    assert_eq!(vm.stack_len(), 1);
}

// ==================== Control flow ====================

#[test]
fn counting_loop() {
    let src = "MOV 0 r_0\n#loop\nADD 1 r_0 r_0\nJNE r_0 5 #loop\nPNC r_0\nHALT";
    let vm = run_vm(src);
    assert_eq!(vm.output().as_slice(), b"5");
    // MOV, 5 × (ADD, JNE), PNC, HALT
    assert_eq!(vm.tc(), 13);
}

#[test]
fn jz_and_jnz_use_target_literal() {
    let src = |op: &str, v: u32| format!("{op} {v} 3\nPNC 1\nHALT\nPNC 2\nHALT");
    assert_eq!(run_and_print(&src("JZ", 0)), "2");
    assert_eq!(run_and_print(&src("JZ", 4)), "1");
    assert_eq!(run_and_print(&src("JNZ", 4)), "2");
    assert_eq!(run_and_print(&src("JNZ", 0)), "1");
}

#[test]
fn conditional_jumps() {
    let cases = [
        ("JE", 3, 3, true),
        ("JE", 3, 4, false),
        ("JNE", 3, 4, true),
        ("JG", 5, 4, true),
        ("JG", 4, 4, false),
        ("JB", 3, 4, true),
        ("JB", 4, 4, false),
        ("JGE", 4, 4, true),
        ("JGE", 3, 4, false),
        ("JBE", 4, 4, true),
        ("JBE", 5, 4, false),
    ];
    for (op, a, b, taken) in cases {
        let src = format!("{op} {a} {b} 3\nPNC 0\nHALT\nPNC 1\nHALT");
        let expected = if taken { "1" } else { "0" };
        assert_eq!(run_and_print(&src), expected, "{op} {a} {b}");
    }
}

#[test]
fn jmp_register_target() {
    assert_eq!(run_and_print("MOV 3 r_0\nJMP r_0\nPNC 1\nPNC 2"), "2");
}

#[test]
fn call_and_ret() {
    let vm = run_vm("JMP 3\n#f\nPNC 7\nRET\nCALL #f\nPNC 8\nHALT");
    assert_eq!(vm.output().as_slice(), b"78");
    assert_eq!(vm.stack_len(), 0);
}

#[test]
fn implicit_halt_past_program_end() {
    let vm = run_vm("MOV 1 r_0");
    assert_eq!(vm.register(0).unwrap(), 1);
    assert_eq!(vm.pc(), 1);
    assert_eq!(vm.tc(), 2);
}

#[test]
fn jump_beyond_inst_mem_faults() {
    let (pc, err) = run_expect_err(".inst_mem 2\nJMP 5");
    assert_eq!(pc, 5);
    assert!(matches!(
        err,
        VMError::InstructionOutOfBounds {
            pc: 5,
            capacity: 2
        }
    ));
}

#[test]
fn faulted_machine_stays_stopped() {
    let mut vm = machine("MOD 0 1 r_0\nNOP");
    assert!(vm.step().is_err());
    assert!(vm.is_halted());
    assert!(!vm.step().unwrap());
    assert_eq!(vm.tc(), 0);
}

#[test]
fn step_reports_running_state() {
    let mut vm = machine("NOP\nHALT");
    assert!(vm.step().unwrap());
    assert!(!vm.step().unwrap());
    assert_eq!(vm.tc(), 2);
}

// ==================== Introspection ====================

#[test]
fn cpuid_leaves() {
    let vm = run_vm(
        ".stack_size 8\nCPUID 0 r_0\nCPUID 1 r_1\nCPUID 2 r_2\nCPUID 3 r_3\nCPUID 4 r_4\nCPUID 9 r_5",
    );
    assert_eq!(vm.register(0).unwrap(), OPCODE_COUNT as u32);
    assert_eq!(vm.register(1).unwrap(), 16);
    assert_eq!(vm.register(2).unwrap(), 8 * 1024 * 1024);
    assert_eq!(vm.register(3).unwrap(), 8 * 1024 * 1024);
    assert_eq!(vm.register(4).unwrap(), 8);
    assert_eq!(vm.register(5).unwrap(), 0);
}

#[test]
fn mpc_and_mtc() {
    let vm = run_vm("NOP\nMPC r_0\nMTC r_1");
    assert_eq!(vm.register(0).unwrap(), 1);
    assert_eq!(vm.register(1).unwrap(), 2);
}

#[test]
fn reserved_opcodes_are_unsupported() {
    let (_, err) = run_expect_err("SDF");
    assert!(matches!(err, VMError::UnsupportedInstruction { opcode: "SDF" }));
    let (_, err) = run_expect_err("EDF");
    assert!(matches!(err, VMError::UnsupportedInstruction { opcode: "EDF" }));
}

// ==================== Print channel ====================

#[test]
fn pac_prints_characters() {
    assert_eq!(run_and_print("PAC 72\nPAC 105\nPAC 0xD800"), "Hi\u{FFFD}");
}

struct FailingWriter;

impl io::Write for FailingWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn print_failure_is_io() {
    let program = assemble_source("PNC 1").unwrap();
    let mut vm = Machine::new(&program, FailingWriter).unwrap();
    let err = vm.run().unwrap_err();
    assert_eq!(err.kind(), FaultKind::Io);
    assert!(matches!(err.root(), VMError::Io { .. }));
}

// ==================== Loading and configuration ====================

#[test]
fn program_too_large() {
    let program = assemble_source(".inst_mem 1\nNOP\nNOP").unwrap();
    assert!(matches!(
        Machine::new(&program, Vec::new()),
        Err(VMError::ProgramTooLarge {
            instructions: 2,
            capacity: 1
        })
    ));
}

#[test]
fn oversized_register_file_rejected_at_load() {
    let mut program = program_of(&[Instruction::bare(Opcode::Halt)]);
    program.n_gpr = u32::MAX;
    assert!(matches!(
        Machine::new(&program, Vec::new()),
        Err(VMError::TooManyRegisters { count: u32::MAX, max: MAX_REGISTERS })
    ));
    program.n_gpr = MAX_REGISTERS;
    assert!(Machine::new(&program, Vec::new()).is_ok());
}

#[test]
fn malformed_word_rejected_at_load() {
    let mut program = program_of(&[Instruction::bare(Opcode::Nop)]);
    program.instructions.push([0xEE; 16]);
    assert!(matches!(
        Machine::new(&program, Vec::new()),
        Err(VMError::MalformedInstruction { .. })
    ));
}

#[test]
fn strict_masking() {
    let program = assemble_source("MOV 300 r_0\nMOV 0x1FF &0").unwrap();

    let mut vm = Machine::new(&program, Vec::new()).unwrap();
    vm.run().unwrap();
    assert_eq!(vm.register(0).unwrap(), 300);
    assert_eq!(vm.memory(0).unwrap(), 0x1FF);

    let mut vm = Machine::with_config(&program, Vec::new(), MachineConfig::strict()).unwrap();
    vm.run().unwrap();
    assert_eq!(vm.register(0).unwrap(), 44);
    assert_eq!(vm.memory(0).unwrap(), 0xFF);
}
