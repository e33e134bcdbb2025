use crate::types::encoding::DecodeError;
use crate::utils::base85::Base85Error;
use asim_derive::Error;

/// Broad class of a [`VMError`], used to decide which stage it is fatal to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Malformed assembly source. Fatal to the assembling unit.
    Syntax,
    /// Malformed instruction bytes or program image.
    Encoding,
    /// Fault raised while a machine executes. Fatal to that machine.
    Runtime,
    /// File system or print channel failure.
    Io,
}

/// Errors that can occur during assembly, image handling or execution.
#[derive(Debug, Error)]
pub enum VMError {
    // =========================
    // Assembly
    // =========================
    /// Mnemonic not present in the opcode table.
    #[error("unknown mnemonic `{mnemonic}`")]
    UnknownMnemonic { mnemonic: String },
    /// Directive other than the supported layout and include markers.
    #[error("unknown directive `.{directive}`")]
    UnknownDirective { directive: String },
    /// Directive argument missing or not a number.
    #[error("invalid argument `{argument}` for directive `.{directive}`")]
    InvalidDirectiveArgument { directive: String, argument: String },
    /// Operand token matching none of the operand forms.
    #[error("invalid operand `{token}`")]
    InvalidOperand { token: String },
    /// Register index malformed or beyond the declared register count.
    #[error("invalid register `{token}` ({available} registers declared)")]
    InvalidRegister { token: String, available: u32 },
    /// More than three operands on one line.
    #[error("too many operands: {count} given, at most 3 allowed")]
    TooManyOperands { count: usize },
    /// Label defined more than once in one unit.
    #[error("duplicate label: #{label}")]
    DuplicateLabel { label: String },
    /// Reference to a label not yet defined in this unit.
    #[error("undefined label: #{label}")]
    UndefinedLabel { label: String },
    /// Include name that matches no file in the search path.
    #[error("include `{name}` not found in any include directory")]
    IncludeNotFound { name: String },
    /// Assembly error with its 1-based source line.
    #[error("line {line}: {source}")]
    AssemblyError { line: usize, source: Box<VMError> },
    /// An assembler worker thread panicked.
    #[error("assembler worker for partition {partition} panicked")]
    WorkerPanicked { partition: usize },

    // =========================
    // Encoding
    // =========================
    /// Instruction bytes that do not form a valid 16-byte word.
    #[error("malformed instruction: {reason}")]
    MalformedInstruction { reason: String },
    /// Program image with a bad tag, truncated fields or a corrupt payload.
    #[error("corrupt program image: {reason}")]
    CorruptImage { reason: String },

    // =========================
    // Execution
    // =========================
    /// Register index exceeds the register file size.
    #[error("register index {index} out of bounds ({available} registers)")]
    InvalidRegisterIndex { index: u32, available: usize },
    /// Data memory address beyond the declared data segment.
    #[error("memory address {address} out of bounds ({size} cells)")]
    MemoryOutOfBounds { address: u32, size: u32 },
    /// Program counter beyond the declared instruction segment.
    #[error("instruction address {pc} out of bounds ({capacity} slots)")]
    InstructionOutOfBounds { pc: u64, capacity: u32 },
    /// Push on a full stack.
    #[error("stack overflow (capacity {capacity})")]
    StackOverflow { capacity: usize },
    /// Opcode with no handler in the dispatch table.
    #[error("unsupported instruction {opcode}")]
    UnsupportedInstruction { opcode: &'static str },
    /// Operand slot required by the opcode is absent.
    #[error("{opcode} requires a {slot} operand")]
    MissingOperand {
        opcode: &'static str,
        slot: &'static str,
    },
    /// Write to an immediate operand.
    #[error("{opcode} cannot write to an immediate operand")]
    ImmediateWrite { opcode: &'static str },
    /// Modulo by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// Program larger than its own instruction segment.
    #[error("program has {instructions} instructions but inst_mem is {capacity}")]
    ProgramTooLarge { instructions: usize, capacity: u32 },
    /// Declared register count above what a machine will allocate.
    #[error("n_GPR is {count}, at most {max} registers are supported")]
    TooManyRegisters { count: u32, max: u32 },
    /// Runtime fault with the program counter of the faulting instruction.
    #[error("fault at pc {pc}: {source}")]
    RuntimeFault { pc: u32, source: Box<VMError> },

    // =========================
    // I/O
    // =========================
    #[error("io error on {context}: {reason}")]
    Io { context: String, reason: String },
}

impl VMError {
    /// Classifies this error, looking through line and pc wrappers.
    pub fn kind(&self) -> FaultKind {
        match self {
            VMError::UnknownMnemonic { .. }
            | VMError::UnknownDirective { .. }
            | VMError::InvalidDirectiveArgument { .. }
            | VMError::InvalidOperand { .. }
            | VMError::InvalidRegister { .. }
            | VMError::TooManyOperands { .. }
            | VMError::DuplicateLabel { .. }
            | VMError::UndefinedLabel { .. }
            | VMError::IncludeNotFound { .. }
            | VMError::WorkerPanicked { .. } => FaultKind::Syntax,
            VMError::AssemblyError { source, .. } => match source.kind() {
                FaultKind::Syntax | FaultKind::Runtime => FaultKind::Syntax,
                other => other,
            },
            VMError::MalformedInstruction { .. } | VMError::CorruptImage { .. } => {
                FaultKind::Encoding
            }
            VMError::InvalidRegisterIndex { .. }
            | VMError::MemoryOutOfBounds { .. }
            | VMError::InstructionOutOfBounds { .. }
            | VMError::StackOverflow { .. }
            | VMError::UnsupportedInstruction { .. }
            | VMError::MissingOperand { .. }
            | VMError::ImmediateWrite { .. }
            | VMError::DivisionByZero
            | VMError::ProgramTooLarge { .. }
            | VMError::TooManyRegisters { .. } => FaultKind::Runtime,
            VMError::RuntimeFault { source, .. } => match source.kind() {
                FaultKind::Io => FaultKind::Io,
                _ => FaultKind::Runtime,
            },
            VMError::Io { .. } => FaultKind::Io,
        }
    }

    /// Returns the innermost error beneath line and pc wrappers.
    pub fn root(&self) -> &VMError {
        match self {
            VMError::AssemblyError { source, .. } | VMError::RuntimeFault { source, .. } => {
                source.root()
            }
            other => other,
        }
    }

    /// Wraps an I/O error with what was being accessed.
    pub fn io(context: impl Into<String>, err: std::io::Error) -> Self {
        VMError::Io {
            context: context.into(),
            reason: err.to_string(),
        }
    }
}

impl From<DecodeError> for VMError {
    fn from(err: DecodeError) -> Self {
        VMError::CorruptImage {
            reason: err.to_string(),
        }
    }
}

impl From<Base85Error> for VMError {
    fn from(err: Base85Error) -> Self {
        VMError::CorruptImage {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = VMError::AssemblyError {
            line: 3,
            source: Box::new(VMError::UnknownMnemonic {
                mnemonic: "FOO".into(),
            }),
        };
        assert_eq!(err.to_string(), "line 3: unknown mnemonic `FOO`");
    }

    #[test]
    fn kind_looks_through_wrappers() {
        let fault = VMError::RuntimeFault {
            pc: 4,
            source: Box::new(VMError::StackOverflow { capacity: 2 }),
        };
        assert_eq!(fault.kind(), FaultKind::Runtime);
        assert!(matches!(fault.root(), VMError::StackOverflow { capacity: 2 }));

        let include = VMError::AssemblyError {
            line: 1,
            source: Box::new(VMError::CorruptImage {
                reason: "bad tag".into(),
            }),
        };
        assert_eq!(include.kind(), FaultKind::Encoding);
    }

    #[test]
    fn decode_error_becomes_corrupt_image() {
        let err: VMError = DecodeError::UnexpectedEof.into();
        assert!(matches!(err, VMError::CorruptImage { .. }));
        assert_eq!(err.kind(), FaultKind::Encoding);
    }
}
