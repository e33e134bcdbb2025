//! Program container and its two persisted image formats.
//!
//! [`Program`] is the compiled unit passed from the assembler to the machine.
//! It can be stored as:
//!
//! - the self-describing image (`ASIM` magic, fixed little-endian header,
//!   16-bit length-prefixed tables), written by [`Program::dump`];
//! - the generic image (`zstd` tag followed by a zstd-compressed
//!   [`BinaryCodec`] encoding of the whole struct), written by
//!   [`Program::to_compressed`].
//!
//! [`Program::load_any`] accepts either.

use crate::types::encoding::{Decode, Encode, read_array, read_bytes};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::instruction::{INSTRUCTION_SIZE, Instruction, Word};
use asim_derive::BinaryCodec;
use std::collections::BTreeMap;

/// Magic bytes of the self-describing image.
pub const IMAGE_MAGIC: &[u8; 4] = b"ASIM";

/// Codec tag of the generic compressed image.
pub const ZSTD_TAG: &[u8; 4] = b"zstd";

pub const DEFAULT_DATA_MEM: u32 = 8 * 1024 * 1024;
pub const DEFAULT_INST_MEM: u32 = 8 * 1024 * 1024;
pub const DEFAULT_N_GPR: u32 = 16;
pub const DEFAULT_STACK_SIZE: u32 = 64;

/// Default zstd level for generic images.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 5;

/// Compiled program: encoded instructions, labels and memory layout.
#[derive(Debug, Clone, PartialEq, Eq, BinaryCodec)]
pub struct Program {
    /// Encoded instructions in execution order.
    pub instructions: Vec<Word>,
    /// Label name to instruction index.
    pub labels: BTreeMap<String, u32>,
    /// Data memory size in cells.
    pub data_mem: u32,
    /// Instruction memory size in slots.
    pub inst_mem: u32,
    /// General-purpose register count.
    pub n_gpr: u32,
    /// Stack capacity in entries.
    pub stack_size: u32,
    /// Files spliced in by the preprocessor, in inclusion order.
    pub includes: Vec<String>,
    /// Seconds since the Unix epoch when the program was created.
    pub compilation_time: u64,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    /// Creates an empty program with the default layout, stamped with the current time.
    pub fn new() -> Self {
        let compilation_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            instructions: Vec::new(),
            labels: BTreeMap::new(),
            data_mem: DEFAULT_DATA_MEM,
            inst_mem: DEFAULT_INST_MEM,
            n_gpr: DEFAULT_N_GPR,
            stack_size: DEFAULT_STACK_SIZE,
            includes: Vec::new(),
            compilation_time,
        }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Appends an encoded instruction.
    pub fn push(&mut self, instruction: &Instruction) {
        self.instructions.push(instruction.encode());
    }

    /// Appends `other` after this program.
    ///
    /// Instructions and includes are concatenated and labels merged, with
    /// `other` winning on name collisions. Label values are taken as is, so
    /// callers combining separately assembled units must rebase them first.
    /// The memory layout of `self` is kept.
    pub fn merge(&mut self, other: Program) {
        self.instructions.extend(other.instructions);
        self.labels.extend(other.labels);
        self.includes.extend(other.includes);
    }

    /// Decodes every instruction, in order.
    ///
    /// This is the view consumed by code generators: one
    /// `(opcode, source, target, parameter)` tuple per instruction, next to the
    /// layout fields of the program.
    pub fn decoded(&self) -> Result<Vec<Instruction>, VMError> {
        self.instructions
            .iter()
            .map(|word| Instruction::decode(word))
            .collect()
    }

    /// Serializes to the self-describing image.
    pub fn dump(&self) -> Result<Vec<u8>, VMError> {
        let mut out = Vec::with_capacity(32 + self.instructions.len() * (2 + INSTRUCTION_SIZE));
        out.extend_from_slice(IMAGE_MAGIC);
        self.inst_mem.encode(&mut out);
        self.data_mem.encode(&mut out);
        self.n_gpr.encode(&mut out);
        self.stack_size.encode(&mut out);
        self.compilation_time.encode(&mut out);

        count_u32(self.labels.len(), "labels")?.encode(&mut out);
        for (name, index) in &self.labels {
            put_short_bytes(&mut out, name.as_bytes(), "label name")?;
            index.encode(&mut out);
        }

        count_u32(self.includes.len(), "includes")?.encode(&mut out);
        for path in &self.includes {
            put_short_bytes(&mut out, path.as_bytes(), "include path")?;
        }

        count_u32(self.instructions.len(), "instructions")?.encode(&mut out);
        for word in &self.instructions {
            put_short_bytes(&mut out, word, "instruction")?;
        }
        Ok(out)
    }

    /// Deserializes a self-describing image.
    pub fn load(bytes: &[u8]) -> Result<Self, VMError> {
        let mut input = bytes;
        if read_array::<4>(&mut input).ok().as_ref() != Some(IMAGE_MAGIC) {
            return Err(corrupt("bad magic"));
        }

        let inst_mem = u32::decode(&mut input)?;
        let data_mem = u32::decode(&mut input)?;
        let n_gpr = u32::decode(&mut input)?;
        let stack_size = u32::decode(&mut input)?;
        let compilation_time = u64::decode(&mut input)?;

        let mut labels = BTreeMap::new();
        for _ in 0..u32::decode(&mut input)? {
            let name = short_string(&mut input)?;
            let index = u32::decode(&mut input)?;
            if labels.insert(name, index).is_some() {
                return Err(corrupt("duplicate label"));
            }
        }

        let mut includes = Vec::new();
        for _ in 0..u32::decode(&mut input)? {
            includes.push(short_string(&mut input)?);
        }

        let count = u32::decode(&mut input)? as usize;
        let mut instructions = Vec::with_capacity(count.min(input.len() / (2 + INSTRUCTION_SIZE)));
        for _ in 0..count {
            let bytes = short_bytes(&mut input)?;
            let word: Word = bytes.try_into().map_err(|_| {
                corrupt(format!(
                    "instruction entry is {} bytes, expected {INSTRUCTION_SIZE}",
                    bytes.len()
                ))
            })?;
            instructions.push(word);
        }

        if !input.is_empty() {
            return Err(corrupt(format!("{} trailing bytes", input.len())));
        }

        Ok(Self {
            instructions,
            labels,
            data_mem,
            inst_mem,
            n_gpr,
            stack_size,
            includes,
            compilation_time,
        })
    }

    /// Serializes to the generic image, compressing at `level`.
    pub fn to_compressed(&self, level: i32) -> Result<Vec<u8>, VMError> {
        let payload = self.to_bytes();
        let compressed =
            zstd::encode_all(&payload[..], level).map_err(|e| VMError::io("zstd encoder", e))?;
        let mut out = Vec::with_capacity(ZSTD_TAG.len() + compressed.len());
        out.extend_from_slice(ZSTD_TAG);
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    /// Deserializes a generic image.
    pub fn from_compressed(bytes: &[u8]) -> Result<Self, VMError> {
        let Some(blob) = bytes.strip_prefix(ZSTD_TAG.as_slice()) else {
            return Err(corrupt("bad codec tag"));
        };
        let payload =
            zstd::decode_all(blob).map_err(|e| corrupt(format!("decompression failed: {e}")))?;
        Ok(Program::from_bytes(&payload)?)
    }

    /// Loads an image in either format, chosen by its first four bytes.
    pub fn load_any(bytes: &[u8]) -> Result<Self, VMError> {
        match bytes.get(..4) {
            Some(tag) if tag == IMAGE_MAGIC => Self::load(bytes),
            Some(tag) if tag == ZSTD_TAG => Self::from_compressed(bytes),
            _ => Err(corrupt("unrecognized image tag")),
        }
    }

    /// Returns true if `bytes` starts with the tag of either image format.
    pub fn is_image(bytes: &[u8]) -> bool {
        matches!(bytes.get(..4), Some(tag) if tag == IMAGE_MAGIC || tag == ZSTD_TAG)
    }
}

fn corrupt(reason: impl Into<String>) -> VMError {
    VMError::CorruptImage {
        reason: reason.into(),
    }
}

fn count_u32(len: usize, what: &str) -> Result<u32, VMError> {
    u32::try_from(len).map_err(|_| corrupt(format!("too many {what}: {len}")))
}

fn put_short_bytes(out: &mut Vec<u8>, bytes: &[u8], what: &str) -> Result<(), VMError> {
    let len = u16::try_from(bytes.len())
        .map_err(|_| corrupt(format!("{what} longer than {} bytes", u16::MAX)))?;
    len.encode(out);
    out.extend_from_slice(bytes);
    Ok(())
}

fn short_bytes<'a>(input: &mut &'a [u8]) -> Result<&'a [u8], VMError> {
    let len = u16::decode(input)? as usize;
    Ok(read_bytes(input, len)?)
}

fn short_string(input: &mut &[u8]) -> Result<String, VMError> {
    let bytes = short_bytes(input)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| corrupt("string is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::isa::Opcode;
    use crate::virtual_machine::operand::Operand;

    fn sample() -> Program {
        let mut p = Program::new();
        p.push(&Instruction::new(Opcode::Mov, &[Operand::number(1), Operand::register(0)]).unwrap());
        p.push(&Instruction::new(Opcode::Jmp, &[Operand::number(0)]).unwrap());
        p.push(&Instruction::bare(Opcode::Halt));
        p.labels.insert("loop".into(), 0);
        p.labels.insert("end".into(), 2);
        p.includes.push("lib/io.acb".into());
        p.data_mem = 1024;
        p.inst_mem = 64;
        p.n_gpr = 4;
        p.stack_size = 8;
        p.compilation_time = 1_700_000_000;
        p
    }

    #[test]
    fn defaults() {
        let p = Program::new();
        assert_eq!(p.data_mem, 8 * 1024 * 1024);
        assert_eq!(p.inst_mem, 8 * 1024 * 1024);
        assert_eq!(p.n_gpr, 16);
        assert_eq!(p.stack_size, 64);
        assert!(p.compilation_time > 0);
        assert!(p.is_empty());
    }

    #[test]
    fn dump_load_roundtrip() {
        let p = sample();
        let bytes = p.dump().unwrap();
        assert_eq!(&bytes[..4], b"ASIM");
        assert_eq!(Program::load(&bytes).unwrap(), p);
    }

    #[test]
    fn dump_header_layout() {
        let bytes = sample().dump().unwrap();
        assert_eq!(&bytes[4..8], &64u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &1024u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &4u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &8u32.to_le_bytes());
        assert_eq!(&bytes[20..28], &1_700_000_000u64.to_le_bytes());
        // two labels, "end" sorts first
        assert_eq!(&bytes[28..32], &2u32.to_le_bytes());
        assert_eq!(&bytes[32..34], &3u16.to_le_bytes());
        assert_eq!(&bytes[34..37], b"end");
        assert_eq!(&bytes[37..41], &2u32.to_le_bytes());
    }

    #[test]
    fn compressed_roundtrip() {
        let p = sample();
        let bytes = p.to_compressed(DEFAULT_COMPRESSION_LEVEL).unwrap();
        assert_eq!(&bytes[..4], b"zstd");
        assert_eq!(Program::from_compressed(&bytes).unwrap(), p);
    }

    #[test]
    fn compressed_roundtrip_at_any_level() {
        let p = sample();
        for level in [-5, 1, 19] {
            let bytes = p.to_compressed(level).unwrap();
            assert_eq!(Program::from_compressed(&bytes).unwrap(), p, "level {level}");
        }
    }

    #[test]
    fn load_any_sniffs_format() {
        let p = sample();
        assert_eq!(Program::load_any(&p.dump().unwrap()).unwrap(), p);
        assert_eq!(Program::load_any(&p.to_compressed(1).unwrap()).unwrap(), p);
        assert!(matches!(
            Program::load_any(b"ELF\x7f rest"),
            Err(VMError::CorruptImage { .. })
        ));
        assert!(Program::load_any(b"AS").is_err());
    }

    #[test]
    fn load_rejects_bad_magic() {
        let mut bytes = sample().dump().unwrap();
        bytes[0] = b'B';
        assert!(matches!(
            Program::load(&bytes),
            Err(VMError::CorruptImage { ref reason }) if reason == "bad magic"
        ));
    }

    #[test]
    fn load_rejects_truncation_and_trailing_bytes() {
        let bytes = sample().dump().unwrap();
        for cut in [3, 10, 30, bytes.len() - 1] {
            assert!(Program::load(&bytes[..cut]).is_err(), "cut at {cut}");
        }
        let mut extended = bytes.clone();
        extended.push(0);
        assert!(matches!(
            Program::load(&extended),
            Err(VMError::CorruptImage { .. })
        ));
    }

    #[test]
    fn load_rejects_short_instruction_entry() {
        let mut p = Program::new();
        p.compilation_time = 0;
        let mut bytes = p.dump().unwrap();
        // Rewrite the instruction count and append one 3-byte entry.
        let n = bytes.len();
        bytes[n - 4..].copy_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&3u16.to_le_bytes());
        bytes.extend_from_slice(&[16, 3, 0]);
        assert!(matches!(
            Program::load(&bytes),
            Err(VMError::CorruptImage { .. })
        ));
    }

    #[test]
    fn from_compressed_rejects_bad_tag_and_payload() {
        assert!(Program::from_compressed(b"gzip....").is_err());
        assert!(matches!(
            Program::from_compressed(b"zstdnot-a-frame"),
            Err(VMError::CorruptImage { .. })
        ));
    }

    #[test]
    fn dump_rejects_oversized_label() {
        let mut p = Program::new();
        p.labels.insert("x".repeat(70_000), 0);
        assert!(matches!(p.dump(), Err(VMError::CorruptImage { .. })));
    }

    #[test]
    fn merge_concatenates_and_later_labels_win() {
        let mut a = Program::new();
        a.push(&Instruction::bare(Opcode::Nop));
        a.labels.insert("x".into(), 0);
        a.includes.push("a.ac".into());
        a.data_mem = 16;

        let mut b = Program::new();
        b.push(&Instruction::bare(Opcode::Halt));
        b.labels.insert("x".into(), 5);
        b.labels.insert("y".into(), 1);
        b.includes.push("b.ac".into());

        a.merge(b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.labels["x"], 5);
        assert_eq!(a.labels["y"], 1);
        assert_eq!(a.includes, vec!["a.ac".to_string(), "b.ac".to_string()]);
        assert_eq!(a.data_mem, 16);
        assert_eq!(a.decoded().unwrap()[1].opcode, Opcode::Halt);
    }
}
