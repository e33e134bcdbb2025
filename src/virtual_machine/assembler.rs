//! Assembly language parser and program builder.
//!
//! Converts preprocessed assembly text into a [`Program`].
//!
//! # Syntax
//!
//! ```text
//! .n_GPR 4            ; directive
//! #loop               ; label definition
//! ADD r_0 1 r_0       ; mnemonic and up to three operands
//! JNE r_0 10 #loop
//! ```
//!
//! - Mnemonics are case-insensitive
//! - `r_N` is a register, `&N` a memory cell, `N` or `0xN` an immediate
//! - `#name` is the index of a label defined earlier in the same unit
//! - Comments start with `;`
//!
//! # Parallel assembly
//!
//! The line list can be split into contiguous partitions, each assembled on
//! its own thread by its own [`Assembler`] with a private label table and line
//! cache. Units record where they used a label so that [`link`] can rebase
//! those operands when the units are concatenated. A label is only visible in
//! the partition that defines it.

use crate::utils::base85;
use crate::utils::cache::LineCache;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::instruction::{Instruction, Slot, Word};
use crate::virtual_machine::isa::{Opcode, Role};
use crate::virtual_machine::operand::{Operand, OperandKind, parse_number};
use crate::virtual_machine::preprocess::{AssemblyContext, IncludeExpander, expand_file};
use crate::virtual_machine::program::Program;
use crate::{debug, error, warn};
use std::fmt::Write;
use std::path::Path;
use std::thread;

const COMMENT_CHAR: char = ';';
const LABEL_PREFIX: char = '#';
const DIRECTIVE_PREFIX: char = '.';
const MEMORY_PREFIX: char = '&';
const REGISTER_PREFIX: &str = "r_";
const MAX_OPERANDS: usize = 3;
const INCLUDE_ZSTD: &str = "include_zstd";
const LAYOUT_DIRECTIVES: [&str; 4] = ["data_mem", "inst_mem", "n_GPR", "stack_size"];

/// Return the line and message for errors that carry a source line.
fn assembly_error_location(err: &VMError) -> Option<(usize, String)> {
    match err {
        VMError::AssemblyError { line, source } => Some((*line, source.to_string())),
        _ => None,
    }
}

/// Formats a compiler-style diagnostic for assembly failures.
fn render_assembly_diagnostic(file: &str, source: &str, line: usize, message: &str) -> String {
    let raw_line = source.lines().nth(line.saturating_sub(1));
    let column = raw_line
        .map(|l| l.len() - l.trim_start().len() + 1)
        .unwrap_or(1);

    let mut diag = String::new();
    let _ = writeln!(diag, "error: {message}");
    let _ = writeln!(diag, " --> {file}:{line}:{column}");

    if let Some(raw_line) = raw_line {
        let line_text = raw_line.trim_end_matches('\r');
        let width = line_text.trim().chars().count().max(1);
        let _ = writeln!(diag, "  |");
        let _ = writeln!(diag, "{:>4} | {}", line, line_text);
        let _ = writeln!(
            diag,
            "  | {}{}",
            " ".repeat(column - 1),
            "^".repeat(width)
        );
    }

    diag
}

fn log_assembly_error(file: &str, source: &str, err: &VMError) {
    match assembly_error_location(err) {
        Some((line, message)) => {
            error!("{}", render_assembly_diagnostic(file, source, line, &message))
        }
        None => error!("{file}: {err}"),
    }
}

/// Layout directives seen in one unit, applied in partition order when linking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayoutOverrides {
    pub data_mem: Option<u32>,
    pub inst_mem: Option<u32>,
    pub n_gpr: Option<u32>,
    pub stack_size: Option<u32>,
}

impl LayoutOverrides {
    /// Records the value of one of [`LAYOUT_DIRECTIVES`].
    fn set(&mut self, directive: &str, value: u32) {
        match directive {
            "data_mem" => self.data_mem = Some(value),
            "inst_mem" => self.inst_mem = Some(value),
            "n_GPR" => self.n_gpr = Some(value),
            "stack_size" => self.stack_size = Some(value),
            _ => {}
        }
    }

    /// Folds every well-formed layout directive in `lines` into `self`.
    ///
    /// Malformed directives are skipped; the unit that owns them reports them.
    fn scan<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) {
        for line in lines {
            let Some(text) = strip_comment(line).strip_prefix(DIRECTIVE_PREFIX) else {
                continue;
            };
            let mut parts = text.split_whitespace();
            if let Some(name) = parts.next()
                && LAYOUT_DIRECTIVES.contains(&name)
                && let Some(value) = parts.next().and_then(parse_number)
            {
                self.set(name, value);
            }
        }
    }

    fn apply(&self, program: &mut Program) {
        if let Some(v) = self.data_mem {
            program.data_mem = v;
        }
        if let Some(v) = self.inst_mem {
            program.inst_mem = v;
        }
        if let Some(v) = self.n_gpr {
            program.n_gpr = v;
        }
        if let Some(v) = self.stack_size {
            program.stack_size = v;
        }
    }
}

/// Operand whose value is a unit-local label index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub index: usize,
    pub slot: Slot,
}

/// Output of one [`Assembler`].
#[derive(Debug, Clone)]
pub struct AssembledUnit {
    pub program: Program,
    pub relocations: Vec<Relocation>,
    pub overrides: LayoutOverrides,
}

/// Encoded line plus the slots that came from label references.
#[derive(Debug, Clone, Copy)]
struct CachedLine {
    word: Word,
    label_slots: [bool; MAX_OPERANDS],
}

/// Accumulates one unit of assembly.
pub struct Assembler {
    program: Program,
    relocations: Vec<Relocation>,
    overrides: LayoutOverrides,
    cache: LineCache<CachedLine>,
    /// 1-based source line of this unit's first line.
    first_line: usize,
}

impl Assembler {
    pub fn new(first_line: usize, cache_capacity: usize) -> Self {
        Self {
            program: Program::new(),
            relocations: Vec::new(),
            overrides: LayoutOverrides::default(),
            cache: LineCache::new(cache_capacity),
            first_line,
        }
    }

    /// Creates an assembler whose layout starts from the directives that
    /// precede its first line.
    ///
    /// The seed only sets the layout operands are validated against; it is
    /// not recorded as this unit's own overrides.
    pub fn with_layout(first_line: usize, cache_capacity: usize, seed: LayoutOverrides) -> Self {
        let mut asm = Self::new(first_line, cache_capacity);
        seed.apply(&mut asm.program);
        asm
    }

    /// Registers `name` at the current instruction index.
    pub fn define_label(&mut self, name: &str) -> Result<(), VMError> {
        if name.is_empty() {
            return Err(VMError::InvalidOperand {
                token: LABEL_PREFIX.to_string(),
            });
        }
        if self.program.labels.contains_key(name) {
            return Err(VMError::DuplicateLabel {
                label: name.to_string(),
            });
        }
        let index = self.program.len() as u32;
        self.program.labels.insert(name.to_string(), index);
        Ok(())
    }

    /// Resolves a label defined earlier in this unit.
    pub fn resolve_label(&self, name: &str) -> Result<u32, VMError> {
        self.program
            .labels
            .get(name)
            .copied()
            .ok_or_else(|| VMError::UndefinedLabel {
                label: name.to_string(),
            })
    }

    /// Assembles `lines`, tagging any error with its source line.
    pub fn assemble_lines<'a>(
        mut self,
        lines: impl IntoIterator<Item = &'a str>,
    ) -> Result<AssembledUnit, VMError> {
        for (offset, line) in lines.into_iter().enumerate() {
            self.assemble_line(line)
                .map_err(|err| VMError::AssemblyError {
                    line: self.first_line + offset,
                    source: Box::new(err),
                })?;
        }
        Ok(self.finish())
    }

    /// Classifies and assembles a single line.
    pub fn assemble_line(&mut self, raw: &str) -> Result<(), VMError> {
        // Base-85 payloads may contain the comment character.
        if let Some(text) = raw.trim_start().strip_prefix(DIRECTIVE_PREFIX)
            && text.split_whitespace().next() == Some(INCLUDE_ZSTD)
        {
            return self.include_zstd(text);
        }
        let line = strip_comment(raw);
        if line.is_empty() {
            return Ok(());
        }
        if let Some(name) = line.strip_prefix(LABEL_PREFIX) {
            return self.define_label(name.trim());
        }
        if let Some(directive) = line.strip_prefix(DIRECTIVE_PREFIX) {
            return self.directive(directive);
        }
        self.instruction(line)
    }

    pub fn finish(self) -> AssembledUnit {
        AssembledUnit {
            program: self.program,
            relocations: self.relocations,
            overrides: self.overrides,
        }
    }

    fn directive(&mut self, text: &str) -> Result<(), VMError> {
        let mut parts = text.split_whitespace();
        let name = parts.next().unwrap_or_default();
        match name {
            _ if LAYOUT_DIRECTIVES.contains(&name) => {
                let value = numeric_argument(name, parts.next())?;
                debug!(".{name} = {value}");
                self.overrides.set(name, value);
                self.overrides.apply(&mut self.program);
                if name == "n_GPR" {
                    // Cached lines were validated against the old count.
                    self.cache.clear();
                }
                Ok(())
            }
            INCLUDE_ZSTD => self.include_zstd(text),
            "include_file" => {
                let path = required_argument(name, parts.next())?;
                debug!("inlined source {path}");
                self.program.includes.push(path.to_string());
                Ok(())
            }
            _ => Err(VMError::UnknownDirective {
                directive: name.to_string(),
            }),
        }
    }

    /// Splices the instructions of a base-85 encoded image.
    ///
    /// `text` is the raw directive without its prefix. Comments are only
    /// recognised as whole tokens after the payload.
    fn include_zstd(&mut self, text: &str) -> Result<(), VMError> {
        let mut parts = text
            .split_whitespace()
            .skip(1)
            .take_while(|token| !token.starts_with(COMMENT_CHAR));
        let path = required_argument(INCLUDE_ZSTD, parts.next())?;
        let blob = required_argument(INCLUDE_ZSTD, parts.next())?;
        if let Some(extra) = parts.next() {
            return Err(VMError::InvalidDirectiveArgument {
                directive: INCLUDE_ZSTD.to_string(),
                argument: extra.to_string(),
            });
        }
        let included = Program::load_any(&base85::decode(blob)?)?;
        debug!(
            "splicing {} instructions from {path}",
            included.instructions.len()
        );
        self.program.instructions.extend(included.instructions);
        self.program.includes.push(path.to_string());
        Ok(())
    }

    fn instruction(&mut self, line: &str) -> Result<(), VMError> {
        if let Some(cached) = self.cache.get(line) {
            self.emit(cached);
            return Ok(());
        }

        let mut tokens = line.split_whitespace();
        let mnemonic = tokens.next().unwrap_or_default();
        let opcode = Opcode::from_mnemonic(mnemonic).ok_or_else(|| VMError::UnknownMnemonic {
            mnemonic: mnemonic.to_string(),
        })?;

        let tokens: Vec<&str> = tokens.collect();
        if tokens.len() > MAX_OPERANDS {
            return Err(VMError::TooManyOperands {
                count: tokens.len(),
            });
        }
        if tokens.len() != opcode.arity() {
            warn!(
                "{opcode} takes {} operands, `{line}` gives {}",
                opcode.arity(),
                tokens.len()
            );
        }

        let mut operands = Vec::with_capacity(tokens.len());
        let mut label_slots = [false; MAX_OPERANDS];
        for (i, token) in tokens.iter().enumerate() {
            let (operand, from_label) = self.parse_operand(token)?;
            lint_operand(opcode, i, operand, line);
            operands.push(operand);
            label_slots[i] = from_label;
        }

        let cached = CachedLine {
            word: Instruction::new(opcode, &operands)?.encode(),
            label_slots,
        };
        self.cache.insert(line, cached);
        self.emit(cached);
        Ok(())
    }

    fn emit(&mut self, line: CachedLine) {
        let index = self.program.len();
        self.program.instructions.push(line.word);
        for (slot, from_label) in Slot::ALL.into_iter().zip(line.label_slots) {
            if from_label {
                self.relocations.push(Relocation { index, slot });
            }
        }
    }

    /// Parses one operand token. The flag is true for label references.
    fn parse_operand(&self, token: &str) -> Result<(Operand, bool), VMError> {
        if let Some(address) = token.strip_prefix(MEMORY_PREFIX) {
            return parse_number(address)
                .map(|a| (Operand::memory(a), false))
                .ok_or_else(|| invalid_operand(token));
        }
        if let Some(index) = token.strip_prefix(REGISTER_PREFIX) {
            let available = self.program.n_gpr;
            let decimal = !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit());
            return match decimal.then(|| index.parse::<u32>().ok()).flatten() {
                Some(i) if i < available => Ok((Operand::register(i), false)),
                _ => Err(VMError::InvalidRegister {
                    token: token.to_string(),
                    available,
                }),
            };
        }
        if let Some(name) = token.strip_prefix(LABEL_PREFIX) {
            return self
                .resolve_label(name)
                .map(|index| (Operand::number(index), true));
        }
        parse_number(token)
            .map(|n| (Operand::number(n), false))
            .ok_or_else(|| invalid_operand(token))
    }
}

/// Warns about operands that are legal but cannot do what the slot implies.
fn lint_operand(opcode: Opcode, slot: usize, operand: Operand, line: &str) {
    match (opcode.roles().get(slot), operand.kind) {
        (Some(Role::Write), OperandKind::Number) => {
            warn!("`{line}`: {opcode} writes to immediate {operand} and will fault")
        }
        (Some(Role::Address), OperandKind::Register | OperandKind::Memory) => {
            warn!("`{line}`: {opcode} jumps to the raw index of {operand}, not its value")
        }
        _ => {}
    }
}

fn strip_comment(line: &str) -> &str {
    line.split(COMMENT_CHAR).next().unwrap_or_default().trim()
}

fn invalid_operand(token: &str) -> VMError {
    VMError::InvalidOperand {
        token: token.to_string(),
    }
}

fn required_argument<'a>(directive: &str, arg: Option<&'a str>) -> Result<&'a str, VMError> {
    arg.ok_or_else(|| VMError::InvalidDirectiveArgument {
        directive: directive.to_string(),
        argument: String::new(),
    })
}

fn numeric_argument(directive: &str, arg: Option<&str>) -> Result<u32, VMError> {
    let arg = required_argument(directive, arg)?;
    parse_number(arg).ok_or_else(|| VMError::InvalidDirectiveArgument {
        directive: directive.to_string(),
        argument: arg.to_string(),
    })
}

/// Splits `items` into `parts` contiguous chunks whose sizes differ by at most
/// one, longer chunks first. `parts` is clamped to `1..=items.len()`.
pub fn split_partitions<T>(items: &[T], parts: usize) -> Vec<&[T]> {
    let n = parts.clamp(1, items.len().max(1));
    let (size, extra) = (items.len() / n, items.len() % n);
    let mut chunks = Vec::with_capacity(n);
    let mut start = 0;
    for i in 0..n {
        let len = size + usize::from(i < extra);
        chunks.push(&items[start..start + len]);
        start += len;
    }
    chunks
}

/// Concatenates units in order into one program.
///
/// Each unit's label values and label-derived operands are shifted by the
/// number of instructions linked before it, then [`Program::merge`] applies.
/// Layout directives of later units override earlier ones.
pub fn link(units: Vec<AssembledUnit>) -> Program {
    let mut program = Program::new();
    for unit in units {
        let base = program.len() as u32;
        let mut part = unit.program;
        if base != 0 {
            for reloc in &unit.relocations {
                let offset = reloc.slot.value_offset();
                let word = &mut part.instructions[reloc.index];
                let mut value = [0u8; 4];
                value.copy_from_slice(&word[offset..offset + 4]);
                let rebased = u32::from_le_bytes(value).wrapping_add(base);
                word[offset..offset + 4].copy_from_slice(&rebased.to_le_bytes());
            }
            for index in part.labels.values_mut() {
                *index = index.wrapping_add(base);
            }
        }
        unit.overrides.apply(&mut program);
        program.merge(part);
    }
    program
}

/// Assembles `source` as configured by `ctx`.
///
/// With more than one worker the lines are partitioned and assembled on scoped
/// threads. All workers are joined; the error of the lowest failing partition
/// is returned and no partial program is produced.
pub fn assemble_with_context(source: &str, ctx: &AssemblyContext) -> Result<Program, VMError> {
    let lines: Vec<&str> = source.lines().collect();
    let partitions = split_partitions(&lines, ctx.workers);
    let cache_capacity = ctx.cache_capacity;

    // Each partition starts from the layout in effect at its first line.
    let mut starts = Vec::with_capacity(partitions.len());
    let mut next = 1;
    let mut layout = LayoutOverrides::default();
    for chunk in &partitions {
        starts.push((next, layout));
        next += chunk.len();
        layout.scan(chunk.iter().copied());
    }

    let units = if partitions.len() == 1 {
        vec![Assembler::new(1, cache_capacity).assemble_lines(lines.iter().copied())?]
    } else {
        let results: Vec<Result<AssembledUnit, VMError>> = thread::scope(|scope| {
            let handles: Vec<_> = partitions
                .iter()
                .zip(&starts)
                .map(|(chunk, &(first_line, seed))| {
                    scope.spawn(move || {
                        Assembler::with_layout(first_line, cache_capacity, seed)
                            .assemble_lines(chunk.iter().copied())
                    })
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(partition, handle)| {
                    handle
                        .join()
                        .unwrap_or(Err(VMError::WorkerPanicked { partition }))
                })
                .collect()
        });
        results.into_iter().collect::<Result<Vec<_>, _>>()?
    };

    debug!(
        "assembled {} lines in {} partition(s)",
        lines.len(),
        units.len()
    );
    Ok(link(units))
}

/// Assembles `source` on the calling thread with default settings.
pub fn assemble_source(source: &str) -> Result<Program, VMError> {
    assemble_with_context(source, &AssemblyContext::default())
}

/// Assembles `source` split across `workers` partitions.
pub fn assemble_parallel(source: &str, workers: usize) -> Result<Program, VMError> {
    assemble_with_context(source, &AssemblyContext::default().with_workers(workers))
}

/// Reads, preprocesses and assembles a file, logging a diagnostic on failure.
pub fn assemble_file<P: AsRef<Path>>(path: P, ctx: &AssemblyContext) -> Result<Program, VMError> {
    let name = path.as_ref().display().to_string();
    let expanded = expand_file(&path, ctx, &IncludeExpander).inspect_err(|err| {
        error!("{name}: {err}");
    })?;
    assemble_with_context(&expanded, ctx).inspect_err(|err| {
        log_assembly_error(&name, &expanded, err);
    })
}
