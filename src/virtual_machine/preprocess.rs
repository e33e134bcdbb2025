//! Boundary with the template preprocessor.
//!
//! The assembler consumes fully expanded text. Expansion is done by a
//! [`Preprocessor`] that receives an explicit [`AssemblyContext`] instead of
//! reading process-wide settings. [`IncludeExpander`] is the built-in
//! implementation and only understands `{include("name")}`.

use crate::debug;
use crate::utils::base85;
use crate::utils::cache::DEFAULT_CAPACITY;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::program::{DEFAULT_COMPRESSION_LEVEL, Program};
use std::fs;
use std::path::{Path, PathBuf};

/// Extensions tried, in order, when an include name has none of them.
pub const SOURCE_EXTENSIONS: [&str; 3] = ["ac", "acb", "acp"];

/// Line that closes a textual include block.
pub const END_INCLUDE_MARKER: &str = ";! end_include";

/// Options shared by preprocessing and assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyContext {
    /// Directories searched for included files, in order.
    pub include_dirs: Vec<PathBuf>,
    /// Number of partitions assembled concurrently.
    pub workers: usize,
    /// Entries kept in each unit's line cache.
    pub cache_capacity: usize,
    /// zstd level used when writing generic images.
    pub compression_level: i32,
}

impl Default for AssemblyContext {
    fn default() -> Self {
        Self {
            include_dirs: vec![PathBuf::from(".")],
            workers: 1,
            cache_capacity: DEFAULT_CAPACITY,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl AssemblyContext {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }
}

/// Expands template source into assembler input.
pub trait Preprocessor {
    fn expand(&self, source: &str, ctx: &AssemblyContext) -> Result<String, VMError>;
}

/// Preprocessor that substitutes `{include("name")}` calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct IncludeExpander;

const INCLUDE_OPEN: &str = "{include(\"";
const INCLUDE_CLOSE: &str = "\")}";

impl Preprocessor for IncludeExpander {
    fn expand(&self, source: &str, ctx: &AssemblyContext) -> Result<String, VMError> {
        let mut out = String::with_capacity(source.len());
        let mut rest = source;
        while let Some(start) = rest.find(INCLUDE_OPEN) {
            let after = &rest[start + INCLUDE_OPEN.len()..];
            let Some(end) = after.find(INCLUDE_CLOSE) else {
                break;
            };
            out.push_str(&rest[..start]);
            out.push_str(&resolve_include(&after[..end], ctx)?);
            rest = &after[end + INCLUDE_CLOSE.len()..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Reads `path` and expands it with `preprocessor`.
pub fn expand_file<P: AsRef<Path>>(
    path: P,
    ctx: &AssemblyContext,
    preprocessor: &impl Preprocessor,
) -> Result<String, VMError> {
    let path = path.as_ref();
    let source =
        fs::read_to_string(path).map_err(|e| VMError::io(path.display().to_string(), e))?;
    preprocessor.expand(&source, ctx)
}

/// Finds `name` in the include directories.
///
/// The bare name is tried first, then each of [`SOURCE_EXTENSIONS`] unless
/// the name already carries one.
pub fn find_include(name: &str, ctx: &AssemblyContext) -> Option<PathBuf> {
    let has_extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e));

    ctx.include_dirs.iter().find_map(|dir| {
        let base = dir.join(name);
        if base.is_file() {
            return Some(base);
        }
        if has_extension {
            return None;
        }
        SOURCE_EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{name}.{ext}")))
            .find(|candidate| candidate.is_file())
    })
}

/// Returns the assembler text that splices in the include `name`.
///
/// A compiled image becomes one `.include_zstd <path> <base85>` directive;
/// any other file is inlined between `.include_file <path>` and an
/// end-of-include comment.
pub fn resolve_include(name: &str, ctx: &AssemblyContext) -> Result<String, VMError> {
    let path = find_include(name, ctx).ok_or_else(|| VMError::IncludeNotFound {
        name: name.to_string(),
    })?;
    let display = path.display().to_string();
    let bytes = fs::read(&path).map_err(|e| VMError::io(&display, e))?;

    if Program::is_image(&bytes) {
        debug!("including compiled image {display} ({} bytes)", bytes.len());
        return Ok(format!(".include_zstd {display} {}\n", base85::encode(&bytes)));
    }

    let text = String::from_utf8(bytes).map_err(|_| VMError::Io {
        context: display.clone(),
        reason: "file is neither a program image nor UTF-8 text".into(),
    })?;
    debug!("including source {display}");
    Ok(format!(
        ".include_file {display}\n{text}\n{END_INCLUDE_MARKER} {display}"
    ))
}
