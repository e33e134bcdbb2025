//! Assembly to program image compiler CLI.
//!
//! Preprocesses and assembles a source file and writes the program image.
//!
//! # Usage
//! ```text
//! asimc <input.ac> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `input.ac`: Assembly source file to compile
//!
//! # Options
//! - `-o, --output <file>`: Output file path (defaults to `<input>.acb`, or `<input>.acp` with `-p`)
//! - `-j, --jobs <n>`: Number of assembler partitions (defaults to 1)
//! - `-i, --include <dir>`: Add an include directory (repeatable)
//! - `-l, --level <n>`: zstd compression level used with `-z` (defaults to 5)
//! - `--log-level <level>`: `debug`, `info`, `warn` or `error`
//! - `-z, --zstd`: Write the compressed generic image instead of the ASIM image
//! - `-p, --preprocess`: Only expand includes and write the resulting text

use asim::utils::log::{self, Level};
use asim::virtual_machine::assembler::assemble_file;
use asim::virtual_machine::preprocess::{AssemblyContext, IncludeExpander, expand_file};
use asim::{error, info};
use std::env;
use std::fs;
use std::path::Path;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    if let Some(level) = Level::from_env() {
        log::set_max_level(level);
    }

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let input_path = &args[1];
    let mut output_path: Option<String> = None;
    let mut ctx = AssemblyContext::default();
    let mut compressed = false;
    let mut preprocess_only = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            k @ ("--output" | "-o") => {
                output_path = Some(flag_value(&args, &mut i, k).to_string());
            }
            k @ ("--jobs" | "-j") => {
                let value = flag_value(&args, &mut i, k);
                let jobs = value.parse::<usize>().unwrap_or_else(|_| {
                    error!("Invalid job count: '{value}' is not a valid number");
                    process::exit(1);
                });
                if jobs == 0 {
                    error!("Job count must be greater than 0");
                    process::exit(1);
                }
                ctx = ctx.with_workers(jobs);
            }
            k @ ("--include" | "-i") => {
                ctx = ctx.with_include_dir(flag_value(&args, &mut i, k));
            }
            k @ ("--level" | "-l") => {
                let value = flag_value(&args, &mut i, k);
                ctx.compression_level = value.parse::<i32>().unwrap_or_else(|_| {
                    error!("Invalid compression level: '{value}' is not a valid number");
                    process::exit(1);
                });
            }
            k @ "--log-level" => {
                let value = flag_value(&args, &mut i, k);
                let level = Level::parse(value).unwrap_or_else(|| {
                    error!("Invalid log level: '{value}'");
                    process::exit(1);
                });
                log::set_max_level(level);
            }
            "--zstd" | "-z" => {
                compressed = true;
                i += 1;
            }
            "--preprocess" | "-p" => {
                preprocess_only = true;
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    let input = Path::new(input_path);
    if !input.exists() {
        error!("Input file does not exist: {}", input_path);
        process::exit(1);
    }

    // Includes resolve next to the source file before the working directory.
    if let Some(parent) = input.parent()
        && !parent.as_os_str().is_empty()
    {
        ctx.include_dirs.insert(0, parent.to_path_buf());
    }

    let extension = if preprocess_only { "acp" } else { "acb" };
    let output_path = output_path.unwrap_or_else(|| {
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        let parent = input.parent().unwrap_or(Path::new("."));
        parent
            .join(format!("{stem}.{extension}"))
            .to_string_lossy()
            .into_owned()
    });

    if let Some(parent) = Path::new(&output_path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        error!("Output directory does not exist: {}", parent.display());
        process::exit(1);
    }

    let bytes = if preprocess_only {
        match expand_file(input, &ctx, &IncludeExpander) {
            Ok(text) => text.into_bytes(),
            Err(e) => {
                error!("Preprocessing failed: {}", e);
                process::exit(1);
            }
        }
    } else {
        let program = match assemble_file(input, &ctx) {
            Ok(p) => p,
            Err(_) => {
                // The assembler already logged a diagnostic.
                process::exit(1);
            }
        };
        info!(
            "Assembled {} instructions, {} labels, {} includes",
            program.len(),
            program.labels.len(),
            program.includes.len()
        );
        let image = if compressed {
            program.to_compressed(ctx.compression_level)
        } else {
            program.dump()
        };
        image.unwrap_or_else(|e| {
            error!("Failed to serialize program: {}", e);
            process::exit(1);
        })
    };

    if let Err(e) = fs::write(&output_path, &bytes) {
        error!("Failed to write output file: {}", e);
        process::exit(1);
    }

    info!(
        "Compiled {} -> {} ({} bytes)",
        input_path,
        output_path,
        bytes.len()
    );
}

/// Returns the value following flag `k` and advances past both.
fn flag_value<'a>(args: &'a [String], i: &mut usize, k: &str) -> &'a str {
    *i += 1;
    if *i >= args.len() {
        error!("{k} requires an argument");
        process::exit(1);
    }
    let value = &args[*i];
    *i += 1;
    value
}

const USAGE: &str = "\
Assembler

USAGE:
    {program} <input.ac> [OPTIONS]

ARGS:
    <input.ac>    Assembly source file to compile

OPTIONS:
    -o, --output <file>       Output file path (defaults to <input>.acb)
    -j, --jobs <n>            Assemble in n partitions (defaults to 1)
    -i, --include <dir>       Add an include directory (repeatable)
    -l, --level <n>           zstd compression level for -z (defaults to 5)
        --log-level <level>   debug, info, warn or error (or set ASIM_LOG)
    -z, --zstd                Write the compressed image format
    -p, --preprocess          Only expand includes, writing <input>.acp
    -h, --help                Print this help message

EXAMPLES:
    # Compile to default output name
    {program} program.ac

    # Compile on four threads with a library directory
    {program} program.ac -j 4 -i lib

    # Compressed image at a high level
    {program} program.ac -z -l 19

    # Inspect the expanded source
    {program} program.ac -p -o program.acp
";

fn print_usage(program: &str) {
    info!("{}", USAGE.replace("{program}", program));
}
