//! Program image runner CLI.
//!
//! Loads a program image in either format and runs it, printing to stdout.
//!
//! # Usage
//! ```text
//! asimr <program.acb> [OPTIONS]
//! ```
//!
//! # Options
//! - `--strict`: Mask register and data memory writes to 8 bits
//! - `-l, --log-level <level>`: `debug`, `info`, `warn` or `error`

use asim::utils::log::{self, Level};
use asim::virtual_machine::program::Program;
use asim::virtual_machine::vm::{Machine, MachineConfig};
use asim::{debug, error, info};
use std::env;
use std::fs;
use std::io;
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

    let image_path = &args[1];
    let mut config = MachineConfig::default();

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--strict" => {
                config = MachineConfig::strict();
                i += 1;
            }
            k @ ("--log-level" | "-l") => {
                i += 1;
                if i >= args.len() {
                    error!("{k} requires an argument");
                    process::exit(1);
                }
                let level = Level::parse(&args[i]).unwrap_or_else(|| {
                    error!("Invalid log level: '{}'", args[i]);
                    process::exit(1);
                });
                log::set_max_level(level);
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    let bytes = fs::read(image_path).unwrap_or_else(|e| {
        error!("Failed to read {}: {}", image_path, e);
        process::exit(1);
    });

    let program = Program::load_any(&bytes).unwrap_or_else(|e| {
        error!("{e}");
        process::exit(1);
    });
    debug!(
        "{}: {} instructions compiled at {}",
        image_path,
        program.len(),
        program.compilation_time
    );

    let stdout = io::stdout();
    let mut machine = Machine::with_config(&program, stdout.lock(), config).unwrap_or_else(|e| {
        error!("{e}");
        process::exit(1);
    });

    if let Err(e) = machine.run() {
        error!("{e}");
        process::exit(1);
    }

    info!("Halted after {} instructions", machine.tc());
}

const USAGE: &str = "\
Program Runner

USAGE:
    {program} <program.acb> [OPTIONS]

ARGS:
    <program.acb>    Program image produced by asimc

OPTIONS:
        --strict              Mask register and memory writes to 8 bits
    -l, --log-level <level>   debug, info, warn or error (or set ASIM_LOG)
    -h, --help                Print this help message
";

fn print_usage(program: &str) {
    info!("{}", USAGE.replace("{program}", program));
}
