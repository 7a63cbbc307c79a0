//! Bang! interpreter entry point.
//!
//! Argument grammar (spec.md §6, SPEC_FULL.md §4.11):
//! `bang [--dump] [-i] [FILE] [-- ARGS...]`. No filename starts the REPL;
//! `--dump` prints each parsed top-level program's AST to stderr; a
//! trailing `--` separates runtime flags from arguments a `.bang` program
//! itself could read (not yet surfaced to running programs — no library
//! exposes an `argv` primitive in this crate — but the CLI still parses
//! and retains them for a future library module to pick up).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;
use log::info;

use bang_lang::{run_file, BANG_VERSION};

#[derive(ClapParser, Debug)]
#[command(name = "bang", version = BANG_VERSION, about = "Bang! - a small stack-oriented language")]
struct Cli {
    /// Print each parsed program's AST to stderr before running it.
    #[arg(long = "dump")]
    dump: bool,

    /// Start the interactive REPL even if a file is also given.
    #[arg(short = 'i')]
    interactive: bool,

    /// Source file to run. If omitted, the REPL starts.
    file: Option<PathBuf>,

    /// Arguments forwarded after a literal `--`, for the running program.
    #[arg(last = true)]
    program_args: Vec<String>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    if cli.file.is_none() || cli.interactive {
        info!("starting REPL (v{})", BANG_VERSION);
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        bang_lang::repl::run_repl(base_dir);
        return ExitCode::SUCCESS;
    }

    let path = cli.file.expect("checked above");
    info!("loading {}", path.display());
    match run_file(&path, cli.dump) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
