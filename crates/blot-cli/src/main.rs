//! The `blot` binary.

use std::process::ExitCode;

fn main() -> ExitCode {
    blot_cli::run(std::env::args_os())
}
