//! Entry point for the `blot` binary.
//!
//! Mode selection: `--web` serves HTTP + WebSocket, `--stdio` serves
//! JSONRPC over stdio, a bare `FILE` runs the pipeline once and prints
//! the listing. Exit codes: 0 success, 1 usage error, 2 compile failure,
//! 3 I/O error.

mod cli;
mod oneshot;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;
use tracing::{error, info};

use blot_ccj::CcjDatabase;
use blot_core::ServerContext;
use blot_server::WebConfig;

pub use cli::Cli;
pub use oneshot::{OneShotError, OneShotOptions};

const MAIN_TARGET: &str = "blot_cli";

const EXIT_USAGE: u8 = 1;
const EXIT_COMPILE: u8 = 2;
const EXIT_IO: u8 = 3;

/// Parses arguments and runs the selected mode.
pub fn run<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error)
            if matches!(
                error.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            let _ = error.print();
            return ExitCode::SUCCESS;
        }
        Err(error) => {
            let _ = error.print();
            return ExitCode::from(EXIT_USAGE);
        }
    };

    telemetry::init();

    let Some(ccj_path) = locate_ccj(&cli) else {
        eprintln!("blot: cannot find compile_commands.json; pass --ccj <path>");
        return ExitCode::from(EXIT_USAGE);
    };

    let database = match CcjDatabase::load(&ccj_path) {
        Ok(database) => database,
        Err(error) => {
            eprintln!("blot: {error}");
            return ExitCode::from(EXIT_IO);
        }
    };
    let ctx = Arc::new(ServerContext::new(database));

    if cli.web {
        info!(target: MAIN_TARGET, port = cli.port, "starting web server");
        let config = WebConfig {
            port: cli.port,
            web_root: cli.web_root.clone(),
        };
        return match blot_server::run_web_server(ctx, config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                error!(target: MAIN_TARGET, %error, "web server failed");
                ExitCode::from(EXIT_IO)
            }
        };
    }

    if cli.stdio {
        info!(target: MAIN_TARGET, "starting stdio server");
        return match blot_server::run_stdio_server(ctx) {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                error!(target: MAIN_TARGET, %error, "stdio server failed");
                ExitCode::from(EXIT_IO)
            }
        };
    }

    if let Some(file) = &cli.file {
        let options = OneShotOptions {
            demangle: cli.demangle_enabled(),
            preserve_directives: cli.preserve_directives,
            preserve_comments: cli.preserve_comments,
        };
        return match oneshot::run(ctx, file, options) {
            Ok(lines) => {
                for line in lines {
                    println!("{line}");
                }
                ExitCode::SUCCESS
            }
            Err(OneShotError::Usage(message)) => {
                eprintln!("blot: {message}");
                ExitCode::from(EXIT_USAGE)
            }
            Err(OneShotError::Compile { message, stderr }) => {
                eprintln!("blot: {message}");
                for line in stderr {
                    eprintln!("{line}");
                }
                ExitCode::from(EXIT_COMPILE)
            }
            Err(OneShotError::Internal(message)) => {
                eprintln!("blot: {message}");
                ExitCode::from(EXIT_IO)
            }
        };
    }

    eprintln!("blot: nothing to do; pass --web, --stdio or a source file");
    ExitCode::from(EXIT_USAGE)
}

/// Picks the compilation database: `--ccj` wins, otherwise the current
/// directory is probed.
fn locate_ccj(cli: &Cli) -> Option<PathBuf> {
    if let Some(path) = &cli.ccj {
        return Some(path.clone());
    }
    let probe = PathBuf::from("compile_commands.json");
    probe.exists().then_some(probe)
}
