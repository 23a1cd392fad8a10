//! CLI argument definitions for the blot tool.

use std::path::PathBuf;

use clap::Parser;

/// Compiler-Explorer-style assembly inspection against your project's
/// real build flags.
#[derive(Parser, Debug)]
#[command(name = "blot", version, disable_help_subcommand = true)]
pub struct Cli {
    /// Serves the HTTP API and WebSocket endpoint on loopback.
    #[arg(long, conflicts_with = "stdio")]
    pub web: bool,

    /// Serves JSONRPC over stdio with Content-Length framing.
    #[arg(long)]
    pub stdio: bool,

    /// Port for --web mode.
    #[arg(long, default_value_t = 4242, value_name = "N")]
    pub port: u16,

    /// Path to compile_commands.json; defaults to the current directory.
    #[arg(long = "ccj", value_name = "PATH")]
    pub ccj: Option<PathBuf>,

    /// Serves static files from DIR in --web mode.
    #[arg(long, value_name = "DIR")]
    pub web_root: Option<PathBuf>,

    /// Demangles C++ symbols (the default).
    #[arg(long, overrides_with = "no_demangle")]
    pub demangle: bool,

    /// Leaves mangled symbols as-is.
    #[arg(long)]
    pub no_demangle: bool,

    /// Preserves assembler directives in the listing.
    #[arg(long)]
    pub preserve_directives: bool,

    /// Preserves comment-only lines in the listing.
    #[arg(long)]
    pub preserve_comments: bool,

    /// Source file to annotate (one-shot mode).
    #[arg(value_name = "FILE")]
    pub file: Option<String>,
}

impl Cli {
    /// Whether one-shot output should demangle; on unless --no-demangle.
    pub fn demangle_enabled(&self) -> bool {
        !self.no_demangle
    }
}
