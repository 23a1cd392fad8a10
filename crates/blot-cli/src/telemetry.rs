//! Tracing initialisation for the blot binary.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Installs the global tracing subscriber once. Logs go to stderr so the
/// stdio transport keeps stdout for frames. Repeated calls are no-ops.
pub fn init() {
    TELEMETRY_GUARD.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .try_init();
    });
}
