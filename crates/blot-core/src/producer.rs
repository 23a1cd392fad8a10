//! Assembly production: running the compiler.
//!
//! The producer takes a canonical inference, appends `-o <temp>` to its
//! argv, runs the compiler in the inference's directory, and returns the
//! text the compiler wrote to the temp file. The temp file is removed on
//! every path, including failures; stderr is captured for error
//! reporting. A wall-clock timeout bounds runaway compiles.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::inference::Inference;

const PRODUCER_TARGET: &str = "blot_core::producer";

/// Wall-clock bound on one compiler run.
pub const COMPILE_TIMEOUT: Duration = Duration::from_secs(60);

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Cooperative abort signal for in-flight compiles.
///
/// A transport sets the flag when its connection closes; the producer
/// polls it while waiting on the compiler and kills the process once set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Requests cancellation of any compile holding this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Produced assembly plus the argv that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmArtifact {
    /// Raw assembler text read back from the compiler's output file.
    pub raw_text: String,
    /// The argv actually executed, including the `-o <temp>` pair.
    pub effective_command: Vec<String>,
}

/// Failures while producing assembly.
#[derive(Debug, Error)]
pub enum ProduceError {
    /// The inference carried an empty argv.
    #[error("inference has an empty compilation command")]
    EmptyCommand,

    /// The compiler process could not be started.
    #[error("failed to start compiler '{program}': {source}")]
    Spawn {
        /// Program that was invoked.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The compiler exited non-zero.
    #[error("compiler exited with status {status}")]
    CompileFailed {
        /// Process exit status, -1 when killed by a signal.
        status: i32,
        /// Captured stderr.
        stderr: String,
        /// The argv that was executed.
        effective_command: Vec<String>,
    },

    /// The compiler exceeded the wall-clock timeout.
    #[error("compiler timed out after {timeout_secs}s")]
    Timeout {
        /// The bound that was exceeded.
        timeout_secs: u64,
        /// The argv that was executed.
        effective_command: Vec<String>,
    },

    /// The output file could not be read back.
    #[error("failed to read compiler output {path}: {source}")]
    ReadOutput {
        /// Temp path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The transport closed while the compile was in flight.
    #[error("compile aborted: session closed")]
    Cancelled,
}

/// Removes the temp file when the production attempt ends, however it
/// ends.
struct TempFileGuard<'a>(&'a Path);

impl Drop for TempFileGuard<'_> {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(self.0) {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    target: PRODUCER_TARGET,
                    path = %self.0.display(),
                    %error,
                    "failed to remove temp assembly file"
                );
            }
        }
    }
}

/// Runs the compiler described by `inference`, writing assembly to
/// `temp_path` and returning it.
///
/// # Errors
///
/// Non-zero exit and timeout both surface with the captured stderr and
/// the effective argv so callers can report the real invocation.
pub fn produce(
    inference: &Inference,
    temp_path: &Path,
    cancel: &CancelToken,
) -> Result<AsmArtifact, ProduceError> {
    let mut effective: Vec<String> = inference.compilation_command.clone();
    if effective.is_empty() {
        return Err(ProduceError::EmptyCommand);
    }
    effective.push(String::from("-o"));
    effective.push(temp_path.display().to_string());

    debug!(
        target: PRODUCER_TARGET,
        command = ?effective,
        directory = %inference.compilation_directory.display(),
        "running compiler"
    );

    let _guard = TempFileGuard(temp_path);

    let mut child = Command::new(&effective[0])
        .args(&effective[1..])
        .current_dir(&inference.compilation_directory)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ProduceError::Spawn {
            program: effective[0].clone(),
            source,
        })?;

    // Drain both pipes on their own threads so a chatty compiler cannot
    // block on a full pipe buffer while we wait for it.
    let stdout_reader = child.stdout.take().map(spawn_drain);
    let stderr_reader = child.stderr.take().map(spawn_drain);

    let status = match wait_with_timeout(&mut child, COMPILE_TIMEOUT, cancel) {
        Ok(status) => status,
        Err(WaitAbort::Cancelled) => return Err(ProduceError::Cancelled),
        Err(WaitAbort::TimedOut) => {
            return Err(ProduceError::Timeout {
                timeout_secs: COMPILE_TIMEOUT.as_secs(),
                effective_command: effective,
            });
        }
    };

    let _stdout = join_drain(stdout_reader);
    let stderr = join_drain(stderr_reader);

    if !status.success() {
        return Err(ProduceError::CompileFailed {
            status: status.code().unwrap_or(-1),
            stderr,
            effective_command: effective,
        });
    }

    let raw_text = fs::read_to_string(temp_path).map_err(|source| ProduceError::ReadOutput {
        path: temp_path.to_path_buf(),
        source,
    })?;

    debug!(
        target: PRODUCER_TARGET,
        bytes = raw_text.len(),
        "compiler produced assembly"
    );
    Ok(AsmArtifact {
        raw_text,
        effective_command: effective,
    })
}

fn spawn_drain(mut pipe: impl Read + Send + 'static) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = String::new();
        let _ = pipe.read_to_string(&mut buffer);
        buffer
    })
}

fn join_drain(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

enum WaitAbort {
    TimedOut,
    Cancelled,
}

/// Waits for the child, killing it on timeout or cancellation.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<std::process::ExitStatus, WaitAbort> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if cancel.is_cancelled() {
                    warn!(target: PRODUCER_TARGET, "session closed, killing compiler");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(WaitAbort::Cancelled);
                }
                if start.elapsed() > timeout {
                    warn!(
                        target: PRODUCER_TARGET,
                        timeout_secs = timeout.as_secs(),
                        "compiler timed out, killing process"
                    );
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(WaitAbort::TimedOut);
                }
                thread::sleep(WAIT_POLL_INTERVAL);
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(WaitAbort::TimedOut);
            }
        }
    }
}
