//! One-shot pipeline: infer, compile and annotate a single file.
//!
//! Runs the same dispatcher as the long-lived transports, with a sink
//! that keeps responses and drops progress notifications. The exit-code
//! contract of the binary maps from the JSONRPC errors produced here.

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;

use blot_core::{Dispatcher, FrameSink, ServerContext, Session};

/// Failures of the one-shot pipeline, split by exit code.
#[derive(Debug, Error)]
pub enum OneShotError {
    /// Caller-side problem: bad path, unknown file. Exit code 1.
    #[error("{0}")]
    Usage(String),

    /// The compiler rejected the translation unit. Exit code 2.
    #[error("{message}")]
    Compile {
        /// Summary line.
        message: String,
        /// Compiler stderr, line by line.
        stderr: Vec<String>,
    },

    /// Anything else: unreadable files, broken pipeline. Exit code 3.
    #[error("{0}")]
    Internal(String),
}

/// Sink that keeps responses and drops notifications, as the one-shot
/// transport is allowed to.
#[derive(Default)]
struct ResponseSink {
    responses: Vec<Value>,
}

impl FrameSink for ResponseSink {
    fn send(&mut self, frame: Value) {
        if frame.get("method").is_none() {
            self.responses.push(frame);
        }
    }
}

/// Options forwarded to the annotate phase.
#[derive(Debug, Clone, Copy)]
pub struct OneShotOptions {
    pub demangle: bool,
    pub preserve_directives: bool,
    pub preserve_comments: bool,
}

/// Runs the full pipeline for `file` and returns the annotated listing.
///
/// # Errors
///
/// See [`OneShotError`] for the exit-code mapping.
pub fn run(
    ctx: Arc<ServerContext>,
    file: &str,
    options: OneShotOptions,
) -> Result<Vec<String>, OneShotError> {
    let dispatcher = Dispatcher::new(ctx);
    let mut session = Session::new();
    let mut sink = ResponseSink::default();

    let infer = call(
        &dispatcher,
        &mut session,
        &mut sink,
        1,
        "blot/infer",
        json!({ "file": file }),
    )?;
    let token = infer["token"].clone();

    call(
        &dispatcher,
        &mut session,
        &mut sink,
        2,
        "blot/grab_asm",
        json!({ "token": token }),
    )?;

    let annotated = call(
        &dispatcher,
        &mut session,
        &mut sink,
        3,
        "blot/annotate",
        json!({
            "token": token,
            "options": {
                "demangle": options.demangle,
                "preserve_directives": options.preserve_directives,
                "preserve_comments": options.preserve_comments,
            },
        }),
    )?;

    let lines = annotated["assembly"]
        .as_array()
        .ok_or_else(|| OneShotError::Internal(String::from("annotate returned no assembly")))?
        .iter()
        .filter_map(|line| line.as_str().map(str::to_owned))
        .collect();
    Ok(lines)
}

fn call(
    dispatcher: &Dispatcher,
    session: &mut Session,
    sink: &mut ResponseSink,
    id: i64,
    method: &str,
    params: Value,
) -> Result<Value, OneShotError> {
    let raw = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
    dispatcher.handle_frame(session, &raw.to_string(), sink);

    let response = sink
        .responses
        .pop()
        .ok_or_else(|| OneShotError::Internal(format!("{method} produced no response")))?;

    if let Some(error) = response.get("error") {
        return Err(classify_error(error));
    }
    response
        .get("result")
        .cloned()
        .ok_or_else(|| OneShotError::Internal(format!("{method} returned an empty response")))
}

fn classify_error(error: &Value) -> OneShotError {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_owned();

    let stderr: Vec<String> = error
        .get("data")
        .and_then(|d| d.get("stderr"))
        .and_then(Value::as_array)
        .map(|lines| {
            lines
                .iter()
                .filter_map(|l| l.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default();

    if !stderr.is_empty() {
        OneShotError::Compile { message, stderr }
    } else if code == -32602 {
        OneShotError::Usage(message)
    } else {
        OneShotError::Internal(message)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::rstest;
    use tempfile::TempDir;

    use blot_ccj::CcjDatabase;

    use super::*;

    const FAKE_CC: &str = r#"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; shift; fi
  shift
done
cat > "$out" <<EOF
	.text
	.file 0 "$PWD" "source.cpp"
	.globl	main
	.type	main, @function
main:
	.loc 0 1 1
	ret
	.cfi_endproc
EOF
"#;

    fn context(dir: &TempDir) -> Arc<ServerContext> {
        fs::write(dir.path().join("source.cpp"), "int main() {}\n").expect("source");
        fs::write(dir.path().join("fake-cc.sh"), FAKE_CC).expect("script");
        fs::write(
            dir.path().join("compile_commands.json"),
            r#"[{"file":"source.cpp","directory":".","command":"sh fake-cc.sh -c source.cpp"}]"#,
        )
        .expect("ccj");
        let db = CcjDatabase::load(&dir.path().join("compile_commands.json")).expect("load");
        Arc::new(ServerContext::new(db))
    }

    const DEFAULT_OPTIONS: OneShotOptions = OneShotOptions {
        demangle: true,
        preserve_directives: false,
        preserve_comments: false,
    };

    #[rstest]
    fn produces_annotated_listing() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = context(&dir);

        let lines = run(ctx, "source.cpp", DEFAULT_OPTIONS).expect("pipeline");

        assert!(lines.iter().any(|l| l == "main:"));
    }

    #[rstest]
    fn unknown_file_is_a_usage_error() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = context(&dir);

        let result = run(ctx, "missing.cpp", DEFAULT_OPTIONS);

        assert!(matches!(result, Err(OneShotError::Usage(_))));
    }

    #[rstest]
    fn compiler_failure_is_a_compile_error() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("source.cpp"), "int main() {}\n").expect("source");
        fs::write(
            dir.path().join("fake-cc.sh"),
            "echo 'source.cpp:1:1: error: no' >&2\nexit 1\n",
        )
        .expect("script");
        fs::write(
            dir.path().join("compile_commands.json"),
            r#"[{"file":"source.cpp","directory":".","command":"sh fake-cc.sh -c source.cpp"}]"#,
        )
        .expect("ccj");
        let db = CcjDatabase::load(&dir.path().join("compile_commands.json")).expect("load");
        let ctx = Arc::new(ServerContext::new(db));

        let result = run(ctx, "source.cpp", DEFAULT_OPTIONS);

        match result {
            Err(OneShotError::Compile { stderr, .. }) => {
                assert!(stderr.iter().any(|l| l.contains("error: no")));
            }
            other => panic!("expected Compile error, got {other:?}"),
        }
    }
}
