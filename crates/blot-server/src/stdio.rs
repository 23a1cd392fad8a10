//! Stdio transport with LSP-style header framing.
//!
//! Messages are framed as:
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <payload>
//! ```
//!
//! One process hosts one session. The loop reads frames until EOF or an
//! `exit` notification, dispatching each through the shared dispatcher
//! and writing responses (and progress notifications) back to stdout in
//! order.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use blot_core::{Dispatcher, FrameSink, Outcome, ServerContext, Session};

const STDIO_TARGET: &str = "blot_server::stdio";

/// Framing failures on the stdio transport.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The header block ended without a `Content-Length` header.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// A `Content-Length` header carried a non-numeric value.
    #[error("invalid Content-Length header")]
    InvalidHeader,

    /// The underlying stream failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Writes one framed message.
///
/// # Errors
///
/// Propagates I/O failures from the writer.
pub fn write_frame<W: Write>(mut writer: W, payload: &[u8]) -> Result<(), FramingError> {
    write!(writer, "Content-Length: {}\r\n\r\n", payload.len())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Reads one framed message. Returns `Ok(None)` on a clean EOF at a
/// frame boundary.
///
/// # Errors
///
/// Fails on truncated frames, malformed headers, or stream errors.
pub fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>, FramingError> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            if content_length.is_none() {
                return Ok(None);
            }
            return Err(FramingError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed while reading headers",
            )));
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed.strip_prefix("Content-Length:") {
            content_length = Some(
                value
                    .trim()
                    .parse()
                    .map_err(|_| FramingError::InvalidHeader)?,
            );
        }
    }

    let length = content_length.ok_or(FramingError::MissingContentLength)?;
    let mut payload = vec![0_u8; length];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}

/// Frame sink that writes Content-Length frames to a writer.
struct StdioSink<W: Write> {
    writer: W,
}

impl<W: Write> FrameSink for StdioSink<W> {
    fn send(&mut self, frame: Value) {
        let payload = frame.to_string();
        if let Err(error) = write_frame(&mut self.writer, payload.as_bytes()) {
            warn!(target: STDIO_TARGET, %error, "failed to write frame");
        }
    }
}

/// Runs the stdio server loop over arbitrary streams until EOF or `exit`.
///
/// # Errors
///
/// Returns framing errors other than clean EOF; malformed JSON inside a
/// well-formed frame is answered on the wire instead.
pub fn serve_streams<R: Read, W: Write>(
    ctx: Arc<ServerContext>,
    input: R,
    output: W,
) -> Result<(), FramingError> {
    let dispatcher = Dispatcher::new(ctx);
    let mut session = Session::new();
    let mut reader = BufReader::new(input);
    let mut sink = StdioSink { writer: output };

    info!(
        target: STDIO_TARGET,
        session = session.id(),
        "stdio session started"
    );

    loop {
        let Some(payload) = read_frame(&mut reader)? else {
            debug!(target: STDIO_TARGET, "stdio reached EOF");
            break;
        };
        let text = String::from_utf8_lossy(&payload);
        if dispatcher.handle_frame(&mut session, &text, &mut sink) == Outcome::Exit {
            break;
        }
    }

    info!(
        target: STDIO_TARGET,
        session = session.id(),
        "stdio session ended"
    );
    Ok(())
}

/// Runs the stdio server over this process's stdin and stdout.
///
/// # Errors
///
/// See [`serve_streams`].
pub fn run_stdio_server(ctx: Arc<ServerContext>) -> Result<(), FramingError> {
    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    serve_streams(ctx, stdin, stdout)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;

    use rstest::rstest;
    use serde_json::json;
    use tempfile::TempDir;

    use blot_ccj::CcjDatabase;

    use super::*;

    #[rstest]
    fn frames_round_trip() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, br#"{"jsonrpc":"2.0"}"#).expect("write");

        let mut reader = Cursor::new(buffer);
        let payload = read_frame(&mut reader).expect("read").expect("frame");

        assert_eq!(payload, br#"{"jsonrpc":"2.0"}"#);
    }

    #[rstest]
    fn write_prefixes_content_length() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"hello").expect("write");

        let text = String::from_utf8(buffer).expect("utf8");
        assert!(text.starts_with("Content-Length: 5\r\n\r\n"));
        assert!(text.ends_with("hello"));
    }

    #[rstest]
    fn read_skips_extra_headers() {
        let input = b"Content-Length: 4\r\nContent-Type: application/json\r\n\r\ntest";
        let mut reader = Cursor::new(input.to_vec());

        let payload = read_frame(&mut reader).expect("read").expect("frame");

        assert_eq!(payload, b"test");
    }

    #[rstest]
    fn read_reports_missing_content_length() {
        let input = b"Content-Type: application/json\r\n\r\ntest";
        let mut reader = Cursor::new(input.to_vec());

        let result = read_frame(&mut reader);

        assert!(matches!(result, Err(FramingError::MissingContentLength)));
    }

    #[rstest]
    fn read_reports_invalid_content_length() {
        let input = b"Content-Length: lots\r\n\r\ntest";
        let mut reader = Cursor::new(input.to_vec());

        let result = read_frame(&mut reader);

        assert!(matches!(result, Err(FramingError::InvalidHeader)));
    }

    #[rstest]
    fn read_returns_none_on_clean_eof() {
        let mut reader = Cursor::new(Vec::new());
        assert!(read_frame(&mut reader).expect("read").is_none());
    }

    #[rstest]
    fn read_reports_truncated_payload() {
        let input = b"Content-Length: 10\r\n\r\nshort";
        let mut reader = Cursor::new(input.to_vec());

        let result = read_frame(&mut reader);

        assert!(matches!(result, Err(FramingError::Io(_))));
    }

    fn test_context() -> (TempDir, Arc<ServerContext>) {
        let dir = TempDir::new().expect("tempdir");
        fs::write(
            dir.path().join("compile_commands.json"),
            r#"[{"file":"source.cpp","directory":".","command":"g++ -c source.cpp"}]"#,
        )
        .expect("ccj");
        let db = CcjDatabase::load(&dir.path().join("compile_commands.json")).expect("load");
        let ctx = Arc::new(ServerContext::new(db));
        (dir, ctx)
    }

    fn frame_bytes(value: &serde_json::Value) -> Vec<u8> {
        let mut out = Vec::new();
        write_frame(&mut out, value.to_string().as_bytes()).expect("frame");
        out
    }

    #[rstest]
    fn serves_initialize_then_exit() {
        let (_dir, ctx) = test_context();

        let mut input = Vec::new();
        input.extend(frame_bytes(
            &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
        ));
        input.extend(frame_bytes(&json!({"jsonrpc": "2.0", "method": "exit"})));

        let mut output = Vec::new();
        serve_streams(ctx, Cursor::new(input), &mut output).expect("serve");

        let mut reader = Cursor::new(output);
        let payload = read_frame(&mut reader).expect("read").expect("frame");
        let response: serde_json::Value = serde_json::from_slice(&payload).expect("json");
        assert_eq!(response["result"]["serverInfo"]["name"], json!("blot"));
    }

    #[rstest]
    fn malformed_json_gets_null_id_error() {
        let (_dir, ctx) = test_context();

        let mut input = Vec::new();
        write_frame(&mut input, b"{oops").expect("frame");

        let mut output = Vec::new();
        serve_streams(ctx, Cursor::new(input), &mut output).expect("serve");

        let mut reader = Cursor::new(output);
        let payload = read_frame(&mut reader).expect("read").expect("frame");
        let response: serde_json::Value = serde_json::from_slice(&payload).expect("json");
        assert_eq!(response["id"], serde_json::Value::Null);
        assert_eq!(response["error"]["code"], json!(-32700));
    }
}
