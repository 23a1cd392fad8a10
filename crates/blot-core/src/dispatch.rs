//! JSONRPC dispatch and the `blot/*` method handlers.
//!
//! One [`Dispatcher`] serves every transport. Transports parse their
//! framing, hand each raw payload to [`Dispatcher::handle_frame`]
//! together with the connection's [`Session`] and a [`FrameSink`], and
//! write whatever the sink receives back to the peer in order. Progress
//! notifications always precede the response they belong to because both
//! travel through the same sink.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::context::ServerContext;
use crate::inference::{self, CacheHit, InferParams, Inference, ResolveError};
use crate::jsonrpc::{self, FrameError, RpcError, Request};
use crate::options::AnnotateOptions;
use crate::producer::{self, ProduceError};
use crate::session::{Session, Token};

const DISPATCH_TARGET: &str = "blot_core::dispatch";

/// Where dispatched frames go. Implementations write to the transport;
/// the one-shot transport may drop notifications.
pub trait FrameSink {
    /// Sends one JSONRPC message to the peer. Failures are the
    /// transport's to report; the dispatcher does not retry.
    fn send(&mut self, frame: Value);
}

/// What the transport loop should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Keep reading.
    Continue,
    /// The peer asked to exit; close the transport.
    Exit,
}

/// Routes JSONRPC requests to method handlers over a session.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    ctx: Arc<ServerContext>,
}

impl Dispatcher {
    /// Creates a dispatcher over shared server state.
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    /// The shared server state.
    pub fn context(&self) -> &ServerContext {
        &self.ctx
    }

    /// Handles one raw frame: parses, routes, replies through `sink`.
    pub fn handle_frame(
        &self,
        session: &mut Session,
        raw: &str,
        sink: &mut dyn FrameSink,
    ) -> Outcome {
        let request = match jsonrpc::parse_request(raw) {
            Ok(request) => request,
            Err(FrameError::Parse) => {
                sink.send(jsonrpc::make_error(
                    &Value::Null,
                    &RpcError {
                        code: jsonrpc::PARSE_ERROR,
                        message: String::from("parse error"),
                        data: None,
                    },
                ));
                return Outcome::Continue;
            }
            Err(FrameError::Invalid { id }) => {
                sink.send(jsonrpc::make_error(
                    &id.unwrap_or(Value::Null),
                    &RpcError {
                        code: jsonrpc::INVALID_REQUEST,
                        message: String::from("invalid request"),
                        data: None,
                    },
                ));
                return Outcome::Continue;
            }
        };

        if request.method == "exit" {
            debug!(target: DISPATCH_TARGET, session = session.id(), "exit requested");
            return Outcome::Exit;
        }

        let Some(id) = request.id.clone() else {
            debug!(
                target: DISPATCH_TARGET,
                method = %request.method,
                "ignoring notification"
            );
            return Outcome::Continue;
        };

        debug!(
            target: DISPATCH_TARGET,
            session = session.id(),
            method = %request.method,
            "dispatching request"
        );

        match request.method.as_str() {
            "initialize" => self.handle_initialize(&id, sink),
            "shutdown" => sink.send(jsonrpc::make_result(&id, json!({}))),
            "blot/infer" => self.handle_infer(session, &id, &request, sink),
            "blot/grab_asm" => self.handle_grab_asm(session, &id, &request, sink),
            "blot/annotate" => self.handle_annotate(session, &id, &request, sink),
            other => sink.send(jsonrpc::make_error(&id, &RpcError::method_not_found(other))),
        }
        Outcome::Continue
    }

    fn handle_initialize(&self, id: &Value, sink: &mut dyn FrameSink) {
        sink.send(jsonrpc::make_result(
            id,
            json!({
                "serverInfo": {
                    "name": "blot",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "ccj": self.ctx.ccj_path().display().to_string(),
                "project_root": self.ctx.project_root().display().to_string(),
            }),
        ));
    }

    fn handle_infer(
        &self,
        session: &mut Session,
        id: &Value,
        request: &Request,
        sink: &mut dyn FrameSink,
    ) {
        let progress = Progress::begin(sink, id, "infer");

        let params = match parse_infer_params(request.params.as_ref()) {
            Ok(params) => params,
            Err(error) => return fail(sink, progress, id, &error),
        };

        match inference::resolve(params, session, self.ctx.database()) {
            Ok(resolution) => {
                progress.finish(sink, terminal_status(resolution.cached));
                sink.send(jsonrpc::make_result(
                    id,
                    json!({
                        "token": resolution.token,
                        "inference": inference_json(&resolution.inference),
                        "cached": resolution.cached.to_json(),
                    }),
                ));
            }
            Err(error) => fail(sink, progress, id, &resolve_error(error)),
        }
    }

    fn handle_grab_asm(
        &self,
        session: &mut Session,
        id: &Value,
        request: &Request,
        sink: &mut dyn FrameSink,
    ) {
        let progress = Progress::begin(sink, id, "grab_asm");

        let (token, inference) = match self.grab_asm_inference(session, request) {
            Ok(GrabSource::CachedByToken(token)) => {
                let Some(artifact) = session.asm_cache_1.get(&token) else {
                    return fail(
                        sink,
                        progress,
                        id,
                        &RpcError::internal("asm cache lost a token entry"),
                    );
                };
                progress.finish(sink, "cached");
                sink.send(jsonrpc::make_result(
                    id,
                    json!({
                        "token": token,
                        "compilation_command": artifact.effective_command,
                        "cached": "token",
                    }),
                ));
                return;
            }
            Ok(GrabSource::Resolved { token, inference }) => (token, inference),
            Err(error) => return fail(sink, progress, id, &error),
        };

        let key = inference.canonical_key();
        if let Some(&prior) = session.asm_cache_2.get(&key) {
            if let Some(artifact) = session.asm_cache_1.get(&prior) {
                progress.finish(sink, "cached");
                sink.send(jsonrpc::make_result(
                    id,
                    json!({
                        "token": prior,
                        "compilation_command": artifact.effective_command,
                        "cached": "other",
                    }),
                ));
                return;
            }
        }

        let temp_path = session.temp_asm_path(token);
        let cancel = session.cancel_token();
        match producer::produce(&inference, &temp_path, &cancel) {
            Ok(artifact) => {
                let command = artifact.effective_command.clone();
                session.asm_cache_1.insert(token, artifact);
                session.asm_cache_2.insert(key, token);
                progress.finish(sink, "done");
                sink.send(jsonrpc::make_result(
                    id,
                    json!({
                        "token": token,
                        "compilation_command": command,
                        "cached": false,
                    }),
                ));
            }
            Err(error) => fail(sink, progress, id, &produce_error(error)),
        }
    }

    /// Resolves the `token`/`inference` parameter of `blot/grab_asm` to
    /// something the producer can run, or reports a token-level cache hit.
    fn grab_asm_inference(
        &self,
        session: &mut Session,
        request: &Request,
    ) -> Result<GrabSource, RpcError> {
        let params = request.params.as_ref().and_then(Value::as_object);

        let token_param = params.and_then(|p| p.get("token"));
        let inference_param = params.and_then(|p| p.get("inference"));

        match (token_param, inference_param) {
            (Some(token), None) => {
                let token = parse_token(token)?;
                if session.asm_cache_1.contains_key(&token) {
                    return Ok(GrabSource::CachedByToken(token));
                }
                let inference = session
                    .infer_cache_1
                    .get(&token)
                    .cloned()
                    .ok_or_else(|| {
                        RpcError::invalid_params(format!("token {token} not found in infer cache"))
                    })?;
                Ok(GrabSource::Resolved { token, inference })
            }
            (None, Some(value)) => {
                let explicit = parse_explicit_inference(value)?;
                let resolution =
                    inference::resolve(InferParams::Explicit(explicit), session, self.ctx.database())
                        .map_err(resolve_error)?;
                Ok(GrabSource::Resolved {
                    token: resolution.token,
                    inference: resolution.inference,
                })
            }
            _ => Err(RpcError::invalid_params("missing 'token' or 'inference'")),
        }
    }

    fn handle_annotate(
        &self,
        session: &mut Session,
        id: &Value,
        request: &Request,
        sink: &mut dyn FrameSink,
    ) {
        let progress = Progress::begin(sink, id, "annotate");

        let params = request.params.as_ref().and_then(Value::as_object);
        let options = AnnotateOptions::from_json(params.and_then(|p| p.get("options")));

        let token_param = params.and_then(|p| p.get("token"));
        let blob_param = params.and_then(|p| p.get("asm_blob")).and_then(Value::as_str);

        if let Some(token) = token_param {
            let token = match parse_token(token) {
                Ok(token) => token,
                Err(error) => return fail(sink, progress, id, &error),
            };
            return self.annotate_token(session, id, token, options, progress, sink);
        }

        if let Some(blob) = blob_param {
            let filter_options = options.to_filter_options();
            return match blot_asm::annotate(blob, &filter_options, None) {
                Ok(annotated) => {
                    progress.finish(sink, "done");
                    sink.send(jsonrpc::make_result(
                        id,
                        json!({
                            "assembly": annotated.lines,
                            "line_mappings": annotated.line_mappings,
                            "cached": false,
                        }),
                    ));
                }
                Err(error) => fail(sink, progress, id, &RpcError::internal(error.to_string())),
            };
        }

        fail(
            sink,
            progress,
            id,
            &RpcError::invalid_params("missing 'token' or 'asm_blob'"),
        );
    }

    fn annotate_token(
        &self,
        session: &mut Session,
        id: &Value,
        token: Token,
        options: AnnotateOptions,
        progress: Progress,
        sink: &mut dyn FrameSink,
    ) {
        if let Some(annotated) = session.annotate_cache_1.get(&(token, options)) {
            let body = annotate_result(Some(token), annotated, "token");
            progress.finish(sink, "cached");
            sink.send(jsonrpc::make_result(id, body));
            return;
        }

        let Some(artifact) = session.asm_cache_1.get(&token) else {
            return fail(
                sink,
                progress,
                id,
                &RpcError::invalid_params(format!("token {token} not found in asm cache")),
            );
        };

        let target = session
            .infer_cache_1
            .get(&token)
            .map(Inference::absolute_target);

        match blot_asm::annotate(
            &artifact.raw_text,
            &options.to_filter_options(),
            target.as_deref(),
        ) {
            Ok(annotated) => {
                let body = annotate_result(Some(token), &annotated, "miss");
                session.annotate_cache_1.insert((token, options), annotated);
                progress.finish(sink, "done");
                sink.send(jsonrpc::make_result(id, body));
            }
            Err(error) => fail(sink, progress, id, &RpcError::internal(error.to_string())),
        }
    }
}

/// Outcome of grab_asm parameter resolution.
enum GrabSource {
    /// The token already has produced assembly.
    CachedByToken(Token),
    /// An inference to (maybe) compile under `token`.
    Resolved { token: Token, inference: Inference },
}

/// In-flight progress reporting for one request.
///
/// Every `blot/*` request emits exactly two `blot/progress` frames: a
/// `running` frame before any work and a terminal frame with
/// `elapsed_ms` once the outcome is known.
struct Progress {
    request_id: Value,
    phase: &'static str,
    started: Instant,
}

impl Progress {
    fn begin(sink: &mut dyn FrameSink, request_id: &Value, phase: &'static str) -> Self {
        sink.send(jsonrpc::make_notification(
            "blot/progress",
            json!({
                "request_id": request_id,
                "phase": phase,
                "status": "running",
            }),
        ));
        Self {
            request_id: request_id.clone(),
            phase,
            started: Instant::now(),
        }
    }

    fn finish(self, sink: &mut dyn FrameSink, status: &str) {
        let elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        sink.send(jsonrpc::make_notification(
            "blot/progress",
            json!({
                "request_id": self.request_id,
                "phase": self.phase,
                "status": status,
                "elapsed_ms": elapsed_ms,
            }),
        ));
    }
}

/// Emits the terminal error frame and the error response, in that order.
fn fail(sink: &mut dyn FrameSink, progress: Progress, id: &Value, error: &RpcError) {
    warn!(
        target: DISPATCH_TARGET,
        code = error.code,
        message = %error.message,
        "request failed"
    );
    progress.finish(sink, "error");
    sink.send(jsonrpc::make_error(id, error));
}

fn terminal_status(hit: CacheHit) -> &'static str {
    match hit {
        CacheHit::Miss => "done",
        CacheHit::Token | CacheHit::Other => "cached",
    }
}

fn inference_json(inference: &Inference) -> Value {
    json!({
        "compilation_command": inference.compilation_command,
        "compilation_directory": inference.compilation_directory.display().to_string(),
        "annotation_target": inference.annotation_target.display().to_string(),
    })
}

fn annotate_result(token: Option<Token>, annotated: &blot_asm::AnnotatedAsm, hit: &str) -> Value {
    let cached = match hit {
        "token" => json!("token"),
        "other" => json!("other"),
        _ => json!(false),
    };
    let mut body = json!({
        "assembly": annotated.lines,
        "line_mappings": annotated.line_mappings,
        "cached": cached,
    });
    if let (Some(token), Some(object)) = (token, body.as_object_mut()) {
        object.insert(String::from("token"), json!(token));
    }
    body
}

fn parse_token(value: &Value) -> Result<Token, RpcError> {
    value
        .as_i64()
        .ok_or_else(|| RpcError::invalid_params("'token' must be an integer"))
}

fn parse_infer_params(params: Option<&Value>) -> Result<InferParams, RpcError> {
    let object = params
        .and_then(Value::as_object)
        .ok_or_else(|| RpcError::invalid_params("missing 'file', 'token' or 'inference'"))?;

    let file = object.get("file");
    let token = object.get("token");
    let explicit = object.get("inference");

    match (file, token, explicit) {
        (Some(file), None, None) => {
            let file = file
                .as_str()
                .ok_or_else(|| RpcError::invalid_params("'file' must be a string"))?;
            Ok(InferParams::File(file.to_owned()))
        }
        (None, Some(token), None) => Ok(InferParams::Token(parse_token(token)?)),
        (None, None, Some(value)) => Ok(InferParams::Explicit(parse_explicit_inference(value)?)),
        (None, None, None) => {
            Err(RpcError::invalid_params("missing 'file', 'token' or 'inference'"))
        }
        _ => Err(RpcError::invalid_params(
            "supply exactly one of 'file', 'token' or 'inference'",
        )),
    }
}

fn parse_explicit_inference(value: &Value) -> Result<Inference, RpcError> {
    serde_json::from_value(value.clone()).map_err(|_| {
        RpcError::invalid_params(
            "inference must carry compilation_command, compilation_directory and annotation_target",
        )
    })
}

fn resolve_error(error: ResolveError) -> RpcError {
    match &error {
        ResolveError::InvalidCommand { .. } => RpcError::internal(error.to_string()),
        _ => RpcError::invalid_params(error.to_string()),
    }
}

fn produce_error(error: ProduceError) -> RpcError {
    match error {
        ProduceError::CompileFailed {
            status,
            stderr,
            effective_command,
        } => {
            let lines: Vec<&str> = stderr.lines().collect();
            RpcError::internal(format!("compiler exited with status {status}")).with_data(json!({
                "stderr": lines,
                "compilation_command": effective_command,
            }))
        }
        ProduceError::Timeout {
            timeout_secs,
            effective_command,
        } => RpcError::internal(format!("compiler timed out after {timeout_secs}s"))
            .with_data(json!({ "compilation_command": effective_command })),
        other => RpcError::internal(other.to_string()),
    }
}
