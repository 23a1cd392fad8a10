//! HTTP server: read-only project endpoints, static files, and the
//! WebSocket upgrade.
//!
//! The server binds loopback only. `/api/*` endpoints expose the loaded
//! compilation database; `/ws` upgrades to the JSONRPC transport; any
//! other GET serves static files from the optional web root. Every
//! user-supplied path goes through the same project-relative validation
//! as the JSONRPC surface.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::info;

use blot_core::ServerContext;

use crate::ws;

const HTTP_TARGET: &str = "blot_server::http";

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Source-file extensions listed by `/api/files`.
const SOURCE_EXTENSIONS: &[&str] = &["c", "cpp", "h", "hpp"];

/// Configuration for the web transport.
#[derive(Debug, Clone, Default)]
pub struct WebConfig {
    /// Port to bind on loopback; 0 picks a free port.
    pub port: u16,
    /// Optional directory of static files to serve outside `/api/`.
    pub web_root: Option<PathBuf>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) ctx: Arc<ServerContext>,
    web_root: Option<Arc<PathBuf>>,
}

/// Handle to a running web server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// The address the server actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting connections and waits for the server task.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Builds the blot HTTP router.
pub fn router(ctx: Arc<ServerContext>, web_root: Option<PathBuf>) -> Router {
    let state = AppState {
        ctx,
        web_root: web_root.map(Arc::new),
    };
    Router::new()
        .route("/api/status", get(status))
        .route("/api/files", get(files))
        .route("/api/source", get(source))
        .route("/ws", get(ws::ws_handler))
        .fallback(get(static_file))
        .with_state(state)
}

/// Binds loopback and starts serving in a background task.
///
/// # Errors
///
/// Fails when the port cannot be bound.
pub async fn serve(ctx: Arc<ServerContext>, config: WebConfig) -> io::Result<ServerHandle> {
    let bind = SocketAddr::from((Ipv4Addr::LOCALHOST, config.port));
    let listener = tokio::net::TcpListener::bind(bind).await?;
    let addr = listener.local_addr()?;

    let app = router(ctx, config.web_root);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    info!(target: HTTP_TARGET, %addr, "blot web server listening");
    Ok(ServerHandle {
        addr,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

/// Blocking entry point for `blot --web`: serves until interrupted.
///
/// # Errors
///
/// Fails when the runtime cannot start or the port cannot be bound.
pub fn run_web_server(ctx: Arc<ServerContext>, config: WebConfig) -> io::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let handle = serve(ctx, config).await?;
        let _ = tokio::signal::ctrl_c().await;
        handle.shutdown().await;
        Ok(())
    })
}

fn json_response(status: StatusCode, body: Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)],
        body.to_string(),
    )
        .into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    json_response(status, json!({ "error": message }))
}

async fn status(State(state): State<AppState>) -> Response {
    let ctx = &state.ctx;
    json_response(
        StatusCode::OK,
        json!({
            "tu_count": ctx.database().tu_count(),
            "ccj": ctx.ccj_path().display().to_string(),
            "project_root": ctx.project_root().display().to_string(),
        }),
    )
}

async fn files(State(state): State<AppState>) -> Response {
    let root = state.ctx.project_root().to_path_buf();
    let mut files: Vec<String> = walkdir::WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
        })
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(&root)
                .ok()
                .map(|rel| rel.display().to_string())
        })
        .collect();
    files.sort();

    json_response(StatusCode::OK, json!({ "files": files }))
}

#[derive(Debug, Deserialize)]
struct SourceQuery {
    file: Option<String>,
}

async fn source(State(state): State<AppState>, Query(query): Query<SourceQuery>) -> Response {
    let Some(file) = query.file.filter(|f| !f.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "missing file param");
    };

    let relative = match blot_ccj::validate_project_relative(&file) {
        Ok(relative) => relative,
        Err(_) => return error_response(StatusCode::FORBIDDEN, "path traversal denied"),
    };

    match tokio::fs::read_to_string(state.ctx.project_root().join(relative)).await {
        Ok(content) => json_response(
            StatusCode::OK,
            json!({ "file": file, "content": content }),
        ),
        Err(_) => error_response(StatusCode::NOT_FOUND, "file not found"),
    }
}

async fn static_file(State(state): State<AppState>, uri: Uri) -> Response {
    let Some(web_root) = state.web_root.as_deref() else {
        return error_response(StatusCode::NOT_FOUND, "not found");
    };

    let path = uri.path();
    let relative = if path == "/" || path == "/index.html" {
        "index.html"
    } else {
        path.trim_start_matches('/')
    };

    let relative = match blot_ccj::validate_project_relative(relative) {
        Ok(relative) => relative,
        Err(_) => return error_response(StatusCode::FORBIDDEN, "path traversal denied"),
    };

    let file_path = web_root.join(relative);
    match tokio::fs::read(&file_path).await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type_for(&file_path))],
            body,
        )
            .into_response(),
        Err(_) => error_response(StatusCode::NOT_FOUND, "not found in web root"),
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        _ => "application/octet-stream",
    }
}
