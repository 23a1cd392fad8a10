//! WebSocket transport: one session per connection.
//!
//! Text frames carry exactly one JSONRPC message each. The session runs
//! on its own blocking worker thread and handles one message at a time;
//! the async side only shuttles frames. Closing the socket cancels any
//! in-flight compile and drops the session with its caches.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tracing::{debug, info, warn};

use blot_core::{CancelToken, Dispatcher, FrameSink, Outcome, Session};

use crate::http::AppState;

const WS_TARGET: &str = "blot_server::ws";

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Frame sink that forwards dispatcher output to the socket writer task.
struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<Value>,
}

impl FrameSink for ChannelSink {
    fn send(&mut self, frame: Value) {
        if self.tx.send(frame).is_err() {
            debug!(target: WS_TARGET, "peer gone, dropping frame");
        }
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
    let (in_tx, in_rx) = std::sync::mpsc::channel::<String>();
    let cancel = CancelToken::default();

    // The session worker: owns the session, processes messages strictly
    // in arrival order.
    let worker_cancel = cancel.clone();
    let ctx = state.ctx.clone();
    let worker = tokio::task::spawn_blocking(move || {
        let dispatcher = Dispatcher::new(ctx);
        let mut session = Session::with_cancel(worker_cancel);
        let mut sink = ChannelSink { tx: out_tx };
        info!(target: WS_TARGET, session = session.id(), "websocket session started");
        while let Ok(text) = in_rx.recv() {
            if dispatcher.handle_frame(&mut session, &text, &mut sink) == Outcome::Exit {
                break;
            }
        }
        info!(target: WS_TARGET, session = session.id(), "websocket session ended");
    });

    // Writer: serializes outgoing frames onto the wire in order.
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if ws_tx
                .send(Message::Text(frame.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // Reader: feed text frames to the worker until the peer goes away.
    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if in_tx.send(text.as_str().to_owned()).is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(_)) => {
                warn!(target: WS_TARGET, "ignoring binary frame");
            }
            Ok(_) => {}
            Err(error) => {
                debug!(target: WS_TARGET, %error, "websocket read error");
                break;
            }
        }
    }

    // Disconnected: abort any in-flight compile and let the worker drain.
    cancel.cancel();
    drop(in_tx);
    let _ = worker.await;
    let _ = writer.await;
}
