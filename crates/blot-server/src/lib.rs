//! Transport shells for the blot service.
//!
//! Three transports share one [`blot_core::Dispatcher`]: a WebSocket
//! endpoint on the HTTP server, a persistent stdio loop, and the same
//! stdio loop used one-shot. Each transport owns exactly one
//! [`blot_core::Session`] per connection and feeds it messages in frame
//! order; no handler logic lives here.

mod http;
mod stdio;
mod ws;

pub use http::{router, run_web_server, serve, ServerHandle, WebConfig};
pub use stdio::{read_frame, run_stdio_server, serve_streams, write_frame, FramingError};
