//! Request/session engine for the blot service.
//!
//! The engine turns ambiguous caller intent (a project file, a previously
//! minted token, or an explicit command object) into a canonical
//! [`Inference`], runs the three-phase pipeline infer → grab_asm →
//! annotate with a two-level session-scoped cache, and serves it over
//! JSONRPC through whichever transport hosts the [`Session`].
//!
//! Transports own exactly one [`Session`] each and feed it one message at
//! a time; the engine relies on that serialization instead of interior
//! locking.

pub mod command;
pub mod dispatch;
pub mod inference;
pub mod jsonrpc;
pub mod options;
pub mod producer;
pub mod session;

mod context;

pub use context::ServerContext;
pub use dispatch::{Dispatcher, FrameSink, Outcome};
pub use inference::Inference;
pub use producer::CancelToken;
pub use session::{Session, Token};
