//! Session state: token counter and the pipeline caches.
//!
//! A session lives exactly as long as its transport connection. It owns
//! every cache of the three-phase pipeline; nothing here is shared and
//! no locking is needed, because the transport feeds the session one
//! message at a time. Dropping the session drops the caches.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::command::CanonicalKey;
use crate::inference::Inference;
use crate::options::AnnotateOptions;
use crate::producer::{AsmArtifact, CancelToken};

/// Session-local identifier of a cached pipeline stage.
pub type Token = i64;

/// Process-unique session ids, used only to keep temp-file names unique
/// across concurrently running sessions.
static SESSION_IDS: AtomicU64 = AtomicU64::new(1);

/// Per-connection pipeline state.
#[derive(Debug)]
pub struct Session {
    id: u64,
    next_token: Token,
    temp_counter: u64,
    cancel: CancelToken,
    /// Token → canonical inference.
    pub(crate) infer_cache_1: HashMap<Token, Inference>,
    /// Requested file path → token of its last successful infer.
    pub(crate) infer_cache_2: HashMap<String, Token>,
    /// Token → produced assembly.
    pub(crate) asm_cache_1: HashMap<Token, AsmArtifact>,
    /// Canonical key → token the assembly was first produced under.
    pub(crate) asm_cache_2: HashMap<CanonicalKey, Token>,
    /// (token, options) → annotated assembly.
    pub(crate) annotate_cache_1: HashMap<(Token, AnnotateOptions), blot_asm::AnnotatedAsm>,
}

impl Session {
    /// Creates an empty session with a fresh process-unique id.
    pub fn new() -> Self {
        Self::with_cancel(CancelToken::default())
    }

    /// Creates a session whose compiles can be aborted through `cancel`
    /// when the owning transport notices a disconnect.
    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self {
            id: SESSION_IDS.fetch_add(1, Ordering::Relaxed),
            next_token: 1,
            temp_counter: 0,
            cancel,
            infer_cache_1: HashMap::new(),
            infer_cache_2: HashMap::new(),
            asm_cache_1: HashMap::new(),
            asm_cache_2: HashMap::new(),
            annotate_cache_1: HashMap::new(),
        }
    }

    /// The session's process-unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The abort signal shared with the owning transport.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Mints the next token. Tokens start at 1 and never repeat within
    /// a session.
    pub fn mint_token(&mut self) -> Token {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    /// A temp path for assembly output, unique across sessions: the name
    /// carries the session id, the token, and a per-session counter.
    pub fn temp_asm_path(&mut self, token: Token) -> PathBuf {
        self.temp_counter += 1;
        std::env::temp_dir().join(format!(
            "blot-{}-{}-{}.s",
            self.id, token, self.temp_counter
        ))
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn tokens_start_at_one_and_increase() {
        let mut session = Session::new();
        assert_eq!(session.mint_token(), 1);
        assert_eq!(session.mint_token(), 2);
        assert_eq!(session.mint_token(), 3);
    }

    #[rstest]
    fn sessions_have_distinct_ids() {
        let a = Session::new();
        let b = Session::new();
        assert_ne!(a.id(), b.id());
    }

    #[rstest]
    fn temp_paths_never_repeat() {
        let mut session = Session::new();
        let first = session.temp_asm_path(1);
        let second = session.temp_asm_path(1);
        assert_ne!(first, second);
        assert_eq!(first.extension().and_then(|e| e.to_str()), Some("s"));
    }
}
