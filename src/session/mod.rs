//! Session guard: monotonic session ids
//!
//! Every run captures the id current when it started. Each place that writes
//! results back compares the captured id with the guard's current one while
//! holding the owner's state lock; a mismatch means the run was superseded by
//! `init`, `stop` or `clear`, and the write is dropped.
//!
//! ```text
//! init()  ──mint──▶ #7 ──▶ run(#7) ── sign ... ───────────▶ write? #7 == #8 ✗ (dropped)
//! init()  ──mint──▶ #8 ──▶ run(#8) ── sign ──▶ write? #8 == #8 ✓
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub fn from_raw(raw: u64) -> Self { SessionId(raw) }
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

#[derive(Debug, Default)]
pub struct SessionGuard {
    current: AtomicU64,
}

impl SessionGuard {
    pub fn new() -> Self { Self::default() }

    /// Mint a new id. Everything captured under an older id becomes stale.
    pub fn mint(&self) -> SessionId {
        let id = SessionId(self.current.fetch_add(1, Ordering::SeqCst) + 1);
        tracing::debug!(session = %id, "session minted");
        id
    }

    pub fn current(&self) -> SessionId { SessionId(self.current.load(Ordering::SeqCst)) }

    pub fn is_current(&self, id: SessionId) -> bool { self.current() == id }
}
