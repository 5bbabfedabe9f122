//! Signers: one adapter per account kind, one progress vocabulary
//!
//! # Architecture
//!
//! ```text
//! SigningTaskQueue / TypedDataSigningStore
//!     │
//!     ├── HardwareSessionGate (hardware accounts only)
//!     │
//!     └── SignerSet::select(account)
//!           ├── LocalSigner    → Keyring + Broadcaster
//!           ├── RemoteSigner   → RemoteTransport (session request/response)
//!           └── HardwareSigner → HardwareBridge + Broadcaster
//! ```
//!
//! Every adapter reports `building → built → signed → submitted` (the last
//! one for transactions only) so queue events stay transport-agnostic.

mod hardware;
mod local;
mod remote;

pub use hardware::{HardwareBridge, HardwareSessionGate, HardwareSigner};
pub use local::{Broadcaster, Keyring, LocalSigner};
pub use remote::{RemoteSigner, RemoteTransport};

use crate::core::{Account, Payload, SignError, SignerKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Signer progress vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignStage {
    Building,
    Built,
    Signed,
    Submitted,
}

/// Progress callback handed to a signer.
pub type OnProgress<'a> = dyn Fn(SignStage) + Send + Sync + 'a;

/// Progress callback that ignores everything.
pub fn no_progress(_: SignStage) {}

/// Transaction hash for transactions, signature for typed data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResult {
    pub hash: String,
}

impl SignResult {
    pub fn new(hash: impl Into<String>) -> Self { Self { hash: hash.into() } }
}

#[async_trait]
pub trait SignerAdapter: Send + Sync {
    fn kind(&self) -> SignerKind;

    async fn sign(&self, payload: &Payload, account: &Account, on_progress: &OnProgress<'_>) -> Result<SignResult, SignError>;
}

/// One adapter per signer kind.
#[derive(Clone, Default)]
pub struct SignerSet {
    local: Option<Arc<dyn SignerAdapter>>,
    remote: Option<Arc<dyn SignerAdapter>>,
    hardware: Option<Arc<dyn SignerAdapter>>,
}

impl SignerSet {
    pub fn new() -> Self { Self::default() }

    /// Register `signer` under its own kind, replacing any previous one.
    pub fn with(mut self, signer: Arc<dyn SignerAdapter>) -> Self {
        match signer.kind() {
            SignerKind::Local => self.local = Some(signer),
            SignerKind::Remote => self.remote = Some(signer),
            SignerKind::Hardware => self.hardware = Some(signer),
        }
        self
    }

    pub fn select(&self, account: &Account) -> Result<Arc<dyn SignerAdapter>, SignError> {
        let kind = account.signer_kind();
        let slot = match kind {
            SignerKind::Local => &self.local,
            SignerKind::Remote => &self.remote,
            SignerKind::Hardware => &self.hardware,
        };
        slot.clone().ok_or(SignError::NoSigner(kind))
    }
}

impl std::fmt::Debug for SignerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerSet")
            .field("local", &self.local.is_some())
            .field("remote", &self.remote.is_some())
            .field("hardware", &self.hardware.is_some())
            .finish()
    }
}

/// JSON-RPC result → string (hash or signature).
pub(crate) fn expect_string(value: serde_json::Value, what: &str) -> Result<String, SignError> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Ok(s),
        other => Err(SignError::failed(format!("Unexpected {} response: {}", what, other))),
    }
}
