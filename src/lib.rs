//! Beesign: sequenced signing sessions over local, remote and hardware signers.
//!
//! # Architecture
//!
//! ```text
//! SigningTaskQueue (transactions)        TypedDataSigningStore (typed data)
//!   │                                        │
//!   ├── SessionGuard (one id per run, late results dropped)
//!   │
//!   ├── HardwareSessionGate (Ledger / OneKey accounts)
//!   │
//!   ├── SignerSet::select(account)
//!   │     ├── LocalSigner    (Keyring + Broadcaster)
//!   │     ├── RemoteSigner   (RemoteTransport, e.g. ws::WsTransport)
//!   │     └── HardwareSigner (HardwareBridge + Broadcaster)
//!   │
//!   └── RetryPolicy (nonce replace / gas bump on the failed item only)
//!
//! AgentApprovalFlow ── PerpsExchange + TypedDataSigningStore
//! ```
//!
//! # Session verbs
//!
//! | Verb | Method | Description |
//! |------|--------|-------------|
//! | init | `queue.init(items, account)` | Replace the batch, invalidate any running session |
//! | start | `queue.start(resume)` | Sign items in order until done or one fails |
//! | retry | `queue.retry()` | Resume from the failed item, mutated by the retry policy |
//! | stop | `queue.stop()` | Abandon the run, keep the account |
//! | clear | `queue.clear()` | Abandon the run and forget the account |
//!
//! Progress comes from `snapshot()` / `subscribe()` (a `tokio::sync::watch`),
//! the last failure from `error()`.
//!
//! # Features
//!
//! - `native` - log subscriber (CLI, mobile host)
//! - `ws` - WebSocket JSON-RPC transport for remote signing sessions
//!
//! # Usage
//!
//! ```ignore
//! use beesign::{Account, KeyringClass, RemoteSigner, SignerSet, SigningTaskQueue, TransactionPayload};
//!
//! let signers = SignerSet::new().with(Arc::new(RemoteSigner::new(transport)));
//! let queue = SigningTaskQueue::new(signers).with_config(&config);
//!
//! queue.init(vec![tx_a, tx_b], Account::new("0xabc", KeyringClass::WalletConnect));
//! match queue.start(false).await {
//!     Ok(hashes) => println!("{:?}", hashes),
//!     Err(_) => println!("{:?}", queue.error()),
//! }
//! ```

pub mod agent;
pub mod batch;
pub mod config;
pub mod core;
pub mod queue;
pub mod retry;
pub mod session;
pub mod signer;
pub mod typed;

#[cfg(feature = "native")]
pub mod logging;
#[cfg(feature = "ws")]
pub mod ws;

pub use agent::{AgentApprovalFlow, AgentCheck, AgentError, ApprovalKind, ApprovalOutcome, ExtraAgent, PerpsExchange, PreparedAction, SignAction};
pub use batch::Batch;
pub use config::{Messages, OrchestratorConfig};
pub use core::{
    Account, FailureKind, ItemStatus, KeyringClass, Localizer, Payload, Quantity, QueueError, Session, SessionStatus, SignError,
    SignerKind, TaskError, TransactionPayload, TypedDataPayload, TypedDataVersion, WorkItem, HARDWARE_USER_CANCELLED,
};
pub use queue::{ProgressSnapshot, SigningTaskQueue};
pub use retry::{NonceSource, PayloadMutation, RetryContext, RetryPolicy};
pub use session::{SessionGuard, SessionId};
pub use signer::{
    Broadcaster, HardwareBridge, HardwareSessionGate, HardwareSigner, Keyring, LocalSigner, OnProgress, RemoteSigner, RemoteTransport,
    SignResult, SignStage, SignerAdapter, SignerSet,
};
pub use typed::{PendingSignatures, RunContext, TypedDataProgress, TypedDataSigningStore};

#[cfg(feature = "ws")]
pub use ws::WsTransport;
