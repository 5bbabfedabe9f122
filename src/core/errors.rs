//! Error taxonomy: what went wrong, and how the user sees it

use crate::session::SessionId;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Sentinel surfaced when the user dismisses the hardware connect prompt.
pub const HARDWARE_USER_CANCELLED: &str = "User cancelled hardware connection";

/// EIP-1193 "user rejected request".
pub const USER_REJECTED_CODE: i64 = 4001;

static REJECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)reject").expect("static regex"));

/// Classification shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    Rejected,
    Errored,
}

/// Failures from signers, the hardware gate and remote transports.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignError {
    #[error("{0}")]
    UserRejected(String),

    #[error("{}", HARDWARE_USER_CANCELLED)]
    HardwareConnectCancelled,

    #[error("Hardware device not found: {0}")]
    DeviceNotFound(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Transport: {0}")]
    Transport(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("No {0} signer configured")]
    NoSigner(crate::core::account::SignerKind),

    #[error("{0}")]
    Failed(String),
}

impl SignError {
    pub fn rejected(message: impl Into<String>) -> Self { SignError::UserRejected(message.into()) }

    pub fn failed(message: impl Into<String>) -> Self { SignError::Failed(message.into()) }

    pub fn kind(&self) -> FailureKind {
        match self {
            SignError::UserRejected(_) | SignError::HardwareConnectCancelled => FailureKind::Rejected,
            SignError::Rpc { code, message } => {
                if *code == USER_REJECTED_CODE || REJECT_RE.is_match(message) {
                    FailureKind::Rejected
                } else {
                    FailureKind::Errored
                }
            }
            SignError::Failed(message) if REJECT_RE.is_match(message) => FailureKind::Rejected,
            _ => FailureKind::Errored,
        }
    }

    /// Raw cause, without the variant prefix. Kept verbatim for diagnostics
    /// and matched by the retry policy.
    pub fn description(&self) -> String {
        match self {
            SignError::Rpc { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Maps a classification to the string the user sees.
pub trait Localizer: Send + Sync {
    fn message(&self, kind: FailureKind) -> String;
}

/// The last classified failure of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub status: FailureKind,
    pub content: String,
    pub description: String,
}

impl TaskError {
    pub fn from_sign_error(error: &SignError, localizer: &dyn Localizer) -> Self {
        let status = error.kind();
        Self { status, content: localizer.message(status), description: error.description() }
    }
}

/// Misuse of the queue/store contract, or the end of a run that cannot
/// produce results.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("No failed session to retry")]
    NotFailed,

    #[error("No typed data payloads to sign")]
    EmptyBatch,

    #[error("No account set for session")]
    NoAccount,

    #[error("No pending typed data signing context found")]
    NoRunContext,

    #[error("Session is already running")]
    AlreadyRunning,

    #[error("No recommended nonce available for retry")]
    NonceUnavailable,

    #[error("Session {0} was superseded")]
    Superseded(SessionId),

    #[error("Replaced by new request")]
    Replaced,

    #[error("{0}")]
    Cancelled(String),

    #[error(transparent)]
    Sign(#[from] SignError),
}

impl QueueError {
    pub fn is_superseded(&self) -> bool { matches!(self, QueueError::Superseded(_)) }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Invalid hex quantity: {0}")]
    InvalidQuantity(String),
}
