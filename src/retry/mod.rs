//! Retry policy: how the next attempt differs from the failed one
//!
//! | Failure | Mutation |
//! |---------|----------|
//! | underpriced / fee too low | `GasBump` (×1.3 on `gasPrice` and `maxFeePerGas`) |
//! | nonce too low / too high / already known | `NonceReplace(recommended)` |
//! | the same, no recommended nonce | refused: the queue reports `NonceUnavailable` |
//! | anything else, user rejection | `NoMutation` (plain re-submit) |
//!
//! The policy is pure. The recommended nonce is fetched by the queue from
//! its [`NonceSource`] when the failure happens and handed in through the
//! [`RetryContext`].

use crate::core::{Account, FailureKind, Quantity, SessionStatus, SignError, SignTarget, TransactionPayload, WorkItem};
use crate::session::SessionId;
use crate::signer::SignResult;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_GAS_BUMP: f64 = 1.3;

static UNDERPRICED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)underpriced|fee too low|gas price too low|max fee per gas less than block base fee|fee cap less than block base fee")
        .expect("static regex")
});

static NONCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)nonce too low|nonce too high|invalid nonce|nonce has already been used|already known|known transaction")
        .expect("static regex")
});

/// Which retry path a failure message calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    Nonce,
    GasPrice,
}

/// Underpriced wins over nonce: "replacement transaction underpriced" keeps
/// the nonce and needs more gas.
pub fn classify(description: &str) -> Option<RetryKind> {
    if UNDERPRICED_RE.is_match(description) {
        Some(RetryKind::GasPrice)
    } else if NONCE_RE.is_match(description) {
        Some(RetryKind::Nonce)
    } else {
        None
    }
}

/// A nonce failure the signer did not reject: retrying it needs a fresh nonce.
pub fn needs_nonce(error: &SignError) -> bool {
    error.kind() == FailureKind::Errored && classify(&error.description()) == Some(RetryKind::Nonce)
}

/// Canonical nonce for a sender on a chain (local pending tracking or RPC).
#[async_trait]
pub trait NonceSource: Send + Sync {
    async fn recommended_nonce(&self, from: &str, chain_id: u64, account: &Account, failed_nonce: Quantity) -> Result<u64, SignError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PayloadMutation {
    NonceReplace(Quantity),
    GasBump { factor: f64 },
    NoMutation,
}

impl PayloadMutation {
    pub fn apply(&self, tx: &TransactionPayload) -> TransactionPayload {
        let mut next = tx.clone();
        match *self {
            PayloadMutation::NonceReplace(nonce) => next.nonce = nonce,
            PayloadMutation::GasBump { factor } => {
                next.gas_price = tx.gas_price.map(|g| g.scale(factor));
                next.max_fee_per_gas = tx.max_fee_per_gas.map(|g| g.scale(factor));
            }
            PayloadMutation::NoMutation => {}
        }
        next
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    gas_bump_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self { gas_bump_factor: DEFAULT_GAS_BUMP } }
}

impl RetryPolicy {
    pub fn new(gas_bump_factor: f64) -> Self { Self { gas_bump_factor } }

    pub fn gas_bump_factor(&self) -> f64 { self.gas_bump_factor }

    pub fn decide(&self, last_error: &SignError, last_payload: &TransactionPayload, recommended_nonce: Option<u64>) -> PayloadMutation {
        if last_error.kind() == FailureKind::Rejected {
            return PayloadMutation::NoMutation;
        }
        match classify(&last_error.description()) {
            Some(RetryKind::GasPrice) if last_payload.has_gas_price() => PayloadMutation::GasBump { factor: self.gas_bump_factor },
            Some(RetryKind::Nonce) => match recommended_nonce {
                Some(nonce) => PayloadMutation::NonceReplace(next_nonce(last_payload.nonce, nonce)),
                None => PayloadMutation::NoMutation,
            },
            _ => PayloadMutation::NoMutation,
        }
    }
}

/// The recommended nonce, unless it equals the one that just failed: that
/// slot is taken, so move past it.
fn next_nonce(failed: Quantity, recommended: u64) -> Quantity {
    let recommended = Quantity::from(recommended);
    if recommended == failed { Quantity(failed.0 + 1) } else { recommended }
}

/// Snapshot of a failed session, taken before the retry mutates anything.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryContext<P> {
    pub session: SessionId,
    pub last_success: Option<usize>,
    pub failed_index: usize,
    /// Results of items `< failed_index`, in order.
    pub completed: Vec<SignResult>,
    /// Payloads from `failed_index` on, as they were when the attempt failed.
    pub remaining: Vec<P>,
    pub error: SignError,
    pub recommended_nonce: Option<u64>,
}

impl<P: SignTarget> RetryContext<P> {
    /// `None` unless the session failed with items left to run.
    pub fn capture(
        session: SessionId,
        status: &SessionStatus,
        items: &[WorkItem<P>],
        error: SignError,
        recommended_nonce: Option<u64>,
    ) -> Option<Self> {
        if !status.is_failed() {
            return None;
        }
        let failed_index = items.iter().position(|item| !item.is_complete())?;
        let completed = items[..failed_index]
            .iter()
            .filter_map(|item| item.result_hash.clone().map(SignResult::new))
            .collect();
        Some(Self {
            session,
            last_success: failed_index.checked_sub(1),
            failed_index,
            completed,
            remaining: items[failed_index..].iter().map(|item| item.payload.clone()).collect(),
            error,
            recommended_nonce,
        })
    }
}

/// Payloads to run from `failed_index` on. Only the first (the failed item)
/// is mutated; items before `failed_index` are not part of the output and are
/// never signed again.
pub fn resume_payloads(ctx: &RetryContext<TransactionPayload>, mutation: PayloadMutation) -> Vec<TransactionPayload> {
    ctx.remaining
        .iter()
        .enumerate()
        .map(|(offset, tx)| if offset == 0 { mutation.apply(tx) } else { tx.clone() })
        .collect()
}
