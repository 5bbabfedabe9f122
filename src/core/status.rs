//! Item and session state machines

use crate::core::errors::TaskError;
use crate::core::payload::{Payload, TransactionPayload, TypedDataPayload};
use crate::session::SessionId;
use crate::signer::SignStage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `Idle → Building → Built → Signed → (Submitted | Failed)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Idle,
    Building,
    Built,
    Signed,
    Submitted,
    Failed,
}

impl ItemStatus {
    fn rank(&self) -> u8 {
        match self {
            ItemStatus::Idle => 0,
            ItemStatus::Building => 1,
            ItemStatus::Built => 2,
            ItemStatus::Signed => 3,
            ItemStatus::Submitted => 4,
            ItemStatus::Failed => u8::MAX,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Idle => "idle",
            ItemStatus::Building => "building",
            ItemStatus::Built => "built",
            ItemStatus::Signed => "signed",
            ItemStatus::Submitted => "submitted",
            ItemStatus::Failed => "failed",
        }
    }
}

impl From<SignStage> for ItemStatus {
    fn from(stage: SignStage) -> Self {
        match stage {
            SignStage::Building => ItemStatus::Building,
            SignStage::Built => ItemStatus::Built,
            SignStage::Signed => ItemStatus::Signed,
            SignStage::Submitted => ItemStatus::Submitted,
        }
    }
}

/// What a payload needs to reach before the queue may move past it.
pub trait SignTarget: Clone + Send + Sync + 'static {
    const TERMINAL: ItemStatus;

    fn to_payload(&self) -> Payload;
}

impl SignTarget for TransactionPayload {
    const TERMINAL: ItemStatus = ItemStatus::Submitted;

    fn to_payload(&self) -> Payload { Payload::Transaction(self.clone()) }
}

impl SignTarget for TypedDataPayload {
    const TERMINAL: ItemStatus = ItemStatus::Signed;

    fn to_payload(&self) -> Payload { Payload::TypedData(self.clone()) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem<P> {
    pub payload: P,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl<P: SignTarget> WorkItem<P> {
    pub fn new(payload: P) -> Self {
        Self { payload, status: ItemStatus::Idle, result_hash: None, error_message: None }
    }

    pub fn is_complete(&self) -> bool { self.status == P::TERMINAL }

    /// Apply a signer progress stage. Only moves forward, and never into the
    /// terminal state: that happens in [`WorkItem::complete`] together with
    /// the hash.
    pub fn observe(&mut self, stage: SignStage) -> bool {
        let next = ItemStatus::from(stage);
        if self.status == ItemStatus::Failed || self.is_complete() || next.rank() >= P::TERMINAL.rank() {
            return false;
        }
        if next.rank() > self.status.rank() {
            self.status = next;
            true
        } else {
            false
        }
    }

    pub fn complete(&mut self, hash: impl Into<String>) {
        self.status = P::TERMINAL;
        self.result_hash = Some(hash.into());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = ItemStatus::Failed;
        self.result_hash = None;
        self.error_message = Some(message.into());
    }

    /// Back to `Idle` for another attempt. The last error message is kept.
    pub fn reset(&mut self) {
        if !self.is_complete() {
            self.status = ItemStatus::Idle;
        }
    }
}

/// `Idle → Active → (Completed | Failed)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Active,
    Completed,
    Failed(TaskError),
}

impl Default for SessionStatus {
    fn default() -> Self { Self::Idle }
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed(_) => "failed",
        }
    }

    pub fn is_failed(&self) -> bool { matches!(self, SessionStatus::Failed(_)) }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            SessionStatus::Failed(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session<P> {
    pub id: SessionId,
    pub items: Vec<WorkItem<P>>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl<P: SignTarget> Session<P> {
    pub fn new(id: SessionId, payloads: Vec<P>) -> Self {
        Self {
            id,
            items: payloads.into_iter().map(WorkItem::new).collect(),
            status: SessionStatus::Idle,
            created_at: Utc::now(),
        }
    }

    pub fn total(&self) -> usize { self.items.len() }

    /// First index that has not reached terminal success.
    pub fn resume_index(&self) -> usize {
        self.items.iter().position(|item| !item.is_complete()).unwrap_or(self.items.len())
    }

    /// Last index that left `Idle`, or 0.
    pub fn active_index(&self) -> usize {
        self.items.iter().rposition(|item| item.status != ItemStatus::Idle).unwrap_or(0)
    }

    pub fn result_hashes(&self) -> Vec<Option<String>> {
        self.items.iter().map(|item| item.result_hash.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tx(nonce: u64) -> TransactionPayload { TransactionPayload::new(1, "0xfrom", nonce) }

    #[test]
    fn observe_moves_forward_only() {
        let mut item = WorkItem::new(tx(0));
        assert!(item.observe(SignStage::Built));
        assert!(!item.observe(SignStage::Building));
        assert!(item.observe(SignStage::Signed));
        assert_eq!(item.status, ItemStatus::Signed);

        // Terminal state needs a hash
        assert!(!item.observe(SignStage::Submitted));
        assert_eq!(item.status, ItemStatus::Signed);
        assert!(item.result_hash.is_none());

        item.complete("0xaa");
        assert!(item.is_complete());
        assert_eq!(item.result_hash.as_deref(), Some("0xaa"));
    }

    #[test]
    fn typed_data_terminates_at_signed() {
        let mut item = WorkItem::new(TypedDataPayload::v4("0xfrom", json!({})));
        item.observe(SignStage::Built);
        assert!(!item.observe(SignStage::Signed));
        item.complete("0xsig");
        assert_eq!(item.status, ItemStatus::Signed);
        assert!(item.is_complete());
    }

    #[test]
    fn failed_item_resets_but_keeps_message() {
        let mut item = WorkItem::new(tx(0));
        item.observe(SignStage::Built);
        item.fail("nonce too low");
        assert!(!item.observe(SignStage::Signed));
        item.reset();
        assert_eq!(item.status, ItemStatus::Idle);
        assert_eq!(item.error_message.as_deref(), Some("nonce too low"));
    }

    #[test]
    fn session_indices() {
        let mut session = Session::new(SessionId::from_raw(1), vec![tx(0), tx(1), tx(2)]);
        assert_eq!(session.resume_index(), 0);
        assert_eq!(session.active_index(), 0);
        session.items[0].complete("0xaa");
        session.items[1].fail("boom");
        assert_eq!(session.resume_index(), 1);
        assert_eq!(session.active_index(), 1);
    }
}
