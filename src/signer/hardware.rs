//! Hardware signing: connect gate + device signer (Ledger, OneKey)
//!
//! The gate runs before every work item on a hardware account. When the
//! device is not connected it asks the app to show its connect flow and waits
//! for the user: connected → continue, dismissed → `HardwareConnectCancelled`
//! (classified `Rejected`, the signer is never called).

use super::local::{to_hex, Broadcaster};
use super::{OnProgress, SignResult, SignStage, SignerAdapter};
use crate::core::{Account, Payload, SignError, SignerKind, TransactionPayload, TypedDataPayload};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Device connectivity and signing hooks.
#[async_trait]
pub trait HardwareBridge: Send + Sync {
    /// `(connected, device_id)` for the device holding `account`.
    async fn is_connected(&self, account: &Account) -> Result<(bool, String), SignError>;

    /// Show the connect flow and resolve once the user connected the device.
    /// Dismissal must return `SignError::HardwareConnectCancelled`.
    async fn prompt_connect(&self, device_id: &str, account: &Account) -> Result<(), SignError>;

    /// Blocking device interaction. A cancel on the device is `UserRejected`.
    async fn sign_transaction(&self, account: &Account, tx: &TransactionPayload) -> Result<Vec<u8>, SignError>;

    async fn sign_typed_data(&self, account: &Account, typed: &TypedDataPayload) -> Result<Vec<u8>, SignError>;
}

#[derive(Clone)]
pub struct HardwareSessionGate {
    bridge: Arc<dyn HardwareBridge>,
    connect_timeout: Option<Duration>,
}

impl HardwareSessionGate {
    pub fn new(bridge: Arc<dyn HardwareBridge>) -> Self { Self { bridge, connect_timeout: None } }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self { self.connect_timeout = timeout; self }

    /// No-op for software and remote accounts.
    pub async fn ensure_connected(&self, account: &Account) -> Result<(), SignError> {
        if !account.is_hardware() {
            return Ok(());
        }
        let (connected, device_id) = self.bridge.is_connected(account).await?;
        if connected {
            return Ok(());
        }
        tracing::info!(address = %account.address, device = %device_id, kind = account.kind.as_str(), "hardware not connected, prompting");
        let prompt = self.bridge.prompt_connect(&device_id, account);
        let outcome = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, prompt).await.map_err(|_| SignError::Timeout(limit))?,
            None => prompt.await,
        };
        match &outcome {
            Ok(()) => tracing::info!(device = %device_id, "hardware connected"),
            Err(e) => tracing::warn!(device = %device_id, error = %e, "hardware connect failed"),
        }
        outcome
    }
}

pub struct HardwareSigner {
    bridge: Arc<dyn HardwareBridge>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl HardwareSigner {
    pub fn new(bridge: Arc<dyn HardwareBridge>, broadcaster: Arc<dyn Broadcaster>) -> Self { Self { bridge, broadcaster } }
}

#[async_trait]
impl SignerAdapter for HardwareSigner {
    fn kind(&self) -> SignerKind { SignerKind::Hardware }

    async fn sign(&self, payload: &Payload, account: &Account, on_progress: &OnProgress<'_>) -> Result<SignResult, SignError> {
        on_progress(SignStage::Building);
        match payload {
            Payload::Transaction(tx) => {
                on_progress(SignStage::Built);
                let raw = self.bridge.sign_transaction(account, tx).await?;
                on_progress(SignStage::Signed);
                let hash = self.broadcaster.submit(tx, &to_hex(&raw)).await?;
                on_progress(SignStage::Submitted);
                Ok(SignResult::new(hash))
            }
            Payload::TypedData(typed) => {
                on_progress(SignStage::Built);
                let signature = self.bridge.sign_typed_data(account, typed).await?;
                on_progress(SignStage::Signed);
                Ok(SignResult::new(to_hex(&signature)))
            }
        }
    }
}
