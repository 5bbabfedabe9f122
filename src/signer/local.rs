//! LocalSigner - in-process software keyring

use super::{OnProgress, SignResult, SignStage, SignerAdapter};
use crate::core::{Account, Payload, SignError, SignerKind, TransactionPayload, TypedDataPayload};
use async_trait::async_trait;
use std::sync::Arc;

/// Software keyring (private key / mnemonic vaults).
#[async_trait]
pub trait Keyring: Send + Sync {
    /// Raw signed transaction bytes.
    async fn sign_transaction(&self, account: &Account, tx: &TransactionPayload) -> Result<Vec<u8>, SignError>;

    /// 65-byte signature.
    async fn sign_typed_data(&self, account: &Account, typed: &TypedDataPayload) -> Result<Vec<u8>, SignError>;
}

/// Pushes a signed transaction to the chain and returns its hash.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn submit(&self, tx: &TransactionPayload, raw: &str) -> Result<String, SignError>;
}

pub struct LocalSigner {
    keyring: Arc<dyn Keyring>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl LocalSigner {
    pub fn new(keyring: Arc<dyn Keyring>, broadcaster: Arc<dyn Broadcaster>) -> Self { Self { keyring, broadcaster } }
}

#[async_trait]
impl SignerAdapter for LocalSigner {
    fn kind(&self) -> SignerKind { SignerKind::Local }

    async fn sign(&self, payload: &Payload, account: &Account, on_progress: &OnProgress<'_>) -> Result<SignResult, SignError> {
        on_progress(SignStage::Building);
        match payload {
            Payload::Transaction(tx) => {
                on_progress(SignStage::Built);
                let raw = self.keyring.sign_transaction(account, tx).await?;
                on_progress(SignStage::Signed);
                let hash = self.broadcaster.submit(tx, &to_hex(&raw)).await?;
                on_progress(SignStage::Submitted);
                tracing::debug!(from = %tx.from, nonce = %tx.nonce, %hash, "local tx submitted");
                Ok(SignResult::new(hash))
            }
            Payload::TypedData(typed) => {
                on_progress(SignStage::Built);
                let signature = self.keyring.sign_typed_data(account, typed).await?;
                on_progress(SignStage::Signed);
                Ok(SignResult::new(to_hex(&signature)))
            }
        }
    }
}

pub(crate) fn to_hex(bytes: &[u8]) -> String { format!("0x{}", hex::encode(bytes)) }
