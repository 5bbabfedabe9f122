//! RemoteSigner - session-based request/response signing (WalletConnect style)

use super::{expect_string, OnProgress, SignResult, SignStage, SignerAdapter};
use crate::core::{Account, Payload, SignError, SignerKind};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Request/response channel to a remote signing session.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn send(&self, method: &str, params: Value) -> Result<Value, SignError>;
}

pub struct RemoteSigner {
    transport: Arc<dyn RemoteTransport>,
    timeout: Option<Duration>,
}

impl RemoteSigner {
    pub fn new(transport: Arc<dyn RemoteTransport>) -> Self { Self { transport, timeout: None } }

    /// Bound each request. The remote side may never answer.
    pub fn with_timeout(mut self, timeout: Duration) -> Self { self.timeout = Some(timeout); self }

    async fn request(&self, method: &str, params: Value) -> Result<Value, SignError> {
        let call = self.transport.send(method, params);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| SignError::Timeout(limit))?,
            None => call.await,
        }
    }
}

#[async_trait]
impl SignerAdapter for RemoteSigner {
    fn kind(&self) -> SignerKind { SignerKind::Remote }

    async fn sign(&self, payload: &Payload, account: &Account, on_progress: &OnProgress<'_>) -> Result<SignResult, SignError> {
        on_progress(SignStage::Building);
        match payload {
            Payload::Transaction(tx) => {
                let params = json!([serde_json::to_value(tx).map_err(|e| SignError::failed(e.to_string()))?]);
                on_progress(SignStage::Built);
                let hash = expect_string(self.request("eth_sendTransaction", params).await?, "eth_sendTransaction")?;
                // The session signs and broadcasts in one round trip
                on_progress(SignStage::Signed);
                on_progress(SignStage::Submitted);
                Ok(SignResult::new(hash))
            }
            Payload::TypedData(typed) => {
                let method = typed.version.rpc_method();
                let params = json!([account.address, typed.data.to_string()]);
                on_progress(SignStage::Built);
                let signature = expect_string(self.request(method, params).await?, method)?;
                on_progress(SignStage::Signed);
                Ok(SignResult::new(signature))
            }
        }
    }
}
