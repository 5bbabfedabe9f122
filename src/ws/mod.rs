//! WebSocket JSON-RPC transport - tokio-tungstenite
//!
//! One socket, many in-flight requests: each request gets a numeric id and a
//! oneshot; the reader task routes responses back by id. Serves both as the
//! remote signing session and as the raw-transaction broadcaster.

use crate::core::{SignError, TransactionPayload};
use crate::signer::{Broadcaster, RemoteTransport};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
}

type Reply = oneshot::Sender<Result<Value, SignError>>;
type PendingMap = Arc<Mutex<HashMap<u64, Reply>>>;

pub struct WsTransport {
    url: String,
    state: Arc<RwLock<TransportState>>,
    tx: Option<mpsc::Sender<String>>,
    pending: PendingMap,
    next_id: AtomicU64,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            state: Arc::new(RwLock::new(TransportState::Disconnected)),
            tx: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str { &self.url }

    pub async fn state(&self) -> TransportState { *self.state.read().await }

    pub async fn connect(&mut self) -> anyhow::Result<()> {
        *self.state.write().await = TransportState::Connecting;

        let (ws, _) = match connect_async(&self.url).await {
            Ok(conn) => conn,
            Err(e) => {
                *self.state.write().await = TransportState::Disconnected;
                return Err(e.into());
            }
        };
        let (mut write, mut read) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(32);
        self.tx = Some(out_tx);
        *self.state.write().await = TransportState::Connected;
        tracing::info!(url = %self.url, "rpc socket connected");

        let state_w = self.state.clone();
        let pending_w = self.pending.clone();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = write.send(Message::Text(msg)).await {
                    tracing::warn!(error = %e, "rpc socket write failed");
                    break;
                }
            }
            *state_w.write().await = TransportState::Disconnected;
            drop_pending(&pending_w);
        });

        let state_r = self.state.clone();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            while let Some(Ok(msg)) = read.next().await {
                let Message::Text(txt) = msg else { continue };
                match parse_response(&txt) {
                    Some((id, result)) => {
                        let reply = pending.lock().unwrap_or_else(|p| p.into_inner()).remove(&id);
                        match reply {
                            Some(reply) => { let _ = reply.send(result); }
                            None => tracing::debug!(id, "response for unknown request"),
                        }
                    }
                    None => tracing::debug!(len = txt.len(), "ignoring non-response frame"),
                }
            }
            *state_r.write().await = TransportState::Disconnected;
            drop_pending(&pending);
        });

        Ok(())
    }

    fn forget(&self, id: u64) { self.pending.lock().unwrap_or_else(|p| p.into_inner()).remove(&id); }
}

/// Dropping the senders fails every waiting request.
fn drop_pending(pending: &PendingMap) {
    let orphaned = std::mem::take(&mut *pending.lock().unwrap_or_else(|p| p.into_inner()));
    if !orphaned.is_empty() {
        tracing::warn!(count = orphaned.len(), "rpc socket closed with requests in flight");
    }
}

#[async_trait]
impl RemoteTransport for WsTransport {
    async fn send(&self, method: &str, params: Value) -> Result<Value, SignError> {
        let not_connected = || SignError::Transport("Not connected".into());
        let tx = self.tx.as_ref().ok_or_else(not_connected)?;
        if self.state().await != TransportState::Connected {
            return Err(not_connected());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().unwrap_or_else(|p| p.into_inner()).insert(id, reply_tx);
        // The socket tasks mark the state before draining, so a close that
        // raced the insert above shows up here.
        if self.state().await != TransportState::Connected {
            self.forget(id);
            return Err(not_connected());
        }

        let request = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        tracing::debug!(id, method, "rpc request");
        if tx.send(request.to_string()).await.is_err() {
            self.forget(id);
            return Err(SignError::Transport("Connection closed".into()));
        }
        reply_rx.await.map_err(|_| SignError::Transport("Connection closed before response".into()))?
    }
}

#[async_trait]
impl Broadcaster for WsTransport {
    async fn submit(&self, tx: &TransactionPayload, raw: &str) -> Result<String, SignError> {
        let result = self.send("eth_sendRawTransaction", json!([raw])).await?;
        let hash = crate::signer::expect_string(result, "eth_sendRawTransaction")?;
        tracing::info!(chain_id = tx.chain_id, nonce = %tx.nonce, hash = %hash, "raw transaction broadcast");
        Ok(hash)
    }
}

/// `(id, result)` of a JSON-RPC 2.0 response; `None` for anything else
/// (notifications, malformed frames).
pub fn parse_response(msg: &str) -> Option<(u64, Result<Value, SignError>)> {
    let value: Value = serde_json::from_str(msg).ok()?;
    let id = value.get("id")?.as_u64()?;
    if let Some(error) = value.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32603);
        let message = error.get("message").and_then(Value::as_str).unwrap_or("Unknown error").to_string();
        return Some((id, Err(SignError::Rpc { code, message })));
    }
    Some((id, Ok(value.get("result")?.clone())))
}
