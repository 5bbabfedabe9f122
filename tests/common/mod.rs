//! Scripted collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use beesign::{
    Account, Broadcaster, HardwareBridge, Keyring, KeyringClass, NonceSource, OnProgress, Payload, Quantity, RemoteTransport, SignError,
    SignResult, SignStage, SignerAdapter, SignerKind, TransactionPayload, TypedDataPayload,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{oneshot, Notify};

pub const FROM: &str = "0x00000000000000000000000000000000000000aa";

pub fn remote_account() -> Account { Account::new(FROM, KeyringClass::WalletConnect) }
pub fn local_account() -> Account { Account::new(FROM, KeyringClass::Mnemonic) }
pub fn ledger_account() -> Account { Account::new(FROM, KeyringClass::Ledger).with_brand("Ledger") }

pub fn tx(nonce: u64, gas_price: u128) -> TransactionPayload {
    TransactionPayload::new(1, FROM, nonce).with_to("0xbeef").with_gas_price(Quantity(gas_price))
}

pub fn typed(primary: &str) -> TypedDataPayload {
    TypedDataPayload::v4(FROM, json!({ "primaryType": primary, "types": {}, "domain": {}, "message": { "what": primary } }))
}

pub fn rpc_error(message: &str) -> SignError { SignError::Rpc { code: -32000, message: message.into() } }

/// What the scripted signer does on its next call.
pub enum Step {
    Ok(String),
    Err(SignError),
    /// Stay pending until the test sends the outcome.
    Hold(oneshot::Receiver<Result<String, SignError>>),
}

pub fn ok(hash: &str) -> Step { Step::Ok(hash.to_string()) }

pub struct ScriptedSigner {
    kind: SignerKind,
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Payload>>,
    /// Notified each time `sign` is entered.
    pub entered: Notify,
}

impl ScriptedSigner {
    pub fn new(kind: SignerKind, steps: Vec<Step>) -> Self {
        Self { kind, steps: Mutex::new(steps.into()), calls: Mutex::new(Vec::new()), entered: Notify::new() }
    }

    pub fn remote(steps: Vec<Step>) -> Self { Self::new(SignerKind::Remote, steps) }

    pub fn push(&self, step: Step) { self.steps.lock().unwrap().push_back(step); }

    pub fn calls(&self) -> Vec<Payload> { self.calls.lock().unwrap().clone() }

    pub fn call_count(&self) -> usize { self.calls.lock().unwrap().len() }

    pub fn transactions(&self) -> Vec<TransactionPayload> {
        self.calls()
            .into_iter()
            .filter_map(|p| match p {
                Payload::Transaction(tx) => Some(tx),
                Payload::TypedData(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl SignerAdapter for ScriptedSigner {
    fn kind(&self) -> SignerKind { self.kind }

    async fn sign(&self, payload: &Payload, _account: &Account, on_progress: &OnProgress<'_>) -> Result<SignResult, SignError> {
        self.calls.lock().unwrap().push(payload.clone());
        let step = self.steps.lock().unwrap().pop_front();
        self.entered.notify_one();

        on_progress(SignStage::Building);
        on_progress(SignStage::Built);
        let outcome = match step {
            Some(Step::Ok(hash)) => Ok(hash),
            Some(Step::Err(e)) => Err(e),
            Some(Step::Hold(rx)) => rx.await.unwrap_or_else(|_| Err(SignError::failed("hold dropped"))),
            None => Err(SignError::failed("script exhausted")),
        };
        let hash = outcome?;
        on_progress(SignStage::Signed);
        if payload.is_transaction() {
            on_progress(SignStage::Submitted);
        }
        Ok(SignResult::new(hash))
    }
}

pub struct MockBridge {
    connected: AtomicBool,
    /// Connect prompt never answers.
    silent: bool,
    /// Outcome of the next connect prompt; `None` connects.
    prompt_outcome: Mutex<Option<SignError>>,
    pub prompts: AtomicUsize,
    pub device_signs: AtomicUsize,
    device_error: Mutex<Option<SignError>>,
}

impl MockBridge {
    pub fn connected() -> Self { Self::with_state(true, None) }

    pub fn disconnected() -> Self { Self::with_state(false, None) }

    /// Disconnected, and the user dismisses the prompt.
    pub fn dismissed() -> Self { Self::with_state(false, Some(SignError::HardwareConnectCancelled)) }

    /// Disconnected, and the prompt is left open forever.
    pub fn silent() -> Self { Self { silent: true, ..Self::with_state(false, None) } }

    fn with_state(connected: bool, prompt: Option<SignError>) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            silent: false,
            prompt_outcome: Mutex::new(prompt),
            prompts: AtomicUsize::new(0),
            device_signs: AtomicUsize::new(0),
            device_error: Mutex::new(None),
        }
    }

    pub fn fail_next_sign(&self, error: SignError) { *self.device_error.lock().unwrap() = Some(error); }

    pub fn prompt_count(&self) -> usize { self.prompts.load(Ordering::SeqCst) }

    pub fn sign_count(&self) -> usize { self.device_signs.load(Ordering::SeqCst) }

    fn device_sign(&self, bytes: Vec<u8>) -> Result<Vec<u8>, SignError> {
        self.device_signs.fetch_add(1, Ordering::SeqCst);
        match self.device_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(bytes),
        }
    }
}

#[async_trait]
impl HardwareBridge for MockBridge {
    async fn is_connected(&self, _account: &Account) -> Result<(bool, String), SignError> {
        Ok((self.connected.load(Ordering::SeqCst), "ledger-1".to_string()))
    }

    async fn prompt_connect(&self, _device_id: &str, _account: &Account) -> Result<(), SignError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if self.silent {
            return std::future::pending().await;
        }
        match self.prompt_outcome.lock().unwrap().take() {
            Some(e) => Err(e),
            None => {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn sign_transaction(&self, _account: &Account, _tx: &TransactionPayload) -> Result<Vec<u8>, SignError> {
        self.device_sign(vec![0xde, 0xad])
    }

    async fn sign_typed_data(&self, _account: &Account, _typed: &TypedDataPayload) -> Result<Vec<u8>, SignError> {
        self.device_sign(vec![0x51; 4])
    }
}

pub struct StaticNonceSource {
    nonce: u64,
    down: AtomicBool,
    pub calls: AtomicUsize,
}

impl StaticNonceSource {
    pub fn new(nonce: u64) -> Self { Self { nonce, down: AtomicBool::new(false), calls: AtomicUsize::new(0) } }

    /// Fails every lookup until `set_down(false)`.
    pub fn set_down(&self, down: bool) { self.down.store(down, Ordering::SeqCst); }

    pub fn call_count(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl NonceSource for StaticNonceSource {
    async fn recommended_nonce(&self, _from: &str, _chain_id: u64, _account: &Account, _failed: Quantity) -> Result<u64, SignError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(SignError::Transport("nonce endpoint unreachable".into()));
        }
        Ok(self.nonce)
    }
}

pub struct MockKeyring;

#[async_trait]
impl Keyring for MockKeyring {
    async fn sign_transaction(&self, _account: &Account, tx: &TransactionPayload) -> Result<Vec<u8>, SignError> {
        Ok(vec![0xf8, tx.nonce.as_u64().unwrap_or(0) as u8])
    }

    async fn sign_typed_data(&self, _account: &Account, _typed: &TypedDataPayload) -> Result<Vec<u8>, SignError> {
        Ok(vec![0xab; 4])
    }
}

/// Hash is `0xhash` + the raw transaction; errors can be queued.
#[derive(Default)]
pub struct MockBroadcaster {
    pub submitted: Mutex<Vec<String>>,
    errors: Mutex<VecDeque<SignError>>,
}

impl MockBroadcaster {
    pub fn fail_next(&self, error: SignError) { self.errors.lock().unwrap().push_back(error); }

    pub fn submitted(&self) -> Vec<String> { self.submitted.lock().unwrap().clone() }
}

#[async_trait]
impl Broadcaster for MockBroadcaster {
    async fn submit(&self, _tx: &TransactionPayload, raw: &str) -> Result<String, SignError> {
        if let Some(e) = self.errors.lock().unwrap().pop_front() {
            return Err(e);
        }
        self.submitted.lock().unwrap().push(raw.to_string());
        Ok(format!("0xhash{}", raw.trim_start_matches("0x")))
    }
}

/// Remote session answering from a queue of responses. An empty queue never
/// answers.
#[derive(Default)]
pub struct MockTransport {
    pub requests: Mutex<Vec<(String, Value)>>,
    responses: Mutex<VecDeque<Result<Value, SignError>>>,
}

impl MockTransport {
    pub fn answering(responses: Vec<Result<Value, SignError>>) -> Self {
        Self { requests: Mutex::new(Vec::new()), responses: Mutex::new(responses.into()) }
    }

    pub fn requests(&self) -> Vec<(String, Value)> { self.requests.lock().unwrap().clone() }
}

#[async_trait]
impl RemoteTransport for MockTransport {
    async fn send(&self, method: &str, params: Value) -> Result<Value, SignError> {
        self.requests.lock().unwrap().push((method.to_string(), params));
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(response) => response,
            None => std::future::pending().await,
        }
    }
}
