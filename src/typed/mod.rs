//! TypedDataSigningStore - the queue contract for EIP-712 style payloads
//!
//! Differences from [`SigningTaskQueue`](crate::queue::SigningTaskQueue):
//! - `Signed` is terminal, nothing is broadcast
//! - retry never mutates a payload
//! - progress events carry the payload being signed
//! - a [`RunContext`] remembers signatures already produced, so repeated
//!   `retry()` calls after independent failures never sign an index twice
//! - [`TypedDataSigningStore::request`] hands back a [`PendingSignatures`]
//!   future that resolves once the whole batch is signed, across retries

use crate::config::{Messages, OrchestratorConfig};
use crate::core::{
    Account, Localizer, QueueError, Session, SessionStatus, SignError, SignTarget, TaskError, TypedDataPayload, WorkItem,
    HARDWARE_USER_CANCELLED,
};
use crate::queue::{configure_gate, ProgressSnapshot};
use crate::session::{SessionGuard, SessionId};
use crate::signer::{HardwareSessionGate, SignResult, SignStage, SignerSet};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};

const EVENT_CAPACITY: usize = 64;

/// Where a typed-data run stands. Survives failures; dropped on completion
/// or reset.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub items: Vec<TypedDataPayload>,
    pub account: Account,
    pub current_index: usize,
    /// Signatures for indices `< current_index`.
    pub results: Vec<SignResult>,
}

/// Per-stage event, with the payload for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypedDataProgress {
    pub session: SessionId,
    pub index: usize,
    pub total: usize,
    pub stage: SignStage,
    pub item: TypedDataPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// How a run was entered. `Retry` and `Request` mark the session `Active`
/// under the lock that validated them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Start,
    Resume,
    Retry,
    Request,
}

impl Entry {
    fn resumes(self) -> bool { matches!(self, Entry::Resume | Entry::Retry) }
    fn claimed(self) -> bool { matches!(self, Entry::Retry | Entry::Request) }
}

type Reply = oneshot::Sender<Result<Vec<SignResult>, QueueError>>;

struct StoreState {
    session: Session<TypedDataPayload>,
    context: Option<RunContext>,
    pending: Option<Reply>,
}

pub struct TypedDataSigningStore {
    guard: SessionGuard,
    state: Mutex<StoreState>,
    signers: SignerSet,
    gate: Option<HardwareSessionGate>,
    localizer: Arc<dyn Localizer>,
    connect_timeout: Option<Duration>,
    progress: watch::Sender<ProgressSnapshot>,
    events: broadcast::Sender<TypedDataProgress>,
}

impl TypedDataSigningStore {
    pub fn new(signers: SignerSet) -> Self {
        let guard = SessionGuard::new();
        let session = Session::new(guard.current(), Vec::new());
        let (progress, _) = watch::channel(ProgressSnapshot::of(&session));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            guard,
            state: Mutex::new(StoreState { session, context: None, pending: None }),
            signers,
            gate: None,
            localizer: Arc::new(Messages::default()),
            connect_timeout: None,
            progress,
            events,
        }
    }

    pub fn with_config(mut self, config: &OrchestratorConfig) -> Self {
        self.localizer = Arc::new(config.messages.clone());
        self.connect_timeout = config.connect_timeout();
        self.gate = self.gate.take().map(|gate| configure_gate(gate, self.connect_timeout));
        self
    }
    pub fn with_gate(mut self, gate: HardwareSessionGate) -> Self {
        self.gate = Some(configure_gate(gate, self.connect_timeout));
        self
    }
    pub fn with_localizer(mut self, localizer: Arc<dyn Localizer>) -> Self { self.localizer = localizer; self }

    fn lock(&self) -> MutexGuard<'_, StoreState> { self.state.lock().unwrap_or_else(|p| p.into_inner()) }

    fn emit(&self, state: &StoreState) { self.progress.send_replace(ProgressSnapshot::of(&state.session)); }

    fn with_session<R>(&self, id: SessionId, f: impl FnOnce(&mut StoreState) -> R) -> Option<R> {
        let mut state = self.lock();
        if !self.guard.is_current(id) {
            tracing::debug!(session = %id, current = %self.guard.current(), "stale typed data result dropped");
            return None;
        }
        let out = f(&mut state);
        self.emit(&state);
        Some(out)
    }

    fn begin(&self, state: &mut StoreState, items: Vec<TypedDataPayload>, account: Account) -> SessionId {
        if let Some(reply) = state.pending.take() {
            let _ = reply.send(Err(QueueError::Replaced));
        }
        let id = self.guard.mint();
        state.session = Session::new(id, items.clone());
        state.context = Some(RunContext { items, account, current_index: 0, results: Vec::new() });
        tracing::info!(session = %id, total = state.session.total(), "typed data store initialised");
        self.emit(state);
        id
    }

    /// Replace the batch. A pending request handle is rejected with
    /// [`QueueError::Replaced`].
    pub fn init(&self, items: Vec<TypedDataPayload>, account: Account) -> SessionId {
        let mut state = self.lock();
        self.begin(&mut state, items, account)
    }

    /// Start a batch in the background and get a handle on its signatures.
    pub fn request(self: &Arc<Self>, items: Vec<TypedDataPayload>, account: Account) -> Result<PendingSignatures, QueueError> {
        if items.is_empty() {
            return Err(QueueError::EmptyBatch);
        }
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.lock();
            let id = self.begin(&mut state, items, account);
            state.pending = Some(tx);
            state.session.status = SessionStatus::Active;
            self.emit(&state);
            id
        };
        let store = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = store.run(id, Entry::Request).await {
                tracing::debug!(session = %id, error = %e, "typed data request paused");
            }
        });
        Ok(PendingSignatures { session: id, rx })
    }

    /// Fails with [`QueueError::AlreadyRunning`] while a run (or a
    /// `request()`) is in flight.
    pub async fn start(&self, resume: bool) -> Result<Vec<SignResult>, QueueError> {
        let entry = if resume { Entry::Resume } else { Entry::Start };
        self.run(self.guard.current(), entry).await
    }

    async fn run(&self, id: SessionId, entry: Entry) -> Result<Vec<SignResult>, QueueError> {
        let resume = entry.resumes();
        let (account, items, first) = self
            .with_session(id, |state| -> Result<_, QueueError> {
                if !entry.claimed() && state.session.status == SessionStatus::Active {
                    return Err(QueueError::AlreadyRunning);
                }
                let ctx = state.context.as_mut().ok_or(QueueError::NoRunContext)?;
                if !resume {
                    ctx.current_index = 0;
                }
                for item in state.session.items.iter_mut() {
                    if resume {
                        item.reset();
                    } else {
                        *item = WorkItem::new(item.payload.clone());
                    }
                }
                ctx.results.truncate(ctx.current_index);
                state.session.status = SessionStatus::Active;
                Ok((ctx.account.clone(), ctx.items.clone(), ctx.current_index))
            })
            .ok_or(QueueError::Superseded(id))??;

        if items.is_empty() {
            self.with_session(id, |state| {
                if let Some(reply) = state.pending.take() {
                    let _ = reply.send(Err(QueueError::EmptyBatch));
                }
                state.session.status = SessionStatus::Idle;
            });
            return Err(QueueError::EmptyBatch);
        }

        let total = items.len();
        tracing::info!(session = %id, total, from = first, resume, "typed data run started");

        for (index, item) in items.iter().enumerate().skip(first) {
            self.with_session(id, |state| {
                state.session.items[index].observe(SignStage::Building);
            })
            .ok_or(QueueError::Superseded(id))?;

            match self.sign_one(id, index, total, item, &account).await {
                Ok(result) => {
                    self.with_session(id, |state| {
                        state.session.items[index].complete(result.hash.clone());
                        if let Some(ctx) = state.context.as_mut() {
                            ctx.results.push(result.clone());
                            ctx.current_index = index + 1;
                        }
                    })
                    .ok_or(QueueError::Superseded(id))?;
                    let _ = self.events.send(TypedDataProgress {
                        session: id,
                        index,
                        total,
                        stage: SignStage::Signed,
                        item: item.clone(),
                        hash: Some(result.hash.clone()),
                    });
                }
                Err(error) => return Err(self.fail(id, index, error)),
            }
        }

        let results = self
            .with_session(id, |state| {
                state.session.status = SessionStatus::Completed;
                let results = state.context.take().map(|ctx| ctx.results).unwrap_or_default();
                if let Some(reply) = state.pending.take() {
                    let _ = reply.send(Ok(results.clone()));
                }
                results
            })
            .ok_or(QueueError::Superseded(id))?;
        tracing::info!(session = %id, total, "typed data signed");
        Ok(results)
    }

    async fn sign_one(
        &self,
        id: SessionId,
        index: usize,
        total: usize,
        item: &TypedDataPayload,
        account: &Account,
    ) -> Result<SignResult, SignError> {
        if account.is_hardware() {
            let gate = self.gate.as_ref().ok_or_else(|| SignError::failed("No hardware gate configured"))?;
            gate.ensure_connected(account).await?;
        }
        let signer = self.signers.select(account)?;
        // Signed is announced with the signature once the item completes.
        let on_progress = |stage: SignStage| {
            if stage == SignStage::Signed || stage == SignStage::Submitted {
                return;
            }
            let live = self.with_session(id, |state| {
                state.session.items[index].observe(stage);
            });
            if live.is_some() {
                let _ = self.events.send(TypedDataProgress { session: id, index, total, stage, item: item.clone(), hash: None });
            }
        };
        signer.sign(&item.to_payload(), account, &on_progress).await
    }

    fn fail(&self, id: SessionId, index: usize, error: SignError) -> QueueError {
        let task_error = TaskError::from_sign_error(&error, self.localizer.as_ref());
        let applied = self.with_session(id, |state| {
            state.session.items[index].fail(error.description());
            state.session.status = SessionStatus::Failed(task_error.clone());
            if let Some(ctx) = state.context.as_mut() {
                ctx.current_index = index;
            }
        });
        match applied {
            Some(()) => {
                tracing::warn!(session = %id, index, status = ?task_error.status, error = %error, "typed data signing failed");
                QueueError::Sign(error)
            }
            None => QueueError::Superseded(id),
        }
    }

    /// Resume from the failed index with the same payload. Can be called
    /// again after each independent failure.
    pub async fn retry(&self) -> Result<Vec<SignResult>, QueueError> {
        let id = {
            let mut state = self.lock();
            if !state.session.status.is_failed() {
                return Err(QueueError::NotFailed);
            }
            let index = state.context.as_ref().map(|ctx| ctx.current_index).ok_or(QueueError::NoRunContext)?;
            if let Some(item) = state.session.items.get_mut(index) {
                item.reset();
            }
            state.session.status = SessionStatus::Active;
            tracing::info!(session = %state.session.id, index, "retrying typed data");
            self.emit(&state);
            state.session.id
        };
        self.run(id, Entry::Retry).await
    }

    /// Reject the pending handle and reset. Without a reason the last
    /// failure's description is used, falling back to the hardware cancel
    /// sentinel.
    pub fn cancel(&self, reason: Option<String>) {
        let mut state = self.lock();
        let description = reason
            .or_else(|| state.session.status.error().map(|e| e.description.clone()))
            .unwrap_or_else(|| HARDWARE_USER_CANCELLED.to_string());
        if let Some(reply) = state.pending.take() {
            let _ = reply.send(Err(QueueError::Cancelled(description.clone())));
        }
        tracing::info!(session = %state.session.id, reason = %description, "typed data request cancelled");
        self.reset(&mut state);
    }

    /// Abandon the run. A pending handle resolves as cancelled.
    pub fn stop(&self) {
        let mut state = self.lock();
        self.reset(&mut state);
        tracing::info!("typed data store stopped");
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        self.reset(&mut state);
    }

    fn reset(&self, state: &mut StoreState) {
        let id = self.guard.mint();
        state.session = Session::new(id, Vec::new());
        state.context = None;
        state.pending = None;
        self.emit(state);
    }

    pub fn snapshot(&self) -> ProgressSnapshot { ProgressSnapshot::of(&self.lock().session) }
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> { self.progress.subscribe() }
    pub fn events(&self) -> broadcast::Receiver<TypedDataProgress> { self.events.subscribe() }
    pub fn error(&self) -> Option<TaskError> { self.lock().session.status.error().cloned() }
    pub fn status(&self) -> SessionStatus { self.lock().session.status.clone() }
    pub fn session(&self) -> Session<TypedDataPayload> { self.lock().session.clone() }
    pub fn run_context(&self) -> Option<RunContext> { self.lock().context.clone() }
    pub fn session_id(&self) -> SessionId { self.guard.current() }
    pub fn has_pending(&self) -> bool { self.lock().pending.is_some() }
}

/// Resolves with every signature of a [`TypedDataSigningStore::request`]
/// batch, in order.
#[derive(Debug)]
pub struct PendingSignatures {
    session: SessionId,
    rx: oneshot::Receiver<Result<Vec<SignResult>, QueueError>>,
}

impl PendingSignatures {
    pub fn session(&self) -> SessionId { self.session }
}

impl Future for PendingSignatures {
    type Output = Result<Vec<SignResult>, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(QueueError::Cancelled("Signing request dropped".into()))),
            Poll::Pending => Poll::Pending,
        }
    }
}
