//! SigningTaskQueue - ordered transaction batch, one signature at a time
//!
//! # Flow
//!
//! ```text
//! init(txs, account) ── mint session id
//!      │
//! start() ── for each item, in order:
//!      │        HardwareSessionGate (hardware accounts)
//!      │        SignerAdapter::sign ── building → built → signed → submitted
//!      │        item Submitted + hash, snapshot emitted
//!      │
//!      ├── all submitted → Completed
//!      └── signer error  → item Failed, session Failed(TaskError), stop
//!                              │
//! retry() ── RetryContext ── RetryPolicy mutation on the failed item only
//!      └── start(resume = true) from the failed index
//! ```
//!
//! Every write back into the state goes through [`SigningTaskQueue::with_session`],
//! which drops it when the captured session id is no longer current.

use crate::config::{Messages, OrchestratorConfig};
use crate::core::{
    Account, ItemStatus, Localizer, QueueError, Session, SessionStatus, SignError, SignTarget, TaskError,
    TransactionPayload, WorkItem,
};
use crate::retry::{self, resume_payloads, NonceSource, RetryContext, RetryPolicy};
use crate::session::{SessionGuard, SessionId};
use crate::signer::{HardwareSessionGate, SignResult, SignStage, SignerSet};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

/// Coarse progress for the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub session: SessionId,
    pub current_index: usize,
    pub total: usize,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_status: Option<ItemStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl ProgressSnapshot {
    pub fn of<P: SignTarget>(session: &Session<P>) -> Self {
        let current_index = session.active_index();
        let current = session.items.get(current_index);
        Self {
            session: session.id,
            current_index,
            total: session.total(),
            status: session.status.clone(),
            item_status: current.map(|item| item.status),
            hash: current.and_then(|item| item.result_hash.clone()),
        }
    }
}

#[derive(Debug, Clone)]
struct Failure {
    error: SignError,
    recommended_nonce: Option<u64>,
}

/// How a run was entered. `Retry` has already marked the session `Active`
/// under the lock that validated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Start,
    Resume,
    Retry,
}

impl Entry {
    fn resumes(self) -> bool { self != Entry::Start }
}

struct QueueState {
    session: Session<TransactionPayload>,
    account: Option<Account>,
    failure: Option<Failure>,
}

pub struct SigningTaskQueue {
    guard: SessionGuard,
    state: Mutex<QueueState>,
    signers: SignerSet,
    gate: Option<HardwareSessionGate>,
    policy: RetryPolicy,
    nonce_source: Option<Arc<dyn NonceSource>>,
    localizer: Arc<dyn Localizer>,
    connect_timeout: Option<Duration>,
    progress: watch::Sender<ProgressSnapshot>,
}

impl SigningTaskQueue {
    pub fn new(signers: SignerSet) -> Self {
        let guard = SessionGuard::new();
        let session = Session::new(guard.current(), Vec::new());
        let (progress, _) = watch::channel(ProgressSnapshot::of(&session));
        Self {
            guard,
            state: Mutex::new(QueueState { session, account: None, failure: None }),
            signers,
            gate: None,
            policy: RetryPolicy::default(),
            nonce_source: None,
            localizer: Arc::new(Messages::default()),
            connect_timeout: None,
            progress,
        }
    }

    /// Bump factor, messages and the hardware connect timeout. The timeout
    /// reaches the gate whichever of `with_config` / `with_gate` comes first.
    pub fn with_config(mut self, config: &OrchestratorConfig) -> Self {
        self.policy = RetryPolicy::new(config.gas_bump_factor);
        self.localizer = Arc::new(config.messages.clone());
        self.connect_timeout = config.connect_timeout();
        self.gate = self.gate.take().map(|gate| configure_gate(gate, self.connect_timeout));
        self
    }
    pub fn with_gate(mut self, gate: HardwareSessionGate) -> Self {
        self.gate = Some(configure_gate(gate, self.connect_timeout));
        self
    }
    pub fn with_nonce_source(mut self, source: Arc<dyn NonceSource>) -> Self { self.nonce_source = Some(source); self }
    pub fn with_localizer(mut self, localizer: Arc<dyn Localizer>) -> Self { self.localizer = localizer; self }

    fn lock(&self) -> MutexGuard<'_, QueueState> { self.state.lock().unwrap_or_else(|p| p.into_inner()) }

    fn emit(&self, state: &QueueState) { self.progress.send_replace(ProgressSnapshot::of(&state.session)); }

    /// Apply `f` if `id` is still the live session, then publish a snapshot.
    /// The id check and the write happen under the same lock.
    fn with_session<R>(&self, id: SessionId, f: impl FnOnce(&mut QueueState) -> R) -> Option<R> {
        let mut state = self.lock();
        if !self.guard.is_current(id) {
            tracing::debug!(session = %id, current = %self.guard.current(), "stale result dropped");
            return None;
        }
        let out = f(&mut state);
        self.emit(&state);
        Some(out)
    }

    /// Replace the batch. Anything still running for the previous session
    /// becomes a no-op.
    pub fn init(&self, payloads: Vec<TransactionPayload>, account: Account) -> SessionId {
        let mut state = self.lock();
        let id = self.guard.mint();
        state.session = Session::new(id, payloads);
        state.account = Some(account);
        state.failure = None;
        tracing::info!(session = %id, total = state.session.total(), "queue initialised");
        self.emit(&state);
        id
    }

    /// Drive the batch. `resume` continues from the first item that has not
    /// been submitted; otherwise every item starts over from `Idle`.
    /// Fails with [`QueueError::AlreadyRunning`] while a run is in flight.
    pub async fn start(&self, resume: bool) -> Result<Vec<SignResult>, QueueError> {
        let entry = if resume { Entry::Resume } else { Entry::Start };
        self.run(self.guard.current(), entry).await
    }

    async fn run(&self, id: SessionId, entry: Entry) -> Result<Vec<SignResult>, QueueError> {
        let resume = entry.resumes();
        let (account, total, first) = self
            .with_session(id, |state| -> Result<_, QueueError> {
                if entry != Entry::Retry && state.session.status == SessionStatus::Active {
                    return Err(QueueError::AlreadyRunning);
                }
                let account = state.account.clone().ok_or(QueueError::NoAccount)?;
                for item in state.session.items.iter_mut() {
                    if resume {
                        item.reset();
                    } else {
                        *item = WorkItem::new(item.payload.clone());
                    }
                }
                state.failure = None;
                state.session.status = SessionStatus::Active;
                Ok((account, state.session.total(), state.session.resume_index()))
            })
            .ok_or(QueueError::Superseded(id))??;

        tracing::info!(session = %id, total, from = first, resume, "queue run started");

        for index in first..total {
            let payload = self
                .with_session(id, |state| {
                    let item = &mut state.session.items[index];
                    item.observe(SignStage::Building);
                    item.payload.clone()
                })
                .ok_or(QueueError::Superseded(id))?;

            match self.sign_one(id, index, &payload, &account).await {
                Ok(result) => {
                    self.with_session(id, |state| state.session.items[index].complete(result.hash.clone()))
                        .ok_or(QueueError::Superseded(id))?;
                    tracing::info!(session = %id, index, hash = %result.hash, "item submitted");
                }
                Err(error) => return Err(self.fail(id, index, &payload, &account, error).await),
            }
        }

        let results = self
            .with_session(id, |state| {
                state.session.status = SessionStatus::Completed;
                collect_results(&state.session)
            })
            .ok_or(QueueError::Superseded(id))?;
        tracing::info!(session = %id, total, "queue completed");
        Ok(results)
    }

    async fn sign_one(&self, id: SessionId, index: usize, payload: &TransactionPayload, account: &Account) -> Result<SignResult, SignError> {
        if account.is_hardware() {
            let gate = self.gate.as_ref().ok_or_else(|| SignError::failed("No hardware gate configured"))?;
            gate.ensure_connected(account).await?;
        }
        let signer = self.signers.select(account)?;
        let on_progress = |stage: SignStage| {
            self.with_session(id, |state| {
                state.session.items[index].observe(stage);
            });
        };
        signer.sign(&payload.to_payload(), account, &on_progress).await
    }

    async fn fail(&self, id: SessionId, index: usize, payload: &TransactionPayload, account: &Account, error: SignError) -> QueueError {
        if !self.guard.is_current(id) {
            tracing::debug!(session = %id, error = %error, "stale failure dropped");
            return QueueError::Superseded(id);
        }

        let recommended_nonce = if retry::needs_nonce(&error) { self.recommended_nonce(payload, account).await } else { None };

        let task_error = TaskError::from_sign_error(&error, self.localizer.as_ref());
        let applied = self.with_session(id, |state| {
            state.session.items[index].fail(error.description());
            state.session.status = SessionStatus::Failed(task_error.clone());
            state.failure = Some(Failure { error: error.clone(), recommended_nonce });
        });
        match applied {
            Some(()) => {
                tracing::warn!(session = %id, index, status = ?task_error.status, error = %error, "queue failed");
                QueueError::Sign(error)
            }
            None => QueueError::Superseded(id),
        }
    }

    async fn recommended_nonce(&self, payload: &TransactionPayload, account: &Account) -> Option<u64> {
        let Some(source) = &self.nonce_source else {
            tracing::warn!(from = %payload.from, "nonce error without a nonce source");
            return None;
        };
        match source.recommended_nonce(&payload.from, payload.chain_id, account, payload.nonce).await {
            Ok(nonce) => Some(nonce),
            Err(e) => {
                tracing::warn!(error = %e, "recommended nonce unavailable");
                None
            }
        }
    }

    /// Resume a failed session. Only the failed item is mutated; items before
    /// it keep their hashes and are not signed again.
    ///
    /// A nonce failure is never re-sent with the nonce that failed: when no
    /// recommendation was recorded, the source is asked again, and the retry
    /// fails with [`QueueError::NonceUnavailable`] (session untouched) if it
    /// still has no answer.
    pub async fn retry(&self) -> Result<Vec<SignResult>, QueueError> {
        let (id, failure, failed_payload, account) = {
            let state = self.lock();
            let id = state.session.id;
            if !self.guard.is_current(id) {
                return Err(QueueError::Superseded(id));
            }
            if !state.session.status.is_failed() {
                return Err(QueueError::NotFailed);
            }
            let failure = state.failure.clone().ok_or(QueueError::NotFailed)?;
            let failed_payload = state
                .session
                .items
                .get(state.session.resume_index())
                .map(|item| item.payload.clone())
                .ok_or(QueueError::NotFailed)?;
            let account = state.account.clone().ok_or(QueueError::NoAccount)?;
            (id, failure, failed_payload, account)
        };

        let recommended_nonce = match failure.recommended_nonce {
            None if retry::needs_nonce(&failure.error) => {
                let nonce = self.recommended_nonce(&failed_payload, &account).await.ok_or(QueueError::NonceUnavailable)?;
                Some(nonce)
            }
            recorded => recorded,
        };

        {
            let mut state = self.lock();
            if !self.guard.is_current(id) {
                return Err(QueueError::Superseded(id));
            }
            let ctx = RetryContext::capture(id, &state.session.status, &state.session.items, failure.error, recommended_nonce)
                .ok_or(QueueError::NotFailed)?;
            let mutation = self.policy.decide(&ctx.error, &ctx.remaining[0], ctx.recommended_nonce);
            tracing::info!(session = %id, index = ctx.failed_index, ?mutation, "retrying");

            for (offset, payload) in resume_payloads(&ctx, mutation).into_iter().enumerate() {
                state.session.items[ctx.failed_index + offset].payload = payload;
            }
            state.session.items[ctx.failed_index].reset();
            state.session.status = SessionStatus::Active;
            self.emit(&state);
        }
        self.run(id, Entry::Retry).await
    }

    /// Abandon the run: status back to `Idle`, items discarded, in-flight
    /// results ignored. The account is kept for the next `init`.
    pub fn stop(&self) {
        self.reset(true);
        tracing::info!("queue stopped");
    }

    /// Like `stop`, and forget the account too.
    pub fn clear(&self) { self.reset(false); }

    fn reset(&self, keep_account: bool) {
        let mut state = self.lock();
        let id = self.guard.mint();
        state.session = Session::new(id, Vec::new());
        state.failure = None;
        if !keep_account {
            state.account = None;
        }
        self.emit(&state);
    }

    pub fn snapshot(&self) -> ProgressSnapshot { ProgressSnapshot::of(&self.lock().session) }
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> { self.progress.subscribe() }
    pub fn error(&self) -> Option<TaskError> { self.lock().session.status.error().cloned() }
    pub fn status(&self) -> SessionStatus { self.lock().session.status.clone() }
    pub fn session(&self) -> Session<TransactionPayload> { self.lock().session.clone() }
    pub fn items(&self) -> Vec<WorkItem<TransactionPayload>> { self.lock().session.items.clone() }
    pub fn session_id(&self) -> SessionId { self.guard.current() }

    /// What a `retry()` right now would resume from.
    pub fn retry_context(&self) -> Option<RetryContext<TransactionPayload>> {
        let state = self.lock();
        let failure = state.failure.clone()?;
        RetryContext::capture(state.session.id, &state.session.status, &state.session.items, failure.error, failure.recommended_nonce)
    }
}

pub(crate) fn configure_gate(gate: HardwareSessionGate, connect_timeout: Option<Duration>) -> HardwareSessionGate {
    match connect_timeout {
        Some(timeout) => gate.with_connect_timeout(Some(timeout)),
        None => gate,
    }
}

fn collect_results<P: SignTarget>(session: &Session<P>) -> Vec<SignResult> {
    session.items.iter().filter_map(|item| item.result_hash.clone().map(SignResult::new)).collect()
}
