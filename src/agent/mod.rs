//! Agent-wallet approval for the perps exchange
//!
//! Before an account can trade through an agent key it has to sign two
//! exchange actions as typed data:
//!
//! | Action | When |
//! |--------|------|
//! | `approveAgent` | the agent is unknown to the exchange or expires within the margin |
//! | `approveBuilderFee` | the exchange reports no max builder fee for our builder |
//!
//! The exchange caps extra agents per account. When the cap is reached and
//! none of them carries our agent name, the oldest one has to be deleted
//! first (approve the zero address under its name).
//!
//! Hardware accounts sign through the [`TypedDataSigningStore`] so the usual
//! connect gate, progress events and retry apply; software and remote
//! accounts sign directly through their adapter.

use crate::config::OrchestratorConfig;
use crate::core::{Account, Payload, QueueError, SignError, SignerKind, TypedDataPayload};
use crate::signer::{no_progress, SignerSet};
use crate::typed::TypedDataSigningStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Approving this address under an agent's name removes the agent.
pub const DELETE_AGENT_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalKind {
    ApproveAgent,
    ApproveBuilderFee,
}

impl ApprovalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalKind::ApproveAgent => "approveAgent",
            ApprovalKind::ApproveBuilderFee => "approveBuilderFee",
        }
    }
}

/// Exchange action as built by the exchange client: the full EIP-712
/// document to sign, plus the nonce it embeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedAction {
    pub kind: ApprovalKind,
    pub typed_data: Value,
    pub nonce: u64,
}

impl PreparedAction {
    pub fn message(&self) -> &Value { &self.typed_data["message"] }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignAction {
    pub action: PreparedAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl SignAction {
    pub fn new(action: PreparedAction) -> Self { Self { action, signature: None } }

    pub fn kind(&self) -> ApprovalKind { self.action.kind }
}

/// Agent registered on the exchange for an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraAgent {
    pub name: String,
    pub address: String,
    /// Unix millis.
    pub valid_until: i64,
}

#[async_trait]
pub trait PerpsExchange: Send + Sync {
    async fn extra_agents(&self, user: &str) -> Result<Vec<ExtraAgent>, SignError>;

    /// `None` or zero means the builder fee was never approved.
    async fn max_builder_fee(&self, user: &str, builder: &str) -> Result<Option<u64>, SignError>;

    fn prepare_approve_agent(&self, user: &str, agent_address: &str, agent_name: &str) -> PreparedAction;

    fn prepare_approve_builder_fee(&self, user: &str, builder: &str) -> PreparedAction;

    async fn send_approval(&self, action: &PreparedAction, signature: &str) -> Result<(), SignError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AgentCheck {
    pub expired: bool,
    pub needs_delete: bool,
    pub deletion_candidate: Option<ExtraAgent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    AlreadyApproved,
    /// Signed and submitted without user interaction.
    Approved(Vec<ApprovalKind>),
    /// The account has to approve interactively, see [`AgentApprovalFlow::approve`].
    NeedsUserApproval(Vec<ApprovalKind>),
    /// Agent slots are full; delete `candidate`, then approve `pending`.
    NeedsAgentDeletion { candidate: ExtraAgent, pending: Vec<ApprovalKind> },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Approval cancelled: {0}")]
    Cancelled(String),

    #[error("{} has no signature", .0.as_str())]
    MissingSignature(ApprovalKind),

    #[error(transparent)]
    Sign(#[from] SignError),
}

impl From<QueueError> for AgentError {
    fn from(e: QueueError) -> Self { AgentError::Cancelled(e.to_string()) }
}

/// Pure part of [`AgentApprovalFlow::check_extra_agent`].
pub fn assess_agents(
    agents: &[ExtraAgent],
    agent_address: &str,
    agent_name: &str,
    max_extra_agents: usize,
    margin: chrono::Duration,
    now: DateTime<Utc>,
) -> AgentCheck {
    match agents.iter().find(|a| same_address(&a.address, agent_address)) {
        Some(agent) => {
            let deadline = (now + margin).timestamp_millis();
            AgentCheck { expired: agent.valid_until < deadline, ..AgentCheck::default() }
        }
        None => {
            let named = agents.iter().any(|a| a.name == agent_name);
            if !named && agents.len() >= max_extra_agents {
                AgentCheck {
                    expired: true,
                    needs_delete: true,
                    deletion_candidate: agents.iter().min_by_key(|a| a.valid_until).cloned(),
                }
            } else {
                AgentCheck { expired: true, ..AgentCheck::default() }
            }
        }
    }
}

fn same_address(a: &str, b: &str) -> bool { a.eq_ignore_ascii_case(b) }

fn no_fee(fee: Option<u64>) -> bool { fee.unwrap_or(0) == 0 }

pub struct AgentApprovalFlow {
    exchange: Arc<dyn PerpsExchange>,
    signers: SignerSet,
    store: Arc<TypedDataSigningStore>,
    agent_name: String,
    builder: String,
    max_extra_agents: usize,
    expiry_margin: chrono::Duration,
}

impl AgentApprovalFlow {
    pub fn new(exchange: Arc<dyn PerpsExchange>, signers: SignerSet, store: Arc<TypedDataSigningStore>, config: &OrchestratorConfig) -> Self {
        Self {
            exchange,
            signers,
            store,
            agent_name: config.agent_name.clone(),
            builder: config.builder_address.clone(),
            max_extra_agents: config.max_extra_agents,
            expiry_margin: config.agent_expiry_margin(),
        }
    }

    /// `approveAgent` always; `approveBuilderFee` if the fee is not approved yet.
    pub async fn prepare_sign_actions(&self, account: &Account, agent_address: &str) -> Result<Vec<SignAction>, AgentError> {
        let mut actions = vec![SignAction::new(self.exchange.prepare_approve_agent(&account.address, agent_address, &self.agent_name))];
        if no_fee(self.exchange.max_builder_fee(&account.address, &self.builder).await?) {
            actions.push(SignAction::new(self.exchange.prepare_approve_builder_fee(&account.address, &self.builder)));
        }
        Ok(actions)
    }

    pub async fn check_extra_agent(&self, account: &Account, agent_address: &str) -> Result<AgentCheck, AgentError> {
        let agents = self.exchange.extra_agents(&account.address).await?;
        let check = assess_agents(&agents, agent_address, &self.agent_name, self.max_extra_agents, self.expiry_margin, Utc::now());
        tracing::debug!(address = %account.address, agents = agents.len(), expired = check.expired, needs_delete = check.needs_delete, "extra agents checked");
        Ok(check)
    }

    /// Fill in every signature, in order.
    pub async fn execute_signatures(&self, actions: &mut [SignAction], account: &Account) -> Result<(), AgentError> {
        let payloads: Vec<TypedDataPayload> =
            actions.iter().map(|a| TypedDataPayload::v4(account.address.clone(), a.action.typed_data.clone())).collect();

        if account.is_hardware() {
            let signatures = self.store.request(payloads, account.clone())?.await?;
            for (action, result) in actions.iter_mut().zip(signatures) {
                action.signature = Some(result.hash);
            }
            return Ok(());
        }

        let signer = self.signers.select(account)?;
        for (action, payload) in actions.iter_mut().zip(payloads) {
            let result = signer.sign(&Payload::TypedData(payload), account, &no_progress).await?;
            action.signature = Some(result.hash);
        }
        Ok(())
    }

    pub async fn submit(&self, actions: &[SignAction]) -> Result<(), AgentError> {
        for action in actions {
            let signature = action.signature.as_deref().ok_or(AgentError::MissingSignature(action.kind()))?;
            self.exchange.send_approval(&action.action, signature).await?;
            tracing::info!(kind = action.kind().as_str(), nonce = action.action.nonce, "approval submitted");
        }
        Ok(())
    }

    /// Interactive approval: prepare, sign, submit.
    pub async fn approve(&self, account: &Account, agent_address: &str) -> Result<Vec<ApprovalKind>, AgentError> {
        let mut actions = self.prepare_sign_actions(account, agent_address).await?;
        self.execute_signatures(&mut actions, account).await?;
        self.submit(&actions).await?;
        Ok(actions.iter().map(SignAction::kind).collect())
    }

    /// Free an agent slot by approving the zero address under `candidate`'s name.
    pub async fn delete_agent(&self, account: &Account, candidate: &ExtraAgent) -> Result<(), AgentError> {
        let action = self.exchange.prepare_approve_agent(&account.address, DELETE_AGENT_ADDRESS, &candidate.name);
        let mut actions = vec![SignAction::new(action)];
        self.execute_signatures(&mut actions, account).await?;
        self.submit(&actions).await?;
        tracing::info!(address = %account.address, agent = %candidate.name, "extra agent deleted");
        Ok(())
    }

    /// Work out which approvals are missing. Software accounts get them
    /// signed and submitted on the spot; everything else is reported back.
    pub async fn ensure_approved(&self, account: &Account, agent_address: &str) -> Result<ApprovalOutcome, AgentError> {
        let check = self.check_extra_agent(account, agent_address).await?;
        let fee_missing = no_fee(self.exchange.max_builder_fee(&account.address, &self.builder).await?);

        if check.needs_delete {
            if let Some(candidate) = check.deletion_candidate {
                let mut pending = vec![ApprovalKind::ApproveAgent];
                if fee_missing {
                    pending.push(ApprovalKind::ApproveBuilderFee);
                }
                return Ok(ApprovalOutcome::NeedsAgentDeletion { candidate, pending });
            }
        }

        let mut actions = Vec::new();
        if check.expired {
            actions.push(SignAction::new(self.exchange.prepare_approve_agent(&account.address, agent_address, &self.agent_name)));
        }
        if fee_missing {
            actions.push(SignAction::new(self.exchange.prepare_approve_builder_fee(&account.address, &self.builder)));
        }
        if actions.is_empty() {
            return Ok(ApprovalOutcome::AlreadyApproved);
        }

        let kinds: Vec<ApprovalKind> = actions.iter().map(SignAction::kind).collect();
        if account.signer_kind() != SignerKind::Local {
            return Ok(ApprovalOutcome::NeedsUserApproval(kinds));
        }
        self.execute_signatures(&mut actions, account).await?;
        self.submit(&actions).await?;
        Ok(ApprovalOutcome::Approved(kinds))
    }
}
