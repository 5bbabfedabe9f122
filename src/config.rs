//! Orchestrator configuration - passed from higher layers

use crate::core::{FailureKind, Localizer};
use crate::retry::DEFAULT_GAS_BUMP;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// The two fixed user-facing failure messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub rejected: String,
    pub failed: String,
}

impl Default for Messages {
    fn default() -> Self { Self { rejected: "Signature rejected".into(), failed: "Transaction failed".into() } }
}

impl Localizer for Messages {
    fn message(&self, kind: FailureKind) -> String {
        match kind {
            FailureKind::Rejected => self.rejected.clone(),
            FailureKind::Errored => self.failed.clone(),
        }
    }
}

/// Orchestrator configuration. Higher layers construct this, or load it
/// from a JSON file; missing fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub gas_bump_factor: f64,
    pub remote_timeout_secs: u64,
    /// `None` waits on the connect prompt until the user acts.
    pub connect_timeout_secs: Option<u64>,
    pub agent_expiry_margin_secs: u64,
    pub max_extra_agents: usize,
    pub agent_name: String,
    pub builder_address: String,
    pub messages: Messages,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            gas_bump_factor: DEFAULT_GAS_BUMP,
            remote_timeout_secs: 120,
            connect_timeout_secs: None,
            agent_expiry_margin_secs: 24 * 60 * 60,
            max_extra_agents: 3,
            agent_name: "beesign".into(),
            builder_address: String::new(),
            messages: Messages::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self { Self::default() }

    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(raw).context("config json")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).with_context(|| format!("config read: {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.gas_bump_factor.is_finite() && self.gas_bump_factor > 1.0) {
            anyhow::bail!("gas_bump_factor must be > 1.0, got {}", self.gas_bump_factor);
        }
        if self.remote_timeout_secs == 0 {
            anyhow::bail!("remote_timeout_secs must be positive");
        }
        Ok(())
    }

    pub fn with_gas_bump(mut self, factor: f64) -> Self { self.gas_bump_factor = factor; self }
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self { self.remote_timeout_secs = timeout.as_secs().max(1); self }
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self { self.connect_timeout_secs = Some(timeout.as_secs()); self }
    pub fn with_messages(mut self, messages: Messages) -> Self { self.messages = messages; self }
    pub fn with_builder(mut self, address: impl Into<String>) -> Self { self.builder_address = address.into(); self }
    pub fn with_agent_name(mut self, name: impl Into<String>) -> Self { self.agent_name = name.into(); self }

    pub fn remote_timeout(&self) -> Duration { Duration::from_secs(self.remote_timeout_secs) }
    pub fn connect_timeout(&self) -> Option<Duration> { self.connect_timeout_secs.map(Duration::from_secs) }
    pub fn agent_expiry_margin(&self) -> chrono::Duration { chrono::Duration::seconds(self.agent_expiry_margin_secs as i64) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.gas_bump_factor, 1.3);
        assert_eq!(config.remote_timeout(), Duration::from_secs(120));
        assert_eq!(config.connect_timeout(), None);
        assert_eq!(config.max_extra_agents, 3);
        assert_eq!(config.agent_expiry_margin(), chrono::Duration::hours(24));
        assert_eq!(config.messages.message(FailureKind::Rejected), "Signature rejected");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = OrchestratorConfig::from_json_str(r#"{"gas_bump_factor": 1.5, "messages": {"failed": "Echec"}}"#).unwrap();
        assert_eq!(config.gas_bump_factor, 1.5);
        assert_eq!(config.remote_timeout_secs, 120);
        assert_eq!(config.messages.failed, "Echec");
        assert_eq!(config.messages.rejected, "Signature rejected");
    }

    #[test]
    fn rejects_non_bumping_factor() {
        assert!(OrchestratorConfig::from_json_str(r#"{"gas_bump_factor": 0.9}"#).is_err());
        assert!(OrchestratorConfig::from_json_str(r#"{"remote_timeout_secs": 0}"#).is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        write!(file, r#"{{"connect_timeout_secs": 30, "builder_address": "0xbuilder"}}"#).unwrap();
        let config = OrchestratorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.connect_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.builder_address, "0xbuilder");
        assert!(OrchestratorConfig::from_file("/nonexistent/beesign.json").is_err());
    }
}
