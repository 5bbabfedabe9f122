//! Batch files - what the CLI feeds into a queue or store
//!
//! ```json
//! {
//!   "account": { "address": "0xabc...", "type": "WalletConnect" },
//!   "transactions": [ { "chainId": 1, "from": "0xabc...", "nonce": "0x5", "gasPrice": "0x64" } ],
//!   "typedData": [ { "from": "0xabc...", "version": "V4", "data": { ... } } ]
//! }
//! ```

use crate::core::{Account, TransactionPayload, TypedDataPayload};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub account: Account,
    #[serde(default)]
    pub transactions: Vec<TransactionPayload>,
    #[serde(default)]
    pub typed_data: Vec<TypedDataPayload>,
}

impl Batch {
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).context("batch json")
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).with_context(|| format!("batch read: {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    pub fn len(&self) -> usize { self.transactions.len() + self.typed_data.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Every problem found, empty when the batch can run.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.is_empty() {
            problems.push("batch has no transactions or typed data".to_string());
        }
        for (i, tx) in self.transactions.iter().enumerate() {
            if !tx.from.eq_ignore_ascii_case(&self.account.address) {
                problems.push(format!("transactions[{}]: from {} does not match account {}", i, tx.from, self.account.address));
            }
            if tx.chain_id == 0 {
                problems.push(format!("transactions[{}]: chainId must be set", i));
            }
            if tx.gas_price.is_some() && tx.max_fee_per_gas.is_some() {
                problems.push(format!("transactions[{}]: both gasPrice and maxFeePerGas set", i));
            }
        }
        for (i, typed) in self.typed_data.iter().enumerate() {
            if !typed.from.eq_ignore_ascii_case(&self.account.address) {
                problems.push(format!("typedData[{}]: from {} does not match account {}", i, typed.from, self.account.address));
            }
            if typed.primary_type().is_none() {
                problems.push(format!("typedData[{}]: missing primaryType", i));
            }
        }
        problems
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("invalid batch:\n  {}", problems.join("\n  "))
        }
    }
}
