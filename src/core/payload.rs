//! Signing payloads: on-chain transactions and EIP-712 typed data
//!
//! Numeric transaction fields travel as `0x`-prefixed hex quantities, the
//! same shape the wallet's RPC layer uses.

use crate::core::errors::PayloadError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Hex-encoded unsigned quantity (wei, gas, nonce).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Quantity(pub u128);

impl Quantity {
    pub fn from_hex(value: &str) -> Result<Self, PayloadError> {
        let trimmed = value.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| PayloadError::InvalidQuantity(value.to_string()))?;
        if digits.is_empty() {
            return Ok(Quantity(0));
        }
        u128::from_str_radix(digits, 16)
            .map(Quantity)
            .map_err(|_| PayloadError::InvalidQuantity(value.to_string()))
    }

    pub fn to_hex(&self) -> String { format!("{:#x}", self.0) }

    pub fn as_u64(&self) -> Option<u64> { u64::try_from(self.0).ok() }

    /// Multiply by `factor`, rounding down. Works in thousandths so `0x64 * 1.3`
    /// is exactly `0x82`.
    pub fn scale(&self, factor: f64) -> Quantity {
        let per_mille = (factor * 1000.0).round().max(0.0) as u128;
        Quantity(self.0.saturating_mul(per_mille) / 1000)
    }
}

impl From<u64> for Quantity {
    fn from(value: u64) -> Self { Quantity(value as u128) }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:#x}", self.0) }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Quantity::from_hex(&s).map_err(de::Error::custom),
            Value::Number(n) => n
                .as_u64()
                .map(Quantity::from)
                .ok_or_else(|| de::Error::custom(format!("quantity out of range: {}", n))),
            other => Err(de::Error::custom(format!("expected hex quantity, got {}", other))),
        }
    }
}

/// Transaction as handed to the signer. Only nonce and gas fields change
/// between attempts, and only through the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPayload {
    pub chain_id: u64,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub nonce: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<Quantity>,
}

impl TransactionPayload {
    pub fn new(chain_id: u64, from: impl Into<String>, nonce: u64) -> Self {
        Self {
            chain_id,
            from: from.into(),
            to: None,
            value: None,
            data: None,
            nonce: Quantity::from(nonce),
            gas: None,
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
        }
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self { self.to = Some(to.into()); self }
    pub fn with_value(mut self, value: Quantity) -> Self { self.value = Some(value); self }
    pub fn with_data(mut self, data: impl Into<String>) -> Self { self.data = Some(data.into()); self }
    pub fn with_gas(mut self, gas: Quantity) -> Self { self.gas = Some(gas); self }
    pub fn with_gas_price(mut self, price: Quantity) -> Self { self.gas_price = Some(price); self }
    pub fn with_max_fee(mut self, max_fee: Quantity, priority: Quantity) -> Self {
        self.max_fee_per_gas = Some(max_fee);
        self.max_priority_fee_per_gas = Some(priority);
        self
    }

    pub fn is_eip1559(&self) -> bool { self.max_fee_per_gas.is_some() }

    pub fn has_gas_price(&self) -> bool { self.gas_price.is_some() || self.max_fee_per_gas.is_some() }
}

/// EIP-712 signing version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TypedDataVersion {
    V1,
    V3,
    #[default]
    V4,
}

impl TypedDataVersion {
    pub fn rpc_method(&self) -> &'static str {
        match self {
            TypedDataVersion::V1 => "eth_signTypedData",
            TypedDataVersion::V3 => "eth_signTypedData_v3",
            TypedDataVersion::V4 => "eth_signTypedData_v4",
        }
    }
}

/// Off-chain typed-data payload. No nonce or gas, nothing to broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedDataPayload {
    pub from: String,
    #[serde(default)]
    pub version: TypedDataVersion,
    pub data: Value,
}

impl TypedDataPayload {
    pub fn v4(from: impl Into<String>, data: Value) -> Self {
        Self { from: from.into(), version: TypedDataVersion::V4, data }
    }

    /// `primaryType` of the typed data, when present.
    pub fn primary_type(&self) -> Option<&str> { self.data.get("primaryType").and_then(|v| v.as_str()) }
}

/// Either payload, as seen by a signer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum Payload {
    Transaction(TransactionPayload),
    TypedData(TypedDataPayload),
}

impl Payload {
    pub fn from_address(&self) -> &str {
        match self {
            Payload::Transaction(tx) => &tx.from,
            Payload::TypedData(td) => &td.from,
        }
    }

    pub fn is_transaction(&self) -> bool { matches!(self, Payload::Transaction(_)) }
}

impl From<TransactionPayload> for Payload {
    fn from(tx: TransactionPayload) -> Self { Payload::Transaction(tx) }
}

impl From<TypedDataPayload> for Payload {
    fn from(td: TypedDataPayload) -> Self { Payload::TypedData(td) }
}
