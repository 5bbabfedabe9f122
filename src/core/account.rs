//! Accounts and keyring classes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Keyring class an account was imported with. Decides which signer handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyringClass {
    #[serde(rename = "Simple Key Pair", alias = "PrivateKey")]
    PrivateKey,
    #[serde(rename = "HD Key Tree", alias = "Mnemonic")]
    Mnemonic,
    #[serde(rename = "Ledger Hardware", alias = "Ledger")]
    Ledger,
    #[serde(rename = "Onekey Hardware", alias = "OneKey")]
    OneKey,
    #[serde(rename = "WalletConnect")]
    WalletConnect,
}

/// Signer variant selected once per work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerKind {
    Local,
    Remote,
    Hardware,
}

impl KeyringClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyringClass::PrivateKey => "Simple Key Pair",
            KeyringClass::Mnemonic => "HD Key Tree",
            KeyringClass::Ledger => "Ledger Hardware",
            KeyringClass::OneKey => "Onekey Hardware",
            KeyringClass::WalletConnect => "WalletConnect",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "simple key pair" | "privatekey" | "private-key" => Some(KeyringClass::PrivateKey),
            "hd key tree" | "mnemonic" => Some(KeyringClass::Mnemonic),
            "ledger hardware" | "ledger" => Some(KeyringClass::Ledger),
            "onekey hardware" | "onekey" => Some(KeyringClass::OneKey),
            "walletconnect" | "wallet-connect" => Some(KeyringClass::WalletConnect),
            _ => None,
        }
    }

    pub fn signer_kind(&self) -> SignerKind {
        match self {
            KeyringClass::PrivateKey | KeyringClass::Mnemonic => SignerKind::Local,
            KeyringClass::Ledger | KeyringClass::OneKey => SignerKind::Hardware,
            KeyringClass::WalletConnect => SignerKind::Remote,
        }
    }

    pub fn is_hardware(&self) -> bool { self.signer_kind() == SignerKind::Hardware }
}

impl SignerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerKind::Local => "local",
            SignerKind::Remote => "remote",
            SignerKind::Hardware => "hardware",
        }
    }
}

impl fmt::Display for SignerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Account that owns a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    #[serde(rename = "type")]
    pub kind: KeyringClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_name: Option<String>,
}

impl Account {
    pub fn new(address: impl Into<String>, kind: KeyringClass) -> Self {
        Self { address: address.into(), kind, brand_name: None }
    }

    pub fn with_brand(mut self, brand: impl Into<String>) -> Self { self.brand_name = Some(brand.into()); self }

    pub fn signer_kind(&self) -> SignerKind { self.kind.signer_kind() }

    pub fn is_hardware(&self) -> bool { self.kind.is_hardware() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keyring_classes_map_to_signer_kinds() {
        assert_eq!(KeyringClass::Mnemonic.signer_kind(), SignerKind::Local);
        assert_eq!(KeyringClass::PrivateKey.signer_kind(), SignerKind::Local);
        assert_eq!(KeyringClass::WalletConnect.signer_kind(), SignerKind::Remote);
        assert!(KeyringClass::Ledger.is_hardware());
        assert!(KeyringClass::OneKey.is_hardware());
        assert!(!KeyringClass::WalletConnect.is_hardware());
    }

    #[test]
    fn account_accepts_wallet_type_strings() {
        let account: Account = serde_json::from_value(json!({
            "address": "0xabc",
            "type": "Ledger Hardware"
        }))
        .unwrap();
        assert_eq!(account.kind, KeyringClass::Ledger);

        let short: Account = serde_json::from_value(json!({"address": "0xabc", "type": "OneKey"})).unwrap();
        assert_eq!(short.kind, KeyringClass::OneKey);
        assert_eq!(KeyringClass::from_str(" WalletConnect "), Some(KeyringClass::WalletConnect));
        assert_eq!(KeyringClass::from_str("trezor"), None);
    }
}
