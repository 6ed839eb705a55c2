//! ledger provider trait and implementations
//!
//! the provider is everything the agent needs from the chain:
//! - read-only contract calls and account queries
//! - the access key list of an account
//! - signing and submitting transactions
//!
//! implementations:
//! - near: near-api over the network's rpc endpoints, the default

pub mod near;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::account::KeyPair;
use crate::{Error, Result};

pub use near::NearProvider;

/// default gas for function calls (30 Tgas)
pub const DEFAULT_GAS: u64 = 30_000_000_000_000;

/// yoctoNEAR per NEAR
pub const YOCTO_PER_NEAR: u128 = 1_000_000_000_000_000_000_000_000;

/// block to run a view against
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BlockReference {
    #[default]
    Final,
    Optimistic,
    Height(u64),
    Hash(String),
}

/// transaction action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    FunctionCall {
        method_name: String,
        args: Vec<u8>,
        gas: u64,
        deposit: u128,
    },
    Transfer {
        deposit: u128,
    },
    /// add a full access key
    AddKey {
        public_key: String,
    },
    DeleteKey {
        public_key: String,
    },
}

/// what to send, the provider signs it and fills in nonce and block hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub signer_id: String,
    pub receiver_id: String,
    pub actions: Vec<Action>,
}

/// final status of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// raw bytes returned by the receipt, if any
    Success(Vec<u8>),
    Failure(String),
}

/// result of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub hash: String,
    pub status: ExecutionStatus,
}

impl TxOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, ExecutionStatus::Success(_))
    }

    /// decode the return value as json
    ///
    /// an empty return value is `Null`; anything else must be valid json
    pub fn json_value(&self) -> Result<Value> {
        match &self.status {
            ExecutionStatus::Success(bytes) if bytes.is_empty() => Ok(Value::Null),
            ExecutionStatus::Success(bytes) => serde_json::from_slice(bytes).map_err(|e| {
                Error::Serialization(format!("return value of {} is not json: {}", self.hash, e))
            }),
            ExecutionStatus::Failure(reason) => Err(Error::Transaction(reason.clone())),
        }
    }
}

/// one access key on an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKeyInfo {
    pub public_key: String,
    #[serde(default)]
    pub nonce: u64,
}

/// account state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountInfo {
    /// balance in yoctoNEAR
    pub amount: u128,
    pub locked: u128,
    pub storage_usage: u64,
}

/// provider trait - pluggable access to the chain
#[async_trait]
pub trait LedgerProvider: Send + Sync {
    /// network the provider talks to, e.g. `testnet`
    async fn network_id(&self) -> Result<String>;

    /// read-only contract call, returns the decoded json result
    async fn call_function(
        &self,
        contract_id: &str,
        method_name: &str,
        args: &Value,
        block: &BlockReference,
    ) -> Result<Value>;

    /// account balance and storage
    async fn view_account(&self, account_id: &str) -> Result<AccountInfo>;

    /// access keys currently on the account
    async fn access_keys(&self, account_id: &str) -> Result<Vec<AccessKeyInfo>>;

    /// sign `request` with `signer` and submit it
    async fn send_transaction(&self, signer: &KeyPair, request: TransactionRequest) -> Result<TxOutcome>;
}

/// parse a decimal NEAR amount like `0.25` into yoctoNEAR
pub fn parse_near_amount(amount: &str) -> Option<u128> {
    let amount = amount.trim();
    let (whole, frac) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };
    if (whole.is_empty() && frac.is_empty()) || frac.len() > 24 {
        return None;
    }
    if !whole.chars().chain(frac.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac_padded = format!("{:0<24}", frac);
    let frac: u128 = frac_padded.parse().ok()?;
    whole.checked_mul(YOCTO_PER_NEAR)?.checked_add(frac)
}

/// format yoctoNEAR as a decimal NEAR amount
pub fn format_near_amount(yocto: u128) -> String {
    let whole = yocto / YOCTO_PER_NEAR;
    let frac = yocto % YOCTO_PER_NEAR;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:024}", frac);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_near_amount() {
        assert_eq!(parse_near_amount("1"), Some(YOCTO_PER_NEAR));
        assert_eq!(parse_near_amount("0.005"), Some(5_000_000_000_000_000_000_000));
        assert_eq!(parse_near_amount(".5"), Some(YOCTO_PER_NEAR / 2));
        assert_eq!(parse_near_amount("abc"), None);
        assert_eq!(parse_near_amount("-1"), None);
        assert_eq!(parse_near_amount(""), None);
        assert_eq!(parse_near_amount("0.0000000000000000000000001"), None);
    }

    #[test]
    fn test_format_near_amount() {
        assert_eq!(format_near_amount(YOCTO_PER_NEAR), "1");
        assert_eq!(format_near_amount(YOCTO_PER_NEAR * 3 / 2), "1.5");
        assert_eq!(format_near_amount(0), "0");
        assert_eq!(format_near_amount(1), "0.000000000000000000000001");
    }

    #[test]
    fn test_outcome_json_value() {
        let ok = TxOutcome {
            hash: "h".into(),
            status: ExecutionStatus::Success(b"true".to_vec()),
        };
        assert_eq!(ok.json_value().unwrap(), Value::Bool(true));

        let empty = TxOutcome {
            hash: "h".into(),
            status: ExecutionStatus::Success(vec![]),
        };
        assert_eq!(empty.json_value().unwrap(), Value::Null);

        let failed = TxOutcome {
            hash: "h".into(),
            status: ExecutionStatus::Failure("boom".into()),
        };
        assert!(!failed.is_success());
        assert!(matches!(failed.json_value(), Err(Error::Transaction(r)) if r == "boom"));
    }

    #[test]
    fn test_outcome_rejects_non_json_value() {
        let raw = TxOutcome {
            hash: "h".into(),
            status: ExecutionStatus::Success(b"not-json-bytes".to_vec()),
        };
        assert!(raw.is_success());
        assert!(matches!(raw.json_value(), Err(Error::Serialization(_))));
    }
}
