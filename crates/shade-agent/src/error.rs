//! error types for shade-agent

use thiserror::Error;

use crate::redact::redact_str;

pub type Result<T> = std::result::Result<T, Error>;

/// message returned when private keys are requested without acknowledging the risk
pub const EXPORT_REFUSED: &str = "private keys were not exported: exporting them lets anyone \
    holding them act as this agent outside the tee; pass acknowledge_risk = true to proceed";

#[derive(Debug, Error)]
pub enum Error {
    // === configuration errors (fatal, never retried) ===
    #[error("invalid configuration: {0}")]
    Config(String),

    // === identity errors ===
    /// deliberately carries no detail, the seed must never surface
    #[error("failed to create agent")]
    AgentCreation,

    #[error("derived keys disagree on hardware entropy")]
    InconsistentHardware,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    // === ledger errors ===
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("failed to {action} keys after {attempts} attempts")]
    KeyUpdate { action: &'static str, attempts: u32 },

    #[error("failed to fund agent after {attempts} attempts")]
    Funding { attempts: u32 },

    // === attestation errors ===
    #[error("tee error: {0}")]
    Tee(String),

    #[error("failed to get quote collateral: {0}")]
    Collateral(String),

    #[error("invalid tcb info: {0}")]
    InvalidTcbInfo(String),

    // === secret export ===
    #[error("{}", EXPORT_REFUSED)]
    ExportRefused,

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// scrub secret material from every string payload
    pub fn redacted(self) -> Self {
        match self {
            Error::Config(m) => Error::Config(redact_str(&m)),
            Error::InvalidKey(m) => Error::InvalidKey(redact_str(&m)),
            Error::Rpc(m) => Error::Rpc(redact_str(&m)),
            Error::Transaction(m) => Error::Transaction(redact_str(&m)),
            Error::Tee(m) => Error::Tee(redact_str(&m)),
            Error::Collateral(m) => Error::Collateral(redact_str(&m)),
            Error::InvalidTcbInfo(m) => Error::InvalidTcbInfo(redact_str(&m)),
            Error::Serialization(m) => Error::Serialization(redact_str(&m)),
            other => other,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
