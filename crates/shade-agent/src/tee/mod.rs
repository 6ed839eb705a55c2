//! hardware capability trait and implementations
//!
//! a capability is the handle to the trusted execution environment the
//! agent runs in. it is responsible for:
//! - reporting the trusted computing base (measurement registers, event log)
//! - producing quotes bound to caller supplied report data
//! - deriving key material from hardware sealed secrets
//!
//! implementations:
//! - dstack: intel tdx guest agent over its unix socket (or simulator url)
//!
//! absence of a capability is not an error, agents run in local mode

#[cfg(feature = "dstack")]
pub mod dstack;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// size of the report data bound into a quote
pub const REPORT_DATA_SIZE: usize = 64;

/// one measured event, in replay order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEventLog {
    pub imr: u32,
    pub event_type: u32,
    /// hex encoded digest
    pub digest: String,
    pub event: String,
    /// hex encoded payload
    pub event_payload: String,
}

/// trusted computing base report as the hardware hands it out
///
/// registers are hex strings, unmodified from the guest agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcbReport {
    pub mrtd: String,
    pub rtmr0: String,
    pub rtmr1: String,
    pub rtmr2: String,
    pub rtmr3: String,
    #[serde(default)]
    pub os_image_hash: String,
    #[serde(default)]
    pub compose_hash: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub app_compose: String,
    #[serde(default)]
    pub event_log: Vec<RawEventLog>,
}

/// capability trait - pluggable handle to the tee
#[async_trait]
pub trait TeeCapability: Send + Sync {
    /// liveness check, used by probing
    async fn is_live(&self) -> bool {
        self.info().await.is_ok()
    }

    /// trusted computing base report
    async fn info(&self) -> Result<TcbReport>;

    /// signed quote committing to `report_data`
    async fn get_quote(&self, report_data: &[u8; REPORT_DATA_SIZE]) -> Result<Vec<u8>>;

    /// key bytes derived inside the tee from `material`
    async fn derive_key(&self, material: &str) -> Result<Vec<u8>>;
}

/// how a client obtains its capability
#[derive(Clone, Default)]
pub enum Hardware {
    /// look for the local guest agent socket
    #[default]
    Probe,
    /// never use hardware, local mode
    Disabled,
    /// caller supplied capability
    Provided(Arc<dyn TeeCapability>),
}

impl std::fmt::Debug for Hardware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hardware::Probe => write!(f, "Probe"),
            Hardware::Disabled => write!(f, "Disabled"),
            Hardware::Provided(_) => write!(f, "Provided"),
        }
    }
}

impl Hardware {
    /// resolve to a live capability, if any
    pub async fn resolve(&self) -> Option<Arc<dyn TeeCapability>> {
        match self {
            Hardware::Disabled => None,
            Hardware::Provided(capability) => Some(capability.clone()),
            Hardware::Probe => probe().await,
        }
    }
}

/// probe the well-known guest agent socket
#[cfg(feature = "dstack")]
pub async fn probe() -> Option<Arc<dyn TeeCapability>> {
    dstack::DstackClient::probe()
        .await
        .map(|client| Arc::new(client) as Arc<dyn TeeCapability>)
}

#[cfg(not(feature = "dstack"))]
pub async fn probe() -> Option<Arc<dyn TeeCapability>> {
    None
}

/// report data committing to an account id
///
/// the 32-byte public key behind the hex account id, zero padded to 64 bytes.
/// named accounts (non-hex ids) are hashed instead.
pub fn report_data_for(account_id: &str) -> [u8; REPORT_DATA_SIZE] {
    let mut report_data = [0u8; REPORT_DATA_SIZE];
    match hex::decode(account_id) {
        Ok(bytes) if bytes.len() == 32 => report_data[..32].copy_from_slice(&bytes),
        _ => report_data[..32].copy_from_slice(&crate::crypto::sha256(&[account_id.as_bytes()])),
    }
    report_data
}
