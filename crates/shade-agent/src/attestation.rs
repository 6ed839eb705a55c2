//! attestation assembly
//!
//! turns the tee's quote and tcb report, plus collateral fetched from a
//! verification endpoint, into the layout `register_agent` decodes:
//!
//! ```text
//! quote (hex from tee) ──► bytes ─────────────────────────┐
//!        │                                                 │
//!        └─► collateral endpoint ──► crls/signatures bytes ├─► DstackAttestation
//!                                    chains/json as text   │
//! tcb report ──► registers (48 bytes) + variable fields ──┘
//! ```
//!
//! outside a tee the null attestation is returned without any network call.
//! its registers are zero bytes of full width because the contract decodes
//! them at fixed length whether or not it requires a tee.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::tee::{report_data_for, RawEventLog, TcbReport, TeeCapability};
use crate::{Error, Result};

/// width of mrtd and every rtmr
pub const REGISTER_SIZE: usize = 48;

/// phala's public collateral verification endpoint
pub const DEFAULT_COLLATERAL_ENDPOINT: &str =
    "https://cloud-api.phala.network/api/v1/attestations/verify";

/// collateral requests are cancelled after this long
pub const COLLATERAL_TIMEOUT: Duration = Duration::from_secs(30);

/// attestation in the shape the contract expects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DstackAttestation {
    pub quote: Vec<u8>,
    pub collateral: Collateral,
    pub tcb_info: TcbInfo,
}

/// quote collateral: pem chains and json stay text, crls and signatures are bytes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collateral {
    pub pck_crl_issuer_chain: String,
    pub root_ca_crl: Vec<u8>,
    pub pck_crl: Vec<u8>,
    pub tcb_info_issuer_chain: String,
    pub tcb_info: String,
    pub tcb_info_signature: Vec<u8>,
    pub qe_identity_issuer_chain: String,
    pub qe_identity: String,
    pub qe_identity_signature: Vec<u8>,
}

/// trusted computing base info
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcbInfo {
    #[serde(with = "hex_register")]
    pub mrtd: [u8; REGISTER_SIZE],
    #[serde(with = "hex_register")]
    pub rtmr0: [u8; REGISTER_SIZE],
    #[serde(with = "hex_register")]
    pub rtmr1: [u8; REGISTER_SIZE],
    #[serde(with = "hex_register")]
    pub rtmr2: [u8; REGISTER_SIZE],
    #[serde(with = "hex_register")]
    pub rtmr3: [u8; REGISTER_SIZE],
    pub os_image_hash: String,
    pub compose_hash: String,
    pub device_id: String,
    pub app_compose: String,
    pub event_log: Vec<EventLog>,
}

/// one event log entry; order matters for rtmr replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    pub imr: u32,
    pub event_type: u32,
    pub digest: String,
    pub event: String,
    pub event_payload: String,
}

/// collateral as the verification endpoint returns it, binary fields hex
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCollateral {
    pub pck_crl_issuer_chain: String,
    pub root_ca_crl: String,
    pub pck_crl: String,
    pub tcb_info_issuer_chain: String,
    pub tcb_info: String,
    pub tcb_info_signature: String,
    pub qe_identity_issuer_chain: String,
    pub qe_identity: String,
    pub qe_identity_signature: String,
}

#[derive(Deserialize)]
struct CollateralResponse {
    quote_collateral: RawCollateral,
}

mod hex_register {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<const N: usize, S: Serializer>(bytes: &[u8; N], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, const N: usize, D: Deserializer<'de>>(d: D) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(de::Error::custom)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| de::Error::invalid_length(len, &"a fixed width register"))
    }
}

/// attestation used when no tee is present
pub fn null_attestation() -> DstackAttestation {
    DstackAttestation {
        quote: Vec::new(),
        collateral: Collateral::default(),
        tcb_info: TcbInfo {
            mrtd: [0u8; REGISTER_SIZE],
            rtmr0: [0u8; REGISTER_SIZE],
            rtmr1: [0u8; REGISTER_SIZE],
            rtmr2: [0u8; REGISTER_SIZE],
            rtmr3: [0u8; REGISTER_SIZE],
            os_image_hash: String::new(),
            compose_hash: String::new(),
            device_id: String::new(),
            app_compose: String::new(),
            event_log: Vec::new(),
        },
    }
}

/// client for the collateral verification endpoint
#[derive(Clone)]
pub struct CollateralVerifier {
    endpoint: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl CollateralVerifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: COLLATERAL_TIMEOUT,
            http: reqwest::Client::new(),
        }
    }

    /// set the cancellation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// fetch collateral for a quote; never retried here
    pub async fn fetch(&self, quote: &[u8]) -> Result<RawCollateral> {
        let request = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "hex": hex::encode(quote) }))
            .send();

        let resp = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| Error::Collateral(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| Error::Collateral(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::Collateral(format!("endpoint returned {}", resp.status())));
        }

        let body: CollateralResponse = resp
            .json()
            .await
            .map_err(|e| Error::Collateral(e.to_string()))?;
        Ok(body.quote_collateral)
    }
}

impl Default for CollateralVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_COLLATERAL_ENDPOINT)
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| Error::Collateral(format!("{} is not hex: {}", name, e)))
}

fn decode_register(name: &str, value: &str) -> Result<[u8; REGISTER_SIZE]> {
    let bytes = hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| Error::InvalidTcbInfo(format!("{} is not hex: {}", name, e)))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| Error::InvalidTcbInfo(format!("{} is {} bytes, expected {}", name, len, REGISTER_SIZE)))
}

impl TryFrom<RawCollateral> for Collateral {
    type Error = Error;

    fn try_from(raw: RawCollateral) -> Result<Self> {
        Ok(Self {
            root_ca_crl: decode_field("root_ca_crl", &raw.root_ca_crl)?,
            pck_crl: decode_field("pck_crl", &raw.pck_crl)?,
            tcb_info_signature: decode_field("tcb_info_signature", &raw.tcb_info_signature)?,
            qe_identity_signature: decode_field("qe_identity_signature", &raw.qe_identity_signature)?,
            pck_crl_issuer_chain: raw.pck_crl_issuer_chain,
            tcb_info_issuer_chain: raw.tcb_info_issuer_chain,
            tcb_info: raw.tcb_info,
            qe_identity_issuer_chain: raw.qe_identity_issuer_chain,
            qe_identity: raw.qe_identity,
        })
    }
}

impl From<RawEventLog> for EventLog {
    fn from(raw: RawEventLog) -> Self {
        Self {
            imr: raw.imr,
            event_type: raw.event_type,
            digest: raw.digest,
            event: raw.event,
            event_payload: raw.event_payload,
        }
    }
}

impl TryFrom<TcbReport> for TcbInfo {
    type Error = Error;

    fn try_from(report: TcbReport) -> Result<Self> {
        Ok(Self {
            mrtd: decode_register("mrtd", &report.mrtd)?,
            rtmr0: decode_register("rtmr0", &report.rtmr0)?,
            rtmr1: decode_register("rtmr1", &report.rtmr1)?,
            rtmr2: decode_register("rtmr2", &report.rtmr2)?,
            rtmr3: decode_register("rtmr3", &report.rtmr3)?,
            os_image_hash: report.os_image_hash,
            compose_hash: report.compose_hash,
            device_id: report.device_id,
            app_compose: report.app_compose,
            event_log: report.event_log.into_iter().map(EventLog::from).collect(),
        })
    }
}

/// combine hardware output and collateral into the contract layout
pub fn assemble(quote: Vec<u8>, collateral: RawCollateral, report: TcbReport) -> Result<DstackAttestation> {
    Ok(DstackAttestation {
        quote,
        collateral: collateral.try_into()?,
        tcb_info: report.try_into()?,
    })
}

/// attestation for `account_id`
///
/// null whenever there is no tee or any key was derived without it
pub async fn get_attestation(
    capability: Option<&dyn TeeCapability>,
    derived_with_hardware: bool,
    account_id: &str,
    verifier: &CollateralVerifier,
) -> Result<DstackAttestation> {
    let tee = match capability {
        Some(tee) if derived_with_hardware => tee,
        _ => {
            debug!("no hardware backed identity, using null attestation");
            return Ok(null_attestation());
        }
    };

    let report = tee.info().await?;
    let quote = tee.get_quote(&report_data_for(account_id)).await?;
    let collateral = verifier.fetch(&quote).await?;
    info!("fetched quote collateral for {}", account_id);

    assemble(quote, collateral, report)
}
