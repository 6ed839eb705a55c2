//! # shade-agent
//!
//! identity, signing keys and attestation for agents that run inside a
//! trusted execution environment and act on a near contract.
//!
//! the same client runs outside a tee (local mode) with a deterministic or
//! random identity and a null attestation, so an agent can be developed
//! against a contract that does not require a tee.
//!
//! ## architecture
//!
//! ```text
//!        ┌──────────────┐
//!        │    config    │
//!        └──────┬───────┘
//!               │ validate, probe tee
//!               ▼
//!   ┌────────────────────────┐        ┌───────────────┐
//!   │ tee entropy  or  path  ├───────►│ primary key 0 │  (account id = hex pubkey)
//!   └────────────────────────┘        └───────┬───────┘
//!                                             │ first call
//!                                             ▼
//!                                   ┌───────────────────┐   add / delete
//!                                   │ key pool 1..n-1   ├──────────────► ledger
//!                                   └─────────┬─────────┘   access keys
//!                                             │ round robin
//!                                             ▼
//!                                      signed contract calls
//!
//!   tee quote + tcb report + collateral ──► attestation ──► register_agent
//! ```
//!
//! ## security properties
//!
//! - inside a tee every key mixes local randomness with a tee derived key
//! - the attestation commits to the account id through the quote's report data
//! - errors and logs pass through a redactor that strips key material
//! - exporting private keys needs an explicit risk acknowledgment
//!
//! ## usage
//!
//! ```rust,ignore
//! use shade_agent::{Config, ShadeClient};
//!
//! let config = Config::new("agents.testnet")
//!     .with_num_keys(3)
//!     .with_derivation_path("my-agent");
//! let client = ShadeClient::create(config).await?;
//!
//! println!("agent: {}", client.account_id());
//! if !client.registration_status().await?.registered {
//!     client.register().await?;
//! }
//! let result = client.call("request_signature", args, None, None).await?;
//! ```

pub mod account;
pub mod attestation;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod keys;
pub mod ledger;
pub mod redact;
pub mod tee;

pub use account::KeyPair;
pub use attestation::{CollateralVerifier, DstackAttestation};
pub use client::{RegistrationStatus, ShadeClient, WhitelistStatus};
pub use config::{Config, NetworkId, Sponsor};
pub use error::{Error, Result};
pub use keys::{KeyRing, ReconciliationPlan};
pub use ledger::{parse_near_amount, BlockReference, LedgerProvider, NearProvider};
pub use tee::{Hardware, TeeCapability};

#[cfg(feature = "dstack")]
pub use tee::dstack::DstackClient;
