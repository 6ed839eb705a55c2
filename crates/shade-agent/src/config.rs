//! client configuration

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::account::KeyPair;
use crate::attestation::DEFAULT_COLLATERAL_ENDPOINT;
use crate::ledger::LedgerProvider;
use crate::tee::{Hardware, TeeCapability};
use crate::{Error, Result};

/// maximum number of signing keys per agent
pub const MAX_KEYS: usize = 100;

/// ledger network
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NetworkId {
    #[default]
    Testnet,
    Mainnet,
}

impl NetworkId {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkId::Testnet => "testnet",
            NetworkId::Mainnet => "mainnet",
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "testnet" => Ok(NetworkId::Testnet),
            "mainnet" => Ok(NetworkId::Mainnet),
            other => Err(Error::Config(format!(
                "network id must be testnet or mainnet, got {}",
                other
            ))),
        }
    }
}

/// account that pays for funding the agent
#[derive(Clone)]
pub struct Sponsor {
    pub account_id: String,
    /// `ed25519:` secret key string
    pub private_key: String,
}

impl Sponsor {
    pub fn new(account_id: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            private_key: private_key.into(),
        }
    }

    pub fn keypair(&self) -> Result<KeyPair> {
        KeyPair::from_secret_key(&self.private_key)
            .map_err(|_| Error::Config("sponsor credentials are invalid".into()))
    }
}

impl fmt::Debug for Sponsor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sponsor")
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

/// shade client configuration
#[derive(Clone)]
pub struct Config {
    pub network_id: NetworkId,
    /// agent contract the client registers with and calls
    pub contract_id: String,
    /// total signing keys, primary included
    pub num_keys: usize,
    /// deterministic derivation outside a tee, ignored inside one
    pub derivation_path: Option<String>,
    pub sponsor: Option<Sponsor>,
    /// ledger provider, defaults to near-api on the network's endpoints
    pub rpc: Option<Arc<dyn LedgerProvider>>,
    /// rpc endpoint overriding the network's public ones
    pub rpc_url: Option<String>,
    pub hardware: Hardware,
    pub collateral_endpoint: String,
}

impl Config {
    pub fn new(contract_id: impl Into<String>) -> Self {
        Self {
            network_id: NetworkId::default(),
            contract_id: contract_id.into(),
            num_keys: 1,
            derivation_path: None,
            sponsor: None,
            rpc: None,
            rpc_url: None,
            hardware: Hardware::default(),
            collateral_endpoint: DEFAULT_COLLATERAL_ENDPOINT.into(),
        }
    }

    pub fn with_network(mut self, network_id: NetworkId) -> Self {
        self.network_id = network_id;
        self
    }

    pub fn with_num_keys(mut self, num_keys: usize) -> Self {
        self.num_keys = num_keys;
        self
    }

    pub fn with_derivation_path(mut self, path: impl Into<String>) -> Self {
        self.derivation_path = Some(path.into());
        self
    }

    pub fn with_sponsor(mut self, sponsor: Sponsor) -> Self {
        self.sponsor = Some(sponsor);
        self
    }

    pub fn with_rpc(mut self, rpc: Arc<dyn LedgerProvider>) -> Self {
        self.rpc = Some(rpc);
        self
    }

    pub fn with_rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    /// local mode, never touch tee hardware
    pub fn without_hardware(mut self) -> Self {
        self.hardware = Hardware::Disabled;
        self
    }

    pub fn with_hardware(mut self, capability: Arc<dyn TeeCapability>) -> Self {
        self.hardware = Hardware::Provided(capability);
        self
    }

    pub fn with_collateral_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.collateral_endpoint = endpoint.into();
        self
    }

    /// check every field once, before any key is derived
    pub fn validate(&self) -> Result<()> {
        if !is_valid_account_id(&self.contract_id) {
            return Err(Error::Config(format!("invalid contract id {:?}", self.contract_id)));
        }
        if self.num_keys == 0 || self.num_keys > MAX_KEYS {
            return Err(Error::Config(format!(
                "num_keys must be between 1 and {}, got {}",
                MAX_KEYS, self.num_keys
            )));
        }
        if let Some(path) = &self.derivation_path {
            if path.is_empty() {
                return Err(Error::Config("derivation path must not be empty".into()));
            }
        }
        if let Some(sponsor) = &self.sponsor {
            if !is_valid_account_id(&sponsor.account_id) {
                return Err(Error::Config(format!(
                    "invalid sponsor account id {:?}",
                    sponsor.account_id
                )));
            }
            sponsor.keypair()?;
        }
        if self.collateral_endpoint.is_empty() {
            return Err(Error::Config("collateral endpoint must not be empty".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("network_id", &self.network_id)
            .field("contract_id", &self.contract_id)
            .field("num_keys", &self.num_keys)
            .field("derivation_path", &self.derivation_path)
            .field("sponsor", &self.sponsor)
            .field("rpc", &self.rpc.as_ref().map(|_| "custom"))
            .field("rpc_url", &self.rpc_url)
            .field("hardware", &self.hardware)
            .field("collateral_endpoint", &self.collateral_endpoint)
            .finish()
    }
}

/// named or implicit account id
///
/// 2-64 chars of `a-z0-9` split by single `-`, `_` or `.` separators
pub fn is_valid_account_id(account_id: &str) -> bool {
    if account_id.len() < 2 || account_id.len() > 64 {
        return false;
    }
    let mut last_was_separator = true;
    for c in account_id.chars() {
        match c {
            'a'..='z' | '0'..='9' => last_was_separator = false,
            '-' | '_' | '.' => {
                if last_was_separator {
                    return false;
                }
                last_was_separator = true;
            }
            _ => return false,
        }
    }
    !last_was_separator
}
