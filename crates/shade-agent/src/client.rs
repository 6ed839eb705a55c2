//! high-level client for a shade agent
//!
//! ties together: identity derivation, key pool, attestation, ledger calls.
//! every error leaving this module is redacted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::attestation::{self, CollateralVerifier, DstackAttestation};
use crate::config::{Config, NetworkId};
use crate::identity::derive_identity;
use crate::keys::{submit_with_retries, KeyRing, MAX_ATTEMPTS};
use crate::ledger::{
    Action, BlockReference, LedgerProvider, NearProvider, TransactionRequest, DEFAULT_GAS,
};
use crate::redact::redact_value;
use crate::tee::TeeCapability;
use crate::{Error, Result};

/// deposit attached to `register_agent` (0.005 NEAR)
pub const REGISTER_DEPOSIT: u128 = 5_000_000_000_000_000_000_000;

/// gas attached to `register_agent` (300 Tgas)
pub const REGISTER_GAS: u64 = 300_000_000_000_000;

/// whitelist gate of a contract that runs agents outside a tee
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhitelistStatus {
    Whitelisted,
    Unwhitelisted,
    /// the contract requires a tee, so it keeps no whitelist
    NotRequired,
}

/// what the contract knows about this agent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationStatus {
    pub registered: bool,
    /// the contract's agent record, if registered
    pub agent: Option<Value>,
    /// `is_valid` of the agent record: measurements, ppid and attestation
    /// expiry all check out. `None` when unregistered or not reported
    pub is_valid: Option<bool>,
    pub whitelist: WhitelistStatus,
}

/// shade agent client
///
/// only [`ShadeClient::create`] builds one; the key pool is its only mutable
/// state and sits behind an async mutex.
pub struct ShadeClient {
    config: Config,
    ledger: Arc<dyn LedgerProvider>,
    capability: Option<Arc<dyn TeeCapability>>,
    verifier: CollateralVerifier,
    account_id: String,
    keys: Mutex<KeyRing>,
}

impl std::fmt::Debug for ShadeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadeClient")
            .field("account_id", &self.account_id)
            .field("contract_id", &self.config.contract_id)
            .field("network_id", &self.config.network_id)
            .field("tee", &self.capability.is_some())
            .finish_non_exhaustive()
    }
}

impl ShadeClient {
    /// validate `config`, probe for a tee and derive the primary key
    ///
    /// # flow
    /// 1. validate config
    /// 2. resolve the tee capability (probe, disabled or provided)
    /// 3. pick the ledger provider, checking a supplied one is on the right network
    /// 4. derive the primary key
    pub async fn create(config: Config) -> Result<Self> {
        Self::build(config).await.map_err(Error::redacted)
    }

    async fn build(config: Config) -> Result<Self> {
        config.validate()?;

        let capability = config.hardware.resolve().await;
        if capability.is_some() && config.derivation_path.is_some() {
            warn!("running in a tee, derivation path is ignored");
        }

        let ledger = match &config.rpc {
            Some(rpc) => {
                let network = rpc.network_id().await?;
                if network != config.network_id.as_str() {
                    return Err(Error::Config(format!(
                        "rpc is on {} but network id is {}",
                        network, config.network_id
                    )));
                }
                rpc.clone()
            }
            None => {
                let provider = match &config.rpc_url {
                    Some(url) => NearProvider::with_rpc_url(config.network_id, url)?,
                    None => NearProvider::for_network(config.network_id),
                };
                Arc::new(provider) as Arc<dyn LedgerProvider>
            }
        };

        let primary = derive_identity(capability.as_deref(), config.derivation_path.as_deref()).await?;
        let account_id = primary.keypair.account_id();
        info!(
            tee = capability.is_some(),
            network = %config.network_id,
            "created agent {}",
            account_id
        );

        Ok(Self {
            verifier: CollateralVerifier::new(config.collateral_endpoint.clone()),
            keys: Mutex::new(KeyRing::new(primary, config.derivation_path.clone())),
            account_id,
            ledger,
            capability,
            config,
        })
    }

    /// implicit account id of the primary key
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn contract_id(&self) -> &str {
        &self.config.contract_id
    }

    pub fn network_id(&self) -> NetworkId {
        self.config.network_id
    }

    /// whether a tee capability was found
    pub fn has_tee(&self) -> bool {
        self.capability.is_some()
    }

    /// replace the collateral verifier, e.g. to shorten its timeout
    pub fn with_collateral_verifier(mut self, verifier: CollateralVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    /// account balance in yoctoNEAR
    pub async fn balance(&self) -> Result<u128> {
        let account = self
            .ledger
            .view_account(&self.account_id)
            .await
            .map_err(Error::redacted)?;
        Ok(account.amount)
    }

    /// registration and whitelist state on the contract
    pub async fn registration_status(&self) -> Result<RegistrationStatus> {
        self.fetch_registration_status().await.map_err(Error::redacted)
    }

    async fn fetch_registration_status(&self) -> Result<RegistrationStatus> {
        let agent = self
            .view_inner("get_agent", &json!({ "account_id": self.account_id }), None)
            .await?;
        let agent = (!agent.is_null()).then_some(agent);

        let requires_tee = self
            .view_inner("get_requires_tee", &json!({}), None)
            .await?
            .as_bool()
            .unwrap_or(true);

        let whitelist = if requires_tee {
            WhitelistStatus::NotRequired
        } else {
            let listed: Vec<String> = serde_json::from_value(
                self.view_inner("get_whitelisted_agents_for_local", &json!({}), None)
                    .await?,
            )?;
            if listed.iter().any(|id| id == &self.account_id) {
                WhitelistStatus::Whitelisted
            } else {
                WhitelistStatus::Unwhitelisted
            }
        };

        let is_valid = agent
            .as_ref()
            .and_then(|record| record.get("is_valid"))
            .and_then(Value::as_bool);

        Ok(RegistrationStatus {
            registered: agent.is_some(),
            agent,
            is_valid,
            whitelist,
        })
    }

    /// fetch a fresh attestation and submit `register_agent`
    ///
    /// always re-attempts; repeated registration is for the contract to reject
    pub async fn register(&self) -> Result<bool> {
        self.register_inner().await.map_err(Error::redacted)
    }

    async fn register_inner(&self) -> Result<bool> {
        let attestation = self.attestation_inner().await?;
        let result = self
            .call_inner(
                "register_agent",
                json!({ "attestation": attestation }),
                Some(REGISTER_DEPOSIT),
                Some(REGISTER_GAS),
            )
            .await?;
        let registered = result.as_bool().unwrap_or(false);
        info!(registered, "register_agent for {}", self.account_id);
        Ok(registered)
    }

    /// signed call to the agent contract
    ///
    /// the first call reconciles the key pool; each call signs with the next key
    pub async fn call(
        &self,
        method_name: &str,
        args: Value,
        deposit: Option<u128>,
        gas: Option<u64>,
    ) -> Result<Value> {
        self.call_inner(method_name, args, deposit, gas)
            .await
            .map_err(Error::redacted)
    }

    async fn call_inner(
        &self,
        method_name: &str,
        args: Value,
        deposit: Option<u128>,
        gas: Option<u64>,
    ) -> Result<Value> {
        let mut keys = self.keys.lock().await;
        keys.reconcile(
            self.ledger.as_ref(),
            self.capability.as_deref(),
            self.config.num_keys,
        )
        .await?;
        let signer = keys.next_signer().clone();
        drop(keys);

        debug!(
            method_name,
            args = %redact_value(&args),
            "calling {}",
            self.config.contract_id
        );
        let request = TransactionRequest {
            signer_id: self.account_id.clone(),
            receiver_id: self.config.contract_id.clone(),
            actions: vec![Action::FunctionCall {
                method_name: method_name.to_string(),
                args: serde_json::to_vec(&args)?,
                gas: gas.unwrap_or(DEFAULT_GAS),
                deposit: deposit.unwrap_or(0),
            }],
        };

        let outcome = self.ledger.send_transaction(&signer, request).await?;
        if !outcome.is_success() {
            warn!("{} failed in {}", method_name, outcome.hash);
        }
        outcome.json_value()
    }

    /// read-only call to the agent contract
    pub async fn view(
        &self,
        method_name: &str,
        args: Value,
        block: Option<BlockReference>,
    ) -> Result<Value> {
        self.view_inner(method_name, &args, block)
            .await
            .map_err(Error::redacted)
    }

    async fn view_inner(
        &self,
        method_name: &str,
        args: &Value,
        block: Option<BlockReference>,
    ) -> Result<Value> {
        self.ledger
            .call_function(
                &self.config.contract_id,
                method_name,
                args,
                &block.unwrap_or_default(),
            )
            .await
    }

    /// attestation committing to this agent's account id
    ///
    /// the null attestation when no tee is present or a key was derived without it
    pub async fn get_attestation(&self) -> Result<DstackAttestation> {
        self.attestation_inner().await.map_err(Error::redacted)
    }

    async fn attestation_inner(&self) -> Result<DstackAttestation> {
        let derived_with_hardware = self.keys.lock().await.derived_with_hardware();
        attestation::get_attestation(
            self.capability.as_deref(),
            derived_with_hardware,
            &self.account_id,
            &self.verifier,
        )
        .await
    }

    /// transfer `amount` yoctoNEAR from the sponsor to this agent
    pub async fn fund(&self, amount: u128) -> Result<()> {
        self.fund_inner(amount).await.map_err(Error::redacted)
    }

    async fn fund_inner(&self, amount: u128) -> Result<()> {
        let sponsor = self
            .config
            .sponsor
            .as_ref()
            .ok_or_else(|| Error::Config("funding requires sponsor credentials".into()))?;
        let signer = sponsor.keypair()?;
        let request = TransactionRequest {
            signer_id: sponsor.account_id.clone(),
            receiver_id: self.account_id.clone(),
            actions: vec![Action::Transfer { deposit: amount }],
        };

        submit_with_retries(self.ledger.as_ref(), &signer, request)
            .await
            .ok_or(Error::Funding {
                attempts: MAX_ATTEMPTS,
            })?;
        info!(amount, "funded {} from {}", self.account_id, sponsor.account_id);
        Ok(())
    }

    /// secret keys of the whole pool, primary first
    ///
    /// refused unless `acknowledge_risk`; anyone holding them can act as this
    /// agent outside the tee
    pub async fn private_keys(&self, acknowledge_risk: bool) -> Result<Vec<String>> {
        if !acknowledge_risk {
            return Err(Error::ExportRefused);
        }
        warn!(
            "exporting private keys of {}, they now exist outside the tee",
            self.account_id
        );
        let keys = self.keys.lock().await;
        let secrets = keys.keys().iter().map(|k| k.secret_key()).collect();
        Ok(secrets)
    }
}
