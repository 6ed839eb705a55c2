//! ledger provider over near-api

use async_trait::async_trait;
use near_api::{Account, Contract, NetworkConfig, RPCEndpoint, Transaction};
use near_api_types::transaction::actions::{
    AccessKey, AccessKeyPermission, Action as NearAction, AddKeyAction, DeleteKeyAction,
    FunctionCallAction, TransferAction,
};
use near_api_types::{AccountId, CryptoHash, NearGas, NearToken, Reference};
use serde_json::Value;
use tracing::debug;

use crate::account::{parse_public_key, KeyPair};
use crate::config::NetworkId;
use crate::ledger::{
    AccessKeyInfo, AccountInfo, Action, BlockReference, ExecutionStatus, LedgerProvider,
    TransactionRequest, TxOutcome,
};
use crate::{Error, Result};

/// near rpc client built on near-api
pub struct NearProvider {
    network: NetworkConfig,
}

impl NearProvider {
    pub fn new(network: NetworkConfig) -> Self {
        Self { network }
    }

    /// public rpc endpoints of a network
    pub fn for_network(network: NetworkId) -> Self {
        Self::new(network_config(network))
    }

    /// `network` served by a custom rpc endpoint
    pub fn with_rpc_url(network: NetworkId, url: &str) -> Result<Self> {
        let url = url
            .parse()
            .map_err(|_| Error::Config(format!("invalid rpc url {:?}", url)))?;
        Ok(Self::new(NetworkConfig {
            rpc_endpoints: vec![RPCEndpoint::new(url)],
            ..network_config(network)
        }))
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }
}

fn network_config(network: NetworkId) -> NetworkConfig {
    match network {
        NetworkId::Testnet => NetworkConfig::testnet(),
        NetworkId::Mainnet => NetworkConfig::mainnet(),
    }
}

fn account_id(account_id: &str) -> Result<AccountId> {
    account_id
        .parse()
        .map_err(|_| Error::Config(format!("invalid account id {:?}", account_id)))
}

fn reference(block: &BlockReference) -> Result<Reference> {
    Ok(match block {
        BlockReference::Final => Reference::Final,
        BlockReference::Optimistic => Reference::Optimistic,
        BlockReference::Height(height) => Reference::AtBlock(*height),
        BlockReference::Hash(hash) => Reference::AtBlockHash(
            hash.parse::<CryptoHash>()
                .map_err(|_| Error::Rpc(format!("invalid block hash {}", hash)))?,
        ),
    })
}

/// map a transaction action onto its near-api form
fn near_action(action: Action) -> Result<NearAction> {
    Ok(match action {
        Action::FunctionCall {
            method_name,
            args,
            gas,
            deposit,
        } => NearAction::FunctionCall(Box::new(FunctionCallAction {
            method_name,
            args,
            gas: NearGas::from_gas(gas),
            deposit: NearToken::from_yoctonear(deposit),
        })),
        Action::Transfer { deposit } => NearAction::Transfer(TransferAction {
            deposit: NearToken::from_yoctonear(deposit),
        }),
        Action::AddKey { public_key } => NearAction::AddKey(Box::new(AddKeyAction {
            public_key: parse_public_key(&public_key)?,
            access_key: AccessKey {
                nonce: 0.into(),
                permission: AccessKeyPermission::FullAccess,
            },
        })),
        Action::DeleteKey { public_key } => NearAction::DeleteKey(Box::new(DeleteKeyAction {
            public_key: parse_public_key(&public_key)?,
        })),
    })
}

#[async_trait]
impl LedgerProvider for NearProvider {
    async fn network_id(&self) -> Result<String> {
        Ok(self.network.network_name.clone())
    }

    async fn call_function(
        &self,
        contract_id: &str,
        method_name: &str,
        args: &Value,
        block: &BlockReference,
    ) -> Result<Value> {
        let result = Contract(account_id(contract_id)?)
            .call_function(method_name, args.clone())
            .map_err(|e| Error::Rpc(e.to_string()))?
            .read_only::<Value>()
            .at(reference(block)?)
            .fetch_from(&self.network)
            .await
            .map_err(|e| Error::Rpc(e.to_string()))?;
        Ok(result.data)
    }

    async fn view_account(&self, account_id_str: &str) -> Result<AccountInfo> {
        let account = Account(account_id(account_id_str)?)
            .view()
            .fetch_from(&self.network)
            .await
            .map_err(|e| Error::Rpc(e.to_string()))?
            .data;
        Ok(AccountInfo {
            amount: account.amount.as_yoctonear(),
            locked: account.locked.as_yoctonear(),
            storage_usage: account.storage_usage,
        })
    }

    async fn access_keys(&self, account_id_str: &str) -> Result<Vec<AccessKeyInfo>> {
        let keys = Account(account_id(account_id_str)?)
            .list_keys()
            .fetch_from(&self.network)
            .await
            .map_err(|e| Error::Rpc(e.to_string()))?
            .data;
        Ok(keys
            .into_iter()
            .map(|(public_key, access_key)| AccessKeyInfo {
                public_key: public_key.to_string(),
                nonce: access_key.nonce.0,
            })
            .collect())
    }

    async fn send_transaction(&self, signer: &KeyPair, request: TransactionRequest) -> Result<TxOutcome> {
        debug!(
            receiver = %request.receiver_id,
            actions = request.actions.len(),
            "submitting transaction as {}",
            request.signer_id
        );
        let mut tx = Transaction::construct(
            account_id(&request.signer_id)?,
            account_id(&request.receiver_id)?,
        );
        for action in request.actions {
            tx = tx.add_action(near_action(action)?);
        }

        let result = tx
            .with_signer(signer.signer()?)
            .send_to(&self.network)
            .await
            .map_err(|e| Error::Rpc(e.to_string()))?;

        let hash = result.outcome().transaction_hash.to_string();
        let status = match result.into_result() {
            Ok(success) => ExecutionStatus::Success(
                success
                    .raw_bytes()
                    .map_err(|e| Error::Rpc(format!("invalid return value in {}: {}", hash, e)))?,
            ),
            Err(failure) => ExecutionStatus::Failure(format!("{:?}", failure)),
        };
        Ok(TxOutcome { hash, status })
    }
}
