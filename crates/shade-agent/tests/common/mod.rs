//! shared fakes for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use shade_agent::account::KeyPair;
use shade_agent::ledger::{
    AccessKeyInfo, AccountInfo, Action, BlockReference, ExecutionStatus, LedgerProvider,
    TransactionRequest, TxOutcome,
};
use shade_agent::tee::{RawEventLog, TcbReport, TeeCapability, REPORT_DATA_SIZE};
use shade_agent::{Error, Result};

/// one send_transaction attempt
#[derive(Clone, Debug)]
pub struct SentTx {
    /// public key that signed
    pub signer: String,
    pub request: TransactionRequest,
    pub succeeded: bool,
}

#[derive(Default)]
struct LedgerState {
    access_keys: HashMap<String, Vec<String>>,
    balances: HashMap<String, u128>,
    views: HashMap<String, Value>,
    view_error: Option<String>,
    call_result: Vec<u8>,
    failing_sends: u32,
    erroring_sends: u32,
    sent: Vec<SentTx>,
    access_key_queries: usize,
}

/// in-memory ledger that applies key and transfer actions
pub struct MockLedger {
    network: String,
    state: Mutex<LedgerState>,
}

impl MockLedger {
    pub fn new() -> Arc<Self> {
        Self::on_network("testnet")
    }

    pub fn on_network(network: &str) -> Arc<Self> {
        Arc::new(Self {
            network: network.to_string(),
            state: Mutex::new(LedgerState::default()),
        })
    }

    pub fn set_access_keys(&self, account_id: &str, keys: Vec<String>) {
        self.state
            .lock()
            .unwrap()
            .access_keys
            .insert(account_id.to_string(), keys);
    }

    pub fn access_keys_of(&self, account_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .access_keys
            .get(account_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_balance(&self, account_id: &str, amount: u128) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(account_id.to_string(), amount);
    }

    pub fn set_view(&self, method_name: &str, value: Value) {
        self.state
            .lock()
            .unwrap()
            .views
            .insert(method_name.to_string(), value);
    }

    pub fn fail_views_with(&self, message: &str) {
        self.state.lock().unwrap().view_error = Some(message.to_string());
    }

    /// bytes returned by successful function calls
    pub fn set_call_result(&self, bytes: &[u8]) {
        self.state.lock().unwrap().call_result = bytes.to_vec();
    }

    /// the next `n` transactions execute with a failure status
    pub fn fail_next_transactions(&self, n: u32) {
        self.state.lock().unwrap().failing_sends = n;
    }

    /// the next `n` transactions never reach the chain
    pub fn error_next_transactions(&self, n: u32) {
        self.state.lock().unwrap().erroring_sends = n;
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().unwrap().sent.clone()
    }

    /// actions of every successful transaction, in order
    pub fn applied_actions(&self) -> Vec<Action> {
        self.sent()
            .into_iter()
            .filter(|tx| tx.succeeded)
            .flat_map(|tx| tx.request.actions)
            .collect()
    }

    pub fn access_key_queries(&self) -> usize {
        self.state.lock().unwrap().access_key_queries
    }
}

#[async_trait]
impl LedgerProvider for MockLedger {
    async fn network_id(&self) -> Result<String> {
        Ok(self.network.clone())
    }

    async fn call_function(
        &self,
        _contract_id: &str,
        method_name: &str,
        _args: &Value,
        _block: &BlockReference,
    ) -> Result<Value> {
        let state = self.state.lock().unwrap();
        if let Some(message) = &state.view_error {
            return Err(Error::Rpc(message.clone()));
        }
        Ok(state.views.get(method_name).cloned().unwrap_or(Value::Null))
    }

    async fn view_account(&self, account_id: &str) -> Result<AccountInfo> {
        let state = self.state.lock().unwrap();
        match state.balances.get(account_id) {
            Some(amount) => Ok(AccountInfo {
                amount: *amount,
                ..Default::default()
            }),
            None => Err(Error::Rpc(format!("account {} does not exist", account_id))),
        }
    }

    async fn access_keys(&self, account_id: &str) -> Result<Vec<AccessKeyInfo>> {
        let mut state = self.state.lock().unwrap();
        state.access_key_queries += 1;
        Ok(state
            .access_keys
            .get(account_id)
            .map(|keys| {
                keys.iter()
                    .map(|k| AccessKeyInfo {
                        public_key: k.clone(),
                        nonce: 0,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn send_transaction(&self, signer: &KeyPair, request: TransactionRequest) -> Result<TxOutcome> {
        let mut state = self.state.lock().unwrap();
        let hash = format!("tx{}", state.sent.len());

        if state.erroring_sends > 0 {
            state.erroring_sends -= 1;
            state.sent.push(SentTx {
                signer: signer.public_key(),
                request,
                succeeded: false,
            });
            return Err(Error::Rpc("connection reset".into()));
        }
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            state.sent.push(SentTx {
                signer: signer.public_key(),
                request,
                succeeded: false,
            });
            return Ok(TxOutcome {
                hash,
                status: ExecutionStatus::Failure("{\"ActionError\":{}}".into()),
            });
        }

        for action in &request.actions {
            match action {
                Action::AddKey { public_key } => state
                    .access_keys
                    .entry(request.signer_id.clone())
                    .or_default()
                    .push(public_key.clone()),
                Action::DeleteKey { public_key } => {
                    if let Some(keys) = state.access_keys.get_mut(&request.signer_id) {
                        keys.retain(|k| k != public_key);
                    }
                }
                Action::Transfer { deposit } => {
                    *state.balances.entry(request.receiver_id.clone()).or_default() += deposit;
                }
                Action::FunctionCall { .. } => {}
            }
        }
        let result = state.call_result.clone();
        state.sent.push(SentTx {
            signer: signer.public_key(),
            request,
            succeeded: true,
        });
        Ok(TxOutcome {
            hash,
            status: ExecutionStatus::Success(result),
        })
    }
}

/// tee returning fixed reports and quotes, counting every call
#[derive(Default)]
pub struct FakeTee {
    pub calls: AtomicUsize,
    pub last_report_data: Mutex<Option<[u8; REPORT_DATA_SIZE]>>,
}

impl FakeTee {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn quote() -> Vec<u8> {
        vec![0x04, 0x00, 0x02, 0x00, 0x81]
    }

    pub fn report() -> TcbReport {
        TcbReport {
            mrtd: "a1".repeat(48),
            rtmr0: "b2".repeat(48),
            rtmr1: "c3".repeat(48),
            rtmr2: "d4".repeat(48),
            rtmr3: "e5".repeat(48),
            os_image_hash: "0f".repeat(32),
            compose_hash: "1e".repeat(32),
            device_id: "2d".repeat(32),
            app_compose: "{\"runner\":\"docker-compose\"}".into(),
            event_log: vec![
                RawEventLog {
                    imr: 3,
                    event_type: 134217729,
                    digest: "aa".repeat(48),
                    event: "app-id".into(),
                    event_payload: "01".into(),
                },
                RawEventLog {
                    imr: 3,
                    event_type: 134217729,
                    digest: "bb".repeat(48),
                    event: "compose-hash".into(),
                    event_payload: "02".into(),
                },
            ],
        }
    }
}

#[async_trait]
impl TeeCapability for FakeTee {
    async fn info(&self) -> Result<TcbReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::report())
    }

    async fn get_quote(&self, report_data: &[u8; REPORT_DATA_SIZE]) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_report_data.lock().unwrap() = Some(*report_data);
        Ok(Self::quote())
    }

    async fn derive_key(&self, _material: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0x42; 32])
    }
}

/// public key string derived from a path outside a tee
pub async fn key_for_path(path: &str) -> String {
    shade_agent::identity::derive_identity(None, Some(path))
        .await
        .unwrap()
        .keypair
        .public_key()
}
