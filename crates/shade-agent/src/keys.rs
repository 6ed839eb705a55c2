//! signing key pool
//!
//! the agent signs with a pool of full access keys on its own account. key 0
//! is the primary created with the client; keys 1..n are derived on the first
//! authenticated call and reconciled against the access keys the ledger
//! already has:
//!
//! ```text
//!   ledger: k access keys  ->  existing = k - 1 additional
//!   wanted: n keys         ->  desired  = n - 1 additional
//!
//!   derive max(existing, desired) additional keys
//!   existing < desired: add    [existing, desired)
//!   existing > desired: delete [desired, existing)
//!   keep [0, desired)
//! ```
//!
//! with a derivation path, additional key i comes from `{path}-{i}`, so a
//! restarted agent derives the same keys the ledger already holds.

use std::ops::Range;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::account::KeyPair;
use crate::identity::{additional_key_path, derive_identity, DerivedKey};
use crate::ledger::{Action, LedgerProvider, TransactionRequest, TxOutcome};
use crate::redact::redact_str;
use crate::tee::TeeCapability;
use crate::{Error, Result};

/// attempts per key update or funding transfer
pub const MAX_ATTEMPTS: u32 = 3;

/// what one reconciliation pass does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconciliationPlan {
    /// additional keys already on the ledger
    pub existing: usize,
    /// additional keys wanted
    pub desired: usize,
}

impl ReconciliationPlan {
    /// plan from the ledger's access key count and the wanted total
    pub fn compute(access_key_count: usize, num_keys: usize) -> Self {
        Self {
            existing: access_key_count.saturating_sub(1),
            desired: num_keys.saturating_sub(1),
        }
    }

    /// number of additional keys to derive
    pub fn to_derive(&self) -> usize {
        self.existing.max(self.desired)
    }

    /// derived indices to add to the ledger
    pub fn to_add(&self) -> Range<usize> {
        if self.existing < self.desired {
            self.existing..self.desired
        } else {
            0..0
        }
    }

    /// derived indices to delete from the ledger
    pub fn to_remove(&self) -> Range<usize> {
        if self.existing > self.desired {
            self.desired..self.existing
        } else {
            0..0
        }
    }

    /// derived indices the pool keeps
    pub fn keep(&self) -> Range<usize> {
        0..self.desired
    }
}

/// key pool of one client
pub struct KeyRing {
    keys: Vec<KeyPair>,
    current: usize,
    checked: bool,
    derived_with_hardware: bool,
    derivation_path: Option<String>,
}

impl KeyRing {
    pub fn new(primary: DerivedKey, derivation_path: Option<String>) -> Self {
        Self {
            keys: vec![primary.keypair],
            current: 0,
            checked: false,
            derived_with_hardware: primary.used_hardware,
            derivation_path,
        }
    }

    pub fn primary(&self) -> &KeyPair {
        &self.keys[0]
    }

    pub fn account_id(&self) -> String {
        self.primary().account_id()
    }

    pub fn keys(&self) -> &[KeyPair] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn is_checked(&self) -> bool {
        self.checked
    }

    /// true only when every key in the pool used tee entropy
    pub fn derived_with_hardware(&self) -> bool {
        self.derived_with_hardware
    }

    /// bring the ledger's access keys in line with `num_keys`, once
    pub async fn reconcile(
        &mut self,
        ledger: &dyn LedgerProvider,
        capability: Option<&dyn TeeCapability>,
        num_keys: usize,
    ) -> Result<()> {
        if self.checked {
            return Ok(());
        }

        let account_id = self.account_id();
        let access_keys = ledger.access_keys(&account_id).await?;
        let plan = ReconciliationPlan::compute(access_keys.len(), num_keys);
        debug!(?plan, "reconciling keys for {}", account_id);

        let derived = self.derive_additional(capability, plan.to_derive()).await?;

        let all_hardware = self.derived_with_hardware && derived.iter().all(|k| k.used_hardware);
        let any_hardware = self.derived_with_hardware || derived.iter().any(|k| k.used_hardware);
        if any_hardware && !all_hardware {
            self.derived_with_hardware = false;
            return Err(Error::InconsistentHardware);
        }

        for index in plan.to_add() {
            let public_key = derived[index].keypair.public_key();
            self.update_key(ledger, "add", Action::AddKey { public_key }).await?;
        }
        for index in plan.to_remove() {
            let public_key = derived[index].keypair.public_key();
            self.update_key(ledger, "remove", Action::DeleteKey { public_key }).await?;
        }

        let added = plan.to_add().len();
        let removed = plan.to_remove().len();
        if added > 0 || removed > 0 {
            info!(added, removed, "updated access keys of {}", account_id);
        }

        self.keys
            .extend(derived.into_iter().take(plan.keep().end).map(|k| k.keypair));
        self.derived_with_hardware = all_hardware;
        self.checked = true;
        Ok(())
    }

    /// round robin, advancing before use
    pub fn next_signer(&mut self) -> &KeyPair {
        if self.keys.len() > 1 {
            self.current = (self.current + 1) % self.keys.len();
        } else {
            self.current = 0;
        }
        &self.keys[self.current]
    }

    async fn derive_additional(
        &self,
        capability: Option<&dyn TeeCapability>,
        count: usize,
    ) -> Result<Vec<DerivedKey>> {
        let paths: Vec<Option<String>> = (1..=count)
            .map(|i| additional_key_path(self.derivation_path.as_deref(), i))
            .collect();
        let futures = paths
            .iter()
            .map(|path| derive_identity(capability, path.as_deref()));
        join_all(futures).await.into_iter().collect()
    }

    async fn update_key(
        &self,
        ledger: &dyn LedgerProvider,
        action_name: &'static str,
        action: Action,
    ) -> Result<()> {
        let account_id = self.account_id();
        let request = TransactionRequest {
            signer_id: account_id.clone(),
            receiver_id: account_id,
            actions: vec![action],
        };
        submit_with_retries(ledger, self.primary(), request)
            .await
            .map(|_| ())
            .ok_or(Error::KeyUpdate {
                action: action_name,
                attempts: MAX_ATTEMPTS,
            })
    }
}

/// submit `request`, retrying transaction failures and provider errors
///
/// `None` once every attempt failed; failures are only logged, redacted
pub(crate) async fn submit_with_retries(
    ledger: &dyn LedgerProvider,
    signer: &KeyPair,
    request: TransactionRequest,
) -> Option<TxOutcome> {
    for attempt in 1..=MAX_ATTEMPTS {
        match ledger.send_transaction(signer, request.clone()).await {
            Ok(outcome) if outcome.is_success() => return Some(outcome),
            Ok(outcome) => {
                warn!(attempt, "transaction {} failed", outcome.hash);
            }
            Err(e) => {
                warn!(attempt, "transaction not submitted: {}", redact_str(&e.to_string()));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(n: usize) -> KeyRing {
        let mut ring = KeyRing::new(
            DerivedKey {
                keypair: KeyPair::from_seed(&[0u8; 32]).unwrap(),
                used_hardware: false,
            },
            None,
        );
        for i in 1..n {
            ring.keys.push(KeyPair::from_seed(&[i as u8; 32]).unwrap());
        }
        ring
    }

    fn index_of(ring: &KeyRing, key: &KeyPair) -> usize {
        ring.keys.iter().position(|k| k == key).unwrap()
    }

    #[test]
    fn test_plan_add() {
        let plan = ReconciliationPlan::compute(1, 3);
        assert_eq!(plan.to_derive(), 2);
        assert_eq!(plan.to_add(), 0..2);
        assert!(plan.to_remove().is_empty());
        assert_eq!(plan.keep(), 0..2);
    }

    #[test]
    fn test_plan_remove() {
        let plan = ReconciliationPlan::compute(5, 2);
        assert_eq!(plan.to_derive(), 4);
        assert!(plan.to_add().is_empty());
        assert_eq!(plan.to_remove(), 1..4);
        assert_eq!(plan.keep(), 0..1);
    }

    #[test]
    fn test_plan_balanced() {
        let plan = ReconciliationPlan::compute(3, 3);
        assert_eq!(plan.to_derive(), 2);
        assert!(plan.to_add().is_empty());
        assert!(plan.to_remove().is_empty());
    }

    #[test]
    fn test_plan_unknown_account() {
        // no access keys yet counts as zero existing additional keys
        let plan = ReconciliationPlan::compute(0, 2);
        assert_eq!(plan.to_add(), 0..1);
    }

    #[test]
    fn test_single_key_always_primary() {
        let mut ring = ring(1);
        for _ in 0..5 {
            let key = ring.next_signer().clone();
            assert_eq!(index_of(&ring, &key), 0);
        }
    }

    #[test]
    fn test_rotation_order() {
        let n = 3;
        let mut ring = ring(n);
        let mut visited = Vec::new();
        for _ in 0..2 * n {
            let key = ring.next_signer().clone();
            visited.push(index_of(&ring, &key));
        }
        assert_eq!(visited, vec![1, 2, 0, 1, 2, 0]);
    }
}
