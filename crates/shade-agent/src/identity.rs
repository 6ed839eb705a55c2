//! identity derivation
//!
//! one derivation routine shared by the primary key and every additional key:
//! 1. tee present: sha256(local randomness || tee derived key), path ignored
//! 2. no tee, path given: sha256(path), deterministic everywhere
//! 3. neither: sha256(local randomness)
//!
//! the seed is then expanded into a keypair (see [`crate::account`]).

use tracing::debug;

use crate::account::KeyPair;
use crate::crypto::{random_bytes, sha256};
use crate::tee::TeeCapability;
use crate::{Error, Result};

/// seed plus how it was obtained
pub struct DerivedSeed {
    pub seed: [u8; 32],
    pub used_hardware: bool,
}

/// keypair plus how its seed was obtained
#[derive(Debug, Clone)]
pub struct DerivedKey {
    pub keypair: KeyPair,
    pub used_hardware: bool,
}

/// derive a 32-byte seed
///
/// errors carry no detail about the seed or the inputs
pub async fn derive_seed(
    capability: Option<&dyn TeeCapability>,
    derivation_path: Option<&str>,
) -> Result<DerivedSeed> {
    if let Some(tee) = capability {
        let local: [u8; 32] = random_bytes();
        let tee_key = tee
            .derive_key(&hex::encode(local))
            .await
            .map_err(|_| Error::AgentCreation)?;
        if tee_key.is_empty() {
            return Err(Error::AgentCreation);
        }
        return Ok(DerivedSeed {
            seed: sha256(&[&local, &tee_key]),
            used_hardware: true,
        });
    }

    let seed = match derivation_path {
        Some(path) => sha256(&[path.as_bytes()]),
        None => sha256(&[&random_bytes::<32>()]),
    };
    Ok(DerivedSeed {
        seed,
        used_hardware: false,
    })
}

/// derive a keypair
pub async fn derive_identity(
    capability: Option<&dyn TeeCapability>,
    derivation_path: Option<&str>,
) -> Result<DerivedKey> {
    let DerivedSeed { seed, used_hardware } = derive_seed(capability, derivation_path).await?;
    let keypair = KeyPair::from_seed(&seed).map_err(|_| Error::AgentCreation)?;
    debug!(used_hardware, "derived key {}", keypair.public_key());
    Ok(DerivedKey {
        keypair,
        used_hardware,
    })
}

/// derivation path of the additional key at 1-based `index`
pub fn additional_key_path(base: Option<&str>, index: usize) -> Option<String> {
    base.map(|path| format!("{}-{}", path, index))
}
