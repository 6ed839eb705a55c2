//! account and key management
//!
//! a 32-byte seed becomes a bip39 mnemonic, which near-api expands the way
//! near wallets do (`m/44'/397'/0'`)

use std::sync::Arc;

use bip39::Mnemonic;
use near_api::{signer, Signer};
use near_api_types::{PublicKey, SecretKey};

use crate::{Error, Result};

/// prefix used by ed25519 key strings
pub const ED25519_PREFIX: &str = "ed25519:";

/// ed25519 keypair held by an agent
#[derive(Clone)]
pub struct KeyPair {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl KeyPair {
    /// expand a seed through the standard seed phrase path
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self> {
        let mnemonic = Mnemonic::from_entropy(seed).map_err(|_| Error::AgentCreation)?;
        let secret_key = signer::generate_secret_key_from_seed_phrase(mnemonic.to_string())
            .map_err(|_| Error::AgentCreation)?;
        Ok(Self::from_near_key(secret_key))
    }

    /// parse an `ed25519:<base58>` secret key string
    pub fn from_secret_key(secret_key: &str) -> Result<Self> {
        if !secret_key.starts_with(ED25519_PREFIX) {
            return Err(Error::InvalidKey("expected an ed25519 key".into()));
        }
        let secret_key: SecretKey = secret_key
            .parse()
            .map_err(|_| Error::InvalidKey("malformed secret key".into()))?;
        Ok(Self::from_near_key(secret_key))
    }

    fn from_near_key(secret_key: SecretKey) -> Self {
        let public_key = secret_key.public_key();
        Self {
            secret_key,
            public_key,
        }
    }

    /// near-api form of the public key
    pub fn near_public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// signer for near-api transactions
    pub fn signer(&self) -> Result<Arc<Signer>> {
        Signer::new(Signer::from_secret_key(self.secret_key.clone()))
            .map_err(|e| Error::InvalidKey(e.to_string()))
    }

    /// raw public key bytes
    pub fn public_key_bytes(&self) -> &[u8] {
        self.public_key.key_data()
    }

    /// `ed25519:<base58 public key>`
    pub fn public_key(&self) -> String {
        self.public_key.to_string()
    }

    /// `ed25519:<base58 secret key>`
    pub fn secret_key(&self) -> String {
        self.secret_key.to_string()
    }

    /// implicit account id: lower-case hex of the public key
    pub fn account_id(&self) -> String {
        hex::encode(self.public_key_bytes())
    }
}

impl PartialEq for KeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
    }
}

impl Eq for KeyPair {}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// parse an `ed25519:<base58>` public key string
pub fn parse_public_key(public_key: &str) -> Result<PublicKey> {
    if !public_key.starts_with(ED25519_PREFIX) {
        return Err(Error::InvalidKey(format!("unsupported key type: {}", public_key)));
    }
    public_key
        .parse()
        .map_err(|_| Error::InvalidKey(format!("malformed public key {}", public_key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_derivation() {
        let seed = [42u8; 32];
        let keypair = KeyPair::from_seed(&seed).unwrap();

        // same seed should give same keypair
        let keypair2 = KeyPair::from_seed(&seed).unwrap();
        assert_eq!(keypair.secret_key(), keypair2.secret_key());

        // different seed should give different keypair
        let keypair3 = KeyPair::from_seed(&[43u8; 32]).unwrap();
        assert_ne!(keypair.public_key(), keypair3.public_key());
    }

    #[test]
    fn test_seed_matches_wallet_phrase() {
        let seed = [3u8; 32];
        let phrase = Mnemonic::from_entropy(&seed).unwrap().to_string();
        let wallet_key = signer::generate_secret_key_from_seed_phrase(phrase).unwrap();
        assert_eq!(KeyPair::from_seed(&seed).unwrap().secret_key(), wallet_key.to_string());
    }

    #[test]
    fn test_account_id_is_hex_public_key() {
        let keypair = KeyPair::from_seed(&[7u8; 32]).unwrap();
        let account_id = keypair.account_id();
        assert_eq!(account_id.len(), 64);
        assert_eq!(account_id, account_id.to_lowercase());
        assert_eq!(hex::decode(&account_id).unwrap(), keypair.public_key_bytes());
        assert_eq!(&parse_public_key(&keypair.public_key()).unwrap(), keypair.near_public_key());
    }

    #[test]
    fn test_secret_key_string_roundtrip() {
        let keypair = KeyPair::from_seed(&[9u8; 32]).unwrap();
        let secret = keypair.secret_key();
        assert!(secret.starts_with(ED25519_PREFIX));

        let parsed = KeyPair::from_secret_key(&secret).unwrap();
        assert_eq!(parsed, keypair);
        assert!(parsed.signer().is_ok());
    }

    #[test]
    fn test_secret_key_rejects_garbage() {
        assert!(KeyPair::from_secret_key("secp256k1:abc").is_err());
        assert!(KeyPair::from_secret_key("ed25519:0OIl").is_err());
        assert!(KeyPair::from_secret_key("ed25519:2g").is_err());
        assert!(parse_public_key("ed25519:2g").is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let keypair = KeyPair::from_seed(&[1u8; 32]).unwrap();
        let debug = format!("{:?}", keypair);
        assert!(!debug.contains(&keypair.secret_key()));
    }
}
