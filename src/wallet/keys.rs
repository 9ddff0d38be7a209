//! Key Provider
//!
//! BIP32 derivation of the service-owned claim/refund keypairs. The
//! derivation cursor lives in the store; this module only turns indices
//! into keys.

use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::key::{Keypair, Secp256k1};
use bitcoin::secp256k1::All;
use thiserror::Error;

/// Key derivation errors
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    #[error("derivation failed: {0}")]
    Derivation(String),
}

/// Derives service keypairs from the master seed
pub struct KeyProvider {
    master: Xpriv,
    secp: Secp256k1<All>,
}

impl KeyProvider {
    pub fn from_seed_hex(seed_hex: &str, network: bitcoin::Network) -> Result<Self, KeyError> {
        let seed = hex::decode(seed_hex).map_err(|e| KeyError::InvalidSeed(e.to_string()))?;
        if seed.len() < 16 {
            return Err(KeyError::InvalidSeed(format!(
                "seed too short: {} bytes",
                seed.len()
            )));
        }

        let master = Xpriv::new_master(network, &seed)
            .map_err(|e| KeyError::InvalidSeed(e.to_string()))?;

        Ok(Self {
            master,
            secp: Secp256k1::new(),
        })
    }

    fn path(index: u32) -> DerivationPath {
        // m/86'/0'/0'/0/<index>
        DerivationPath::from(vec![
            ChildNumber::from_hardened_idx(86).expect("valid child number"),
            ChildNumber::from_hardened_idx(0).expect("valid child number"),
            ChildNumber::from_hardened_idx(0).expect("valid child number"),
            ChildNumber::from_normal_idx(0).expect("valid child number"),
            ChildNumber::from_normal_idx(index).expect("valid child number"),
        ])
    }

    /// Keypair at the given derivation index
    pub fn keypair(&self, index: u32) -> Result<Keypair, KeyError> {
        let derived = self
            .master
            .derive_priv(&self.secp, &Self::path(index))
            .map_err(|e| KeyError::Derivation(e.to_string()))?;

        Ok(Keypair::from_secret_key(&self.secp, &derived.private_key))
    }

    /// Compressed public key at the given index (hex)
    pub fn public_key_hex(&self, index: u32) -> Result<String, KeyError> {
        Ok(hex::encode(self.keypair(index)?.public_key().serialize()))
    }

    /// Raw secret key bytes at the given index
    pub fn secret_bytes(&self, index: u32) -> Result<[u8; 32], KeyError> {
        Ok(self.keypair(index)?.secret_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> KeyProvider {
        KeyProvider::from_seed_hex(
            "000102030405060708090a0b0c0d0e0f",
            bitcoin::Network::Regtest,
        )
        .unwrap()
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = provider().public_key_hex(0).unwrap();
        let b = provider().public_key_hex(0).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 66);
    }

    #[test]
    fn test_indices_yield_distinct_keys() {
        let provider = provider();
        assert_ne!(
            provider.public_key_hex(0).unwrap(),
            provider.public_key_hex(1).unwrap()
        );
    }

    #[test]
    fn test_short_seed_rejected() {
        assert!(KeyProvider::from_seed_hex("0011", bitcoin::Network::Regtest).is_err());
        assert!(KeyProvider::from_seed_hex("not-hex", bitcoin::Network::Regtest).is_err());
    }
}
