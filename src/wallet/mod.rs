//! Wallet Capability Interface
//!
//! `WalletProvider` is the capability surface the swap core consumes for
//! funding lockups and receiving claims. Providers declare what they can do
//! through `capabilities()` instead of being probed by error matching.
//!
//! `ServiceWallet` is the built-in single-key taproot wallet over the chain
//! backend; external wallet adapters implement the same trait.

pub mod keys;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash as _;
use bitcoin::key::{Keypair, Secp256k1, TapTweak as _};
use bitcoin::secp256k1::{All, Message, SecretKey};
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
    XOnlyPublicKey,
};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::chain::esplora::{ChainBackend, ChainError, Utxo};

pub use keys::{KeyError, KeyProvider};

/// P2TR key-spend input weight in vbytes, approximate
const KEY_SPEND_INPUT_VSIZE: u64 = 58;
const P2TR_OUTPUT_VSIZE: u64 = 43;
const TX_OVERHEAD_VSIZE: u64 = 11;
const DUST_LIMIT: u64 = 546;

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("insufficient funds: have {have} sat, need {need} sat")]
    InsufficientFunds { have: u64, need: u64 },

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("operation not supported by this wallet")]
    NotSupported,

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
}

/// What a wallet provider can do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletCapabilities {
    pub send: bool,
    pub sweep: bool,
    /// Token wallets only: approve/allowance handling
    pub token_approval: bool,
}

/// Capability interface over wallet backends
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Declared capabilities; callers check this instead of probing errors
    fn capabilities(&self) -> WalletCapabilities;

    /// A receive address of the wallet
    async fn get_address(&self) -> Result<String, WalletError>;

    /// Confirmed plus unconfirmed balance in satoshis
    async fn get_balance(&self) -> Result<u64, WalletError>;

    /// Send the given amount, returning the txid
    async fn send_to_address(
        &self,
        address: &str,
        amount_sat: u64,
        sat_per_vbyte: u64,
    ) -> Result<String, WalletError>;

    /// Send everything to the given address, returning the txid
    async fn sweep_wallet(
        &self,
        address: &str,
        sat_per_vbyte: u64,
    ) -> Result<String, WalletError>;
}

/// Single-key taproot wallet over the chain backend
pub struct ServiceWallet {
    secp: Secp256k1<All>,
    keypair: Keypair,
    network: Network,
    chain: Arc<dyn ChainBackend>,
}

impl ServiceWallet {
    pub fn from_key_hex(
        key_hex: &str,
        network: Network,
        chain: Arc<dyn ChainBackend>,
    ) -> Result<Self, WalletError> {
        let bytes = hex::decode(key_hex).map_err(|e| WalletError::InvalidKey(e.to_string()))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| WalletError::InvalidKey(e.to_string()))?;

        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &secret);

        Ok(Self {
            secp,
            keypair,
            network,
            chain,
        })
    }

    fn internal_key(&self) -> XOnlyPublicKey {
        XOnlyPublicKey::from_keypair(&self.keypair).0
    }

    fn address(&self) -> Address {
        Address::p2tr(&self.secp, self.internal_key(), None, self.network)
    }

    fn parse_destination(&self, address: &str) -> Result<Address, WalletError> {
        Address::from_str(address)
            .map_err(|e| WalletError::InvalidAddress(e.to_string()))?
            .require_network(self.network)
            .map_err(|e| WalletError::InvalidAddress(e.to_string()))
    }

    /// Greedily select utxos until the target amount plus fees is covered
    fn select_utxos(
        utxos: &[Utxo],
        amount_sat: u64,
        sat_per_vbyte: u64,
    ) -> Result<(Vec<Utxo>, u64), WalletError> {
        let mut sorted: Vec<Utxo> = utxos.to_vec();
        sorted.sort_by(|a, b| b.value.cmp(&a.value));

        let mut selected = Vec::new();
        let mut total = 0u64;

        for utxo in sorted {
            total += utxo.value;
            selected.push(utxo);

            let fee = Self::fee_for(selected.len() as u64, 2, sat_per_vbyte);
            if total >= amount_sat + fee {
                return Ok((selected, fee));
            }
        }

        let have = total;
        let need = amount_sat + Self::fee_for(selected.len().max(1) as u64, 2, sat_per_vbyte);
        Err(WalletError::InsufficientFunds { have, need })
    }

    fn fee_for(inputs: u64, outputs: u64, sat_per_vbyte: u64) -> u64 {
        (TX_OVERHEAD_VSIZE + inputs * KEY_SPEND_INPUT_VSIZE + outputs * P2TR_OUTPUT_VSIZE)
            * sat_per_vbyte.max(1)
    }

    fn build_and_sign(
        &self,
        inputs: &[Utxo],
        outputs: Vec<TxOut>,
    ) -> Result<Transaction, WalletError> {
        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: inputs
                .iter()
                .map(|utxo| {
                    Ok(TxIn {
                        previous_output: OutPoint {
                            txid: utxo
                                .txid
                                .parse()
                                .map_err(|_| WalletError::InvalidKey(utxo.txid.clone()))?,
                            vout: utxo.vout,
                        },
                        script_sig: ScriptBuf::new(),
                        sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                        witness: Witness::new(),
                    })
                })
                .collect::<Result<Vec<_>, WalletError>>()?,
            output: outputs,
        };

        let own_script = self.address().script_pubkey();
        let prevouts: Vec<TxOut> = inputs
            .iter()
            .map(|utxo| TxOut {
                value: Amount::from_sat(utxo.value),
                script_pubkey: own_script.clone(),
            })
            .collect();

        let tweaked = self.keypair.tap_tweak(&self.secp, None);

        for index in 0..tx.input.len() {
            let sighash = SighashCache::new(&tx)
                .taproot_key_spend_signature_hash(
                    index,
                    &Prevouts::All(&prevouts),
                    TapSighashType::Default,
                )
                .map_err(|e| WalletError::SigningFailed(e.to_string()))?;

            let msg = Message::from_digest(sighash.to_byte_array());
            let signature = self.secp.sign_schnorr(&msg, &tweaked.to_inner());

            let taproot_sig = bitcoin::taproot::Signature {
                signature,
                sighash_type: TapSighashType::Default,
            };
            tx.input[index].witness = Witness::from_slice(&[taproot_sig.to_vec()]);
        }

        Ok(tx)
    }
}

#[async_trait]
impl WalletProvider for ServiceWallet {
    fn capabilities(&self) -> WalletCapabilities {
        WalletCapabilities {
            send: true,
            sweep: true,
            token_approval: false,
        }
    }

    async fn get_address(&self) -> Result<String, WalletError> {
        Ok(self.address().to_string())
    }

    async fn get_balance(&self) -> Result<u64, WalletError> {
        let utxos = self.chain.address_utxos(&self.address().to_string()).await?;
        Ok(utxos.iter().map(|u| u.value).sum())
    }

    async fn send_to_address(
        &self,
        address: &str,
        amount_sat: u64,
        sat_per_vbyte: u64,
    ) -> Result<String, WalletError> {
        let destination = self.parse_destination(address)?;
        let utxos = self.chain.address_utxos(&self.address().to_string()).await?;
        let (selected, fee) = Self::select_utxos(&utxos, amount_sat, sat_per_vbyte)?;
        let total: u64 = selected.iter().map(|u| u.value).sum();

        let mut outputs = vec![TxOut {
            value: Amount::from_sat(amount_sat),
            script_pubkey: destination.script_pubkey(),
        }];

        let change = total - amount_sat - fee;
        if change >= DUST_LIMIT {
            outputs.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: self.address().script_pubkey(),
            });
        }

        let tx = self.build_and_sign(&selected, outputs)?;
        let tx_hex = bitcoin::consensus::encode::serialize_hex(&tx);
        Ok(self.chain.broadcast(&tx_hex).await?)
    }

    async fn sweep_wallet(
        &self,
        address: &str,
        sat_per_vbyte: u64,
    ) -> Result<String, WalletError> {
        let destination = self.parse_destination(address)?;
        let utxos = self.chain.address_utxos(&self.address().to_string()).await?;
        if utxos.is_empty() {
            return Err(WalletError::InsufficientFunds { have: 0, need: 1 });
        }

        let total: u64 = utxos.iter().map(|u| u.value).sum();
        let fee = Self::fee_for(utxos.len() as u64, 1, sat_per_vbyte);
        let amount = total.saturating_sub(fee);
        if amount < DUST_LIMIT {
            return Err(WalletError::InsufficientFunds {
                have: total,
                need: fee + DUST_LIMIT,
            });
        }

        let outputs = vec![TxOut {
            value: Amount::from_sat(amount),
            script_pubkey: destination.script_pubkey(),
        }];

        let tx = self.build_and_sign(&utxos, outputs)?;
        let tx_hex = bitcoin::consensus::encode::serialize_hex(&tx);
        Ok(self.chain.broadcast(&tx_hex).await?)
    }
}
