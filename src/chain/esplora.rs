//! Esplora Chain Client
//!
//! HTTP client for an Esplora-compatible chain API. Answers the synchronous
//! queries of the swap core (raw transactions, fee estimates) and feeds the
//! chain listener's poll cycle.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

/// Chain access errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transaction not found: {0}")]
    TxNotFound(String),

    #[error("address not found: {0}")]
    AddressNotFound(String),

    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),

    #[error("parse error: {0}")]
    Parse(String),
}

/// Unspent transaction output
#[derive(Debug, Clone, PartialEq)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    pub block_height: Option<u64>,
    pub confirmed: bool,
}

/// Confirmation status of a transaction
#[derive(Debug, Clone, Deserialize)]
pub struct TxStatus {
    pub confirmed: bool,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
}

/// Full transaction as reported by Esplora
#[derive(Debug, Clone, Deserialize)]
pub struct EsploraTx {
    pub txid: String,
    pub version: i32,
    pub locktime: u32,
    pub vin: Vec<EsploraTxInput>,
    pub vout: Vec<EsploraTxOutput>,
    pub size: u32,
    pub weight: u32,
    pub fee: u64,
    pub status: TxStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsploraTxInput {
    pub txid: String,
    pub vout: u32,
    pub prevout: Option<EsploraTxOutput>,
    pub witness: Option<Vec<String>>,
    pub is_coinbase: bool,
    pub sequence: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EsploraTxOutput {
    pub scriptpubkey: String,
    pub scriptpubkey_type: String,
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

/// Spend state of a specific output
#[derive(Debug, Clone, Deserialize)]
pub struct Outspend {
    pub spent: bool,
    pub txid: Option<String>,
    pub vin: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    status: TxStatus,
}

/// What the chain listener needs from a chain backend
///
/// Implemented by `EsploraClient`; tests use an in-memory mock.
#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// Current chain tip height
    async fn tip_height(&self) -> Result<u64, ChainError>;

    /// Unspent outputs of an address, confirmed and unconfirmed
    async fn address_utxos(&self, address: &str) -> Result<Vec<Utxo>, ChainError>;

    /// Confirmation status of a transaction; `TxNotFound` when evicted
    async fn tx_status(&self, txid: &str) -> Result<TxStatus, ChainError>;

    /// Full transaction with prevouts, fee and weight
    async fn tx(&self, txid: &str) -> Result<EsploraTx, ChainError>;

    /// Raw transaction hex
    async fn tx_hex(&self, txid: &str) -> Result<String, ChainError>;

    /// Spend state of an output
    async fn outspend(&self, txid: &str, vout: u32) -> Result<Outspend, ChainError>;

    /// Fee estimate in sat/vB for the given confirmation target
    async fn estimate_fee_per_vbyte(&self, target_blocks: u16) -> Result<f64, ChainError>;

    /// Broadcast a raw transaction, returning its txid
    async fn broadcast(&self, tx_hex: &str) -> Result<String, ChainError>;
}

/// Esplora-backed chain client
#[derive(Debug, Clone)]
pub struct EsploraClient {
    client: Client,
    base_url: String,
}

impl EsploraClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ChainBackend for EsploraClient {
    async fn tip_height(&self) -> Result<u64, ChainError> {
        let url = format!("{}/blocks/tip/height", self.base_url);
        let resp = self.client.get(&url).send().await?;

        resp.text()
            .await?
            .parse()
            .map_err(|e| ChainError::Parse(format!("invalid height: {}", e)))
    }

    async fn address_utxos(&self, address: &str) -> Result<Vec<Utxo>, ChainError> {
        let url = format!("{}/address/{}/utxo", self.base_url, address);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(ChainError::AddressNotFound(address.to_string()));
        }

        let utxos: Vec<EsploraUtxo> = resp.json().await?;
        Ok(utxos
            .into_iter()
            .map(|u| Utxo {
                txid: u.txid,
                vout: u.vout,
                value: u.value,
                block_height: u.status.block_height,
                confirmed: u.status.confirmed,
            })
            .collect())
    }

    async fn tx_status(&self, txid: &str) -> Result<TxStatus, ChainError> {
        let url = format!("{}/tx/{}/status", self.base_url, txid);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(ChainError::TxNotFound(txid.to_string()));
        }

        Ok(resp.json().await?)
    }

    async fn tx(&self, txid: &str) -> Result<EsploraTx, ChainError> {
        let url = format!("{}/tx/{}", self.base_url, txid);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(ChainError::TxNotFound(txid.to_string()));
        }

        Ok(resp.json().await?)
    }

    async fn tx_hex(&self, txid: &str) -> Result<String, ChainError> {
        let url = format!("{}/tx/{}/hex", self.base_url, txid);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(ChainError::TxNotFound(txid.to_string()));
        }

        Ok(resp.text().await?)
    }

    async fn outspend(&self, txid: &str, vout: u32) -> Result<Outspend, ChainError> {
        let url = format!("{}/tx/{}/outspend/{}", self.base_url, txid, vout);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(ChainError::TxNotFound(txid.to_string()));
        }

        Ok(resp.json().await?)
    }

    async fn estimate_fee_per_vbyte(&self, target_blocks: u16) -> Result<f64, ChainError> {
        let url = format!("{}/fee-estimates", self.base_url);
        let estimates: HashMap<String, f64> = self.client.get(&url).send().await?.json().await?;

        // Esplora keys estimates by confirmation target; fall back to the
        // closest lower target when the exact one is missing
        let mut best: Option<(u16, f64)> = None;
        for (key, rate) in estimates {
            if let Ok(target) = key.parse::<u16>() {
                if target <= target_blocks
                    && best.map(|(t, _)| target > t).unwrap_or(true)
                {
                    best = Some((target, rate));
                }
            }
        }

        Ok(best.map(|(_, rate)| rate).unwrap_or(1.0))
    }

    async fn broadcast(&self, tx_hex: &str) -> Result<String, ChainError> {
        let url = format!("{}/tx", self.base_url);
        let resp = self
            .client
            .post(&url)
            .body(tx_hex.to_string())
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(ChainError::BroadcastFailed(error_text));
        }

        Ok(resp.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalisation() {
        let client = EsploraClient::new("http://localhost:3002/");
        assert_eq!(client.base_url, "http://localhost:3002");
    }

    #[test]
    fn test_tx_status_deserialization() {
        let json = r#"{"confirmed":true,"block_height":800000,"block_hash":"00ab"}"#;
        let status: TxStatus = serde_json::from_str(json).unwrap();
        assert!(status.confirmed);
        assert_eq!(status.block_height, Some(800000));
    }

    #[test]
    fn test_outspend_deserialization() {
        let json = r#"{"spent":true,"txid":"deadbeef","vin":0,"status":{"confirmed":false}}"#;
        let outspend: Outspend = serde_json::from_str(json).unwrap();
        assert!(outspend.spent);
        assert_eq!(outspend.txid.as_deref(), Some("deadbeef"));
    }
}
