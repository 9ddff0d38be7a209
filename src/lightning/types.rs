//! Lightning Types
//!
//! Typed events and request/response structures shared between the client
//! adapters and the swap core.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// State of an invoice on the node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceState {
    Open,
    /// Paid but held; the HTLC is irrevocably committed
    Accepted,
    Settled,
    Cancelled,
}

/// Typed event emitted by the Lightning listener
#[derive(Debug, Clone, PartialEq)]
pub enum LightningEvent {
    /// A hold invoice moved to the accepted (held) state
    InvoiceAccepted { preimage_hash: String },
    /// An invoice was settled
    InvoiceSettled { preimage_hash: String },
    /// An invoice was cancelled or expired
    InvoiceCancelled { preimage_hash: String },
    /// A peer connection came up
    PeerOnline { public_key: String },
    /// A channel became active
    ChannelActive { funding_txid: String, funding_vout: u32 },
}

/// A single hop of a routing hint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopHint {
    /// Public key of the hinted node (hex)
    pub node_id: String,
    /// Short channel id, packed per BOLT7
    pub chan_id: u64,
    pub fee_base_msat: u32,
    pub fee_proportional_millionths: u32,
    pub cltv_expiry_delta: u32,
}

/// Request to create a hold invoice
#[derive(Debug, Clone)]
pub struct HoldInvoiceRequest {
    /// SHA256 payment hash the invoice is locked to
    pub preimage_hash: [u8; 32],
    /// Invoice amount in satoshis
    pub amount_sat: u64,
    /// Invoice memo
    pub memo: String,
    /// Optional description hash; must be exactly 32 bytes
    pub description_hash: Option<[u8; 32]>,
    /// Invoice expiry in seconds
    pub expiry_secs: u64,
    /// Routing hints to embed
    pub routing_hints: Vec<HopHint>,
}

/// Result of a successful payment
#[derive(Debug, Clone)]
pub struct PaymentResult {
    /// Revealed preimage (hex)
    pub preimage: String,
    /// Routing fee paid, in millisatoshis
    pub fee_msat: u64,
}

/// Decoded payment request, BOLT11 or BOLT12
#[derive(Debug, Clone)]
pub struct DecodedInvoice {
    pub bolt12: bool,
    pub amount_msat: Option<u64>,
    /// Payment hash (hex)
    pub payment_hash: String,
    pub description: Option<String>,
    /// Description hash (hex), when the invoice commits to one
    pub description_hash: Option<String>,
    /// Payee node key (hex)
    pub payee: Option<String>,
    pub min_final_cltv_expiry: u64,
    /// Unix timestamp the request expires at
    pub expires_at: Option<u64>,
}

/// Node identity and sync state
#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    #[serde(rename = "identity_pubkey")]
    pub public_key: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub synced_to_chain: bool,
    #[serde(default)]
    pub block_height: u64,
}

/// A connected peer
#[derive(Debug, Clone, Deserialize)]
pub struct Peer {
    #[serde(rename = "pub_key")]
    pub public_key: String,
    #[serde(default)]
    pub address: String,
}

/// A channel as reported by the node
#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub active: bool,
    #[serde(rename = "remote_pubkey")]
    pub remote_public_key: String,
    /// "txid:vout" of the funding output
    pub channel_point: String,
    /// Short channel id as reported by the node
    #[serde(default)]
    pub chan_id: String,
    #[serde(default)]
    pub capacity: String,
}

impl Channel {
    /// Split the funding outpoint into (txid, vout)
    pub fn funding_outpoint(&self) -> Option<(String, u32)> {
        let (txid, vout) = self.channel_point.split_once(':')?;
        Some((txid.to_string(), vout.parse().ok()?))
    }
}

/// Request to open a channel
#[derive(Debug, Clone)]
pub struct OpenChannelRequest {
    /// Public key of the peer (hex)
    pub public_key: String,
    /// Local funding amount in satoshis
    pub local_funding_amount: u64,
    /// Whether the channel is unannounced
    pub private: bool,
    /// Feerate for the funding transaction
    pub sat_per_vbyte: u64,
}

/// Funding outpoint of a freshly opened channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPoint {
    /// Funding transaction id (hex, display byte order)
    pub funding_txid: String,
    pub output_index: u32,
}

impl ChannelPoint {
    /// Parse from a node response carrying the funding txid as base64 of the
    /// little-endian bytes, the way LND reports it.
    pub fn from_funding_bytes(
        funding_txid_base64: &str,
        output_index: u32,
    ) -> Result<Self, String> {
        let mut bytes = base64::engine::general_purpose::STANDARD
            .decode(funding_txid_base64)
            .map_err(|e| format!("invalid funding txid base64: {}", e))?;

        if bytes.len() != 32 {
            return Err(format!("funding txid must be 32 bytes, got {}", bytes.len()));
        }

        bytes.reverse();
        Ok(Self {
            funding_txid: hex::encode(bytes),
            output_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_funding_txid_parse() {
        let point =
            ChannelPoint::from_funding_bytes("PnemZ7+wVd0SLtj9eyJ4IwR9fzEEewM24oSZP2dKmgU=", 1)
                .unwrap();
        assert_eq!(
            point.funding_txid,
            "059a4a673f9984e236037b04317f7d042378227bfdd82e12dd55b0bf67a6773e"
        );
        assert_eq!(point.output_index, 1);
    }

    #[test]
    fn test_funding_txid_rejects_bad_input() {
        assert!(ChannelPoint::from_funding_bytes("not-base64!", 0).is_err());
        // 31 bytes
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; 31]);
        assert!(ChannelPoint::from_funding_bytes(&short, 0).is_err());
    }

    #[test]
    fn test_channel_funding_outpoint() {
        let channel = Channel {
            active: true,
            remote_public_key: "02ab".to_string(),
            channel_point: "deadbeef:1".to_string(),
            chan_id: String::new(),
            capacity: "100000".to_string(),
        };
        assert_eq!(
            channel.funding_outpoint(),
            Some(("deadbeef".to_string(), 1))
        );
    }
}
