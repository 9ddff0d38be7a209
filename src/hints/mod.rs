//! Routing Hints Engine
//!
//! Glues invoice economics to onchain payouts for reverse swaps: derives
//! the invoice memo, the amount the client will receive onchain, optional
//! BIP21 parameters gated on a signed refund address, and the synthetic
//! routing hint carried by BOLT11 hold invoices.

use bitcoin::hashes::{sha256, Hash as _};
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::{schnorr, Message};
use bitcoin::XOnlyPublicKey;
use thiserror::Error;

use crate::lightning::types::HopHint;

/// The well-known synthetic channel: (block, tx index, output index)
pub const HINT_CHANNEL_BLOCK: u32 = 542_409;
pub const HINT_CHANNEL_TX: u32 = 1_308;
pub const HINT_CHANNEL_VOUT: u16 = 0;

pub const HINT_FEE_BASE_MSAT: u32 = 0;
pub const HINT_FEE_PPM: u32 = 21;
pub const HINT_CLTV_EXPIRY_DELTA: u32 = 81;

/// Routing hints errors
#[derive(Debug, Error)]
pub enum HintsError {
    #[error("invalid address signature")]
    InvalidAddressSignature,

    #[error("description hash must be 32 bytes, got {0}")]
    InvalidDescriptionHash(usize),

    #[error("invalid public key: {0}")]
    InvalidKey(String),

    #[error("invoice has no payee key")]
    MissingPayee,
}

/// Pack (block, tx index, output index) into a short channel id
pub fn pack_short_channel_id(block: u32, tx: u32, vout: u16) -> u64 {
    ((block as u64) << 40) | ((tx as u64) << 16) | (vout as u64)
}

/// Unpack a short channel id into (block, tx index, output index)
pub fn unpack_short_channel_id(scid: u64) -> (u32, u32, u16) {
    (
        (scid >> 40) as u32,
        ((scid >> 16) & 0xff_ffff) as u32,
        (scid & 0xffff) as u16,
    )
}

/// The constant short channel id carried in synthetic hints
pub fn hint_short_channel_id() -> u64 {
    pack_short_channel_id(HINT_CHANNEL_BLOCK, HINT_CHANNEL_TX, HINT_CHANNEL_VOUT)
}

/// Inputs to descriptor derivation
pub struct DescriptorRequest<'a> {
    /// Symbol of the currency the service sends onchain
    pub sending_symbol: &'a str,
    /// Onchain lockup amount in satoshis
    pub onchain_amount: u64,
    /// Miner fee the client pays to claim, in satoshis
    pub claim_miner_fee: u64,
    /// Public key of our Lightning node (hex), used as the hint hop
    pub node_public_key: &'a str,
    /// Client claim public key (hex, 33 bytes compressed)
    pub claim_public_key: &'a str,
    /// BOLT12 description, when the request is an offer/invoice; BOLT11
    /// invoices get a generated memo and a synthetic hint
    pub bolt12_description: Option<&'a str>,
    /// Payee key of the decoded BOLT12 invoice (hex)
    pub bolt12_payee: Option<&'a str>,
    /// Refund address the client wants embedded in BIP21 params
    pub refund_address: Option<&'a str>,
    /// Schnorr signature (hex, 64 bytes) over SHA256 of the address bytes
    pub address_signature: Option<&'a str>,
}

/// Derived invoice descriptors
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceDescriptors {
    /// BOLT11 memo or BOLT12 description
    pub memo: String,
    /// What the client receives onchain after the claim fee
    pub received_amount: u64,
    /// BIP21 URI, present when a validly signed refund address was supplied
    pub bip21: Option<String>,
    /// Synthetic routing hint; BOLT11 only
    pub routing_hint: Option<HopHint>,
}

/// Validate a client-supplied description hash
pub fn check_description_hash(hash: &[u8]) -> Result<[u8; 32], HintsError> {
    if hash.len() != 32 {
        return Err(HintsError::InvalidDescriptionHash(hash.len()));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(hash);
    Ok(arr)
}

fn parse_xonly(hex_key: &str) -> Result<XOnlyPublicKey, HintsError> {
    let bytes = hex::decode(hex_key).map_err(|e| HintsError::InvalidKey(e.to_string()))?;
    let xonly_bytes = match bytes.len() {
        33 => &bytes[1..],
        32 => &bytes[..],
        n => return Err(HintsError::InvalidKey(format!("bad key length {}", n))),
    };
    XOnlyPublicKey::from_slice(xonly_bytes).map_err(|e| HintsError::InvalidKey(e.to_string()))
}

/// Verify a Schnorr signature over SHA256 of the address bytes
fn verify_address_signature(
    address: &str,
    signature_hex: &str,
    key_hex: &str,
) -> Result<(), HintsError> {
    let signature_bytes =
        hex::decode(signature_hex).map_err(|_| HintsError::InvalidAddressSignature)?;
    let signature = schnorr::Signature::from_slice(&signature_bytes)
        .map_err(|_| HintsError::InvalidAddressSignature)?;

    let key = parse_xonly(key_hex)?;
    let digest = sha256::Hash::hash(address.as_bytes());
    let msg = Message::from_digest(digest.to_byte_array());

    Secp256k1::verification_only()
        .verify_schnorr(&signature, &msg, &key)
        .map_err(|_| HintsError::InvalidAddressSignature)
}

/// Derive the descriptors for a reverse swap invoice
pub fn derive_descriptors(req: DescriptorRequest<'_>) -> Result<InvoiceDescriptors, HintsError> {
    let bolt12 = req.bolt12_description.is_some() || req.bolt12_payee.is_some();

    let memo = match req.bolt12_description {
        Some(description) => description.to_string(),
        None => format!("Send to {} address", req.sending_symbol),
    };

    let received_amount = req.onchain_amount.saturating_sub(req.claim_miner_fee);

    let bip21 = match (req.refund_address, req.address_signature) {
        (Some(address), Some(signature)) => {
            // BOLT12 verifies against the invoice payee key, BOLT11 against
            // the client's claim key
            let key = if bolt12 {
                req.bolt12_payee.ok_or(HintsError::MissingPayee)?
            } else {
                req.claim_public_key
            };
            verify_address_signature(address, signature, key)?;

            Some(format!(
                "bitcoin:{}?amount={}",
                address,
                crate::types::units::sats_to_coin_string(received_amount)
            ))
        }
        _ => None,
    };

    let routing_hint = if bolt12 {
        None
    } else {
        Some(HopHint {
            node_id: req.node_public_key.to_string(),
            chan_id: hint_short_channel_id(),
            fee_base_msat: HINT_FEE_BASE_MSAT,
            fee_proportional_millionths: HINT_FEE_PPM,
            cltv_expiry_delta: HINT_CLTV_EXPIRY_DELTA,
        })
    };

    Ok(InvoiceDescriptors {
        memo,
        received_amount,
        bip21,
        routing_hint,
    })
}
