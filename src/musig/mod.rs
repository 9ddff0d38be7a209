//! MuSig2 Cooperative Signer
//!
//! Produces partial signatures for cooperative key-path spends of swap
//! HTLCs. Sessions are request-scoped: nonces are generated fresh for every
//! call and nothing is persisted between calls.
//!
//! The two policy-gated operations are the submarine refund and the reverse
//! claim; settling the held invoice is the atomic post-condition of
//! releasing a reverse-claim partial signature.

use std::sync::Arc;

use bitcoin::hashes::{sha256, Hash as _, HashEngine};
use secp256k1::musig::{
    AggregatedNonce, KeyAggCache, PartialSignature, PublicNonce, SecretNonce, Session,
    SessionSecretRand,
};
use secp256k1::{Keypair, PublicKey, Scalar};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::events::EventBus;
use crate::htlc::{key_spend_sighash, parse_transaction, HtlcTree};
use crate::lightning::{InvoiceState, LightningClient};
use crate::store::{ReverseStore as _, StorageError, Store, SubmarineStore as _};
use crate::types::status::SwapStatus;
use crate::wallet::KeyProvider;

/// Signer errors
#[derive(Debug, Error)]
pub enum MusigError {
    #[error("swap not found: {0}")]
    SwapNotFound(String),

    #[error("swap is not eligible for a cooperative refund")]
    NotEligibleForRefund,

    #[error("preimage does not match the swap hash")]
    PreimageMismatch,

    #[error("hold invoice is not in the accepted state")]
    InvoiceNotHeld,

    #[error("invalid nonce: {0}")]
    InvalidNonce(String),

    #[error("invalid partial signature: {0}")]
    InvalidPartialSignature(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("lightning error: {0}")]
    Lightning(#[from] crate::lightning::LightningError),

    #[error("htlc error: {0}")]
    Htlc(#[from] crate::htlc::HtlcError),

    #[error("key error: {0}")]
    Key(#[from] crate::wallet::KeyError),

    #[error("session error: {0}")]
    Session(String),
}

/// Response of a single-round cooperative signing call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSigResponse {
    /// Service public nonce (hex, 66 bytes)
    pub pub_nonce: String,
    /// Service partial signature (hex, 32 bytes)
    pub partial_signature: String,
}

/// Apply the BIP341 output-key tweak to the aggregate key
fn apply_taproot_tweak(
    key_agg_cache: &mut KeyAggCache,
    merkle_root: &[u8; 32],
) -> Result<(), MusigError> {
    let mut engine = sha256::Hash::engine();
    let tag_hash = sha256::Hash::hash(b"TapTweak");
    engine.input(tag_hash.as_ref());
    engine.input(tag_hash.as_ref());
    engine.input(&key_agg_cache.agg_pk().serialize());
    engine.input(merkle_root);
    let tweak_hash = sha256::Hash::from_engine(engine);

    let scalar = Scalar::from_be_bytes(tweak_hash.to_byte_array())
        .map_err(|_| MusigError::Session("invalid tweak scalar".to_string()))?;

    key_agg_cache
        .pubkey_xonly_tweak_add(&scalar)
        .map_err(|e| MusigError::Session(format!("tweak failed: {:?}", e)))?;

    Ok(())
}

fn parse_public_key(hex_key: &str) -> Result<PublicKey, MusigError> {
    let bytes = hex::decode(hex_key).map_err(|e| MusigError::InvalidInput(e.to_string()))?;
    PublicKey::from_slice(&bytes).map_err(|e| MusigError::InvalidInput(e.to_string()))
}

fn parse_pub_nonce(hex_nonce: &str) -> Result<PublicNonce, MusigError> {
    let bytes = hex::decode(hex_nonce).map_err(|e| MusigError::InvalidNonce(e.to_string()))?;
    if bytes.len() != 66 {
        return Err(MusigError::InvalidNonce(format!(
            "nonce must be 66 bytes, got {}",
            bytes.len()
        )));
    }
    let mut arr = [0u8; 66];
    arr.copy_from_slice(&bytes);
    PublicNonce::from_byte_array(&arr).map_err(|e| MusigError::InvalidNonce(format!("{:?}", e)))
}

fn parse_partial_sig(hex_sig: &str) -> Result<PartialSignature, MusigError> {
    let bytes = hex::decode(hex_sig)
        .map_err(|e| MusigError::InvalidPartialSignature(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(MusigError::InvalidPartialSignature(format!(
            "partial signature must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    PartialSignature::from_byte_array(&arr)
        .map_err(|e| MusigError::InvalidPartialSignature(format!("{:?}", e)))
}

/// A cooperative signing session over one sighash
///
/// Keys are aggregated in (claim, refund) order and tweaked with the swap
/// tree's merkle root, matching the lockup's output key.
pub struct SwapMusigSession {
    key_agg_cache: KeyAggCache,
    keypair: Keypair,
    sec_nonce: Option<SecretNonce>,
    pub_nonce: PublicNonce,
    sighash: [u8; 32],
}

impl SwapMusigSession {
    pub fn new(
        service_secret: &[u8; 32],
        claim_key_hex: &str,
        refund_key_hex: &str,
        merkle_root: Option<[u8; 32]>,
        sighash: [u8; 32],
    ) -> Result<Self, MusigError> {
        let keypair = Keypair::from_seckey_slice(service_secret)
            .map_err(|e| MusigError::InvalidInput(e.to_string()))?;

        let claim = parse_public_key(claim_key_hex)?;
        let refund = parse_public_key(refund_key_hex)?;
        let mut key_agg_cache = KeyAggCache::new(&[&claim, &refund]);

        if let Some(root) = merkle_root {
            apply_taproot_tweak(&mut key_agg_cache, &root)?;
        }

        let mut rng = secp256k1::rand::rng();
        let session_rand = SessionSecretRand::from_rng(&mut rng);
        let (sec_nonce, pub_nonce) =
            key_agg_cache.nonce_gen(session_rand, keypair.public_key(), &sighash, None);

        Ok(Self {
            key_agg_cache,
            keypair,
            sec_nonce: Some(sec_nonce),
            pub_nonce,
            sighash,
        })
    }

    /// Service public nonce for this session (hex)
    pub fn pub_nonce_hex(&self) -> String {
        hex::encode(self.pub_nonce.serialize())
    }

    /// Single-round flow: aggregate the client nonce and return the service
    /// partial signature. Consumes the secret nonce; a second call fails.
    pub fn partial_sign(
        &mut self,
        client_pub_nonce_hex: &str,
    ) -> Result<PartialSigResponse, MusigError> {
        let client_nonce = parse_pub_nonce(client_pub_nonce_hex)?;
        let sec_nonce = self
            .sec_nonce
            .take()
            .ok_or_else(|| MusigError::Session("secret nonce already consumed".to_string()))?;

        let agg_nonce = AggregatedNonce::new(&[&client_nonce, &self.pub_nonce]);
        let session = Session::new(&self.key_agg_cache, agg_nonce, &self.sighash);
        let partial = session.partial_sign(sec_nonce, &self.keypair, &self.key_agg_cache);

        Ok(PartialSigResponse {
            pub_nonce: hex::encode(self.pub_nonce.serialize()),
            partial_signature: hex::encode(partial.serialize()),
        })
    }

    /// Full aggregation: combine the client's partial signature with ours
    /// and return the final 64-byte Schnorr signature, verified against the
    /// tweaked aggregate key.
    pub fn complete(
        &mut self,
        client_pub_nonce_hex: &str,
        client_partial_hex: &str,
    ) -> Result<[u8; 64], MusigError> {
        let client_nonce = parse_pub_nonce(client_pub_nonce_hex)?;
        let client_partial = parse_partial_sig(client_partial_hex)?;
        let sec_nonce = self
            .sec_nonce
            .take()
            .ok_or_else(|| MusigError::Session("secret nonce already consumed".to_string()))?;

        let agg_nonce = AggregatedNonce::new(&[&client_nonce, &self.pub_nonce]);
        let session = Session::new(&self.key_agg_cache, agg_nonce, &self.sighash);
        let our_partial = session.partial_sign(sec_nonce, &self.keypair, &self.key_agg_cache);

        let agg_sig = session.partial_sig_agg(&[&client_partial, &our_partial]);
        let final_sig = agg_sig
            .verify(&self.key_agg_cache.agg_pk(), &self.sighash)
            .map_err(|e| MusigError::InvalidPartialSignature(format!("{:?}", e)))?;

        Ok(*final_sig.as_ref())
    }
}

/// Policy-gated signing service over the stores and the Lightning node
pub struct MusigSigner {
    store: Arc<dyn Store>,
    lightning: Arc<dyn LightningClient>,
    keys: Arc<KeyProvider>,
    events: Arc<EventBus>,
}

impl MusigSigner {
    pub fn new(
        store: Arc<dyn Store>,
        lightning: Arc<dyn LightningClient>,
        keys: Arc<KeyProvider>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            lightning,
            keys,
            events,
        }
    }

    /// Cooperative refund of a submarine swap.
    ///
    /// Allowed when the swap already failed (expired, unpayable invoice,
    /// lockup failure) or when the invoice is unpaid and no outgoing HTLC is
    /// in flight for its hash.
    pub async fn sign_swap_refund(
        &self,
        swap_id: &str,
        client_pub_nonce_hex: &str,
        tx_hex: &str,
        input_index: usize,
    ) -> Result<PartialSigResponse, MusigError> {
        let swap = self
            .store
            .get_swap(swap_id)
            .await?
            .ok_or_else(|| MusigError::SwapNotFound(swap_id.to_string()))?;

        if !swap.status.refund_eligible() {
            let hash = decode_hash(&swap.preimage_hash)?;
            let invoice_unpaid = swap.preimage.is_none();
            let pending_htlc = self.lightning.has_pending_payment(&hash).await?;

            if !invoice_unpaid || pending_htlc {
                info!(swap_id, status = %swap.status, "refund request rejected");
                return Err(MusigError::NotEligibleForRefund);
            }
        }

        let tree = HtlcTree::new(
            &decode_hash(&swap.preimage_hash)?,
            &swap.claim_public_key,
            &swap.refund_public_key,
            swap.timeout_block_height,
        )?;

        let tx = parse_transaction(tx_hex)?;
        if input_index >= tx.input.len() {
            return Err(MusigError::InvalidInput(format!(
                "input index {} out of bounds",
                input_index
            )));
        }

        let lockup_amount = swap
            .onchain_amount
            .ok_or_else(|| MusigError::InvalidInput("swap has no lockup".to_string()))?;
        let sighash = key_spend_sighash(&tx, input_index, &tree.lockup_script(), lockup_amount)?;

        let mut session = SwapMusigSession::new(
            &self.keys.secret_bytes(swap.key_index)?,
            &swap.claim_public_key,
            &swap.refund_public_key,
            tree.merkle_root(),
            sighash,
        )?;

        info!(swap_id, "releasing cooperative refund partial signature");
        session.partial_sign(client_pub_nonce_hex)
    }

    /// Cooperative claim of a reverse swap.
    ///
    /// The preimage must match the stored hash and the hold invoice must be
    /// held; the invoice is settled once the partial signature is released.
    pub async fn sign_reverse_swap_claim(
        &self,
        swap_id: &str,
        preimage_hex: &str,
        client_pub_nonce_hex: &str,
        tx_hex: &str,
        input_index: usize,
    ) -> Result<PartialSigResponse, MusigError> {
        let swap = self
            .store
            .get_reverse(swap_id)
            .await?
            .ok_or_else(|| MusigError::SwapNotFound(swap_id.to_string()))?;

        let preimage = decode_hash(preimage_hex).map_err(|_| MusigError::PreimageMismatch)?;
        let expected_hash = decode_hash(&swap.preimage_hash)?;
        let actual_hash = sha256::Hash::hash(&preimage).to_byte_array();
        if actual_hash != expected_hash {
            error!(swap_id, "reverse claim with mismatched preimage");
            return Err(MusigError::PreimageMismatch);
        }

        let invoice_state = self.lightning.lookup_invoice(&expected_hash).await?;
        if invoice_state != InvoiceState::Accepted {
            return Err(MusigError::InvoiceNotHeld);
        }

        let tree = HtlcTree::new(
            &expected_hash,
            &swap.claim_public_key,
            &swap.refund_public_key,
            swap.timeout_block_height,
        )?;

        let tx = parse_transaction(tx_hex)?;
        if input_index >= tx.input.len() {
            return Err(MusigError::InvalidInput(format!(
                "input index {} out of bounds",
                input_index
            )));
        }

        let sighash =
            key_spend_sighash(&tx, input_index, &tree.lockup_script(), swap.onchain_amount)?;

        let mut session = SwapMusigSession::new(
            &self.keys.secret_bytes(swap.key_index)?,
            &swap.claim_public_key,
            &swap.refund_public_key,
            tree.merkle_root(),
            sighash,
        )?;

        let response = session.partial_sign(client_pub_nonce_hex)?;

        // The partial signature commits to a claim transaction that reveals
        // the preimage; settle the held invoice before releasing it
        self.lightning.settle_hold_invoice(&preimage).await?;
        self.store
            .set_reverse_preimage(swap_id, preimage_hex)
            .await?;
        match self
            .store
            .set_reverse_status(swap_id, SwapStatus::TransactionClaimed)
            .await
        {
            Ok(updated) => self.events.publish_status(&updated.id, updated.status, None),
            Err(StorageError::InvalidTransition { .. }) => {
                // Already claimed through the script path
            }
            Err(err) => return Err(err.into()),
        }

        info!(swap_id, "cooperative reverse claim signed and invoice settled");
        Ok(response)
    }
}

pub(crate) fn decode_hash(hex_str: &str) -> Result<[u8; 32], MusigError> {
    let bytes = hex::decode(hex_str).map_err(|e| MusigError::InvalidInput(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(MusigError::InvalidInput(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}
