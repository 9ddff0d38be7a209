//! Reverse State Machine
//!
//! Lightning to onchain, driven by a hold invoice: issue the invoice, lock
//! coins onchain only once the inbound HTLC is irrevocably held, release
//! the preimage when the client claims. The hold invoice is never settled
//! unless a preimage matching the swap hash was observed onchain or
//! committed in a MuSig2 claim session.

use std::collections::HashMap;
use std::sync::Arc;

use bitcoin::hashes::{sha256, Hash as _};
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainBackend, ChainEvent, ChainListener};
use crate::events::EventBus;
use crate::hints::{check_description_hash, derive_descriptors, DescriptorRequest, HintsError};
use crate::htlc::{extract_preimage, serialize_transaction, HtlcTree};
use crate::lightning::{
    HoldInvoiceRequest, LightningClient, LightningEvent, LightningListener,
};
use crate::musig::decode_hash;
use crate::store::{KeyIndexStore as _, ReverseStore as _, StorageError, Store, TxLabelStore as _};
use crate::timeout::TimeoutWatcher;
use crate::types::pair::Pair;
use crate::types::status::SwapStatus;
use crate::types::swap::{OrderSide, ReverseSwap};
use crate::wallet::{KeyProvider, WalletProvider};

/// Approximate vsize of the client's claim transaction
const CLAIM_TX_VSIZE: u64 = 138;

/// Reverse swap errors
#[derive(Debug, Error)]
pub enum ReverseError {
    #[error("swap not found: {0}")]
    SwapNotFound(String),

    #[error("preimage hash must be 32 bytes")]
    InvalidPreimageHash,

    #[error("either invoiceAmount or onchainAmount is required")]
    AmountMissing,

    #[error("amount {0} sat outside pair limits")]
    AmountOutOfBounds(u64),

    #[error("unknown pair: {0}")]
    UnknownPair(String),

    #[error(transparent)]
    Hints(#[from] HintsError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("chain error: {0}")]
    Chain(#[from] crate::chain::ChainError),

    #[error("lightning error: {0}")]
    Lightning(#[from] crate::lightning::LightningError),

    #[error("htlc error: {0}")]
    Htlc(#[from] crate::htlc::HtlcError),

    #[error("musig error: {0}")]
    Musig(#[from] crate::musig::MusigError),

    #[error("key error: {0}")]
    Key(#[from] crate::wallet::KeyError),

    #[error("wallet error: {0}")]
    Wallet(#[from] crate::wallet::WalletError),
}

/// Reverse manager configuration
#[derive(Clone)]
pub struct ReverseConfig {
    pub network: bitcoin::Network,
    pub pairs: Vec<Pair>,
    /// Hold invoice expiry in seconds
    pub invoice_expiry_secs: u64,
    /// Whether a separate prepay invoice covers the client's miner fee
    pub prepay_miner_fee: bool,
    /// Feerate of the lockup transaction
    pub lockup_sat_per_vbyte: u64,
}

/// Create request, already resolved to a configured pair
pub struct CreateReverseRequest {
    pub pair: Pair,
    pub order_side: OrderSide,
    /// SHA256 payment hash (hex, 32 bytes)
    pub preimage_hash: String,
    /// Client claim public key (hex, 33 bytes compressed)
    pub claim_public_key: String,
    pub invoice_amount: Option<u64>,
    pub onchain_amount: Option<u64>,
    /// Optional BOLT11 description hash; must be exactly 32 bytes
    pub description_hash: Option<Vec<u8>>,
    /// Refund address for BIP21 params, gated on the signature
    pub refund_address: Option<String>,
    /// Schnorr signature over SHA256 of the address bytes
    pub address_signature: Option<String>,
}

/// Result of a successful create
pub struct CreatedReverse {
    pub swap: ReverseSwap,
    pub swap_tree: crate::htlc::SwapTree,
    pub bip21: Option<String>,
}

/// The reverse swap state machine
pub struct ReverseManager {
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainBackend>,
    listener: Arc<ChainListener>,
    lightning: Arc<dyn LightningClient>,
    invoice_listener: Arc<LightningListener>,
    wallet: Arc<dyn WalletProvider>,
    keys: Arc<KeyProvider>,
    events: Arc<EventBus>,
    timeouts: Arc<TimeoutWatcher>,
    cfg: ReverseConfig,

    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// prepay invoice hash (hex) -> swap id
    prepay_hashes: Mutex<HashMap<String, String>>,
}

impl ReverseManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        chain: Arc<dyn ChainBackend>,
        listener: Arc<ChainListener>,
        lightning: Arc<dyn LightningClient>,
        invoice_listener: Arc<LightningListener>,
        wallet: Arc<dyn WalletProvider>,
        keys: Arc<KeyProvider>,
        events: Arc<EventBus>,
        timeouts: Arc<TimeoutWatcher>,
        cfg: ReverseConfig,
    ) -> Self {
        Self {
            store,
            chain,
            listener,
            lightning,
            invoice_listener,
            wallet,
            keys,
            events,
            timeouts,
            cfg,
            locks: Mutex::new(HashMap::new()),
            prepay_hashes: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, swap_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(swap_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Deterministic preimage of the optional prepay invoice
    fn prepay_preimage(swap_id: &str, preimage_hash: &str) -> [u8; 32] {
        let mut data = swap_id.as_bytes().to_vec();
        data.extend_from_slice(preimage_hash.as_bytes());
        sha256::Hash::hash(&data).to_byte_array()
    }

    /// Create a reverse swap: hold invoice first, lockup later
    pub async fn create(
        &self,
        req: CreateReverseRequest,
    ) -> Result<CreatedReverse, ReverseError> {
        let preimage_hash =
            decode_hash(&req.preimage_hash).map_err(|_| ReverseError::InvalidPreimageHash)?;

        let description_hash = req
            .description_hash
            .as_deref()
            .map(check_description_hash)
            .transpose()?;

        let claim_fee =
            (self.chain.estimate_fee_per_vbyte(2).await?.ceil() as u64) * CLAIM_TX_VSIZE;

        let (invoice_amount, onchain_amount) = match (req.invoice_amount, req.onchain_amount) {
            (Some(invoice_amount), _) => {
                let onchain = invoice_amount
                    .saturating_sub(req.pair.fee_for(invoice_amount));
                (invoice_amount, onchain)
            }
            (None, Some(onchain_amount)) => {
                let invoice = onchain_amount + req.pair.fee_for(onchain_amount);
                (invoice, onchain_amount)
            }
            (None, None) => return Err(ReverseError::AmountMissing),
        };

        if !req.pair.amount_in_limits(invoice_amount) {
            return Err(ReverseError::AmountOutOfBounds(invoice_amount));
        }

        let key_index = self.store.next_key_index(&req.pair.base).await?;
        let refund_public_key = self.keys.public_key_hex(key_index)?;

        let tip = self.chain.tip_height().await?;
        let timeout_block_height = tip as u32 + req.pair.timeout_deltas.reverse;

        let tree = HtlcTree::new(
            &preimage_hash,
            &req.claim_public_key,
            &refund_public_key,
            timeout_block_height,
        )?;
        let lockup_address = tree.address(self.cfg.network).to_string();

        let node_key = self.lightning.get_info().await?.public_key;
        let descriptors = derive_descriptors(DescriptorRequest {
            sending_symbol: &req.pair.base,
            onchain_amount,
            claim_miner_fee: claim_fee,
            node_public_key: &node_key,
            claim_public_key: &req.claim_public_key,
            bolt12_description: None,
            bolt12_payee: None,
            refund_address: req.refund_address.as_deref(),
            address_signature: req.address_signature.as_deref(),
        })?;

        let mut swap = ReverseSwap::new(
            req.pair.id(),
            req.order_side,
            invoice_amount,
            onchain_amount,
            req.preimage_hash.clone(),
            req.claim_public_key.clone(),
            refund_public_key,
            key_index,
            hex::encode(tree.claim_script.as_bytes()),
            hex::encode(tree.refund_script.as_bytes()),
            lockup_address.clone(),
            timeout_block_height,
        );
        self.store.insert_reverse(&swap).await?;
        self.events
            .publish_status(&swap.id, SwapStatus::SwapCreated, None);

        // Optional prepay invoice for the client's miner fee
        let (hold_amount, miner_fee_invoice) = if self.cfg.prepay_miner_fee {
            let prepay_preimage = Self::prepay_preimage(&swap.id, &swap.preimage_hash);
            let prepay_hash = sha256::Hash::hash(&prepay_preimage).to_byte_array();

            let prepay_invoice = self
                .lightning
                .add_hold_invoice(HoldInvoiceRequest {
                    preimage_hash: prepay_hash,
                    amount_sat: claim_fee,
                    memo: format!("Miner fee for sending to {} address", req.pair.base),
                    description_hash: None,
                    expiry_secs: self.cfg.invoice_expiry_secs,
                    routing_hints: Vec::new(),
                })
                .await?;

            let prepay_hash_hex = hex::encode(prepay_hash);
            self.invoice_listener.watch_invoice(&prepay_hash_hex).await;
            self.prepay_hashes
                .lock()
                .await
                .insert(prepay_hash_hex, swap.id.clone());

            (invoice_amount.saturating_sub(claim_fee), Some(prepay_invoice))
        } else {
            (invoice_amount, None)
        };

        let invoice = self
            .lightning
            .add_hold_invoice(HoldInvoiceRequest {
                preimage_hash,
                amount_sat: hold_amount,
                memo: descriptors.memo.clone(),
                description_hash,
                expiry_secs: self.cfg.invoice_expiry_secs,
                routing_hints: descriptors.routing_hint.clone().into_iter().collect(),
            })
            .await?;

        self.store
            .set_reverse_invoice(&swap.id, &invoice, miner_fee_invoice.as_deref())
            .await?;
        swap.set_invoice(invoice, miner_fee_invoice);

        let updated = self
            .store
            .set_reverse_status(&swap.id, SwapStatus::InvoiceSet)
            .await?;
        self.events
            .publish_status(&swap.id, updated.status, None);
        swap.status = updated.status;

        self.invoice_listener
            .watch_invoice(&swap.preimage_hash)
            .await;
        self.listener.watch_address(&swap.id, &lockup_address).await;
        self.timeouts
            .schedule_expiry(&swap.id, ReverseSwap::KIND, timeout_block_height)
            .await;

        info!(
            swap_id = %swap.id,
            invoice_amount,
            onchain_amount,
            lockup_address = %lockup_address,
            "reverse swap created"
        );

        Ok(CreatedReverse {
            swap_tree: tree.swap_tree(),
            bip21: descriptors.bip21,
            swap,
        })
    }

    /// Invoice state changes from the Lightning listener
    pub async fn handle_lightning_event(&self, event: LightningEvent) {
        let result = match event {
            LightningEvent::InvoiceAccepted { preimage_hash } => {
                self.on_invoice_accepted(&preimage_hash).await
            }
            LightningEvent::InvoiceCancelled { preimage_hash } => {
                self.on_invoice_cancelled(&preimage_hash).await
            }
            LightningEvent::InvoiceSettled { .. } => Ok(()),
            _ => Ok(()),
        };

        if let Err(err) = result {
            error!(error = %err, "reverse lightning event failed");
        }
    }

    async fn on_invoice_accepted(&self, preimage_hash: &str) -> Result<(), ReverseError> {
        // Prepay invoice held: mark the miner fee paid
        if let Some(swap_id) = self.prepay_hashes.lock().await.get(preimage_hash).cloned() {
            let lock = self.lock_for(&swap_id).await;
            let _guard = lock.lock().await;

            match self
                .store
                .set_reverse_status(&swap_id, SwapStatus::MinerFeePaid)
                .await
            {
                Ok(updated) => {
                    self.events.publish_status(&swap_id, updated.status, None);
                    self.try_lockup(updated).await?;
                }
                Err(StorageError::InvalidTransition { .. }) => {}
                Err(err) => return Err(err.into()),
            }
            return Ok(());
        }

        let Some(swap) = self.store.get_reverse_by_preimage_hash(preimage_hash).await? else {
            debug!(preimage_hash, "accepted invoice matches no reverse swap");
            return Ok(());
        };

        let lock = self.lock_for(&swap.id).await;
        let _guard = lock.lock().await;

        // Re-load under the lock
        let swap = self.load(&swap.id).await?;
        self.try_lockup(swap).await
    }

    /// Broadcast the lockup once every required invoice is held.
    ///
    /// With prepay enabled both invoices must be accepted; the hold invoice
    /// state is the source of truth, the status encodes the prepay.
    async fn try_lockup(&self, swap: ReverseSwap) -> Result<(), ReverseError> {
        let ready = match swap.status {
            SwapStatus::InvoiceSet if !self.cfg.prepay_miner_fee => true,
            SwapStatus::InvoiceSet => {
                // Waiting for the prepay invoice
                false
            }
            SwapStatus::MinerFeePaid => true,
            _ => {
                debug!(swap_id = %swap.id, status = %swap.status, "not ready for lockup");
                return Ok(());
            }
        };

        if !ready {
            return Ok(());
        }

        // The main hold invoice must be irrevocably held before any coins
        // move onchain
        let main_hash = decode_hash(&swap.preimage_hash)?;
        let state = self.lightning.lookup_invoice(&main_hash).await?;
        if state != crate::lightning::InvoiceState::Accepted {
            debug!(swap_id = %swap.id, "main hold invoice not held yet");
            return Ok(());
        }

        match self
            .wallet
            .send_to_address(
                &swap.lockup_address,
                swap.onchain_amount,
                self.cfg.lockup_sat_per_vbyte,
            )
            .await
        {
            Ok(txid) => {
                info!(swap_id = %swap.id, txid = %txid, "reverse lockup broadcast");
                self.store.set_reverse_lockup(&swap.id, &txid, 0).await?;
                self.store
                    .label_transaction(&txid, &pair_base(&swap.pair), "reverse lockup")
                    .await?;

                let updated = self
                    .store
                    .set_reverse_status(&swap.id, SwapStatus::TransactionMempool)
                    .await?;
                self.events.publish_status(
                    &swap.id,
                    updated.status,
                    Some(json!({ "transactionId": txid })),
                );
            }
            Err(err) => {
                error!(swap_id = %swap.id, error = %err, "lockup broadcast failed");
                let updated = self
                    .store
                    .set_reverse_status(&swap.id, SwapStatus::TransactionFailed)
                    .await?;
                self.events.publish_status(
                    &swap.id,
                    updated.status,
                    Some(json!({ "failureReason": err.to_string() })),
                );
                self.cancel_invoices(&swap).await;
            }
        }

        Ok(())
    }

    async fn on_invoice_cancelled(&self, preimage_hash: &str) -> Result<(), ReverseError> {
        let Some(swap) = self.store.get_reverse_by_preimage_hash(preimage_hash).await? else {
            return Ok(());
        };

        let lock = self.lock_for(&swap.id).await;
        let _guard = lock.lock().await;

        let swap = self.load(&swap.id).await?;
        if matches!(
            swap.status,
            SwapStatus::InvoiceSet | SwapStatus::MinerFeePaid | SwapStatus::SwapCreated
        ) {
            warn!(swap_id = %swap.id, "hold invoice cancelled before lockup");
            let updated = self
                .store
                .set_reverse_status(&swap.id, SwapStatus::SwapExpired)
                .await?;
            self.events.publish_status(&swap.id, updated.status, None);
            self.timeouts.cancel(&swap.id).await;
        }
        Ok(())
    }

    /// Chain events for the reverse lockup
    pub async fn handle_chain_event(&self, event: ChainEvent) {
        let result = match event {
            ChainEvent::OutputFound {
                swap_id,
                txid,
                vout,
                confirmed,
                ..
            } => self.on_lockup_seen(&swap_id, &txid, vout, confirmed).await,
            ChainEvent::OutputRetracted { swap_id, .. } => self.on_retracted(&swap_id).await,
            ChainEvent::OutputSpent {
                swap_id, witness, ..
            } => self.on_lockup_spent(&swap_id, &witness).await,
            ChainEvent::OutputEvicted { .. } | ChainEvent::BlockHeight { .. } => Ok(()),
        };

        if let Err(err) = result {
            error!(error = %err, "reverse chain event failed");
        }
    }

    async fn on_lockup_seen(
        &self,
        swap_id: &str,
        txid: &str,
        vout: u32,
        confirmed: bool,
    ) -> Result<(), ReverseError> {
        let lock = self.lock_for(swap_id).await;
        let _guard = lock.lock().await;

        let swap = self.load(swap_id).await?;

        // Record the actual vout of our broadcast and watch for the claim
        if swap.lockup_txid.as_deref() == Some(txid) && swap.lockup_vout != Some(vout) {
            self.store.set_reverse_lockup(swap_id, txid, vout).await?;
            self.listener.watch_outpoint(swap_id, txid, vout).await;
        } else if swap.lockup_vout.is_none() {
            self.store.set_reverse_lockup(swap_id, txid, vout).await?;
            self.listener.watch_outpoint(swap_id, txid, vout).await;
        }

        if confirmed && swap.status == SwapStatus::TransactionMempool {
            let updated = self
                .store
                .set_reverse_status(swap_id, SwapStatus::TransactionConfirmed)
                .await?;
            self.events.publish_status(swap_id, updated.status, None);
        }

        Ok(())
    }

    async fn on_retracted(&self, swap_id: &str) -> Result<(), ReverseError> {
        let lock = self.lock_for(swap_id).await;
        let _guard = lock.lock().await;

        let swap = self.load(swap_id).await?;
        if swap.status == SwapStatus::TransactionConfirmed {
            warn!(swap_id, "reorg unconfirmed the reverse lockup");
            let updated = self
                .store
                .set_reverse_status(swap_id, SwapStatus::TransactionMempool)
                .await?;
            self.events
                .publish_status(swap_id, updated.status, Some(json!({ "reorg": true })));
        }
        Ok(())
    }

    /// The client claimed onchain: the witness reveals the preimage, which
    /// releases the held invoice
    async fn on_lockup_spent(
        &self,
        swap_id: &str,
        witness: &[Vec<u8>],
    ) -> Result<(), ReverseError> {
        let lock = self.lock_for(swap_id).await;
        let _guard = lock.lock().await;

        let swap = self.load(swap_id).await?;
        let preimage_hash = decode_hash(&swap.preimage_hash)?;

        let Some(preimage) = extract_preimage(witness, &preimage_hash) else {
            // A spend without the preimage is our own refund
            debug!(swap_id, "lockup spent without a preimage");
            return Ok(());
        };

        info!(swap_id, "claim observed onchain, settling hold invoice");
        self.store
            .set_reverse_preimage(swap_id, &hex::encode(preimage))
            .await?;
        self.lightning.settle_hold_invoice(&preimage).await?;
        self.settle_prepay(&swap).await;

        match self
            .store
            .set_reverse_status(swap_id, SwapStatus::TransactionClaimed)
            .await
        {
            Ok(updated) => self.events.publish_status(swap_id, updated.status, None),
            // Already claimed cooperatively
            Err(StorageError::InvalidTransition { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        self.timeouts.cancel(swap_id).await;
        self.listener.unwatch_address(&swap.lockup_address).await;
        Ok(())
    }

    async fn settle_prepay(&self, swap: &ReverseSwap) {
        if swap.miner_fee_invoice.is_none() {
            return;
        }
        let prepay_preimage = Self::prepay_preimage(&swap.id, &swap.preimage_hash);
        if let Err(err) = self.lightning.settle_hold_invoice(&prepay_preimage).await {
            warn!(swap_id = %swap.id, error = %err, "prepay settle failed");
        }
    }

    /// The swap reached its timeout height without a claim
    pub async fn handle_expiry(&self, swap_id: &str) {
        if let Err(err) = self.expire(swap_id).await {
            error!(swap_id, error = %err, "reverse expiry failed");
        }
    }

    async fn expire(&self, swap_id: &str) -> Result<(), ReverseError> {
        let lock = self.lock_for(swap_id).await;
        let _guard = lock.lock().await;

        let swap = self.load(swap_id).await?;
        if matches!(
            swap.status,
            SwapStatus::TransactionClaimed
                | SwapStatus::TransactionRefunded
                | SwapStatus::SwapExpired
        ) {
            return Ok(());
        }

        let updated = self
            .store
            .set_reverse_status(swap_id, SwapStatus::SwapExpired)
            .await?;
        self.events.publish_status(swap_id, updated.status, None);
        self.cancel_invoices(&swap).await;

        // Coins already locked: refund through the refund leaf
        if let (Some(lockup_txid), Some(lockup_vout)) = (&swap.lockup_txid, swap.lockup_vout) {
            let tree = HtlcTree::new(
                &decode_hash(&swap.preimage_hash)?,
                &swap.claim_public_key,
                &swap.refund_public_key,
                swap.timeout_block_height,
            )?;

            let fee_per_vbyte = self.chain.estimate_fee_per_vbyte(2).await?.ceil() as u64;
            let destination_str = self.wallet.get_address().await?;
            use std::str::FromStr as _;
            let destination = bitcoin::Address::from_str(&destination_str)
                .map_err(|e| {
                    ReverseError::Wallet(crate::wallet::WalletError::InvalidAddress(
                        e.to_string(),
                    ))
                })?
                .require_network(self.cfg.network)
                .map_err(|e| {
                    ReverseError::Wallet(crate::wallet::WalletError::InvalidAddress(
                        e.to_string(),
                    ))
                })?;

            let keypair = self.keys.keypair(swap.key_index)?;
            let tx = tree.build_refund(
                lockup_txid,
                lockup_vout,
                swap.onchain_amount,
                swap.timeout_block_height,
                &keypair,
                &destination,
                fee_per_vbyte,
            )?;

            let txid = self.chain.broadcast(&serialize_transaction(&tx)).await?;
            self.store
                .label_transaction(&txid, &pair_base(&swap.pair), "reverse refund")
                .await?;

            let updated = self
                .store
                .set_reverse_status(swap_id, SwapStatus::TransactionRefunded)
                .await?;
            self.events.publish_status(
                swap_id,
                updated.status,
                Some(json!({ "transactionId": txid })),
            );
            info!(swap_id, txid = %txid, "reverse swap refunded");
        } else {
            info!(swap_id, "reverse swap expired before lockup");
        }

        self.listener.unwatch_address(&swap.lockup_address).await;
        Ok(())
    }

    async fn cancel_invoices(&self, swap: &ReverseSwap) {
        if let Ok(hash) = decode_hash(&swap.preimage_hash) {
            if let Err(err) = self.lightning.cancel_hold_invoice(&hash).await {
                warn!(swap_id = %swap.id, error = %err, "hold invoice cancel failed");
            }
        }
        if swap.miner_fee_invoice.is_some() {
            let prepay_preimage = Self::prepay_preimage(&swap.id, &swap.preimage_hash);
            let prepay_hash = sha256::Hash::hash(&prepay_preimage).to_byte_array();
            if let Err(err) = self.lightning.cancel_hold_invoice(&prepay_hash).await {
                warn!(swap_id = %swap.id, error = %err, "prepay cancel failed");
            }
        }
    }

    /// Restart recovery
    pub async fn resume(&self) -> Result<(), ReverseError> {
        for status in [SwapStatus::SwapCreated, SwapStatus::InvoiceSet, SwapStatus::MinerFeePaid] {
            for swap in self.store.get_reverses_by_status(status).await? {
                self.invoice_listener
                    .watch_invoice(&swap.preimage_hash)
                    .await;
                if swap.miner_fee_invoice.is_some() {
                    let prepay_preimage = Self::prepay_preimage(&swap.id, &swap.preimage_hash);
                    let prepay_hash =
                        hex::encode(sha256::Hash::hash(&prepay_preimage).to_byte_array());
                    self.invoice_listener.watch_invoice(&prepay_hash).await;
                    self.prepay_hashes
                        .lock()
                        .await
                        .insert(prepay_hash, swap.id.clone());
                }
                self.timeouts
                    .schedule_expiry(&swap.id, ReverseSwap::KIND, swap.timeout_block_height)
                    .await;
            }
        }

        for status in [SwapStatus::TransactionMempool, SwapStatus::TransactionConfirmed] {
            for swap in self.store.get_reverses_by_status(status).await? {
                self.listener
                    .watch_address(&swap.id, &swap.lockup_address)
                    .await;
                if let (Some(txid), Some(vout)) = (&swap.lockup_txid, swap.lockup_vout) {
                    self.listener.watch_outpoint(&swap.id, txid, vout).await;
                }
                self.timeouts
                    .schedule_expiry(&swap.id, ReverseSwap::KIND, swap.timeout_block_height)
                    .await;
            }
        }

        Ok(())
    }

    async fn load(&self, swap_id: &str) -> Result<ReverseSwap, ReverseError> {
        self.store
            .get_reverse(swap_id)
            .await?
            .ok_or_else(|| ReverseError::SwapNotFound(swap_id.to_string()))
    }
}

fn pair_base(pair_id: &str) -> String {
    pair_id.split('/').next().unwrap_or(pair_id).to_string()
}
