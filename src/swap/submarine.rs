//! Submarine State Machine
//!
//! Drives a submarine swap from creation through claim or refund: accept
//! the onchain lockup, pay the Lightning invoice, claim the lockup once
//! the invoice settles. Cooperative MuSig2 claims race a wall-clock timer;
//! the script-path spend with the revealed preimage is the fallback.
//!
//! Concurrent work on the same swap serialises through a named mutex keyed
//! by swap id; transitions are atomic between awaits.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bitcoin::{Address, Transaction, Witness};
use serde_json::json;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::backoff_delay;
use super::nursery::{NurseryCommand, NurseryOutcome};
use crate::chain::{ChainBackend, ChainEvent, ChainListener};
use crate::events::EventBus;
use crate::htlc::{
    build_key_spend_template, key_spend_sighash, serialize_transaction, HtlcTree,
};
use crate::lightning::{invoice as invoice_utils, LightningClient};
use crate::musig::{decode_hash, MusigError, SwapMusigSession};
use crate::store::{
    ChannelCreationStore as _, KeyIndexStore as _, StorageError, Store, SubmarineStore as _,
    TxLabelStore as _,
};
use crate::timeout::TimeoutWatcher;
use crate::types::pair::Pair;
use crate::types::status::SwapStatus;
use crate::types::swap::{ChannelCreation, OrderSide, Swap};
use crate::types::units::sats_to_coin_string;
use crate::wallet::{KeyProvider, WalletProvider};

/// Submarine swap errors
#[derive(Debug, Error)]
pub enum SubmarineError {
    #[error("swap not found: {0}")]
    SwapNotFound(String),

    #[error("invalid invoice: {0}")]
    InvalidInvoice(String),

    #[error("invoice expired")]
    InvoiceExpired,

    #[error("amount {0} sat outside pair limits")]
    AmountOutOfBounds(u64),

    #[error("unknown pair: {0}")]
    UnknownPair(String),

    #[error("no cooperative claim pending for {0}")]
    NoClaimPending(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("chain error: {0}")]
    Chain(#[from] crate::chain::ChainError),

    #[error("lightning error: {0}")]
    Lightning(#[from] crate::lightning::LightningError),

    #[error("htlc error: {0}")]
    Htlc(#[from] crate::htlc::HtlcError),

    #[error("musig error: {0}")]
    Musig(#[from] MusigError),

    #[error("key error: {0}")]
    Key(#[from] crate::wallet::KeyError),

    #[error("wallet error: {0}")]
    Wallet(#[from] crate::wallet::WalletError),
}

/// Submarine manager configuration
#[derive(Clone)]
pub struct SubmarineConfig {
    pub network: bitcoin::Network,
    pub pairs: Vec<Pair>,
    pub max_payment_attempts: u32,
    pub payment_timeout: Duration,
    pub payment_base_retry: Duration,
    pub cooperative_claim_timeout: Duration,
    pub max_fee_ratio: f64,
}

/// Channel creation parameters of a create request
#[derive(Debug, Clone)]
pub struct ChannelRequest {
    pub private: bool,
    pub inbound_liquidity_percent: u32,
}

/// Create request, already resolved to a configured pair
pub struct CreateSubmarineRequest {
    pub pair: Pair,
    pub order_side: OrderSide,
    pub invoice: String,
    pub refund_public_key: String,
    pub channel: Option<ChannelRequest>,
}

/// Result of a successful create
pub struct CreatedSubmarine {
    pub swap: Swap,
    pub swap_tree: crate::htlc::SwapTree,
    pub bip21: String,
}

/// An in-flight cooperative claim session
struct ClaimSession {
    session: SwapMusigSession,
    template: Transaction,
    preimage: [u8; 32],
}

/// The submarine swap state machine
pub struct SubmarineManager {
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainBackend>,
    listener: Arc<ChainListener>,
    lightning: Arc<dyn LightningClient>,
    wallet: Arc<dyn WalletProvider>,
    keys: Arc<KeyProvider>,
    events: Arc<EventBus>,
    timeouts: Arc<TimeoutWatcher>,
    nursery_tx: mpsc::Sender<NurseryCommand>,
    cfg: SubmarineConfig,

    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    claim_sessions: Mutex<HashMap<String, ClaimSession>>,
    payment_tasks: Mutex<HashMap<String, AbortHandle>>,
    weak: Weak<Self>,
}

impl SubmarineManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        chain: Arc<dyn ChainBackend>,
        listener: Arc<ChainListener>,
        lightning: Arc<dyn LightningClient>,
        wallet: Arc<dyn WalletProvider>,
        keys: Arc<KeyProvider>,
        events: Arc<EventBus>,
        timeouts: Arc<TimeoutWatcher>,
        nursery_tx: mpsc::Sender<NurseryCommand>,
        cfg: SubmarineConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            store,
            chain,
            listener,
            lightning,
            wallet,
            keys,
            events,
            timeouts,
            nursery_tx,
            cfg,
            locks: Mutex::new(HashMap::new()),
            claim_sessions: Mutex::new(HashMap::new()),
            payment_tasks: Mutex::new(HashMap::new()),
            weak: weak.clone(),
        })
    }

    async fn lock_for(&self, swap_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(swap_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn pair(&self, pair_id: &str) -> Result<&Pair, SubmarineError> {
        self.cfg
            .pairs
            .iter()
            .find(|p| p.id() == pair_id)
            .ok_or_else(|| SubmarineError::UnknownPair(pair_id.to_string()))
    }

    /// Create a submarine swap for an invoice
    pub async fn create(
        &self,
        req: CreateSubmarineRequest,
    ) -> Result<CreatedSubmarine, SubmarineError> {
        if invoice_utils::is_bolt12(&req.invoice) {
            return Err(SubmarineError::InvalidInvoice(
                "BOLT12 pull payments go through the reverse flow".to_string(),
            ));
        }

        let preimage_hash = invoice_utils::payment_hash(&req.invoice)
            .map_err(|e| SubmarineError::InvalidInvoice(e.to_string()))?;
        let invoice_amount = invoice_utils::amount_sat(&req.invoice)
            .map_err(|e| SubmarineError::InvalidInvoice(e.to_string()))?;
        if invoice_utils::is_expired(&req.invoice)
            .map_err(|e| SubmarineError::InvalidInvoice(e.to_string()))?
        {
            return Err(SubmarineError::InvoiceExpired);
        }

        if !req.pair.amount_in_limits(invoice_amount) {
            return Err(SubmarineError::AmountOutOfBounds(invoice_amount));
        }

        let expected_amount = invoice_amount + req.pair.fee_for(invoice_amount);

        let key_index = self.store.next_key_index(&req.pair.base).await?;
        let claim_public_key = self.keys.public_key_hex(key_index)?;

        let tip = self.chain.tip_height().await?;
        let timeout_block_height = tip as u32 + req.pair.timeout_deltas.submarine;

        let tree = HtlcTree::new(
            &preimage_hash,
            &claim_public_key,
            &req.refund_public_key,
            timeout_block_height,
        )?;
        let lockup_address = tree.address(self.cfg.network).to_string();

        let mut swap = Swap::new(
            req.pair.id(),
            req.order_side,
            expected_amount,
            req.invoice.clone(),
            hex::encode(preimage_hash),
            req.refund_public_key.clone(),
            claim_public_key,
            key_index,
            hex::encode(tree.claim_script.as_bytes()),
            hex::encode(tree.refund_script.as_bytes()),
            lockup_address.clone(),
            timeout_block_height,
        );
        swap.channel_creation = req.channel.is_some();

        self.store.insert_swap(&swap).await?;

        if let Some(channel) = &req.channel {
            let node_public_key = invoice_utils::payee_public_key(&req.invoice)
                .map_err(|e| SubmarineError::InvalidInvoice(e.to_string()))?;
            self.store
                .insert_channel_creation(&ChannelCreation::new(
                    swap.id.clone(),
                    node_public_key,
                    channel.private,
                    channel.inbound_liquidity_percent,
                ))
                .await?;
        }

        self.listener.watch_address(&swap.id, &lockup_address).await;
        self.timeouts
            .schedule_expiry(&swap.id, Swap::KIND, timeout_block_height)
            .await;

        self.events
            .publish_status(&swap.id, SwapStatus::SwapCreated, None);
        info!(
            swap_id = %swap.id,
            address = %lockup_address,
            expected_amount,
            timeout_block_height,
            "submarine swap created"
        );

        let bip21 = format!(
            "bitcoin:{}?amount={}",
            lockup_address,
            sats_to_coin_string(expected_amount)
        );

        Ok(CreatedSubmarine {
            swap_tree: tree.swap_tree(),
            bip21,
            swap,
        })
    }

    /// Handle a normalised chain event for one of our swaps
    pub async fn handle_chain_event(&self, event: ChainEvent) {
        let result = match event {
            ChainEvent::OutputFound {
                swap_id,
                txid,
                vout,
                amount,
                confirmed,
            } => {
                if confirmed {
                    self.on_lockup_confirmed(&swap_id).await
                } else {
                    self.on_lockup_mempool(&swap_id, &txid, vout, amount).await
                }
            }
            ChainEvent::OutputRetracted { swap_id, .. } => self.on_retracted(&swap_id).await,
            ChainEvent::OutputEvicted { swap_id, .. } => self.on_evicted(&swap_id).await,
            ChainEvent::OutputSpent { .. } | ChainEvent::BlockHeight { .. } => Ok(()),
        };

        if let Err(err) = result {
            error!(error = %err, "submarine chain event handling failed");
        }
    }

    async fn on_lockup_mempool(
        &self,
        swap_id: &str,
        txid: &str,
        vout: u32,
        amount: u64,
    ) -> Result<(), SubmarineError> {
        let lock = self.lock_for(swap_id).await;
        let _guard = lock.lock().await;

        let swap = self.load(swap_id).await?;
        if !matches!(
            swap.status,
            SwapStatus::SwapCreated | SwapStatus::InvoiceSet
        ) {
            debug!(swap_id, status = %swap.status, "ignoring duplicate lockup");
            return Ok(());
        }

        self.store
            .set_swap_lockup(swap_id, txid, vout, amount, false)
            .await?;

        if amount < swap.expected_amount {
            warn!(
                swap_id,
                amount,
                expected = swap.expected_amount,
                "lockup underpaid"
            );
            self.store
                .set_swap_failure_reason(
                    swap_id,
                    &format!("underpaid: {} < {}", amount, swap.expected_amount),
                )
                .await?;
            let updated = self
                .store
                .set_swap_status(swap_id, SwapStatus::TransactionLockupFailed)
                .await?;
            self.events.publish_status(
                swap_id,
                updated.status,
                Some(json!({ "failureReason": "lockup underpaid" })),
            );
            return Ok(());
        }

        let updated = self
            .store
            .set_swap_status(swap_id, SwapStatus::TransactionMempool)
            .await?;
        self.events
            .publish_status(swap_id, updated.status, Some(json!({ "transactionId": txid })));

        // Zero-conf acceptance
        let pair = self.pair(&swap.pair)?.clone();
        if pair.allows_zero_conf(amount) {
            match self
                .listener
                .check_zero_conf(txid, pair.min_zero_conf_feerate)
                .await
            {
                Ok(None) => {
                    info!(swap_id, txid, "lockup accepted zero-conf");
                    self.store
                        .set_swap_lockup(swap_id, txid, vout, amount, true)
                        .await?;
                    let updated = self
                        .store
                        .set_swap_status(swap_id, SwapStatus::TransactionConfirmed)
                        .await?;
                    self.events.publish_status(
                        swap_id,
                        updated.status,
                        Some(json!({ "zeroConfAccepted": true })),
                    );
                    self.begin_payment(updated).await?;
                }
                Ok(Some(rejection)) => {
                    debug!(swap_id, reason = %rejection, "zero-conf rejected, waiting for confirmation");
                }
                Err(err) => {
                    warn!(swap_id, error = %err, "zero-conf assessment failed");
                }
            }
        }

        Ok(())
    }

    async fn on_lockup_confirmed(&self, swap_id: &str) -> Result<(), SubmarineError> {
        let lock = self.lock_for(swap_id).await;
        let _guard = lock.lock().await;

        let swap = self.load(swap_id).await?;
        if swap.status != SwapStatus::TransactionMempool {
            debug!(swap_id, status = %swap.status, "confirmation with no pending mempool lockup");
            return Ok(());
        }

        let updated = self
            .store
            .set_swap_status(swap_id, SwapStatus::TransactionConfirmed)
            .await?;
        self.events.publish_status(swap_id, updated.status, None);
        self.begin_payment(updated).await
    }

    async fn on_retracted(&self, swap_id: &str) -> Result<(), SubmarineError> {
        let lock = self.lock_for(swap_id).await;
        let _guard = lock.lock().await;

        let swap = self.load(swap_id).await?;
        if swap.status != SwapStatus::TransactionConfirmed {
            return Ok(());
        }

        warn!(swap_id, "reorg unconfirmed the lockup");
        let updated = self
            .store
            .set_swap_status(swap_id, SwapStatus::TransactionMempool)
            .await?;
        self.events
            .publish_status(swap_id, updated.status, Some(json!({ "reorg": true })));
        Ok(())
    }

    async fn on_evicted(&self, swap_id: &str) -> Result<(), SubmarineError> {
        let lock = self.lock_for(swap_id).await;
        let _guard = lock.lock().await;

        let swap = self.load(swap_id).await?;
        if swap.preimage.is_some() || swap.status != SwapStatus::TransactionMempool {
            return Ok(());
        }

        warn!(swap_id, "lockup evicted from the mempool");
        self.store
            .set_swap_failure_reason(swap_id, "lockup evicted from mempool")
            .await?;
        let updated = self
            .store
            .set_swap_status(swap_id, SwapStatus::TransactionLockupFailed)
            .await?;
        self.events.publish_status(
            swap_id,
            updated.status,
            Some(json!({ "failureReason": "lockup evicted" })),
        );
        Ok(())
    }

    /// Lockup is eligible: hand over to the nursery for open-channel swaps,
    /// otherwise start paying the invoice
    async fn begin_payment(&self, swap: Swap) -> Result<(), SubmarineError> {
        let updated = self
            .store
            .set_swap_status(&swap.id, SwapStatus::InvoicePending)
            .await?;
        self.events.publish_status(&swap.id, updated.status, None);

        if swap.channel_creation {
            debug!(swap_id = %swap.id, "handing eligible swap to the channel nursery");
            let _ = self
                .nursery_tx
                .send(NurseryCommand::SwapEligible {
                    swap_id: swap.id.clone(),
                })
                .await;
            return Ok(());
        }

        let Some(manager) = self.weak.upgrade() else {
            return Ok(());
        };
        let swap_id = swap.id.clone();
        let handle = tokio::spawn(async move {
            manager.pay_with_retries(&swap_id).await;
        });

        self.payment_tasks
            .lock()
            .await
            .insert(swap.id.clone(), handle.abort_handle());
        Ok(())
    }

    /// Payment loop: exponential backoff until success, a terminal failure,
    /// the attempt budget, or the overall deadline
    pub(crate) async fn pay_with_retries(&self, swap_id: &str) {
        let swap = match self.load(swap_id).await {
            Ok(swap) => swap,
            Err(err) => {
                error!(swap_id, error = %err, "payment loop could not load swap");
                return;
            }
        };

        let deadline = tokio::time::Instant::now() + self.cfg.payment_timeout;
        let mut failure = String::new();

        for attempt in 0..self.cfg.max_payment_attempts {
            if attempt > 0 {
                let delay = backoff_delay(self.cfg.payment_base_retry, attempt - 1);
                if tokio::time::Instant::now() + delay > deadline {
                    failure = format!("payment timeout after {} attempts", attempt);
                    break;
                }
                tokio::time::sleep(delay).await;
            }

            match self
                .lightning
                .pay_invoice(&swap.invoice, self.cfg.max_fee_ratio, None)
                .await
            {
                Ok(result) => {
                    info!(swap_id, fee_msat = result.fee_msat, "invoice paid");
                    if let Err(err) = self.on_invoice_paid(swap_id, &result.preimage).await {
                        error!(swap_id, error = %err, "post-payment handling failed");
                    }
                    return;
                }
                Err(err) if err.is_terminal_payment_failure() => {
                    failure = err.to_string();
                    break;
                }
                Err(err) => {
                    warn!(swap_id, attempt, error = %err, "payment attempt failed");
                    failure = err.to_string();
                }
            }
        }

        if let Err(err) = self.fail_payment(swap_id, &failure).await {
            error!(swap_id, error = %err, "could not record payment failure");
        }
    }

    async fn fail_payment(&self, swap_id: &str, reason: &str) -> Result<(), SubmarineError> {
        let lock = self.lock_for(swap_id).await;
        let _guard = lock.lock().await;

        warn!(swap_id, reason, "invoice failed to pay");
        self.store.set_swap_failure_reason(swap_id, reason).await?;
        let updated = self
            .store
            .set_swap_status(swap_id, SwapStatus::InvoiceFailedToPay)
            .await?;
        self.events.publish_status(
            swap_id,
            updated.status,
            Some(json!({ "failureReason": reason })),
        );
        Ok(())
    }

    /// Invoice settled: record the preimage and open the cooperative claim
    /// window
    pub(crate) async fn on_invoice_paid(
        &self,
        swap_id: &str,
        preimage_hex: &str,
    ) -> Result<(), SubmarineError> {
        let lock = self.lock_for(swap_id).await;
        let _guard = lock.lock().await;

        self.payment_tasks.lock().await.remove(swap_id);
        self.store.set_swap_preimage(swap_id, preimage_hex).await?;
        let updated = self
            .store
            .set_swap_status(swap_id, SwapStatus::InvoicePaid)
            .await?;
        self.events.publish_status(swap_id, updated.status, None);

        // Settled creations stay settled; anything else is now moot
        if updated.channel_creation {
            let _ = self
                .nursery_tx
                .send(NurseryCommand::SwapResolved {
                    swap_id: swap_id.to_string(),
                })
                .await;
        }

        self.start_claim(updated).await
    }

    /// Build the key-path claim template and open the MuSig2 session; the
    /// script-path spend takes over when the timer wins the race
    async fn start_claim(&self, swap: Swap) -> Result<(), SubmarineError> {
        let (lockup_txid, lockup_vout, lockup_amount) = lockup_of(&swap)?;
        let preimage = decode_hash(swap.preimage.as_deref().unwrap_or_default())?;

        let tree = HtlcTree::new(
            &decode_hash(&swap.preimage_hash)?,
            &swap.claim_public_key,
            &swap.refund_public_key,
            swap.timeout_block_height,
        )?;

        let fee_per_vbyte = self.chain.estimate_fee_per_vbyte(2).await?.ceil() as u64;
        let destination = self.destination_address().await?;
        let mut template = build_key_spend_template(
            &lockup_txid,
            lockup_vout,
            lockup_amount,
            &destination,
            fee_per_vbyte,
        )?;

        // Overpaid lockups return the excess to the client alongside the
        // cooperative claim; the script path spends everything instead
        let excess = lockup_amount.saturating_sub(swap.expected_amount);
        if excess >= 546 {
            let refund_bytes = hex::decode(&swap.refund_public_key)
                .map_err(|e| MusigError::InvalidInput(e.to_string()))?;
            let xonly_bytes = if refund_bytes.len() == 33 {
                &refund_bytes[1..]
            } else {
                &refund_bytes[..]
            };
            let refund_key = bitcoin::XOnlyPublicKey::from_slice(xonly_bytes)
                .map_err(|e| MusigError::InvalidInput(e.to_string()))?;
            let secp = bitcoin::key::Secp256k1::new();
            let user_address =
                bitcoin::Address::p2tr(&secp, refund_key, None, self.cfg.network);

            let kept = template.output[0].value.to_sat().saturating_sub(excess);
            template.output[0].value = bitcoin::Amount::from_sat(kept);
            template.output.push(bitcoin::TxOut {
                value: bitcoin::Amount::from_sat(excess),
                script_pubkey: user_address.script_pubkey(),
            });
        }

        let sighash = key_spend_sighash(&template, 0, &tree.lockup_script(), lockup_amount)?;
        let session = SwapMusigSession::new(
            &self.keys.secret_bytes(swap.key_index)?,
            &swap.claim_public_key,
            &swap.refund_public_key,
            tree.merkle_root(),
            sighash,
        )?;

        let pub_nonce = session.pub_nonce_hex();
        let template_hex = serialize_transaction(&template);

        self.claim_sessions.lock().await.insert(
            swap.id.clone(),
            ClaimSession {
                session,
                template,
                preimage,
            },
        );

        match self
            .store
            .set_swap_status(&swap.id, SwapStatus::TransactionClaimPending)
            .await
        {
            Ok(updated) => self.events.publish_status(
                &swap.id,
                updated.status,
                Some(json!({
                    "pubNonce": pub_nonce,
                    "transactionHex": template_hex,
                    "preimage": hex::encode(preimage),
                })),
            ),
            // Resuming a claim that was already pending before a restart
            Err(StorageError::InvalidTransition { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        self.timeouts
            .schedule_claim_fallback(&swap.id, self.cfg.cooperative_claim_timeout)
            .await;
        Ok(())
    }

    /// Client cooperation arrived: finish the MuSig2 session and broadcast
    /// the key-path claim
    pub async fn cooperative_claim(
        &self,
        swap_id: &str,
        client_pub_nonce_hex: &str,
        client_partial_hex: &str,
    ) -> Result<String, SubmarineError> {
        let lock = self.lock_for(swap_id).await;
        let _guard = lock.lock().await;

        let mut claim = self
            .claim_sessions
            .lock()
            .await
            .remove(swap_id)
            .ok_or_else(|| SubmarineError::NoClaimPending(swap_id.to_string()))?;

        let final_sig = match claim
            .session
            .complete(client_pub_nonce_hex, client_partial_hex)
        {
            Ok(sig) => sig,
            Err(err) => {
                // The nonce is spent either way; re-arm a fresh session so
                // the client can retry until the timer fires
                warn!(swap_id, error = %err, "cooperative claim failed, re-arming");
                let swap = self.load(swap_id).await?;
                self.start_claim(swap).await?;
                return Err(err.into());
            }
        };

        let mut tx = claim.template;
        tx.input[0].witness = Witness::from_slice(&[final_sig.as_slice()]);
        let txid = self.chain.broadcast(&serialize_transaction(&tx)).await?;

        self.finish_claim(swap_id, &txid, "cooperative claim").await
    }

    /// The cooperative window elapsed: claim through the script path
    pub async fn handle_claim_timeout(&self, swap_id: &str) {
        if let Err(err) = self.script_claim(swap_id).await {
            error!(swap_id, error = %err, "script-path claim failed");
        }
    }

    async fn script_claim(&self, swap_id: &str) -> Result<(), SubmarineError> {
        let lock = self.lock_for(swap_id).await;
        let _guard = lock.lock().await;

        let Some(claim) = self.claim_sessions.lock().await.remove(swap_id) else {
            // Cooperative claim already won the race
            return Ok(());
        };

        let swap = self.load(swap_id).await?;
        let (lockup_txid, lockup_vout, lockup_amount) = lockup_of(&swap)?;

        let tree = HtlcTree::new(
            &decode_hash(&swap.preimage_hash)?,
            &swap.claim_public_key,
            &swap.refund_public_key,
            swap.timeout_block_height,
        )?;

        let fee_per_vbyte = self.chain.estimate_fee_per_vbyte(2).await?.ceil() as u64;
        let destination = self.destination_address().await?;
        let keypair = self.keys.keypair(swap.key_index)?;

        let tx = tree.build_claim(
            &lockup_txid,
            lockup_vout,
            lockup_amount,
            &claim.preimage,
            &keypair,
            &destination,
            fee_per_vbyte,
        )?;

        info!(swap_id, "falling back to the script-path claim");
        let txid = self.chain.broadcast(&serialize_transaction(&tx)).await?;
        self.finish_claim(swap_id, &txid, "script claim").await?;
        Ok(())
    }

    async fn finish_claim(
        &self,
        swap_id: &str,
        txid: &str,
        label: &str,
    ) -> Result<String, SubmarineError> {
        let swap = self.load(swap_id).await?;
        self.store
            .label_transaction(txid, &pair_base(&swap.pair), label)
            .await?;

        let updated = self
            .store
            .set_swap_status(swap_id, SwapStatus::TransactionClaimed)
            .await?;
        self.events.publish_status(
            swap_id,
            updated.status,
            Some(json!({ "transactionId": txid })),
        );
        self.timeouts.cancel(swap_id).await;
        self.listener.unwatch_address(&swap.lockup_address).await;

        info!(swap_id, txid, "submarine swap claimed");
        Ok(txid.to_string())
    }

    /// The swap reached its timeout height unsettled
    pub async fn handle_expiry(&self, swap_id: &str) {
        if let Err(err) = self.expire(swap_id).await {
            error!(swap_id, error = %err, "expiry handling failed");
        }
    }

    async fn expire(&self, swap_id: &str) -> Result<(), SubmarineError> {
        let lock = self.lock_for(swap_id).await;
        let _guard = lock.lock().await;

        let swap = self.load(swap_id).await?;
        if matches!(
            swap.status,
            SwapStatus::InvoicePaid
                | SwapStatus::TransactionClaimPending
                | SwapStatus::TransactionClaimed
                | SwapStatus::TransactionRefunded
                | SwapStatus::SwapExpired
        ) {
            return Ok(());
        }

        // Cancel an in-flight payment attempt
        if let Some(handle) = self.payment_tasks.lock().await.remove(swap_id) {
            handle.abort();
            debug!(swap_id, "aborted in-flight payment");
        }

        let updated = self
            .store
            .set_swap_status(swap_id, SwapStatus::SwapExpired)
            .await?;
        self.events.publish_status(swap_id, updated.status, None);
        self.listener.unwatch_address(&swap.lockup_address).await;

        if updated.channel_creation {
            let _ = self
                .nursery_tx
                .send(NurseryCommand::SwapResolved {
                    swap_id: swap_id.to_string(),
                })
                .await;
        }

        info!(swap_id, "submarine swap expired");
        Ok(())
    }

    /// Outcome reported back by the channel nursery
    pub async fn handle_nursery_outcome(&self, outcome: NurseryOutcome) {
        let result = match outcome {
            NurseryOutcome::InvoiceSettled { swap_id, preimage } => {
                self.on_invoice_paid(&swap_id, &preimage).await
            }
            NurseryOutcome::Failed { swap_id, reason } => self.fail_payment(&swap_id, &reason).await,
        };

        if let Err(err) = result {
            error!(error = %err, "nursery outcome handling failed");
        }
    }

    /// Restart recovery: re-watch and re-index everything still in flight
    pub async fn resume(&self) -> Result<(), SubmarineError> {
        for status in [
            SwapStatus::SwapCreated,
            SwapStatus::InvoiceSet,
            SwapStatus::TransactionMempool,
            SwapStatus::TransactionConfirmed,
            SwapStatus::InvoicePending,
        ] {
            for swap in self.store.get_swaps_by_status(status).await? {
                self.listener
                    .watch_address(&swap.id, &swap.lockup_address)
                    .await;
                self.timeouts
                    .schedule_expiry(&swap.id, Swap::KIND, swap.timeout_block_height)
                    .await;
            }
        }

        // Claims interrupted mid-race get a fresh session
        for status in [SwapStatus::InvoicePaid, SwapStatus::TransactionClaimPending] {
            for swap in self.store.get_swaps_by_status(status).await? {
                info!(swap_id = %swap.id, "resuming interrupted claim");
                if let Err(err) = self.start_claim(swap).await {
                    error!(error = %err, "claim resume failed");
                }
            }
        }

        Ok(())
    }

    async fn destination_address(&self) -> Result<Address, SubmarineError> {
        let address = self.wallet.get_address().await?;
        use std::str::FromStr as _;
        Ok(Address::from_str(&address)
            .map_err(|e| {
                SubmarineError::Wallet(crate::wallet::WalletError::InvalidAddress(e.to_string()))
            })?
            .require_network(self.cfg.network)
            .map_err(|e| {
                SubmarineError::Wallet(crate::wallet::WalletError::InvalidAddress(e.to_string()))
            })?)
    }

    async fn load(&self, swap_id: &str) -> Result<Swap, SubmarineError> {
        self.store
            .get_swap(swap_id)
            .await?
            .ok_or_else(|| SubmarineError::SwapNotFound(swap_id.to_string()))
    }
}

fn lockup_of(swap: &Swap) -> Result<(String, u32, u64), SubmarineError> {
    match (&swap.lockup_txid, swap.lockup_vout, swap.onchain_amount) {
        (Some(txid), Some(vout), Some(amount)) => Ok((txid.clone(), vout, amount)),
        _ => Err(SubmarineError::SwapNotFound(format!(
            "{} has no lockup",
            swap.id
        ))),
    }
}

fn pair_base(pair_id: &str) -> String {
    pair_id
        .split('/')
        .next()
        .unwrap_or(pair_id)
        .to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::listener::tests::MockBackend;
    use crate::chain::esplora::TxStatus;
    use crate::config::Network as ConfigNetwork;
    use crate::lightning::mock::MockLightning;
    use crate::lightning::PaymentResult;
    use crate::store::MemoryStore;
    use crate::timeout::TimeoutEvent;
    use crate::wallet::mock::MockWallet;
    use bitcoin::hashes::{sha256, Hash as _};
    use bitcoin::key::Secp256k1;
    use lightning_invoice::{Currency, InvoiceBuilder, PaymentSecret};
    use std::time::Duration as StdDuration;

    pub(crate) struct Harness {
        pub manager: Arc<SubmarineManager>,
        pub store: Arc<MemoryStore>,
        pub backend: Arc<MockBackend>,
        pub lightning: Arc<MockLightning>,
        pub wallet: Arc<MockWallet>,
        pub nursery_rx: mpsc::Receiver<NurseryCommand>,
        pub timeout_rx: mpsc::Receiver<TimeoutEvent>,
    }

    pub(crate) fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(MockBackend::default());
        let lightning = Arc::new(MockLightning::default());
        let wallet = Arc::new(MockWallet::new());
        let keys = Arc::new(
            KeyProvider::from_seed_hex(
                "000102030405060708090a0b0c0d0e0f",
                bitcoin::Network::Regtest,
            )
            .unwrap(),
        );
        let events = Arc::new(EventBus::new(64));

        let (chain_tx, _chain_rx) = mpsc::channel(64);
        let listener = Arc::new(ChainListener::new(
            backend.clone(),
            chain_tx,
            StdDuration::from_secs(60),
        ));

        let (timeout_tx, timeout_rx) = mpsc::channel(64);
        let timeouts = Arc::new(TimeoutWatcher::new(timeout_tx));

        let (nursery_tx, nursery_rx) = mpsc::channel(64);

        let cfg = SubmarineConfig {
            network: bitcoin::Network::Regtest,
            pairs: vec![Pair::btc_btc(ConfigNetwork::Regtest)],
            max_payment_attempts: 3,
            payment_timeout: StdDuration::from_secs(5),
            payment_base_retry: StdDuration::from_millis(1),
            cooperative_claim_timeout: StdDuration::from_secs(60),
            max_fee_ratio: 0.01,
        };

        let manager = SubmarineManager::new(
            store.clone(),
            backend.clone(),
            listener,
            lightning.clone(),
            wallet.clone(),
            keys,
            events,
            timeouts,
            nursery_tx,
            cfg,
        );

        Harness {
            manager,
            store,
            backend,
            lightning,
            wallet,
            nursery_rx,
            timeout_rx,
        }
    }

    /// Mint a signed regtest invoice for the given preimage
    pub(crate) fn test_invoice(preimage: &[u8; 32], amount_msat: u64) -> String {
        let secp = Secp256k1::new();
        let key = bitcoin::secp256k1::SecretKey::from_slice(&[0x39; 32]).unwrap();
        let payment_hash = sha256::Hash::hash(preimage);

        InvoiceBuilder::new(Currency::Regtest)
            .description("test swap".to_string())
            .payment_hash(payment_hash)
            .payment_secret(PaymentSecret([0x44; 32]))
            .amount_milli_satoshis(amount_msat)
            .current_timestamp()
            .min_final_cltv_expiry_delta(80)
            .basic_mpp()
            .build_signed(|hash| secp.sign_ecdsa_recoverable(hash, &key))
            .unwrap()
            .to_string()
    }

    pub(crate) const REFUND_KEY: &str =
        "02d4c41c9c8455626d4d99525e05ec0d28a3665f27494e0ca41cbabfeb82e9e9f4";

    pub(crate) fn create_request(invoice: String) -> CreateSubmarineRequest {
        CreateSubmarineRequest {
            pair: Pair::btc_btc(ConfigNetwork::Regtest),
            order_side: OrderSide::Sell,
            invoice,
            refund_public_key: REFUND_KEY.to_string(),
            channel: None,
        }
    }

    async fn wait_for_status(
        store: &MemoryStore,
        swap_id: &str,
        status: SwapStatus,
    ) -> Swap {
        for _ in 0..200 {
            let swap = store.get_swap(swap_id).await.unwrap().unwrap();
            if swap.status == status {
                return swap;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        panic!("swap never reached {}", status);
    }

    fn found(swap_id: &str, amount: u64, confirmed: bool) -> ChainEvent {
        ChainEvent::OutputFound {
            swap_id: swap_id.to_string(),
            txid: "aa".repeat(32),
            vout: 0,
            amount,
            confirmed,
        }
    }

    #[tokio::test]
    async fn test_happy_path_to_claim_pending() {
        let mut h = harness();
        let preimage = [0x01u8; 32];
        let invoice = test_invoice(&preimage, 1_000_000_000);

        let created = h.manager.create(create_request(invoice)).await.unwrap();
        let swap_id = created.swap.id.clone();
        assert_eq!(created.swap.status, SwapStatus::SwapCreated);
        assert_eq!(created.swap.expected_amount, 1_005_000);
        assert!(created.bip21.starts_with("bitcoin:bcrt1p"));

        h.lightning.queue_payment(Ok(PaymentResult {
            preimage: hex::encode(preimage),
            fee_msat: 1_000,
        }));

        // Large amount: zero-conf not allowed, wait for confirmation
        h.manager
            .handle_chain_event(found(&swap_id, 1_005_000, false))
            .await;
        assert_eq!(
            h.store.get_swap(&swap_id).await.unwrap().unwrap().status,
            SwapStatus::TransactionMempool
        );

        h.manager
            .handle_chain_event(found(&swap_id, 1_005_000, true))
            .await;

        let swap = wait_for_status(&h.store, &swap_id, SwapStatus::TransactionClaimPending).await;
        assert_eq!(swap.preimage.as_deref(), Some(hex::encode(preimage).as_str()));
        assert_eq!(h.lightning.pay_attempts(), 1);
    }

    #[tokio::test]
    async fn test_underpaid_lockup_fails() {
        let h = harness();
        let preimage = [0x02u8; 32];
        let invoice = test_invoice(&preimage, 1_000_000_000);

        let created = h.manager.create(create_request(invoice)).await.unwrap();
        let swap_id = created.swap.id.clone();

        h.manager
            .handle_chain_event(found(&swap_id, 500_000, false))
            .await;

        let swap = h.store.get_swap(&swap_id).await.unwrap().unwrap();
        assert_eq!(swap.status, SwapStatus::TransactionLockupFailed);
        assert!(swap.failure_reason.unwrap().contains("underpaid"));
        assert_eq!(h.lightning.pay_attempts(), 0);
    }

    #[tokio::test]
    async fn test_terminal_payment_failure() {
        let h = harness();
        let preimage = [0x03u8; 32];
        // Small amount: zero-conf eligible
        let invoice = test_invoice(&preimage, 500_000_000);

        let created = h.manager.create(create_request(invoice)).await.unwrap();
        let swap_id = created.swap.id.clone();

        h.lightning.queue_payment(Err("unable to find a path to destination"));

        h.backend.statuses.lock().unwrap().insert(
            "aa".repeat(32),
            TxStatus {
                confirmed: false,
                block_height: None,
                block_hash: None,
            },
        );
        h.manager
            .handle_chain_event(found(&swap_id, 502_500, false))
            .await;

        // Zero-conf check needs the tx; without it the swap waits for a
        // confirmation instead
        h.manager
            .handle_chain_event(found(&swap_id, 502_500, true))
            .await;

        let swap = wait_for_status(&h.store, &swap_id, SwapStatus::InvoiceFailedToPay).await;
        assert!(swap.failure_reason.unwrap().contains("path"));
        // Terminal failures are not retried
        assert_eq!(h.lightning.pay_attempts(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_retry() {
        let h = harness();
        let preimage = [0x04u8; 32];
        let invoice = test_invoice(&preimage, 500_000_000);

        let created = h.manager.create(create_request(invoice)).await.unwrap();
        let swap_id = created.swap.id.clone();

        h.lightning.queue_payment(Err("temporary channel failure"));
        h.lightning.queue_payment(Ok(PaymentResult {
            preimage: hex::encode(preimage),
            fee_msat: 500,
        }));

        h.manager
            .handle_chain_event(found(&swap_id, 502_500, false))
            .await;
        h.manager
            .handle_chain_event(found(&swap_id, 502_500, true))
            .await;

        wait_for_status(&h.store, &swap_id, SwapStatus::TransactionClaimPending).await;
        assert_eq!(h.lightning.pay_attempts(), 2);
    }

    #[tokio::test]
    async fn test_reorg_rolls_back_confirmation() {
        let h = harness();
        let preimage = [0x05u8; 32];
        let invoice = test_invoice(&preimage, 1_000_000_000);

        let created = h.manager.create(create_request(invoice)).await.unwrap();
        let swap_id = created.swap.id.clone();

        h.manager
            .handle_chain_event(found(&swap_id, 1_005_000, false))
            .await;
        // Drive to confirmed without starting a payment
        h.store
            .set_swap_status(&swap_id, SwapStatus::TransactionConfirmed)
            .await
            .unwrap();

        h.manager
            .handle_chain_event(ChainEvent::OutputRetracted {
                swap_id: swap_id.clone(),
                txid: "aa".repeat(32),
                vout: 0,
            })
            .await;
        assert_eq!(
            h.store.get_swap(&swap_id).await.unwrap().unwrap().status,
            SwapStatus::TransactionMempool
        );

        // A re-confirmation is accepted again afterwards
        assert!(h
            .store
            .get_swap(&swap_id)
            .await
            .unwrap()
            .unwrap()
            .status
            .can_transition(Swap::KIND, SwapStatus::TransactionConfirmed));
    }

    #[tokio::test]
    async fn test_eviction_fails_lockup() {
        let h = harness();
        let preimage = [0x06u8; 32];
        let invoice = test_invoice(&preimage, 1_000_000_000);

        let created = h.manager.create(create_request(invoice)).await.unwrap();
        let swap_id = created.swap.id.clone();

        h.manager
            .handle_chain_event(found(&swap_id, 1_005_000, false))
            .await;
        h.manager
            .handle_chain_event(ChainEvent::OutputEvicted {
                swap_id: swap_id.clone(),
                txid: "aa".repeat(32),
                vout: 0,
            })
            .await;

        let swap = h.store.get_swap(&swap_id).await.unwrap().unwrap();
        assert_eq!(swap.status, SwapStatus::TransactionLockupFailed);
    }

    #[tokio::test]
    async fn test_expiry_before_payment() {
        let h = harness();
        let preimage = [0x07u8; 32];
        let invoice = test_invoice(&preimage, 1_000_000_000);

        let created = h.manager.create(create_request(invoice)).await.unwrap();
        let swap_id = created.swap.id.clone();

        h.manager
            .handle_chain_event(found(&swap_id, 1_005_000, false))
            .await;
        h.manager.handle_expiry(&swap_id).await;

        assert_eq!(
            h.store.get_swap(&swap_id).await.unwrap().unwrap().status,
            SwapStatus::SwapExpired
        );
    }

    #[tokio::test]
    async fn test_script_claim_after_timeout() {
        let h = harness();
        let preimage = [0x08u8; 32];
        let invoice = test_invoice(&preimage, 500_000_000);

        let created = h.manager.create(create_request(invoice)).await.unwrap();
        let swap_id = created.swap.id.clone();

        h.lightning.queue_payment(Ok(PaymentResult {
            preimage: hex::encode(preimage),
            fee_msat: 500,
        }));

        h.manager
            .handle_chain_event(found(&swap_id, 502_500, false))
            .await;
        h.manager
            .handle_chain_event(found(&swap_id, 502_500, true))
            .await;
        wait_for_status(&h.store, &swap_id, SwapStatus::TransactionClaimPending).await;

        // The timer wins the race
        h.manager.handle_claim_timeout(&swap_id).await;

        let swap = h.store.get_swap(&swap_id).await.unwrap().unwrap();
        assert_eq!(swap.status, SwapStatus::TransactionClaimed);

        // A second timeout is a no-op
        h.manager.handle_claim_timeout(&swap_id).await;
        assert_eq!(
            h.store.get_swap(&swap_id).await.unwrap().unwrap().status,
            SwapStatus::TransactionClaimed
        );
    }

    #[tokio::test]
    async fn test_channel_swap_routes_to_nursery() {
        let mut h = harness();
        let preimage = [0x09u8; 32];
        let invoice = test_invoice(&preimage, 500_000_000);

        let mut req = create_request(invoice);
        req.channel = Some(ChannelRequest {
            private: true,
            inbound_liquidity_percent: 25,
        });
        let created = h.manager.create(req).await.unwrap();
        let swap_id = created.swap.id.clone();

        // The channel creation row exists
        let creation = h
            .store
            .get_channel_creation(&swap_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            creation.status,
            crate::types::swap::ChannelCreationStatus::Attempted
        );

        h.manager
            .handle_chain_event(found(&swap_id, 502_500, false))
            .await;
        h.manager
            .handle_chain_event(found(&swap_id, 502_500, true))
            .await;

        // The swap was handed to the nursery instead of being paid directly
        let command = h.nursery_rx.recv().await.unwrap();
        assert_eq!(
            command,
            NurseryCommand::SwapEligible {
                swap_id: swap_id.clone()
            }
        );
        assert_eq!(h.lightning.pay_attempts(), 0);
        assert_eq!(
            h.store.get_swap(&swap_id).await.unwrap().unwrap().status,
            SwapStatus::InvoicePending
        );
    }

    #[tokio::test]
    async fn test_bolt12_rejected_on_submarine_create() {
        let h = harness();
        let req = create_request("lno1qqszqfnjxapqxqrrzd9h8vmmfvdjsyqrrzd9h8vmmfvdjs".to_string());
        assert!(matches!(
            h.manager.create(req).await,
            Err(SubmarineError::InvalidInvoice(_))
        ));
    }
}
