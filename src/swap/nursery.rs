//! Channel Nursery
//!
//! Orchestrates "open channel on payment" submarine swaps: connect to the
//! client's node, open the channel, wait for it to become active, then pay
//! the invoice through it. Settlement is single-flight behind a global
//! lock; retries follow a 1x/2x/4x schedule and the counter reaching 4
//! abandons the creation.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use super::backoff_delay;
use crate::events::EventBus;
use crate::lightning::{
    invoice as invoice_utils, LightningClient, LightningError, LightningEvent,
    OpenChannelRequest,
};
use crate::store::{ChannelCreationStore as _, StorageError, Store, SubmarineStore as _};
use crate::types::status::SwapStatus;
use crate::types::swap::{ChannelCreation, ChannelCreationStatus, Swap};

/// The settle counter value that triggers abandonment
const MAX_SETTLE_ATTEMPTS: u32 = 4;

/// Errors the node reports while its wallet is still syncing; these retry
const WALLET_SYNC_ERRORS: [&str; 2] = ["wallet is fully synced", "Synchronizing blockchain"];

/// A settled invoice reported by a node that was already paid counts as
/// success
const ALREADY_PAID_ERROR: &str = "invoice is already paid";

/// Nursery errors
#[derive(Debug, Error)]
pub enum NurseryError {
    #[error("swap not found: {0}")]
    SwapNotFound(String),

    #[error("no channel creation for swap {0}")]
    NoChannelCreation(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("lightning error: {0}")]
    Lightning(#[from] LightningError),
}

/// Commands from the submarine state machine
#[derive(Debug, Clone, PartialEq)]
pub enum NurseryCommand {
    /// The swap's lockup became eligible; open the channel and settle
    SwapEligible { swap_id: String },
    /// The swap finished without the nursery (expired or paid elsewhere)
    SwapResolved { swap_id: String },
}

/// What a single settle attempt decided
enum SettleStep {
    Done,
    Retry(Duration),
}

/// Outcomes reported back to the submarine state machine
#[derive(Debug, Clone, PartialEq)]
pub enum NurseryOutcome {
    /// The invoice was paid through the nursery channel
    InvoiceSettled { swap_id: String, preimage: String },
    /// The channel creation failed terminally
    Failed { swap_id: String, reason: String },
}

/// Nursery configuration
#[derive(Clone)]
pub struct NurseryConfig {
    /// Base delay of the settle retry schedule
    pub settle_base_retry: Duration,
    /// Linear delay between channel open retries while the wallet syncs
    pub open_retry_delay: Duration,
    /// Channel open attempts before giving up on a syncing wallet
    pub max_open_attempts: u32,
    /// Flat fee buffer added to the channel funding amount
    pub funding_fee_buffer_sat: u64,
    /// Feerate of the funding transaction
    pub funding_sat_per_vbyte: u64,
    /// Address hints used when connecting to the client node
    pub peer_address_hints: Vec<String>,
}

impl Default for NurseryConfig {
    fn default() -> Self {
        Self {
            settle_base_retry: Duration::from_secs(10),
            open_retry_delay: Duration::from_secs(15),
            max_open_attempts: 10,
            funding_fee_buffer_sat: 10_000,
            funding_sat_per_vbyte: 2,
            peer_address_hints: Vec::new(),
        }
    }
}

/// The channel nursery
pub struct ChannelNursery {
    store: Arc<dyn Store>,
    lightning: Arc<dyn LightningClient>,
    events: Arc<EventBus>,
    outcome_tx: mpsc::Sender<NurseryOutcome>,
    cfg: NurseryConfig,

    /// Global single-flight lock for invoice settlement
    settle_lock: Mutex<()>,
    /// Per-swap settle retry counters
    settle_retries: Mutex<HashMap<String, u32>>,
    weak: Weak<Self>,
}

impl ChannelNursery {
    pub fn new(
        store: Arc<dyn Store>,
        lightning: Arc<dyn LightningClient>,
        events: Arc<EventBus>,
        outcome_tx: mpsc::Sender<NurseryOutcome>,
        cfg: NurseryConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            store,
            lightning,
            events,
            outcome_tx,
            cfg,
            settle_lock: Mutex::new(()),
            settle_retries: Mutex::new(HashMap::new()),
            weak: weak.clone(),
        })
    }

    /// Drive the command stream until the process exits
    pub async fn run(self: Arc<Self>, mut command_rx: mpsc::Receiver<NurseryCommand>) {
        info!("channel nursery started");
        while let Some(command) = command_rx.recv().await {
            self.handle_command(command).await;
        }
    }

    pub async fn handle_command(&self, command: NurseryCommand) {
        let result = match command {
            NurseryCommand::SwapEligible { swap_id } => self.open_for_swap(&swap_id).await,
            NurseryCommand::SwapResolved { swap_id } => self.resolve(&swap_id).await,
        };

        if let Err(err) = result {
            error!(error = %err, "nursery command failed");
        }
    }

    /// Peer/channel events; the nursery is the sole consumer
    pub async fn handle_lightning_event(&self, event: LightningEvent) {
        let result = match event {
            LightningEvent::ChannelActive {
                funding_txid,
                funding_vout,
            } => self.on_channel_active(&funding_txid, funding_vout).await,
            LightningEvent::PeerOnline { public_key } => self.on_peer_online(&public_key).await,
            _ => Ok(()),
        };

        if let Err(err) = result {
            error!(error = %err, "nursery lightning event failed");
        }
    }

    /// Step 1-2 of the algorithm: connect to the peer and open the channel
    async fn open_for_swap(&self, swap_id: &str) -> Result<(), NurseryError> {
        let swap = self.load_swap(swap_id).await?;
        let creation = self.load_creation(swap_id).await?;

        if creation.status != ChannelCreationStatus::Attempted {
            debug!(swap_id, status = %creation.status, "ignoring open for settled creation");
            return Ok(());
        }
        if creation.funding_txid.is_some() {
            debug!(swap_id, "channel already funded, waiting for it to activate");
            return Ok(());
        }

        self.ensure_peer(&creation.node_public_key).await?;

        let invoice_amount = invoice_utils::amount_sat(&swap.invoice).unwrap_or(0);
        let local_funding_amount = invoice_amount
            + invoice_amount * creation.inbound_liquidity_percent as u64 / 100
            + self.cfg.funding_fee_buffer_sat;

        let request = OpenChannelRequest {
            public_key: creation.node_public_key.clone(),
            local_funding_amount,
            private: creation.private,
            sat_per_vbyte: self.cfg.funding_sat_per_vbyte,
        };

        let mut reconnected = false;
        for attempt in 0..self.cfg.max_open_attempts {
            match self.lightning.open_channel(request.clone()).await {
                Ok(point) => {
                    info!(
                        swap_id,
                        funding_txid = %point.funding_txid,
                        funding_vout = point.output_index,
                        "channel open broadcast"
                    );
                    self.store
                        .set_channel_creation_funding(
                            swap_id,
                            &point.funding_txid,
                            point.output_index,
                        )
                        .await?;

                    match self
                        .store
                        .set_swap_status(swap_id, SwapStatus::ChannelCreated)
                        .await
                    {
                        Ok(updated) => self.events.publish_status(
                            swap_id,
                            updated.status,
                            Some(json!({
                                "fundingTransactionId": point.funding_txid,
                                "fundingTransactionVout": point.output_index,
                            })),
                        ),
                        Err(StorageError::InvalidTransition { .. }) => {}
                        Err(err) => return Err(err.into()),
                    }
                    return Ok(());
                }
                Err(err) => {
                    let message = err.to_string();

                    if WALLET_SYNC_ERRORS.iter().any(|needle| message.contains(needle)) {
                        warn!(swap_id, attempt, "node wallet still syncing, retrying");
                        tokio::time::sleep(self.cfg.open_retry_delay).await;
                        continue;
                    }

                    if message.contains("not online") && !reconnected {
                        warn!(swap_id, "peer went offline, reconnecting once");
                        reconnected = true;
                        self.lightning
                            .connect_peer(
                                &creation.node_public_key,
                                &self.cfg.peer_address_hints,
                            )
                            .await
                            .ok();
                        continue;
                    }

                    error!(swap_id, error = %message, "channel open failed terminally");
                    return self.abandon(swap_id, &message).await;
                }
            }
        }

        self.abandon(swap_id, "channel open attempts exhausted")
            .await
    }

    async fn ensure_peer(&self, public_key: &str) -> Result<(), NurseryError> {
        let connected = self
            .lightning
            .list_peers()
            .await?
            .iter()
            .any(|peer| peer.public_key == public_key);

        if !connected {
            info!(peer = %public_key, "connecting to channel peer");
            self.lightning
                .connect_peer(public_key, &self.cfg.peer_address_hints)
                .await?;
        }
        Ok(())
    }

    /// Step 3: the funding output became an active channel
    async fn on_channel_active(
        &self,
        funding_txid: &str,
        funding_vout: u32,
    ) -> Result<(), NurseryError> {
        let attempted = self
            .store
            .get_channel_creations_by_status(ChannelCreationStatus::Attempted)
            .await?;

        let Some(creation) = attempted.into_iter().find(|c| {
            c.funding_txid.as_deref() == Some(funding_txid) && c.funding_vout == Some(funding_vout)
        }) else {
            return Ok(());
        };

        info!(swap_id = %creation.swap_id, funding_txid, "nursery channel active");
        self.store
            .set_channel_creation_status(&creation.swap_id, ChannelCreationStatus::Created)
            .await?;

        self.settle(creation.swap_id.clone()).await;
        Ok(())
    }

    /// A peer came online; retry any of its stalled channel opens
    async fn on_peer_online(&self, public_key: &str) -> Result<(), NurseryError> {
        let attempted = self
            .store
            .get_channel_creations_by_status(ChannelCreationStatus::Attempted)
            .await?;

        for creation in attempted
            .into_iter()
            .filter(|c| c.node_public_key == public_key && c.funding_txid.is_none())
        {
            let swap = self.load_swap(&creation.swap_id).await?;
            if swap.status == SwapStatus::InvoicePending {
                debug!(swap_id = %creation.swap_id, "peer online, retrying channel open");
                let Some(nursery) = self.weak.upgrade() else {
                    continue;
                };
                let swap_id = creation.swap_id.clone();
                tokio::spawn(async move {
                    if let Err(err) = nursery.open_for_swap(&swap_id).await {
                        error!(error = %err, "peer-online retry failed");
                    }
                });
            }
        }
        Ok(())
    }

    /// Step 3b: pay the invoice through the fresh channel, retried on the
    /// 1x/2x/4x schedule until the counter reaches its limit. The global
    /// settle lock is held per attempt, never across a retry sleep.
    pub async fn settle(&self, swap_id: String) {
        loop {
            match self.settle_once(&swap_id).await {
                SettleStep::Done => return,
                SettleStep::Retry(delay) => tokio::time::sleep(delay).await,
            }
        }
    }

    async fn settle_once(&self, swap_id: &str) -> SettleStep {
        let _guard = self.settle_lock.lock().await;

        let swap = match self.load_swap(swap_id).await {
            Ok(swap) => swap,
            Err(err) => {
                error!(swap_id, error = %err, "settle could not load swap");
                return SettleStep::Done;
            }
        };

        // Already paid through another route: idempotent success
        if swap.preimage.is_some()
            || matches!(
                swap.status,
                SwapStatus::InvoicePaid
                    | SwapStatus::TransactionClaimPending
                    | SwapStatus::TransactionClaimed
            )
        {
            debug!(swap_id, "invoice already paid, marking settled");
            self.mark_settled(swap_id).await;
            return SettleStep::Done;
        }

        let outgoing_channel = self.nursery_channel_id(swap_id).await;

        match self
            .lightning
            .pay_invoice(&swap.invoice, 0.05, outgoing_channel)
            .await
        {
            Ok(result) => {
                info!(swap_id, "invoice settled through nursery channel");
                self.mark_settled(swap_id).await;
                let _ = self
                    .outcome_tx
                    .send(NurseryOutcome::InvoiceSettled {
                        swap_id: swap_id.to_string(),
                        preimage: result.preimage,
                    })
                    .await;
                SettleStep::Done
            }
            Err(err) if err.to_string().contains(ALREADY_PAID_ERROR) => {
                info!(swap_id, "invoice was already paid, settled");
                self.mark_settled(swap_id).await;
                SettleStep::Done
            }
            Err(err) => {
                let attempts = {
                    let mut retries = self.settle_retries.lock().await;
                    let counter = retries.entry(swap_id.to_string()).or_insert(0);
                    *counter += 1;
                    *counter
                };

                if attempts >= MAX_SETTLE_ATTEMPTS {
                    warn!(swap_id, error = %err, "settle attempts exhausted");
                    drop(_guard);
                    if let Err(err) = self.abandon(swap_id, &err.to_string()).await {
                        error!(error = %err, "could not abandon creation");
                    }
                    return SettleStep::Done;
                }

                let delay = backoff_delay(self.cfg.settle_base_retry, attempts - 1);
                warn!(
                    swap_id,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "settle failed, scheduling retry"
                );
                SettleStep::Retry(delay)
            }
        }
    }

    async fn mark_settled(&self, swap_id: &str) {
        if let Err(err) = self
            .store
            .set_channel_creation_status(swap_id, ChannelCreationStatus::Settled)
            .await
        {
            error!(swap_id, error = %err, "could not mark creation settled");
        }
        self.settle_retries.lock().await.remove(swap_id);
    }

    async fn nursery_channel_id(&self, swap_id: &str) -> Option<u64> {
        let creation = self.load_creation(swap_id).await.ok()?;
        let funding_txid = creation.funding_txid?;
        let funding_vout = creation.funding_vout?;

        let channels = self.lightning.list_channels().await.ok()?;
        channels
            .iter()
            .find(|c| {
                c.funding_outpoint()
                    .map(|(txid, vout)| txid == funding_txid && vout == funding_vout)
                    .unwrap_or(false)
            })
            .and_then(|c| c.chan_id.parse().ok())
    }

    /// The swap finished without us: abandon anything not yet settled
    async fn resolve(&self, swap_id: &str) -> Result<(), NurseryError> {
        let creation = match self.load_creation(swap_id).await {
            Ok(creation) => creation,
            Err(NurseryError::NoChannelCreation(_)) => return Ok(()),
            Err(err) => return Err(err),
        };

        if matches!(
            creation.status,
            ChannelCreationStatus::Attempted | ChannelCreationStatus::Created
        ) {
            info!(swap_id, "abandoning channel creation, swap resolved elsewhere");
            self.store
                .set_channel_creation_status(swap_id, ChannelCreationStatus::Abandoned)
                .await?;
        }
        self.settle_retries.lock().await.remove(swap_id);
        Ok(())
    }

    async fn abandon(&self, swap_id: &str, reason: &str) -> Result<(), NurseryError> {
        self.store
            .set_channel_creation_status(swap_id, ChannelCreationStatus::Abandoned)
            .await?;
        self.settle_retries.lock().await.remove(swap_id);
        let _ = self
            .outcome_tx
            .send(NurseryOutcome::Failed {
                swap_id: swap_id.to_string(),
                reason: reason.to_string(),
            })
            .await;
        Ok(())
    }

    /// Restart sweep: channel opens that never broadcast
    pub async fn retry_opening_channels(&self) -> Result<(), NurseryError> {
        let attempted = self
            .store
            .get_channel_creations_by_status(ChannelCreationStatus::Attempted)
            .await?;

        for creation in attempted {
            let swap = self.load_swap(&creation.swap_id).await?;
            if swap.status == SwapStatus::InvoicePending && creation.funding_txid.is_none() {
                info!(swap_id = %creation.swap_id, "resuming channel open");
                if let Err(err) = self.open_for_swap(&creation.swap_id).await {
                    error!(error = %err, "channel open resume failed");
                }
            }
        }
        Ok(())
    }

    /// Restart sweep: created channels whose swap is still unsettled
    pub async fn settle_created_channels(&self) -> Result<(), NurseryError> {
        let created = self
            .store
            .get_channel_creations_by_status(ChannelCreationStatus::Created)
            .await?;

        for creation in created {
            let swap = self.load_swap(&creation.swap_id).await?;
            if swap.status != SwapStatus::TransactionClaimed {
                info!(swap_id = %creation.swap_id, "resuming channel settlement");
                self.settle(creation.swap_id).await;
            }
        }
        Ok(())
    }

    async fn load_swap(&self, swap_id: &str) -> Result<Swap, NurseryError> {
        self.store
            .get_swap(swap_id)
            .await?
            .ok_or_else(|| NurseryError::SwapNotFound(swap_id.to_string()))
    }

    async fn load_creation(&self, swap_id: &str) -> Result<ChannelCreation, NurseryError> {
        self.store
            .get_channel_creation(swap_id)
            .await?
            .ok_or_else(|| NurseryError::NoChannelCreation(swap_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lightning::mock::MockLightning;
    use crate::lightning::{ChannelPoint, PaymentResult};
    use crate::store::MemoryStore;
    use crate::swap::submarine::tests::{test_invoice, REFUND_KEY};
    use crate::types::swap::OrderSide;
    use std::time::Duration as StdDuration;

    const NODE_KEY: &str = "031234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef12";

    struct Harness {
        nursery: Arc<ChannelNursery>,
        store: Arc<MemoryStore>,
        lightning: Arc<MockLightning>,
        outcome_rx: mpsc::Receiver<NurseryOutcome>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let lightning = Arc::new(MockLightning::default());
        let (outcome_tx, outcome_rx) = mpsc::channel(16);

        let cfg = NurseryConfig {
            settle_base_retry: StdDuration::from_millis(1),
            open_retry_delay: StdDuration::from_millis(1),
            max_open_attempts: 10,
            funding_fee_buffer_sat: 10_000,
            funding_sat_per_vbyte: 2,
            peer_address_hints: vec!["127.0.0.1:9735".to_string()],
        };

        let nursery = ChannelNursery::new(
            store.clone(),
            lightning.clone(),
            Arc::new(EventBus::new(64)),
            outcome_tx,
            cfg,
        );

        Harness {
            nursery,
            store,
            lightning,
            outcome_rx,
        }
    }

    async fn seed_swap(store: &MemoryStore, preimage: &[u8; 32], status: SwapStatus) -> Swap {
        let invoice = test_invoice(preimage, 500_000_000);
        let mut swap = Swap::new(
            "BTC/BTC".to_string(),
            OrderSide::Sell,
            502_500,
            invoice,
            "ab".repeat(32),
            REFUND_KEY.to_string(),
            "02".repeat(33),
            0,
            "51".to_string(),
            "52".to_string(),
            "bcrt1pnursery".to_string(),
            800,
        );
        swap.channel_creation = true;
        swap.status = status;
        store.insert_swap(&swap).await.unwrap();

        store
            .insert_channel_creation(&ChannelCreation::new(
                swap.id.clone(),
                NODE_KEY.to_string(),
                true,
                25,
            ))
            .await
            .unwrap();

        swap
    }

    #[tokio::test]
    async fn test_open_retries_through_wallet_sync() {
        let h = harness();
        let preimage = [0x11u8; 32];
        let swap = seed_swap(&h.store, &preimage, SwapStatus::InvoicePending).await;

        // Scenario: the node refuses twice while syncing, then succeeds
        h.lightning.queue_open_channel(Err(
            "2 UNKNOWN: channels cannot be created before the wallet is fully synced",
        ));
        h.lightning.queue_open_channel(Err(
            "2 UNKNOWN: channels cannot be created before the wallet is fully synced",
        ));
        h.lightning.queue_open_channel(Ok(ChannelPoint {
            funding_txid: "f1".repeat(32),
            output_index: 0,
        }));

        h.nursery
            .handle_command(NurseryCommand::SwapEligible {
                swap_id: swap.id.clone(),
            })
            .await;

        assert_eq!(h.lightning.open_attempts(), 3);

        // Exactly one funding transaction was persisted
        let creation = h.store.get_channel_creation(&swap.id).await.unwrap().unwrap();
        assert_eq!(creation.funding_txid.as_deref(), Some("f1".repeat(32).as_str()));
        assert_eq!(creation.funding_vout, Some(0));
        assert_eq!(creation.status, ChannelCreationStatus::Attempted);

        // The swap saw exactly one channel_created transition
        let updated = h.store.get_swap(&swap.id).await.unwrap().unwrap();
        assert_eq!(updated.status, SwapStatus::ChannelCreated);

        // Running the command again does not reopen
        h.nursery
            .handle_command(NurseryCommand::SwapEligible {
                swap_id: swap.id.clone(),
            })
            .await;
        assert_eq!(h.lightning.open_attempts(), 3);
    }

    #[tokio::test]
    async fn test_open_terminal_failure_abandons() {
        let mut h = harness();
        let preimage = [0x12u8; 32];
        let swap = seed_swap(&h.store, &preimage, SwapStatus::InvoicePending).await;

        h.lightning
            .queue_open_channel(Err("2 UNKNOWN: not enough witness outputs to create funding"));

        h.nursery
            .handle_command(NurseryCommand::SwapEligible {
                swap_id: swap.id.clone(),
            })
            .await;

        let creation = h.store.get_channel_creation(&swap.id).await.unwrap().unwrap();
        assert_eq!(creation.status, ChannelCreationStatus::Abandoned);

        let outcome = h.outcome_rx.recv().await.unwrap();
        assert!(matches!(outcome, NurseryOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_peer_offline_reconnects_once() {
        let h = harness();
        let preimage = [0x13u8; 32];
        let swap = seed_swap(&h.store, &preimage, SwapStatus::InvoicePending).await;

        // Peer listed as connected so ensure_peer is a no-op, then the open
        // still reports it offline once
        h.lightning.add_peer(NODE_KEY);
        h.lightning
            .queue_open_channel(Err("peer 03123... is not online"));
        h.lightning.queue_open_channel(Ok(ChannelPoint {
            funding_txid: "f2".repeat(32),
            output_index: 1,
        }));

        h.nursery
            .handle_command(NurseryCommand::SwapEligible {
                swap_id: swap.id.clone(),
            })
            .await;

        assert_eq!(h.lightning.open_attempts(), 2);
        // One reconnect happened
        assert_eq!(h.lightning.connect_attempts(), 1);

        let creation = h.store.get_channel_creation(&swap.id).await.unwrap().unwrap();
        assert_eq!(creation.funding_vout, Some(1));
    }

    #[tokio::test]
    async fn test_channel_active_settles_invoice() {
        let mut h = harness();
        let preimage = [0x14u8; 32];
        let swap = seed_swap(&h.store, &preimage, SwapStatus::InvoicePending).await;

        h.store
            .set_channel_creation_funding(&swap.id, "f3", 0)
            .await
            .unwrap();
        h.lightning.add_channel(NODE_KEY, "f3", 0, true);
        h.lightning.queue_payment(Ok(PaymentResult {
            preimage: hex::encode(preimage),
            fee_msat: 0,
        }));

        h.nursery
            .handle_lightning_event(LightningEvent::ChannelActive {
                funding_txid: "f3".to_string(),
                funding_vout: 0,
            })
            .await;

        let creation = h.store.get_channel_creation(&swap.id).await.unwrap().unwrap();
        assert_eq!(creation.status, ChannelCreationStatus::Settled);

        let outcome = h.outcome_rx.recv().await.unwrap();
        assert_eq!(
            outcome,
            NurseryOutcome::InvoiceSettled {
                swap_id: swap.id.clone(),
                preimage: hex::encode(preimage),
            }
        );
    }

    #[tokio::test]
    async fn test_settle_idempotent_when_already_paid() {
        let h = harness();
        let preimage = [0x15u8; 32];
        let swap = seed_swap(&h.store, &preimage, SwapStatus::InvoicePending).await;
        h.store
            .set_channel_creation_status(&swap.id, ChannelCreationStatus::Created)
            .await
            .unwrap();

        // The invoice was paid elsewhere in the meantime
        h.store
            .set_swap_preimage(&swap.id, &hex::encode(preimage))
            .await
            .unwrap();

        h.nursery.settle(swap.id.clone()).await;

        // Marked settled without invoking a payment
        let creation = h.store.get_channel_creation(&swap.id).await.unwrap().unwrap();
        assert_eq!(creation.status, ChannelCreationStatus::Settled);
        assert_eq!(h.lightning.pay_attempts(), 0);
    }

    #[tokio::test]
    async fn test_settle_retry_schedule_abandons_at_four() {
        let h = harness();
        let preimage = [0x16u8; 32];
        let swap = seed_swap(&h.store, &preimage, SwapStatus::InvoicePending).await;
        h.store
            .set_channel_creation_status(&swap.id, ChannelCreationStatus::Created)
            .await
            .unwrap();

        for _ in 0..MAX_SETTLE_ATTEMPTS {
            h.lightning.queue_payment(Err("temporary channel failure"));
        }

        h.nursery.settle(swap.id.clone()).await;

        let creation = h
            .store
            .get_channel_creation(&swap.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(creation.status, ChannelCreationStatus::Abandoned);
        assert_eq!(h.lightning.pay_attempts(), MAX_SETTLE_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_swap_resolved_abandons_unsettled() {
        let h = harness();
        let preimage = [0x17u8; 32];
        let swap = seed_swap(&h.store, &preimage, SwapStatus::InvoicePending).await;

        h.nursery
            .handle_command(NurseryCommand::SwapResolved {
                swap_id: swap.id.clone(),
            })
            .await;

        let creation = h.store.get_channel_creation(&swap.id).await.unwrap().unwrap();
        assert_eq!(creation.status, ChannelCreationStatus::Abandoned);

        // Already settled creations stay settled
        let preimage2 = [0x18u8; 32];
        let swap2 = seed_swap(&h.store, &preimage2, SwapStatus::InvoicePaid).await;
        h.store
            .set_channel_creation_status(&swap2.id, ChannelCreationStatus::Settled)
            .await
            .unwrap();
        h.nursery
            .handle_command(NurseryCommand::SwapResolved {
                swap_id: swap2.id.clone(),
            })
            .await;
        assert_eq!(
            h.store
                .get_channel_creation(&swap2.id)
                .await
                .unwrap()
                .unwrap()
                .status,
            ChannelCreationStatus::Settled
        );
    }

    #[tokio::test]
    async fn test_restart_sweeps() {
        let h = harness();
        let preimage = [0x19u8; 32];

        // A creation stuck in Attempted with a pending swap reopens
        let swap = seed_swap(&h.store, &preimage, SwapStatus::InvoicePending).await;
        h.lightning.queue_open_channel(Ok(ChannelPoint {
            funding_txid: "f4".repeat(32),
            output_index: 0,
        }));

        h.nursery.retry_opening_channels().await.unwrap();
        assert_eq!(h.lightning.open_attempts(), 1);
        assert!(h
            .store
            .get_channel_creation(&swap.id)
            .await
            .unwrap()
            .unwrap()
            .funding_txid
            .is_some());

        // A created channel with an unclaimed swap re-settles
        let preimage2 = [0x1au8; 32];
        let swap2 = seed_swap(&h.store, &preimage2, SwapStatus::InvoicePending).await;
        h.store
            .set_channel_creation_status(&swap2.id, ChannelCreationStatus::Created)
            .await
            .unwrap();
        h.lightning.queue_payment(Ok(PaymentResult {
            preimage: hex::encode(preimage2),
            fee_msat: 0,
        }));

        h.nursery.settle_created_channels().await.unwrap();
        assert_eq!(
            h.store
                .get_channel_creation(&swap2.id)
                .await
                .unwrap()
                .unwrap()
                .status,
            ChannelCreationStatus::Settled
        );
    }
}
