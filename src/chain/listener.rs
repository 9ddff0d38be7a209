//! Chain Listener
//!
//! Watches swap lockup addresses and outpoints and turns raw chain state
//! into normalised `ChainEvent`s. Duplicate sightings are suppressed keyed
//! by (txid, vout, confirmed); a reorg that unconfirms a lockup produces
//! `OutputRetracted` so the state machines can roll back.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::esplora::{ChainBackend, ChainError, Utxo};

/// Standard output types accepted for zero-conf lockups
const STANDARD_SCRIPT_TYPES: [&str; 5] =
    ["p2pkh", "p2sh", "v0_p2wpkh", "v0_p2wsh", "v1_p2tr"];

/// BIP125: a transaction signals replaceability when any input sequence is
/// below 0xfffffffe
const RBF_SEQUENCE_THRESHOLD: u32 = 0xffff_fffe;

/// Normalised chain event for the state machines
#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    /// A watched script received an output
    OutputFound {
        swap_id: String,
        txid: String,
        vout: u32,
        amount: u64,
        confirmed: bool,
    },
    /// A previously confirmed output became unconfirmed again (reorg)
    OutputRetracted {
        swap_id: String,
        txid: String,
        vout: u32,
    },
    /// A mempool output vanished and stayed gone past the grace period
    OutputEvicted {
        swap_id: String,
        txid: String,
        vout: u32,
    },
    /// A watched outpoint was spent; carries the spender's input witness
    OutputSpent {
        swap_id: String,
        spending_txid: String,
        witness: Vec<Vec<u8>>,
    },
    /// New chain tip
    BlockHeight { height: u64 },
}

/// Reasons a lockup cannot be accepted unconfirmed
#[derive(Debug, Clone, PartialEq)]
pub enum ZeroConfRejection {
    RbfSignaling,
    UnconfirmedAncestor { txid: String },
    FeeTooLow { sat_per_vbyte: f64, min: f64 },
    NonStandardInput { script_type: String },
}

impl std::fmt::Display for ZeroConfRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RbfSignaling => write!(f, "transaction signals RBF"),
            Self::UnconfirmedAncestor { txid } => {
                write!(f, "unconfirmed ancestor {}", txid)
            }
            Self::FeeTooLow { sat_per_vbyte, min } => {
                write!(f, "feerate {:.2} sat/vB below minimum {:.2}", sat_per_vbyte, min)
            }
            Self::NonStandardInput { script_type } => {
                write!(f, "non-standard input type {}", script_type)
            }
        }
    }
}

#[derive(Debug)]
struct TrackedOutput {
    swap_id: String,
    confirmed: bool,
    last_seen: Instant,
}

#[derive(Default)]
struct ListenerState {
    /// lockup address -> swap id
    watched_addresses: HashMap<String, String>,
    /// (txid, vout) -> swap id, for spend detection
    watched_outpoints: HashMap<(String, u32), String>,
    /// duplicate suppression, keyed (txid, vout, confirmed)
    seen: HashSet<(String, u32, bool)>,
    /// outputs currently tracked per (txid, vout)
    tracked: HashMap<(String, u32), TrackedOutput>,
    last_height: u64,
}

/// Address and outpoint watcher over a chain backend
pub struct ChainListener {
    backend: Arc<dyn ChainBackend>,
    sender: mpsc::Sender<ChainEvent>,
    eviction_grace: Duration,
    state: Mutex<ListenerState>,
}

impl ChainListener {
    pub fn new(
        backend: Arc<dyn ChainBackend>,
        sender: mpsc::Sender<ChainEvent>,
        eviction_grace: Duration,
    ) -> Self {
        Self {
            backend,
            sender,
            eviction_grace,
            state: Mutex::new(ListenerState::default()),
        }
    }

    /// Start watching a lockup address for a swap
    pub async fn watch_address(&self, swap_id: &str, address: &str) {
        let mut state = self.state.lock().await;
        state
            .watched_addresses
            .insert(address.to_string(), swap_id.to_string());
        debug!(swap_id, address, "watching lockup address");
    }

    /// Stop watching a lockup address
    pub async fn unwatch_address(&self, address: &str) {
        let mut state = self.state.lock().await;
        state.watched_addresses.remove(address);
    }

    /// Start watching an outpoint for a spend (reverse swap claims)
    pub async fn watch_outpoint(&self, swap_id: &str, txid: &str, vout: u32) {
        let mut state = self.state.lock().await;
        state
            .watched_outpoints
            .insert((txid.to_string(), vout), swap_id.to_string());
        debug!(swap_id, txid, vout, "watching outpoint for spend");
    }

    /// Run the poll loop until the process exits
    pub async fn run(&self, poll_interval: Duration) {
        let mut interval = tokio::time::interval(poll_interval);
        info!(interval_secs = poll_interval.as_secs(), "chain listener started");

        loop {
            interval.tick().await;
            if let Err(err) = self.poll_cycle().await {
                warn!(error = %err, "chain poll cycle failed");
            }
        }
    }

    /// Run a single poll cycle
    pub async fn poll_cycle(&self) -> Result<(), ChainError> {
        self.poll_height().await?;
        self.poll_addresses().await?;
        self.poll_evictions().await?;
        self.poll_outpoints().await?;
        Ok(())
    }

    async fn poll_height(&self) -> Result<(), ChainError> {
        let height = self.backend.tip_height().await?;
        let mut state = self.state.lock().await;
        if height != state.last_height {
            state.last_height = height;
            drop(state);
            self.emit(ChainEvent::BlockHeight { height }).await;
        }
        Ok(())
    }

    async fn poll_addresses(&self) -> Result<(), ChainError> {
        let watched: Vec<(String, String)> = {
            let state = self.state.lock().await;
            state
                .watched_addresses
                .iter()
                .map(|(addr, id)| (addr.clone(), id.clone()))
                .collect()
        };

        for (address, swap_id) in watched {
            let utxos = match self.backend.address_utxos(&address).await {
                Ok(utxos) => utxos,
                Err(err) => {
                    warn!(address = %address, error = %err, "address lookup failed");
                    continue;
                }
            };

            for utxo in utxos {
                self.process_output(&swap_id, &utxo).await;
            }
        }

        Ok(())
    }

    async fn process_output(&self, swap_id: &str, utxo: &Utxo) {
        let key = (utxo.txid.clone(), utxo.vout);
        let mut events = Vec::new();

        {
            let mut state = self.state.lock().await;

            let was_confirmed = state
                .tracked
                .get(&key)
                .map(|t| t.confirmed)
                .unwrap_or(false);

            if was_confirmed && !utxo.confirmed {
                // Reorg rolled the lockup back into the mempool; allow a
                // later re-confirmation to emit again
                state.seen.remove(&(key.0.clone(), key.1, true));
                events.push(ChainEvent::OutputRetracted {
                    swap_id: swap_id.to_string(),
                    txid: utxo.txid.clone(),
                    vout: utxo.vout,
                });
            }

            if utxo.confirmed {
                // Deliver mempool before confirmed even when the first
                // sighting is already in a block
                if state.seen.insert((key.0.clone(), key.1, false)) {
                    events.push(ChainEvent::OutputFound {
                        swap_id: swap_id.to_string(),
                        txid: utxo.txid.clone(),
                        vout: utxo.vout,
                        amount: utxo.value,
                        confirmed: false,
                    });
                }
                if state.seen.insert((key.0.clone(), key.1, true)) {
                    events.push(ChainEvent::OutputFound {
                        swap_id: swap_id.to_string(),
                        txid: utxo.txid.clone(),
                        vout: utxo.vout,
                        amount: utxo.value,
                        confirmed: true,
                    });
                }
            } else if state.seen.insert((key.0.clone(), key.1, false)) {
                events.push(ChainEvent::OutputFound {
                    swap_id: swap_id.to_string(),
                    txid: utxo.txid.clone(),
                    vout: utxo.vout,
                    amount: utxo.value,
                    confirmed: false,
                });
            }

            state.tracked.insert(
                key,
                TrackedOutput {
                    swap_id: swap_id.to_string(),
                    confirmed: utxo.confirmed,
                    last_seen: Instant::now(),
                },
            );
        }

        for event in events {
            self.emit(event).await;
        }
    }

    /// Check mempool outputs that stopped showing up; evict after the grace
    /// period when the backing transaction is gone entirely
    async fn poll_evictions(&self) -> Result<(), ChainError> {
        let stale: Vec<((String, u32), String)> = {
            let state = self.state.lock().await;
            state
                .tracked
                .iter()
                .filter(|(_, t)| !t.confirmed)
                .map(|(key, t)| (key.clone(), t.swap_id.clone()))
                .collect()
        };

        for ((txid, vout), swap_id) in stale {
            match self.backend.tx_status(&txid).await {
                Ok(status) if status.confirmed => {
                    // Listing lag; the regular address poll will pick it up
                }
                Ok(_) => {
                    // Still in the mempool
                    let mut state = self.state.lock().await;
                    if let Some(t) = state.tracked.get_mut(&(txid.clone(), vout)) {
                        t.last_seen = Instant::now();
                    }
                }
                Err(ChainError::TxNotFound(_)) => {
                    let expired = {
                        let state = self.state.lock().await;
                        state
                            .tracked
                            .get(&(txid.clone(), vout))
                            .map(|t| t.last_seen.elapsed() >= self.eviction_grace)
                            .unwrap_or(false)
                    };

                    if expired {
                        let mut state = self.state.lock().await;
                        state.tracked.remove(&(txid.clone(), vout));
                        state.seen.remove(&(txid.clone(), vout, false));
                        drop(state);
                        warn!(swap_id = %swap_id, txid = %txid, "mempool lockup evicted");
                        self.emit(ChainEvent::OutputEvicted {
                            swap_id,
                            txid,
                            vout,
                        })
                        .await;
                    }
                }
                Err(err) => {
                    warn!(txid = %txid, error = %err, "eviction check failed");
                }
            }
        }

        Ok(())
    }

    async fn poll_outpoints(&self) -> Result<(), ChainError> {
        let watched: Vec<((String, u32), String)> = {
            let state = self.state.lock().await;
            state
                .watched_outpoints
                .iter()
                .map(|(k, id)| (k.clone(), id.clone()))
                .collect()
        };

        for ((txid, vout), swap_id) in watched {
            let outspend = match self.backend.outspend(&txid, vout).await {
                Ok(outspend) => outspend,
                Err(err) => {
                    debug!(txid = %txid, vout, error = %err, "outspend lookup failed");
                    continue;
                }
            };

            let Some(spending_txid) = outspend.txid.filter(|_| outspend.spent) else {
                continue;
            };

            let spending_tx = match self.backend.tx(&spending_txid).await {
                Ok(tx) => tx,
                Err(err) => {
                    warn!(txid = %spending_txid, error = %err, "spending tx fetch failed");
                    continue;
                }
            };

            let witness = spending_tx
                .vin
                .iter()
                .find(|vin| vin.txid == txid && vin.vout == vout)
                .and_then(|vin| vin.witness.as_ref())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| hex::decode(item).ok())
                        .collect()
                })
                .unwrap_or_default();

            {
                let mut state = self.state.lock().await;
                state.watched_outpoints.remove(&(txid.clone(), vout));
            }

            info!(swap_id = %swap_id, spender = %spending_txid, "watched outpoint spent");
            self.emit(ChainEvent::OutputSpent {
                swap_id,
                spending_txid,
                witness,
            })
            .await;
        }

        Ok(())
    }

    /// Assess whether a lockup transaction qualifies for zero-conf
    /// acceptance; `None` means no objection.
    pub async fn check_zero_conf(
        &self,
        txid: &str,
        min_feerate: f64,
    ) -> Result<Option<ZeroConfRejection>, ChainError> {
        let tx = self.backend.tx(txid).await?;

        for vin in &tx.vin {
            if vin.sequence < RBF_SEQUENCE_THRESHOLD {
                return Ok(Some(ZeroConfRejection::RbfSignaling));
            }

            if let Some(prevout) = &vin.prevout {
                if !STANDARD_SCRIPT_TYPES.contains(&prevout.scriptpubkey_type.as_str()) {
                    return Ok(Some(ZeroConfRejection::NonStandardInput {
                        script_type: prevout.scriptpubkey_type.clone(),
                    }));
                }
            }

            let ancestor = self.backend.tx_status(&vin.txid).await?;
            if !ancestor.confirmed {
                return Ok(Some(ZeroConfRejection::UnconfirmedAncestor {
                    txid: vin.txid.clone(),
                }));
            }
        }

        let vsize = (tx.weight as f64 / 4.0).ceil();
        let sat_per_vbyte = tx.fee as f64 / vsize;
        if sat_per_vbyte < min_feerate {
            return Ok(Some(ZeroConfRejection::FeeTooLow {
                sat_per_vbyte,
                min: min_feerate,
            }));
        }

        Ok(None)
    }

    async fn emit(&self, event: ChainEvent) {
        if self.sender.send(event).await.is_err() {
            warn!("chain event receiver dropped");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::esplora::{EsploraTx, EsploraTxInput, EsploraTxOutput, Outspend, TxStatus};
    use std::sync::Mutex as StdMutex;

    /// In-memory chain backend for listener tests
    #[derive(Default)]
    pub(crate) struct MockBackend {
        pub height: StdMutex<u64>,
        pub utxos: StdMutex<HashMap<String, Vec<Utxo>>>,
        pub statuses: StdMutex<HashMap<String, TxStatus>>,
        pub txs: StdMutex<HashMap<String, EsploraTx>>,
        pub outspends: StdMutex<HashMap<(String, u32), Outspend>>,
    }

    #[async_trait::async_trait]
    impl ChainBackend for MockBackend {
        async fn tip_height(&self) -> Result<u64, ChainError> {
            Ok(*self.height.lock().unwrap())
        }

        async fn address_utxos(&self, address: &str) -> Result<Vec<Utxo>, ChainError> {
            Ok(self
                .utxos
                .lock()
                .unwrap()
                .get(address)
                .cloned()
                .unwrap_or_default())
        }

        async fn tx_status(&self, txid: &str) -> Result<TxStatus, ChainError> {
            self.statuses
                .lock()
                .unwrap()
                .get(txid)
                .cloned()
                .ok_or_else(|| ChainError::TxNotFound(txid.to_string()))
        }

        async fn tx(&self, txid: &str) -> Result<EsploraTx, ChainError> {
            self.txs
                .lock()
                .unwrap()
                .get(txid)
                .cloned()
                .ok_or_else(|| ChainError::TxNotFound(txid.to_string()))
        }

        async fn tx_hex(&self, _txid: &str) -> Result<String, ChainError> {
            Ok("00".to_string())
        }

        async fn outspend(&self, txid: &str, vout: u32) -> Result<Outspend, ChainError> {
            Ok(self
                .outspends
                .lock()
                .unwrap()
                .get(&(txid.to_string(), vout))
                .cloned()
                .unwrap_or(Outspend {
                    spent: false,
                    txid: None,
                    vin: None,
                }))
        }

        async fn estimate_fee_per_vbyte(&self, _target: u16) -> Result<f64, ChainError> {
            Ok(2.0)
        }

        async fn broadcast(&self, _tx_hex: &str) -> Result<String, ChainError> {
            Ok("broadcast_txid".to_string())
        }
    }

    fn utxo(txid: &str, vout: u32, value: u64, confirmed: bool) -> Utxo {
        Utxo {
            txid: txid.to_string(),
            vout,
            value,
            block_height: confirmed.then_some(100),
            confirmed,
        }
    }

    fn listener_with(
        backend: Arc<MockBackend>,
        grace: Duration,
    ) -> (ChainListener, mpsc::Receiver<ChainEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (ChainListener::new(backend, tx, grace), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ChainEvent>) -> Vec<ChainEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_mempool_then_confirmed() {
        let backend = Arc::new(MockBackend::default());
        let (listener, mut rx) = listener_with(backend.clone(), Duration::from_secs(60));

        listener.watch_address("swap_1", "addr1").await;
        backend
            .utxos
            .lock()
            .unwrap()
            .insert("addr1".to_string(), vec![utxo("tx1", 0, 1_000_000, false)]);
        backend.statuses.lock().unwrap().insert(
            "tx1".to_string(),
            TxStatus {
                confirmed: false,
                block_height: None,
                block_hash: None,
            },
        );

        listener.poll_cycle().await.unwrap();
        let events = drain(&mut rx);
        assert!(events.contains(&ChainEvent::OutputFound {
            swap_id: "swap_1".to_string(),
            txid: "tx1".to_string(),
            vout: 0,
            amount: 1_000_000,
            confirmed: false,
        }));

        // Second cycle with the same state emits nothing new
        listener.poll_cycle().await.unwrap();
        assert!(drain(&mut rx).is_empty());

        // Confirmation emits exactly once
        backend
            .utxos
            .lock()
            .unwrap()
            .insert("addr1".to_string(), vec![utxo("tx1", 0, 1_000_000, true)]);
        listener.poll_cycle().await.unwrap();
        let events = drain(&mut rx);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ChainEvent::OutputFound { confirmed: true, .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_first_sighting_confirmed_emits_mempool_first() {
        let backend = Arc::new(MockBackend::default());
        let (listener, mut rx) = listener_with(backend.clone(), Duration::from_secs(60));

        listener.watch_address("swap_1", "addr1").await;
        backend
            .utxos
            .lock()
            .unwrap()
            .insert("addr1".to_string(), vec![utxo("tx1", 0, 500_000, true)]);

        listener.poll_cycle().await.unwrap();
        let events: Vec<bool> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ChainEvent::OutputFound { confirmed, .. } => Some(confirmed),
                _ => None,
            })
            .collect();
        assert_eq!(events, vec![false, true]);
    }

    #[tokio::test]
    async fn test_reorg_retracts_and_allows_reconfirm() {
        let backend = Arc::new(MockBackend::default());
        let (listener, mut rx) = listener_with(backend.clone(), Duration::from_secs(60));

        listener.watch_address("swap_1", "addr1").await;
        backend
            .utxos
            .lock()
            .unwrap()
            .insert("addr1".to_string(), vec![utxo("tx1", 0, 500_000, true)]);
        listener.poll_cycle().await.unwrap();
        drain(&mut rx);

        // Reorg: back to the mempool
        backend
            .utxos
            .lock()
            .unwrap()
            .insert("addr1".to_string(), vec![utxo("tx1", 0, 500_000, false)]);
        backend.statuses.lock().unwrap().insert(
            "tx1".to_string(),
            TxStatus {
                confirmed: false,
                block_height: None,
                block_hash: None,
            },
        );
        listener.poll_cycle().await.unwrap();
        let events = drain(&mut rx);
        assert!(events.contains(&ChainEvent::OutputRetracted {
            swap_id: "swap_1".to_string(),
            txid: "tx1".to_string(),
            vout: 0,
        }));

        // Re-confirmation is delivered again
        backend
            .utxos
            .lock()
            .unwrap()
            .insert("addr1".to_string(), vec![utxo("tx1", 0, 500_000, true)]);
        listener.poll_cycle().await.unwrap();
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ChainEvent::OutputFound { confirmed: true, .. })));
    }

    #[tokio::test]
    async fn test_eviction_after_grace() {
        let backend = Arc::new(MockBackend::default());
        let (listener, mut rx) = listener_with(backend.clone(), Duration::from_millis(0));

        listener.watch_address("swap_1", "addr1").await;
        backend
            .utxos
            .lock()
            .unwrap()
            .insert("addr1".to_string(), vec![utxo("tx1", 0, 500_000, false)]);
        backend.statuses.lock().unwrap().insert(
            "tx1".to_string(),
            TxStatus {
                confirmed: false,
                block_height: None,
                block_hash: None,
            },
        );
        listener.poll_cycle().await.unwrap();
        drain(&mut rx);

        // Transaction vanishes entirely (no status entry -> TxNotFound)
        backend.utxos.lock().unwrap().insert("addr1".to_string(), vec![]);
        backend.statuses.lock().unwrap().remove("tx1");
        listener.poll_cycle().await.unwrap();
        let events = drain(&mut rx);
        assert!(events.contains(&ChainEvent::OutputEvicted {
            swap_id: "swap_1".to_string(),
            txid: "tx1".to_string(),
            vout: 0,
        }));
    }

    #[tokio::test]
    async fn test_spend_detection_carries_witness() {
        let backend = Arc::new(MockBackend::default());
        let (listener, mut rx) = listener_with(backend.clone(), Duration::from_secs(60));

        listener.watch_outpoint("rswap_1", "lockup_tx", 0).await;
        backend.outspends.lock().unwrap().insert(
            ("lockup_tx".to_string(), 0),
            Outspend {
                spent: true,
                txid: Some("claim_tx".to_string()),
                vin: Some(0),
            },
        );
        backend.txs.lock().unwrap().insert(
            "claim_tx".to_string(),
            EsploraTx {
                txid: "claim_tx".to_string(),
                version: 2,
                locktime: 0,
                vin: vec![EsploraTxInput {
                    txid: "lockup_tx".to_string(),
                    vout: 0,
                    prevout: None,
                    witness: Some(vec!["ab".repeat(32), "cd".to_string()]),
                    is_coinbase: false,
                    sequence: 0xffffffff,
                }],
                vout: vec![],
                size: 150,
                weight: 600,
                fee: 300,
                status: TxStatus {
                    confirmed: false,
                    block_height: None,
                    block_hash: None,
                },
            },
        );

        listener.poll_cycle().await.unwrap();
        let events = drain(&mut rx);
        let spent = events
            .iter()
            .find_map(|e| match e {
                ChainEvent::OutputSpent {
                    swap_id,
                    spending_txid,
                    witness,
                } => Some((swap_id.clone(), spending_txid.clone(), witness.clone())),
                _ => None,
            })
            .expect("spend event");
        assert_eq!(spent.0, "rswap_1");
        assert_eq!(spent.1, "claim_tx");
        assert_eq!(spent.2.len(), 2);
        assert_eq!(spent.2[0].len(), 32);

        // One-shot: the outpoint is no longer watched
        listener.poll_cycle().await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    fn zero_conf_tx(sequence: u32, fee: u64, prevout_type: &str) -> EsploraTx {
        EsploraTx {
            txid: "zc_tx".to_string(),
            version: 2,
            locktime: 0,
            vin: vec![EsploraTxInput {
                txid: "parent".to_string(),
                vout: 0,
                prevout: Some(EsploraTxOutput {
                    scriptpubkey: "51".to_string(),
                    scriptpubkey_type: prevout_type.to_string(),
                    scriptpubkey_address: None,
                    value: 2_000_000,
                }),
                witness: None,
                is_coinbase: false,
                sequence,
            }],
            vout: vec![],
            size: 150,
            weight: 600,
            fee,
            status: TxStatus {
                confirmed: false,
                block_height: None,
                block_hash: None,
            },
        }
    }

    #[tokio::test]
    async fn test_zero_conf_checks() {
        let backend = Arc::new(MockBackend::default());
        let (listener, _rx) = listener_with(backend.clone(), Duration::from_secs(60));

        backend.statuses.lock().unwrap().insert(
            "parent".to_string(),
            TxStatus {
                confirmed: true,
                block_height: Some(99),
                block_hash: None,
            },
        );

        // RBF signalling
        backend
            .txs
            .lock()
            .unwrap()
            .insert("zc_tx".to_string(), zero_conf_tx(0xfffffffd, 600, "v1_p2tr"));
        assert_eq!(
            listener.check_zero_conf("zc_tx", 2.0).await.unwrap(),
            Some(ZeroConfRejection::RbfSignaling)
        );

        // Fee too low: 600 weight = 150 vbytes, 100 sat fee -> 0.67 sat/vB
        backend
            .txs
            .lock()
            .unwrap()
            .insert("zc_tx".to_string(), zero_conf_tx(0xffffffff, 100, "v1_p2tr"));
        assert!(matches!(
            listener.check_zero_conf("zc_tx", 2.0).await.unwrap(),
            Some(ZeroConfRejection::FeeTooLow { .. })
        ));

        // Non-standard input
        backend
            .txs
            .lock()
            .unwrap()
            .insert("zc_tx".to_string(), zero_conf_tx(0xffffffff, 600, "op_return"));
        assert!(matches!(
            listener.check_zero_conf("zc_tx", 2.0).await.unwrap(),
            Some(ZeroConfRejection::NonStandardInput { .. })
        ));

        // Unconfirmed ancestor
        backend.statuses.lock().unwrap().insert(
            "parent".to_string(),
            TxStatus {
                confirmed: false,
                block_height: None,
                block_hash: None,
            },
        );
        backend
            .txs
            .lock()
            .unwrap()
            .insert("zc_tx".to_string(), zero_conf_tx(0xffffffff, 600, "v1_p2tr"));
        assert!(matches!(
            listener.check_zero_conf("zc_tx", 2.0).await.unwrap(),
            Some(ZeroConfRejection::UnconfirmedAncestor { .. })
        ));

        // All clear
        backend.statuses.lock().unwrap().insert(
            "parent".to_string(),
            TxStatus {
                confirmed: true,
                block_height: Some(99),
                block_hash: None,
            },
        );
        assert_eq!(listener.check_zero_conf("zc_tx", 2.0).await.unwrap(), None);
    }
}
