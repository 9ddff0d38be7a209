//! Lightning Listener
//!
//! Polls the node and turns invoice, peer and channel state changes into
//! typed `LightningEvent`s. Each transition is emitted exactly once; the
//! nursery is the sole consumer of the peer/channel events.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::client::{LightningClient, LightningError};
use super::types::{InvoiceState, LightningEvent};

#[derive(Default)]
struct ListenerState {
    /// preimage hash (hex) -> last observed state
    watched_invoices: HashMap<String, InvoiceState>,
    /// peers seen online
    online_peers: HashSet<String>,
    /// funding outpoints already reported active
    active_channels: HashSet<(String, u32)>,
}

/// Invoice/peer/channel poller
pub struct LightningListener {
    client: Arc<dyn LightningClient>,
    sender: mpsc::Sender<LightningEvent>,
    state: Mutex<ListenerState>,
}

impl LightningListener {
    pub fn new(client: Arc<dyn LightningClient>, sender: mpsc::Sender<LightningEvent>) -> Self {
        Self {
            client,
            sender,
            state: Mutex::new(ListenerState::default()),
        }
    }

    /// Track an invoice by its payment hash (hex)
    pub async fn watch_invoice(&self, preimage_hash: &str) {
        let mut state = self.state.lock().await;
        state
            .watched_invoices
            .entry(preimage_hash.to_string())
            .or_insert(InvoiceState::Open);
        debug!(preimage_hash, "watching invoice");
    }

    /// Stop tracking an invoice
    pub async fn unwatch_invoice(&self, preimage_hash: &str) {
        let mut state = self.state.lock().await;
        state.watched_invoices.remove(preimage_hash);
    }

    /// Run the poll loop until the process exits
    pub async fn run(&self, poll_interval: Duration) {
        let mut interval = tokio::time::interval(poll_interval);
        info!(
            interval_secs = poll_interval.as_secs(),
            "lightning listener started"
        );

        loop {
            interval.tick().await;
            if let Err(err) = self.poll_cycle().await {
                warn!(error = %err, "lightning poll cycle failed");
            }
        }
    }

    /// Run a single poll cycle
    pub async fn poll_cycle(&self) -> Result<(), LightningError> {
        self.poll_invoices().await?;
        self.poll_peers().await?;
        self.poll_channels().await?;
        Ok(())
    }

    async fn poll_invoices(&self) -> Result<(), LightningError> {
        let watched: Vec<(String, InvoiceState)> = {
            let state = self.state.lock().await;
            state
                .watched_invoices
                .iter()
                .map(|(hash, s)| (hash.clone(), *s))
                .collect()
        };

        for (hash_hex, last_state) in watched {
            let mut hash = [0u8; 32];
            match hex::decode(&hash_hex) {
                Ok(bytes) if bytes.len() == 32 => hash.copy_from_slice(&bytes),
                _ => {
                    warn!(preimage_hash = %hash_hex, "dropping malformed watched hash");
                    self.unwatch_invoice(&hash_hex).await;
                    continue;
                }
            }

            let current = match self.client.lookup_invoice(&hash).await {
                Ok(state) => state,
                Err(LightningError::InvoiceNotFound(_)) => continue,
                Err(err) => {
                    warn!(preimage_hash = %hash_hex, error = %err, "invoice lookup failed");
                    continue;
                }
            };

            if current == last_state {
                continue;
            }

            {
                let mut state = self.state.lock().await;
                state.watched_invoices.insert(hash_hex.clone(), current);
            }

            let event = match current {
                InvoiceState::Accepted => Some(LightningEvent::InvoiceAccepted {
                    preimage_hash: hash_hex.clone(),
                }),
                InvoiceState::Settled => Some(LightningEvent::InvoiceSettled {
                    preimage_hash: hash_hex.clone(),
                }),
                InvoiceState::Cancelled => Some(LightningEvent::InvoiceCancelled {
                    preimage_hash: hash_hex.clone(),
                }),
                InvoiceState::Open => None,
            };

            if let Some(event) = event {
                // Terminal invoice states end the watch
                if matches!(
                    current,
                    InvoiceState::Settled | InvoiceState::Cancelled
                ) {
                    self.unwatch_invoice(&hash_hex).await;
                }
                self.emit(event).await;
            }
        }

        Ok(())
    }

    async fn poll_peers(&self) -> Result<(), LightningError> {
        let peers = self.client.list_peers().await?;
        let mut events = Vec::new();

        {
            let mut state = self.state.lock().await;
            let current: HashSet<String> =
                peers.into_iter().map(|p| p.public_key).collect();

            for public_key in current.difference(&state.online_peers) {
                events.push(LightningEvent::PeerOnline {
                    public_key: public_key.clone(),
                });
            }

            state.online_peers = current;
        }

        for event in events {
            self.emit(event).await;
        }

        Ok(())
    }

    async fn poll_channels(&self) -> Result<(), LightningError> {
        let channels = self.client.list_channels().await?;
        let mut events = Vec::new();

        {
            let mut state = self.state.lock().await;
            for channel in channels.iter().filter(|c| c.active) {
                let Some(outpoint) = channel.funding_outpoint() else {
                    continue;
                };
                if state.active_channels.insert(outpoint.clone()) {
                    events.push(LightningEvent::ChannelActive {
                        funding_txid: outpoint.0,
                        funding_vout: outpoint.1,
                    });
                }
            }
        }

        for event in events {
            self.emit(event).await;
        }

        Ok(())
    }

    async fn emit(&self, event: LightningEvent) {
        if self.sender.send(event).await.is_err() {
            warn!("lightning event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lightning::mock::MockLightning;

    fn drain(rx: &mut mpsc::Receiver<LightningEvent>) -> Vec<LightningEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_invoice_transitions_emitted_once() {
        let client = Arc::new(MockLightning::default());
        let (tx, mut rx) = mpsc::channel(16);
        let listener = LightningListener::new(client.clone(), tx);

        let hash_hex = "11".repeat(32);
        listener.watch_invoice(&hash_hex).await;
        client.set_invoice_state(&hash_hex, InvoiceState::Open);

        listener.poll_cycle().await.unwrap();
        assert!(drain(&mut rx).is_empty());

        client.set_invoice_state(&hash_hex, InvoiceState::Accepted);
        listener.poll_cycle().await.unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![LightningEvent::InvoiceAccepted {
                preimage_hash: hash_hex.clone()
            }]
        );

        // No duplicate on the next cycle
        listener.poll_cycle().await.unwrap();
        assert!(drain(&mut rx).is_empty());

        client.set_invoice_state(&hash_hex, InvoiceState::Settled);
        listener.poll_cycle().await.unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![LightningEvent::InvoiceSettled {
                preimage_hash: hash_hex.clone()
            }]
        );

        // Settled ends the watch
        listener.poll_cycle().await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_peer_and_channel_events() {
        let client = Arc::new(MockLightning::default());
        let (tx, mut rx) = mpsc::channel(16);
        let listener = LightningListener::new(client.clone(), tx);

        client.add_peer("02aa");
        listener.poll_cycle().await.unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![LightningEvent::PeerOnline {
                public_key: "02aa".to_string()
            }]
        );

        client.add_channel("02aa", "ftxid", 0, true);
        listener.poll_cycle().await.unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![LightningEvent::ChannelActive {
                funding_txid: "ftxid".to_string(),
                funding_vout: 0
            }]
        );

        // Stable state emits nothing
        listener.poll_cycle().await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }
}
