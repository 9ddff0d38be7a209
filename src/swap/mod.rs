//! Swap Orchestration
//!
//! The submarine and reverse state machines plus the channel nursery.
//! Each manager consumes normalised chain/Lightning/timeout events and
//! drives its swaps through the status transition tables; the router in
//! this module fans the event streams out to the right manager.

pub mod nursery;
pub mod reverse;
pub mod submarine;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::chain::ChainEvent;
use crate::lightning::LightningEvent;
use crate::timeout::{TimeoutEvent, TimeoutWatcher};
use crate::types::status::SwapKind;

pub use nursery::{ChannelNursery, NurseryConfig, NurseryOutcome};
pub use reverse::{ReverseConfig, ReverseManager};
pub use submarine::{SubmarineConfig, SubmarineManager};

/// Routes event streams to the state machines.
///
/// One logical task per stream keeps ordering per source; per-swap
/// serialisation happens inside the managers through their named mutexes.
pub struct SwapRouter {
    pub submarine: Arc<SubmarineManager>,
    pub reverse: Arc<ReverseManager>,
    pub nursery: Arc<ChannelNursery>,
    pub timeouts: Arc<TimeoutWatcher>,
}

impl SwapRouter {
    /// Drive all event streams until the process exits
    pub async fn run(
        self,
        mut chain_rx: mpsc::Receiver<ChainEvent>,
        mut lightning_rx: mpsc::Receiver<LightningEvent>,
        mut timeout_rx: mpsc::Receiver<TimeoutEvent>,
        mut nursery_rx: mpsc::Receiver<NurseryOutcome>,
    ) {
        info!("swap router started");

        loop {
            tokio::select! {
                Some(event) = chain_rx.recv() => self.route_chain_event(event).await,
                Some(event) = lightning_rx.recv() => self.route_lightning_event(event).await,
                Some(event) = timeout_rx.recv() => self.route_timeout_event(event).await,
                Some(outcome) = nursery_rx.recv() => {
                    self.submarine.handle_nursery_outcome(outcome).await;
                }
                else => {
                    warn!("all event streams closed, router stopping");
                    break;
                }
            }
        }
    }

    async fn route_chain_event(&self, event: ChainEvent) {
        match &event {
            ChainEvent::BlockHeight { height } => {
                self.timeouts.on_block_height(*height).await;
            }
            ChainEvent::OutputFound { swap_id, .. }
            | ChainEvent::OutputRetracted { swap_id, .. }
            | ChainEvent::OutputEvicted { swap_id, .. }
            | ChainEvent::OutputSpent { swap_id, .. } => {
                if swap_id.starts_with("rswap_") {
                    self.reverse.handle_chain_event(event.clone()).await;
                } else {
                    self.submarine.handle_chain_event(event.clone()).await;
                }
            }
        }
    }

    async fn route_lightning_event(&self, event: LightningEvent) {
        match &event {
            LightningEvent::PeerOnline { .. } | LightningEvent::ChannelActive { .. } => {
                // The nursery is the sole consumer of peer/channel events
                self.nursery.handle_lightning_event(event.clone()).await;
            }
            LightningEvent::InvoiceAccepted { .. }
            | LightningEvent::InvoiceSettled { .. }
            | LightningEvent::InvoiceCancelled { .. } => {
                self.reverse.handle_lightning_event(event.clone()).await;
            }
        }
    }

    async fn route_timeout_event(&self, event: TimeoutEvent) {
        match event {
            TimeoutEvent::SwapExpiry { swap_id, kind } => match kind {
                SwapKind::Submarine => self.submarine.handle_expiry(&swap_id).await,
                SwapKind::Reverse => self.reverse.handle_expiry(&swap_id).await,
                SwapKind::Chain => {
                    error!(swap_id = %swap_id, "chain swap expiry without a handler");
                }
            },
            TimeoutEvent::CooperativeClaimTimeout { swap_id } => {
                self.submarine.handle_claim_timeout(&swap_id).await;
            }
        }
    }
}

/// Exponential backoff schedule: base, 2x, 4x, capped
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.min(4);
    base.saturating_mul(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        // Capped
        assert_eq!(backoff_delay(base, 10), Duration::from_secs(16));
    }
}
