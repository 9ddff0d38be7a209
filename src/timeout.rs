//! Timeout Watcher
//!
//! A clock over block height and wall time. Swaps are indexed by their
//! timeout block height; every new tip drains all due entries and hands
//! them to the expiry handlers. Wall-clock deadlines are absolute, so a
//! missed tick still fires on the next one.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::types::status::SwapKind;

/// Fired timeout
#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutEvent {
    /// The swap's timeout block height was reached
    SwapExpiry { swap_id: String, kind: SwapKind },
    /// The cooperative claim window elapsed
    CooperativeClaimTimeout { swap_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct HeightEntry {
    height: u32,
    swap_id: String,
    kind: SwapKind,
}

#[derive(Default)]
struct WatcherState {
    by_height: BinaryHeap<Reverse<HeightEntry>>,
    cancelled: HashSet<String>,
    deadlines: HashMap<String, Instant>,
}

/// Priority index of swap timeouts
pub struct TimeoutWatcher {
    sender: mpsc::Sender<TimeoutEvent>,
    state: Mutex<WatcherState>,
}

impl TimeoutWatcher {
    pub fn new(sender: mpsc::Sender<TimeoutEvent>) -> Self {
        Self {
            sender,
            state: Mutex::new(WatcherState::default()),
        }
    }

    /// Index a swap by its timeout block height
    pub async fn schedule_expiry(&self, swap_id: &str, kind: SwapKind, height: u32) {
        let mut state = self.state.lock().await;
        state.cancelled.remove(swap_id);
        state.by_height.push(Reverse(HeightEntry {
            height,
            swap_id: swap_id.to_string(),
            kind,
        }));
        debug!(swap_id, height, "scheduled expiry");
    }

    /// Arm the cooperative-claim fallback as an absolute deadline
    pub async fn schedule_claim_fallback(&self, swap_id: &str, after: Duration) {
        let mut state = self.state.lock().await;
        state.cancelled.remove(swap_id);
        state
            .deadlines
            .insert(swap_id.to_string(), Instant::now() + after);
    }

    /// Drop all pending timeouts of a swap
    pub async fn cancel(&self, swap_id: &str) {
        let mut state = self.state.lock().await;
        state.cancelled.insert(swap_id.to_string());
        state.deadlines.remove(swap_id);
    }

    /// Drain every entry due at the given height
    pub async fn on_block_height(&self, height: u64) {
        let due = {
            let mut state = self.state.lock().await;
            let mut due = Vec::new();

            while let Some(Reverse(entry)) = state.by_height.peek() {
                if entry.height as u64 > height {
                    break;
                }
                let entry = state.by_height.pop().expect("peeked entry").0;
                if !state.cancelled.remove(&entry.swap_id) {
                    due.push(entry);
                }
            }
            due
        };

        for entry in due {
            info!(swap_id = %entry.swap_id, height = entry.height, "swap timed out");
            let _ = self
                .sender
                .send(TimeoutEvent::SwapExpiry {
                    swap_id: entry.swap_id,
                    kind: entry.kind,
                })
                .await;
        }
    }

    /// Fire all wall-clock deadlines that have passed
    pub async fn poll_deadlines(&self) {
        let now = Instant::now();
        let due: Vec<String> = {
            let mut state = self.state.lock().await;
            let expired: Vec<String> = state
                .deadlines
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &expired {
                state.deadlines.remove(id);
            }
            expired
        };

        for swap_id in due {
            debug!(swap_id = %swap_id, "cooperative claim window elapsed");
            let _ = self
                .sender
                .send(TimeoutEvent::CooperativeClaimTimeout { swap_id })
                .await;
        }
    }

    /// Run the wall-clock side of the watcher
    pub async fn run(&self, tick: Duration) {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            self.poll_deadlines().await;
        }
    }
}
