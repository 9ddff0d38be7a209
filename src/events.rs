//! Event Bus
//!
//! Fan-out of swap status changes. Every successful status transition is
//! published here; WebSocket handlers subscribe per connection. Late
//! subscribers can replay the latest status of a swap, nothing older.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::status::SwapStatus;

/// A published status change
#[derive(Debug, Clone, Serialize)]
pub struct SwapUpdate {
    pub id: String,
    pub status: SwapStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Broadcast bus with latest-status replay
pub struct EventBus {
    sender: broadcast::Sender<SwapUpdate>,
    latest: RwLock<HashMap<String, SwapUpdate>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// Publish a status change to all subscribers
    pub fn publish_status(
        &self,
        id: &str,
        status: SwapStatus,
        extra: Option<serde_json::Value>,
    ) {
        let update = SwapUpdate {
            id: id.to_string(),
            status,
            extra,
        };

        self.latest
            .write()
            .unwrap()
            .insert(id.to_string(), update.clone());

        // No subscribers is fine
        let _ = self.sender.send(update);
    }

    /// Subscribe to all future updates
    pub fn subscribe(&self) -> broadcast::Receiver<SwapUpdate> {
        self.sender.subscribe()
    }

    /// Latest known status of a swap, for late subscribers
    pub fn latest(&self, id: &str) -> Option<SwapUpdate> {
        self.latest.read().unwrap().get(id).cloned()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_updates() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish_status("swap_1", SwapStatus::TransactionMempool, None);

        let u1 = rx1.recv().await.unwrap();
        let u2 = rx2.recv().await.unwrap();
        assert_eq!(u1.id, "swap_1");
        assert_eq!(u2.status, SwapStatus::TransactionMempool);
    }

    #[tokio::test]
    async fn test_late_subscriber_replays_latest_only() {
        let bus = EventBus::new(16);

        bus.publish_status("swap_1", SwapStatus::SwapCreated, None);
        bus.publish_status("swap_1", SwapStatus::TransactionMempool, None);
        bus.publish_status(
            "swap_1",
            SwapStatus::TransactionConfirmed,
            Some(serde_json::json!({"zeroConf": false})),
        );

        let latest = bus.latest("swap_1").unwrap();
        assert_eq!(latest.status, SwapStatus::TransactionConfirmed);
        assert!(latest.extra.is_some());

        assert!(bus.latest("swap_unknown").is_none());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(16);
        // Does not panic or error
        bus.publish_status("swap_1", SwapStatus::SwapExpired, None);
        assert_eq!(bus.latest("swap_1").unwrap().status, SwapStatus::SwapExpired);
    }
}
