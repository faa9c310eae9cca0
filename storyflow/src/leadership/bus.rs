//! Pub/sub bus shared by the tabs that open one save.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 64;

/// A tab's claim on a save. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabClaim {
    /// The claiming tab.
    pub tab_id: String,
    /// Wall-clock time of the claim.
    pub claimed_at: DateTime<Utc>,
    /// Bus-assigned position; a higher sequence is a newer claim.
    pub sequence: u64,
}

impl TabClaim {
    /// Returns true if `self` was claimed after `other`.
    #[must_use]
    pub fn supersedes(&self, other: &Self) -> bool {
        self.sequence > other.sequence
    }
}

/// Messages exchanged on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    /// A joining tab announces its claim and asks the others for theirs.
    ClaimCheck {
        /// The joining tab's claim.
        claim: TabClaim,
    },
    /// An unblocked tab answers a claim check.
    Claim {
        /// The answering tab's claim.
        claim: TabClaim,
    },
}

impl BusMessage {
    /// The claim carried by the message.
    #[must_use]
    pub fn claim(&self) -> &TabClaim {
        match self {
            Self::ClaimCheck { claim } | Self::Claim { claim } => claim,
        }
    }
}

#[derive(Debug)]
struct BusInner {
    save_id: String,
    sender: broadcast::Sender<BusMessage>,
    sequence: AtomicU64,
}

/// The bus of one save. Claims it hands out are totally ordered.
#[derive(Debug, Clone)]
pub struct TabBus {
    inner: Arc<BusInner>,
}

impl TabBus {
    /// Creates a bus for `save_id`.
    #[must_use]
    pub fn new(save_id: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                save_id: save_id.into(),
                sender,
                sequence: AtomicU64::new(0),
            }),
        }
    }

    /// The save this bus is scoped to.
    #[must_use]
    pub fn save_id(&self) -> &str {
        &self.inner.save_id
    }

    /// Issues a claim for `tab_id` with the next sequence number.
    #[must_use]
    pub fn claim(&self, tab_id: impl Into<String>) -> TabClaim {
        TabClaim {
            tab_id: tab_id.into(),
            claimed_at: Utc::now(),
            sequence: self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    /// Publishes a message to every subscriber. Returns the number reached.
    pub fn publish(&self, message: BusMessage) -> usize {
        self.inner.sender.send(message).unwrap_or(0)
    }

    /// Subscribes to messages published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.inner.sender.subscribe()
    }
}

/// Hands out one bus per save.
#[derive(Debug, Default)]
pub struct BusHub {
    buses: DashMap<String, TabBus>,
}

impl BusHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bus of `save_id`, creating it on first use.
    #[must_use]
    pub fn bus(&self, save_id: &str) -> TabBus {
        self.buses
            .entry(save_id.to_string())
            .or_insert_with(|| TabBus::new(save_id))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_are_ordered() {
        let bus = TabBus::new("save-1");
        let first = bus.claim("tab-a");
        let second = bus.claim("tab-b");

        assert!(second.supersedes(&first));
        assert!(!first.supersedes(&second));
    }

    #[test]
    fn test_hub_scopes_buses_per_save() {
        let hub = BusHub::new();
        let a = hub.bus("save-1");
        let b = hub.bus("save-1");
        let other = hub.bus("save-2");

        let _ = a.claim("tab-a");
        assert_eq!(b.claim("tab-b").sequence, 2);
        assert_eq!(other.claim("tab-c").sequence, 1);
        assert_eq!(other.save_id(), "save-2");
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = TabBus::new("save-1");
        assert_eq!(bus.publish(BusMessage::Claim { claim: bus.claim("a") }), 0);

        let mut rx = bus.subscribe();
        let claim = bus.claim("b");
        bus.publish(BusMessage::ClaimCheck { claim: claim.clone() });

        assert_eq!(rx.recv().await.unwrap().claim(), &claim);
    }
}
