//! Tab leadership.
//!
//! Every tab that opens a save joins the save's bus with a claim. The newest
//! claim wins: a tab that observes a foreign claim ordered after its own
//! concedes and stays blocked for the rest of its life, so of any set of
//! tabs exactly one remains the leader. Nothing is persisted.

mod bus;

pub use bus::{BusHub, BusMessage, TabBus, TabClaim};

use crate::errors::LeadershipConflict;
use crate::events::{self, EventSink};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Whether this tab may write to the save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LeadershipState {
    /// This tab holds the save.
    Leader,
    /// Another tab holds the save.
    Blocked {
        /// The tab that superseded this one.
        holder: String,
    },
}

impl LeadershipState {
    /// Returns true for [`LeadershipState::Leader`].
    #[must_use]
    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Leader)
    }
}

/// Live leadership negotiation for one tab.
///
/// Dropping the monitor stops its listener.
#[derive(Debug)]
pub struct LeadershipMonitor {
    claim: TabClaim,
    state: watch::Receiver<LeadershipState>,
    listener: JoinHandle<()>,
}

impl LeadershipMonitor {
    /// Joins the bus and announces this tab's claim.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn join(bus: &TabBus, tab_id: impl Into<String>, events: Arc<dyn EventSink>) -> Self {
        let claim = bus.claim(tab_id);
        let receiver = bus.subscribe();
        let (state_tx, state) = watch::channel(LeadershipState::Leader);

        let listener = tokio::spawn(listen(
            bus.clone(),
            claim.clone(),
            receiver,
            state_tx,
            events,
        ));

        info!(tab = %claim.tab_id, sequence = claim.sequence, save = bus.save_id(), "Joined save bus");
        bus.publish(BusMessage::ClaimCheck {
            claim: claim.clone(),
        });

        Self {
            claim,
            state,
            listener,
        }
    }

    /// This tab's claim.
    #[must_use]
    pub fn claim(&self) -> &TabClaim {
        &self.claim
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> LeadershipState {
        self.state.borrow().clone()
    }

    /// Returns true while this tab is the leader.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.state.borrow().is_leader()
    }

    /// Fails with the holder once this tab is blocked.
    ///
    /// # Errors
    ///
    /// Returns [`LeadershipConflict`] when another tab holds the save.
    pub fn check(&self) -> Result<(), LeadershipConflict> {
        match &*self.state.borrow() {
            LeadershipState::Leader => Ok(()),
            LeadershipState::Blocked { holder } => Err(LeadershipConflict::new(holder.clone())),
        }
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LeadershipState> {
        self.state.clone()
    }
}

impl Drop for LeadershipMonitor {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn listen(
    bus: TabBus,
    own: TabClaim,
    mut receiver: broadcast::Receiver<BusMessage>,
    state: watch::Sender<LeadershipState>,
    events: Arc<dyn EventSink>,
) {
    loop {
        let message = match receiver.recv().await {
            Ok(message) => message,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(tab = %own.tab_id, skipped, "Leadership listener lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        let foreign = message.claim();
        if foreign.tab_id == own.tab_id {
            continue;
        }

        if foreign.supersedes(&own) {
            if state.borrow().is_leader() {
                info!(tab = %own.tab_id, holder = %foreign.tab_id, "Conceding leadership");
                state.send_replace(LeadershipState::Blocked {
                    holder: foreign.tab_id.clone(),
                });
                events.try_emit(
                    events::LEADERSHIP_CONCEDED,
                    Some(json!({
                        "tab_id": own.tab_id,
                        "holder": foreign.tab_id,
                        "sequence": foreign.sequence,
                    })),
                );
            }
            continue;
        }

        if matches!(message, BusMessage::ClaimCheck { .. }) && state.borrow().is_leader() {
            debug!(tab = %own.tab_id, asker = %foreign.tab_id, "Answering claim check");
            bus.publish(BusMessage::Claim { claim: own.clone() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use std::time::Duration;

    async fn wait_blocked(monitor: &LeadershipMonitor) {
        let mut state = monitor.subscribe();
        tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| !s.is_leader()))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_single_tab_leads() {
        let bus = TabBus::new("save");
        let monitor = LeadershipMonitor::join(&bus, "tab-a", Arc::new(CollectingEventSink::new()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(monitor.is_leader());
        assert!(monitor.check().is_ok());
    }

    #[tokio::test]
    async fn test_newest_tab_wins() {
        let bus = TabBus::new("save");
        let sink = Arc::new(CollectingEventSink::new());
        let first = LeadershipMonitor::join(&bus, "tab-a", sink.clone());
        let second = LeadershipMonitor::join(&bus, "tab-b", sink.clone());

        wait_blocked(&first).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(second.is_leader());
        assert_eq!(
            first.state(),
            LeadershipState::Blocked {
                holder: "tab-b".to_string()
            }
        );
        assert_eq!(first.check().unwrap_err().holder, "tab-b");
        assert_eq!(sink.count(events::LEADERSHIP_CONCEDED), 1);
    }

    #[tokio::test]
    async fn test_exactly_one_of_three_leads() {
        let bus = TabBus::new("save");
        let sink: Arc<dyn EventSink> = Arc::new(CollectingEventSink::new());
        let tabs: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|id| LeadershipMonitor::join(&bus, id, sink.clone()))
            .collect();

        wait_blocked(&tabs[0]).await;
        wait_blocked(&tabs[1]).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let leaders: Vec<_> = tabs.iter().filter(|tab| tab.is_leader()).collect();
        assert_eq!(leaders.len(), 1);
        assert_eq!(leaders[0].claim().tab_id, "c");
    }

    #[tokio::test]
    async fn test_dropped_tab_stops_answering() {
        let bus = TabBus::new("save");
        let sink: Arc<dyn EventSink> = Arc::new(CollectingEventSink::new());
        let first = LeadershipMonitor::join(&bus, "tab-a", sink.clone());
        drop(first);
        tokio::task::yield_now().await;

        let second = LeadershipMonitor::join(&bus, "tab-b", sink);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(second.is_leader());
    }
}
