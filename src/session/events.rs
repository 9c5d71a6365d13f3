//! Session events for the UI shell

use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{ConversationTurn, UsageState};

/// Capacity of the session event channel
const EVENT_CAPACITY: usize = 64;

/// Event broadcast when session state changes that the UI should react to
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A turn was appended to the conversation
    TurnAppended { turn: ConversationTurn },

    /// The usage gate blocked a turn; the UI should show the paywall
    PaywallReached { count: u32, limit: u32 },

    /// Draft context was reconciled into the active context
    ChangesApplied { module_count: usize, active_file_count: usize },

    /// A successful AI turn was counted
    UsageIncremented { usage: UsageState },

    /// The session went back to pre-setup
    Reset,
}

/// Broadcast sender wrapper; sending with no subscribers is not an error
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            debug!("EventBus::emit: no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(SessionEvent::PaywallReached { count: 5, limit: 5 });
        bus.emit(SessionEvent::Reset);

        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::PaywallReached { count: 5, limit: 5 }
        ));
        assert!(matches!(rx.recv().await.unwrap(), SessionEvent::Reset));
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        EventBus::new().emit(SessionEvent::Reset);
    }
}
