//! Typed engine events.
//!
//! Mutations announce themselves over a single broadcast channel instead
//! of an ad-hoc callback set, so payloads are statically checked and any
//! number of presentation layers can subscribe independently.

use tokio::sync::broadcast;

use crate::achievements::AchievementId;
use crate::types::{Counts, HistoryEntry, ModifierState, UserSession};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    StateLoaded,
    UserChanged(Option<UserSession>),
    CountsUpdated(Counts),
    HistoryUpdated,
    CaseUndone(HistoryEntry),
    GoalUpdated(u32),
    GoalMet,
    ModifierChanged(ModifierState),
    AchievementsUnlocked(Vec<AchievementId>),
    TeamDataUpdated,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emits to whoever is listening. No subscribers is not an error.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
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
    async fn test_subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(EngineEvent::StateLoaded);
        bus.emit(EngineEvent::GoalMet);
        assert!(matches!(rx.recv().await.unwrap(), EngineEvent::StateLoaded));
        assert!(matches!(rx.recv().await.unwrap(), EngineEvent::GoalMet));
    }

    #[test]
    fn test_emit_without_subscribers_is_a_noop() {
        let bus = EventBus::new();
        bus.emit(EngineEvent::HistoryUpdated);
    }
}
