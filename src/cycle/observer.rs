// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/vertac

//! Lifecycle notifications out of the state machine

use tokio::sync::mpsc;
use tracing::warn;

use crate::model::Cycle;

use super::StateChange;

/// Receives state machine notifications.
///
/// Called synchronously from inside the transition; implementations must not
/// block.
pub trait CycleObserver: Send + Sync {
    fn on_state_change(&self, _change: &StateChange) {}

    /// Called exactly once per finalized cycle
    fn on_cycle_complete(&self, _cycle: &Cycle) {}
}

/// Observer that ignores everything
pub struct NullObserver;

impl CycleObserver for NullObserver {}

#[derive(Debug, Clone)]
pub enum CycleNotification {
    StateChanged(StateChange),
    CycleCompleted(Cycle),
}

/// Forwards notifications over an unbounded channel to an async dispatcher
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<CycleNotification>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CycleNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, notification: CycleNotification) {
        if self.tx.send(notification).is_err() {
            warn!("Cycle dispatcher is gone, dropping notification");
        }
    }
}

impl CycleObserver for ChannelObserver {
    fn on_state_change(&self, change: &StateChange) {
        self.send(CycleNotification::StateChanged(change.clone()));
    }

    fn on_cycle_complete(&self, cycle: &Cycle) {
        self.send(CycleNotification::CycleCompleted(cycle.clone()));
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle::CycleState;
    use chrono::Utc;

    #[tokio::test]
    async fn test_channel_observer_forwards() {
        let (observer, mut rx) = ChannelObserver::new();
        observer.on_state_change(&StateChange {
            stream_id: "s".into(),
            old_state: CycleState::Idle,
            new_state: CycleState::WaitingStart,
            cycle_id: None,
            timestamp: Utc::now(),
        });

        match rx.recv().await {
            Some(CycleNotification::StateChanged(change)) => {
                assert_eq!(change.new_state, CycleState::WaitingStart)
            }
            other => panic!("unexpected notification: {:?}", other),
        }
    }

    #[test]
    fn test_closed_channel_does_not_panic() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.on_cycle_complete(&Cycle::new("c".into(), "s", "d", 1, Utc::now()));
    }
}
