//! Run state machine.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Lifecycle state of a supervised run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Launching,
    Running,
    Draining,
    Terminated,
    Failed,
}

impl RunState {
    /// Whether no further transitions can happen.
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }

    fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Launching)
                | (Self::Launching, Self::Running | Self::Failed)
                | (Self::Running, Self::Draining)
                | (Self::Draining, Self::Terminated)
        )
    }
}

/// State machine that publishes each transition to watchers.
#[derive(Debug)]
pub struct RunStateMachine {
    tx: watch::Sender<RunState>,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RunState::Idle);
        Self { tx }
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        *self.tx.borrow()
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.tx.subscribe()
    }

    /// Move to `next`.
    ///
    /// Transitions out of a final state, or that skip a step, are ignored
    /// and return `false`.
    pub fn transition(&self, next: RunState) -> bool {
        let from = self.state();
        if !from.can_transition_to(next) {
            tracing::debug!(from = ?from, to = ?next, "Ignoring invalid state transition");
            return false;
        }
        tracing::debug!(from = ?from, to = ?next, "State transition");
        self.tx.send_replace(next);
        true
    }
}
