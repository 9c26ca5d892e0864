//! Service lifecycle state machine.
//!
//! `NotStarted -> Started -> Stopped`, one-way. `start` and `stop` are
//! idempotent; each transition fires at most once.

use std::sync::atomic::{AtomicU8, Ordering};

/// The lifecycle state of a long-lived service component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    NotStarted,
    Started,
    Stopped,
}

/// Tracks the lifecycle state of a component.
pub struct Lifecycle {
    name: String,
    state: AtomicU8,
}

const NOT_STARTED: u8 = 0;
const STARTED: u8 = 1;
const STOPPED: u8 = 2;

impl Lifecycle {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: AtomicU8::new(NOT_STARTED),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> State {
        match self.state.load(Ordering::SeqCst) {
            NOT_STARTED => State::NotStarted,
            STARTED => State::Started,
            _ => State::Stopped,
        }
    }

    pub fn is_started(&self) -> bool {
        self.state() == State::Started
    }

    /// Transition to Started. Returns true only on the transition that
    /// actually happened; a stopped component never restarts.
    pub fn start(&self) -> bool {
        let transitioned = self
            .state
            .compare_exchange(NOT_STARTED, STARTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        if transitioned {
            tracing::debug!(service = %self.name, "started");
        }

        transitioned
    }

    /// Transition to Stopped from any state. Returns true on the first
    /// call only.
    pub fn stop(&self) -> bool {
        let previous = self.state.swap(STOPPED, Ordering::SeqCst);

        let transitioned = previous != STOPPED;

        if transitioned {
            tracing::debug!(service = %self.name, "stopped");
        }

        transitioned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_one_way() {
        let lifecycle = Lifecycle::new("test");
        assert_eq!(lifecycle.state(), State::NotStarted);

        assert!(lifecycle.start());
        assert_eq!(lifecycle.state(), State::Started);

        // Second start is a no-op.
        assert!(!lifecycle.start());

        assert!(lifecycle.stop());
        assert_eq!(lifecycle.state(), State::Stopped);

        // Stop is idempotent and a stopped component never restarts.
        assert!(!lifecycle.stop());
        assert!(!lifecycle.start());
        assert_eq!(lifecycle.state(), State::Stopped);
    }
}
