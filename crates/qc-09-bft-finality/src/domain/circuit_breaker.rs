//! Circuit breaker for consistency violations
//!
//! An attempt to lower the finalized height means the local view can no
//! longer be trusted. Processing stops until an operator resets the latch.
//!
//! ```text
//! [RUNNING] ──consistency violation──→ [HALTED]
//!     ↑                                    │
//!     └──────── manual intervention ───────┘
//! ```

use serde::{Deserialize, Serialize};

/// Processing state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProcessingState {
    /// Accepting headers and reverts
    #[default]
    Running,
    /// Mutations rejected until manual intervention
    HaltedAwaitingIntervention,
}

/// Events that drive the latch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerEvent {
    /// An operation tried to move finality backwards
    ConsistencyViolation,
    /// Operator reset
    ManualIntervention,
}

/// Halt latch for the finality service.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    state: ProcessingState,
    /// Violations observed over the breaker's lifetime
    violation_count: u64,
    intervention_count: u64,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ProcessingState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, ProcessingState::Running)
    }

    pub fn is_halted(&self) -> bool {
        matches!(self.state, ProcessingState::HaltedAwaitingIntervention)
    }

    /// Apply an event and return the new state.
    pub fn process_event(&mut self, event: BreakerEvent) -> ProcessingState {
        match event {
            BreakerEvent::ConsistencyViolation => self.violation_count += 1,
            BreakerEvent::ManualIntervention if self.is_halted() => self.intervention_count += 1,
            BreakerEvent::ManualIntervention => {}
        }
        self.state = Self::next_state(self.state, event);
        self.state
    }

    /// Transition table. Pure.
    fn next_state(state: ProcessingState, event: BreakerEvent) -> ProcessingState {
        match (state, event) {
            (_, BreakerEvent::ConsistencyViolation) => ProcessingState::HaltedAwaitingIntervention,
            (ProcessingState::HaltedAwaitingIntervention, BreakerEvent::ManualIntervention) => {
                ProcessingState::Running
            }
            (state, _) => state,
        }
    }

    /// Manual reset. Returns true if the breaker was halted.
    pub fn reset_from_halted(&mut self) -> bool {
        let was_halted = self.is_halted();
        self.process_event(BreakerEvent::ManualIntervention);
        was_halted
    }

    pub fn violation_count(&self) -> u64 {
        self.violation_count
    }

    pub fn intervention_count(&self) -> u64 {
        self.intervention_count
    }
}
