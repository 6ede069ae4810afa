//! Test doubles shared by unit and integration tests.
//!
//! The simulated receiver lives in [`crate::hardware::mock`] and the in-memory
//! store in [`crate::store::memory`]; this module adds an orchestrator that only
//! records what it is told.

use parking_lot::Mutex;

use crate::core::ComponentState;
use crate::error::SdrmError;
use crate::lifecycle::Orchestrator;

/// Orchestrator that records every report in arrival order.
#[derive(Default)]
pub struct RecordingOrchestrator {
    states: Mutex<Vec<(String, ComponentState)>>,
    faults: Mutex<Vec<(String, String)>>,
}

impl RecordingOrchestrator {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every state reported for `component`, oldest first.
    #[must_use]
    pub fn states_for(&self, component: &str) -> Vec<ComponentState> {
        self.states
            .lock()
            .iter()
            .filter(|(name, _)| name == component)
            .map(|(_, state)| *state)
            .collect()
    }

    /// Most recent state reported for `component`.
    #[must_use]
    pub fn last_state(&self, component: &str) -> Option<ComponentState> {
        self.states_for(component).last().copied()
    }

    /// Faults reported so far as `(component, message)`.
    #[must_use]
    pub fn faults(&self) -> Vec<(String, String)> {
        self.faults.lock().clone()
    }
}

impl Orchestrator for RecordingOrchestrator {
    fn report_state(&self, component: &str, state: ComponentState) {
        self.states.lock().push((component.to_string(), state));
    }

    fn report_fault(&self, component: &str, fault: &SdrmError) {
        self.faults
            .lock()
            .push((component.to_string(), fault.to_string()));
    }
}
