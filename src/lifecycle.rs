//! Per-component lifecycle state machine.
//!
//! Every component is driven through the same five states by phase events from
//! the orchestrator:
//!
//! ```text
//!            ready                 start
//! Standby ---------> Ready ----------------> Starting --ok--> Running
//!    ^   <---------   |  ^                      |                |
//!    |     standby    |  |                 fail (prior state)    | stop
//!    |                |  +------ resting <--- Stopping <---------+
//!    +------ start ---+
//! ```
//!
//! `Stop` returns to the resting state the component was started from, Standby
//! or Ready. A failed hook rolls the state back to where it was. Every delivered
//! event produces exactly one `report_state` call carrying the resulting state,
//! including ignored events and failed transitions.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;

use crate::core::{ComponentState, PhaseEvent};
use crate::error::SdrmError;
use crate::store::StoreError;

/// Errors raised by lifecycle hooks.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// The acquisition thread did not signal loop entry in time.
    #[error("thread '{thread}' did not signal start within {timeout:?}")]
    StartTimeout {
        /// Thread name.
        thread: String,
        /// Bound that elapsed.
        timeout: Duration,
    },

    /// The acquisition thread did not return in time.
    #[error("thread '{thread}' did not exit within {timeout:?}")]
    StopTimeout {
        /// Thread name.
        thread: String,
        /// Bound that elapsed.
        timeout: Duration,
    },

    /// The OS refused to create the thread.
    #[error("failed to spawn thread '{thread}': {source}")]
    Spawn {
        /// Thread name.
        thread: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A previous task on the thread has not returned yet.
    #[error("thread '{0}' is still running a previous task")]
    StillRunning(String),

    /// A sink could not attach to its topic.
    #[error("sink for topic '{0}' is not connected")]
    NotConnected(String),

    /// Attaching or detaching command handlers failed.
    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),
}

/// Orchestrator contract consumed by components.
pub trait Orchestrator: Send + Sync {
    /// Records the state a component ended up in after a phase event.
    fn report_state(&self, component: &str, state: ComponentState);

    /// Records a fatal error raised outside any lifecycle transition.
    fn report_fault(&self, component: &str, fault: &SdrmError);
}

/// Hooks a component implements; the state machine decides when to call them.
pub trait Component: Send {
    /// Instance name, unique within a process.
    fn name(&self) -> &str;

    /// Factory kind this component was built from.
    fn kind(&self) -> &'static str;

    /// Standby -> Ready. Typically attaches command handlers.
    fn on_ready(&mut self) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Ready -> Standby. Undoes `on_ready`.
    fn on_standby(&mut self) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Starting. Must leave nothing running when it returns an error.
    fn on_start(&mut self) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Stopping. Must have joined any acquisition thread when it returns `Ok`.
    fn on_stop(&mut self) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Downcasting hook for callers that know the concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// Shared, readable view of a component's current state.
#[derive(Clone, Debug)]
pub struct StateCell(Arc<RwLock<ComponentState>>);

impl StateCell {
    fn new(state: ComponentState) -> Self {
        Self(Arc::new(RwLock::new(state)))
    }

    /// Current state, including transient ones.
    #[must_use]
    pub fn get(&self) -> ComponentState {
        *self.0.read()
    }

    fn set(&self, state: ComponentState) {
        *self.0.write() = state;
    }
}

/// Drives one component through its lifecycle.
pub struct LifecycleMachine {
    component: Box<dyn Component>,
    state: StateCell,
    resting: ComponentState,
    orchestrator: Arc<dyn Orchestrator>,
    last_error: Option<LifecycleError>,
}

impl LifecycleMachine {
    /// Wraps a freshly built component and reports it in `Standby`.
    pub fn new(component: Box<dyn Component>, orchestrator: Arc<dyn Orchestrator>) -> Self {
        orchestrator.report_state(component.name(), ComponentState::Standby);
        Self {
            component,
            state: StateCell::new(ComponentState::Standby),
            resting: ComponentState::Standby,
            orchestrator,
            last_error: None,
        }
    }

    /// Component instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.component.name()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ComponentState {
        self.state.get()
    }

    /// Handle for observing the state from other threads.
    #[must_use]
    pub fn state_cell(&self) -> StateCell {
        self.state.clone()
    }

    /// The wrapped component.
    #[must_use]
    pub fn component(&self) -> &dyn Component {
        self.component.as_ref()
    }

    /// Error from the most recent failed transition, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&LifecycleError> {
        self.last_error.as_ref()
    }

    /// Takes the error of the most recent failed transition.
    pub fn take_last_error(&mut self) -> Option<LifecycleError> {
        self.last_error.take()
    }

    /// Applies a phase event and reports the resulting state exactly once.
    pub fn deliver(&mut self, event: PhaseEvent) -> ComponentState {
        use ComponentState::{Ready, Running, Standby, Starting, Stopping};

        let current = self.state();
        let next = match (current, event) {
            (Standby, PhaseEvent::Ready) => self.transition(current, None, Ready, |c| c.on_ready()),
            (Ready, PhaseEvent::Standby) => {
                self.transition(current, None, Standby, |c| c.on_standby())
            }
            (Standby | Ready, PhaseEvent::Start) => {
                let next = self.transition(current, Some(Starting), Running, |c| c.on_start());
                if next == Running {
                    self.resting = current;
                }
                next
            }
            (Running, PhaseEvent::Stop) => {
                let resting = self.resting;
                self.transition(current, Some(Stopping), resting, |c| c.on_stop())
            }
            (state, event) => {
                tracing::debug!(
                    component = %self.name(),
                    %state,
                    %event,
                    "Phase event has no effect"
                );
                state
            }
        };

        self.orchestrator.report_state(self.component.name(), next);
        next
    }

    fn transition<F>(
        &mut self,
        from: ComponentState,
        via: Option<ComponentState>,
        to: ComponentState,
        hook: F,
    ) -> ComponentState
    where
        F: FnOnce(&mut dyn Component) -> Result<(), LifecycleError>,
    {
        if let Some(transient) = via {
            self.state.set(transient);
        }
        match hook(self.component.as_mut()) {
            Ok(()) => {
                self.state.set(to);
                self.last_error = None;
                tracing::info!(
                    component = %self.component.name(),
                    %from,
                    %to,
                    "Lifecycle transition"
                );
                to
            }
            Err(e) => {
                self.state.set(from);
                tracing::error!(
                    component = %self.component.name(),
                    %from,
                    attempted = %to,
                    error = %e,
                    "Lifecycle transition failed, state rolled back"
                );
                self.last_error = Some(e);
                from
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingOrchestrator;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Scripted {
        fail_start: bool,
        fail_stop: bool,
        calls: Vec<&'static str>,
        observed: Arc<Mutex<Option<StateCell>>>,
        seen_during_start: Arc<Mutex<Option<ComponentState>>>,
    }

    impl Component for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        fn kind(&self) -> &'static str {
            "Scripted"
        }
        fn on_ready(&mut self) -> Result<(), LifecycleError> {
            self.calls.push("ready");
            Ok(())
        }
        fn on_standby(&mut self) -> Result<(), LifecycleError> {
            self.calls.push("standby");
            Ok(())
        }
        fn on_start(&mut self) -> Result<(), LifecycleError> {
            self.calls.push("start");
            if let Some(cell) = self.observed.lock().as_ref() {
                *self.seen_during_start.lock() = Some(cell.get());
            }
            if self.fail_start {
                return Err(LifecycleError::StartTimeout {
                    thread: "scripted".into(),
                    timeout: Duration::from_millis(1),
                });
            }
            Ok(())
        }
        fn on_stop(&mut self) -> Result<(), LifecycleError> {
            self.calls.push("stop");
            if self.fail_stop {
                return Err(LifecycleError::StopTimeout {
                    thread: "scripted".into(),
                    timeout: Duration::from_millis(1),
                });
            }
            Ok(())
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn machine(scripted: Scripted) -> (LifecycleMachine, Arc<RecordingOrchestrator>) {
        let orchestrator = Arc::new(RecordingOrchestrator::new());
        let machine = LifecycleMachine::new(Box::new(scripted), orchestrator.clone());
        (machine, orchestrator)
    }

    #[test]
    fn full_cycle_reports_each_state_once() {
        let (mut machine, orchestrator) = machine(Scripted::default());
        assert_eq!(machine.deliver(PhaseEvent::Ready), ComponentState::Ready);
        assert_eq!(machine.deliver(PhaseEvent::Start), ComponentState::Running);
        assert_eq!(machine.deliver(PhaseEvent::Stop), ComponentState::Ready);
        assert_eq!(machine.deliver(PhaseEvent::Standby), ComponentState::Standby);

        assert_eq!(
            orchestrator.states_for("scripted"),
            vec![
                ComponentState::Standby,
                ComponentState::Ready,
                ComponentState::Running,
                ComponentState::Ready,
                ComponentState::Standby,
            ]
        );
    }

    #[test]
    fn stop_returns_to_standby_when_started_from_standby() {
        let (mut machine, _) = machine(Scripted::default());
        assert_eq!(machine.deliver(PhaseEvent::Start), ComponentState::Running);
        assert_eq!(machine.deliver(PhaseEvent::Stop), ComponentState::Standby);
    }

    #[test]
    fn failed_start_reports_prior_state() {
        let (mut machine, orchestrator) = machine(Scripted {
            fail_start: true,
            ..Scripted::default()
        });
        machine.deliver(PhaseEvent::Ready);
        assert_eq!(machine.deliver(PhaseEvent::Start), ComponentState::Ready);
        assert_eq!(machine.state(), ComponentState::Ready);
        assert!(matches!(
            machine.last_error(),
            Some(LifecycleError::StartTimeout { .. })
        ));
        assert_eq!(orchestrator.last_state("scripted"), Some(ComponentState::Ready));
    }

    #[test]
    fn failed_stop_stays_running() {
        let (mut machine, _) = machine(Scripted {
            fail_stop: true,
            ..Scripted::default()
        });
        machine.deliver(PhaseEvent::Start);
        assert_eq!(machine.deliver(PhaseEvent::Stop), ComponentState::Running);
    }

    #[test]
    fn ignored_events_still_report() {
        let (mut machine, orchestrator) = machine(Scripted::default());
        assert_eq!(machine.deliver(PhaseEvent::Stop), ComponentState::Standby);
        assert_eq!(machine.deliver(PhaseEvent::Standby), ComponentState::Standby);
        assert_eq!(orchestrator.states_for("scripted").len(), 3);

        let scripted = machine.component().as_any().downcast_ref::<Scripted>().unwrap();
        assert!(scripted.calls.is_empty());
    }

    #[test]
    fn starting_is_visible_during_start_hook() {
        let observed = Arc::new(Mutex::new(None));
        let seen = Arc::new(Mutex::new(None));
        let (mut machine, _) = machine(Scripted {
            observed: Arc::clone(&observed),
            seen_during_start: Arc::clone(&seen),
            ..Scripted::default()
        });
        *observed.lock() = Some(machine.state_cell());

        machine.deliver(PhaseEvent::Start);
        assert_eq!(*seen.lock(), Some(ComponentState::Starting));
    }
}
