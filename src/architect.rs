//! In-process orchestrator.
//!
//! The [`Architect`] instantiates components from configuration through a
//! [`ComponentRegistry`], wraps each one in a [`LifecycleMachine`] and drives
//! them through phase events in lock-step. Component status flows back through
//! the [`StatusBoard`], which implements [`Orchestrator`]: every reported state
//! is mirrored to `components.<name>.state` in the coordination store, and fatal
//! faults to `components.<name>.fault`.
//!
//! # Ordering
//!
//! Components are declared producer first. `start` runs in reverse declaration
//! order so every consumer is connected before its producer begins publishing;
//! `stop` runs in declaration order so producers go quiet before their consumers
//! disconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde_json::{json, Value};

use crate::command::{request_key, response_key};
use crate::components::{ComponentContext, ComponentRegistry};
use crate::config::SdrmConfig;
use crate::core::{ComponentState, PhaseEvent, SampleBatch};
use crate::error::{AppResult, SdrmError};
use crate::hardware::RadioDriver;
use crate::lifecycle::{Component, LifecycleMachine, Orchestrator};
use crate::pipeline::DataBus;
use crate::store::CoordinationStore;

/// Store key holding the current system mode.
pub const MODE_KEY: &str = "architect.mode";

/// Store key of a component's state.
#[must_use]
pub fn state_key(component: &str) -> String {
    format!("components.{component}.state")
}

fn fault_key(component: &str) -> String {
    format!("components.{component}.fault")
}

// =============================================================================
// Status board
// =============================================================================

/// Collects component reports and mirrors them to the store.
pub struct StatusBoard {
    store: Arc<dyn CoordinationStore>,
    states: Mutex<HashMap<String, ComponentState>>,
    changed: Condvar,
    faults: Mutex<Vec<(String, String)>>,
}

impl StatusBoard {
    /// Creates an empty board publishing to `store`.
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            states: Mutex::new(HashMap::new()),
            changed: Condvar::new(),
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Last state reported by `component`.
    #[must_use]
    pub fn state(&self, component: &str) -> Option<ComponentState> {
        self.states.lock().get(component).copied()
    }

    /// Faults reported so far as `(component, message)`.
    #[must_use]
    pub fn faults(&self) -> Vec<(String, String)> {
        self.faults.lock().clone()
    }

    /// Waits until every component in `names` last reported `state`.
    /// Returns false if `timeout` elapsed first.
    pub fn wait_for(&self, names: &[String], state: ComponentState, timeout: Duration) -> bool {
        let mut states = self.states.lock();
        let pending = |states: &mut HashMap<String, ComponentState>| {
            names.iter().any(|name| states.get(name) != Some(&state))
        };
        let result = self.changed.wait_while_for(&mut states, pending, timeout);
        !result.timed_out() || names.iter().all(|name| states.get(name) == Some(&state))
    }

    fn forget(&self, component: &str) {
        self.states.lock().remove(component);
    }
}

impl Orchestrator for StatusBoard {
    fn report_state(&self, component: &str, state: ComponentState) {
        self.states.lock().insert(component.to_string(), state);
        self.changed.notify_all();

        if let Err(e) = self.store.put(&state_key(component), json!(state.to_string())) {
            tracing::warn!(component, %state, error = %e, "Failed to publish component state");
        }
    }

    fn report_fault(&self, component: &str, fault: &SdrmError) {
        tracing::error!(component, error = %fault, "Component fault");
        let message = fault.to_string();
        self.faults
            .lock()
            .push((component.to_string(), message.clone()));
        if let Err(e) = self.store.put(&fault_key(component), json!(message)) {
            tracing::warn!(component, error = %e, "Failed to publish component fault");
        }
    }
}

// =============================================================================
// Architect
// =============================================================================

/// Builds the component graph and sequences its lifecycle.
pub struct Architect {
    config: SdrmConfig,
    registry: ComponentRegistry,
    store: Arc<dyn CoordinationStore>,
    driver: Arc<dyn RadioDriver>,
    bus: Arc<DataBus<SampleBatch>>,
    board: Arc<StatusBoard>,
    machines: Vec<LifecycleMachine>,
    mode: Option<String>,
}

impl Architect {
    /// Creates an architect with the built-in component kinds and no
    /// components yet; call [`Architect::basic_init`] to build them.
    pub fn new(
        config: SdrmConfig,
        store: Arc<dyn CoordinationStore>,
        driver: Arc<dyn RadioDriver>,
    ) -> Self {
        let board = Arc::new(StatusBoard::new(Arc::clone(&store)));
        Self {
            config,
            registry: ComponentRegistry::new(),
            store,
            driver,
            bus: DataBus::new(),
            board,
            machines: Vec::new(),
            mode: None,
        }
    }

    /// Replaces the factory registry.
    #[must_use]
    pub fn with_registry(mut self, registry: ComponentRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Instantiates every enabled component in declaration order. Each one
    /// reports Standby as it is created. Either all components are built or
    /// none are kept.
    pub fn basic_init(&mut self) -> AppResult<()> {
        if !self.machines.is_empty() {
            tracing::warn!(components = self.machines.len(), "Components already initialized");
            return Ok(());
        }

        let orchestrator: Arc<dyn Orchestrator> = self.board.clone();
        let mut machines = Vec::new();
        for definition in self.config.enabled_components() {
            if machines.iter().any(|m: &LifecycleMachine| m.name() == definition.name) {
                return Err(SdrmError::ComponentConfig {
                    component: definition.name.clone(),
                    reason: "duplicate component name".to_string(),
                });
            }
            let ctx = ComponentContext {
                definition: definition.clone(),
                store: Arc::clone(&self.store),
                bus: Arc::clone(&self.bus),
                driver: Arc::clone(&self.driver),
                orchestrator: Arc::clone(&orchestrator),
                pipeline: self.config.pipeline.clone(),
                command_namespace: self.config.keymaster.command_namespace.clone(),
            };
            let component = match self.registry.create(&ctx) {
                Ok(component) => component,
                Err(e) => {
                    tracing::error!(
                        component = %definition.name,
                        kind = %definition.kind,
                        error = %e,
                        "Component creation failed"
                    );
                    for machine in &machines {
                        self.board.forget(machine.name());
                    }
                    return Err(e);
                }
            };
            tracing::info!(
                component = %definition.name,
                kind = %definition.kind,
                "Component created"
            );
            machines.push(LifecycleMachine::new(component, Arc::clone(&orchestrator)));
        }

        self.machines = machines;
        Ok(())
    }

    /// Component names in declaration order.
    #[must_use]
    pub fn component_names(&self) -> Vec<String> {
        self.machines.iter().map(|m| m.name().to_string()).collect()
    }

    /// Current state of a component.
    #[must_use]
    pub fn component_state(&self, name: &str) -> Option<ComponentState> {
        self.machine(name).map(LifecycleMachine::state)
    }

    /// The component instance, for inspection.
    #[must_use]
    pub fn component(&self, name: &str) -> Option<&dyn Component> {
        self.machine(name).map(LifecycleMachine::component)
    }

    /// Downcasts a component to its concrete type.
    #[must_use]
    pub fn component_as<T: 'static>(&self, name: &str) -> Option<&T> {
        self.component(name)?.as_any().downcast_ref::<T>()
    }

    /// The topic bus shared by all components.
    #[must_use]
    pub fn bus(&self) -> &Arc<DataBus<SampleBatch>> {
        &self.bus
    }

    /// The coordination store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    /// Faults reported by components.
    #[must_use]
    pub fn faults(&self) -> Vec<(String, String)> {
        self.board.faults()
    }

    /// Delivers one phase event to one component.
    pub fn deliver_phase_event(
        &mut self,
        component: &str,
        event: PhaseEvent,
    ) -> AppResult<ComponentState> {
        let machine = self
            .machines
            .iter_mut()
            .find(|m| m.name() == component)
            .ok_or_else(|| SdrmError::UnknownComponent(component.to_string()))?;
        Ok(machine.deliver(event))
    }

    /// Ready in declaration order. True when every component is Ready.
    pub fn ready(&mut self) -> bool {
        self.phase_all(PhaseEvent::Ready, false, ComponentState::Ready)
    }

    /// Start in reverse declaration order. True when every component is Running.
    pub fn start(&mut self) -> bool {
        self.phase_all(PhaseEvent::Start, true, ComponentState::Running)
    }

    /// Stop in declaration order. True when no component is Running.
    pub fn stop(&mut self) -> bool {
        self.phase_all(PhaseEvent::Stop, false, ComponentState::Ready)
            || self
                .machines
                .iter()
                .all(|m| m.state() != ComponentState::Running)
    }

    /// Standby in declaration order. True when every component is Standby.
    pub fn standby(&mut self) -> bool {
        self.phase_all(PhaseEvent::Standby, false, ComponentState::Standby)
    }

    fn phase_all(&mut self, event: PhaseEvent, reverse: bool, target: ComponentState) -> bool {
        tracing::info!(%event, components = self.machines.len(), "Delivering phase event");
        let mut reached = true;
        let order: Vec<usize> = if reverse {
            (0..self.machines.len()).rev().collect()
        } else {
            (0..self.machines.len()).collect()
        };
        for index in order {
            let machine = &mut self.machines[index];
            let state = machine.deliver(event);
            if state != target {
                reached = false;
                if let Some(e) = machine.last_error() {
                    tracing::warn!(
                        component = %machine.name(),
                        %event,
                        %state,
                        error = %e,
                        "Component did not follow phase event"
                    );
                }
            }
        }
        reached
    }

    /// Waits until every component last reported `state`. Returns false at once
    /// for `Starting` and `Stopping`.
    pub fn wait_all_in_state(&self, state: ComponentState, timeout: Duration) -> bool {
        // transient states are never reported
        if state.is_transient() {
            return false;
        }
        self.board.wait_for(&self.component_names(), state, timeout)
    }

    /// Names the running configuration and publishes it under [`MODE_KEY`].
    pub fn set_system_mode(&mut self, mode: &str) -> AppResult<()> {
        self.store.put(MODE_KEY, json!(mode))?;
        tracing::info!(mode, "System mode set");
        self.mode = Some(mode.to_string());
        Ok(())
    }

    /// Current system mode.
    #[must_use]
    pub fn system_mode(&self) -> Option<&str> {
        self.mode.as_deref()
    }

    /// Writes a command request and returns the response frame.
    pub fn issue(&self, command: &str, args: Vec<Value>) -> AppResult<Value> {
        let key = request_key(&self.config.keymaster.command_namespace, command);
        self.store.put(&key, Value::Array(args))?;
        let rval = response_key(&key).unwrap_or_default();
        Ok(self.store.get(&rval)?)
    }

    /// Stops running components, returns all of them to Standby and drops them.
    pub fn shutdown(&mut self) -> AppResult<()> {
        let mut errors = Vec::new();
        for (event, from) in [
            (PhaseEvent::Stop, ComponentState::Running),
            (PhaseEvent::Standby, ComponentState::Ready),
        ] {
            for machine in &mut self.machines {
                if machine.state() == from {
                    machine.deliver(event);
                    if let Some(e) = machine.take_last_error() {
                        errors.push(SdrmError::Lifecycle(e));
                    }
                }
            }
        }

        for machine in self.machines.drain(..) {
            tracing::debug!(
                component = %machine.name(),
                state = %machine.state(),
                "Releasing component"
            );
        }
        tracing::info!(errors = errors.len(), "Architect shut down");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SdrmError::ShutdownFailed(errors))
        }
    }

    fn machine(&self, name: &str) -> Option<&LifecycleMachine> {
        self.machines.iter().find(|m| m.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{AirspyComponent, ConsoleDisplay, FftComponent};
    use crate::config::ComponentDefinition;
    use crate::hardware::MockAirspy;
    use crate::lifecycle::LifecycleError;
    use crate::store::MemoryStore;

    const SERIAL: u64 = 1234;

    fn fast_config() -> SdrmConfig {
        let mut config = SdrmConfig::default();
        config.pipeline.receive_timeout_ms = 20;
        config
    }

    fn architect(config: SdrmConfig) -> (Architect, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let driver = MockAirspy::with_devices(&[SERIAL]);
        let architect = Architect::new(config, store.clone(), Arc::new(driver));
        (architect, store)
    }

    #[test]
    fn basic_init_builds_declared_components() {
        let (mut architect, store) = architect(fast_config());
        architect.basic_init().unwrap();

        assert_eq!(architect.component_names(), vec!["airspy", "fft", "display"]);
        assert!(architect.component_as::<AirspyComponent>("airspy").is_some());
        assert!(architect.component_as::<FftComponent>("fft").is_some());
        assert!(architect.component_as::<ConsoleDisplay>("display").is_some());
        assert!(architect.wait_all_in_state(ComponentState::Standby, Duration::from_millis(10)));
        assert_eq!(store.get("components.fft.state").unwrap(), json!("Standby"));
    }

    #[test]
    fn disabled_components_are_skipped() {
        let mut config = fast_config();
        config.components[2].enabled = false;
        let (mut architect, _) = architect(config);
        architect.basic_init().unwrap();
        assert_eq!(architect.component_names(), vec!["airspy", "fft"]);
    }

    #[test]
    fn lock_step_lifecycle() {
        let (mut architect, store) = architect(fast_config());
        architect.basic_init().unwrap();

        assert!(architect.ready());
        assert!(architect.wait_all_in_state(ComponentState::Ready, Duration::from_millis(10)));
        assert!(architect.start());
        assert_eq!(architect.component_state("fft"), Some(ComponentState::Running));
        assert_eq!(store.get("components.display.state").unwrap(), json!("Running"));
        assert_eq!(architect.bus().subscriber_count("airspy.iq_data"), 1);

        assert!(architect.stop());
        assert!(architect.wait_all_in_state(ComponentState::Ready, Duration::from_millis(10)));
        assert!(architect.standby());
        assert_eq!(architect.bus().subscriber_count("airspy.iq_data"), 0);
    }

    #[test]
    fn wait_times_out_when_state_not_reached() {
        let (mut architect, _) = architect(fast_config());
        architect.basic_init().unwrap();
        assert!(!architect.wait_all_in_state(ComponentState::Running, Duration::from_millis(20)));
    }

    #[test]
    fn transient_states_are_never_waited_on() {
        let (mut architect, _) = architect(fast_config());
        architect.basic_init().unwrap();
        let started = std::time::Instant::now();
        assert!(!architect.wait_all_in_state(ComponentState::Stopping, Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn single_component_events() {
        let (mut architect, _) = architect(fast_config());
        architect.basic_init().unwrap();
        assert_eq!(
            architect.deliver_phase_event("airspy", PhaseEvent::Ready).unwrap(),
            ComponentState::Ready
        );
        assert_eq!(architect.component_state("fft"), Some(ComponentState::Standby));
        assert!(matches!(
            architect.deliver_phase_event("nope", PhaseEvent::Ready),
            Err(SdrmError::UnknownComponent(name)) if name == "nope"
        ));
    }

    #[test]
    fn system_mode_is_published() {
        let (mut architect, store) = architect(fast_config());
        architect.set_system_mode("iq_monitor").unwrap();
        assert_eq!(architect.system_mode(), Some("iq_monitor"));
        assert_eq!(store.get(MODE_KEY).unwrap(), json!("iq_monitor"));
    }

    #[test]
    fn commands_are_reachable_once_ready() {
        let (mut architect, _) = architect(fast_config());
        architect.basic_init().unwrap();
        architect.ready();
        assert_eq!(
            architect.issue("open_sn", vec![json!(SERIAL)]).unwrap(),
            json!(["SUCCESS", SERIAL])
        );
        assert_eq!(
            architect.issue("open_sn", vec![json!(SERIAL)]).unwrap(),
            json!(["ERROR", "already open", SERIAL])
        );
    }

    #[test]
    fn failed_creation_keeps_nothing() {
        let mut config = fast_config();
        config.components.push(ComponentDefinition::new("broken", "FftComponent"));
        let (mut architect, _) = architect(config);
        assert!(matches!(
            architect.basic_init(),
            Err(SdrmError::ComponentConfig { component, .. }) if component == "broken"
        ));
        assert!(architect.component_names().is_empty());
    }

    #[test]
    fn custom_factories_can_be_registered() {
        struct Stubborn;
        impl Component for Stubborn {
            fn name(&self) -> &str {
                "stubborn"
            }
            fn kind(&self) -> &'static str {
                "Stubborn"
            }
            fn on_stop(&mut self) -> Result<(), LifecycleError> {
                Err(LifecycleError::NotConnected("nowhere".into()))
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }

        let mut registry = ComponentRegistry::empty();
        registry.register("Stubborn", |_ctx: &ComponentContext| {
            Ok(Box::new(Stubborn) as Box<dyn Component>)
        });
        let mut config = fast_config();
        config.components = vec![ComponentDefinition::new("stubborn", "Stubborn")];
        let (architect, _) = architect(config);
        let mut architect = architect.with_registry(registry);
        architect.basic_init().unwrap();

        assert!(architect.start());
        assert!(!architect.stop());
        assert_eq!(architect.component_state("stubborn"), Some(ComponentState::Running));

        let err = architect.shutdown().unwrap_err();
        assert!(matches!(err, SdrmError::ShutdownFailed(errors) if errors.len() == 1));
        assert!(architect.component_names().is_empty());
    }

    #[test]
    fn shutdown_returns_components_to_standby() {
        let (mut architect, store) = architect(fast_config());
        architect.basic_init().unwrap();
        architect.ready();
        architect.start();
        architect.shutdown().unwrap();
        assert_eq!(store.get("components.airspy.state").unwrap(), json!("Standby"));
    }
}
