//! Failed transitions leave components in their prior state.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sdrm::core::{ComponentState, PhaseEvent};
use sdrm::lifecycle::{Component, LifecycleError, LifecycleMachine};
use sdrm::pipeline::{DataBus, DataSource, PublishPolicy, Signal, StreamWorker, ThreadTiming};
use sdrm::testing::RecordingOrchestrator;

const TOPIC: &str = "rx.iq_data";

/// Worker-backed component whose handler can be held, or whose loop never
/// announces itself.
struct Relay {
    worker: StreamWorker<u32>,
    mute: bool,
    release: Signal,
    entered: Signal,
    handled: Arc<AtomicUsize>,
}

impl Component for Relay {
    fn name(&self) -> &str {
        "relay"
    }

    fn kind(&self) -> &'static str {
        "Relay"
    }

    fn on_start(&mut self) -> Result<(), LifecycleError> {
        if self.mute {
            return self.worker.start_with(|ctx, _reader| {
                while ctx.should_run() {
                    std::thread::sleep(Duration::from_millis(1));
                }
            });
        }
        let (gate, busy, count) = (
            self.release.clone(),
            self.entered.clone(),
            Arc::clone(&self.handled),
        );
        self.worker.start(move |_| {
            busy.raise();
            gate.wait(Duration::from_secs(5));
            count.fetch_add(1, Ordering::Relaxed);
        })
    }

    fn on_stop(&mut self) -> Result<(), LifecycleError> {
        self.worker.stop()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Rig {
    machine: LifecycleMachine,
    orchestrator: Arc<RecordingOrchestrator>,
    bus: Arc<DataBus<u32>>,
    source: DataSource<u32>,
}

impl Rig {
    fn new(mute: bool) -> Self {
        let timing = ThreadTiming {
            receive_timeout: Duration::from_millis(20),
            start_timeout: Duration::from_millis(50),
            stop_timeout: Duration::from_millis(50),
        };
        let bus = DataBus::new();
        let source = bus.source(TOPIC, PublishPolicy::Block);
        let relay = Relay {
            worker: StreamWorker::new("relay", bus.sink(4), TOPIC, timing),
            mute,
            release: Signal::new(),
            entered: Signal::new(),
            handled: Arc::new(AtomicUsize::new(0)),
        };
        let orchestrator = Arc::new(RecordingOrchestrator::new());
        let machine = LifecycleMachine::new(Box::new(relay), orchestrator.clone());
        Self {
            machine,
            orchestrator,
            bus,
            source,
        }
    }

    fn relay(&self) -> &Relay {
        self.machine
            .component()
            .as_any()
            .downcast_ref::<Relay>()
            .unwrap()
    }
}

#[test]
fn start_that_never_signals_keeps_prior_state() {
    let mut rig = Rig::new(true);

    assert_eq!(rig.machine.deliver(PhaseEvent::Ready), ComponentState::Ready);
    assert_eq!(rig.machine.deliver(PhaseEvent::Start), ComponentState::Ready);
    assert!(matches!(
        rig.machine.last_error(),
        Some(LifecycleError::StartTimeout { thread, .. }) if thread == "relay"
    ));

    assert_eq!(
        rig.orchestrator.states_for("relay"),
        vec![ComponentState::Standby, ComponentState::Ready, ComponentState::Ready]
    );
    assert_eq!(rig.bus.subscriber_count(TOPIC), 0);
    assert!(!rig.relay().worker.is_running());
}

#[test]
fn from_standby_a_failed_start_stays_in_standby() {
    let mut rig = Rig::new(true);

    assert_eq!(rig.machine.deliver(PhaseEvent::Start), ComponentState::Standby);
    assert_eq!(rig.orchestrator.last_state("relay"), Some(ComponentState::Standby));
    // ignored events still report
    assert_eq!(rig.machine.deliver(PhaseEvent::Stop), ComponentState::Standby);
    assert_eq!(rig.orchestrator.states_for("relay").len(), 3);
    assert_eq!(rig.bus.subscriber_count(TOPIC), 0);
}

#[test]
fn stop_timeout_leaves_component_running_and_consuming() {
    let mut rig = Rig::new(false);
    assert_eq!(rig.machine.deliver(PhaseEvent::Ready), ComponentState::Ready);
    assert_eq!(rig.machine.deliver(PhaseEvent::Start), ComponentState::Running);

    rig.source.publish(1);
    assert!(rig.relay().entered.wait(Duration::from_secs(2)));

    assert_eq!(rig.machine.deliver(PhaseEvent::Stop), ComponentState::Running);
    assert!(matches!(
        rig.machine.last_error(),
        Some(LifecycleError::StopTimeout { .. })
    ));
    assert!(rig.relay().worker.is_running());
    assert_eq!(rig.bus.subscriber_count(TOPIC), 1);

    rig.relay().release.raise();
    rig.source.publish(2);
    let deadline = Instant::now() + Duration::from_secs(2);
    while rig.relay().handled.load(Ordering::Relaxed) < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(rig.relay().handled.load(Ordering::Relaxed), 2);

    // a second stop finishes the join
    assert_eq!(rig.machine.deliver(PhaseEvent::Stop), ComponentState::Ready);
    assert!(!rig.relay().worker.is_running());
    assert_eq!(rig.bus.subscriber_count(TOPIC), 0);
    assert_eq!(
        rig.orchestrator.states_for("relay"),
        vec![
            ComponentState::Standby,
            ComponentState::Ready,
            ComponentState::Running,
            ComponentState::Running,
            ComponentState::Ready,
        ]
    );

    assert_eq!(rig.machine.deliver(PhaseEvent::Start), ComponentState::Running);
    assert_eq!(rig.bus.subscriber_count(TOPIC), 1);
    assert_eq!(rig.machine.deliver(PhaseEvent::Stop), ComponentState::Ready);
}
