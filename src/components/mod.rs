//! Pipeline components and the context they are built from.
//!
//! Every component owns at most one data source (`<name>.<source>`) and reads
//! from sinks named in its definition. Three kinds exist:
//!
//! | kind | sinks | source |
//! |---|---|---|
//! | `AirspyComponent` | | `iq_data` |
//! | `FftComponent` | `input_data` | `fft_data` |
//! | `ConsoleDisplay` | `input_data` | |

pub mod airspy;
pub mod console;
pub mod fft;
pub mod registry;

use std::sync::Arc;

use crate::config::{ComponentDefinition, PipelineConfig};
use crate::core::SampleBatch;
use crate::error::{AppResult, SdrmError};
use crate::hardware::RadioDriver;
use crate::lifecycle::Orchestrator;
use crate::pipeline::{DataBus, DataSink, DataSource, PublishPolicy, StreamWorker};
use crate::store::CoordinationStore;

pub use airspy::AirspyComponent;
pub use console::ConsoleDisplay;
pub use fft::FftComponent;
pub use registry::{ComponentFactory, ComponentRegistry};

/// Kind name of the receiver front-end.
pub const AIRSPY_COMPONENT: &str = "AirspyComponent";
/// Kind name of the spectrum stage.
pub const FFT_COMPONENT: &str = "FftComponent";
/// Kind name of the logging consumer.
pub const CONSOLE_DISPLAY: &str = "ConsoleDisplay";

/// Every kind the built-in registry can create.
pub const KNOWN_KINDS: &[&str] = &[AIRSPY_COMPONENT, FFT_COMPONENT, CONSOLE_DISPLAY];

/// Name of the single input sink of processing stages.
pub const INPUT_SINK: &str = "input_data";
/// Source name of raw IQ batches.
pub const IQ_SOURCE: &str = "iq_data";
/// Source name of spectra.
pub const FFT_SOURCE: &str = "fft_data";

/// Source a component kind publishes, if any.
#[must_use]
pub fn output_source(kind: &str) -> Option<&'static str> {
    match kind {
        AIRSPY_COMPONENT => Some(IQ_SOURCE),
        FFT_COMPONENT => Some(FFT_SOURCE),
        _ => None,
    }
}

/// Everything a factory needs to build one component.
#[derive(Clone)]
pub struct ComponentContext {
    /// The instance definition.
    pub definition: ComponentDefinition,
    /// Coordination store for command keys.
    pub store: Arc<dyn CoordinationStore>,
    /// Topic bus shared by all components.
    pub bus: Arc<DataBus<SampleBatch>>,
    /// Receiver driver.
    pub driver: Arc<dyn RadioDriver>,
    /// Receives fatal faults raised outside phase events.
    pub orchestrator: Arc<dyn Orchestrator>,
    /// Queue and thread settings.
    pub pipeline: PipelineConfig,
    /// Command key namespace.
    pub command_namespace: String,
}

impl ComponentContext {
    /// Instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Fully qualified topic of one of this component's sources.
    #[must_use]
    pub fn topic(&self, source: &str) -> String {
        format!("{}.{source}", self.definition.name)
    }

    /// Upstream topic of `sink`, required by the component's kind.
    pub fn sink_topic(&self, sink: &str) -> AppResult<&str> {
        self.definition
            .sinks
            .get(sink)
            .map(String::as_str)
            .ok_or_else(|| SdrmError::ComponentConfig {
                component: self.definition.name.clone(),
                reason: format!("sink '{sink}' is not connected to a topic"),
            })
    }

    /// Source publishing under `<name>.<source>` with `policy`.
    #[must_use]
    pub fn source_with(&self, source: &str, policy: PublishPolicy) -> DataSource<SampleBatch> {
        self.bus
            .source(self.topic(source), policy)
            .with_block_timeout(self.pipeline.block_timeout())
    }

    /// Source using the configured full-queue policy.
    #[must_use]
    pub fn source(&self, source: &str) -> DataSource<SampleBatch> {
        self.source_with(source, self.pipeline.publish_policy)
    }

    /// Unconnected sink with the configured queue depth.
    #[must_use]
    pub fn sink(&self) -> DataSink<SampleBatch> {
        self.bus.sink(self.pipeline.queue_depth)
    }

    /// Stopped worker draining the topic wired to `sink`.
    pub fn worker(&self, sink: &str) -> AppResult<StreamWorker<SampleBatch>> {
        let topic = self.sink_topic(sink)?;
        Ok(StreamWorker::new(
            format!("{}-{sink}", self.definition.name),
            self.sink(),
            topic,
            self.pipeline.timing(),
        ))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::hardware::MockAirspy;
    use crate::store::MemoryStore;
    use crate::testing::RecordingOrchestrator;
    use std::time::Duration;

    /// Context over fresh fakes with fast thread timing.
    pub(crate) fn context(
        definition: ComponentDefinition,
        bus: &Arc<DataBus<SampleBatch>>,
        driver: &MockAirspy,
    ) -> (ComponentContext, Arc<MemoryStore>, Arc<RecordingOrchestrator>) {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = Arc::new(RecordingOrchestrator::new());
        let pipeline = PipelineConfig {
            receive_timeout_ms: 20,
            start_timeout_ms: 1000,
            stop_timeout_ms: 1000,
            ..PipelineConfig::default()
        };
        let ctx = ComponentContext {
            definition,
            store: store.clone(),
            bus: Arc::clone(bus),
            driver: Arc::new(driver.clone()),
            orchestrator: orchestrator.clone(),
            pipeline,
            command_namespace: "AIRSPYCMDS".to_string(),
        };
        (ctx, store, orchestrator)
    }

    /// Waits until `check` holds or `timeout` elapses.
    pub(crate) fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        check()
    }
}
