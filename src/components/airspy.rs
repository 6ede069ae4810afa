//! Receiver front-end component.
//!
//! Owns the device registry (inside its command dispatcher) and the `iq_data`
//! source. The driver's streaming callback runs on a thread the driver owns; it
//! resolves the handle with [`StreamerIndex::try_resolve`] and hands the batch to
//! [`DataSource::try_publish`]. Neither call waits, so a slow consumer or a
//! concurrent `close` costs a dropped batch, never a stalled driver.
//!
//! Batches are only forwarded while the component is Running. Command handlers
//! are attached on Ready and detached on Standby.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::command::{airspy_commands, CommandDispatcher, DispatchContext, DispatchError};
use crate::core::SampleBatch;
use crate::error::{AppResult, SdrmError};
use crate::hardware::{DeviceRegistry, SampleCallback, SampleTransfer, StreamerIndex};
use crate::lifecycle::{Component, LifecycleError, Orchestrator};
use crate::pipeline::DataSource;
use crate::store::SubscriptionId;

use super::{ComponentContext, AIRSPY_COMPONENT, IQ_SOURCE};

#[derive(Default)]
struct Counters {
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

/// AirspyHF+ front-end: command surface plus IQ source.
pub struct AirspyComponent {
    name: String,
    dispatcher: Arc<CommandDispatcher>,
    orchestrator: Arc<dyn Orchestrator>,
    subscriptions: Vec<SubscriptionId>,
    publishing: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl AirspyComponent {
    /// Builds the component; no device is opened until a command asks for one.
    pub fn new(ctx: &ComponentContext) -> AppResult<Self> {
        let registry = DeviceRegistry::new(Arc::clone(&ctx.driver));
        let publishing = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());
        let on_samples = sample_handoff(
            registry.streamers(),
            ctx.source(IQ_SOURCE),
            Arc::clone(&publishing),
            Arc::clone(&counters),
        );

        let dispatcher = CommandDispatcher::new(
            ctx.command_namespace.clone(),
            airspy_commands(),
            DispatchContext::new(registry, on_samples),
            Arc::clone(&ctx.store),
        );

        tracing::debug!(
            component = %ctx.name(),
            topic = %ctx.topic(IQ_SOURCE),
            "Receiver component created"
        );
        Ok(Self {
            name: ctx.name().to_string(),
            dispatcher,
            orchestrator: Arc::clone(&ctx.orchestrator),
            subscriptions: Vec::new(),
            publishing,
            counters,
        })
    }

    /// The command dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    /// True while transfers are forwarded to the IQ source.
    #[must_use]
    pub fn is_publishing(&self) -> bool {
        self.publishing.load(Ordering::Acquire)
    }

    /// Batches handed to the IQ source.
    #[must_use]
    pub fn batches_forwarded(&self) -> u64 {
        self.counters.forwarded.load(Ordering::Relaxed)
    }

    /// Transfers discarded on the callback path.
    #[must_use]
    pub fn batches_dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    fn detach_commands(&mut self) {
        if !self.subscriptions.is_empty() {
            self.dispatcher.unsubscribe(&self.subscriptions);
            self.subscriptions.clear();
        }
    }
}

fn sample_handoff(
    streamers: StreamerIndex,
    source: DataSource<SampleBatch>,
    publishing: Arc<AtomicBool>,
    counters: Arc<Counters>,
) -> SampleCallback {
    Arc::new(move |transfer: SampleTransfer| {
        if !publishing.load(Ordering::Acquire) {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let Some(serial) = streamers.try_resolve(transfer.device) else {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(device = %transfer.device, "Transfer from unresolved handle dropped");
            return;
        };

        let batch = SampleBatch::new(transfer.samples, transfer.dropped_samples);
        let report = source.try_publish(batch);
        if report.dropped > 0 {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(serial, topic = %source.topic(), "Queue full, IQ batch dropped");
        }
        if report.delivered > 0 {
            counters.forwarded.fetch_add(1, Ordering::Relaxed);
        }
    })
}

impl Component for AirspyComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        AIRSPY_COMPONENT
    }

    fn on_ready(&mut self) -> Result<(), LifecycleError> {
        let component = self.name.clone();
        let orchestrator = Arc::clone(&self.orchestrator);
        let on_fault = Arc::new(move |err: DispatchError| {
            orchestrator.report_fault(&component, &SdrmError::Dispatch(err));
        });
        self.subscriptions = self.dispatcher.subscribe(on_fault)?;
        tracing::info!(
            component = %self.name,
            namespace = %self.dispatcher.namespace(),
            commands = self.subscriptions.len(),
            "Accepting commands"
        );
        Ok(())
    }

    fn on_standby(&mut self) -> Result<(), LifecycleError> {
        self.detach_commands();
        Ok(())
    }

    fn on_start(&mut self) -> Result<(), LifecycleError> {
        self.publishing.store(true, Ordering::Release);
        Ok(())
    }

    fn on_stop(&mut self) -> Result<(), LifecycleError> {
        self.publishing.store(false, Ordering::Release);
        tracing::debug!(
            component = %self.name,
            forwarded = self.batches_forwarded(),
            dropped = self.batches_dropped(),
            "IQ forwarding paused"
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for AirspyComponent {
    fn drop(&mut self) {
        self.publishing.store(false, Ordering::Release);
        self.detach_commands();
        let failures = self.dispatcher.with_context(|ctx| ctx.registry().close_all());
        for (serial, err) in failures {
            tracing::warn!(
                component = %self.name,
                serial,
                error = %err,
                "Device did not close cleanly"
            );
        }
    }
}
