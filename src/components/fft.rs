//! Spectrum stage: `input_data` -> FFT -> `fft_data`.
//!
//! Each Running session gets a fresh [`FftEngine`] owned by the worker thread,
//! so plan state is never shared. An empty batch is a contract violation by the
//! producer; it is logged and dropped and the loop carries on.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::SampleBatch;
use crate::data::FftEngine;
use crate::error::AppResult;
use crate::lifecycle::{Component, LifecycleError};
use crate::pipeline::{DataSource, StreamWorker};

use super::{ComponentContext, FFT_COMPONENT, FFT_SOURCE, INPUT_SINK};

/// Transforms every received batch and republishes the spectrum.
pub struct FftComponent {
    name: String,
    worker: StreamWorker<SampleBatch>,
    source: DataSource<SampleBatch>,
    transformed: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
}

impl FftComponent {
    /// Builds the stage from its definition; `input_data` must be wired.
    pub fn new(ctx: &ComponentContext) -> AppResult<Self> {
        let worker = ctx.worker(INPUT_SINK)?;
        Ok(Self {
            name: ctx.name().to_string(),
            worker,
            source: ctx.source(FFT_SOURCE),
            transformed: Arc::new(AtomicU64::new(0)),
            rejected: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Batches transformed and published.
    #[must_use]
    pub fn transformed(&self) -> u64 {
        self.transformed.load(Ordering::Relaxed)
    }

    /// Batches dropped because they could not be transformed.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// True while the worker thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }
}

impl Component for FftComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        FFT_COMPONENT
    }

    fn on_start(&mut self) -> Result<(), LifecycleError> {
        let name = self.name.clone();
        let source = self.source.clone();
        let transformed = Arc::clone(&self.transformed);
        let rejected = Arc::clone(&self.rejected);
        let mut engine = FftEngine::new();

        self.worker.start(move |batch: SampleBatch| {
            let len = batch.sample_count();
            match engine.transform(batch) {
                Ok(spectrum) => {
                    source.publish(spectrum);
                    transformed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    rejected.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(component = %name, len, error = %e, "Batch dropped");
                }
            }
        })?;
        tracing::info!(
            component = %self.name,
            input = %self.worker.input_topic(),
            output = %self.source.topic(),
            "FFT stage running"
        );
        Ok(())
    }

    fn on_stop(&mut self) -> Result<(), LifecycleError> {
        self.worker.stop()?;
        tracing::info!(
            component = %self.name,
            transformed = self.transformed(),
            rejected = self.rejected(),
            "FFT stage stopped"
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
