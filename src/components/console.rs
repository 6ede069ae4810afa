//! Terminal consumer that logs a summary of every batch it receives.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::SampleBatch;
use crate::error::AppResult;
use crate::lifecycle::{Component, LifecycleError};
use crate::pipeline::StreamWorker;

use super::{ComponentContext, CONSOLE_DISPLAY, INPUT_SINK};

const PREVIEW_LEN: usize = 3;

/// Logs `sample_count`, `dropped_samples` and the first samples of each batch.
pub struct ConsoleDisplay {
    name: String,
    worker: StreamWorker<SampleBatch>,
    displayed: Arc<AtomicU64>,
}

impl ConsoleDisplay {
    /// Builds the display; `input_data` must be wired.
    pub fn new(ctx: &ComponentContext) -> AppResult<Self> {
        Ok(Self {
            name: ctx.name().to_string(),
            worker: ctx.worker(INPUT_SINK)?,
            displayed: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Batches logged so far.
    #[must_use]
    pub fn displayed(&self) -> u64 {
        self.displayed.load(Ordering::Relaxed)
    }
}

fn log_batch(component: &str, batch: &SampleBatch) {
    tracing::info!(
        component,
        sample_count = batch.sample_count(),
        dropped_samples = batch.dropped_samples,
        first = %preview(batch),
        "Batch received"
    );
}

fn preview(batch: &SampleBatch) -> String {
    let shown: Vec<String> = batch
        .samples
        .iter()
        .take(PREVIEW_LEN)
        .map(|s| format!("({:.4}, {:.4})", s.re, s.im))
        .collect();
    format!("[{}]", shown.join(", "))
}

impl Component for ConsoleDisplay {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        CONSOLE_DISPLAY
    }

    fn on_start(&mut self) -> Result<(), LifecycleError> {
        let name = self.name.clone();
        let displayed = Arc::clone(&self.displayed);
        self.worker.start(move |batch: SampleBatch| {
            displayed.fetch_add(1, Ordering::Relaxed);
            log_batch(&name, &batch);
        })
    }

    fn on_stop(&mut self) -> Result<(), LifecycleError> {
        self.worker.stop()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
