//! Forward DFT of IQ sample batches.
//!
//! [`FftEngine`] keeps a single plan keyed by transform length. Consecutive
//! batches of the same length reuse it; a batch of a different length replaces it.
//! The engine is synchronous and not reentrant: every call takes `&mut self`, and
//! it is meant to be owned by exactly one acquisition thread.

use std::sync::Arc;

use rustfft::{Fft, FftPlanner};
use thiserror::Error;

use crate::core::{IqSample, SampleBatch};

/// Errors produced by [`FftEngine`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// A zero-length input has no defined transform.
    #[error("cannot transform an empty batch")]
    EmptyBatch,
}

/// Cached-plan forward FFT.
pub struct FftEngine {
    planner: FftPlanner<f32>,
    plan: Option<(usize, Arc<dyn Fft<f32>>)>,
    scratch: Vec<IqSample>,
    plans_built: u64,
}

impl FftEngine {
    /// Creates an engine with no plan cached.
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            plan: None,
            scratch: Vec::new(),
            plans_built: 0,
        }
    }

    /// Length of the cached plan, if any.
    #[must_use]
    pub fn plan_len(&self) -> Option<usize> {
        self.plan.as_ref().map(|(len, _)| *len)
    }

    /// Number of plans built over the engine's lifetime.
    #[must_use]
    pub fn plans_built(&self) -> u64 {
        self.plans_built
    }

    /// Transforms `samples` in place and hands the buffer back.
    ///
    /// Output is unnormalized: `X[k] = sum_n x[n] * exp(-2*pi*i*k*n/N)`.
    pub fn forward(&mut self, mut samples: Vec<IqSample>) -> Result<Vec<IqSample>, TransformError> {
        let len = samples.len();
        if len == 0 {
            return Err(TransformError::EmptyBatch);
        }

        let fft = self.plan_for(len);
        let scratch_len = fft.get_inplace_scratch_len();
        if self.scratch.len() < scratch_len {
            self.scratch.resize(scratch_len, IqSample::new(0.0, 0.0));
        }
        fft.process_with_scratch(&mut samples, &mut self.scratch[..scratch_len]);
        Ok(samples)
    }

    /// Transforms a batch, preserving its dropped-sample counter.
    pub fn transform(&mut self, mut batch: SampleBatch) -> Result<SampleBatch, TransformError> {
        let spectrum = self.forward(std::mem::take(&mut batch.samples))?;
        Ok(batch.with_samples(spectrum))
    }

    fn plan_for(&mut self, len: usize) -> Arc<dyn Fft<f32>> {
        match &self.plan {
            Some((cached, fft)) if *cached == len => Arc::clone(fft),
            _ => {
                let fft = self.planner.plan_fft_forward(len);
                self.plans_built += 1;
                tracing::debug!(len, plans_built = self.plans_built, "Built FFT plan");
                self.plan = Some((len, Arc::clone(&fft)));
                fft
            }
        }
    }
}

impl Default for FftEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FftEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftEngine")
            .field("plan_len", &self.plan_len())
            .field("plans_built", &self.plans_built)
            .finish()
    }
}
