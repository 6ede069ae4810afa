//! Core data types shared by every layer of the acquisition chain.
//!
//! # Data Flow
//!
//! ```text
//! receiver callback --[SampleBatch]--> airspy.iq_data --> FFT thread
//!                                                          |
//!                                   display <-- fft.fft_data <--[SampleBatch]
//! ```
//!
//! Batches are moved, never shared: a published batch is owned by the queue and
//! then by whichever consumer receives it.

use std::fmt;
use std::str::FromStr;

use num_complex::Complex32;
use serde::{Deserialize, Serialize};

// =============================================================================
// Sample Data
// =============================================================================

/// One complex baseband sample.
pub type IqSample = Complex32;

/// An ordered block of IQ samples plus the receiver's dropped-sample counter.
///
/// `dropped_samples` is the driver's running total for the current streaming
/// session. It never decreases while a session lasts and resets to zero when
/// streaming restarts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleBatch {
    /// Samples in acquisition order.
    pub samples: Vec<IqSample>,
    /// Samples the driver reports as lost so far in this session.
    pub dropped_samples: u64,
}

impl SampleBatch {
    /// Creates a batch from received samples.
    pub fn new(samples: Vec<IqSample>, dropped_samples: u64) -> Self {
        Self {
            samples,
            dropped_samples,
        }
    }

    /// Number of samples carried, always equal to `samples.len()`.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// True when the batch carries no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Replaces the payload while keeping the dropped-sample counter.
    #[must_use]
    pub fn with_samples(self, samples: Vec<IqSample>) -> Self {
        Self {
            samples,
            dropped_samples: self.dropped_samples,
        }
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Lifecycle state of a component.
///
/// `Starting` and `Stopping` are transient and only observable while a
/// transition is in progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentState {
    /// Constructed, command handlers not attached.
    Standby,
    /// Transition towards `Running` in progress.
    Starting,
    /// Command handlers attached, not acquiring.
    Ready,
    /// Acquisition thread is in its loop.
    Running,
    /// Transition out of `Running` in progress.
    Stopping,
}

impl ComponentState {
    /// True for `Starting` and `Stopping`.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Standby => "Standby",
            Self::Starting => "Starting",
            Self::Ready => "Ready",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
        };
        f.write_str(name)
    }
}

impl FromStr for ComponentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Standby" => Ok(Self::Standby),
            "Starting" => Ok(Self::Starting),
            "Ready" => Ok(Self::Ready),
            "Running" => Ok(Self::Running),
            "Stopping" => Ok(Self::Stopping),
            other => Err(format!("unknown component state '{other}'")),
        }
    }
}

/// Phase events delivered by the orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseEvent {
    /// Standby -> Ready.
    Ready,
    /// Ready -> Standby.
    Standby,
    /// Standby/Ready -> Running.
    Start,
    /// Running -> resting state.
    Stop,
}

impl fmt::Display for PhaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "ready",
            Self::Standby => "standby",
            Self::Start => "start",
            Self::Stop => "stop",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_count_tracks_payload() {
        let batch = SampleBatch::new(vec![IqSample::new(1.0, -1.0); 4], 2);
        assert_eq!(batch.sample_count(), 4);
        assert!(!batch.is_empty());

        let replaced = batch.with_samples(Vec::new());
        assert_eq!(replaced.sample_count(), 0);
        assert_eq!(replaced.dropped_samples, 2);
    }

    #[test]
    fn state_names_parse_back() {
        for state in [
            ComponentState::Standby,
            ComponentState::Starting,
            ComponentState::Ready,
            ComponentState::Running,
            ComponentState::Stopping,
        ] {
            assert_eq!(state.to_string().parse::<ComponentState>(), Ok(state));
        }
        assert!("Paused".parse::<ComponentState>().is_err());
    }

    #[test]
    fn transient_states() {
        assert!(ComponentState::Starting.is_transient());
        assert!(ComponentState::Stopping.is_transient());
        assert!(!ComponentState::Ready.is_transient());
    }
}
