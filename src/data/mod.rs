//! Signal processing stages applied to sample batches.

pub mod fft;

pub use fft::{FftEngine, TransformError};
