//! Receiver driver contract.
//!
//! The AirspyHF+ library is an opaque handle plus a fixed set of imperative
//! calls returning a status code. [`RadioDriver`] covers the library-level calls
//! (version, enumeration, open) and [`RadioDevice`] the per-handle calls. Both are
//! object safe so the dispatcher can hold any implementation behind a `Box`.
//!
//! # Streaming callback
//!
//! [`RadioDevice::start`] registers a [`SampleCallback`] that the driver invokes
//! once per transfer on a thread it owns. The callback must return quickly and
//! must never block; see [`crate::components::airspy`] for the hand-off.

pub mod mock;
pub mod registry;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::IqSample;

pub use mock::{MockAirspy, MockConfig};
pub use registry::{DeviceRegistry, RegistryError, StreamerIndex};

/// Native status code for a generic failure.
pub const AIRSPYHF_ERROR: i32 = -1;

/// Opaque identifier of an open device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceHandle(u64);

impl DeviceHandle {
    /// Wraps a raw handle value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw handle value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle#{}", self.0)
    }
}

/// One transfer delivered by a streaming device.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleTransfer {
    /// Device that produced the samples.
    pub device: DeviceHandle,
    /// Samples in acquisition order.
    pub samples: Vec<IqSample>,
    /// Running total of samples the device has lost this session.
    pub dropped_samples: u64,
}

/// Per-transfer callback invoked on a driver-owned thread.
pub type SampleCallback = Arc<dyn Fn(SampleTransfer) + Send + Sync>;

/// Library version triple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Revision.
    pub revision: u32,
}

/// Board part id and the four-word serial number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartIdSerial {
    /// Part identifier.
    pub part_id: u32,
    /// Serial number words, most significant first.
    pub serial_no: [u32; 4],
}

/// Driver failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    /// A native call returned a non-success status.
    #[error("{operation} failed with native status {code}")]
    Failed {
        /// Native operation name.
        operation: String,
        /// Native return code.
        code: i32,
    },

    /// The driver hit an unexpected runtime condition.
    #[error("driver fault: {0}")]
    Fault(String),
}

impl HardwareError {
    /// Generic native failure for `operation`.
    pub fn failed(operation: &str) -> Self {
        Self::Failed {
            operation: operation.to_string(),
            code: AIRSPYHF_ERROR,
        }
    }
}

/// Result alias for driver calls.
pub type HwResult<T> = Result<T, HardwareError>;

/// Library-level driver calls.
pub trait RadioDriver: Send + Sync {
    /// Version of the native library.
    fn lib_version(&self) -> LibVersion;

    /// Serials of all attached devices.
    fn list_devices(&self) -> HwResult<Vec<u64>>;

    /// Opens the first available device.
    fn open(&self) -> HwResult<Box<dyn RadioDevice>>;

    /// Opens the device with the given serial.
    fn open_sn(&self, serial: u64) -> HwResult<Box<dyn RadioDevice>>;
}

/// Calls on one open device.
pub trait RadioDevice: Send {
    /// Handle identifying this open device in sample transfers.
    fn handle(&self) -> DeviceHandle;

    /// Serial of the device.
    fn serial(&self) -> u64;

    /// Releases the device, stopping any stream first.
    fn close(self: Box<Self>) -> HwResult<()>;

    /// Starts streaming; `callback` runs once per transfer.
    fn start(&mut self, callback: SampleCallback) -> HwResult<()>;

    /// Stops streaming.
    fn stop(&mut self) -> HwResult<()>;

    /// True while streaming.
    fn is_streaming(&self) -> bool;

    /// Tunes the receiver, in Hz.
    fn set_freq(&mut self, freq_hz: u64) -> HwResult<()>;

    /// Enables or disables the library-side DSP.
    fn set_lib_dsp(&mut self, enabled: bool) -> HwResult<()>;

    /// Supported sample rates, in samples per second.
    fn get_samplerates(&mut self) -> HwResult<Vec<u32>>;

    /// Selects a sample rate.
    fn set_samplerate(&mut self, samplerate: u32) -> HwResult<()>;

    /// Current frequency calibration, in ppb.
    fn get_calibration(&mut self) -> HwResult<i32>;

    /// Sets the frequency calibration, in ppb.
    fn set_calibration(&mut self, ppb: i32) -> HwResult<()>;

    /// Sets the IQ correction search point.
    fn set_optimal_iq_correction_point(&mut self, w: f32) -> HwResult<()>;

    /// Configures the IQ balancer.
    fn iq_balancer_configure(
        &mut self,
        buffers_to_skip: i32,
        fft_integration: i32,
        fft_overlap: i32,
        correlation_integration: i32,
    ) -> HwResult<()>;

    /// Writes the current calibration to flash.
    fn flash_calibration(&mut self) -> HwResult<()>;

    /// Reads the board part id and serial.
    fn board_partid_serialno_read(&mut self) -> HwResult<PartIdSerial>;

    /// Firmware version string.
    fn version_string_read(&mut self) -> HwResult<String>;

    /// Drives a user GPIO pin.
    fn set_user_output(&mut self, pin: u8, value: u8) -> HwResult<()>;

    /// Enables or disables the HF AGC.
    fn set_hf_agc(&mut self, flag: u8) -> HwResult<()>;

    /// Selects the HF AGC threshold.
    fn set_hf_agc_threshold(&mut self, flag: u8) -> HwResult<()>;

    /// Sets the HF attenuator step.
    fn set_hf_att(&mut self, att_index: u8) -> HwResult<()>;
}
