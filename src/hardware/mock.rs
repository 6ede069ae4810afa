//! Simulated AirspyHF+ receiver.
//!
//! `MockAirspy` implements the driver contract in memory. Devices are known by
//! serial; opening one hands out a [`MockDevice`] with a fresh handle. While a
//! device streams, a background thread delivers batches of a noisy tone through
//! the registered callback, the way the native library does from its USB thread.
//!
//! For tests it doubles as a spy and a fault injector:
//! - every call is counted per operation name ([`MockAirspy::call_count`]);
//! - an operation can be made to return a native error code, a driver fault or
//!   to panic ([`MockAirspy::fail_operation`] and friends);
//! - [`MockAirspy::inject_transfer`] pushes a hand-made transfer through the
//!   callback on the caller's thread, for deterministic data-path tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{
    DeviceHandle, HardwareError, HwResult, LibVersion, PartIdSerial, RadioDevice, RadioDriver,
    SampleCallback,
    SampleTransfer,
};
use crate::core::IqSample;

const MAX_FREQ_HZ: u64 = 260_000_000;
const USER_OUTPUT_PINS: u8 = 4;
const HF_ATT_STEPS: u8 = 8;
const PART_ID: u32 = 0x5A32_4B07;

/// Settings of the simulated receiver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MockConfig {
    /// Serials of the attached devices.
    #[serde(default = "default_devices")]
    pub devices: Vec<u64>,

    /// Samples per transfer.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delay between transfers.
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    /// Chance per transfer that the device reports lost samples.
    #[serde(default)]
    pub drop_probability: f64,

    /// Sample rates the devices accept.
    #[serde(default = "default_samplerates")]
    pub samplerates: Vec<u32>,

    /// Produce transfers from a background thread while streaming.
    #[serde(default = "default_generate")]
    pub generate: bool,
}

fn default_devices() -> Vec<u64> {
    vec![0x3B52_AB5D_AC4E_1E3F]
}

fn default_batch_size() -> usize {
    1024
}

fn default_batch_interval_ms() -> u64 {
    100
}

fn default_samplerates() -> Vec<u32> {
    vec![912_000, 768_000, 456_000, 384_000, 256_000, 192_000]
}

fn default_generate() -> bool {
    true
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            devices: default_devices(),
            batch_size: default_batch_size(),
            batch_interval_ms: default_batch_interval_ms(),
            drop_probability: 0.0,
            samplerates: default_samplerates(),
            generate: default_generate(),
        }
    }
}

/// Observable state of one simulated device.
#[derive(Clone, Debug, PartialEq)]
pub struct MockDeviceSnapshot {
    /// Device serial.
    pub serial: u64,
    /// True while a handle is open.
    pub open: bool,
    /// True while streaming.
    pub streaming: bool,
    /// Tuned frequency in Hz.
    pub freq_hz: u64,
    /// Selected sample rate.
    pub samplerate: u32,
    /// Calibration in ppb.
    pub calibration: i32,
    /// Calibration last written to flash.
    pub flashed_calibration: Option<i32>,
    /// Library DSP enabled.
    pub lib_dsp: bool,
    /// IQ correction search point.
    pub iq_correction_point: f32,
    /// IQ balancer parameters.
    pub iq_balancer: [i32; 4],
    /// GPIO levels.
    pub user_outputs: [u8; 4],
    /// HF AGC flag.
    pub hf_agc: u8,
    /// HF AGC threshold flag.
    pub hf_agc_threshold: u8,
    /// HF attenuator step.
    pub hf_att: u8,
}

impl MockDeviceSnapshot {
    fn new(serial: u64, samplerate: u32) -> Self {
        Self {
            serial,
            open: false,
            streaming: false,
            freq_hz: 7_100_000,
            samplerate,
            calibration: 0,
            flashed_calibration: None,
            lib_dsp: true,
            iq_correction_point: 0.0,
            iq_balancer: [0; 4],
            user_outputs: [0; 4],
            hf_agc: 1,
            hf_agc_threshold: 0,
            hf_att: 0,
        }
    }
}

struct DeviceSlot {
    state: MockDeviceSnapshot,
    handle: Option<DeviceHandle>,
    callback: Option<SampleCallback>,
}

#[derive(Clone)]
enum Injected {
    Status(i32),
    Fault(String),
    Panic(String),
}

struct Shared {
    config: MockConfig,
    devices: Mutex<BTreeMap<u64, DeviceSlot>>,
    calls: Mutex<HashMap<&'static str, u64>>,
    injected: Mutex<HashMap<String, Injected>>,
    next_handle: AtomicU64,
}

impl Shared {
    /// Counts the call and applies any injected failure.
    fn enter(&self, operation: &'static str) -> HwResult<()> {
        *self.calls.lock().entry(operation).or_insert(0) += 1;
        let injected = self.injected.lock().get(operation).cloned();
        match injected {
            None => Ok(()),
            Some(Injected::Status(code)) => Err(HardwareError::Failed {
                operation: operation.to_string(),
                code,
            }),
            Some(Injected::Fault(message)) => Err(HardwareError::Fault(message)),
            Some(Injected::Panic(message)) => std::panic::panic_any(message),
        }
    }

    fn with_slot<R>(
        &self,
        serial: u64,
        operation: &'static str,
        f: impl FnOnce(&mut DeviceSlot) -> R,
    ) -> HwResult<R> {
        let mut devices = self.devices.lock();
        devices
            .get_mut(&serial)
            .map(f)
            .ok_or_else(|| HardwareError::failed(operation))
    }

    fn open_device(
        self: &Arc<Self>,
        serial: u64,
        operation: &'static str,
    ) -> HwResult<Box<dyn RadioDevice>> {
        let handle = DeviceHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let opened = self.with_slot(serial, operation, |slot| {
            if slot.state.open {
                return false;
            }
            slot.state.open = true;
            slot.handle = Some(handle);
            true
        })?;
        if !opened {
            return Err(HardwareError::failed(operation));
        }
        tracing::debug!(serial, %handle, "Simulated device opened");
        Ok(Box::new(MockDevice {
            shared: Arc::clone(self),
            serial,
            handle,
            worker: None,
        }))
    }
}

/// Simulated receiver library.
#[derive(Clone)]
pub struct MockAirspy {
    shared: Arc<Shared>,
}

impl MockAirspy {
    /// Creates a simulated library with the configured devices attached.
    pub fn new(config: MockConfig) -> Self {
        let samplerate = config.samplerates.first().copied().unwrap_or(768_000);
        let devices = config
            .devices
            .iter()
            .map(|&serial| {
                (
                    serial,
                    DeviceSlot {
                        state: MockDeviceSnapshot::new(serial, samplerate),
                        handle: None,
                        callback: None,
                    },
                )
            })
            .collect();
        Self {
            shared: Arc::new(Shared {
                config,
                devices: Mutex::new(devices),
                calls: Mutex::new(HashMap::new()),
                injected: Mutex::new(HashMap::new()),
                next_handle: AtomicU64::new(1),
            }),
        }
    }

    /// Devices with the given serials and no background generation.
    pub fn with_devices(serials: &[u64]) -> Self {
        Self::new(MockConfig {
            devices: serials.to_vec(),
            generate: false,
            ..MockConfig::default()
        })
    }

    /// Makes `operation` return a native status `code`.
    pub fn fail_operation(&self, operation: &str, code: i32) {
        self.inject(operation, Injected::Status(code));
    }

    /// Makes `operation` return a driver fault.
    pub fn fault_operation(&self, operation: &str, message: &str) {
        self.inject(operation, Injected::Fault(message.to_string()));
    }

    /// Makes `operation` panic, as a crashing native call would unwind.
    pub fn panic_operation(&self, operation: &str, message: &str) {
        self.inject(operation, Injected::Panic(message.to_string()));
    }

    /// Removes every injected failure.
    pub fn clear_failures(&self) {
        self.shared.injected.lock().clear();
    }

    /// Number of calls made to `operation` so far.
    #[must_use]
    pub fn call_count(&self, operation: &str) -> u64 {
        self.shared.calls.lock().get(operation).copied().unwrap_or(0)
    }

    /// State of the device with `serial`.
    #[must_use]
    pub fn device(&self, serial: u64) -> Option<MockDeviceSnapshot> {
        self.shared
            .devices
            .lock()
            .get(&serial)
            .map(|slot| slot.state.clone())
    }

    /// Delivers a transfer through the device's callback on the calling thread.
    /// Returns false when the device is not streaming.
    pub fn inject_transfer(
        &self,
        serial: u64,
        samples: Vec<IqSample>,
        dropped_samples: u64,
    ) -> bool {
        let target = {
            let devices = self.shared.devices.lock();
            devices.get(&serial).and_then(|slot| match (&slot.callback, slot.handle) {
                (Some(callback), Some(handle)) if slot.state.streaming => {
                    Some((Arc::clone(callback), handle))
                }
                _ => None,
            })
        };
        match target {
            Some((callback, device)) => {
                callback(SampleTransfer {
                    device,
                    samples,
                    dropped_samples,
                });
                true
            }
            None => false,
        }
    }

    fn inject(&self, operation: &str, injected: Injected) {
        self.shared
            .injected
            .lock()
            .insert(operation.to_string(), injected);
    }
}

impl Default for MockAirspy {
    fn default() -> Self {
        Self::new(MockConfig::default())
    }
}

impl RadioDriver for MockAirspy {
    fn lib_version(&self) -> LibVersion {
        *self.shared.calls.lock().entry("lib_version").or_insert(0) += 1;
        LibVersion {
            major: 1,
            minor: 6,
            revision: 8,
        }
    }

    fn list_devices(&self) -> HwResult<Vec<u64>> {
        self.shared.enter("list_devices")?;
        Ok(self.shared.devices.lock().keys().copied().collect())
    }

    fn open(&self) -> HwResult<Box<dyn RadioDevice>> {
        self.shared.enter("open")?;
        let free = self
            .shared
            .devices
            .lock()
            .values()
            .find(|slot| !slot.state.open)
            .map(|slot| slot.state.serial);
        match free {
            Some(serial) => self.shared.open_device(serial, "open"),
            None => Err(HardwareError::failed("open")),
        }
    }

    fn open_sn(&self, serial: u64) -> HwResult<Box<dyn RadioDevice>> {
        self.shared.enter("open_sn")?;
        self.shared.open_device(serial, "open_sn")
    }
}

// =============================================================================
// Device
// =============================================================================

struct StreamThread {
    run: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// An open simulated device.
pub struct MockDevice {
    shared: Arc<Shared>,
    serial: u64,
    handle: DeviceHandle,
    worker: Option<StreamThread>,
}

impl MockDevice {
    fn update<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut MockDeviceSnapshot) -> R,
    ) -> HwResult<R> {
        self.shared.enter(operation)?;
        self.shared.with_slot(self.serial, operation, |slot| f(&mut slot.state))
    }

    fn halt_stream(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.run.store(false, Ordering::Release);
            if worker.handle.join().is_err() {
                tracing::error!(serial = self.serial, "Simulated stream thread panicked");
            }
        }
        let _ = self.shared.with_slot(self.serial, "stop", |slot| {
            slot.state.streaming = false;
            slot.callback = None;
        });
    }

    fn spawn_generator(&self, callback: SampleCallback) -> HwResult<StreamThread> {
        let run = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&run);
        let device = self.handle;
        let batch_size = self.shared.config.batch_size.max(1);
        let interval = Duration::from_millis(self.shared.config.batch_interval_ms);
        let drop_probability = self.shared.config.drop_probability.clamp(0.0, 1.0);

        let handle = thread::Builder::new()
            .name(format!("mock-airspy-{:x}", self.serial))
            .spawn(move || {
                let mut rng = rand::thread_rng();
                let mut phase = 0.0f32;
                let mut dropped = 0u64;
                while flag.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    if rng.gen_bool(drop_probability) {
                        dropped += (batch_size / 4) as u64;
                    }
                    let samples = (0..batch_size)
                        .map(|_| {
                            phase = (phase + 0.05) % std::f32::consts::TAU;
                            IqSample::new(
                                phase.cos() + rng.gen_range(-0.05..0.05),
                                phase.sin() + rng.gen_range(-0.05..0.05),
                            )
                        })
                        .collect();
                    callback(SampleTransfer {
                        device,
                        samples,
                        dropped_samples: dropped,
                    });
                }
            })
            .map_err(|e| HardwareError::Fault(format!("cannot spawn stream thread: {e}")))?;
        Ok(StreamThread { run, handle })
    }
}

impl RadioDevice for MockDevice {
    fn handle(&self) -> DeviceHandle {
        self.handle
    }

    fn serial(&self) -> u64 {
        self.serial
    }

    fn close(mut self: Box<Self>) -> HwResult<()> {
        self.shared.enter("close")?;
        self.halt_stream();
        let _ = self.shared.with_slot(self.serial, "close", |slot| {
            slot.state.open = false;
            slot.handle = None;
        });
        tracing::debug!(serial = self.serial, "Simulated device closed");
        Ok(())
    }

    fn start(&mut self, callback: SampleCallback) -> HwResult<()> {
        self.shared.enter("start")?;
        if self.worker.is_some() || self.is_streaming_now() {
            return Ok(());
        }
        if self.shared.config.generate {
            self.worker = Some(self.spawn_generator(Arc::clone(&callback))?);
        }
        self.shared.with_slot(self.serial, "start", |slot| {
            slot.state.streaming = true;
            slot.callback = Some(callback);
        })
    }

    fn stop(&mut self) -> HwResult<()> {
        self.shared.enter("stop")?;
        self.halt_stream();
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        *self.shared.calls.lock().entry("is_streaming").or_insert(0) += 1;
        self.is_streaming_now()
    }

    fn set_freq(&mut self, freq_hz: u64) -> HwResult<()> {
        if freq_hz == 0 || freq_hz > MAX_FREQ_HZ {
            self.shared.enter("set_freq")?;
            return Err(HardwareError::failed("set_freq"));
        }
        self.update("set_freq", |s| s.freq_hz = freq_hz)
    }

    fn set_lib_dsp(&mut self, enabled: bool) -> HwResult<()> {
        self.update("set_lib_dsp", |s| s.lib_dsp = enabled)
    }

    fn get_samplerates(&mut self) -> HwResult<Vec<u32>> {
        self.shared.enter("get_samplerates")?;
        Ok(self.shared.config.samplerates.clone())
    }

    fn set_samplerate(&mut self, samplerate: u32) -> HwResult<()> {
        let supported = self.shared.config.samplerates.contains(&samplerate);
        let applied = self.update("set_samplerate", |s| {
            if supported {
                s.samplerate = samplerate;
            }
        });
        match applied {
            Ok(()) if !supported => Err(HardwareError::failed("set_samplerate")),
            other => other,
        }
    }

    fn get_calibration(&mut self) -> HwResult<i32> {
        self.update("get_calibration", |s| s.calibration)
    }

    fn set_calibration(&mut self, ppb: i32) -> HwResult<()> {
        self.update("set_calibration", |s| s.calibration = ppb)
    }

    fn set_optimal_iq_correction_point(&mut self, w: f32) -> HwResult<()> {
        self.update("set_optimal_iq_correction_point", |s| s.iq_correction_point = w)
    }

    fn iq_balancer_configure(
        &mut self,
        buffers_to_skip: i32,
        fft_integration: i32,
        fft_overlap: i32,
        correlation_integration: i32,
    ) -> HwResult<()> {
        self.update("iq_balancer_configure", |s| {
            s.iq_balancer = [
                buffers_to_skip,
                fft_integration,
                fft_overlap,
                correlation_integration,
            ];
        })
    }

    fn flash_calibration(&mut self) -> HwResult<()> {
        self.update("flash_calibration", |s| s.flashed_calibration = Some(s.calibration))
    }

    fn board_partid_serialno_read(&mut self) -> HwResult<PartIdSerial> {
        let serial = self.serial;
        self.update("board_partid_serialno_read", |_| PartIdSerial {
            part_id: PART_ID,
            serial_no: [0, 0, (serial >> 32) as u32, serial as u32],
        })
    }

    fn version_string_read(&mut self) -> HwResult<String> {
        self.shared.enter("version_string_read")?;
        Ok("R3.0.7-CD".to_string())
    }

    fn set_user_output(&mut self, pin: u8, value: u8) -> HwResult<()> {
        let valid = pin < USER_OUTPUT_PINS && value <= 1;
        let applied = self.update("set_user_output", |s| {
            if valid {
                s.user_outputs[usize::from(pin)] = value;
            }
        });
        match applied {
            Ok(()) if !valid => Err(HardwareError::failed("set_user_output")),
            other => other,
        }
    }

    fn set_hf_agc(&mut self, flag: u8) -> HwResult<()> {
        self.update("set_hf_agc", |s| s.hf_agc = flag)
    }

    fn set_hf_agc_threshold(&mut self, flag: u8) -> HwResult<()> {
        self.update("set_hf_agc_threshold", |s| s.hf_agc_threshold = flag)
    }

    fn set_hf_att(&mut self, att_index: u8) -> HwResult<()> {
        let valid = att_index <= HF_ATT_STEPS;
        let applied = self.update("set_hf_att", |s| {
            if valid {
                s.hf_att = att_index;
            }
        });
        match applied {
            Ok(()) if !valid => Err(HardwareError::failed("set_hf_att")),
            other => other,
        }
    }
}

impl MockDevice {
    fn is_streaming_now(&self) -> bool {
        self.shared
            .devices
            .lock()
            .get(&self.serial)
            .is_some_and(|slot| slot.state.streaming)
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.halt_stream();
        let handle = self.handle;
        if let Some(slot) = self.shared.devices.lock().get_mut(&self.serial) {
            if slot.handle == Some(handle) {
                slot.state.open = false;
                slot.handle = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    const SERIAL: u64 = 0xDEAD_BEEF;

    #[test]
    fn enumerates_and_opens() {
        let driver = MockAirspy::with_devices(&[2, 1]);
        assert_eq!(driver.list_devices().unwrap(), vec![1, 2]);

        let first = driver.open().unwrap();
        assert_eq!(first.serial(), 1);
        let second = driver.open().unwrap();
        assert_eq!(second.serial(), 2);
        assert_ne!(first.handle(), second.handle());
        assert!(driver.open().is_err());
    }

    #[test]
    fn open_sn_rejects_unknown_and_busy() {
        let driver = MockAirspy::with_devices(&[SERIAL]);
        assert!(driver.open_sn(7).is_err());
        let device = driver.open_sn(SERIAL).unwrap();
        assert!(driver.open_sn(SERIAL).is_err());

        device.close().unwrap();
        assert!(!driver.device(SERIAL).unwrap().open);
        assert!(driver.open_sn(SERIAL).is_ok());
    }

    #[test]
    fn settings_are_recorded() {
        let driver = MockAirspy::with_devices(&[SERIAL]);
        let mut device = driver.open_sn(SERIAL).unwrap();
        device.set_freq(145_000_000).unwrap();
        device.set_calibration(-120).unwrap();
        device.flash_calibration().unwrap();
        device.set_user_output(2, 1).unwrap();
        assert!(device.set_user_output(4, 1).is_err());
        assert!(device.set_samplerate(1).is_err());

        let state = driver.device(SERIAL).unwrap();
        assert_eq!(state.freq_hz, 145_000_000);
        assert_eq!(state.flashed_calibration, Some(-120));
        assert_eq!(state.user_outputs, [0, 0, 1, 0]);
        assert_eq!(driver.call_count("set_user_output"), 2);
    }

    #[test]
    fn injected_status_is_returned() {
        let driver = MockAirspy::with_devices(&[SERIAL]);
        let mut device = driver.open_sn(SERIAL).unwrap();
        driver.fail_operation("set_hf_att", -5);
        assert_eq!(
            device.set_hf_att(1),
            Err(HardwareError::Failed {
                operation: "set_hf_att".into(),
                code: -5
            })
        );
        driver.clear_failures();
        assert!(device.set_hf_att(1).is_ok());
    }

    #[test]
    fn inject_transfer_requires_streaming() {
        let driver = MockAirspy::with_devices(&[SERIAL]);
        let mut device = driver.open_sn(SERIAL).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);

        assert!(!driver.inject_transfer(SERIAL, vec![IqSample::new(0.0, 0.0)], 0));
        device
            .start(Arc::new(move |transfer: SampleTransfer| {
                counter.fetch_add(transfer.samples.len(), Ordering::Relaxed);
            }))
            .unwrap();
        assert!(device.is_streaming());
        assert!(driver.inject_transfer(SERIAL, vec![IqSample::new(0.0, 0.0); 4], 0));
        assert_eq!(seen.load(Ordering::Relaxed), 4);

        device.stop().unwrap();
        assert!(!device.is_streaming());
    }

    #[test]
    fn generator_streams_until_stopped() {
        let driver = MockAirspy::new(MockConfig {
            devices: vec![SERIAL],
            batch_size: 16,
            batch_interval_ms: 1,
            drop_probability: 0.5,
            ..MockConfig::default()
        });
        let mut device = driver.open_sn(SERIAL).unwrap();
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        device
            .start(Arc::new(move |transfer: SampleTransfer| {
                sink.lock().push((transfer.samples.len(), transfer.dropped_samples));
            }))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while batches.lock().len() < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        device.close().unwrap();

        let batches = batches.lock();
        assert!(batches.len() >= 5);
        assert!(batches.iter().all(|(len, _)| *len == 16));
        assert!(batches.windows(2).all(|w| w[0].1 <= w[1].1));
    }
}
