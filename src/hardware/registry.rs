//! Serial <-> handle bookkeeping for open devices.
//!
//! The registry owns the forward map (serial -> open device) and a reverse
//! [`StreamerIndex`] (handle -> serial). It has no locking of its own: it lives
//! inside the command dispatcher's serialized context and is only touched by
//! command handlers.
//!
//! The reverse index is the one piece shared with the driver's streaming thread.
//! That thread only ever calls [`StreamerIndex::try_resolve`], which never waits.
//! `close` removes the handle from both maps before the native close, so a
//! transfer racing with the close resolves to nothing and is dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use super::{DeviceHandle, HardwareError, RadioDevice, RadioDriver};

/// Registry failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A handle is already open for the serial.
    #[error("device {0:#x} is already open")]
    AlreadyOpen(u64),

    /// No handle is open for the serial.
    #[error("device {0:#x} is not open")]
    NotFound(u64),

    /// The handle is unknown to the reverse index.
    #[error("{0} is not streaming")]
    NotStreaming(DeviceHandle),

    /// The native call failed.
    #[error(transparent)]
    Hardware(#[from] HardwareError),
}

/// Handle -> serial index readable from driver threads.
#[derive(Clone, Default)]
pub struct StreamerIndex(Arc<RwLock<HashMap<DeviceHandle, u64>>>);

impl StreamerIndex {
    /// Resolves a handle without waiting. `None` on a miss or when the index is
    /// being modified.
    #[must_use]
    pub fn try_resolve(&self, handle: DeviceHandle) -> Option<u64> {
        self.0.try_read()?.get(&handle).copied()
    }

    fn resolve(&self, handle: DeviceHandle) -> Option<u64> {
        self.0.read().get(&handle).copied()
    }

    fn insert(&self, handle: DeviceHandle, serial: u64) {
        self.0.write().insert(handle, serial);
    }

    fn remove(&self, handle: DeviceHandle) {
        self.0.write().remove(&handle);
    }

    /// Number of indexed handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// True when no handle is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }
}

/// Open devices keyed by serial.
pub struct DeviceRegistry {
    driver: Arc<dyn RadioDriver>,
    devices: BTreeMap<u64, Box<dyn RadioDevice>>,
    streamers: StreamerIndex,
}

impl DeviceRegistry {
    /// Creates an empty registry over `driver`.
    pub fn new(driver: Arc<dyn RadioDriver>) -> Self {
        Self {
            driver,
            devices: BTreeMap::new(),
            streamers: StreamerIndex::default(),
        }
    }

    /// The driver library.
    #[must_use]
    pub fn driver(&self) -> &dyn RadioDriver {
        self.driver.as_ref()
    }

    /// Shared reverse index for the streaming callback.
    #[must_use]
    pub fn streamers(&self) -> StreamerIndex {
        self.streamers.clone()
    }

    /// Opens a device by serial, or the first available one.
    ///
    /// A serial that is already open is rejected before any native call.
    pub fn open(&mut self, serial: Option<u64>) -> Result<u64, RegistryError> {
        let device = match serial {
            Some(serial) => {
                if self.devices.contains_key(&serial) {
                    return Err(RegistryError::AlreadyOpen(serial));
                }
                self.driver.open_sn(serial)?
            }
            None => self.driver.open()?,
        };

        let serial = device.serial();
        if self.devices.contains_key(&serial) {
            device.close()?;
            return Err(RegistryError::AlreadyOpen(serial));
        }

        let handle = device.handle();
        self.streamers.insert(handle, serial);
        self.devices.insert(serial, device);
        tracing::info!(serial, %handle, "Device opened");
        Ok(serial)
    }

    /// Closes a device. Both maps forget it before the native close runs.
    pub fn close(&mut self, serial: u64) -> Result<(), RegistryError> {
        let device = self
            .devices
            .remove(&serial)
            .ok_or(RegistryError::NotFound(serial))?;
        self.streamers.remove(device.handle());
        device.close()?;
        tracing::info!(serial, "Device closed");
        Ok(())
    }

    /// The open device for `serial`.
    pub fn lookup(
        &mut self,
        serial: u64,
    ) -> Result<&mut (dyn RadioDevice + 'static), RegistryError> {
        match self.devices.get_mut(&serial) {
            Some(device) => Ok(device.as_mut()),
            None => Err(RegistryError::NotFound(serial)),
        }
    }

    /// Serial owning `handle`.
    pub fn streaming_owner(&self, handle: DeviceHandle) -> Result<u64, RegistryError> {
        self.streamers
            .resolve(handle)
            .ok_or(RegistryError::NotStreaming(handle))
    }

    /// True when a handle is open for `serial`.
    #[must_use]
    pub fn contains(&self, serial: u64) -> bool {
        self.devices.contains_key(&serial)
    }

    /// Serials of all open devices, ascending.
    #[must_use]
    pub fn serials(&self) -> Vec<u64> {
        self.devices.keys().copied().collect()
    }

    /// Number of open devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True when nothing is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Stops and closes every open device, collecting failures.
    pub fn close_all(&mut self) -> Vec<(u64, RegistryError)> {
        let mut failures = Vec::new();
        for serial in self.serials() {
            if let Ok(device) = self.lookup(serial) {
                if device.is_streaming() {
                    if let Err(e) = device.stop() {
                        failures.push((serial, e.into()));
                    }
                }
            }
            if let Err(e) = self.close(serial) {
                failures.push((serial, e));
            }
        }
        failures
    }
}
