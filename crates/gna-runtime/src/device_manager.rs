//! Process-wide registry of opened devices
//!
//! Opening is reference counted per device index: every `open` must be
//! matched by one `close`. The device is torn down by the last `close`,
//! which is refused while models, configurations or requests remain.

use crate::config::DeviceConfig;
use crate::device::Device;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Number of software devices this runtime exposes.
pub const DEVICE_COUNT: u32 = 1;

struct OpenDevice {
    device: Arc<Device>,
    references: u32,
}

static DEVICES: Mutex<BTreeMap<u32, OpenDevice>> = parking_lot::const_mutex(BTreeMap::new());

pub struct DeviceManager;

impl DeviceManager {
    pub fn device_count() -> u32 {
        DEVICE_COUNT
    }

    /// Open `index` with the environment configuration.
    pub fn open(index: u32) -> Result<Arc<Device>> {
        Self::open_with(index, DeviceConfig::from_env())
    }

    /// Open `index`, or take another reference if it is already open.
    ///
    /// `config` only applies to the first open.
    #[tracing::instrument(skip(config))]
    pub fn open_with(index: u32, config: DeviceConfig) -> Result<Arc<Device>> {
        check_index(index)?;
        let mut devices = DEVICES.lock();
        if let Some(open) = devices.get_mut(&index) {
            open.references += 1;
            tracing::debug!(references = open.references, "device_reference_added");
            return Ok(Arc::clone(&open.device));
        }

        let device = Arc::new(Device::open(index, config)?);
        devices.insert(
            index,
            OpenDevice {
                device: Arc::clone(&device),
                references: 1,
            },
        );
        Ok(device)
    }

    /// Drop one reference; the last one stops the device.
    #[tracing::instrument]
    pub fn close(index: u32) -> Result<()> {
        check_index(index)?;
        let mut devices = DEVICES.lock();
        let open = devices.get_mut(&index).ok_or(Error::DeviceNotOpened(index))?;
        if open.references > 1 {
            open.references -= 1;
            tracing::debug!(references = open.references, "device_reference_dropped");
            return Ok(());
        }

        open.device.ensure_idle()?;
        if let Some(open) = devices.remove(&index) {
            open.device.stop();
        }
        tracing::info!(device = index, "device_closed");
        Ok(())
    }

    pub fn get(index: u32) -> Result<Arc<Device>> {
        check_index(index)?;
        DEVICES
            .lock()
            .get(&index)
            .map(|open| Arc::clone(&open.device))
            .ok_or(Error::DeviceNotOpened(index))
    }

    pub fn set_thread_count(index: u32, thread_count: u32) -> Result<()> {
        Self::get(index)?.set_thread_count(thread_count)
    }

    /// References currently held on `index`; zero when closed.
    pub fn open_count(index: u32) -> u32 {
        DEVICES.lock().get(&index).map_or(0, |open| open.references)
    }
}

fn check_index(index: u32) -> Result<()> {
    if index < DEVICE_COUNT {
        Ok(())
    } else {
        Err(Error::DeviceIndexInvalid {
            index,
            available: DEVICE_COUNT,
        })
    }
}
