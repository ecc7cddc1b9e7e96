//! Driver Module - state of the HAL plugin and its virtual devices
//!
//! The plugin publishes three endpoints (passthrough, UI, null). Visibility
//! is toggled through custom "active" properties on the plugin object; the
//! timing tunables live on the passthrough device.

#[cfg(target_os = "macos")]
mod coreaudio_hal;
mod hal;
mod installer;
mod memory;
mod selector;

#[cfg(target_os = "macos")]
pub use coreaudio_hal::CoreAudioHal;
pub use hal::{
    AudioHal, AudioObjectId, PropertyAddress, PropertyScope, BOOL_PAYLOAD_SIZE, ELEMENT_MAIN,
    SYSTEM_OBJECT,
};
pub use installer::{OsascriptRunner, ScriptRunner};
pub use memory::{HalCall, MemoryHal};
pub use selector::PropertySelector;

use crate::config::DriverIdentity;
use crate::error::{DriverError, DriverResult, OsStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Virtual endpoint published by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Passthrough,
    Ui,
    Null,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 3] = [DeviceKind::Passthrough, DeviceKind::Ui, DeviceKind::Null];

    /// Selector of the "active" flag on the plugin object
    pub fn active_selector(&self) -> PropertySelector {
        match self {
            DeviceKind::Passthrough => PropertySelector::PASSTHROUGH_ACTIVE,
            DeviceKind::Ui => PropertySelector::UI_ACTIVE,
            DeviceKind::Null => PropertySelector::NULL_ACTIVE,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceKind::Passthrough => "passthrough",
            DeviceKind::Ui => "ui",
            DeviceKind::Null => "null",
        };
        f.write_str(name)
    }
}

/// A discovered driver device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub kind: DeviceKind,
    pub uid: String,
    pub id: AudioObjectId,
}

/// What a visibility write did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// No plugin registered, nothing was written
    NotInstalled,
}

/// Reads and writes driver state through an injected [`AudioHal`]
pub struct DeviceController {
    hal: Arc<dyn AudioHal>,
    identity: DriverIdentity,
    runner: Arc<dyn ScriptRunner>,
}

impl DeviceController {
    pub fn new(hal: Arc<dyn AudioHal>, identity: DriverIdentity, runner: Arc<dyn ScriptRunner>) -> Self {
        Self {
            hal,
            identity,
            runner,
        }
    }

    /// Controller backed by CoreAudio and the osascript runner
    #[cfg(target_os = "macos")]
    pub fn system(identity: DriverIdentity, scripts_dir: impl Into<std::path::PathBuf>) -> Self {
        Self::new(
            Arc::new(CoreAudioHal::new()),
            identity,
            Arc::new(OsascriptRunner::new(scripts_dir)),
        )
    }

    pub fn identity(&self) -> &DriverIdentity {
        &self.identity
    }

    // --- Discovery ---

    /// Look up a driver device. Absence is `Ok(None)`.
    pub fn discover_device(&self, kind: DeviceKind) -> DriverResult<Option<DeviceRecord>> {
        let uid = self.identity.uid_for(kind);
        let id = self.hal.device_by_uid(uid).map_err(|status| DriverError::Lookup {
            what: uid.to_string(),
            status,
        })?;
        Ok(id.map(|id| DeviceRecord {
            kind,
            uid: uid.to_string(),
            id,
        }))
    }

    /// Object id of the HAL plugin, if registered
    pub fn plugin_id(&self) -> DriverResult<Option<AudioObjectId>> {
        let bundle_id = &self.identity.bundle_id;
        self.hal
            .plugin_by_bundle_id(bundle_id)
            .map_err(|status| DriverError::Lookup {
                what: bundle_id.clone(),
                status,
            })
    }

    pub fn is_installed(&self) -> DriverResult<bool> {
        if self.discover_device(DeviceKind::Passthrough)?.is_some() {
            return Ok(true);
        }
        Ok(self.plugin_id()?.is_some())
    }

    /// Whether a device from an older driver release is still present
    pub fn legacy_is_installed(&self) -> DriverResult<bool> {
        for uid in &self.identity.legacy_uids {
            let found = self.hal.device_by_uid(uid).map_err(|status| DriverError::Lookup {
                what: uid.clone(),
                status,
            })?;
            if found.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // --- Visibility ---

    /// `false` when the plugin is not registered
    pub fn is_device_shown(&self, kind: DeviceKind) -> DriverResult<bool> {
        let Some(plugin) = self.plugin_id()? else {
            return Ok(false);
        };
        let address = PropertyAddress::global(kind.active_selector());
        self.hal
            .get_bool_property(plugin, &address)
            .map_err(|status| property_error(&address, status))
    }

    pub fn is_device_hidden(&self, kind: DeviceKind) -> DriverResult<bool> {
        Ok(!self.is_device_shown(kind)?)
    }

    /// Write the active flag. Without a plugin this makes no OS call.
    pub fn set_device_shown(&self, kind: DeviceKind, shown: bool) -> DriverResult<WriteOutcome> {
        let Some(plugin) = self.plugin_id()? else {
            debug!(%kind, "[Driver] Plugin not registered, skipping visibility write");
            return Ok(WriteOutcome::NotInstalled);
        };
        let address = PropertyAddress::global(kind.active_selector());
        self.hal
            .set_bool_property(plugin, &address, shown)
            .map_err(|status| property_error(&address, status))?;
        info!(%kind, shown, "[Driver] Device visibility changed");
        Ok(WriteOutcome::Applied)
    }

    pub fn set_device_hidden(&self, kind: DeviceKind, hidden: bool) -> DriverResult<WriteOutcome> {
        self.set_device_shown(kind, !hidden)
    }

    pub fn hide_device(&self, kind: DeviceKind) -> DriverResult<WriteOutcome> {
        self.set_device_hidden(kind, true)
    }

    pub fn show_device(&self, kind: DeviceKind) -> DriverResult<WriteOutcome> {
        self.set_device_shown(kind, true)
    }

    // --- Passthrough tunables ---

    /// Whether the passthrough device exposes the latency property
    pub fn has_latency(&self) -> DriverResult<bool> {
        let device = self.require_passthrough()?;
        let address = PropertyAddress::output(PropertySelector::CUSTOM_LATENCY);
        Ok(self.hal.has_property(device.id, &address))
    }

    /// Latency in frames
    pub fn latency(&self) -> DriverResult<u32> {
        self.read_frames(PropertySelector::CUSTOM_LATENCY)
    }

    pub fn set_latency(&self, frames: u32) -> DriverResult<()> {
        self.write_frames(PropertySelector::CUSTOM_LATENCY, frames)
    }

    /// Safety offset in frames
    pub fn safety_offset(&self) -> DriverResult<u32> {
        self.read_frames(PropertySelector::CUSTOM_SAFETY_OFFSET)
    }

    pub fn set_safety_offset(&self, frames: u32) -> DriverResult<()> {
        self.write_frames(PropertySelector::CUSTOM_SAFETY_OFFSET, frames)
    }

    /// I/O buffer size of the passthrough device in frames
    pub fn buffer_frame_size(&self) -> DriverResult<u32> {
        let device = self.require_passthrough()?;
        let address = PropertyAddress::output(PropertySelector::BUFFER_FRAME_SIZE);
        self.read_u32(device.id, &address)
    }

    // --- Install ---

    /// Run the install script through the privileged runner
    ///
    /// `on_started` fires once the script has been handed off. Resolves to
    /// whether the script reported success.
    pub async fn install<F>(&self, on_started: F) -> DriverResult<bool>
    where
        F: FnOnce() + Send,
    {
        self.run_script(self.identity.install_script.clone(), on_started)
            .await
    }

    pub async fn uninstall<F>(&self, on_started: F) -> DriverResult<bool>
    where
        F: FnOnce() + Send,
    {
        self.run_script(self.identity.uninstall_script.clone(), on_started)
            .await
    }

    async fn run_script<F>(&self, script: String, on_started: F) -> DriverResult<bool>
    where
        F: FnOnce() + Send,
    {
        let runner = self.runner.clone();
        let name = script.clone();
        let task = tokio::task::spawn_blocking(move || runner.run_privileged(&name));
        on_started();
        info!("[Driver] {} started", script);

        let ok = task.await.map_err(|e| DriverError::Script {
            script: script.clone(),
            message: e.to_string(),
        })??;
        if ok {
            info!("[Driver] {} finished", script);
        } else {
            warn!("[Driver] {} did not complete", script);
        }
        Ok(ok)
    }

    // --- Property helpers ---

    fn require_passthrough(&self) -> DriverResult<DeviceRecord> {
        self.discover_device(DeviceKind::Passthrough)?
            .ok_or(DriverError::DeviceNotFound(DeviceKind::Passthrough))
    }

    fn read_frames(&self, selector: PropertySelector) -> DriverResult<u32> {
        let device = self.require_passthrough()?;
        let raw = self.read_i32(device.id, &PropertyAddress::global(selector))?;
        u32::try_from(raw).map_err(|_| DriverError::ValueOutOfRange {
            selector,
            value: i64::from(raw),
        })
    }

    fn write_frames(&self, selector: PropertySelector, frames: u32) -> DriverResult<()> {
        let device = self.require_passthrough()?;
        let value = i32::try_from(frames).map_err(|_| DriverError::ValueOutOfRange {
            selector,
            value: i64::from(frames),
        })?;
        self.write(device.id, &PropertyAddress::global(selector), &value.to_ne_bytes())?;
        debug!(selector = %selector, frames, "[Driver] Property written");
        Ok(())
    }

    fn read_exact(&self, object: AudioObjectId, address: &PropertyAddress) -> DriverResult<[u8; 4]> {
        let mut buf = [0u8; 4];
        let read = self
            .hal
            .get_property_data(object, address, &mut buf)
            .map_err(|status| property_error(address, status))?;
        if read != buf.len() {
            return Err(DriverError::UnexpectedSize {
                selector: address.selector,
                expected: buf.len(),
                actual: read,
            });
        }
        Ok(buf)
    }

    fn read_u32(&self, object: AudioObjectId, address: &PropertyAddress) -> DriverResult<u32> {
        self.read_exact(object, address).map(u32::from_ne_bytes)
    }

    fn read_i32(&self, object: AudioObjectId, address: &PropertyAddress) -> DriverResult<i32> {
        self.read_exact(object, address).map(i32::from_ne_bytes)
    }

    fn write(&self, object: AudioObjectId, address: &PropertyAddress, data: &[u8]) -> DriverResult<()> {
        self.hal
            .set_property_data(object, address, data)
            .map_err(|status| property_error(address, status))
    }
}

fn property_error(address: &PropertyAddress, status: OsStatus) -> DriverError {
    DriverError::Property {
        selector: address.selector,
        status,
    }
}
