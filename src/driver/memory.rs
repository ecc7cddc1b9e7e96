//! In-memory HAL used by tests and headless runs

use super::hal::{AudioHal, AudioObjectId, PropertyAddress, BOOL_PAYLOAD_SIZE};
use super::selector::PropertySelector;
use crate::error::OsStatus;
use parking_lot::Mutex;
use std::collections::HashMap;

/// One recorded call against the HAL
#[derive(Debug, Clone, PartialEq)]
pub enum HalCall {
    DeviceByUid(String),
    PluginByBundleId(String),
    Has(AudioObjectId, PropertyAddress),
    Get(AudioObjectId, PropertyAddress),
    Set(AudioObjectId, PropertyAddress, Vec<u8>),
}

#[derive(Default)]
struct MemoryState {
    devices: HashMap<String, AudioObjectId>,
    plugins: HashMap<String, AudioObjectId>,
    properties: HashMap<(AudioObjectId, PropertyAddress), Vec<u8>>,
    failures: HashMap<(AudioObjectId, PropertySelector), OsStatus>,
    calls: Vec<HalCall>,
}

impl MemoryState {
    fn knows(&self, object: AudioObjectId) -> bool {
        self.devices.values().any(|&id| id == object)
            || self.plugins.values().any(|&id| id == object)
    }
}

/// Property table keyed by object and address, with a call log
///
/// Boolean properties are stored as a pointer-width integer (0 or 1) so
/// their payload has the size of the `CFBooleanRef` the OS exchanges.
#[derive(Default)]
pub struct MemoryHal {
    state: Mutex<MemoryState>,
}

impl MemoryHal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, uid: &str, id: AudioObjectId) {
        self.state.lock().devices.insert(uid.to_string(), id);
    }

    pub fn remove_device(&self, uid: &str) {
        self.state.lock().devices.remove(uid);
    }

    pub fn add_plugin(&self, bundle_id: &str, id: AudioObjectId) {
        self.state.lock().plugins.insert(bundle_id.to_string(), id);
    }

    pub fn set_property(&self, object: AudioObjectId, address: PropertyAddress, data: &[u8]) {
        self.state
            .lock()
            .properties
            .insert((object, address), data.to_vec());
    }

    pub fn property(&self, object: AudioObjectId, address: PropertyAddress) -> Option<Vec<u8>> {
        self.state.lock().properties.get(&(object, address)).cloned()
    }

    /// Make every get/set of `selector` on `object` fail with `status`
    pub fn fail_property(&self, object: AudioObjectId, selector: PropertySelector, status: OsStatus) {
        self.state.lock().failures.insert((object, selector), status);
    }

    pub fn calls(&self) -> Vec<HalCall> {
        self.state.lock().calls.clone()
    }

    /// Number of recorded property reads and writes
    pub fn property_calls(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, HalCall::Get(..) | HalCall::Set(..)))
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }
}

impl AudioHal for MemoryHal {
    fn device_by_uid(&self, uid: &str) -> Result<Option<AudioObjectId>, OsStatus> {
        let mut state = self.state.lock();
        state.calls.push(HalCall::DeviceByUid(uid.to_string()));
        Ok(state.devices.get(uid).copied())
    }

    fn plugin_by_bundle_id(&self, bundle_id: &str) -> Result<Option<AudioObjectId>, OsStatus> {
        let mut state = self.state.lock();
        state.calls.push(HalCall::PluginByBundleId(bundle_id.to_string()));
        Ok(state.plugins.get(bundle_id).copied())
    }

    fn has_property(&self, object: AudioObjectId, address: &PropertyAddress) -> bool {
        let mut state = self.state.lock();
        state.calls.push(HalCall::Has(object, *address));
        state.properties.contains_key(&(object, *address))
    }

    fn get_property_data(
        &self,
        object: AudioObjectId,
        address: &PropertyAddress,
        out: &mut [u8],
    ) -> Result<usize, OsStatus> {
        let mut state = self.state.lock();
        state.calls.push(HalCall::Get(object, *address));
        if let Some(status) = state.failures.get(&(object, address.selector)) {
            return Err(*status);
        }
        if !state.knows(object) {
            return Err(OsStatus::BAD_OBJECT);
        }
        let data = state
            .properties
            .get(&(object, *address))
            .ok_or(OsStatus::UNKNOWN_PROPERTY)?;
        if out.len() < data.len() {
            return Err(OsStatus::BAD_PROPERTY_SIZE);
        }
        out[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn set_property_data(
        &self,
        object: AudioObjectId,
        address: &PropertyAddress,
        data: &[u8],
    ) -> Result<(), OsStatus> {
        let mut state = self.state.lock();
        state.calls.push(HalCall::Set(object, *address, data.to_vec()));
        if let Some(status) = state.failures.get(&(object, address.selector)) {
            return Err(*status);
        }
        if !state.knows(object) {
            return Err(OsStatus::BAD_OBJECT);
        }
        state.properties.insert((object, *address), data.to_vec());
        Ok(())
    }

    fn get_bool_property(&self, object: AudioObjectId, address: &PropertyAddress) -> Result<bool, OsStatus> {
        let mut payload = [0u8; BOOL_PAYLOAD_SIZE];
        let size = self.get_property_data(object, address, &mut payload)?;
        if size != BOOL_PAYLOAD_SIZE {
            return Err(OsStatus::BAD_PROPERTY_SIZE);
        }
        Ok(usize::from_ne_bytes(payload) != 0)
    }

    fn set_bool_property(
        &self,
        object: AudioObjectId,
        address: &PropertyAddress,
        value: bool,
    ) -> Result<(), OsStatus> {
        self.set_property_data(object, address, &usize::from(value).to_ne_bytes())
    }
}
