//! Generic property access against the OS audio object model

use super::selector::PropertySelector;
use crate::error::OsStatus;

/// `AudioObjectID`
pub type AudioObjectId = u32;

/// `kAudioObjectSystemObject`
pub const SYSTEM_OBJECT: AudioObjectId = 1;

/// `kAudioObjectPropertyElementMain`
pub const ELEMENT_MAIN: u32 = 0;

/// Payload size of a boolean property: one `CFBooleanRef`
pub const BOOL_PAYLOAD_SIZE: usize = std::mem::size_of::<usize>();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyScope {
    Global,
    Input,
    Output,
}

impl PropertyScope {
    /// Fourcc code used on the wire
    pub const fn code(&self) -> u32 {
        match self {
            PropertyScope::Global => u32::from_be_bytes(*b"glob"),
            PropertyScope::Input => u32::from_be_bytes(*b"inpt"),
            PropertyScope::Output => u32::from_be_bytes(*b"outp"),
        }
    }
}

/// `AudioObjectPropertyAddress`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyAddress {
    pub selector: PropertySelector,
    pub scope: PropertyScope,
    pub element: u32,
}

impl PropertyAddress {
    pub const fn global(selector: PropertySelector) -> Self {
        Self {
            selector,
            scope: PropertyScope::Global,
            element: ELEMENT_MAIN,
        }
    }

    pub const fn output(selector: PropertySelector) -> Self {
        Self {
            selector,
            scope: PropertyScope::Output,
            element: ELEMENT_MAIN,
        }
    }
}

/// OS audio property interface
///
/// Every call is synchronous and may fail with an `OsStatus`. Callers run
/// on the control context only.
pub trait AudioHal: Send + Sync {
    /// Resolve a device UID to its object id
    fn device_by_uid(&self, uid: &str) -> Result<Option<AudioObjectId>, OsStatus>;

    /// Resolve a HAL plugin bundle identifier to its object id
    fn plugin_by_bundle_id(&self, bundle_id: &str) -> Result<Option<AudioObjectId>, OsStatus>;

    fn has_property(&self, object: AudioObjectId, address: &PropertyAddress) -> bool;

    /// Read a property into `out`, returning the number of bytes written
    fn get_property_data(
        &self,
        object: AudioObjectId,
        address: &PropertyAddress,
        out: &mut [u8],
    ) -> Result<usize, OsStatus>;

    fn set_property_data(
        &self,
        object: AudioObjectId,
        address: &PropertyAddress,
        data: &[u8],
    ) -> Result<(), OsStatus>;

    /// Read a property carried as a `CFBoolean`
    fn get_bool_property(&self, object: AudioObjectId, address: &PropertyAddress) -> Result<bool, OsStatus>;

    /// Write a property carried as a `CFBoolean`
    fn set_bool_property(
        &self,
        object: AudioObjectId,
        address: &PropertyAddress,
        value: bool,
    ) -> Result<(), OsStatus>;
}
