//! CoreAudio implementation of the property interface

use super::hal::{AudioHal, AudioObjectId, PropertyAddress, BOOL_PAYLOAD_SIZE, SYSTEM_OBJECT};
use super::selector::PropertySelector;
use crate::error::OsStatus;
use core_foundation::base::TCFType;
use core_foundation::boolean::{CFBoolean, CFBooleanRef};
use core_foundation::string::{CFString, CFStringRef};
use coreaudio::sys::{
    AudioObjectGetPropertyData, AudioObjectHasProperty, AudioObjectPropertyAddress,
    AudioObjectSetPropertyData,
};
use std::ptr;

/// `kAudioHardwarePropertyTranslateUIDToDevice`
const TRANSLATE_UID_TO_DEVICE: PropertySelector = PropertySelector::from_tag(b"uidd");
/// `kAudioHardwarePropertyTranslateBundleIDToPlugIn`
const TRANSLATE_BUNDLE_ID_TO_PLUGIN: PropertySelector = PropertySelector::from_tag(b"bidp");
/// `kAudioObjectUnknown`
const UNKNOWN_OBJECT: AudioObjectId = 0;

fn raw_address(address: &PropertyAddress) -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: address.selector.code(),
        mScope: address.scope.code(),
        mElement: address.element,
    }
}

/// Property access through `AudioObject*PropertyData`
#[derive(Debug, Default, Clone, Copy)]
pub struct CoreAudioHal;

impl CoreAudioHal {
    pub fn new() -> Self {
        Self
    }

    /// Translate a string key to an object id via a system object property
    fn translate(&self, selector: PropertySelector, key: &str) -> Result<Option<AudioObjectId>, OsStatus> {
        let address = raw_address(&PropertyAddress::global(selector));
        let key = CFString::new(key);
        let key_ref: CFStringRef = key.as_concrete_TypeRef();

        let mut object: AudioObjectId = UNKNOWN_OBJECT;
        let mut size = std::mem::size_of::<AudioObjectId>() as u32;

        let status = unsafe {
            AudioObjectGetPropertyData(
                SYSTEM_OBJECT,
                &address,
                std::mem::size_of::<CFStringRef>() as u32,
                &key_ref as *const _ as *const _,
                &mut size,
                &mut object as *mut _ as *mut _,
            )
        };
        OsStatus::check(status)?;

        Ok((object != UNKNOWN_OBJECT).then_some(object))
    }
}

impl AudioHal for CoreAudioHal {
    fn device_by_uid(&self, uid: &str) -> Result<Option<AudioObjectId>, OsStatus> {
        self.translate(TRANSLATE_UID_TO_DEVICE, uid)
    }

    fn plugin_by_bundle_id(&self, bundle_id: &str) -> Result<Option<AudioObjectId>, OsStatus> {
        self.translate(TRANSLATE_BUNDLE_ID_TO_PLUGIN, bundle_id)
    }

    fn has_property(&self, object: AudioObjectId, address: &PropertyAddress) -> bool {
        let address = raw_address(address);
        unsafe { AudioObjectHasProperty(object, &address) != 0 }
    }

    fn get_property_data(
        &self,
        object: AudioObjectId,
        address: &PropertyAddress,
        out: &mut [u8],
    ) -> Result<usize, OsStatus> {
        let address = raw_address(address);
        let mut size = out.len() as u32;

        let status = unsafe {
            AudioObjectGetPropertyData(
                object,
                &address,
                0,
                ptr::null(),
                &mut size,
                out.as_mut_ptr() as *mut _,
            )
        };
        OsStatus::check(status)?;

        Ok(size as usize)
    }

    fn set_property_data(
        &self,
        object: AudioObjectId,
        address: &PropertyAddress,
        data: &[u8],
    ) -> Result<(), OsStatus> {
        let address = raw_address(address);

        let status = unsafe {
            AudioObjectSetPropertyData(
                object,
                &address,
                0,
                ptr::null(),
                data.len() as u32,
                data.as_ptr() as *const _,
            )
        };
        OsStatus::check(status)
    }

    fn get_bool_property(&self, object: AudioObjectId, address: &PropertyAddress) -> Result<bool, OsStatus> {
        let address = raw_address(address);
        let mut value: CFBooleanRef = ptr::null();
        let mut size = BOOL_PAYLOAD_SIZE as u32;

        let status = unsafe {
            AudioObjectGetPropertyData(
                object,
                &address,
                0,
                ptr::null(),
                &mut size,
                &mut value as *mut _ as *mut _,
            )
        };
        OsStatus::check(status)?;
        if size as usize != BOOL_PAYLOAD_SIZE || value.is_null() {
            return Err(OsStatus::BAD_PROPERTY_SIZE);
        }

        // CF values read through the HAL come back retained
        let value = unsafe { CFBoolean::wrap_under_create_rule(value) };
        Ok(value.into())
    }

    fn set_bool_property(
        &self,
        object: AudioObjectId,
        address: &PropertyAddress,
        value: bool,
    ) -> Result<(), OsStatus> {
        let address = raw_address(address);
        let value = if value {
            CFBoolean::true_value()
        } else {
            CFBoolean::false_value()
        };
        let value_ref: CFBooleanRef = value.as_concrete_TypeRef();

        let status = unsafe {
            AudioObjectSetPropertyData(
                object,
                &address,
                0,
                ptr::null(),
                BOOL_PAYLOAD_SIZE as u32,
                &value_ref as *const _ as *const _,
            )
        };
        OsStatus::check(status)
    }
}
