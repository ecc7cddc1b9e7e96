//! Four-character property selectors

use crate::error::DriverError;
use std::fmt;
use std::str::FromStr;

/// Key into the OS property table
///
/// Packs four ASCII bytes big-endian, so `"deva"` is `0x64657661`. This is
/// the wire format the HAL plugin matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertySelector(u32);

impl PropertySelector {
    /// Passthrough device active flag
    pub const PASSTHROUGH_ACTIVE: Self = Self::from_tag(b"deva");
    /// UI device active flag
    pub const UI_ACTIVE: Self = Self::from_tag(b"uida");
    /// Null device active flag
    pub const NULL_ACTIVE: Self = Self::from_tag(b"nuld");
    pub const CUSTOM_LATENCY: Self = Self::from_tag(b"cltc");
    pub const CUSTOM_SAFETY_OFFSET: Self = Self::from_tag(b"csfo");
    /// `kAudioDevicePropertyBufferFrameSize`
    pub const BUFFER_FRAME_SIZE: Self = Self::from_tag(b"fsiz");

    pub const fn from_tag(tag: &[u8; 4]) -> Self {
        Self(u32::from_be_bytes(*tag))
    }

    pub const fn from_code(code: u32) -> Self {
        Self(code)
    }

    /// Parse a four-character ASCII tag
    pub fn parse(tag: &str) -> Result<Self, DriverError> {
        let bytes: [u8; 4] = tag
            .as_bytes()
            .try_into()
            .map_err(|_| DriverError::InvalidTag(tag.to_string()))?;
        if !bytes.iter().all(u8::is_ascii) {
            return Err(DriverError::InvalidTag(tag.to_string()));
        }
        Ok(Self::from_tag(&bytes))
    }

    pub fn code(&self) -> u32 {
        self.0
    }

    pub fn tag(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl FromStr for PropertySelector {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for PropertySelector {
    type Error = DriverError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<PropertySelector> for u32 {
    fn from(selector: PropertySelector) -> Self {
        selector.0
    }
}

impl fmt::Display for PropertySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        if tag.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            for b in tag {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            write!(f, "0x{:08x}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(PropertySelector::PASSTHROUGH_ACTIVE.code(), 0x6465_7661);
        assert_eq!(PropertySelector::CUSTOM_LATENCY.code(), 0x636c_7463);
        assert_eq!(PropertySelector::parse("csfo").unwrap(), PropertySelector::CUSTOM_SAFETY_OFFSET);
        assert_eq!(PropertySelector::NULL_ACTIVE.to_string(), "nuld");
    }

    #[test]
    fn test_rejects_bad_tags() {
        assert!(matches!(PropertySelector::parse("dev"), Err(DriverError::InvalidTag(_))));
        assert!(matches!(PropertySelector::parse("devices"), Err(DriverError::InvalidTag(_))));
        // two-byte characters make a four-byte string that is not ASCII
        assert!(PropertySelector::parse("éé").is_err());
    }

    #[test]
    fn test_display_non_printable() {
        assert_eq!(PropertySelector::from_code(1).to_string(), "0x00000001");
    }

    proptest! {
        #[test]
        fn prop_tag_encoding_is_big_endian(tag in "[ -~]{4}") {
            let selector = PropertySelector::parse(&tag).unwrap();
            let b = tag.as_bytes();
            let expected = (u32::from(b[0]) << 24)
                | (u32::from(b[1]) << 16)
                | (u32::from(b[2]) << 8)
                | u32::from(b[3]);
            prop_assert_eq!(selector.code(), expected);
            prop_assert_eq!(selector, PropertySelector::parse(&tag).unwrap());
            prop_assert_eq!(&selector.tag()[..], b);
        }
    }
}
