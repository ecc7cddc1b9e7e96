//! Error types shared across the engine, the ring buffer and the driver controller

use crate::driver::{DeviceKind, PropertySelector};
use crate::format::AudioFormat;
use std::fmt;

/// Status code returned by the OS audio subsystem (`OSStatus`)
///
/// Zero means success. CoreAudio packs most of its error codes as fourcc
/// values, so the display form prints the tag when all four bytes are
/// printable ASCII and the decimal value otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsStatus(pub i32);

impl OsStatus {
    pub const NO_ERR: OsStatus = OsStatus(0);

    /// `kAudioHardwareUnknownPropertyError` ('who?')
    pub const UNKNOWN_PROPERTY: OsStatus = OsStatus(0x77686F3F);

    /// `kAudioHardwareBadObjectError` ('!obj')
    pub const BAD_OBJECT: OsStatus = OsStatus(0x216F626A);

    /// `kAudioHardwareBadPropertySizeError` ('!siz')
    pub const BAD_PROPERTY_SIZE: OsStatus = OsStatus(0x2173697A);

    /// `kAudioHardwareIllegalOperationError` ('nope')
    pub const ILLEGAL_OPERATION: OsStatus = OsStatus(0x6E6F7065);

    /// `kAudioUnitErr_CannotDoInCurrentContext`
    pub const CANNOT_DO_IN_CURRENT_CONTEXT: OsStatus = OsStatus(-10863);

    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }

    /// Convert a raw status into a `Result`
    pub fn check(raw: i32) -> Result<(), OsStatus> {
        if raw == 0 {
            Ok(())
        } else {
            Err(OsStatus(raw))
        }
    }
}

impl fmt::Display for OsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            let tag: String = bytes.iter().map(|&b| b as char).collect();
            write!(f, "'{}' ({})", tag, self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Errors raised by graph construction, rewiring and the control loop
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// A node's channel layout disagrees with the graph's shared format
    #[error("format mismatch on node '{node}': expected {expected}, found {found}")]
    FormatMismatch {
        node: String,
        expected: AudioFormat,
        found: AudioFormat,
    },

    /// No effect node was supplied; the chain needs at least one stage
    #[error("effect chain is empty")]
    EmptyChain,

    /// A handle is used twice, or collides with the input node or mixer
    #[error("node {} appears more than once in the graph", .0.raw())]
    DuplicateNode(crate::audio::NodeHandle),

    /// The runtime refused the post-render notification
    #[error("failed to install render tap: {0}")]
    RenderTapInstall(OsStatus),

    /// The OS audio runtime failed an operation
    #[error("audio runtime failed to {op}: {status}")]
    Runtime { op: &'static str, status: OsStatus },

    /// The requested transition is not valid from the current state
    #[error("cannot {op} while graph is {state}")]
    InvalidState {
        op: &'static str,
        state: crate::audio::GraphState,
    },

    /// The passthrough device is required to size the capture buffer
    #[error("passthrough device is not available")]
    PassthroughUnavailable,

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    RingBuffer(#[from] RingBufferError),

    /// The control loop worker has exited
    #[error("control loop is not running")]
    ControlLoopClosed,
}

/// Errors raised by the device controller
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    /// An OS property call failed
    #[error("property '{selector}' failed: {status}")]
    Property {
        selector: PropertySelector,
        status: OsStatus,
    },

    /// Device or plugin lookup failed inside the OS
    #[error("lookup of '{what}' failed: {status}")]
    Lookup { what: String, status: OsStatus },

    /// The device is required for this call but is not present
    #[error("{0} device not found")]
    DeviceNotFound(DeviceKind),

    /// The OS returned a payload of an unexpected size
    #[error("property '{selector}' returned {actual} bytes, expected {expected}")]
    UnexpectedSize {
        selector: PropertySelector,
        expected: usize,
        actual: usize,
    },

    /// The value cannot be represented in the property's wire format
    #[error("value {value} out of range for property '{selector}'")]
    ValueOutOfRange {
        selector: PropertySelector,
        value: i64,
    },

    /// A tag could not be turned into a selector
    #[error("invalid property tag '{0}': expected four ASCII characters")]
    InvalidTag(String),

    /// The privileged helper could not be launched
    #[error("privileged script '{script}' failed: {message}")]
    Script { script: String, message: String },
}

/// Failures of the capture ring buffer
///
/// These are plain values so the render path can return them without
/// allocating or unwinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RingBufferError {
    /// Channel count disagreement between caller and buffer
    #[error("channel mismatch: buffer has {expected} channels, caller supplied {found}")]
    FormatMismatch { expected: usize, found: usize },

    /// A channel slice holds fewer frames than the call asked for
    #[error("channel slice holds {found} frames, {frames} requested")]
    ShortBuffer { frames: usize, found: usize },

    /// A single store is larger than the whole buffer
    #[error("{frames} frames exceed capacity of {capacity}")]
    TooMuch { frames: usize, capacity: usize },

    /// The store would overwrite frames an active reader has not consumed
    #[error("store would overrun reader {reader}")]
    Overrun { reader: usize },

    /// The reader fell behind and its frames have been overwritten
    #[error("reader lags writer by {lag} frames (capacity {capacity})")]
    Underrun { lag: u64, capacity: usize },

    /// The writer went back in time over frames this reader was about to read
    #[error("writer rewound past reader position {cursor}")]
    Rewound { cursor: i64 },

    /// The reader id does not refer to a registered reader
    #[error("unknown reader {0}")]
    UnknownReader(usize),

    /// All reader slots are taken
    #[error("no free reader slots")]
    ReadersExhausted,
}

/// Configuration load/save failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,

    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
pub type DriverResult<T> = std::result::Result<T, DriverError>;
