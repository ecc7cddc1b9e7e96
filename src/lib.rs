//! eqflow - system-wide equalizer engine
//!
//! Audio from the driver's passthrough device runs through a volume booster
//! and an equalizer chain into the output mixer. A render tap on the last
//! chain node copies every rendered buffer into a time-indexed ring buffer
//! for visualizers and other readers. The driver module toggles the
//! virtual devices and tunes the passthrough device.

pub mod audio;
pub mod capture;
pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod events;
pub mod format;

pub use audio::{
    AudioRuntime, ControlLoop, GraphState, NodeHandle, OfflineRuntime, PlanarBuffer,
    ProcessingNode, SignalGraph,
};
#[cfg(target_os = "macos")]
pub use audio::CoreAudioRuntime;
pub use capture::{ReaderId, RenderTap, RingBuffer};
pub use config::{DriverIdentity, EngineConfig};
pub use driver::{AudioHal, DeviceController, DeviceKind, PropertySelector, WriteOutcome};
pub use engine::Engine;
pub use error::{ConfigError, DriverError, EngineError, OsStatus, RingBufferError};
pub use format::AudioFormat;

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`)
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();
}
