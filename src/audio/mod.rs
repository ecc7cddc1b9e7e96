//! Audio Module - signal graph over a pluggable audio runtime
//!
//! Nodes only process; the graph owns wiring, and the control loop owns
//! when wiring may change.

mod buffer;
mod control;
#[cfg(target_os = "macos")]
mod coreaudio_runtime;
mod edge;
mod graph;
mod node;
mod runtime;

pub mod effects;
pub mod live;
pub mod offline;

pub use buffer::{AudioBuffer, PlanarBuffer};
#[cfg(target_os = "macos")]
pub use coreaudio_runtime::CoreAudioRuntime;
pub use control::{
    ControlLoop, RebuildHandle, RebuildOutcome, DEFAULT_SETTLE_DELAY, OUTCOME_BACKLOG,
};
pub use edge::Connection;
pub use graph::{GraphState, SignalChain, SignalGraph};
pub use node::{NodeHandle, ProcessingNode};
pub use offline::OfflineRuntime;
pub use runtime::AudioRuntime;

/// Maximum frames per render cycle
pub const MAX_FRAMES: usize = 4096;
