//! Processing node contract and identifiers

use super::buffer::PlanarBuffer;
use crate::format::AudioFormat;

/// Opaque identifier of a node inside the audio runtime
///
/// The handle says nothing about what kind of node it is; that belongs to
/// the node itself, so callers treat every stage uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u32);

impl NodeHandle {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl From<u32> for NodeHandle {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<NodeHandle> for u32 {
    fn from(handle: NodeHandle) -> Self {
        handle.0
    }
}

/// A unit of audio transformation supplied by the effects collaborator
///
/// Equalizer bands and the volume booster implement this. The graph only
/// wires nodes; their DSP state and lifetime stay with whoever created them.
pub trait ProcessingNode: Send + Sync {
    fn handle(&self) -> NodeHandle;

    /// Display label
    fn label(&self) -> &str;

    /// Format the node renders in
    fn format(&self) -> AudioFormat {
        AudioFormat::STANDARD
    }

    /// Transform one buffer in place
    ///
    /// Called on the render thread by runtimes that run node DSP themselves.
    /// Must not block or allocate.
    fn process(&self, _buffer: &mut PlanarBuffer) {}
}

impl std::fmt::Debug for dyn ProcessingNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingNode")
            .field("handle", &self.handle())
            .field("label", &self.label())
            .finish()
    }
}
