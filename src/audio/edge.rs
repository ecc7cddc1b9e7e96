//! Connection between two nodes of the signal graph

use super::node::NodeHandle;
use crate::format::AudioFormat;

/// Point-to-point connection from a node's output bus to another node's input
///
/// Every node in the chain has a single output bus, so a node is the source
/// of at most one connection at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub source: NodeHandle,
    pub target: NodeHandle,
    pub format: AudioFormat,
}

impl Connection {
    pub fn new(source: NodeHandle, target: NodeHandle, format: AudioFormat) -> Self {
        Self {
            source,
            target,
            format,
        }
    }

    pub fn touches(&self, node: NodeHandle) -> bool {
        self.source == node || self.target == node
    }
}
