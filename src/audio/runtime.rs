//! Boundary to the OS audio runtime that actually pulls and renders frames

use super::node::{NodeHandle, ProcessingNode};
use crate::capture::RenderObserver;
use crate::driver::AudioObjectId;
use crate::error::OsStatus;
use crate::format::AudioFormat;
use std::sync::Arc;

/// Operations the signal graph needs from an audio engine
///
/// Mirrors the attach/connect/render-notify surface of a pull-model audio
/// engine. Implementations own the render thread; the graph only calls
/// these from the control context.
pub trait AudioRuntime: Send {
    /// Node that produces frames from the input device
    fn input_node(&self) -> NodeHandle;

    /// Node that sums into the output device
    fn output_mixer(&self) -> NodeHandle;

    /// Route the given device into the input node
    fn set_input_device(&mut self, device: AudioObjectId) -> Result<(), OsStatus>;

    /// Output mixer gain (linear)
    fn set_output_volume(&mut self, volume: f32);

    fn attach(&mut self, node: Arc<dyn ProcessingNode>) -> Result<(), OsStatus>;

    /// Remove a node and every connection touching it
    fn detach(&mut self, node: NodeHandle);

    /// Connect `source`'s output bus to `target`'s input bus
    ///
    /// Replaces any existing connection on either bus.
    fn connect(
        &mut self,
        source: NodeHandle,
        target: NodeHandle,
        format: &AudioFormat,
    ) -> Result<(), OsStatus>;

    fn disconnect_output(&mut self, node: NodeHandle);

    /// Register an observer called around each render cycle of `node`
    fn add_render_notify(
        &mut self,
        node: NodeHandle,
        observer: Arc<dyn RenderObserver>,
    ) -> Result<(), OsStatus>;

    fn remove_render_notify(&mut self, node: NodeHandle);

    /// Preallocate render resources
    fn prepare(&mut self);

    fn start(&mut self) -> Result<(), OsStatus>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;
}
