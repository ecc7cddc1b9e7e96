//! Offline Runtime - software implementation of the audio runtime
//!
//! Renders the wired chain on demand from the calling thread instead of a
//! device callback. Clones share state, so one handle can be boxed into a
//! [`SignalGraph`](super::SignalGraph) while another drives renders and
//! inspects the topology.

use super::buffer::PlanarBuffer;
use super::edge::Connection;
use super::node::{NodeHandle, ProcessingNode};
use super::runtime::AudioRuntime;
use crate::capture::{RenderFlags, RenderObserver, RenderStatus};
use crate::driver::AudioObjectId;
use crate::error::OsStatus;
use crate::format::AudioFormat;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Handle of the input node
pub const INPUT_NODE: NodeHandle = NodeHandle::new(u32::MAX - 1);

/// Handle of the output mixer
pub const OUTPUT_MIXER: NodeHandle = NodeHandle::new(u32::MAX);

type InputSource = Box<dyn FnMut(f64, &mut PlanarBuffer) + Send>;

struct OfflineState {
    attached: HashMap<NodeHandle, Arc<dyn ProcessingNode>>,
    connections: Vec<Connection>,
    observers: HashMap<NodeHandle, Arc<dyn RenderObserver>>,
    input_device: Option<AudioObjectId>,
    output_volume: f32,
    prepared: bool,
    running: bool,
    start_count: u32,
    sample_time: f64,
    scratch: PlanarBuffer,
    output_peak: f32,
    source: InputSource,
    refuse_render_notify: bool,
    refused_attach: HashSet<NodeHandle>,
    refused_connect: HashSet<NodeHandle>,
    last_render_status: Option<RenderStatus>,
}

impl OfflineState {
    fn is_known(&self, node: NodeHandle) -> bool {
        node == INPUT_NODE || node == OUTPUT_MIXER || self.attached.contains_key(&node)
    }

    fn successor(&self, node: NodeHandle) -> Option<NodeHandle> {
        self.connections
            .iter()
            .find(|c| c.source == node)
            .map(|c| c.target)
    }
}

/// Software audio runtime with a single input and an output mixer
#[derive(Clone)]
pub struct OfflineRuntime {
    state: Arc<Mutex<OfflineState>>,
}

impl OfflineRuntime {
    /// Runtime whose input renders silence
    pub fn new(channel_count: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(OfflineState {
                attached: HashMap::new(),
                connections: Vec::new(),
                observers: HashMap::new(),
                input_device: None,
                output_volume: 1.0,
                prepared: false,
                running: false,
                start_count: 0,
                sample_time: 0.0,
                scratch: PlanarBuffer::new(channel_count),
                output_peak: 0.0,
                source: Box::new(|_, _| {}),
                refuse_render_notify: false,
                refused_attach: HashSet::new(),
                refused_connect: HashSet::new(),
                last_render_status: None,
            })),
        }
    }

    /// Replace the input generator
    ///
    /// The generator receives the cycle's sample time and a buffer already
    /// cleared to the requested frame count.
    pub fn set_source<F>(&self, source: F)
    where
        F: FnMut(f64, &mut PlanarBuffer) + Send + 'static,
    {
        self.state.lock().source = Box::new(source);
    }

    /// Make `add_render_notify` fail, as a runtime refusing the callback would
    pub fn set_refuse_render_notify(&self, refuse: bool) {
        self.state.lock().refuse_render_notify = refuse;
    }

    /// Make `attach` of `node` fail, as a runtime out of resources would
    pub fn refuse_attach(&self, node: NodeHandle) {
        self.state.lock().refused_attach.insert(node);
    }

    /// Make any `connect` into `node`'s input bus fail
    pub fn refuse_connect(&self, node: NodeHandle) {
        self.state.lock().refused_connect.insert(node);
    }

    /// Run one render cycle of `frames` frames
    ///
    /// Returns the number of frames rendered, 0 when the runtime is stopped.
    pub fn render(&self, frames: usize) -> usize {
        let mut guard = self.state.lock();
        if !guard.running {
            return 0;
        }
        let state = &mut *guard;
        let sample_time = state.sample_time;

        state.scratch.clear(frames);
        (state.source)(sample_time, &mut state.scratch);
        let frames = state.scratch.frames();

        let mut current = INPUT_NODE;
        let mut steps = 0;
        while let Some(next) = state.successor(current) {
            steps += 1;
            if next == OUTPUT_MIXER || steps > state.attached.len() + 1 {
                break;
            }
            if let Some(node) = state.attached.get(&next) {
                let observer = state.observers.get(&next);
                if let Some(observer) = observer {
                    let _ = observer.on_render(
                        RenderFlags::PRE_RENDER,
                        sample_time,
                        frames,
                        &state.scratch,
                    );
                }
                node.process(&mut state.scratch);
                if let Some(observer) = observer {
                    state.last_render_status = Some(observer.on_render(
                        RenderFlags::POST_RENDER,
                        sample_time,
                        frames,
                        &state.scratch,
                    ));
                }
            }
            current = next;
        }

        state.output_peak = state
            .scratch
            .channels()
            .iter()
            .map(|c| c.peak())
            .fold(0.0, f32::max)
            * state.output_volume;
        state.sample_time += frames as f64;
        frames
    }

    /// Nodes reached by following connections from the input node
    ///
    /// Starts with the input node and ends with the output mixer when the
    /// chain is complete.
    pub fn chain_from_input(&self) -> Vec<NodeHandle> {
        let state = self.state.lock();
        let mut order = vec![INPUT_NODE];
        let mut current = INPUT_NODE;
        while let Some(next) = state.successor(current) {
            if order.contains(&next) {
                break;
            }
            order.push(next);
            current = next;
        }
        order
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.state.lock().connections.clone()
    }

    pub fn is_attached(&self, node: NodeHandle) -> bool {
        self.state.lock().attached.contains_key(&node)
    }

    pub fn attached_count(&self) -> usize {
        self.state.lock().attached.len()
    }

    pub fn has_render_notify(&self, node: NodeHandle) -> bool {
        self.state.lock().observers.contains_key(&node)
    }

    pub fn input_device(&self) -> Option<AudioObjectId> {
        self.state.lock().input_device
    }

    pub fn output_volume(&self) -> f32 {
        self.state.lock().output_volume
    }

    /// Peak reaching the output mixer in the last cycle, after mixer gain
    pub fn output_peak(&self) -> f32 {
        self.state.lock().output_peak
    }

    pub fn start_count(&self) -> u32 {
        self.state.lock().start_count
    }

    pub fn last_render_status(&self) -> Option<RenderStatus> {
        self.state.lock().last_render_status
    }

    pub fn running(&self) -> bool {
        self.state.lock().running
    }
}

impl AudioRuntime for OfflineRuntime {
    fn input_node(&self) -> NodeHandle {
        INPUT_NODE
    }

    fn output_mixer(&self) -> NodeHandle {
        OUTPUT_MIXER
    }

    fn set_input_device(&mut self, device: AudioObjectId) -> Result<(), OsStatus> {
        let mut state = self.state.lock();
        if state.running {
            return Err(OsStatus::CANNOT_DO_IN_CURRENT_CONTEXT);
        }
        state.input_device = Some(device);
        Ok(())
    }

    fn set_output_volume(&mut self, volume: f32) {
        self.state.lock().output_volume = volume.max(0.0);
    }

    fn attach(&mut self, node: Arc<dyn ProcessingNode>) -> Result<(), OsStatus> {
        let handle = node.handle();
        if handle == INPUT_NODE || handle == OUTPUT_MIXER {
            return Err(OsStatus::ILLEGAL_OPERATION);
        }
        let mut state = self.state.lock();
        if state.refused_attach.contains(&handle) {
            return Err(OsStatus::CANNOT_DO_IN_CURRENT_CONTEXT);
        }
        state.attached.insert(handle, node);
        Ok(())
    }

    fn detach(&mut self, node: NodeHandle) {
        let mut state = self.state.lock();
        state.attached.remove(&node);
        state.connections.retain(|c| !c.touches(node));
        state.observers.remove(&node);
    }

    fn connect(
        &mut self,
        source: NodeHandle,
        target: NodeHandle,
        format: &AudioFormat,
    ) -> Result<(), OsStatus> {
        let mut state = self.state.lock();
        if !state.is_known(source) || !state.is_known(target) {
            return Err(OsStatus::BAD_OBJECT);
        }
        if source == OUTPUT_MIXER || target == INPUT_NODE || source == target {
            return Err(OsStatus::ILLEGAL_OPERATION);
        }
        if format.channel_count() != state.scratch.channel_count() {
            return Err(OsStatus::BAD_PROPERTY_SIZE);
        }
        if state.refused_connect.contains(&target) {
            return Err(OsStatus::CANNOT_DO_IN_CURRENT_CONTEXT);
        }
        state
            .connections
            .retain(|c| c.source != source && c.target != target);
        state
            .connections
            .push(Connection::new(source, target, *format));
        Ok(())
    }

    fn disconnect_output(&mut self, node: NodeHandle) {
        self.state.lock().connections.retain(|c| c.source != node);
    }

    fn add_render_notify(
        &mut self,
        node: NodeHandle,
        observer: Arc<dyn RenderObserver>,
    ) -> Result<(), OsStatus> {
        let mut state = self.state.lock();
        if state.refuse_render_notify {
            return Err(OsStatus::CANNOT_DO_IN_CURRENT_CONTEXT);
        }
        if !state.attached.contains_key(&node) {
            return Err(OsStatus::BAD_OBJECT);
        }
        state.observers.insert(node, observer);
        Ok(())
    }

    fn remove_render_notify(&mut self, node: NodeHandle) {
        self.state.lock().observers.remove(&node);
    }

    fn prepare(&mut self) {
        self.state.lock().prepared = true;
    }

    fn start(&mut self) -> Result<(), OsStatus> {
        let mut state = self.state.lock();
        if state.successor(INPUT_NODE).is_none() {
            return Err(OsStatus::ILLEGAL_OPERATION);
        }
        state.prepared = true;
        state.running = true;
        state.start_count += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.state.lock().running = false;
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Gain {
        handle: NodeHandle,
        gain: f32,
    }

    impl ProcessingNode for Gain {
        fn handle(&self) -> NodeHandle {
            self.handle
        }

        fn label(&self) -> &str {
            "gain"
        }

        fn process(&self, buffer: &mut PlanarBuffer) {
            for channel in buffer.channels_mut() {
                channel.apply_gain(self.gain);
            }
        }
    }

    #[test]
    fn test_connect_replaces_existing_output() {
        let mut runtime = OfflineRuntime::new(2);
        let a = NodeHandle::new(1);
        let b = NodeHandle::new(2);
        runtime.attach(Arc::new(Gain { handle: a, gain: 1.0 })).unwrap();
        runtime.attach(Arc::new(Gain { handle: b, gain: 1.0 })).unwrap();

        let format = AudioFormat::STANDARD;
        runtime.connect(INPUT_NODE, a, &format).unwrap();
        runtime.connect(INPUT_NODE, b, &format).unwrap();

        assert_eq!(runtime.chain_from_input(), vec![INPUT_NODE, b]);
        assert_eq!(runtime.connections().len(), 1);
    }

    #[test]
    fn test_connect_unknown_node_fails() {
        let mut runtime = OfflineRuntime::new(2);
        let result = runtime.connect(INPUT_NODE, NodeHandle::new(7), &AudioFormat::STANDARD);
        assert_eq!(result, Err(OsStatus::BAD_OBJECT));
    }

    #[test]
    fn test_render_runs_chain_in_order() {
        let mut runtime = OfflineRuntime::new(2);
        let a = NodeHandle::new(1);
        let b = NodeHandle::new(2);
        runtime.attach(Arc::new(Gain { handle: a, gain: 2.0 })).unwrap();
        runtime.attach(Arc::new(Gain { handle: b, gain: 0.25 })).unwrap();

        let format = AudioFormat::STANDARD;
        runtime.connect(INPUT_NODE, a, &format).unwrap();
        runtime.connect(a, b, &format).unwrap();
        runtime.connect(b, OUTPUT_MIXER, &format).unwrap();
        runtime.set_source(|_, buffer| {
            for channel in buffer.channels_mut() {
                channel.samples_mut().fill(1.0);
            }
        });

        assert_eq!(runtime.render(64), 0);
        runtime.start().unwrap();
        assert_eq!(runtime.render(64), 64);
        assert!((runtime.output_peak() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_detach_removes_connections() {
        let mut runtime = OfflineRuntime::new(2);
        let a = NodeHandle::new(1);
        runtime.attach(Arc::new(Gain { handle: a, gain: 1.0 })).unwrap();
        runtime.connect(INPUT_NODE, a, &AudioFormat::STANDARD).unwrap();
        runtime.connect(a, OUTPUT_MIXER, &AudioFormat::STANDARD).unwrap();

        runtime.detach(a);
        assert!(runtime.connections().is_empty());
        assert!(!runtime.is_attached(a));
    }
}
