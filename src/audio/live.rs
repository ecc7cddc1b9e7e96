//! Live rendering - lock-free render path for device-backed runtimes
//!
//! [`LiveGraph`] keeps the topology on the control context and publishes the
//! wired input → mixer path as an immutable plan through `ArcSwap`. Device
//! callbacks own a [`CaptureSide`] and a [`RenderSide`]: capture writes the
//! input device's interleaved frames into a bridge ring buffer, render pulls
//! them back, runs the plan and interleaves the result into the output
//! buffer. Neither side takes a lock or allocates.

use super::buffer::PlanarBuffer;
use super::edge::Connection;
use super::node::{NodeHandle, ProcessingNode};
use super::offline::{INPUT_NODE, OUTPUT_MIXER};
use super::MAX_FRAMES;
use crate::capture::{ReaderId, RenderFlags, RenderObserver, RingBuffer, SampleTime, StoreStatus};
use crate::error::{OsStatus, RingBufferError};
use crate::format::AudioFormat;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Frames held between the input and output callbacks
pub const BRIDGE_FRAMES: usize = MAX_FRAMES * 4;

struct Stage {
    node: Arc<dyn ProcessingNode>,
    observer: Option<Arc<dyn RenderObserver>>,
}

/// Snapshot of the path the render callback walks
#[derive(Default)]
struct RenderPlan {
    stages: Vec<Stage>,
    /// The path ends at the output mixer
    complete: bool,
}

/// Control-side topology of a live runtime
pub struct LiveGraph {
    channel_count: usize,
    attached: HashMap<NodeHandle, Arc<dyn ProcessingNode>>,
    connections: Vec<Connection>,
    observers: HashMap<NodeHandle, Arc<dyn RenderObserver>>,
    plan: Arc<ArcSwap<RenderPlan>>,
    volume: Arc<AtomicU32>,
}

impl LiveGraph {
    pub fn new(channel_count: usize) -> Self {
        Self {
            channel_count,
            attached: HashMap::new(),
            connections: Vec::new(),
            observers: HashMap::new(),
            plan: Arc::new(ArcSwap::from_pointee(RenderPlan::default())),
            volume: Arc::new(AtomicU32::new(1.0f32.to_bits())),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Output mixer gain (linear)
    pub fn set_volume(&self, volume: f32) {
        self.volume
            .store(volume.max(0.0).to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn attach(&mut self, node: Arc<dyn ProcessingNode>) -> Result<(), OsStatus> {
        let handle = node.handle();
        if handle == INPUT_NODE || handle == OUTPUT_MIXER {
            return Err(OsStatus::ILLEGAL_OPERATION);
        }
        self.attached.insert(handle, node);
        Ok(())
    }

    pub fn detach(&mut self, node: NodeHandle) {
        self.attached.remove(&node);
        self.connections.retain(|c| !c.touches(node));
        self.observers.remove(&node);
        self.publish();
    }

    pub fn connect(
        &mut self,
        source: NodeHandle,
        target: NodeHandle,
        format: &AudioFormat,
    ) -> Result<(), OsStatus> {
        if !self.is_known(source) || !self.is_known(target) {
            return Err(OsStatus::BAD_OBJECT);
        }
        if source == OUTPUT_MIXER || target == INPUT_NODE || source == target {
            return Err(OsStatus::ILLEGAL_OPERATION);
        }
        if format.channel_count() != self.channel_count {
            return Err(OsStatus::BAD_PROPERTY_SIZE);
        }
        self.connections
            .retain(|c| c.source != source && c.target != target);
        self.connections
            .push(Connection::new(source, target, *format));
        self.publish();
        Ok(())
    }

    pub fn disconnect_output(&mut self, node: NodeHandle) {
        self.connections.retain(|c| c.source != node);
        self.publish();
    }

    pub fn add_render_notify(
        &mut self,
        node: NodeHandle,
        observer: Arc<dyn RenderObserver>,
    ) -> Result<(), OsStatus> {
        if !self.attached.contains_key(&node) {
            return Err(OsStatus::BAD_OBJECT);
        }
        self.observers.insert(node, observer);
        self.publish();
        Ok(())
    }

    pub fn remove_render_notify(&mut self, node: NodeHandle) {
        if self.observers.remove(&node).is_some() {
            self.publish();
        }
    }

    /// Input node feeds something
    pub fn has_input_path(&self) -> bool {
        self.successor(INPUT_NODE).is_some()
    }

    /// The published path reaches the output mixer
    pub fn is_complete(&self) -> bool {
        self.plan.load().complete
    }

    /// Handles of the published path, input and mixer excluded
    pub fn published_path(&self) -> Vec<NodeHandle> {
        self.plan
            .load()
            .stages
            .iter()
            .map(|stage| stage.node.handle())
            .collect()
    }

    /// State for the input device callback
    pub fn capture_side(&self, bridge: Arc<RingBuffer>) -> CaptureSide {
        CaptureSide {
            bridge,
            scratch: PlanarBuffer::new(self.channel_count),
        }
    }

    /// State for the output device callback
    pub fn render_side(&self, bridge: Arc<RingBuffer>) -> RenderSide {
        RenderSide {
            plan: self.plan.clone(),
            volume: self.volume.clone(),
            bridge,
            reader: None,
            scratch: PlanarBuffer::new(self.channel_count),
        }
    }

    fn is_known(&self, node: NodeHandle) -> bool {
        node == INPUT_NODE || node == OUTPUT_MIXER || self.attached.contains_key(&node)
    }

    fn successor(&self, node: NodeHandle) -> Option<NodeHandle> {
        self.connections
            .iter()
            .find(|c| c.source == node)
            .map(|c| c.target)
    }

    /// Rebuild the plan from the input node and swap it in
    fn publish(&self) {
        let mut stages = Vec::new();
        let mut complete = false;
        let mut current = INPUT_NODE;
        while let Some(next) = self.successor(current) {
            if next == OUTPUT_MIXER {
                complete = true;
                break;
            }
            let Some(node) = self.attached.get(&next) else {
                break;
            };
            if stages.len() >= self.attached.len() {
                break;
            }
            stages.push(Stage {
                node: node.clone(),
                observer: self.observers.get(&next).cloned(),
            });
            current = next;
        }
        if !complete {
            stages.clear();
        }
        self.plan.store(Arc::new(RenderPlan { stages, complete }));
    }
}

/// Input callback half: deinterleaves device frames into the bridge
pub struct CaptureSide {
    bridge: Arc<RingBuffer>,
    scratch: PlanarBuffer,
}

impl CaptureSide {
    /// Store one input cycle at `sample_time`
    pub fn capture(
        &mut self,
        interleaved: &[f32],
        frames: usize,
        sample_time: f64,
    ) -> Result<StoreStatus, RingBufferError> {
        let channels = self.scratch.channel_count().max(1);
        let frames = frames.min(MAX_FRAMES).min(interleaved.len() / channels);

        self.scratch.clear(frames);
        for (c, channel) in self.scratch.channels_mut().iter_mut().enumerate() {
            for (f, sample) in channel.samples_mut().iter_mut().enumerate() {
                *sample = interleaved[f * channels + c];
            }
        }
        self.bridge
            .store(self.scratch.channels(), frames, sample_time as SampleTime)
    }
}

/// Output callback half: runs the published plan on bridged input
pub struct RenderSide {
    plan: Arc<ArcSwap<RenderPlan>>,
    volume: Arc<AtomicU32>,
    bridge: Arc<RingBuffer>,
    reader: Option<ReaderId>,
    scratch: PlanarBuffer,
}

impl RenderSide {
    /// Fill an interleaved output buffer for one cycle
    ///
    /// Returns the frames rendered. The buffer is left silent while the
    /// published path does not reach the mixer.
    pub fn render(&mut self, sample_time: f64, frames: usize, out: &mut [f32]) -> usize {
        out.fill(0.0);
        let channels = self.scratch.channel_count().max(1);
        let frames = frames.min(MAX_FRAMES).min(out.len() / channels);

        self.scratch.clear(frames);
        self.pull(frames);

        let plan = self.plan.load();
        if !plan.complete || frames == 0 {
            return 0;
        }

        for stage in &plan.stages {
            if let Some(observer) = &stage.observer {
                let _ = observer.on_render(RenderFlags::PRE_RENDER, sample_time, frames, &self.scratch);
            }
            stage.node.process(&mut self.scratch);
            if let Some(observer) = &stage.observer {
                let _ = observer.on_render(RenderFlags::POST_RENDER, sample_time, frames, &self.scratch);
            }
        }

        let gain = f32::from_bits(self.volume.load(Ordering::Relaxed));
        for (c, channel) in self.scratch.channels().iter().enumerate() {
            for (f, &sample) in channel.samples().iter().enumerate() {
                out[f * channels + c] = sample * gain;
            }
        }
        frames
    }

    /// Copy bridged input into the scratch buffer, silence on shortfall
    fn pull(&mut self, frames: usize) {
        let reader = match self.reader {
            Some(reader) => reader,
            None => match self.bridge.add_reader_at_end() {
                Ok(reader) => {
                    self.reader = Some(reader);
                    reader
                }
                Err(_) => return,
            },
        };
        if self
            .bridge
            .fetch(reader, self.scratch.channels_mut(), frames)
            .is_err()
        {
            // rejoin at the newest frame on the next cycle
            self.bridge.remove_reader(reader);
            self.reader = None;
        }
    }
}

impl Drop for RenderSide {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            self.bridge.remove_reader(reader);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::RenderTap;

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

    fn gain(id: u32, gain: f32) -> Arc<dyn ProcessingNode> {
        Arc::new(Gain {
            handle: NodeHandle::new(id),
            gain,
        })
    }

    fn wired(gains: &[(u32, f32)]) -> LiveGraph {
        let mut graph = LiveGraph::new(2);
        let format = AudioFormat::STANDARD;
        let mut previous = INPUT_NODE;
        for &(id, g) in gains {
            graph.attach(gain(id, g)).unwrap();
            graph.connect(previous, NodeHandle::new(id), &format).unwrap();
            previous = NodeHandle::new(id);
        }
        graph.connect(previous, OUTPUT_MIXER, &format).unwrap();
        graph
    }

    /// Left channel carries `value`, right carries `-value`
    fn interleaved(frames: usize, value: f32) -> Vec<f32> {
        (0..frames).flat_map(|_| [value, -value]).collect()
    }

    #[test]
    fn test_render_runs_published_chain() {
        let graph = wired(&[(1, 2.0), (2, 0.25)]);
        graph.set_volume(0.5);
        let bridge = Arc::new(RingBuffer::new(2, BRIDGE_FRAMES));
        let mut capture = graph.capture_side(bridge.clone());
        let mut render = graph.render_side(bridge);

        let mut out = vec![9.0f32; 128];
        // first cycle joins the bridge at its newest frame
        assert_eq!(render.render(0.0, 64, &mut out), 64);
        assert!(out.iter().all(|&s| s == 0.0));

        capture.capture(&interleaved(64, 1.0), 64, 0.0).unwrap();
        assert_eq!(render.render(64.0, 64, &mut out), 64);
        assert!(out.chunks(2).all(|frame| frame == [0.25, -0.25]));
    }

    #[test]
    fn test_incomplete_path_renders_silence() {
        let mut graph = wired(&[(1, 1.0)]);
        graph.disconnect_output(NodeHandle::new(1));
        assert!(!graph.is_complete());
        assert!(graph.published_path().is_empty());

        let bridge = Arc::new(RingBuffer::new(2, BRIDGE_FRAMES));
        let mut render = graph.render_side(bridge);
        let mut out = vec![1.0f32; 64];
        assert_eq!(render.render(0.0, 32, &mut out), 0);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_observer_sees_post_render_at_output_time() {
        let mut graph = wired(&[(1, 1.0), (2, 3.0)]);
        let ring = Arc::new(RingBuffer::new(2, 1024));
        let tap = Arc::new(RenderTap::new(ring.clone()));
        graph.add_render_notify(NodeHandle::new(2), tap.clone()).unwrap();

        let bridge = Arc::new(RingBuffer::new(2, BRIDGE_FRAMES));
        let mut capture = graph.capture_side(bridge.clone());
        let mut render = graph.render_side(bridge);
        let mut out = vec![0.0f32; 64];

        render.render(0.0, 32, &mut out);
        capture.capture(&interleaved(32, 1.0), 32, 0.0).unwrap();
        render.render(512.0, 32, &mut out);

        assert_eq!(tap.last_sample_time(), Some(512.0));
        assert_eq!(ring.time_bounds(), Some((0, 544)));
        let reader = ring.add_reader(512).unwrap();
        let mut stored = vec![vec![0.0f32; 32]; 2];
        assert_eq!(ring.fetch(reader, &mut stored, 32), Ok(32));
        assert!(stored[0].iter().all(|&s| s == 3.0));
    }

    #[test]
    fn test_plan_follows_rewiring() {
        let mut graph = wired(&[(1, 1.0), (2, 1.0)]);
        assert_eq!(graph.published_path(), vec![NodeHandle::new(1), NodeHandle::new(2)]);

        graph.detach(NodeHandle::new(2));
        assert!(!graph.is_complete());

        graph.attach(gain(3, 1.0)).unwrap();
        graph
            .connect(NodeHandle::new(1), NodeHandle::new(3), &AudioFormat::STANDARD)
            .unwrap();
        graph
            .connect(NodeHandle::new(3), OUTPUT_MIXER, &AudioFormat::STANDARD)
            .unwrap();
        assert_eq!(graph.published_path(), vec![NodeHandle::new(1), NodeHandle::new(3)]);
    }

    #[test]
    fn test_reserved_handles_cannot_be_attached() {
        let mut graph = LiveGraph::new(2);
        assert_eq!(
            graph.attach(gain(OUTPUT_MIXER.raw(), 1.0)),
            Err(OsStatus::ILLEGAL_OPERATION)
        );
        assert_eq!(
            graph.connect(INPUT_NODE, NodeHandle::new(4), &AudioFormat::STANDARD),
            Err(OsStatus::BAD_OBJECT)
        );
    }

    #[test]
    fn test_lagging_render_rejoins_bridge() {
        let graph = wired(&[(1, 1.0)]);
        let bridge = Arc::new(RingBuffer::new(2, 256));
        let mut capture = graph.capture_side(bridge.clone());
        let mut render = graph.render_side(bridge.clone());
        let mut out = vec![0.0f32; 128];

        render.render(0.0, 64, &mut out);
        // input runs far ahead of output
        for block in 0..8 {
            capture
                .capture(&interleaved(64, 1.0), 64, (block * 64) as f64)
                .unwrap();
        }
        render.render(64.0, 64, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));

        // next cycle joins at the newest frame
        render.render(128.0, 64, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));

        capture.capture(&interleaved(64, 0.5), 64, 512.0).unwrap();
        render.render(192.0, 64, &mut out);
        assert_eq!(out[0], 0.5);
        assert_eq!(out[1], -0.5);
    }

    #[test]
    fn test_capture_reports_bridge_status() {
        let graph = LiveGraph::new(2);
        let bridge = Arc::new(RingBuffer::new(2, 256));
        let mut capture = graph.capture_side(bridge.clone());

        assert_eq!(
            capture.capture(&interleaved(16, 1.0), 16, 0.0),
            Ok(StoreStatus::Contiguous)
        );
        assert_eq!(
            capture.capture(&interleaved(16, 1.0), 16, 32.0),
            Ok(StoreStatus::Gap { frames: 16 })
        );
    }
}
