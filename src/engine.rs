//! Engine - wires the driver, the signal graph and the capture path together

use crate::audio::effects::Effects;
use crate::audio::{AudioRuntime, ControlLoop, GraphState, NodeHandle, RebuildOutcome, SignalGraph};
use crate::capture::{self, RenderTap, RingBuffer, TapStats};
use crate::config::EngineConfig;
use crate::driver::{DeviceController, DeviceKind, DeviceRecord};
use crate::error::{EngineError, EngineResult};
use crate::events::Subscription;
use crate::format::AudioFormat;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// Running audio engine
///
/// Owns the graph, its control loop and the capture ring buffer. Dropping
/// the engine unsubscribes from effect changes, joins the control loop and
/// tears the graph down.
pub struct Engine {
    graph: Arc<Mutex<SignalGraph>>,
    control: ControlLoop,
    ring: Arc<RingBuffer>,
    tap: Arc<RenderTap>,
    passthrough: DeviceRecord,
    subscription: Option<Subscription>,
}

impl Engine {
    /// Build the chain on `runtime` and start it
    pub fn new(
        config: &EngineConfig,
        driver: &DeviceController,
        effects: &dyn Effects,
        runtime: Box<dyn AudioRuntime>,
    ) -> EngineResult<Self> {
        let format = AudioFormat::STANDARD;

        let passthrough = driver
            .discover_device(DeviceKind::Passthrough)?
            .ok_or(EngineError::PassthroughUnavailable)?;
        let frame_size = driver.buffer_frame_size()?;
        let capacity = capture::capacity_for(frame_size, config.ring_buffer_multiplier);
        let ring = Arc::new(RingBuffer::with_options(
            format.channel_count(),
            capacity,
            config.max_readers,
            config.back_pressure,
        ));
        info!(
            frame_size,
            capacity,
            "[Engine] Ring buffer allocated"
        );

        let mut graph = SignalGraph::new(runtime, format);
        graph.set_output_volume(config.sink_volume);
        graph.set_input_device(passthrough.id)?;
        graph.construct(effects.booster(), effects.active_equalizers())?;

        let tap = Arc::new(RenderTap::new(ring.clone()));
        if let Err(e) = graph.attach_render_tap(tap.clone()) {
            // capture is lost but audio still flows
            warn!("[Engine] {}", e);
        }

        let graph = Arc::new(Mutex::new(graph));
        let control = ControlLoop::spawn(graph.clone(), config.settle_delay())?;

        let rebuilds = control.rebuild_handle();
        let subscription = effects.type_changed().on(move |change| {
            if let Err(e) = rebuilds.request(change.nodes.clone()) {
                warn!("[Engine] Could not queue rebuild: {}", e);
            }
        });

        control.start()?;
        info!(device = passthrough.id, "[Engine] Started");

        Ok(Self {
            graph,
            control,
            ring,
            tap,
            passthrough,
            subscription: Some(subscription),
        })
    }

    pub fn start(&self) -> EngineResult<()> {
        self.control.start()
    }

    pub fn stop(&self) -> EngineResult<()> {
        self.control.stop()
    }

    /// Capture buffer fed by the render tap
    pub fn ring_buffer(&self) -> Arc<RingBuffer> {
        self.ring.clone()
    }

    /// Sample time of the last buffer the tap stored
    pub fn last_sample_time(&self) -> Option<f64> {
        self.tap.last_sample_time()
    }

    /// Tap counters; also clears the tap's error flag
    pub fn tap_stats(&self) -> (TapStats, bool) {
        (self.tap.stats(), self.tap.take_error_flag())
    }

    pub fn state(&self) -> GraphState {
        self.graph.lock().state()
    }

    pub fn chain(&self) -> Vec<NodeHandle> {
        self.graph.lock().chain()
    }

    pub fn passthrough(&self) -> &DeviceRecord {
        &self.passthrough
    }

    pub fn rebuild_outcomes(&self) -> &Receiver<RebuildOutcome> {
        self.control.outcomes()
    }

    /// Release the subscription, join the control loop and tear down
    pub fn shutdown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            self.control.shutdown();
            self.graph.lock().teardown();
            info!("[Engine] Shut down");
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
