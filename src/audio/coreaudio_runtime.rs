//! CoreAudio runtime - two AUHAL units bridged by a capture ring buffer
//!
//! The input unit deinterleaves device frames into the bridge; the output
//! unit's render callback pulls them through the published chain. Both
//! callbacks only touch the lock-free halves handed out by [`LiveGraph`].

use super::live::{LiveGraph, BRIDGE_FRAMES};
use super::node::{NodeHandle, ProcessingNode};
use super::offline::{INPUT_NODE, OUTPUT_MIXER};
use super::runtime::AudioRuntime;
use crate::capture::{RenderObserver, RingBuffer};
use crate::driver::AudioObjectId;
use crate::error::OsStatus;
use crate::format::AudioFormat;
use coreaudio::audio_unit::audio_format::LinearPcmFlags;
use coreaudio::audio_unit::render_callback::{self, data};
use coreaudio::audio_unit::{AudioUnit, Element, IOType, SampleFormat, Scope, StreamFormat};
use std::sync::Arc;
use tracing::{debug, info, warn};

type Args = render_callback::Args<data::Interleaved<f32>>;

fn os_error(e: coreaudio::Error) -> OsStatus {
    OsStatus(e.as_os_status())
}

struct Units {
    input: AudioUnit,
    output: AudioUnit,
}

/// [`AudioRuntime`] rendering through the system's audio units
pub struct CoreAudioRuntime {
    graph: LiveGraph,
    format: AudioFormat,
    input_device: Option<AudioObjectId>,
    units: Option<Units>,
}

// Audio units are only created, started and dropped on the control context.
unsafe impl Send for CoreAudioRuntime {}

impl CoreAudioRuntime {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            graph: LiveGraph::new(format.channel_count()),
            format,
            input_device: None,
            units: None,
        }
    }

    fn stream_format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.format.sample_rate,
            sample_format: SampleFormat::F32,
            flags: LinearPcmFlags::IS_FLOAT | LinearPcmFlags::IS_PACKED,
            channels: self.format.channels,
        }
    }

    fn open_input(&self, device: AudioObjectId, bridge: Arc<RingBuffer>) -> Result<AudioUnit, OsStatus> {
        let mut unit = AudioUnit::new(IOType::HalOutput).map_err(os_error)?;
        unit.uninitialize().map_err(os_error)?;

        unit.set_property(
            coreaudio::sys::kAudioOutputUnitProperty_EnableIO,
            Scope::Input,
            Element::Input,
            Some(&1u32),
        )
        .map_err(os_error)?;
        unit.set_property(
            coreaudio::sys::kAudioOutputUnitProperty_EnableIO,
            Scope::Output,
            Element::Output,
            Some(&0u32),
        )
        .map_err(os_error)?;
        unit.set_property(
            coreaudio::sys::kAudioOutputUnitProperty_CurrentDevice,
            Scope::Global,
            Element::Output,
            Some(&device),
        )
        .map_err(os_error)?;
        unit.set_property(
            coreaudio::sys::kAudioUnitProperty_StreamFormat,
            Scope::Output,
            Element::Input,
            Some(&self.stream_format().to_asbd()),
        )
        .map_err(os_error)?;

        let mut capture = self.graph.capture_side(bridge);
        unit.set_input_callback(move |args: Args| {
            let Args {
                data,
                num_frames,
                time_stamp,
                ..
            } = args;
            let _ = capture.capture(data.buffer, num_frames, time_stamp.mSampleTime);
            Ok(())
        })
        .map_err(os_error)?;

        unit.initialize().map_err(os_error)?;
        Ok(unit)
    }

    fn open_output(&self, bridge: Arc<RingBuffer>) -> Result<AudioUnit, OsStatus> {
        let mut unit = AudioUnit::new(IOType::DefaultOutput).map_err(os_error)?;
        unit.uninitialize().map_err(os_error)?;

        unit.set_property(
            coreaudio::sys::kAudioUnitProperty_StreamFormat,
            Scope::Input,
            Element::Output,
            Some(&self.stream_format().to_asbd()),
        )
        .map_err(os_error)?;

        let mut render = self.graph.render_side(bridge);
        unit.set_render_callback(move |args: Args| {
            let Args {
                data,
                num_frames,
                time_stamp,
                ..
            } = args;
            render.render(time_stamp.mSampleTime, num_frames, data.buffer);
            Ok(())
        })
        .map_err(os_error)?;

        unit.initialize().map_err(os_error)?;
        Ok(unit)
    }
}

impl AudioRuntime for CoreAudioRuntime {
    fn input_node(&self) -> NodeHandle {
        INPUT_NODE
    }

    fn output_mixer(&self) -> NodeHandle {
        OUTPUT_MIXER
    }

    fn set_input_device(&mut self, device: AudioObjectId) -> Result<(), OsStatus> {
        if self.units.is_some() {
            return Err(OsStatus::CANNOT_DO_IN_CURRENT_CONTEXT);
        }
        self.input_device = Some(device);
        Ok(())
    }

    fn set_output_volume(&mut self, volume: f32) {
        self.graph.set_volume(volume);
    }

    fn attach(&mut self, node: Arc<dyn ProcessingNode>) -> Result<(), OsStatus> {
        self.graph.attach(node)
    }

    fn detach(&mut self, node: NodeHandle) {
        self.graph.detach(node);
    }

    fn connect(
        &mut self,
        source: NodeHandle,
        target: NodeHandle,
        format: &AudioFormat,
    ) -> Result<(), OsStatus> {
        self.graph.connect(source, target, format)
    }

    fn disconnect_output(&mut self, node: NodeHandle) {
        self.graph.disconnect_output(node);
    }

    fn add_render_notify(
        &mut self,
        node: NodeHandle,
        observer: Arc<dyn RenderObserver>,
    ) -> Result<(), OsStatus> {
        self.graph.add_render_notify(node, observer)
    }

    fn remove_render_notify(&mut self, node: NodeHandle) {
        self.graph.remove_render_notify(node);
    }

    // Render scratch lives in the callback halves built by start().
    fn prepare(&mut self) {}

    fn start(&mut self) -> Result<(), OsStatus> {
        if self.units.is_some() {
            return Ok(());
        }
        let device = self.input_device.ok_or(OsStatus::BAD_OBJECT)?;
        if !self.graph.has_input_path() {
            return Err(OsStatus::ILLEGAL_OPERATION);
        }

        let bridge = Arc::new(RingBuffer::new(self.graph.channel_count(), BRIDGE_FRAMES));
        let mut input = self.open_input(device, bridge.clone())?;
        let mut output = self.open_output(bridge)?;

        input.start().map_err(os_error)?;
        if let Err(e) = output.start() {
            let _ = input.stop();
            return Err(os_error(e));
        }
        info!(
            "[CoreAudioRuntime] Started: input device {} path {:?}",
            device,
            self.graph.published_path()
        );
        self.units = Some(Units { input, output });
        Ok(())
    }

    fn stop(&mut self) {
        let Some(mut units) = self.units.take() else {
            return;
        };
        if let Err(e) = units.output.stop() {
            warn!("[CoreAudioRuntime] Output unit stop failed: {:?}", e);
        }
        if let Err(e) = units.input.stop() {
            warn!("[CoreAudioRuntime] Input unit stop failed: {:?}", e);
        }
        debug!("[CoreAudioRuntime] Stopped");
    }

    fn is_running(&self) -> bool {
        self.units.is_some()
    }
}

impl Drop for CoreAudioRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}
