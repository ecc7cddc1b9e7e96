//! Render tap - real-time capture of post-chain frames

use super::ring_buffer::{RingBuffer, SampleTime};
use crate::audio::PlanarBuffer;
use crate::error::RingBufferError;
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Render action flags passed to post-render observers
///
/// Bit values follow `AudioUnitRenderActionFlags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderFlags(pub u32);

impl RenderFlags {
    pub const PRE_RENDER: RenderFlags = RenderFlags(1 << 2);
    pub const POST_RENDER: RenderFlags = RenderFlags(1 << 3);

    pub fn contains(&self, other: RenderFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Result of one render notification
///
/// Returned as a value so the audio thread never unwinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum RenderStatus {
    Stored,
    /// Not a post-render call, or no buffer attached
    Skipped,
    Failed(RingBufferError),
}

/// Callback invoked by the audio runtime around a node's render cycle
pub trait RenderObserver: Send + Sync {
    fn on_render(
        &self,
        flags: RenderFlags,
        sample_time: f64,
        frames: usize,
        buffer: &PlanarBuffer,
    ) -> RenderStatus;
}

/// Counters exposed to the control context
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TapStats {
    pub frames_stored: u64,
    pub failures: u64,
    pub last_sample_time: Option<f64>,
}

/// Render tap context
///
/// Owned by the signal graph for as long as it is registered. The target
/// ring buffer sits behind an `ArcSwapOption` so the control thread can
/// swap or detach it without the audio thread taking a lock.
pub struct RenderTap {
    target: ArcSwapOption<RingBuffer>,
    last_sample_time: AtomicU64,
    has_sample_time: AtomicBool,
    frames_stored: AtomicU64,
    failures: AtomicU64,
    error_flag: AtomicBool,
}

impl RenderTap {
    pub fn new(target: Arc<RingBuffer>) -> Self {
        Self {
            target: ArcSwapOption::new(Some(target)),
            last_sample_time: AtomicU64::new((-1.0f64).to_bits()),
            has_sample_time: AtomicBool::new(false),
            frames_stored: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            error_flag: AtomicBool::new(false),
        }
    }

    /// Replace the ring buffer receiving rendered frames
    pub fn set_target(&self, target: Option<Arc<RingBuffer>>) {
        self.target.store(target);
    }

    pub fn target(&self) -> Option<Arc<RingBuffer>> {
        self.target.load_full()
    }

    /// Sample time of the last buffer successfully stored
    pub fn last_sample_time(&self) -> Option<f64> {
        if self.has_sample_time.load(Ordering::Acquire) {
            Some(f64::from_bits(self.last_sample_time.load(Ordering::Acquire)))
        } else {
            None
        }
    }

    /// Read and clear the failure flag raised by the audio thread
    pub fn take_error_flag(&self) -> bool {
        self.error_flag.swap(false, Ordering::AcqRel)
    }

    pub fn stats(&self) -> TapStats {
        TapStats {
            frames_stored: self.frames_stored.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            last_sample_time: self.last_sample_time(),
        }
    }
}

impl RenderObserver for RenderTap {
    fn on_render(
        &self,
        flags: RenderFlags,
        sample_time: f64,
        frames: usize,
        buffer: &PlanarBuffer,
    ) -> RenderStatus {
        if !flags.contains(RenderFlags::POST_RENDER) {
            return RenderStatus::Skipped;
        }
        let guard = self.target.load();
        let Some(ring) = &*guard else {
            return RenderStatus::Skipped;
        };

        match ring.store(buffer.channels(), frames, sample_time as SampleTime) {
            Ok(_) => {
                self.last_sample_time
                    .store(sample_time.to_bits(), Ordering::Release);
                self.has_sample_time.store(true, Ordering::Release);
                self.frames_stored
                    .fetch_add(frames as u64, Ordering::Relaxed);
                RenderStatus::Stored
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.error_flag.store(true, Ordering::Release);
                RenderStatus::Failed(e)
            }
        }
    }
}
