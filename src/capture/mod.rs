//! Capture Module - post-chain audio made available to monitoring consumers
//!
//! The render tap runs on the audio thread after the last chain node has
//! rendered a buffer and copies those frames into the shared ring buffer.

mod ring_buffer;
mod tap;

pub use ring_buffer::*;
pub use tap::{RenderFlags, RenderObserver, RenderStatus, RenderTap, TapStats};

/// Ring buffer capacity for a device buffer size and multiplier
pub fn capacity_for(buffer_frame_size: u32, multiplier: u32) -> usize {
    (buffer_frame_size as usize).saturating_mul(multiplier.max(1) as usize)
}
