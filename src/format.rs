//! Stream format shared by every connection in the signal graph

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample rate used by the engine (Hz)
pub const SAMPLE_RATE: f64 = 44_100.0;

/// Channel count used by the engine
pub const CHANNELS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    F32,
}

/// Linear PCM format of a connection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: f64,
    pub channels: u32,
    pub sample_format: SampleFormat,
    /// Planar (non-interleaved) buffers when false
    pub interleaved: bool,
}

impl AudioFormat {
    /// 44.1 kHz stereo float32, non-interleaved
    pub const STANDARD: AudioFormat = AudioFormat {
        sample_rate: SAMPLE_RATE,
        channels: CHANNELS,
        sample_format: SampleFormat::F32,
        interleaved: false,
    };

    pub fn channel_count(&self) -> usize {
        self.channels as usize
    }

    /// Whether two formats can be connected without conversion
    pub fn is_compatible(&self, other: &AudioFormat) -> bool {
        self.channels == other.channels
            && self.sample_format == other.sample_format
            && self.interleaved == other.interleaved
            && (self.sample_rate - other.sample_rate).abs() < f64::EPSILON
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {:?}, {}",
            self.sample_rate,
            self.channels,
            self.sample_format,
            if self.interleaved { "interleaved" } else { "planar" }
        )
    }
}
