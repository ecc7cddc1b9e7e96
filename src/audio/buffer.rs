//! Audio Buffer implementation

use super::MAX_FRAMES;

/// Mono buffer with a fixed capacity of `MAX_FRAMES`
///
/// Allocated once on the control thread; the render path only changes the
/// number of valid frames.
pub struct AudioBuffer {
    data: Box<[f32; MAX_FRAMES]>,
    valid_frames: usize,
}

impl AudioBuffer {
    pub fn new() -> Self {
        Self {
            data: Box::new([0.0; MAX_FRAMES]),
            valid_frames: 0,
        }
    }

    /// Fill `frames` frames with silence and mark them valid
    pub fn clear(&mut self, frames: usize) {
        let frames = frames.min(MAX_FRAMES);
        self.data[..frames].fill(0.0);
        self.valid_frames = frames;
    }

    pub fn valid_frames(&self) -> usize {
        self.valid_frames
    }

    pub fn set_valid_frames(&mut self, frames: usize) {
        self.valid_frames = frames.min(MAX_FRAMES);
    }

    pub fn samples(&self) -> &[f32] {
        &self.data[..self.valid_frames]
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.data[..self.valid_frames]
    }

    /// Apply gain in-place
    pub fn apply_gain(&mut self, gain: f32) {
        for sample in self.samples_mut() {
            *sample *= gain;
        }
    }

    /// Write raw samples directly into the buffer
    pub fn write_samples(&mut self, samples: &[f32]) {
        let frames = samples.len().min(MAX_FRAMES);
        self.data[..frames].copy_from_slice(&samples[..frames]);
        self.valid_frames = frames;
    }

    /// Absolute peak of the valid frames
    pub fn peak(&self) -> f32 {
        self.samples().iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<[f32]> for AudioBuffer {
    fn as_ref(&self) -> &[f32] {
        self.samples()
    }
}

impl AsMut<[f32]> for AudioBuffer {
    fn as_mut(&mut self) -> &mut [f32] {
        self.samples_mut()
    }
}

/// Non-interleaved multi-channel buffer handed between chain stages
pub struct PlanarBuffer {
    channels: Vec<AudioBuffer>,
}

impl PlanarBuffer {
    pub fn new(channel_count: usize) -> Self {
        Self {
            channels: (0..channel_count).map(|_| AudioBuffer::new()).collect(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of valid frames (shortest channel)
    pub fn frames(&self) -> usize {
        self.channels
            .iter()
            .map(AudioBuffer::valid_frames)
            .min()
            .unwrap_or(0)
    }

    pub fn channels(&self) -> &[AudioBuffer] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [AudioBuffer] {
        &mut self.channels
    }

    pub fn channel(&self, index: usize) -> Option<&AudioBuffer> {
        self.channels.get(index)
    }

    pub fn clear(&mut self, frames: usize) {
        for channel in &mut self.channels {
            channel.clear(frames);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_gain() {
        let mut buffer = AudioBuffer::new();
        buffer.write_samples(&[0.5, -0.25, 1.0]);
        buffer.apply_gain(2.0);

        assert_eq!(buffer.samples(), &[1.0, -0.5, 2.0]);
        assert_eq!(buffer.peak(), 2.0);
    }

    #[test]
    fn test_write_is_clamped_to_capacity() {
        let mut buffer = AudioBuffer::new();
        buffer.write_samples(&vec![1.0; MAX_FRAMES + 10]);
        assert_eq!(buffer.valid_frames(), MAX_FRAMES);
    }

    #[test]
    fn test_planar_frames() {
        let mut planar = PlanarBuffer::new(2);
        planar.clear(128);
        assert_eq!(planar.frames(), 128);

        planar.channels_mut()[1].set_valid_frames(64);
        assert_eq!(planar.frames(), 64);
    }
}
