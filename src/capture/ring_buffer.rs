//! Ring Buffer for audio capture
//!
//! Time-indexed, planar circular store written by the render tap and read
//! by any number of monitoring consumers.
//!
//! The writer owns two cursors expressed in absolute sample time: `end`
//! (one past the newest frame) and `start` (the oldest frame still valid).
//! A store first moves `start` forward past the region it is about to
//! overwrite, then writes the samples, then publishes `end` with Release.
//! Readers load `end` with Acquire, copy, and re-check `start` behind an
//! Acquire fence; if their region was reclaimed during the copy the read
//! is reported as an underrun instead of returning torn data. A rewinding
//! store also bumps a generation counter, since it rewrites slots inside
//! the region that stays valid.

use crate::error::RingBufferError;
use std::sync::atomic::{fence, AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

/// Absolute sample time (frames since the device clock started)
pub type SampleTime = i64;

/// Default number of reader slots
pub const DEFAULT_MAX_READERS: usize = 8;

const NO_TIME: i64 = i64::MIN;

/// Identifier of a registered reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderId(usize);

impl ReaderId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// How a store related to the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    /// Continues exactly where the last store ended (or is the first store)
    Contiguous,
    /// Starts after the last store; the gap was filled with silence
    Gap { frames: u64 },
    /// Starts before the end of the last store; older contents were discarded
    Rewound { frames: u64 },
}

impl StoreStatus {
    pub fn is_discontinuity(&self) -> bool {
        !matches!(self, StoreStatus::Contiguous)
    }
}

/// One channel of sample storage
///
/// Samples are kept as `f32` bit patterns in atomics so the writer and
/// readers never race on plain memory.
struct ChannelBuffer {
    data: Box<[AtomicU32]>,
}

impl ChannelBuffer {
    fn new(size: usize) -> Self {
        Self {
            data: (0..size).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    #[inline]
    fn write(&self, index: usize, sample: f32) {
        self.data[index].store(sample.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    fn read(&self, index: usize) -> f32 {
        f32::from_bits(self.data[index].load(Ordering::Relaxed))
    }
}

/// Read cursor for one consumer (lock-free)
struct ReaderSlot {
    active: AtomicBool,
    cursor: AtomicI64,
}

impl ReaderSlot {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            cursor: AtomicI64::new(0),
        }
    }
}

/// Circular buffer of planar float frames indexed by sample time
pub struct RingBuffer {
    channels: Box<[ChannelBuffer]>,
    capacity: usize,
    mask: usize,
    start: AtomicI64,
    end: AtomicI64,
    /// Incremented by every rewinding store before it touches samples
    generation: AtomicU64,
    readers: Box<[ReaderSlot]>,
    back_pressure: bool,
    discontinuities: AtomicU64,
    overruns: AtomicU64,
}

impl RingBuffer {
    /// Create a buffer holding at least `capacity_frames` frames per channel
    ///
    /// The capacity is rounded up to a power of two.
    pub fn new(channel_count: usize, capacity_frames: usize) -> Self {
        Self::with_options(channel_count, capacity_frames, DEFAULT_MAX_READERS, false)
    }

    /// Create a buffer with an explicit reader limit and overrun policy
    ///
    /// With `back_pressure` enabled a store that would overwrite frames an
    /// active reader has not consumed is rejected with
    /// [`RingBufferError::Overrun`]; otherwise the oldest frames are
    /// overwritten and the lagging reader sees an underrun on its next fetch.
    pub fn with_options(
        channel_count: usize,
        capacity_frames: usize,
        max_readers: usize,
        back_pressure: bool,
    ) -> Self {
        let capacity = capacity_frames.max(1).next_power_of_two();
        Self {
            channels: (0..channel_count)
                .map(|_| ChannelBuffer::new(capacity))
                .collect(),
            capacity,
            mask: capacity - 1,
            start: AtomicI64::new(NO_TIME),
            end: AtomicI64::new(NO_TIME),
            generation: AtomicU64::new(0),
            readers: (0..max_readers.max(1)).map(|_| ReaderSlot::new()).collect(),
            back_pressure,
            discontinuities: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
        }
    }

    /// Capacity in frames per channel
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Valid time range `[start, end)`, or `None` before the first store
    pub fn time_bounds(&self) -> Option<(SampleTime, SampleTime)> {
        let end = self.end.load(Ordering::Acquire);
        if end == NO_TIME {
            return None;
        }
        Some((self.start.load(Ordering::Acquire), end))
    }

    /// Sample time one past the newest stored frame
    pub fn write_cursor(&self) -> Option<SampleTime> {
        self.time_bounds().map(|(_, end)| end)
    }

    /// Number of discontinuous stores seen so far
    pub fn discontinuities(&self) -> u64 {
        self.discontinuities.load(Ordering::Relaxed)
    }

    /// Number of stores rejected because of back-pressure
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Write `frames` frames starting at `start_time`
    ///
    /// Called from the render thread: wait-free and allocation-free. Every
    /// failure is returned as a value and leaves the buffer untouched.
    pub fn store<B: AsRef<[f32]>>(
        &self,
        buffers: &[B],
        frames: usize,
        start_time: SampleTime,
    ) -> Result<StoreStatus, RingBufferError> {
        if buffers.len() != self.channels.len() {
            return Err(RingBufferError::FormatMismatch {
                expected: self.channels.len(),
                found: buffers.len(),
            });
        }
        if frames == 0 {
            return Ok(StoreStatus::Contiguous);
        }
        if frames > self.capacity {
            return Err(RingBufferError::TooMuch {
                frames,
                capacity: self.capacity,
            });
        }
        if buffers.iter().any(|b| b.as_ref().len() < frames) {
            return Err(RingBufferError::ShortBuffer {
                frames,
                found: buffers
                    .iter()
                    .map(|b| b.as_ref().len())
                    .min()
                    .unwrap_or(0),
            });
        }

        let capacity = self.capacity as i64;
        let end_write = start_time + frames as i64;
        let cur_start = self.start.load(Ordering::Relaxed);
        let cur_end = self.end.load(Ordering::Relaxed);

        let status = if cur_end == NO_TIME || start_time == cur_end {
            StoreStatus::Contiguous
        } else if start_time > cur_end {
            StoreStatus::Gap {
                frames: (start_time - cur_end) as u64,
            }
        } else {
            StoreStatus::Rewound {
                frames: (cur_end - start_time) as u64,
            }
        };

        if self.back_pressure {
            if let Some(reader) = self.first_overrun_reader(end_write) {
                self.overruns.fetch_add(1, Ordering::Relaxed);
                return Err(RingBufferError::Overrun { reader });
            }
        }

        // Region that stays valid after this store
        let new_start = match status {
            StoreStatus::Rewound { .. } => start_time,
            _ if cur_end == NO_TIME => start_time,
            _ => cur_start.max(end_write - capacity),
        };

        // Invalidate the region being reclaimed before touching samples
        self.start.store(new_start, Ordering::Relaxed);
        if let StoreStatus::Rewound { .. } = status {
            self.end.store(start_time, Ordering::Relaxed);
            // a reader that sees the new generation also sees the moved cursors
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        fence(Ordering::Release);

        if let StoreStatus::Gap { .. } = status {
            let silence_from = cur_end.max(start_time - capacity);
            for t in silence_from..start_time {
                let index = (t as usize) & self.mask;
                for channel in self.channels.iter() {
                    channel.write(index, 0.0);
                }
            }
        }

        for (channel, source) in self.channels.iter().zip(buffers) {
            let samples = &source.as_ref()[..frames];
            for (i, &sample) in samples.iter().enumerate() {
                let index = ((start_time + i as i64) as usize) & self.mask;
                channel.write(index, sample);
            }
        }

        self.end.store(end_write, Ordering::Release);

        if status.is_discontinuity() {
            self.discontinuities.fetch_add(1, Ordering::Relaxed);
        }
        Ok(status)
    }

    fn first_overrun_reader(&self, end_write: SampleTime) -> Option<usize> {
        self.readers.iter().enumerate().find_map(|(i, slot)| {
            if !slot.active.load(Ordering::Acquire) {
                return None;
            }
            let cursor = slot.cursor.load(Ordering::Acquire);
            (end_write - cursor > self.capacity as i64).then_some(i)
        })
    }

    /// Register a reader whose first fetch starts at `start_time`
    pub fn add_reader(&self, start_time: SampleTime) -> Result<ReaderId, RingBufferError> {
        for (i, slot) in self.readers.iter().enumerate() {
            if slot
                .active
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                slot.cursor.store(start_time, Ordering::Release);
                return Ok(ReaderId(i));
            }
        }
        Err(RingBufferError::ReadersExhausted)
    }

    /// Register a reader starting at the newest frame
    pub fn add_reader_at_end(&self) -> Result<ReaderId, RingBufferError> {
        let start = self.write_cursor().unwrap_or(0);
        self.add_reader(start)
    }

    pub fn remove_reader(&self, reader: ReaderId) -> bool {
        match self.readers.get(reader.0) {
            Some(slot) => slot.active.swap(false, Ordering::AcqRel),
            None => false,
        }
    }

    /// Current position of a reader
    pub fn reader_position(&self, reader: ReaderId) -> Result<SampleTime, RingBufferError> {
        let slot = self.slot(reader)?;
        Ok(slot.cursor.load(Ordering::Acquire))
    }

    /// Move a reader to the oldest valid frame
    pub fn resync(&self, reader: ReaderId) -> Result<SampleTime, RingBufferError> {
        let slot = self.slot(reader)?;
        let position = self.time_bounds().map(|(start, _)| start).unwrap_or(0);
        slot.cursor.store(position, Ordering::Release);
        Ok(position)
    }

    fn slot(&self, reader: ReaderId) -> Result<&ReaderSlot, RingBufferError> {
        match self.readers.get(reader.0) {
            Some(slot) if slot.active.load(Ordering::Acquire) => Ok(slot),
            _ => Err(RingBufferError::UnknownReader(reader.0)),
        }
    }

    /// Read up to `frames` frames from the reader's cursor into `out`
    ///
    /// Returns the number of frames copied, which is smaller than requested
    /// when the writer has not produced that many yet. Output beyond the
    /// returned count is left untouched.
    pub fn fetch<B: AsMut<[f32]>>(
        &self,
        reader: ReaderId,
        out: &mut [B],
        frames: usize,
    ) -> Result<usize, RingBufferError> {
        if out.len() != self.channels.len() {
            return Err(RingBufferError::FormatMismatch {
                expected: self.channels.len(),
                found: out.len(),
            });
        }
        let slot = self.slot(reader)?;
        let cursor = slot.cursor.load(Ordering::Acquire);

        let generation = self.generation.load(Ordering::Acquire);
        let end = self.end.load(Ordering::Acquire);
        if end == NO_TIME {
            return Ok(0);
        }
        let start = self.start.load(Ordering::Acquire);
        if cursor < start || end - cursor > self.capacity as i64 {
            return Err(RingBufferError::Underrun {
                lag: (end - cursor) as u64,
                capacity: self.capacity,
            });
        }

        let available = (end - cursor).max(0) as usize;
        let count = frames
            .min(available)
            .min(out.iter_mut().map(|b| b.as_mut().len()).min().unwrap_or(0));

        for (channel, dest) in self.channels.iter().zip(out.iter_mut()) {
            let dest = dest.as_mut();
            for (i, sample) in dest[..count].iter_mut().enumerate() {
                let index = ((cursor + i as i64) as usize) & self.mask;
                *sample = channel.read(index);
            }
        }

        // The writer may have reclaimed or rewritten our region while we copied
        fence(Ordering::Acquire);
        if self.generation.load(Ordering::Relaxed) != generation {
            return Err(RingBufferError::Rewound { cursor });
        }
        let start_after = self.start.load(Ordering::Relaxed);
        if cursor < start_after {
            return Err(RingBufferError::Underrun {
                lag: (self.end.load(Ordering::Relaxed) - cursor) as u64,
                capacity: self.capacity,
            });
        }

        slot.cursor.store(cursor + count as i64, Ordering::Release);
        Ok(count)
    }
}
