//! Ring buffer for moving interleaved samples between threads
//!
//! This module provides the mutex-guarded circular buffer that sits between
//! the application thread and the real-time callback.
//!
//! ## Design Notes
//!
//! The lock is only ever held for a bounded, memcpy-sized critical section and
//! is uncontended in steady state. Cursors are sample indices; one frame of the
//! storage is always kept free so that `write_pos == read_pos` means empty.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Result of writing frames into a buffer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Frames actually copied
    pub frames_written: usize,
    /// True if fewer frames than requested fit (overflow)
    pub truncated: bool,
    /// Backlog in frames right after the write
    pub buffered_frames: usize,
}

/// Bounded interleaved `f32` storage with wraparound
///
/// - Producer: calls `write()` (application thread for playback, audio
///   thread for capture)
/// - Consumer: calls `read()` or takes the lock and copies out directly
///
/// ## Example
///
/// ```
/// use audiobridge::audio::RingBuffer;
///
/// let ring = RingBuffer::new(8, 2);
/// let written = ring.write(&[0.5; 6], 3);
/// assert_eq!(written.frames_written, 3);
///
/// let mut out = [0.0; 4];
/// assert_eq!(ring.read(&mut out, 2), 2);
/// ```
pub struct RingBuffer {
    inner: Mutex<RingInner>,
}

struct RingInner {
    /// Interleaved samples, `capacity_frames * channels` long
    samples: Vec<f32>,
    /// Next sample slot to write
    write_pos: usize,
    /// Next sample slot to read
    read_pos: usize,
    channels: usize,
}

impl RingInner {
    fn new(capacity_frames: usize, channels: usize) -> Self {
        let channels = channels.max(1);
        // Two frames minimum so the guard frame leaves room for one
        let capacity_frames = capacity_frames.max(2);
        Self {
            samples: vec![0.0; capacity_frames * channels],
            write_pos: 0,
            read_pos: 0,
            channels,
        }
    }

    fn capacity_frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    fn backlog_samples(&self) -> usize {
        if self.write_pos >= self.read_pos {
            self.write_pos - self.read_pos
        } else {
            self.samples.len() - self.read_pos + self.write_pos
        }
    }

    fn buffered_frames(&self) -> usize {
        self.backlog_samples() / self.channels
    }

    fn available_to_write(&self) -> usize {
        self.capacity_frames() - self.buffered_frames() - 1
    }

    fn write_from(&mut self, data: &[f32], frames: usize) -> WriteOutcome {
        let requested = frames.min(data.len() / self.channels);
        let to_write = requested.min(self.available_to_write());
        let count = to_write * self.channels;

        let len = self.samples.len();
        let pos = self.write_pos;
        // At most two contiguous segments: up to the end, then from the start
        let first = count.min(len - pos);
        self.samples[pos..pos + first].copy_from_slice(&data[..first]);
        if count > first {
            self.samples[..count - first].copy_from_slice(&data[first..count]);
        }
        self.write_pos = (pos + count) % len;

        WriteOutcome {
            frames_written: to_write,
            truncated: to_write < frames,
            buffered_frames: self.buffered_frames(),
        }
    }

    fn read_into(&mut self, dest: &mut [f32], max_frames: usize) -> usize {
        let wanted = max_frames.min(dest.len() / self.channels);
        let to_read = wanted.min(self.buffered_frames());
        let count = to_read * self.channels;

        let len = self.samples.len();
        let pos = self.read_pos;
        let first = count.min(len - pos);
        dest[..first].copy_from_slice(&self.samples[pos..pos + first]);
        if count > first {
            dest[first..count].copy_from_slice(&self.samples[..count - first]);
        }
        self.read_pos = (pos + count) % len;

        to_read
    }
}

/// Exclusive access to the buffer for one critical section
///
/// Lets the real-time path take a decision on the backlog and copy data
/// under the same lock acquisition.
pub struct RingGuard<'a> {
    inner: MutexGuard<'a, RingInner>,
}

impl RingGuard<'_> {
    /// Frames currently buffered and unread
    pub fn buffered_frames(&self) -> usize {
        self.inner.buffered_frames()
    }

    /// Frames that can be written before the buffer is full
    pub fn available_to_write(&self) -> usize {
        self.inner.available_to_write()
    }

    /// Copy up to `max_frames` frames into `dest`, returns frames read
    pub fn read_into(&mut self, dest: &mut [f32], max_frames: usize) -> usize {
        self.inner.read_into(dest, max_frames)
    }

    /// Copy up to `frames` frames from `data`, truncating when full
    pub fn write_from(&mut self, data: &[f32], frames: usize) -> WriteOutcome {
        self.inner.write_from(data, frames)
    }
}

impl RingBuffer {
    /// Create a ring buffer holding `capacity_frames` frames of `channels`
    ///
    /// At most `capacity_frames - 1` frames can be buffered at once.
    pub fn new(capacity_frames: usize, channels: usize) -> Self {
        Self {
            inner: Mutex::new(RingInner::new(capacity_frames, channels)),
        }
    }

    /// Take the lock
    ///
    /// A poisoned lock is recovered: the state is plain samples and cursors,
    /// and the audio thread must never panic on it.
    pub fn lock(&self) -> RingGuard<'_> {
        RingGuard {
            inner: self.inner.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Write up to `frames` interleaved frames from `data`
    ///
    /// Copies as many frames as fit; `truncated` is set if some did not.
    pub fn write(&self, data: &[f32], frames: usize) -> WriteOutcome {
        self.lock().write_from(data, frames)
    }

    /// Like [`RingBuffer::write`], but calls `observe` with the resulting
    /// backlog while the lock is still held
    pub fn write_observed<F>(&self, data: &[f32], frames: usize, observe: F) -> WriteOutcome
    where
        F: FnOnce(usize),
    {
        let mut guard = self.lock();
        let outcome = guard.write_from(data, frames);
        observe(outcome.buffered_frames);
        outcome
    }

    /// Read up to `max_frames` frames into `dest`
    ///
    /// Returns the frames actually read, which may be zero. Filling the rest
    /// of `dest` with silence is up to the caller.
    pub fn read(&self, dest: &mut [f32], max_frames: usize) -> usize {
        self.lock().read_into(dest, max_frames)
    }

    /// Frames currently buffered and unread
    pub fn buffered_frames(&self) -> usize {
        self.lock().buffered_frames()
    }

    /// Frames that can be written before the buffer is full
    pub fn available_to_write(&self) -> usize {
        self.lock().available_to_write()
    }

    /// Total capacity in frames (including the guard frame)
    pub fn capacity_frames(&self) -> usize {
        self.lock().inner.capacity_frames()
    }

    pub fn channels(&self) -> usize {
        self.lock().inner.channels
    }

    /// Reallocate for a new capacity, discarding buffered audio
    ///
    /// Configuration only: the owning transport calls this while stopped.
    pub fn resize(&self, capacity_frames: usize) {
        let mut guard = self.lock();
        let channels = guard.inner.channels;
        *guard.inner = RingInner::new(capacity_frames, channels);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize, channels: usize, start: f32) -> Vec<f32> {
        (0..frames * channels).map(|i| start + i as f32).collect()
    }

    #[test]
    fn test_write_then_read_in_order() {
        let ring = RingBuffer::new(16, 2);
        let data = ramp(10, 2, 0.0);

        let outcome = ring.write(&data, 10);
        assert_eq!(outcome.frames_written, 10);
        assert!(!outcome.truncated);
        assert_eq!(outcome.buffered_frames, 10);

        let mut out = vec![0.0; 20];
        assert_eq!(ring.read(&mut out, 10), 10);
        assert_eq!(out, data);
        assert_eq!(ring.buffered_frames(), 0);
    }

    #[test]
    fn test_guard_frame_limits_backlog() {
        let ring = RingBuffer::new(4, 1);
        assert_eq!(ring.available_to_write(), 3);

        let outcome = ring.write(&[1.0, 2.0, 3.0, 4.0, 5.0], 5);
        assert_eq!(outcome.frames_written, 3);
        assert!(outcome.truncated);
        assert_eq!(ring.buffered_frames(), 3);
        assert_eq!(ring.available_to_write(), 0);

        let outcome = ring.write(&[6.0], 1);
        assert_eq!(outcome.frames_written, 0);
        assert!(outcome.truncated);
    }

    #[test]
    fn test_circular_wrap() {
        let ring = RingBuffer::new(4, 2);
        let mut out = vec![0.0; 6];

        ring.write(&ramp(3, 2, 0.0), 3);
        assert_eq!(ring.read(&mut out, 3), 3);

        // Second pass crosses the end of the storage
        let data = ramp(3, 2, 100.0);
        assert_eq!(ring.write(&data, 3).frames_written, 3);
        assert_eq!(ring.read(&mut out, 3), 3);
        assert_eq!(out, data);
    }

    #[test]
    fn test_partial_read() {
        let ring = RingBuffer::new(8, 2);
        ring.write(&ramp(2, 2, 0.0), 2);

        let mut out = vec![-1.0; 8];
        assert_eq!(ring.read(&mut out, 4), 2);
        assert_eq!(&out[..4], &[0.0, 1.0, 2.0, 3.0]);
        // Untouched past what was read
        assert_eq!(&out[4..], &[-1.0; 4]);
    }

    #[test]
    fn test_frames_limited_by_slice_length() {
        let ring = RingBuffer::new(8, 2);
        let outcome = ring.write(&[1.0, 2.0, 3.0], 4);
        assert_eq!(outcome.frames_written, 1);
        assert!(outcome.truncated);

        let mut out = [0.0; 2];
        assert_eq!(ring.read(&mut out, 10), 1);
    }

    #[test]
    fn test_write_observed_sees_backlog_under_lock() {
        let ring = RingBuffer::new(8, 1);
        ring.write(&[0.0; 2], 2);

        let mut seen = None;
        ring.write_observed(&[0.0; 3], 3, |buffered| seen = Some(buffered));
        assert_eq!(seen, Some(5));
    }

    #[test]
    fn test_resize_resets_cursors() {
        let ring = RingBuffer::new(8, 2);
        ring.write(&ramp(5, 2, 0.0), 5);

        ring.resize(32);
        assert_eq!(ring.capacity_frames(), 32);
        assert_eq!(ring.buffered_frames(), 0);
        assert_eq!(ring.available_to_write(), 31);
        assert_eq!(ring.channels(), 2);
    }

    #[test]
    fn test_guard_read_and_write() {
        let ring = RingBuffer::new(8, 1);
        let mut guard = ring.lock();
        guard.write_from(&[1.0, 2.0, 3.0], 3);
        assert_eq!(guard.buffered_frames(), 3);

        let mut out = [0.0; 2];
        assert_eq!(guard.read_into(&mut out, 2), 2);
        assert_eq!(out, [1.0, 2.0]);
        assert_eq!(guard.available_to_write(), 6);
    }
}
