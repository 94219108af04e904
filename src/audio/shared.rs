//! Lock-free SPSC channel over an externally owned memory region
//!
//! Region layout (shared with the other side, e.g. a worklet or another
//! process):
//!
//! ```text
//! [0..4)  write-index  i32, atomic, frames
//! [4..8)  read-index   i32, atomic, frames
//! [8..)   capacity_frames * channels interleaved f32 samples
//! ```
//!
//! Only the producer stores the write-index and only the consumer stores the
//! read-index. Each side loads its own cursor relaxed and the remote one with
//! acquire, and publishes its cursor with release after copying samples.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicI32, Ordering};

use super::buffer::WriteOutcome;
use crate::error::{Result, StreamError};

/// Bytes taken by the two cursors at the start of the region
pub const HEADER_BYTES: usize = 8;

/// Bytes a region needs for `capacity_frames` frames of `channels`
pub fn required_bytes(capacity_frames: usize, channels: usize) -> usize {
    HEADER_BYTES + capacity_frames * channels * std::mem::size_of::<f32>()
}

/// Borrowed view of a caller-owned memory region
///
/// Holds the address and length only; the memory is never allocated or freed
/// through this type.
#[derive(Clone, Copy, Debug)]
pub struct SharedRegion {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is only a pointer + length. All accesses through
// SharedTransport use atomics for the cursors and the SPSC protocol for the
// sample area.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Wrap `len` bytes at `ptr`
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as
    /// any [`SharedTransport`] attached to this region is alive, and the
    /// other side must follow the cursor protocol described in the module
    /// docs.
    pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize) -> Result<Self> {
        let base = NonNull::new(ptr).ok_or(StreamError::NullRegion)?;
        if base.as_ptr() as usize % std::mem::align_of::<AtomicI32>() != 0 {
            return Err(StreamError::MisalignedRegion);
        }
        Ok(Self { base, len })
    }

    /// Size of the region in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Typed, bounds-checked SPSC view built once at attach time
pub struct SharedTransport {
    write_index: NonNull<AtomicI32>,
    read_index: NonNull<AtomicI32>,
    samples: NonNull<f32>,
    capacity_frames: usize,
    channels: usize,
}

// SAFETY: see SharedRegion. The transport is used from one side of the
// channel at a time (the owning AudioTransport serialises access).
unsafe impl Send for SharedTransport {}

impl SharedTransport {
    /// Validate `region` and build a view over it
    ///
    /// Resets the read-index to zero; the write-index is left to the
    /// producer side.
    pub fn attach(region: SharedRegion, capacity_frames: usize, channels: usize) -> Result<Self> {
        let channels = channels.max(1);
        let total_samples = capacity_frames
            .checked_mul(channels)
            .filter(|_| capacity_frames >= 2 && capacity_frames <= i32::MAX as usize)
            .ok_or(StreamError::InvalidCapacity(capacity_frames))?;
        let required = total_samples
            .checked_mul(std::mem::size_of::<f32>())
            .and_then(|bytes| bytes.checked_add(HEADER_BYTES))
            .ok_or(StreamError::InvalidCapacity(capacity_frames))?;
        if region.len < required {
            return Err(StreamError::RegionTooSmall {
                required,
                actual: region.len,
            });
        }

        let base = region.base.as_ptr();
        // SAFETY: the region is at least HEADER_BYTES long and 4-byte aligned,
        // so both cursors and the sample area lie inside it.
        let transport = unsafe {
            Self {
                write_index: NonNull::new_unchecked(base.cast::<AtomicI32>()),
                read_index: NonNull::new_unchecked(base.add(4).cast::<AtomicI32>()),
                samples: NonNull::new_unchecked(base.add(HEADER_BYTES).cast::<f32>()),
                capacity_frames,
                channels,
            }
        };
        transport.read_index().store(0, Ordering::Release);
        Ok(transport)
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    fn write_index(&self) -> &AtomicI32 {
        // SAFETY: points inside the attached region, valid while attached
        unsafe { self.write_index.as_ref() }
    }

    fn read_index(&self) -> &AtomicI32 {
        // SAFETY: as above
        unsafe { self.read_index.as_ref() }
    }

    /// Load a cursor, folding out-of-range values written by the peer
    fn load_cursor(&self, cursor: &AtomicI32, order: Ordering) -> usize {
        (cursor.load(order) as i64).rem_euclid(self.capacity_frames as i64) as usize
    }

    fn backlog(&self, write: usize, read: usize) -> usize {
        if write >= read {
            write - read
        } else {
            self.capacity_frames - read + write
        }
    }

    /// Frames the producer has published and the consumer not yet taken
    pub fn buffered_frames(&self) -> usize {
        let write = self.load_cursor(self.write_index(), Ordering::Acquire);
        let read = self.load_cursor(self.read_index(), Ordering::Acquire);
        self.backlog(write, read)
    }

    /// Frames the producer could write right now
    pub fn available_to_write(&self) -> usize {
        self.capacity_frames - 1 - self.buffered_frames()
    }

    /// Consumer side: copy up to `max_frames` frames into `dest`
    ///
    /// Lock-free and allocation-free; safe on the real-time thread.
    pub fn read_into(&self, dest: &mut [f32], max_frames: usize) -> usize {
        let write = self.load_cursor(self.write_index(), Ordering::Acquire);
        let read = self.load_cursor(self.read_index(), Ordering::Relaxed);

        let to_read = self
            .backlog(write, read)
            .min(max_frames)
            .min(dest.len() / self.channels);
        if to_read == 0 {
            return 0;
        }

        let first = to_read.min(self.capacity_frames - read);
        let ch = self.channels;
        // SAFETY: read + first <= capacity_frames and the second segment
        // starts at frame 0, so both copies stay inside the sample area. The
        // producer does not touch frames in [read, write) until we publish.
        unsafe {
            ptr::copy_nonoverlapping(
                self.samples.as_ptr().add(read * ch),
                dest.as_mut_ptr(),
                first * ch,
            );
            ptr::copy_nonoverlapping(
                self.samples.as_ptr(),
                dest.as_mut_ptr().add(first * ch),
                (to_read - first) * ch,
            );
        }

        let next = (read + to_read) % self.capacity_frames;
        self.read_index().store(next as i32, Ordering::Release);
        to_read
    }

    /// Producer side: copy up to `frames` frames from `data`
    ///
    /// Keeps one guard frame free. `truncated` is set when not everything
    /// fit; the rest is dropped.
    pub fn write_from(&self, data: &[f32], frames: usize) -> WriteOutcome {
        let write = self.load_cursor(self.write_index(), Ordering::Relaxed);
        let read = self.load_cursor(self.read_index(), Ordering::Acquire);

        let backlog = self.backlog(write, read);
        let free = self.capacity_frames - 1 - backlog;
        let to_write = frames.min(data.len() / self.channels).min(free);

        if to_write > 0 {
            let first = to_write.min(self.capacity_frames - write);
            let ch = self.channels;
            // SAFETY: same bounds as read_into; frames in [write, read - 1)
            // belong to the producer until the write-index is published.
            unsafe {
                ptr::copy_nonoverlapping(
                    data.as_ptr(),
                    self.samples.as_ptr().add(write * ch),
                    first * ch,
                );
                ptr::copy_nonoverlapping(
                    data.as_ptr().add(first * ch),
                    self.samples.as_ptr(),
                    (to_write - first) * ch,
                );
            }
            let next = (write + to_write) % self.capacity_frames;
            self.write_index().store(next as i32, Ordering::Release);
        }

        WriteOutcome {
            frames_written: to_write,
            truncated: to_write < frames,
            buffered_frames: backlog + to_write,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::AtomicU32;

    use super::SharedRegion;

    /// Word-aligned heap memory standing in for a shared segment
    pub struct TestMemory {
        words: Box<[AtomicU32]>,
        len: usize,
    }

    impl TestMemory {
        pub fn new(len: usize) -> Self {
            Self {
                words: (0..len.div_ceil(4)).map(|_| AtomicU32::new(0)).collect(),
                len,
            }
        }

        pub fn region(&self) -> SharedRegion {
            // SAFETY: the words outlive every transport in the tests that use them
            unsafe { SharedRegion::from_raw_parts(self.words.as_ptr() as *mut u8, self.len) }
                .unwrap()
        }

        pub fn word(&self, index: usize) -> &AtomicU32 {
            &self.words[index]
        }
    }
}
