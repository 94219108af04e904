//! Backend abstraction - connects a transport to an audio engine
//!
//! The transport never talks to the engine directly. A backend takes the
//! [`RtProcessor`] for one stream and calls it once per engine period from
//! whatever thread the engine uses.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::transport::{RtProcessor, StreamSpec};
use crate::error::{Result, StreamError};

/// Audio engine that can open streams
///
/// Implementations must be shareable: one backend usually serves every
/// transport in the process.
pub trait AudioBackend: Send + Sync {
    /// Open a stream for `spec` and start driving `processor`
    ///
    /// On error nothing stays allocated and `processor` is dropped.
    fn open(&self, spec: &StreamSpec, processor: RtProcessor) -> Result<Box<dyn BackendStream>>;
}

/// Live connection to the engine
///
/// Dropping it disconnects; no period is processed after the drop returns.
pub trait BackendStream {
    /// Frames exchanged with the engine so far
    fn frames_processed(&self) -> u64;
}

type Slot = Arc<Mutex<Option<RtProcessor>>>;

fn lock_slot(slot: &Mutex<Option<RtProcessor>>) -> MutexGuard<'_, Option<RtProcessor>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Backend driven by hand
///
/// Holds the processor of the most recently opened stream; `render` and
/// `capture` run one period on the calling thread. Used by tests and by
/// hosts that already own an audio callback.
#[derive(Default)]
pub struct ManualBackend {
    slot: Slot,
    frames: Arc<AtomicU64>,
    fail_next_open: AtomicBool,
}

impl ManualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `open` fail with [`StreamError::NoDevice`]
    pub fn fail_next_open(&self) {
        self.fail_next_open.store(true, Ordering::Relaxed);
    }

    /// True while a stream opened on this backend is alive
    pub fn is_open(&self) -> bool {
        lock_slot(&self.slot).is_some()
    }

    /// Run one playback period into `dest`
    ///
    /// Returns the frames rendered, or zero with `dest` untouched when no
    /// stream is open.
    pub fn render(&self, dest: &mut [f32], requested_frames: Option<usize>) -> usize {
        let mut slot = lock_slot(&self.slot);
        let Some(processor) = slot.as_mut() else {
            return 0;
        };
        let frames = processor.render(dest, requested_frames);
        self.frames.fetch_add(frames as u64, Ordering::Relaxed);
        frames
    }

    /// Run one capture period with `captured` as the engine's input
    pub fn capture(&self, captured: &[f32]) -> usize {
        let mut slot = lock_slot(&self.slot);
        let Some(processor) = slot.as_mut() else {
            return 0;
        };
        let frames = processor.capture(captured);
        self.frames.fetch_add(frames as u64, Ordering::Relaxed);
        frames
    }
}

impl AudioBackend for ManualBackend {
    fn open(&self, spec: &StreamSpec, processor: RtProcessor) -> Result<Box<dyn BackendStream>> {
        if self.fail_next_open.swap(false, Ordering::Relaxed) {
            return Err(StreamError::NoDevice(spec.direction));
        }

        *lock_slot(&self.slot) = Some(processor);
        self.frames.store(0, Ordering::Relaxed);
        log::debug!("Manual stream opened: {}", spec.name);

        Ok(Box::new(ManualStream {
            slot: Arc::clone(&self.slot),
            frames: Arc::clone(&self.frames),
        }))
    }
}

struct ManualStream {
    slot: Slot,
    frames: Arc<AtomicU64>,
}

impl BackendStream for ManualStream {
    fn frames_processed(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl Drop for ManualStream {
    fn drop(&mut self) {
        // Waits out a period in progress on another thread
        lock_slot(&self.slot).take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioTransport, Direction};

    #[test]
    fn test_render_without_stream() {
        let backend = ManualBackend::new();
        let mut dest = [1.0f32; 4];
        assert_eq!(backend.render(&mut dest, None), 0);
        assert_eq!(dest, [1.0; 4]);
        assert_eq!(backend.capture(&dest), 0);
    }

    #[test]
    fn test_fail_next_open_is_one_shot() {
        let backend = Arc::new(ManualBackend::new());
        let spec = StreamSpec::new("in", 1, 48000, 0).direction(Direction::Input);
        let mut transport = AudioTransport::new(spec, backend.clone()).unwrap();

        backend.fail_next_open();
        assert!(!transport.start());
        assert!(transport.start());
        assert!(backend.is_open());
    }

    #[test]
    fn test_frames_counted_per_stream() {
        let backend = Arc::new(ManualBackend::new());
        let spec = StreamSpec::new("in", 1, 48000, 0).direction(Direction::Input);
        let mut transport = AudioTransport::new(spec, backend.clone()).unwrap();
        assert!(transport.start());

        backend.capture(&[0.0; 32]);
        backend.capture(&[0.0; 16]);
        assert_eq!(transport.frames_processed(), 48);

        transport.stop();
        assert_eq!(transport.frames_processed(), 0);
        assert!(transport.start());
        assert_eq!(transport.frames_processed(), 0);
    }
}
