//! Audio transport - bridges the application thread and the audio callback
//!
//! An [`AudioTransport`] owns the ring buffer, the optional shared-memory
//! channel, the priming gate and the counters for one logical stream. The
//! backend drives an [`RtProcessor`] once per engine period; the application
//! side uses `write()` / `read()` directly or through a [`TransportHandle`].
//!
//! ```text
//! playback: write() / SharedTransport ──> RingBuffer ──> RtProcessor::render ──> engine
//! capture:  engine ──> RtProcessor::capture ──> RingBuffer ──> read()
//!                                          └──> SharedTransport
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::backend::{AudioBackend, BackendStream};
use super::buffer::{RingBuffer, RingGuard};
use super::metrics::{Metrics, MetricsSnapshot};
use super::priming::PrimingController;
use super::shared::{SharedRegion, SharedTransport};
use crate::error::{Result, StreamError};

pub const MIN_CHANNELS: u16 = 1;
pub const MAX_CHANNELS: u16 = 64;
pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// ~42ms @ 48kHz
pub const DEFAULT_PREBUFFER_FRAMES: usize = 2048;
/// ~85ms @ 48kHz
pub const DEFAULT_RING_BUFFER_FRAMES: usize = 4096;

pub const MIN_PREBUFFER_FRAMES: usize = 256;
pub const MAX_PREBUFFER_FRAMES: usize = 16384;
pub const MAX_RING_BUFFER_FRAMES: usize = 32768;

/// Most frames moved from the shared region into the ring per period
pub const MAX_DRAIN_FRAMES: usize = 2048;

/// Stream direction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Playback: application produces, engine consumes
    Output,
    /// Capture: engine produces, application consumes
    Input,
}

impl Direction {
    /// Playback warms up before emitting audio; capture has nothing to warm up
    pub fn starts_priming(self) -> bool {
        matches!(self, Direction::Output)
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::Output => "output",
            Direction::Input => "input",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything the host needs to open a stream
#[derive(Clone, Debug, PartialEq)]
pub struct StreamSpec {
    pub name: String,
    pub channels: u16,
    pub sample_rate: u32,
    /// Requested period in frames (0 = engine default)
    pub buffer_size: u32,
    pub direction: Direction,
    pub channel_names: Vec<String>,
    pub description: String,
}

impl StreamSpec {
    /// Playback stream with no channel names or description
    pub fn new(name: impl Into<String>, channels: u16, sample_rate: u32, buffer_size: u32) -> Self {
        Self {
            name: name.into(),
            channels,
            sample_rate,
            buffer_size,
            direction: Direction::Output,
            channel_names: Vec::new(),
            description: String::new(),
        }
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn channel_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channel_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Check channel count and sample rate against the supported ranges
    pub fn validate(&self) -> Result<()> {
        if !(MIN_CHANNELS..=MAX_CHANNELS).contains(&self.channels) {
            return Err(StreamError::InvalidChannels(self.channels));
        }
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(StreamError::InvalidSampleRate(self.sample_rate));
        }
        Ok(())
    }
}

/// State shared between the control thread, producer/consumer threads and
/// the real-time callback
struct TransportState {
    channels: usize,
    direction: Direction,
    ring: RingBuffer,
    /// try_lock'ed from the callback, locked by attach/detach
    shared: Mutex<Option<SharedTransport>>,
    priming: PrimingController,
    prebuffer_frames: AtomicUsize,
    ring_buffer_frames: AtomicUsize,
    running: AtomicBool,
    metrics: Metrics,
}

impl TransportState {
    fn shared_slot(&self) -> MutexGuard<'_, Option<SharedTransport>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn write(&self, data: &[f32]) -> usize {
        let frames = data.len() / self.channels;
        if self.direction != Direction::Output || !self.is_running() || frames == 0 {
            return 0;
        }

        let threshold = self.prebuffer_frames.load(Ordering::Relaxed);
        let mut started = false;
        let outcome = self.ring.write_observed(data, frames, |buffered| {
            started = self.priming.observe_buffered(buffered, threshold);
            self.metrics.set_buffered_frames(buffered);
        });

        if outcome.truncated {
            self.metrics.record_overflow();
        }
        if started {
            debug!(
                "Pre-buffer filled ({} frames), starting playback",
                outcome.buffered_frames
            );
        }
        outcome.frames_written
    }

    fn read(&self, max_frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; max_frames * self.channels];
        let frames = self.read_into(&mut out);
        out.truncate(frames * self.channels);
        out
    }

    fn read_into(&self, dest: &mut [f32]) -> usize {
        if self.direction != Direction::Input || !self.is_running() {
            return 0;
        }
        let mut ring = self.ring.lock();
        let frames = ring.read_into(dest, dest.len() / self.channels);
        self.metrics.set_buffered_frames(ring.buffered_frames());
        frames
    }
}

/// One engine period, tagged by direction
pub enum Period<'a> {
    /// Fill `dest` (capacity `dest.len() / channels` frames); the engine may
    /// ask for fewer via `requested_frames`
    Playback {
        dest: &'a mut [f32],
        requested_frames: Option<usize>,
    },
    /// Interleaved frames captured by the engine
    Capture { captured: &'a [f32] },
}

/// Real-time side of a transport
///
/// Moved into the backend's callback. Every method is bounded, never
/// allocates and never blocks beyond the ring buffer's short critical
/// section.
pub struct RtProcessor {
    state: Arc<TransportState>,
    /// Staging area for frames drained from the shared region
    scratch: Vec<f32>,
}

impl RtProcessor {
    fn new(state: Arc<TransportState>) -> Self {
        let scratch = vec![0.0; MAX_DRAIN_FRAMES * state.channels];
        Self { state, scratch }
    }

    pub fn channels(&self) -> usize {
        self.state.channels
    }

    pub fn direction(&self) -> Direction {
        self.state.direction
    }

    /// Handle one period, returns the frames produced or consumed
    pub fn process(&mut self, period: Period<'_>) -> usize {
        match period {
            Period::Playback {
                dest,
                requested_frames,
            } => self.render(dest, requested_frames),
            Period::Capture { captured } => self.capture(captured),
        }
    }

    /// Playback period: fill `dest` from the ring buffer or with silence
    ///
    /// Only the first `frames * channels` samples are written, where
    /// `frames` is the requested count capped at the capacity of `dest`.
    /// Returns zero with `dest` untouched on a capture stream.
    pub fn render(&mut self, dest: &mut [f32], requested_frames: Option<usize>) -> usize {
        let state = &*self.state;
        if state.direction != Direction::Output {
            return 0;
        }

        let channels = state.channels;
        let max_frames = dest.len() / channels;
        let frames = requested_frames.map_or(max_frames, |r| r.min(max_frames));
        let dest = &mut dest[..frames * channels];

        // Shared slot before ring, same order as attach/detach
        let slot = try_slot(&state.shared);
        let mut ring = state.ring.lock();
        if let Some(shared) = slot.as_ref().and_then(|slot| slot.as_ref()) {
            drain_shared(state, shared, &mut ring, &mut self.scratch);
        }
        drop(slot);

        let backlog = ring.buffered_frames();
        let priming = state.priming.is_priming();

        if priming || backlog < frames {
            dest.fill(0.0);
            if !priming {
                state.metrics.record_silent_underflow();
                state.metrics.record_underflow();
                if backlog == 0 {
                    state.priming.observe_drained();
                }
            }
        } else {
            ring.read_into(dest, frames);
        }

        state.metrics.set_buffered_frames(ring.buffered_frames());
        frames
    }

    /// Capture period: forward to the shared region and the ring buffer
    ///
    /// Returns zero and stores nothing on a playback stream.
    pub fn capture(&mut self, captured: &[f32]) -> usize {
        let state = &*self.state;
        let frames = captured.len() / state.channels;
        if state.direction != Direction::Input || frames == 0 {
            return 0;
        }

        if let Some(slot) = try_slot(&state.shared) {
            if let Some(shared) = slot.as_ref() {
                if shared.write_from(captured, frames).truncated {
                    state.metrics.record_overflow();
                }
            }
        }

        let outcome = state.ring.write(captured, frames);
        if outcome.truncated {
            state.metrics.record_overflow();
        }
        state.metrics.set_buffered_frames(outcome.buffered_frames);
        frames
    }
}

/// Move pending frames from the shared region into the ring buffer
///
/// Runs under the caller's ring lock, so the room measured here is still
/// free when the frames are copied in.
fn drain_shared(
    state: &TransportState,
    shared: &SharedTransport,
    ring: &mut RingGuard<'_>,
    scratch: &mut [f32],
) {
    let room = ring.available_to_write().min(MAX_DRAIN_FRAMES);
    let frames = shared.read_into(scratch, room);
    if frames == 0 {
        return;
    }

    let outcome = ring.write_from(&scratch[..frames * state.channels], frames);
    let threshold = state.prebuffer_frames.load(Ordering::Relaxed);
    state
        .priming
        .observe_buffered(outcome.buffered_frames, threshold);
    state.metrics.set_buffered_frames(outcome.buffered_frames);
}

/// Non-blocking access to the shared slot; `None` while attach/detach holds it
fn try_slot(shared: &Mutex<Option<SharedTransport>>) -> Option<MutexGuard<'_, Option<SharedTransport>>> {
    match shared.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

/// Cloneable handle for producer/consumer threads
///
/// Exposes the data path and counters, not the lifecycle.
#[derive(Clone)]
pub struct TransportHandle {
    state: Arc<TransportState>,
}

impl TransportHandle {
    /// See [`AudioTransport::write`]
    pub fn write(&self, data: &[f32]) -> usize {
        self.state.write(data)
    }

    /// See [`AudioTransport::read_into`]
    pub fn read_into(&self, dest: &mut [f32]) -> usize {
        self.state.read_into(dest)
    }

    /// See [`AudioTransport::read`]
    pub fn read(&self, max_frames: usize) -> Vec<f32> {
        self.state.read(max_frames)
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn is_priming(&self) -> bool {
        self.state.priming.is_priming()
    }

    pub fn channels(&self) -> usize {
        self.state.channels
    }

    pub fn buffered_frames(&self) -> usize {
        self.state.metrics.buffered_frames()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.state.metrics.snapshot()
    }
}

/// One logical multichannel stream
///
/// Created once per stream. `start` / `stop` are idempotent. The backend is
/// injected, so several transports can share one host handle.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use audiobridge::audio::{AudioTransport, ManualBackend, StreamSpec};
///
/// let backend = Arc::new(ManualBackend::new());
/// let mut transport =
///     AudioTransport::new(StreamSpec::new("demo", 2, 48000, 256), backend.clone()).unwrap();
/// assert!(transport.start());
///
/// transport.write(&[0.5; 2 * 4096]);
/// let mut period = [0.0; 2 * 128];
/// backend.render(&mut period, None);
/// assert_eq!(period[0], 0.5);
/// ```
pub struct AudioTransport {
    spec: StreamSpec,
    state: Arc<TransportState>,
    backend: Arc<dyn AudioBackend>,
    stream: Option<Box<dyn BackendStream>>,
}

impl AudioTransport {
    /// Validate `spec` and allocate the ring buffer with default latency
    pub fn new(spec: StreamSpec, backend: Arc<dyn AudioBackend>) -> Result<Self> {
        spec.validate()?;

        let channels = spec.channels as usize;
        let state = TransportState {
            channels,
            direction: spec.direction,
            ring: RingBuffer::new(DEFAULT_RING_BUFFER_FRAMES, channels),
            shared: Mutex::new(None),
            priming: PrimingController::new(spec.direction),
            prebuffer_frames: AtomicUsize::new(DEFAULT_PREBUFFER_FRAMES),
            ring_buffer_frames: AtomicUsize::new(DEFAULT_RING_BUFFER_FRAMES),
            running: AtomicBool::new(false),
            metrics: Metrics::new(),
        };

        Ok(Self {
            spec,
            state: Arc::new(state),
            backend,
            stream: None,
        })
    }

    /// Connect to the engine and begin periodic processing
    ///
    /// Returns `false` if the backend could not open the stream; nothing is
    /// kept in that case.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return true;
        }

        self.state.priming.reset(self.spec.direction);
        let processor = RtProcessor::new(Arc::clone(&self.state));

        match self.backend.open(&self.spec, processor) {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state.running.store(true, Ordering::Release);
                info!(
                    "Started: {} ({}, {}ch @ {}Hz, prebuffer: {} frames)",
                    self.spec.name,
                    self.spec.direction,
                    self.spec.channels,
                    self.spec.sample_rate,
                    self.prebuffer_frames()
                );
                true
            }
            Err(e) => {
                log::error!("Failed to start {}: {}", self.spec.name, e);
                false
            }
        }
    }

    /// Disconnect from the engine
    ///
    /// No callback runs once this returns.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }

        self.state.running.store(false, Ordering::Release);
        // Dropping the backend stream quiesces its callback
        self.stream = None;

        let metrics = self.metrics();
        info!(
            "Stopped: {}. Underflows: {}, silent underflows: {}, overflows: {}",
            self.spec.name, metrics.underflows, metrics.silent_underflows, metrics.overflows
        );
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Queue interleaved samples for playback
    ///
    /// Trailing samples that do not form a whole frame are ignored. Returns
    /// the frames accepted, which is less than offered when the buffer is
    /// full (counted as one overflow) and zero when not running or on a
    /// capture stream.
    pub fn write(&self, data: &[f32]) -> usize {
        self.state.write(data)
    }

    /// Take up to `dest.len() / channels` captured frames
    ///
    /// Returns the frames read; zero when nothing is buffered, when not
    /// running or on a playback stream.
    pub fn read_into(&self, dest: &mut [f32]) -> usize {
        self.state.read_into(dest)
    }

    /// Take up to `max_frames` captured frames as a new vector
    pub fn read(&self, max_frames: usize) -> Vec<f32> {
        self.state.read(max_frames)
    }

    /// Attach a caller-owned shared region holding `buffer_frames` frames
    ///
    /// Replaces any previous region. Returns `false` (and keeps the previous
    /// state) if the region is too small or the capacity is invalid.
    pub fn attach_shared_buffer(&self, region: SharedRegion, buffer_frames: usize) -> bool {
        match SharedTransport::attach(region, buffer_frames, self.state.channels) {
            Ok(shared) => {
                *self.state.shared_slot() = Some(shared);
                debug!(
                    "Shared buffer attached: {} frames, {} bytes",
                    buffer_frames,
                    region.len()
                );
                true
            }
            Err(e) => {
                warn!("Shared buffer rejected: {}", e);
                false
            }
        }
    }

    /// Stop referencing the shared region
    ///
    /// Once this returns the callback never touches the previous region.
    pub fn detach_shared_buffer(&self) {
        if self.state.shared_slot().take().is_some() {
            debug!("Shared buffer detached");
        }
    }

    pub fn has_shared_buffer(&self) -> bool {
        self.state.shared_slot().is_some()
    }

    /// Reconfigure pre-buffering and ring capacity
    ///
    /// Only allowed while stopped; returns `false` and changes nothing
    /// otherwise. The prebuffer is clamped to 256..=16384 frames and the ring
    /// to 2 x prebuffer..=32768 frames. Buffered audio is discarded.
    pub fn set_latency(&self, prebuffer_frames: usize, ring_buffer_frames: usize) -> bool {
        if self.is_running() {
            warn!("set_latency ignored while {} is running", self.spec.name);
            return false;
        }

        let prebuffer = prebuffer_frames.clamp(MIN_PREBUFFER_FRAMES, MAX_PREBUFFER_FRAMES);
        let ring = ring_buffer_frames.clamp(prebuffer * 2, MAX_RING_BUFFER_FRAMES);

        self.state.prebuffer_frames.store(prebuffer, Ordering::Relaxed);
        self.state.ring_buffer_frames.store(ring, Ordering::Relaxed);
        self.state.ring.resize(ring);
        self.state.metrics.set_buffered_frames(0);

        debug!(
            "Latency set: prebuffer {} frames, ring {} frames",
            prebuffer, ring
        );
        true
    }

    /// Handle for a producer or consumer thread
    pub fn handle(&self) -> TransportHandle {
        TransportHandle {
            state: Arc::clone(&self.state),
        }
    }

    pub fn spec(&self) -> &StreamSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn direction(&self) -> Direction {
        self.spec.direction
    }

    pub fn channels(&self) -> u16 {
        self.spec.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    pub fn buffer_size(&self) -> u32 {
        self.spec.buffer_size
    }

    pub fn prebuffer_frames(&self) -> usize {
        self.state.prebuffer_frames.load(Ordering::Relaxed)
    }

    pub fn ring_buffer_frames(&self) -> usize {
        self.state.ring_buffer_frames.load(Ordering::Relaxed)
    }

    pub fn is_priming(&self) -> bool {
        self.state.priming.is_priming()
    }

    pub fn underflows(&self) -> u64 {
        self.state.metrics.underflows()
    }

    pub fn overflows(&self) -> u64 {
        self.state.metrics.overflows()
    }

    pub fn silent_underflows(&self) -> u64 {
        self.state.metrics.silent_underflows()
    }

    pub fn buffered_frames(&self) -> usize {
        self.state.metrics.buffered_frames()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.state.metrics.snapshot()
    }

    /// Frames the backend has exchanged with the engine since `start`
    pub fn frames_processed(&self) -> u64 {
        self.stream.as_ref().map_or(0, |s| s.frames_processed())
    }
}

impl Drop for AudioTransport {
    fn drop(&mut self) {
        self.stop();
    }
}
