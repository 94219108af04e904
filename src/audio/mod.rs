//! Audio module - stream transport between application and audio engine
//!
//! This module provides:
//! - Ring buffer for thread-safe sample exchange
//! - Shared-memory SPSC channel for a producer in another context
//! - Pre-buffering gate and transport counters
//! - Transport that ties them to a backend's real-time callback
//! - Backends: manual (hand-driven) and cpal

mod backend;
mod buffer;
#[cfg(feature = "host-cpal")]
mod engine;
mod metrics;
mod priming;
mod shared;
mod transport;

// Re-export public types
pub use backend::{AudioBackend, BackendStream, ManualBackend};
pub use buffer::{RingBuffer, RingGuard, WriteOutcome};
#[cfg(feature = "host-cpal")]
pub use engine::CpalBackend;
pub use metrics::{Metrics, MetricsSnapshot};
pub use priming::PrimingController;
pub use shared::{required_bytes, SharedRegion, SharedTransport, HEADER_BYTES};
pub use transport::{
    AudioTransport, Direction, Period, RtProcessor, StreamSpec, TransportHandle,
    DEFAULT_PREBUFFER_FRAMES, DEFAULT_RING_BUFFER_FRAMES, MAX_CHANNELS, MAX_DRAIN_FRAMES,
    MAX_PREBUFFER_FRAMES, MAX_RING_BUFFER_FRAMES, MAX_SAMPLE_RATE, MIN_CHANNELS,
    MIN_PREBUFFER_FRAMES, MIN_SAMPLE_RATE,
};
