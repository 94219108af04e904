//! audiobridge - real-time multichannel audio transport
//!
//! Moves interleaved `f32` audio between an application and an audio engine
//! without ever blocking the engine's callback:
//!
//! - [`audio::RingBuffer`] stages audio between threads
//! - [`audio::SharedTransport`] is a lock-free SPSC channel over a
//!   caller-owned memory region
//! - [`audio::AudioTransport`] pre-buffers playback, counts underflows and
//!   overflows, and bridges both to a backend such as cpal

pub mod audio;
pub mod error;
pub mod settings;

pub use error::{Result, StreamError};
