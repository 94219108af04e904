//! Error types for stream construction and host setup
//!
//! Real-time shortfalls (underflow, overflow) are never errors; they are
//! counted in [`crate::audio::Metrics`] and compensated with silence or drops.

use thiserror::Error;

use crate::audio::Direction;

/// Errors surfaced synchronously to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Channels must be between 1 and 64 (got {0})")]
    InvalidChannels(u16),

    #[error("Sample rate must be between 8000 and 192000 (got {0})")]
    InvalidSampleRate(u32),

    #[error("Shared region is null")]
    NullRegion,

    #[error("Shared region must be 4-byte aligned")]
    MisalignedRegion,

    #[error("Shared region too small: need {required} bytes, got {actual}")]
    RegionTooSmall { required: usize, actual: usize },

    #[error("Shared buffer capacity of {0} frames is out of range")]
    InvalidCapacity(usize),

    #[error("No {0} device available")]
    NoDevice(Direction),

    #[error("Failed to build stream: {0}")]
    BuildStream(String),

    #[error("Failed to start stream: {0}")]
    PlayStream(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;
