//! Audio engine - cpal implementation of the backend
//!
//! This module opens one cpal stream per transport on the default input or
//! output device and drives the transport's [`RtProcessor`] from the cpal
//! callback.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::backend::{AudioBackend, BackendStream};
use super::transport::{Direction, RtProcessor, StreamSpec};
use crate::error::{Result, StreamError};

/// Minimum size of the conversion buffer; longer periods are processed in
/// chunks of this many frames
const STAGING_FRAMES: usize = 4096;

/// Backend for the platform audio host
///
/// Holds only the host id; the host handle is re-acquired per stream so the
/// backend itself stays `Send + Sync`.
#[derive(Clone, Copy, Debug)]
pub struct CpalBackend {
    host_id: cpal::HostId,
}

impl CpalBackend {
    /// Backend on the platform's default host
    pub fn new() -> Self {
        Self {
            host_id: cpal::default_host().id(),
        }
    }

    /// Backend on a specific host
    ///
    /// # Arguments
    /// * `host_id` - One of `cpal::available_hosts()`
    pub fn with_host(host_id: cpal::HostId) -> Self {
        Self { host_id }
    }

    pub fn host_id(&self) -> cpal::HostId {
        self.host_id
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn open(&self, spec: &StreamSpec, processor: RtProcessor) -> Result<Box<dyn BackendStream>> {
        let host = cpal::host_from_id(self.host_id)
            .map_err(|e| StreamError::BuildStream(e.to_string()))?;

        let device = match spec.direction {
            Direction::Output => host.default_output_device(),
            Direction::Input => host.default_input_device(),
        }
        .ok_or(StreamError::NoDevice(spec.direction))?;

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        log::info!("Using {} device: {}", spec.direction, device_name);
        if !spec.description.is_empty() {
            log::info!("{}: {}", spec.name, spec.description);
        }
        if !spec.channel_names.is_empty() {
            log::debug!("Channel map: {}", spec.channel_names.join(", "));
        }

        // Sample format follows the device, layout follows the StreamSpec
        let sample_format = match spec.direction {
            Direction::Output => device.default_output_config(),
            Direction::Input => device.default_input_config(),
        }
        .map_err(|e| StreamError::BuildStream(e.to_string()))?
        .sample_format();

        let config = cpal::StreamConfig {
            channels: spec.channels,
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size: match spec.buffer_size {
                0 => cpal::BufferSize::Default,
                frames => cpal::BufferSize::Fixed(frames),
            },
        };
        log::info!("Stream config: {:?}, sample format: {:?}", config, sample_format);

        let frames = Arc::new(AtomicU64::new(0));
        let staging_frames = STAGING_FRAMES.max(spec.buffer_size as usize);
        let callback = Callback {
            processor,
            staged: vec![0.0; staging_frames * spec.channels as usize],
            frames: Arc::clone(&frames),
        };
        let name = spec.name.clone();

        let stream = match (spec.direction, sample_format) {
            (Direction::Output, cpal::SampleFormat::F32) => {
                build_output::<f32>(&device, &config, callback, name)
            }
            (Direction::Output, cpal::SampleFormat::I16) => {
                build_output::<i16>(&device, &config, callback, name)
            }
            (Direction::Output, cpal::SampleFormat::U16) => {
                build_output::<u16>(&device, &config, callback, name)
            }
            (Direction::Input, cpal::SampleFormat::F32) => {
                build_input::<f32>(&device, &config, callback, name)
            }
            (Direction::Input, cpal::SampleFormat::I16) => {
                build_input::<i16>(&device, &config, callback, name)
            }
            (Direction::Input, cpal::SampleFormat::U16) => {
                build_input::<u16>(&device, &config, callback, name)
            }
            (_, format) => {
                return Err(StreamError::BuildStream(format!(
                    "Unsupported sample format: {:?}",
                    format
                )));
            }
        }
        .map_err(|e| StreamError::BuildStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| StreamError::PlayStream(e.to_string()))?;

        Ok(Box::new(CpalStream {
            _stream: stream,
            frames,
        }))
    }
}

/// State moved into the cpal data callback
struct Callback {
    processor: RtProcessor,
    /// f32 staging for devices that want another sample type
    staged: Vec<f32>,
    frames: Arc<AtomicU64>,
}

impl Callback {
    fn render<T: Sample + FromSample<f32>>(&mut self, data: &mut [T]) {
        let processor = &mut self.processor;
        let frames = render_chunked(&mut self.staged, data, |staged| {
            processor.render(staged, None)
        });
        self.frames.fetch_add(frames as u64, Ordering::Relaxed);
    }

    fn capture<T: Sample>(&mut self, data: &[T])
    where
        f32: FromSample<T>,
    {
        let processor = &mut self.processor;
        let frames = capture_chunked(&mut self.staged, data, |staged| processor.capture(staged));
        self.frames.fetch_add(frames as u64, Ordering::Relaxed);
    }
}

/// Fill `data` through `staged`, one staging-sized chunk at a time
///
/// `staged.len()` must be a whole number of frames. Never allocates.
fn render_chunked<T, F>(staged: &mut [f32], data: &mut [T], mut render: F) -> usize
where
    T: Sample + FromSample<f32>,
    F: FnMut(&mut [f32]) -> usize,
{
    let mut frames = 0;
    for chunk in data.chunks_mut(staged.len()) {
        let staged = &mut staged[..chunk.len()];
        frames += render(staged);
        for (out, &sample) in chunk.iter_mut().zip(staged.iter()) {
            *out = T::from_sample(sample);
        }
    }
    frames
}

/// Convert `data` into `staged` and hand it on, one staging-sized chunk at a
/// time
fn capture_chunked<T, F>(staged: &mut [f32], data: &[T], mut capture: F) -> usize
where
    T: Sample,
    f32: FromSample<T>,
    F: FnMut(&[f32]) -> usize,
{
    let mut frames = 0;
    for chunk in data.chunks(staged.len()) {
        let staged = &mut staged[..chunk.len()];
        for (dst, &sample) in staged.iter_mut().zip(chunk.iter()) {
            *dst = f32::from_sample(sample);
        }
        frames += capture(staged);
    }
    frames
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut callback: Callback,
    name: String,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| callback.render(data),
        move |err| log::error!("Audio stream error ({}): {}", name, err),
        None,
    )
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut callback: Callback,
    name: String,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| callback.capture(data),
        move |err| log::error!("Audio stream error ({}): {}", name, err),
        None,
    )
}

/// Keeps the cpal stream alive; dropping it stops the callback
struct CpalStream {
    _stream: cpal::Stream,
    frames: Arc<AtomicU64>,
}

impl BackendStream for CpalStream {
    fn frames_processed(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}
