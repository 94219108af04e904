//! audiobridge - Audio transport demo
//!
//! Opens one stream on the default device using the persisted settings and
//! either plays a sine test tone through the transport (output) or meters the
//! captured signal (input), then logs the transport counters.
//!
//! Run with `RUST_LOG=debug` to see priming and buffer events.

use std::f32::consts::TAU;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use audiobridge::audio::{AudioTransport, CpalBackend, Direction};
use audiobridge::settings::Settings;

/// Frames generated or read per loop iteration
const CHUNK_FRAMES: usize = 256;

/// Back-off when the ring buffer is full (output) or empty (input)
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How often the input level is logged
const METER_INTERVAL: Duration = Duration::from_millis(500);

fn main() -> ExitCode {
    env_logger::init();
    log::info!("Starting audiobridge");

    let settings = Settings::load();
    let backend = Arc::new(CpalBackend::new());

    let mut transport = match AudioTransport::new(settings.stream_spec(), backend) {
        Ok(t) => t,
        Err(e) => {
            log::error!("Invalid stream settings: {}", e);
            return ExitCode::FAILURE;
        }
    };
    transport.set_latency(settings.prebuffer_frames, settings.ring_buffer_frames);

    if !transport.start() {
        return ExitCode::FAILURE;
    }

    let duration = Duration::from_secs_f32(settings.duration_secs.max(0.0));
    match transport.direction() {
        Direction::Output => play_tone(&transport, &settings, duration),
        Direction::Input => meter_input(&transport, duration),
    }

    transport.stop();

    match serde_json::to_string_pretty(&transport.metrics()) {
        Ok(json) => log::info!("Metrics: {}", json),
        Err(e) => log::warn!("Failed to serialize metrics: {}", e),
    }
    ExitCode::SUCCESS
}

/// Feed a sine tone on every channel until `duration` elapses
fn play_tone(transport: &AudioTransport, settings: &Settings, duration: Duration) {
    let channels = transport.channels() as usize;
    let step = TAU * settings.tone_frequency / transport.sample_rate() as f32;
    let gain = settings.tone_gain.clamp(0.0, 1.0);

    log::info!(
        "Playing {:.1} Hz tone at {:.0}% for {:.1}s",
        settings.tone_frequency,
        gain * 100.0,
        duration.as_secs_f32()
    );

    let mut chunk = vec![0.0f32; CHUNK_FRAMES * channels];
    let mut phase = 0.0f32;
    // Frames of `chunk` already accepted by the transport
    let mut offset = CHUNK_FRAMES;

    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if offset == CHUNK_FRAMES {
            for frame in chunk.chunks_mut(channels) {
                frame.fill(phase.sin() * gain);
                phase = (phase + step) % TAU;
            }
            offset = 0;
        }

        offset += transport.write(&chunk[offset * channels..]);
        if offset < CHUNK_FRAMES {
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Read captured audio and log its RMS level until `duration` elapses
fn meter_input(transport: &AudioTransport, duration: Duration) {
    let channels = transport.channels() as usize;
    let mut buf = vec![0.0f32; CHUNK_FRAMES * channels];
    let mut sum_squares = 0.0f64;
    let mut count = 0usize;
    let mut last_report = Instant::now();

    log::info!("Metering input for {:.1}s", duration.as_secs_f32());

    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        let frames = transport.read_into(&mut buf);
        if frames == 0 {
            thread::sleep(POLL_INTERVAL);
            continue;
        }

        for &sample in &buf[..frames * channels] {
            sum_squares += f64::from(sample) * f64::from(sample);
        }
        count += frames * channels;

        if last_report.elapsed() >= METER_INTERVAL {
            let rms = (sum_squares / count as f64).sqrt();
            log::info!(
                "Input level: {:.1} dBFS ({} frames buffered)",
                20.0 * rms.max(1e-9).log10(),
                transport.buffered_frames()
            );
            sum_squares = 0.0;
            count = 0;
            last_report = Instant::now();
        }
    }
}
