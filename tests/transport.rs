use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::thread;

use audiobridge::audio::{
    required_bytes, AudioTransport, Direction, ManualBackend, SharedRegion, SharedTransport,
    StreamSpec,
};
use audiobridge::StreamError;

/// Heap memory standing in for a segment shared with another context
struct Segment {
    words: Box<[AtomicU32]>,
    len: usize,
}

impl Segment {
    fn for_frames(capacity_frames: usize, channels: usize) -> Self {
        let len = required_bytes(capacity_frames, channels);
        Self {
            words: (0..len.div_ceil(4)).map(|_| AtomicU32::new(0)).collect(),
            len,
        }
    }

    fn region(&self) -> SharedRegion {
        unsafe { SharedRegion::from_raw_parts(self.words.as_ptr() as *mut u8, self.len) }.unwrap()
    }
}

fn started(spec: StreamSpec, prebuffer: usize, ring: usize) -> (AudioTransport, Arc<ManualBackend>) {
    let backend = Arc::new(ManualBackend::new());
    let mut transport = AudioTransport::new(spec, backend.clone()).unwrap();
    assert!(transport.set_latency(prebuffer, ring));
    assert!(transport.start());
    (transport, backend)
}

#[test]
fn playback_reaches_engine_after_priming() {
    let (transport, backend) = started(StreamSpec::new("out", 2, 48000, 128), 256, 1024);

    assert_eq!(transport.write(&[0.5; 200]), 100);
    assert_eq!(transport.write(&[0.5; 400]), 200);

    let mut period = vec![0.0f32; 2 * 128];
    assert_eq!(backend.render(&mut period, None), 128);
    assert!(period.iter().all(|&s| s == 0.5));

    let metrics = transport.metrics();
    assert_eq!(metrics.buffered_frames, 172);
    assert_eq!(metrics.underflows, 0);
    assert_eq!(metrics.overflows, 0);
    assert_eq!(metrics.silent_underflows, 0);
}

#[test]
fn rejects_bad_stream_description() {
    let backend = Arc::new(ManualBackend::new());
    let result = AudioTransport::new(StreamSpec::new("x", 0, 48000, 128), backend);
    assert_eq!(result.err(), Some(StreamError::InvalidChannels(0)));
}

#[test]
fn shared_region_feeds_playback() {
    let (transport, backend) = started(StreamSpec::new("out", 2, 48000, 128), 256, 1024);
    let segment = Segment::for_frames(1024, 2);
    assert!(transport.attach_shared_buffer(segment.region(), 1024));

    let producer = SharedTransport::attach(segment.region(), 1024, 2).unwrap();
    let tone: Vec<f32> = (0..2 * 512).map(|i| (i / 2) as f32).collect();
    assert_eq!(producer.write_from(&tone, 512).frames_written, 512);

    let mut rendered = Vec::new();
    let mut period = vec![0.0f32; 2 * 128];
    for _ in 0..4 {
        backend.render(&mut period, None);
        rendered.extend_from_slice(&period);
    }
    assert_eq!(rendered, tone);
    assert_eq!(transport.silent_underflows(), 0);

    // Drained with nothing left: underflow and back to priming
    backend.render(&mut period, None);
    assert!(period.iter().all(|&s| s == 0.0));
    assert_eq!(transport.underflows(), 1);
    assert!(transport.is_priming());
}

#[test]
fn capture_reaches_reader_and_shared_consumer() {
    let spec = StreamSpec::new("in", 1, 16000, 64).direction(Direction::Input);
    let (transport, backend) = started(spec, 256, 512);
    let segment = Segment::for_frames(256, 1);
    assert!(transport.attach_shared_buffer(segment.region(), 256));
    let consumer = SharedTransport::attach(segment.region(), 256, 1).unwrap();

    let captured: Vec<f32> = (0..64).map(|i| i as f32 / 64.0).collect();
    backend.capture(&captured);

    assert_eq!(transport.read(1000), captured);

    let mut shared_out = vec![0.0f32; 64];
    assert_eq!(consumer.read_into(&mut shared_out, 64), 64);
    assert_eq!(shared_out, captured);
}

#[test]
fn producer_thread_and_engine_thread_keep_order() {
    let (transport, backend) = started(StreamSpec::new("out", 2, 48000, 64), 256, 2048);
    let total_frames = 64 * 300;

    let handle = transport.handle();
    let producer = thread::spawn(move || {
        // Frame i carries i + 1; the tail of -1.0 lifts the last frames past
        // the prebuffer threshold
        let mut data: Vec<f32> = (0..total_frames * 2).map(|i| (i / 2 + 1) as f32).collect();
        data.extend(std::iter::repeat(-1.0).take(512 * 2));

        let frames = data.len() / 2;
        let mut offset = 0;
        while offset < frames {
            let end = (offset + 100).min(frames);
            offset += handle.write(&data[offset * 2..end * 2]);
            thread::yield_now();
        }
    });

    let engine = thread::spawn(move || {
        let mut received = Vec::with_capacity(total_frames);
        let mut period = vec![0.0f32; 2 * 64];
        while received.len() < total_frames {
            backend.render(&mut period, None);
            // Silence while priming or short on data carries no frames
            received.extend(period.chunks(2).map(|f| f[0]).filter(|&v| v > 0.0));
            thread::yield_now();
        }
        received
    });

    producer.join().unwrap();
    let received = engine.join().unwrap();

    let expected: Vec<f32> = (1..=total_frames).map(|v| v as f32).collect();
    assert_eq!(&received[..total_frames], &expected[..]);
}

#[test]
fn restart_resets_priming() {
    let (mut transport, backend) = started(StreamSpec::new("out", 1, 48000, 64), 256, 512);
    transport.write(&[0.3; 300]);
    assert!(!transport.is_priming());

    transport.stop();
    assert!(!backend.is_open());
    assert!(transport.start());
    assert!(transport.is_priming());
}
