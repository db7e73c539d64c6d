use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use talkback::audio::SampleBridge;
use talkback::audio::bridge::samples_from_le_bytes;
use talkback::audio::level::mean_abs_volume;
use talkback::pipeline::{SegmentOutcome, Segmenter, SegmenterConfig};

/// One second of a 440 Hz tone at 16 kHz.
fn tone(amplitude: f32) -> Vec<i16> {
    (0..16000)
        .map(|i| {
            let t = i as f32 / 16000.0;
            (amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin()) as i16
        })
        .collect()
}

fn bench_playback_chunk(c: &mut Criterion) {
    let bridge = SampleBridge::new(16000, 48000, 2).expect("valid bridge");
    let bytes: Vec<u8> = tone(8000.0)
        .iter()
        .take(341)
        .flat_map(|s| s.to_le_bytes())
        .collect();

    let mut group = c.benchmark_group("playback");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("bridge_682_bytes", |b| {
        let mut mono = Vec::new();
        let mut scratch = Vec::new();
        let mut device = Vec::new();
        b.iter(|| {
            samples_from_le_bytes(black_box(&bytes), &mut mono);
            bridge.to_device(&mono, &mut scratch, &mut device);
            black_box(device.len())
        });
    });
    group.finish();
}

fn bench_capture_chunk(c: &mut Criterion) {
    let bridge = SampleBridge::new(16000, 48000, 2).expect("valid bridge");
    let mut device = Vec::new();
    bridge.to_device(&tone(8000.0)[..1024], &mut Vec::new(), &mut device);

    c.bench_function("capture/bridge_and_level", |b| {
        let mut scratch = Vec::new();
        let mut mono = Vec::new();
        b.iter(|| {
            bridge.from_device(black_box(&device), &mut scratch, &mut mono);
            black_box(mean_abs_volume(&mono))
        });
    });
}

fn bench_segmenter(c: &mut Criterion) {
    let mut group = c.benchmark_group("segmenter");
    for (name, amplitude) in [("silence", 0.0), ("speech", 8000.0)] {
        let second = tone(amplitude);
        group.throughput(Throughput::Elements(second.len() as u64));
        group.bench_with_input(BenchmarkId::new("one_second", name), &second, |b, audio| {
            let mut segmenter = Segmenter::new(SegmenterConfig::default());
            b.iter(|| {
                for chunk in audio.chunks(1024) {
                    if let SegmentOutcome::Emitted(session) = segmenter.process(black_box(chunk)) {
                        segmenter.recycle(session.into_buffer());
                    }
                }
                // Keep the session from filling up across iterations
                if let SegmentOutcome::Emitted(session) = segmenter.finish() {
                    segmenter.recycle(session.into_buffer());
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_playback_chunk,
    bench_capture_chunk,
    bench_segmenter
);
criterion_main!(benches);
