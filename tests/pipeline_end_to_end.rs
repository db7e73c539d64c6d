//! End-to-end pipeline tests against the mock service and mock devices.

use std::sync::Arc;
use std::time::{Duration, Instant};
use talkback::audio::bridge::{mono_to_stereo, upsample};
use talkback::audio::{MockSink, MockSource};
use talkback::pipeline::{BackoffPolicy, PipelineConfig, SegmenterConfig};
use talkback::service::{MockAudioService, MockPoll};
use talkback::{ClipState, Pipeline, PipelineEvent};

fn fast_config(event_tx: crossbeam_channel::Sender<PipelineEvent>) -> PipelineConfig {
    PipelineConfig {
        idle_delay: Duration::from_millis(5),
        post_playback_delay: Duration::from_millis(5),
        backoff: BackoffPolicy {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(20),
            max_attempts: 3,
        },
        sink_retry_delay: Duration::ZERO,
        segmenter: SegmenterConfig {
            silence_timeout_ms: 300,
            min_duration_ms: 200,
            ..SegmenterConfig::default()
        },
        event_tx: Some(event_tx),
        ..PipelineConfig::default()
    }
}

/// Collects events until `done` matches one or the deadline passes.
fn collect_until(
    rx: &crossbeam_channel::Receiver<PipelineEvent>,
    timeout: Duration,
    done: impl Fn(&PipelineEvent) -> bool,
) -> Vec<PipelineEvent> {
    let deadline = Instant::now() + timeout;
    let mut events = Vec::new();
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(event) => {
                let finished = done(&event);
                events.push(event);
                if finished {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    events
}

/// 100 ms of 16 kHz mono at a constant level, as 48 kHz stereo device samples.
fn device_chunk(volume: i16) -> Vec<i16> {
    mono_to_stereo(&upsample(&vec![volume; 1600], 3))
}

fn clip_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn poll_download_play_walks_the_clip_lifecycle() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let service = Arc::new(
        MockAudioService::new()
            .with_poll(MockPoll::Found("abc123".to_string()))
            .with_clip("abc123", clip_bytes(10_000)),
    );
    let sink = MockSink::new();
    let record = sink.record();

    let handle = Pipeline::new(fast_config(tx))
        .start(service.clone(), Box::new(sink), None)
        .unwrap();

    let events = tokio::task::spawn_blocking(move || {
        collect_until(&rx, Duration::from_secs(5), |e| {
            matches!(e, PipelineEvent::Clip { state: ClipState::Done, .. })
        })
    })
    .await
    .unwrap();
    handle.stop().await;

    let states: Vec<ClipState> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Clip { audio_id, state } if audio_id == "abc123" => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            ClipState::Empty,
            ClipState::Downloading,
            ClipState::Ready,
            ClipState::Playing,
            ClipState::Done
        ]
    );

    let chunk_bytes: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::ChunkPlayed { source_bytes, .. } => Some(*source_bytes),
            _ => None,
        })
        .collect();
    assert_eq!(chunk_bytes.len(), 15);
    assert!(chunk_bytes[..14].iter().all(|&b| b == 682));
    assert_eq!(chunk_bytes[14], 10_000 - 14 * 682);
    assert_eq!(chunk_bytes.iter().sum::<usize>(), 10_000);

    assert_eq!(record.write_count(), 15);
    // 5000 samples, tripled and duplicated to stereo
    assert_eq!(record.samples().len(), 5_000 * 3 * 2);
    assert_eq!(service.download_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_polls_never_download() {
    let (tx, _rx) = crossbeam_channel::unbounded();
    let service = Arc::new(MockAudioService::new());
    let sink = MockSink::new();
    let record = sink.record();

    let handle = Pipeline::new(fast_config(tx))
        .start(service.clone(), Box::new(sink), None)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.stop().await;

    assert!(service.poll_count() > 3);
    assert_eq!(service.download_count(), 0);
    assert_eq!(record.write_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn playback_and_capture_never_overlap() {
    let (tx, _rx) = crossbeam_channel::unbounded();
    let service = Arc::new(
        MockAudioService::new()
            .with_poll(MockPoll::Found("first".to_string()))
            .with_poll(MockPoll::Found("second".to_string()))
            .with_clip("first", clip_bytes(8_000))
            .with_clip("second", clip_bytes(8_000)),
    );
    let sink = MockSink::new().with_write_delay(Duration::from_millis(1));
    let record = sink.record();
    let source = MockSource::new(vec![device_chunk(0)])
        .looping()
        .with_read_delay(Duration::from_millis(2));
    let reads = source.read_counter();

    let handle = Pipeline::new(fast_config(tx))
        .start(service, Box::new(sink), Some(Box::new(source)))
        .unwrap();
    let duplex = handle.duplex();

    let deadline = Instant::now() + Duration::from_millis(400);
    let mut saw_playing = false;
    while Instant::now() < deadline {
        let (capturing, playing) = duplex.snapshot();
        assert!(!(capturing && playing), "capture and playback overlapped");
        saw_playing |= playing;
        tokio::time::sleep(Duration::from_micros(200)).await;
    }
    handle.stop().await;

    assert!(saw_playing);
    assert!(record.write_count() > 0);
    assert!(reads.load(std::sync::atomic::Ordering::SeqCst) > 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn captured_utterance_is_uploaded_and_transcribed() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let service = Arc::new(MockAudioService::new().with_transcription("turn on the lights"));
    // 100 ms quiet, 400 ms speech, 400 ms quiet; 300 ms silence timeout
    let levels = [0, 900, 900, 900, 900, 0, 0, 0, 0];
    let source = MockSource::new(levels.iter().map(|&v| device_chunk(v)).collect());

    let config = PipelineConfig {
        capture_chunk_frames: 4800,
        ..fast_config(tx)
    };
    let handle = Pipeline::new(config)
        .start(service.clone(), Box::new(MockSink::new()), Some(Box::new(source)))
        .unwrap();

    let events = tokio::task::spawn_blocking(move || {
        collect_until(&rx, Duration::from_secs(5), |e| {
            matches!(e, PipelineEvent::UploadFinished { .. } | PipelineEvent::UploadFailed { .. })
        })
    })
    .await
    .unwrap();
    handle.stop().await;

    let emitted = events.iter().find_map(|e| match e {
        PipelineEvent::UtteranceEmitted { bytes, duration_ms } => Some((*bytes, *duration_ms)),
        _ => None,
    });
    // four voiced chunks plus the trailing silence before the timeout fired
    assert_eq!(emitted, Some((6 * 1600 * 2, 600)));

    let finished = events.iter().find_map(|e| match e {
        PipelineEvent::UploadFinished { bytes, text } => Some((*bytes, text.clone())),
        _ => None,
    });
    assert_eq!(
        finished,
        Some((6 * 1600 * 2, Some("turn on the lights".to_string())))
    );

    let uploads = service.uploads();
    assert_eq!(uploads.len(), 1);
    // Bridge round trip keeps the mono level
    assert_eq!(&uploads[0][..2], &900i16.to_le_bytes());
}

#[tokio::test(flavor = "multi_thread")]
async fn short_blip_is_not_uploaded() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let service = Arc::new(MockAudioService::new());
    let levels = [900, 0, 0, 0, 0];
    let source = MockSource::new(levels.iter().map(|&v| device_chunk(v)).collect());

    let base = fast_config(tx);
    let config = PipelineConfig {
        capture_chunk_frames: 4800,
        segmenter: SegmenterConfig {
            min_duration_ms: 500,
            ..base.segmenter
        },
        ..base
    };
    let handle = Pipeline::new(config)
        .start(service.clone(), Box::new(MockSink::new()), Some(Box::new(source)))
        .unwrap();

    let events = tokio::task::spawn_blocking(move || {
        collect_until(&rx, Duration::from_secs(2), |e| {
            matches!(e, PipelineEvent::UtteranceDiscarded { .. })
        })
    })
    .await
    .unwrap();
    handle.stop().await;

    assert!(
        events
            .iter()
            .any(|e| matches!(e, PipelineEvent::UtteranceDiscarded { .. }))
    );
    assert_eq!(service.upload_attempts(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn utterance_shorter_than_minimum_is_dropped_at_end_of_input() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let service = Arc::new(MockAudioService::new());
    // one 120 ms voiced read, then the source runs dry
    let source = MockSource::new(vec![mono_to_stereo(&upsample(&vec![900; 1920], 3))]);

    let base = fast_config(tx);
    let config = PipelineConfig {
        capture_chunk_frames: 1920 * 3,
        segmenter: SegmenterConfig {
            min_duration_ms: 500,
            ..base.segmenter
        },
        ..base
    };
    let handle = Pipeline::new(config)
        .start(service.clone(), Box::new(MockSink::new()), Some(Box::new(source)))
        .unwrap();

    let events = tokio::task::spawn_blocking(move || {
        collect_until(&rx, Duration::from_secs(2), |e| {
            matches!(e, PipelineEvent::UtteranceDiscarded { .. })
        })
    })
    .await
    .unwrap();
    // give a wrongly queued upload time to show up
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.stop().await;

    let discarded = events.iter().find_map(|e| match e {
        PipelineEvent::UtteranceDiscarded { duration_ms } => Some(*duration_ms),
        _ => None,
    });
    assert_eq!(discarded, Some(120));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, PipelineEvent::UtteranceEmitted { .. }))
    );
    assert_eq!(service.upload_attempts(), 0);
}
