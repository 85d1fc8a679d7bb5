//! End-to-end lifecycle over synthetic (`stub://`) sources: no camera,
//! ffmpeg, or network required.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stream_bridge::{
    AudioCallback, BridgeConfig, ConnectionMethod, StartRequest, StreamRegistry, StreamStatus,
    VideoCallback, AUDIO_CHUNK_BYTES, AUDIO_QUEUE_CHUNKS, FRAME_HEIGHT, FRAME_WIDTH,
    VIDEO_QUEUE_FRAMES,
};

fn registry() -> StreamRegistry {
    StreamRegistry::new(BridgeConfig::default())
}

#[test]
fn full_lifecycle_start_pull_status_stop() {
    let registry = registry();

    let started = registry
        .start_stream(StartRequest::new("stub://glasses", "u1"))
        .expect("start");
    assert_eq!(started.user_id, "u1");
    assert_eq!(started.connection_method, ConnectionMethod::Direct);

    // Audio arrives in chunk-sized units.
    let chunk = registry
        .pull_audio_chunk("u1", Duration::from_secs(2))
        .expect("audio chunk");
    assert_eq!(chunk.len(), AUDIO_CHUNK_BYTES);

    // Video arrives at the fixed output geometry.
    let frame = registry
        .pull_video_frame("u1", Duration::from_secs(2))
        .expect("video frame");
    assert_eq!(frame.width, FRAME_WIDTH);
    assert_eq!(frame.height, FRAME_HEIGHT);

    let snapshot = registry.stream_status("u1").expect("status");
    assert_eq!(snapshot.status, StreamStatus::Active);
    assert!(snapshot.audio_queue_len <= AUDIO_QUEUE_CHUNKS);
    assert!(snapshot.video_queue_len <= VIDEO_QUEUE_FRAMES);

    let message = registry.stop_stream("u1").expect("stop");
    assert!(message.contains("stopped"));
    assert_eq!(registry.active_count(), 0);
}

#[test]
fn stop_is_idempotent() {
    let registry = registry();
    registry
        .start_stream(StartRequest::new("stub://glasses", "u1"))
        .expect("start");

    assert!(registry.stop_stream("u1").is_ok());
    let err = registry.stop_stream("u1").unwrap_err();
    assert!(err.error.contains("not found"));
    // A third stop behaves the same.
    assert!(registry.stop_stream("u1").is_err());
}

#[test]
fn callbacks_receive_both_channels() {
    let registry = registry();
    let audio_hits = Arc::new(AtomicUsize::new(0));
    let video_hits = Arc::new(AtomicUsize::new(0));

    let mut request = StartRequest::new("stub://glasses", "u1");
    let counter = Arc::clone(&audio_hits);
    request.audio_callback = Some(AudioCallback::deferred(move |chunk| {
        assert_eq!(chunk.len(), AUDIO_CHUNK_BYTES);
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    let counter = Arc::clone(&video_hits);
    request.video_callback = Some(VideoCallback::inline(move |frame| {
        assert_eq!(frame.width, FRAME_WIDTH);
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    registry.start_stream(request).expect("start");

    // Synthetic audio paces at ~64 ms, video at ~66 ms; half a second is
    // plenty for several of each.
    std::thread::sleep(Duration::from_millis(500));
    registry.stop_stream("u1").expect("stop");

    assert!(audio_hits.load(Ordering::SeqCst) >= 2);
    assert!(video_hits.load(Ordering::SeqCst) >= 2);
}

#[test]
fn panicking_audio_callback_does_not_stop_video_or_audio_delivery() {
    let registry = registry();

    let mut request = StartRequest::new("stub://glasses", "u1");
    request.audio_callback = Some(AudioCallback::inline(|_chunk| panic!("consumer bug")));
    registry.start_stream(request).expect("start");

    // Audio keeps flowing to the queue despite the callback failing every
    // single invocation, and video is unaffected.
    assert!(registry
        .pull_audio_chunk("u1", Duration::from_secs(2))
        .is_some());
    assert!(registry
        .pull_audio_chunk("u1", Duration::from_secs(2))
        .is_some());
    assert!(registry
        .pull_video_frame("u1", Duration::from_secs(2))
        .is_some());

    let snapshot = registry.stream_status("u1").expect("status");
    assert_eq!(snapshot.status, StreamStatus::Active);
    registry.stop_stream("u1").expect("stop");
}

#[test]
fn independent_streams_do_not_share_state() {
    let registry = registry();
    registry
        .start_stream(StartRequest::new("stub://one", "u1"))
        .expect("start u1");
    registry
        .start_stream(StartRequest::new("stub://two", "u2"))
        .expect("start u2");

    assert!(registry
        .pull_audio_chunk("u1", Duration::from_secs(2))
        .is_some());
    assert!(registry
        .pull_audio_chunk("u2", Duration::from_secs(2))
        .is_some());

    registry.stop_stream("u1").expect("stop u1");
    // u2 keeps running after u1 is gone.
    assert!(registry
        .pull_audio_chunk("u2", Duration::from_secs(2))
        .is_some());
    assert_eq!(registry.active_count(), 1);

    registry.shutdown();
    assert_eq!(registry.active_count(), 0);
}

#[test]
fn shutdown_sweep_is_safe_to_repeat() {
    let registry = registry();
    registry
        .start_stream(StartRequest::new("stub://glasses", "u1"))
        .expect("start");
    registry.shutdown();
    registry.shutdown();
    assert_eq!(registry.active_count(), 0);
}
