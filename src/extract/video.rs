//! Video capture worker.
//!
//! Video bypasses the decode subprocess: a worker thread opens the resolved
//! URL directly as a capture source, keeps the source-side buffer at depth 1
//! so latency never accumulates, caps the frame rate at 15 fps, and scales
//! every frame to 640x480 before handing it to the bounded queue.
//!
//! A failed read backs off briefly and retries; only the cooperative stop
//! flag ends the worker.
//!
//! Real capture uses GStreamer behind the `video-gstreamer` feature. A
//! synthetic backend serves `stub://` URLs.

use anyhow::Result;
#[cfg(feature = "video-gstreamer")]
use anyhow::Context;
#[cfg(feature = "video-gstreamer")]
use gstreamer::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::dispatch::{deliver_video, Job, VideoCallback};
use super::STUB_SCHEME;
use crate::media::{MediaQueue, VideoFrame, FRAME_HEIGHT, FRAME_WIDTH, MAX_CAPTURE_FPS};

/// Pause after a failed frame read before retrying.
const READ_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Handle to one stream's capture worker.
pub(crate) struct VideoWorker {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl VideoWorker {
    /// Signal the worker to exit at its next loop boundary and wait for it.
    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("video capture thread panicked");
            }
        }
    }
}

/// Open the capture source and launch the worker thread.
///
/// Opening happens on the caller's thread so a bad source (or a build
/// without the `video-gstreamer` feature) fails the start request instead
/// of dying silently in the background.
pub(crate) fn spawn_video(
    resolved_url: &str,
    queue: Arc<MediaQueue<VideoFrame>>,
    callback: Option<VideoCallback>,
    jobs: mpsc::Sender<Job>,
) -> Result<VideoWorker> {
    let mut backend = CaptureBackend::open(resolved_url)?;
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let url = resolved_url.to_string();

    let join = std::thread::spawn(move || {
        let mut consecutive_failures: u32 = 0;
        while !flag.load(Ordering::SeqCst) {
            match backend.next_frame() {
                Ok(frame) => {
                    consecutive_failures = 0;
                    if let Some(cb) = &callback {
                        if queue.push(frame.clone()) {
                            log::trace!("video queue full; dropped oldest frame");
                        }
                        deliver_video(cb, &jobs, &frame);
                    } else if queue.push(frame) {
                        log::trace!("video queue full; dropped oldest frame");
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures == 1 {
                        log::warn!("failed to read video frame from {}: {}", url, e);
                    } else {
                        log::debug!(
                            "video read failure #{} from {}: {}",
                            consecutive_failures,
                            url,
                            e
                        );
                    }
                    std::thread::sleep(READ_RETRY_BACKOFF);
                }
            }
        }
        log::debug!("video capture exiting");
    });

    Ok(VideoWorker {
        stop,
        join: Some(join),
    })
}

enum CaptureBackend {
    Synthetic(SyntheticCapture),
    #[cfg(feature = "video-gstreamer")]
    Gstreamer(GstreamerCapture),
}

impl CaptureBackend {
    fn open(url: &str) -> Result<Self> {
        if url.starts_with(STUB_SCHEME) {
            return Ok(CaptureBackend::Synthetic(SyntheticCapture::new()));
        }
        #[cfg(feature = "video-gstreamer")]
        {
            Ok(CaptureBackend::Gstreamer(GstreamerCapture::open(url)?))
        }
        #[cfg(not(feature = "video-gstreamer"))]
        {
            anyhow::bail!("video capture requires the video-gstreamer feature")
        }
    }

    fn next_frame(&mut self) -> Result<VideoFrame> {
        match self {
            CaptureBackend::Synthetic(capture) => Ok(capture.next_frame()),
            #[cfg(feature = "video-gstreamer")]
            CaptureBackend::Gstreamer(capture) => capture.next_frame(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic capture (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticCapture {
    frame_count: u64,
    next_frame_at: Instant,
}

impl SyntheticCapture {
    fn new() -> Self {
        Self {
            frame_count: 0,
            next_frame_at: Instant::now(),
        }
    }

    /// Generate a patterned frame, paced at the capped frame rate.
    fn next_frame(&mut self) -> VideoFrame {
        let now = Instant::now();
        if self.next_frame_at > now {
            std::thread::sleep(self.next_frame_at - now);
        }
        self.next_frame_at = Instant::now() + Duration::from_millis(1000 / MAX_CAPTURE_FPS as u64);

        self.frame_count += 1;
        let pixel_count = (FRAME_WIDTH * FRAME_HEIGHT * 3) as usize;
        let mut data = vec![0u8; pixel_count];
        for (i, pixel) in data.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8;
        }
        VideoFrame {
            data,
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
        }
    }
}

// ----------------------------------------------------------------------------
// GStreamer capture
// ----------------------------------------------------------------------------

#[cfg(feature = "video-gstreamer")]
struct GstreamerCapture {
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
}

#[cfg(feature = "video-gstreamer")]
impl GstreamerCapture {
    /// Build and start the capture pipeline. The appsink keeps at most one
    /// buffer and drops stale ones; the caps negotiate the fixed output
    /// geometry and the 15 fps cap at the source side.
    fn open(url: &str) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let description = format!(
            "rtspsrc location={} protocols=tcp latency=0 ! decodebin ! videoconvert ! \
             videoscale ! videorate ! \
             video/x-raw,format=RGB,width={},height={},framerate={}/1 ! \
             appsink name=sink sync=false max-buffers=1 drop=true",
            url, FRAME_WIDTH, FRAME_HEIGHT, MAX_CAPTURE_FPS
        );
        let pipeline = gstreamer::parse::launch(&description)
            .context("build capture pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("capture pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("sink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set capture pipeline to Playing")?;
        log::info!("video capture started for {}", url);

        Ok(Self { pipeline, appsink })
    }

    fn next_frame(&mut self) -> Result<VideoFrame> {
        self.poll_bus()?;

        let timeout = gstreamer::ClockTime::from_mseconds(500);
        let sample = self
            .appsink
            .try_pull_sample(timeout)
            .ok_or_else(|| anyhow::anyhow!("capture source produced no frame"))?;
        sample_to_frame(&sample)
    }

    fn poll_bus(&mut self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(anyhow::anyhow!(
                        "capture error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    return Err(anyhow::anyhow!("capture source reached end of stream"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(feature = "video-gstreamer")]
impl Drop for GstreamerCapture {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

#[cfg(feature = "video-gstreamer")]
fn sample_to_frame(sample: &gstreamer::Sample) -> Result<VideoFrame> {
    let buffer = sample.buffer().context("capture sample missing buffer")?;
    let caps = sample.caps().context("capture sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse capture caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info
        .stride()
        .first()
        .copied()
        .map(|s| s as usize)
        .unwrap_or(row_bytes);

    let map = buffer.map_readable().context("map capture buffer")?;
    let raw = map.as_slice();

    let data = if stride == row_bytes {
        raw.to_vec()
    } else {
        // Strip per-row padding the converter may have added.
        let mut packed = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_bytes;
            packed.extend_from_slice(
                raw.get(start..end)
                    .context("capture buffer row is out of bounds")?,
            );
        }
        packed
    };

    Ok(VideoFrame {
        data,
        width,
        height,
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
