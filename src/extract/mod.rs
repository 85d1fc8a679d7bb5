//! Media extraction supervision.
//!
//! Each active stream owns two background workers: an audio reader attached
//! to an external decode subprocess, and a video capture worker driving the
//! source directly. The supervisor launches both, hands back ownership
//! handles, and tears them down with bounded grace.
//!
//! Deferred consumer callbacks from every stream funnel through one shared
//! dispatcher thread.

mod audio;
pub mod dispatch;
mod video;

use anyhow::Result;
use std::sync::Arc;

pub use dispatch::{AudioCallback, Delivery, VideoCallback};

use crate::media::{MediaQueue, VideoFrame};
use audio::AudioWorker;
use dispatch::Dispatcher;
use video::VideoWorker;

pub use audio::STOP_GRACE;

/// URL scheme served by synthetic backends instead of real sources.
pub const STUB_SCHEME: &str = "stub://";

/// Ownership handles to one stream's extraction workers. Exclusively owned
/// by the stream's session; released on stop.
pub(crate) struct ExtractionHandles {
    audio: AudioWorker,
    video: VideoWorker,
}

impl ExtractionHandles {
    /// False once the audio pipeline has died outside an explicit stop.
    /// Video read failures retry forever and never count against health.
    pub(crate) fn audio_healthy(&self) -> bool {
        self.audio.is_healthy()
    }
}

/// Launches and tears down extraction workers for the registry.
pub(crate) struct ExtractionSupervisor {
    ffmpeg_path: String,
    dispatcher: Dispatcher,
}

impl ExtractionSupervisor {
    pub(crate) fn new(ffmpeg_path: String) -> Self {
        Self {
            ffmpeg_path,
            dispatcher: Dispatcher::spawn(),
        }
    }

    /// Start both workers for `resolved_url`. On a partial failure the
    /// already-running worker is stopped before the error is returned.
    pub(crate) fn start(
        &self,
        resolved_url: &str,
        audio_queue: Arc<MediaQueue<Vec<u8>>>,
        video_queue: Arc<MediaQueue<VideoFrame>>,
        audio_callback: Option<AudioCallback>,
        video_callback: Option<VideoCallback>,
    ) -> Result<ExtractionHandles> {
        let mut audio = audio::spawn_audio(
            resolved_url,
            &self.ffmpeg_path,
            audio_queue,
            audio_callback,
            self.dispatcher.sender(),
        )?;

        let video = match video::spawn_video(
            resolved_url,
            video_queue,
            video_callback,
            self.dispatcher.sender(),
        ) {
            Ok(video) => video,
            Err(e) => {
                audio.stop();
                return Err(e);
            }
        };

        Ok(ExtractionHandles { audio, video })
    }

    /// Tear down both workers: graceful subprocess terminate with a bounded
    /// wait for audio, cooperative stop flag for video.
    pub(crate) fn stop(&self, handles: &mut ExtractionHandles) {
        handles.audio.stop();
        handles.video.stop();
    }
}
