//! Cross-thread callback dispatch.
//!
//! Extraction runs on background threads; consumers may not want their
//! callbacks invoked there. A callback is therefore either `inline` (run on
//! the extraction thread, must be fast) or `deferred` (handed off through a
//! channel to one dedicated dispatcher thread shared by all streams).
//!
//! Either way, a panic inside a callback is caught and logged. One failing
//! consumer must not terminate the stream.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::media::VideoFrame;

/// Where a callback runs relative to the extraction thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Invoked in-line on the extraction thread.
    Inline,
    /// Handed off to the dispatcher thread.
    Deferred,
}

type AudioFn = Arc<dyn Fn(&[u8]) + Send + Sync>;
type VideoFn = Arc<dyn Fn(&VideoFrame) + Send + Sync>;

/// Consumer hook for audio chunks.
#[derive(Clone)]
pub struct AudioCallback {
    hook: AudioFn,
    delivery: Delivery,
}

impl AudioCallback {
    pub fn inline(hook: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        Self {
            hook: Arc::new(hook),
            delivery: Delivery::Inline,
        }
    }

    pub fn deferred(hook: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        Self {
            hook: Arc::new(hook),
            delivery: Delivery::Deferred,
        }
    }
}

/// Consumer hook for video frames.
#[derive(Clone)]
pub struct VideoCallback {
    hook: VideoFn,
    delivery: Delivery,
}

impl VideoCallback {
    pub fn inline(hook: impl Fn(&VideoFrame) + Send + Sync + 'static) -> Self {
        Self {
            hook: Arc::new(hook),
            delivery: Delivery::Inline,
        }
    }

    pub fn deferred(hook: impl Fn(&VideoFrame) + Send + Sync + 'static) -> Self {
        Self {
            hook: Arc::new(hook),
            delivery: Delivery::Deferred,
        }
    }
}

pub(crate) enum Job {
    Audio { hook: AudioFn, chunk: Vec<u8> },
    Video { hook: VideoFn, frame: VideoFrame },
}

/// One dispatcher thread drains deferred callback invocations for every
/// stream. The thread exits when the last job sender is dropped.
pub(crate) struct Dispatcher {
    jobs: Option<mpsc::Sender<Job>>,
    join: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub(crate) fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let join = std::thread::spawn(move || {
            for job in rx {
                match job {
                    Job::Audio { hook, chunk } => guard("audio", || hook(&chunk)),
                    Job::Video { hook, frame } => guard("video", || hook(&frame)),
                }
            }
            log::debug!("callback dispatcher exiting");
        });
        Self {
            jobs: Some(tx),
            join: Some(join),
        }
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<Job> {
        // The sender is always present until drop.
        self.jobs
            .as_ref()
            .cloned()
            .unwrap_or_else(|| mpsc::channel().0)
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Disconnect, then wait for in-flight invocations to finish.
        self.jobs.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("callback dispatcher thread panicked");
            }
        }
    }
}

/// Invoke or enqueue an audio callback for one chunk.
pub(crate) fn deliver_audio(callback: &AudioCallback, jobs: &mpsc::Sender<Job>, chunk: &[u8]) {
    match callback.delivery {
        Delivery::Inline => guard("audio", || (callback.hook)(chunk)),
        Delivery::Deferred => {
            let job = Job::Audio {
                hook: Arc::clone(&callback.hook),
                chunk: chunk.to_vec(),
            };
            if jobs.send(job).is_err() {
                log::warn!("audio callback dropped: dispatcher is gone");
            }
        }
    }
}

/// Invoke or enqueue a video callback for one frame.
pub(crate) fn deliver_video(callback: &VideoCallback, jobs: &mpsc::Sender<Job>, frame: &VideoFrame) {
    match callback.delivery {
        Delivery::Inline => guard("video", || (callback.hook)(frame)),
        Delivery::Deferred => {
            let job = Job::Video {
                hook: Arc::clone(&callback.hook),
                frame: frame.clone(),
            };
            if jobs.send(job).is_err() {
                log::warn!("video callback dropped: dispatcher is gone");
            }
        }
    }
}

fn guard(channel: &str, call: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(call)).is_err() {
        log::error!("{} callback panicked; continuing stream", channel);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
