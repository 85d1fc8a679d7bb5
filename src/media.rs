//! Bounded media buffering.
//!
//! `MediaQueue` is the handoff point between extraction workers and consumers:
//! a thread-safe bounded FIFO that evicts its oldest element to admit a new one
//! when full. The stream is real-time; recency wins over completeness.
//!
//! The buffering layer MUST NOT:
//! - Block a producer when the queue is full (eviction is immediate)
//! - Grow past its declared capacity
//! - Reorder items within a channel

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Audio queue capacity, in chunks.
pub const AUDIO_QUEUE_CHUNKS: usize = 100;

/// Size of one audio chunk read from the decode process.
/// 1024 samples of s16le mono at 16 kHz, about 64 ms of audio.
pub const AUDIO_CHUNK_BYTES: usize = 2048;

/// Video queue capacity, in decoded frames.
pub const VIDEO_QUEUE_FRAMES: usize = 50;

/// Fixed output geometry for captured frames.
pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

/// Frame rate cap applied at the capture source.
pub const MAX_CAPTURE_FPS: u32 = 15;

/// One decoded video frame, downscaled to the fixed output geometry.
#[derive(Clone, Debug)]
pub struct VideoFrame {
    /// Packed RGB pixel data, `width * height * 3` bytes.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl VideoFrame {
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Thread-safe bounded FIFO with a drop-oldest insertion policy.
///
/// Producers are extraction worker threads; consumers are the control plane
/// (pull interface) or the callback dispatcher. A full queue never blocks the
/// producer: the oldest buffered item is evicted first.
pub struct MediaQueue<T> {
    inner: Mutex<VecDeque<T>>,
    ready: Condvar,
    capacity: usize,
}

impl<T> MediaQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
            capacity,
        }
    }

    /// Push an item, evicting the oldest if at capacity.
    ///
    /// Returns `true` when an item was evicted to make room.
    pub fn push(&self, item: T) -> bool {
        let mut buffer = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut evicted = false;
        while buffer.len() >= self.capacity {
            buffer.pop_front();
            evicted = true;
        }
        buffer.push_back(item);
        self.ready.notify_one();
        evicted
    }

    /// Pop the oldest item without waiting.
    pub fn pop(&self) -> Option<T> {
        let mut buffer = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buffer.pop_front()
    }

    /// Pop the oldest item, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut buffer = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(item) = buffer.pop_front() {
            return Some(item);
        }
        let (mut buffer, result) = match self
            .ready
            .wait_timeout_while(buffer, timeout, |buffer| buffer.is_empty())
        {
            Ok(pair) => pair,
            Err(poisoned) => poisoned.into_inner(),
        };
        if result.timed_out() && buffer.is_empty() {
            return None;
        }
        buffer.pop_front()
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
