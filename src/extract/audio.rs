//! Audio extraction via an external decode process.
//!
//! One ffmpeg subprocess per stream pulls the RTSP source over TCP, strips
//! video, and emits raw mono 16 kHz s16le PCM in a WAV container on stdout.
//! A dedicated reader thread consumes fixed-size chunks until EOF or stop
//! and feeds the session's bounded queue and callback.
//!
//! `stub://` URLs skip the subprocess entirely and run a synthetic PCM
//! generator at the real chunk cadence, so the full pipeline is exercisable
//! without ffmpeg or a camera.

use anyhow::{Context, Result};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::dispatch::{deliver_audio, AudioCallback, Job};
use super::STUB_SCHEME;
use crate::media::{MediaQueue, AUDIO_CHUNK_BYTES};

/// Grace period between terminate and kill when stopping the subprocess.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Cadence of one 2048-byte chunk of 16 kHz mono s16le audio.
const CHUNK_INTERVAL: Duration = Duration::from_millis(64);

/// Handle to one stream's audio pipeline: the decode subprocess (when real)
/// and the reader thread. Exclusively owned by the stream session.
pub(crate) struct AudioWorker {
    stop: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    child: Option<Child>,
    join: Option<JoinHandle<()>>,
}

impl AudioWorker {
    /// False once the reader has died outside of an explicit stop.
    pub(crate) fn is_healthy(&self) -> bool {
        !self.failed.load(Ordering::SeqCst)
    }

    /// Stop the pipeline: cooperative flag, graceful subprocess terminate
    /// with a bounded wait, forced kill as the last resort.
    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(child) = self.child.as_mut() {
            request_exit(child);
            if !wait_with_deadline(child, STOP_GRACE) {
                log::warn!("decode process ignored terminate; killing");
                let _ = child.kill();
                let _ = child.wait();
            }
        }
        self.child = None;
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("audio reader thread panicked");
            }
        }
    }
}

/// Launch the audio pipeline for `resolved_url`.
pub(crate) fn spawn_audio(
    resolved_url: &str,
    ffmpeg_path: &str,
    queue: Arc<MediaQueue<Vec<u8>>>,
    callback: Option<AudioCallback>,
    jobs: mpsc::Sender<Job>,
) -> Result<AudioWorker> {
    let stop = Arc::new(AtomicBool::new(false));
    let failed = Arc::new(AtomicBool::new(false));

    if resolved_url.starts_with(STUB_SCHEME) {
        let join = spawn_synthetic_reader(Arc::clone(&stop), queue, callback, jobs);
        return Ok(AudioWorker {
            stop,
            failed,
            child: None,
            join: Some(join),
        });
    }

    let mut child = decode_command(ffmpeg_path, resolved_url)
        .spawn()
        .with_context(|| format!("failed to launch decode process '{}'", ffmpeg_path))?;
    let stdout = child
        .stdout
        .take()
        .context("decode process has no stdout pipe")?;
    log::info!("audio extraction started for {}", resolved_url);

    let join = spawn_stream_reader(
        stdout,
        Arc::clone(&stop),
        Arc::clone(&failed),
        queue,
        callback,
        jobs,
    );

    Ok(AudioWorker {
        stop,
        failed,
        child: Some(child),
        join: Some(join),
    })
}

/// The fixed decode invocation: reliable TCP transport, bounded
/// auto-reconnect, video discarded, raw PCM 16 kHz mono WAV on stdout.
fn decode_command(ffmpeg_path: &str, url: &str) -> Command {
    let mut cmd = Command::new(ffmpeg_path);
    cmd.args([
        "-y",
        "-rtsp_transport",
        "tcp",
        "-timeout",
        "30000000",
        "-reconnect",
        "1",
        "-reconnect_streamed",
        "1",
        "-reconnect_delay_max",
        "2",
        "-i",
        url,
        "-vn",
        "-acodec",
        "pcm_s16le",
        "-ar",
        "16000",
        "-ac",
        "1",
        "-f",
        "wav",
        "pipe:1",
    ])
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::null());
    cmd
}

fn spawn_stream_reader(
    mut stdout: impl Read + Send + 'static,
    stop: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    queue: Arc<MediaQueue<Vec<u8>>>,
    callback: Option<AudioCallback>,
    jobs: mpsc::Sender<Job>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = vec![0u8; AUDIO_CHUNK_BYTES];
        loop {
            if stop.load(Ordering::SeqCst) {
                break;
            }
            match stdout.read(&mut buf) {
                Ok(0) => {
                    if !stop.load(Ordering::SeqCst) {
                        log::warn!("audio stream ended unexpectedly");
                        failed.store(true, Ordering::SeqCst);
                    }
                    break;
                }
                Ok(n) => {
                    publish(&queue, &callback, &jobs, buf[..n].to_vec());
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if !stop.load(Ordering::SeqCst) {
                        log::error!("audio read failed: {}", e);
                        failed.store(true, Ordering::SeqCst);
                    }
                    break;
                }
            }
        }
        log::debug!("audio reader exiting");
    })
}

/// Synthetic PCM generator for `stub://` sources: silence-with-ramp chunks
/// at the real cadence.
fn spawn_synthetic_reader(
    stop: Arc<AtomicBool>,
    queue: Arc<MediaQueue<Vec<u8>>>,
    callback: Option<AudioCallback>,
    jobs: mpsc::Sender<Job>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut seq: u64 = 0;
        let mut next_chunk_at = Instant::now();
        while !stop.load(Ordering::SeqCst) {
            let mut chunk = vec![0u8; AUDIO_CHUNK_BYTES];
            for (i, byte) in chunk.iter_mut().enumerate() {
                *byte = ((i as u64 + seq) % 251) as u8;
            }
            seq += 1;
            publish(&queue, &callback, &jobs, chunk);

            next_chunk_at += CHUNK_INTERVAL;
            let now = Instant::now();
            if next_chunk_at > now {
                std::thread::sleep(next_chunk_at - now);
            } else {
                next_chunk_at = now;
            }
        }
        log::debug!("synthetic audio reader exiting");
    })
}

fn publish(
    queue: &MediaQueue<Vec<u8>>,
    callback: &Option<AudioCallback>,
    jobs: &mpsc::Sender<Job>,
    chunk: Vec<u8>,
) {
    match callback {
        Some(cb) => {
            if queue.push(chunk.clone()) {
                log::trace!("audio queue full; dropped oldest chunk");
            }
            deliver_audio(cb, jobs, &chunk);
        }
        None => {
            if queue.push(chunk) {
                log::trace!("audio queue full; dropped oldest chunk");
            }
        }
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) {
    // SAFETY: the pid belongs to a live child we own; worst case the signal
    // races a normal exit and is delivered to a zombie we have not reaped.
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    let _ = child.kill();
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {
                if Instant::now() >= deadline {
                    return false;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(_) => return true,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::AUDIO_QUEUE_CHUNKS;

    fn no_jobs() -> mpsc::Sender<Job> {
        mpsc::channel().0
    }

    #[test]
    fn synthetic_source_produces_full_chunks() {
        let queue = Arc::new(MediaQueue::new(AUDIO_QUEUE_CHUNKS));
        let mut worker =
            spawn_audio("stub://glasses", "ffmpeg", Arc::clone(&queue), None, no_jobs()).unwrap();

        let chunk = queue.pop_timeout(Duration::from_secs(1)).expect("a chunk");
        assert_eq!(chunk.len(), AUDIO_CHUNK_BYTES);
        assert!(worker.is_healthy());
        worker.stop();
    }

    #[test]
    fn reader_marks_failed_on_eof() {
        let queue = Arc::new(MediaQueue::new(AUDIO_QUEUE_CHUNKS));
        let stop = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));
        let pcm: &[u8] = &[7u8; AUDIO_CHUNK_BYTES + 100];

        let join = spawn_stream_reader(
            pcm,
            Arc::clone(&stop),
            Arc::clone(&failed),
            Arc::clone(&queue),
            None,
            no_jobs(),
        );
        join.join().unwrap();

        // Both chunks delivered in order, then EOF marked the worker failed.
        assert_eq!(
            queue.pop().map(|c| c.len()),
            Some(AUDIO_CHUNK_BYTES)
        );
        assert_eq!(queue.pop().map(|c| c.len()), Some(100));
        assert!(failed.load(Ordering::SeqCst));
    }

    #[test]
    fn reader_eof_during_stop_is_not_a_failure() {
        let queue = Arc::new(MediaQueue::new(AUDIO_QUEUE_CHUNKS));
        let stop = Arc::new(AtomicBool::new(true));
        let failed = Arc::new(AtomicBool::new(false));
        let pcm: &[u8] = &[];

        let join = spawn_stream_reader(
            pcm,
            stop,
            Arc::clone(&failed),
            queue,
            None,
            no_jobs(),
        );
        join.join().unwrap();
        assert!(!failed.load(Ordering::SeqCst));
    }

    #[test]
    fn callbacks_see_every_chunk() {
        let queue = Arc::new(MediaQueue::new(AUDIO_QUEUE_CHUNKS));
        let stop = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        let callback = AudioCallback::inline(move |chunk| {
            assert!(!chunk.is_empty());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let pcm: &[u8] = &[1u8; AUDIO_CHUNK_BYTES * 3];
        let join = spawn_stream_reader(
            pcm,
            stop,
            failed,
            Arc::clone(&queue),
            Some(callback),
            no_jobs(),
        );
        join.join().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn decode_command_selects_reliable_transport_and_raw_pcm() {
        let cmd = decode_command("ffmpeg", "rtsp://198.51.100.20:554/cam");
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.windows(2).any(|w| w == ["-rtsp_transport", "tcp"]));
        assert!(args.windows(2).any(|w| w == ["-acodec", "pcm_s16le"]));
        assert!(args.windows(2).any(|w| w == ["-ar", "16000"]));
        assert!(args.windows(2).any(|w| w == ["-ac", "1"]));
        assert!(args.contains(&"-vn".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }
}
