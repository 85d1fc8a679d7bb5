//! Stream session registry.
//!
//! The registry is the control plane: it owns the map of active sessions,
//! runs the start flow (path resolution, connectivity gate, worker launch),
//! answers status queries, serves the pull interface, and tears sessions
//! down on stop or global shutdown.
//!
//! It is an explicit service object. Callers construct one, share it by
//! reference, and shut it down; there is no process-wide singleton. The
//! session map is the only state shared across streams; its mutex is never
//! held across resolution, verification, worker launch, or queue waits.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::BridgeConfig;
use crate::extract::{
    AudioCallback, ExtractionHandles, ExtractionSupervisor, VideoCallback, STUB_SCHEME,
};
use crate::media::{MediaQueue, VideoFrame, AUDIO_QUEUE_CHUNKS, VIDEO_QUEUE_FRAMES};
use crate::resolve::{
    resolve, ConnectionMethod, Credentials, NetworkOptions, RequestedMethod, Resolution,
};
use crate::verify::verify_target;

/// Default wait on the pull interface.
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle of one stream session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Starting,
    Active,
    Stopped,
    Error,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamStatus::Starting => "starting",
            StreamStatus::Active => "active",
            StreamStatus::Stopped => "stopped",
            StreamStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Structured failure returned to callers: a human-readable error plus
/// actionable suggestions. Control-plane operations never fail opaquely.
#[derive(Clone, Debug, Serialize)]
pub struct StreamError {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl StreamError {
    fn new(error: impl Into<String>, suggestions: &[&str]) -> Self {
        Self {
            error: error.into(),
            suggestions: suggestions.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.error)
    }
}

impl std::error::Error for StreamError {}

/// A request to start ingesting one stream.
pub struct StartRequest {
    pub url: String,
    pub user_id: String,
    pub method: RequestedMethod,
    pub credentials: Option<Credentials>,
    /// Per-request overrides; the registry's configured options apply
    /// when absent.
    pub network: Option<NetworkOptions>,
    pub audio_callback: Option<AudioCallback>,
    pub video_callback: Option<VideoCallback>,
}

impl StartRequest {
    pub fn new(url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_id: user_id.into(),
            method: RequestedMethod::Auto,
            credentials: None,
            network: None,
            audio_callback: None,
            video_callback: None,
        }
    }
}

/// Queue geometry and start time reported back on a successful start.
#[derive(Clone, Debug, Serialize)]
pub struct StreamInfo {
    pub audio_queue_len: usize,
    pub video_queue_len: usize,
    pub started_at: String,
}

/// Successful start result.
#[derive(Clone, Debug, Serialize)]
pub struct StartedStream {
    pub user_id: String,
    pub connection_method: ConnectionMethod,
    pub stream_info: StreamInfo,
}

/// Read-only view of one session.
#[derive(Clone, Debug, Serialize)]
pub struct StreamSnapshot {
    pub user_id: String,
    pub status: StreamStatus,
    pub connection_method: ConnectionMethod,
    pub source_url: String,
    pub resolved_url: String,
    pub started_at: String,
    pub audio_queue_len: usize,
    pub video_queue_len: usize,
}

/// Aggregate view across all sessions.
#[derive(Clone, Debug, Serialize)]
pub struct RegistrySnapshot {
    pub active_streams: usize,
    pub streams: BTreeMap<String, StreamSnapshot>,
}

struct StreamSession {
    source_url: String,
    resolved_url: String,
    method: ConnectionMethod,
    status: StreamStatus,
    started_at: DateTime<Utc>,
    audio_queue: Arc<MediaQueue<Vec<u8>>>,
    video_queue: Arc<MediaQueue<VideoFrame>>,
    handles: ExtractionHandles,
}

impl StreamSession {
    /// A dead audio pipeline is detected lazily, at query time. There is no
    /// automatic restart; the caller must issue a fresh start request.
    fn refresh_status(&mut self, user_id: &str) {
        if self.status == StreamStatus::Active && !self.handles.audio_healthy() {
            log::error!(
                "audio pipeline died for user {}; marking session as error",
                user_id
            );
            self.status = StreamStatus::Error;
        }
    }

    fn snapshot(&self, user_id: &str) -> StreamSnapshot {
        StreamSnapshot {
            user_id: user_id.to_string(),
            status: self.status,
            connection_method: self.method,
            source_url: self.source_url.clone(),
            resolved_url: self.resolved_url.clone(),
            started_at: self.started_at.to_rfc3339(),
            audio_queue_len: self.audio_queue.len(),
            video_queue_len: self.video_queue.len(),
        }
    }
}

/// The per-process stream service: session map, extraction supervisor, and
/// the configuration they run under.
pub struct StreamRegistry {
    streams: Mutex<HashMap<String, StreamSession>>,
    supervisor: ExtractionSupervisor,
    config: BridgeConfig,
}

impl StreamRegistry {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            supervisor: ExtractionSupervisor::new(config.ffmpeg_path.clone()),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StreamSession>> {
        match self.streams.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start a stream: resolve the path, gate on connectivity, launch the
    /// extraction workers, register the session.
    ///
    /// A second start for a user with a live session is rejected; the
    /// caller must stop the existing stream first.
    pub fn start_stream(&self, request: StartRequest) -> Result<StartedStream, StreamError> {
        let StartRequest {
            url,
            user_id,
            method,
            credentials,
            network,
            audio_callback,
            video_callback,
        } = request;

        log::info!("starting stream for user {} from {}", user_id, url);

        if self.lock().contains_key(&user_id) {
            return Err(StreamError::new(
                format!("stream already active for user '{}'", user_id),
                &["Stop the existing stream before starting a new one"],
            ));
        }

        // Synthetic sources have no network path to pick or probe.
        let resolution = if url.starts_with(STUB_SCHEME) {
            Resolution {
                url: url.clone(),
                method: ConnectionMethod::Direct,
            }
        } else {
            let options = network.as_ref().unwrap_or(&self.config.network);
            resolve(
                &url,
                method,
                credentials.as_ref(),
                options,
                &self.config.mesh_cli,
            )
        };
        log::info!(
            "resolved path for user {}: {} via {}",
            user_id,
            resolution.url,
            resolution.method
        );

        if !resolution.url.starts_with(STUB_SCHEME) {
            let report = verify_target(&resolution.url);
            if !report.ok {
                let error = report
                    .error
                    .unwrap_or_else(|| "connectivity test failed".to_string());
                log::warn!("connectivity gate failed for user {}: {}", user_id, error);
                let suggestions: Vec<&str> =
                    report.suggestions.iter().map(String::as_str).collect();
                return Err(StreamError::new(error, &suggestions));
            }
        }

        let audio_queue = Arc::new(MediaQueue::new(AUDIO_QUEUE_CHUNKS));
        let video_queue = Arc::new(MediaQueue::new(VIDEO_QUEUE_FRAMES));

        let handles = self
            .supervisor
            .start(
                &resolution.url,
                Arc::clone(&audio_queue),
                Arc::clone(&video_queue),
                audio_callback,
                video_callback,
            )
            .map_err(|e| {
                StreamError::new(
                    format!("failed to start extraction: {:#}", e),
                    &[
                        "Check that ffmpeg is installed and on PATH",
                        "Verify the stream URL format",
                        "Try a different connection method",
                    ],
                )
            })?;

        // Workers are spawned; activity is optimistic. The session does not
        // wait for a first chunk before reporting active.
        let session = StreamSession {
            source_url: url,
            resolved_url: resolution.url,
            method: resolution.method,
            status: StreamStatus::Active,
            started_at: Utc::now(),
            audio_queue,
            video_queue,
            handles,
        };
        let started = StartedStream {
            user_id: user_id.clone(),
            connection_method: session.method,
            stream_info: StreamInfo {
                audio_queue_len: session.audio_queue.len(),
                video_queue_len: session.video_queue.len(),
                started_at: session.started_at.to_rfc3339(),
            },
        };

        let mut streams = self.lock();
        if streams.contains_key(&user_id) {
            // Lost a concurrent-start race; roll the workers back.
            drop(streams);
            let mut session = session;
            self.supervisor.stop(&mut session.handles);
            return Err(StreamError::new(
                format!("stream already active for user '{}'", user_id),
                &["Stop the existing stream before starting a new one"],
            ));
        }
        streams.insert(user_id.clone(), session);
        drop(streams);

        log::info!(
            "stream active for user {} via {}",
            started.user_id,
            started.connection_method
        );
        Ok(started)
    }

    /// Stop a stream and release its resources. Stopping an unknown user is
    /// safe and reports "not found".
    pub fn stop_stream(&self, user_id: &str) -> Result<String, StreamError> {
        let session = self.lock().remove(user_id);
        let Some(mut session) = session else {
            return Err(StreamError::new(
                format!("stream not found for user '{}'", user_id),
                &[],
            ));
        };

        self.supervisor.stop(&mut session.handles);
        session.status = StreamStatus::Stopped;
        log::info!("stream stopped for user {}", user_id);
        Ok("Stream stopped successfully".to_string())
    }

    /// Per-stream snapshot, or `None` for an unknown user. Observing a dead
    /// audio pipeline here transitions the session to `error`.
    pub fn stream_status(&self, user_id: &str) -> Option<StreamSnapshot> {
        let mut streams = self.lock();
        let session = streams.get_mut(user_id)?;
        session.refresh_status(user_id);
        Some(session.snapshot(user_id))
    }

    /// Aggregate snapshot across all sessions.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut streams = self.lock();
        let mut all = BTreeMap::new();
        for (user_id, session) in streams.iter_mut() {
            session.refresh_status(user_id);
            all.insert(user_id.clone(), session.snapshot(user_id));
        }
        RegistrySnapshot {
            active_streams: all.len(),
            streams: all,
        }
    }

    /// Pull the oldest buffered audio chunk for `user_id`, waiting up to
    /// `timeout`. Unknown users and empty queues yield `None`.
    pub fn pull_audio_chunk(&self, user_id: &str, timeout: Duration) -> Option<Vec<u8>> {
        let queue = {
            let streams = self.lock();
            Arc::clone(&streams.get(user_id)?.audio_queue)
        };
        queue.pop_timeout(timeout)
    }

    /// Pull the oldest buffered video frame for `user_id`, waiting up to
    /// `timeout`.
    pub fn pull_video_frame(&self, user_id: &str, timeout: Duration) -> Option<VideoFrame> {
        let queue = {
            let streams = self.lock();
            Arc::clone(&streams.get(user_id)?.video_queue)
        };
        queue.pop_timeout(timeout)
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Stop every session. Individual teardown problems are logged by the
    /// supervisor and never abort the sweep.
    pub fn shutdown(&self) {
        let drained: Vec<(String, StreamSession)> = self.lock().drain().collect();
        for (user_id, mut session) in drained {
            log::info!("shutdown: stopping stream for user {}", user_id);
            self.supervisor.stop(&mut session.handles);
            session.status = StreamStatus::Stopped;
        }
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
