//! Cross-network stream bridge.
//!
//! This crate ingests a remote RTSP source (AR glasses camera and
//! microphone) across heterogeneous networks and delivers bounded,
//! backpressure-safe audio chunks and video frames to consumers.
//!
//! # Architecture
//!
//! - `probe`: local-network, VPN-interface, and mesh-agent reachability
//!   probes
//! - `resolve`: connection path selection and URL rewriting (direct,
//!   port forward, VPN, relay, mesh overlay)
//! - `verify`: transport-layer connectivity gate ahead of resource
//!   allocation
//! - `media`: bounded drop-oldest queues and frame/chunk types
//! - `extract`: the per-stream audio decode subprocess and video capture
//!   workers, plus cross-thread callback dispatch
//! - `session`: the stream registry (start/stop/status/pull control plane)
//! - `diagnostics`: interface inventory and on-demand connectivity checks
//!
//! The pipeline is best-effort and latest-wins: full queues evict their
//! oldest element, and nothing here decodes or interprets payload content.

pub mod config;
pub mod diagnostics;
pub mod extract;
pub mod media;
pub mod probe;
pub mod resolve;
pub mod session;
pub mod verify;

pub use config::BridgeConfig;
pub use diagnostics::{diagnose, DiagnosticsReport, InterfaceInfo};
pub use extract::{AudioCallback, Delivery, VideoCallback, STUB_SCHEME};
pub use media::{
    MediaQueue, VideoFrame, AUDIO_CHUNK_BYTES, AUDIO_QUEUE_CHUNKS, FRAME_HEIGHT, FRAME_WIDTH,
    MAX_CAPTURE_FPS, VIDEO_QUEUE_FRAMES,
};
pub use resolve::{
    ConnectionMethod, Credentials, NetworkOptions, RequestedMethod, Resolution,
    DEFAULT_RTSP_PORT,
};
pub use session::{
    RegistrySnapshot, StartRequest, StartedStream, StreamError, StreamInfo, StreamRegistry,
    StreamSnapshot, StreamStatus, DEFAULT_PULL_TIMEOUT,
};
pub use verify::{verify_target, ConnectivityReport, CONNECT_TIMEOUT};
