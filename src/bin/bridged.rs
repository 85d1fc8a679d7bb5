//! bridged - cross-network stream bridge daemon
//!
//! This daemon:
//! 1. Resolves the best reachability path to the configured stream source
//! 2. Gates startup on a transport-layer connectivity check
//! 3. Runs audio (ffmpeg subprocess) and video (direct capture) extraction
//! 4. Logs stream health and queue depths periodically
//! 5. Tears every session down on ctrl-c

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use stream_bridge::{BridgeConfig, RequestedMethod, StartRequest, StreamRegistry};

#[derive(Parser, Debug)]
#[command(name = "bridged", about = "Cross-network stream bridge daemon")]
struct Args {
    /// Stream source URL (stub:// runs the synthetic backends)
    #[arg(long, env = "BRIDGE_URL", default_value = "stub://glasses")]
    url: String,

    /// User id the stream is registered under
    #[arg(long, env = "BRIDGE_USER", default_value = "operator")]
    user: String,

    /// Connection method: auto, direct, port_forward, vpn, relay, mesh_overlay
    #[arg(long, env = "BRIDGE_METHOD", default_value = "auto")]
    method: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let method: RequestedMethod = args.method.parse()?;
    let config = BridgeConfig::load()?;

    let registry = StreamRegistry::new(config);

    let mut request = StartRequest::new(args.url.clone(), args.user.clone());
    request.method = method;
    let started = registry
        .start_stream(request)
        .map_err(|e| anyhow!("{} (suggestions: {})", e.error, e.suggestions.join("; ")))?;

    log::info!(
        "stream active for user {} via {} (started at {})",
        started.user_id,
        started.connection_method,
        started.stream_info.started_at
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;

    let mut last_health_log = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));

        if last_health_log.elapsed() >= Duration::from_secs(5) {
            match registry.stream_status(&args.user) {
                Some(snapshot) => log::info!(
                    "stream status={} method={} audio_queue={} video_queue={}",
                    snapshot.status,
                    snapshot.connection_method,
                    snapshot.audio_queue_len,
                    snapshot.video_queue_len
                ),
                None => {
                    log::warn!("stream for user {} is gone; exiting", args.user);
                    break;
                }
            }
            last_health_log = Instant::now();
        }
    }

    log::info!("shutting down");
    registry.shutdown();
    Ok(())
}
