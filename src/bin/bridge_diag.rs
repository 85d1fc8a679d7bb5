//! bridge_diag - one-shot network diagnostics
//!
//! Prints the interface inventory, an optional connectivity verdict for a
//! stream URL, and configuration recommendations as JSON.

use anyhow::Result;
use clap::Parser;

use stream_bridge::diagnose;

#[derive(Parser, Debug)]
#[command(name = "bridge_diag", about = "Stream reachability diagnostics")]
struct Args {
    /// Stream URL to probe; omit for interface inventory only
    #[arg(long)]
    url: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let report = diagnose(args.url.as_deref());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
