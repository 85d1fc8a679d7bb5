use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::resolve::NetworkOptions;

const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";
const DEFAULT_MESH_CLI: &str = "tailscale";

#[derive(Debug, Deserialize, Default)]
struct BridgeConfigFile {
    ffmpeg_path: Option<String>,
    mesh_cli: Option<String>,
    network: Option<NetworkOptions>,
}

/// Runtime configuration for the bridge: external tool locations and the
/// default network options applied when a start request carries none.
///
/// Loaded from an optional JSON file named by `BRIDGE_CONFIG`, overlaid
/// with `BRIDGE_*` environment variables, then validated.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub ffmpeg_path: String,
    pub mesh_cli: String,
    pub network: NetworkOptions,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: DEFAULT_FFMPEG_PATH.to_string(),
            mesh_cli: DEFAULT_MESH_CLI.to_string(),
            network: NetworkOptions::default(),
        }
    }
}

impl BridgeConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("BRIDGE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: BridgeConfigFile) -> Self {
        Self {
            ffmpeg_path: file
                .ffmpeg_path
                .unwrap_or_else(|| DEFAULT_FFMPEG_PATH.to_string()),
            mesh_cli: file.mesh_cli.unwrap_or_else(|| DEFAULT_MESH_CLI.to_string()),
            network: file.network.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("BRIDGE_FFMPEG") {
            if !path.trim().is_empty() {
                self.ffmpeg_path = path;
            }
        }
        if let Ok(cli) = std::env::var("BRIDGE_MESH_CLI") {
            if !cli.trim().is_empty() {
                self.mesh_cli = cli;
            }
        }
        if let Ok(ip) = std::env::var("BRIDGE_PUBLIC_IP") {
            if !ip.trim().is_empty() {
                self.network.public_ip = Some(ip);
            }
        }
        if let Ok(ip) = std::env::var("BRIDGE_VPN_SERVER_IP") {
            if !ip.trim().is_empty() {
                self.network.vpn_server_ip = Some(ip);
            }
        }
        if let Ok(url) = std::env::var("BRIDGE_RELAY_URL") {
            if !url.trim().is_empty() {
                self.network.relay_url = Some(url);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.ffmpeg_path.trim().is_empty() {
            return Err(anyhow!("ffmpeg_path must not be empty"));
        }
        if self.mesh_cli.trim().is_empty() {
            return Err(anyhow!("mesh_cli must not be empty"));
        }
        if let Some(host) = &self.network.public_ip {
            url::Host::parse(host)
                .map_err(|e| anyhow!("public_ip '{}' is not a valid host: {}", host, e))?;
        }
        if let Some(host) = &self.network.vpn_server_ip {
            url::Host::parse(host)
                .map_err(|e| anyhow!("vpn_server_ip '{}' is not a valid host: {}", host, e))?;
        }
        if let Some(relay) = &self.network.relay_url {
            url::Url::parse(relay)
                .map_err(|e| anyhow!("relay_url '{}' is not a valid URL: {}", relay, e))?;
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<BridgeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
