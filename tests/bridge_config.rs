use std::io::Write;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use stream_bridge::BridgeConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "BRIDGE_CONFIG",
        "BRIDGE_FFMPEG",
        "BRIDGE_MESH_CLI",
        "BRIDGE_PUBLIC_IP",
        "BRIDGE_VPN_SERVER_IP",
        "BRIDGE_RELAY_URL",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_apply_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = BridgeConfig::load().expect("config");
    assert_eq!(cfg.ffmpeg_path, "ffmpeg");
    assert_eq!(cfg.mesh_cli, "tailscale");
    assert!(cfg.network.public_ip.is_none());
    assert!(cfg.network.relay_url.is_none());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "ffmpeg_path": "/opt/ffmpeg/bin/ffmpeg",
        "mesh_cli": "tailscale",
        "network": {
            "public_ip": "198.51.100.20",
            "vpn_server_ip": "10.8.0.1"
        }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("BRIDGE_CONFIG", file.path());
    // Env wins over the file for the fields it names.
    std::env::set_var("BRIDGE_PUBLIC_IP", "203.0.113.77");
    std::env::set_var("BRIDGE_RELAY_URL", "rtsp://relay.example.net:8554/u1");

    let cfg = BridgeConfig::load().expect("config");
    assert_eq!(cfg.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
    assert_eq!(cfg.network.public_ip.as_deref(), Some("203.0.113.77"));
    assert_eq!(cfg.network.vpn_server_ip.as_deref(), Some("10.8.0.1"));
    assert_eq!(
        cfg.network.relay_url.as_deref(),
        Some("rtsp://relay.example.net:8554/u1")
    );

    clear_env();
}

#[test]
fn invalid_relay_url_fails_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BRIDGE_RELAY_URL", "not a url");
    let err = BridgeConfig::load().unwrap_err();
    assert!(err.to_string().contains("relay_url"));

    clear_env();
}

#[test]
fn invalid_public_ip_fails_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BRIDGE_PUBLIC_IP", "not a host at all");
    let err = BridgeConfig::load().unwrap_err();
    assert!(err.to_string().contains("public_ip"));

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("BRIDGE_CONFIG", "/definitely/not/here.json");
    assert!(BridgeConfig::load().is_err());

    clear_env();
}
