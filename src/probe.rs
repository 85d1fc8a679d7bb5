//! Local reachability probes.
//!
//! This module answers three questions before a path is chosen:
//! - Is the stream host on the local network?
//! - Is a VPN tunnel interface up?
//! - Is a mesh overlay agent (Tailscale-style) running?
//!
//! Probes degrade to "unavailable" on any failure. A missing binary, a
//! timeout, or an unresolvable host yields `false`, never an error: path
//! selection must keep working on machines where none of this exists.

use anyhow::{anyhow, Context, Result};
use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use std::io::Read;
use std::net::{IpAddr, ToSocketAddrs};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Upper bound on any mesh agent CLI invocation.
pub const MESH_CLI_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunnel-type interface names that indicate an active VPN path.
const OVERLAY_INTERFACES: &[&str] = &["tun0", "tap0", "wg0", "vpn0"];

/// True iff `host` is an address (or resolves to one) in a private,
/// link-local, or loopback range. Invalid or unresolvable input is `false`.
pub fn is_local_network(host: &str) -> bool {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_private_ip(&ip);
    }
    // Hostname: resolve and classify the first address.
    match (host, 0u16).to_socket_addrs() {
        Ok(mut addrs) => addrs.next().is_some_and(|addr| is_private_ip(&addr.ip())),
        Err(_) => false,
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        // fc00::/7 unique-local; std has no stable accessor for it.
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

/// True iff a tunnel-type network interface is present.
pub fn has_overlay_interface() -> bool {
    let Ok(interfaces) = NetworkInterface::show() else {
        return false;
    };
    interfaces
        .iter()
        .any(|iface| OVERLAY_INTERFACES.contains(&iface.name.as_str()))
}

/// True iff the mesh overlay agent responds to `<cli> status` in time.
pub fn has_mesh_agent(cli: &str) -> bool {
    match run_cli(cli, &["status"], MESH_CLI_TIMEOUT) {
        Ok(output) => output.success,
        Err(_) => false,
    }
}

/// Query the mesh agent for this machine's own overlay IPv4 address.
pub fn mesh_self_address(cli: &str) -> Result<String> {
    let output = run_cli(cli, &["ip", "-4"], MESH_CLI_TIMEOUT)?;
    if !output.success {
        return Err(anyhow!("'{} ip -4' exited with failure", cli));
    }
    let addr = output.stdout.trim();
    if addr.is_empty() {
        return Err(anyhow!("'{} ip -4' returned no address", cli));
    }
    // The agent may list several addresses; the first is the primary.
    let first = addr.lines().next().unwrap_or(addr).trim();
    first
        .parse::<IpAddr>()
        .with_context(|| format!("mesh agent returned non-address '{}'", first))?;
    Ok(first.to_string())
}

struct CliOutput {
    success: bool,
    stdout: String,
}

/// Run a short-lived CLI with a hard deadline. The child is killed on
/// timeout; stdout is collected only after a clean exit.
fn run_cli(program: &str, args: &[&str], timeout: Duration) -> Result<CliOutput> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to launch '{}'", program))?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let mut stdout = String::new();
                if let Some(mut pipe) = child.stdout.take() {
                    let _ = pipe.read_to_string(&mut stdout);
                }
                return Ok(CliOutput {
                    success: status.success(),
                    stdout,
                });
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(anyhow!(
                        "'{}' did not exit within {:?}",
                        program,
                        timeout
                    ));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow!("failed to wait for '{}': {}", program, e));
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ranges_are_local() {
        assert!(is_local_network("192.168.1.5"));
        assert!(is_local_network("10.0.0.7"));
        assert!(is_local_network("172.16.4.1"));
        assert!(is_local_network("127.0.0.1"));
        assert!(is_local_network("169.254.10.10"));
        assert!(is_local_network("::1"));
    }

    #[test]
    fn public_ranges_are_not_local() {
        assert!(!is_local_network("203.0.113.9"));
        assert!(!is_local_network("8.8.8.8"));
        assert!(!is_local_network("2001:4860:4860::8888"));
    }

    #[test]
    fn garbage_input_is_not_local() {
        assert!(!is_local_network(""));
        assert!(!is_local_network("not a host"));
        assert!(!is_local_network("999.999.999.999"));
    }

    #[test]
    fn missing_mesh_binary_degrades_to_false() {
        assert!(!has_mesh_agent("definitely-not-a-real-mesh-cli"));
    }

    #[test]
    fn mesh_self_address_propagates_launch_failure() {
        assert!(mesh_self_address("definitely-not-a-real-mesh-cli").is_err());
    }

    #[test]
    #[cfg(unix)]
    fn run_cli_kills_on_deadline() {
        let started = Instant::now();
        let result = run_cli("sleep", &["30"], Duration::from_millis(200));
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
