//! Transport-layer connectivity verification.
//!
//! Before any subprocess or capture resource is allocated, the bridge opens
//! a raw TCP connection to the resolved host:port. This is advisory, not
//! authoritative: a successful connect does not guarantee the RTSP handshake
//! will succeed, but it is cheap and catches most network misconfiguration
//! up front.

use serde::Serialize;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use url::Url;

use crate::resolve::DEFAULT_RTSP_PORT;

/// Fixed cap on the TCP connect attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Verdict of a connectivity probe, with actionable suggestions on failure.
#[derive(Clone, Debug, Serialize)]
pub struct ConnectivityReport {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl ConnectivityReport {
    fn passed() -> Self {
        Self {
            ok: true,
            error: None,
            suggestions: Vec::new(),
        }
    }

    fn failed(error: String, suggestions: &[&str]) -> Self {
        Self {
            ok: false,
            error: Some(error),
            suggestions: suggestions.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Extract host and port (default 554) from a stream URL.
pub(crate) fn host_port(url: &str) -> Result<(String, u16), String> {
    let parsed = Url::parse(url).map_err(|e| format!("invalid stream URL '{}': {}", url, e))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| format!("invalid stream URL '{}': no host", url))?
        .to_string();
    Ok((host, parsed.port().unwrap_or(DEFAULT_RTSP_PORT)))
}

/// Probe `url` with a bounded raw TCP connect.
pub fn verify_target(url: &str) -> ConnectivityReport {
    let (host, port) = match host_port(url) {
        Ok(pair) => pair,
        Err(error) => {
            return ConnectivityReport::failed(error, &["Check the stream URL format"]);
        }
    };

    let addrs = match (host.as_str(), port).to_socket_addrs() {
        Ok(addrs) => addrs.collect::<Vec<_>>(),
        Err(_) => {
            return ConnectivityReport::failed(
                format!("Cannot resolve host {}", host),
                &[
                    "Check network connectivity",
                    "Verify the stream URL format",
                    "Try using an IP address instead of a hostname",
                ],
            );
        }
    };

    for addr in &addrs {
        if TcpStream::connect_timeout(addr, CONNECT_TIMEOUT).is_ok() {
            log::debug!("connectivity check passed for {}:{}", host, port);
            return ConnectivityReport::passed();
        }
    }

    ConnectivityReport::failed(
        format!("Cannot connect to {}:{}", host, port),
        &[
            "Check if the server is running",
            "Verify firewall settings",
            "Try a different connection method",
        ],
    )
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn invalid_url_fails_with_format_suggestion() {
        let report = verify_target("not a url at all");
        assert!(!report.ok);
        assert!(report.error.unwrap().contains("invalid stream URL"));
        assert_eq!(report.suggestions, vec!["Check the stream URL format"]);
    }

    #[test]
    fn reachable_listener_passes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let report = verify_target(&format!("rtsp://127.0.0.1:{}/cam", port));
        assert!(report.ok);
        assert!(report.error.is_none());
    }

    #[test]
    fn closed_port_fails_with_host_port_in_error() {
        // Bind then drop to find a port that is very likely closed.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let report = verify_target(&format!("rtsp://127.0.0.1:{}/cam", port));
        assert!(!report.ok);
        assert_eq!(
            report.error.unwrap(),
            format!("Cannot connect to 127.0.0.1:{}", port)
        );
        assert!(report
            .suggestions
            .contains(&"Try a different connection method".to_string()));
    }

    #[test]
    fn default_port_is_554() {
        let (host, port) = host_port("rtsp://camera.example.net/stream").unwrap();
        assert_eq!(host, "camera.example.net");
        assert_eq!(port, DEFAULT_RTSP_PORT);
    }
}
