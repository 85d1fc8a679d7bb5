//! Network diagnostics for troubleshooting stream reachability.
//!
//! Enumerates local interfaces and their IPv4 addresses and, when a stream
//! URL is supplied, runs the connectivity verifier against it. The call
//! always returns a structured report: a failing sub-probe fills the
//! `error` field and leaves the rest of the result intact.

use chrono::Utc;
use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use serde::Serialize;

use crate::verify::{verify_target, ConnectivityReport};

/// One local interface and its IPv4 addresses.
#[derive(Clone, Debug, Serialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub addresses: Vec<String>,
}

/// Full diagnostics payload.
#[derive(Clone, Debug, Serialize)]
pub struct DiagnosticsReport {
    pub timestamp: String,
    pub interfaces: Vec<InterfaceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connectivity: Option<ConnectivityReport>,
    pub recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Run the diagnostics suite, optionally probing `url`.
pub fn diagnose(url: Option<&str>) -> DiagnosticsReport {
    let mut report = DiagnosticsReport {
        timestamp: Utc::now().to_rfc3339(),
        interfaces: Vec::new(),
        connectivity: None,
        recommendations: vec![
            "Use TCP transport for better reliability".to_string(),
            "Configure proper firewall rules".to_string(),
            "Consider a VPN for secure connections".to_string(),
            "Use a lower resolution for better streaming".to_string(),
        ],
        error: None,
    };

    match NetworkInterface::show() {
        Ok(interfaces) => {
            for iface in interfaces {
                let mut addresses = Vec::new();
                for addr in &iface.addr {
                    if let network_interface::Addr::V4(v4) = addr {
                        addresses.push(v4.ip.to_string());
                    }
                }
                report.interfaces.push(InterfaceInfo {
                    name: iface.name.clone(),
                    addresses,
                });
            }
        }
        Err(e) => {
            log::warn!("interface enumeration failed: {}", e);
            report.error = Some(format!("interface enumeration failed: {}", e));
        }
    }

    if let Some(url) = url {
        report.connectivity = Some(verify_target(url));
    }

    report
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn report_without_url_skips_connectivity() {
        let report = diagnose(None);
        assert!(report.connectivity.is_none());
        assert!(!report.recommendations.is_empty());
        assert!(!report.timestamp.is_empty());
    }

    #[test]
    fn report_with_url_includes_connectivity_verdict() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("rtsp://127.0.0.1:{}/cam", port);

        let report = diagnose(Some(&url));
        let connectivity = report.connectivity.expect("connectivity result");
        assert!(connectivity.ok);
    }

    #[test]
    fn report_serializes_to_json() {
        let report = diagnose(None);
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("interfaces").is_some());
        assert!(json.get("recommendations").is_some());
    }
}
