// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of shelly-flasher.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Device probing: host name validation, resolution and the `/settings` query

use crate::config::FlasherConfig;
use crate::error::{FlasherError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::{debug, trace};

const LOCAL_SUFFIX: &str = ".local";
const STATUS_PATH: &str = "/settings";

/// A host to probe, as supplied by the operator or announced over mDNS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub host: String,
    pub friendly_host: String,
}

impl Candidate {
    pub fn new(label: impl Into<String>) -> Self {
        let friendly_host = label.into();
        Self {
            host: normalize_host(&friendly_host),
            friendly_host,
        }
    }
}

/// Append `.local` to bare short names.
///
/// Names that already contain a dot and anything that looks like a numeric
/// address are left alone.
pub fn normalize_host(label: &str) -> String {
    let looks_numeric = label.parse::<IpAddr>().is_ok()
        || (label.len() >= 3 && label.chars().take(3).all(|c| c.is_ascii_digit()));
    if label.contains('.') || looks_numeric {
        label.to_owned()
    } else {
        format!("{label}{LOCAL_SUFFIX}")
    }
}

/// RFC 1123 style check: at most 255 bytes, labels of 1-63 alphanumerics or
/// hyphens, no label starting or ending with a hyphen.
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 255 {
        return false;
    }
    let valid = hostname.split('.').all(|label| {
        (1..=63).contains(&label.len())
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    trace!("Valid hostname: {hostname} {valid}");
    valid
}

/// A reachable device and the status document it returned
#[derive(Debug, Clone)]
pub struct ProbedDevice {
    pub candidate: Candidate,
    pub network_address: SocketAddr,
    pub info: Value,
}

#[async_trait]
pub trait Probe: Send + Sync {
    /// Resolve `candidate` and fetch its status document
    async fn probe(&self, candidate: Candidate) -> Result<ProbedDevice>;
}

/// Probe that talks to real devices over HTTP
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    port: u16,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(config: &FlasherConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| FlasherError::Http(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            port: config.device_port,
            timeout: config.probe_timeout(),
        })
    }

    /// Resolve a host name to the address of its web server.
    ///
    /// Syntactically invalid names fail without touching the resolver. Address
    /// literals pass through. IPv4 results are preferred.
    pub async fn resolve_host(&self, host: &str) -> Result<SocketAddr> {
        if host.parse::<IpAddr>().is_err() && !is_valid_hostname(host) {
            return Err(FlasherError::UnresolvableHost(host.to_owned()));
        }

        let addresses: Vec<SocketAddr> = tokio::net::lookup_host((host, self.port))
            .await
            .map_err(|e| {
                debug!("Lookup of {host} failed: {e}");
                FlasherError::UnresolvableHost(host.to_owned())
            })?
            .collect();

        let address = addresses
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addresses.first())
            .copied()
            .ok_or_else(|| FlasherError::UnresolvableHost(host.to_owned()))?;

        trace!("Hostname: {host} is online at {address}");
        Ok(address)
    }

    /// Fetch `/settings` from a device.
    ///
    /// Returns `None` for anything other than a 200 with a JSON body: an
    /// incompatible or absent device is a normal outcome while scanning.
    pub async fn fetch_status(&self, address: SocketAddr) -> Option<Value> {
        let url = format!("http://{address}{STATUS_PATH}");

        let head = self.client.head(&url).timeout(self.timeout).send().await;
        match head {
            Ok(response) if response.status() == StatusCode::OK => {}
            Ok(response) => {
                debug!("{url} answered {}", response.status());
                return None;
            }
            Err(e) => {
                debug!("{url} unreachable: {e}");
                return None;
            }
        }

        let response = match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(response) if response.status() == StatusCode::OK => response,
            Ok(response) => {
                debug!("{url} answered {}", response.status());
                return None;
            }
            Err(e) => {
                debug!("{url} unreachable: {e}");
                return None;
            }
        };

        match response.json::<Value>().await {
            Ok(info) => {
                trace!("Device info from {url}: {info}");
                Some(info)
            }
            Err(e) => {
                debug!("{url} returned invalid JSON: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, candidate: Candidate) -> Result<ProbedDevice> {
        let network_address = self.resolve_host(&candidate.host).await?;
        let info = self
            .fetch_status(network_address)
            .await
            .ok_or_else(|| FlasherError::DeviceUnreachable(candidate.host.clone()))?;

        Ok(ProbedDevice {
            candidate,
            network_address,
            info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tests::settings;
    use mockito::Server;

    fn probe_for_port(port: u16) -> HttpProbe {
        HttpProbe::new(&FlasherConfig {
            device_port: port,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_valid_hostnames() {
        assert!(is_valid_hostname("shellyplug-s-A1B2"));
        assert!(is_valid_hostname("shellyplug-s-A1B2.local"));
        assert!(is_valid_hostname("192.168.1.20"));
        assert!(is_valid_hostname(&"a".repeat(63)));
    }

    #[test]
    fn test_invalid_hostnames() {
        assert!(!is_valid_hostname(&"a".repeat(64)));
        assert!(!is_valid_hostname("-shelly"));
        assert!(!is_valid_hostname("shelly-"));
        assert!(!is_valid_hostname("shelly.-local"));
        assert!(!is_valid_hostname("my printer"));
        assert!(!is_valid_hostname("shelly..local"));
        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname(&["abc"; 65].join(".")));
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("shelly1-ABC"), "shelly1-ABC.local");
        assert_eq!(normalize_host("shelly1-ABC.local"), "shelly1-ABC.local");
        assert_eq!(normalize_host("plug.example.com"), "plug.example.com");
        assert_eq!(normalize_host("192.168.1.20"), "192.168.1.20");
        assert_eq!(normalize_host("::1"), "::1");
    }

    #[test]
    fn test_candidate_keeps_friendly_label() {
        let candidate = Candidate::new("shelly1-ABC");
        assert_eq!(candidate.host, "shelly1-ABC.local");
        assert_eq!(candidate.friendly_host, "shelly1-ABC");
    }

    #[tokio::test]
    async fn test_resolve_invalid_hostname_short_circuits() {
        let probe = probe_for_port(80);
        let result = probe.resolve_host("-bad-.local").await;
        assert!(matches!(result, Err(FlasherError::UnresolvableHost(_))));
    }

    #[tokio::test]
    async fn test_resolve_literal_address() {
        let probe = probe_for_port(8080);
        let address = probe.resolve_host("127.0.0.1").await.unwrap();
        assert_eq!(address, "127.0.0.1:8080".parse().unwrap());
    }

    #[tokio::test]
    async fn test_fetch_status_success() {
        let mut server = Server::new_async().await;
        let body = settings("20201124-092159/v1.9.0@57ac4ad8", "SHSW-1");
        let head = server
            .mock("HEAD", "/settings")
            .with_status(200)
            .create_async()
            .await;
        let get = server
            .mock("GET", "/settings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let probe = probe_for_port(server.socket_address().port());
        let info = probe.fetch_status(server.socket_address()).await.unwrap();

        assert_eq!(info, body);
        head.assert_async().await;
        get.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_status_non_200_is_soft_failure() {
        let mut server = Server::new_async().await;
        let head = server
            .mock("HEAD", "/settings")
            .with_status(404)
            .create_async()
            .await;
        let get = server
            .mock("GET", "/settings")
            .expect(0)
            .create_async()
            .await;

        let probe = probe_for_port(server.socket_address().port());
        assert!(probe.fetch_status(server.socket_address()).await.is_none());

        head.assert_async().await;
        get.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_status_invalid_json() {
        let mut server = Server::new_async().await;
        server
            .mock("HEAD", "/settings")
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("GET", "/settings")
            .with_status(200)
            .with_body("<html>not a shelly</html>")
            .create_async()
            .await;

        let probe = probe_for_port(server.socket_address().port());
        assert!(probe.fetch_status(server.socket_address()).await.is_none());
    }

    #[tokio::test]
    async fn test_probe_unreachable_device() {
        let mut server = Server::new_async().await;
        server
            .mock("HEAD", "/settings")
            .with_status(500)
            .create_async()
            .await;

        let probe = probe_for_port(server.socket_address().port());
        let result = probe.probe(Candidate::new("127.0.0.1")).await;
        assert!(matches!(result, Err(FlasherError::DeviceUnreachable(_))));
    }

    #[tokio::test]
    async fn test_probe_success() {
        let mut server = Server::new_async().await;
        let body = settings("20201124-092159/v1.9.0@57ac4ad8", "SHSW-1");
        server
            .mock("HEAD", "/settings")
            .with_status(200)
            .create_async()
            .await;
        server
            .mock("GET", "/settings")
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;

        let probe = probe_for_port(server.socket_address().port());
        let probed = probe.probe(Candidate::new("127.0.0.1")).await.unwrap();
        assert_eq!(probed.network_address, server.socket_address());
        assert_eq!(probed.info, body);
    }
}
