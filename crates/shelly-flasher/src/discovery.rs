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

//! Device discovery
//!
//! Produces the sorted set of classified devices, either from an explicit host
//! list or from mDNS announcements on the local network.

use crate::config::FlasherConfig;
use crate::device::{DeviceRecord, classify};
use crate::error::{FlasherError, Result};
use crate::probe::{Candidate, Probe};
use crate::report::Palette;
use crate::shutdown::Shutdown;
use futures_util::stream::{self, FuturesUnordered, StreamExt};
use mdns_sd::{ServiceDaemon, ServiceEvent};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

const ANNOUNCEMENT_QUEUE: usize = 64;

/// Devices found by one discovery pass, sorted by `host`
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub devices: Vec<DeviceRecord>,
    /// Candidates that could not be resolved, reached or classified
    pub dropped: usize,
}

/// When a scan is allowed to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlePolicy {
    pub max_polls: u32,
    pub settle_polls: u32,
}

impl SettlePolicy {
    pub fn from_config(config: &FlasherConfig) -> Self {
        Self {
            max_polls: config.scan_max_polls,
            settle_polls: config.scan_settle_polls,
        }
    }
}

/// Counts polls of the discovered set and decides when it has settled
#[derive(Debug, Clone)]
pub struct SettleTracker {
    policy: SettlePolicy,
    polls: u32,
    unchanged: u32,
    last_len: usize,
}

impl SettleTracker {
    pub fn new(policy: SettlePolicy) -> Self {
        Self {
            policy,
            polls: 0,
            unchanged: 0,
            last_len: 0,
        }
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Record one poll of the set size. Returns true when the scan should stop:
    /// the size did not change for `settle_polls` consecutive polls, or the
    /// poll budget is spent.
    pub fn observe(&mut self, len: usize) -> bool {
        self.polls += 1;
        if len == self.last_len {
            self.unchanged += 1;
        } else {
            self.unchanged = 0;
            self.last_len = len;
        }
        trace!(
            "Poll {}: {len} devices, unchanged for {} polls",
            self.polls, self.unchanged
        );
        self.unchanged >= self.policy.settle_polls || self.polls >= self.policy.max_polls
    }
}

#[derive(Debug)]
pub struct DiscoveryEngine<P> {
    probe: P,
    parallel: usize,
    policy: SettlePolicy,
    poll_interval: Duration,
    listener_timeout: Duration,
    palette: Palette,
    shutdown: Shutdown,
}

impl<P: Probe> DiscoveryEngine<P> {
    pub fn new(probe: P, config: &FlasherConfig, palette: Palette, shutdown: Shutdown) -> Self {
        Self {
            probe,
            parallel: config.max_parallel_probes,
            policy: SettlePolicy::from_config(config),
            poll_interval: config.scan_poll_interval(),
            listener_timeout: config.scan_listener_timeout(),
            palette,
            shutdown,
        }
    }

    async fn inspect(&self, candidate: Candidate) -> (String, Result<DeviceRecord>) {
        let label = candidate.friendly_host.clone();
        let result = self.probe.probe(candidate).await.and_then(classify);
        (label, result)
    }

    /// Probe and classify each host. Failures are reported and dropped.
    pub async fn probe_hosts(&self, hosts: &[String]) -> DiscoveryReport {
        info!("{}", self.palette.bold("Probing Shelly device for info...\n"));

        let mut seen = HashSet::new();
        let candidates: Vec<Candidate> = hosts
            .iter()
            .map(Candidate::new)
            .filter(|c| seen.insert(c.host.clone()))
            .collect();
        let parallel = self.parallel.min(candidates.len()).max(1);

        let results: Vec<(String, Result<DeviceRecord>)> = stream::iter(candidates)
            .take_while(|_| std::future::ready(!self.shutdown.is_triggered()))
            .map(|candidate| self.inspect(candidate))
            .buffer_unordered(parallel)
            .collect()
            .await;

        let mut report = DiscoveryReport::default();
        for (label, result) in results {
            match result {
                Ok(device) => report.devices.push(device),
                Err(e) => {
                    warn!("{}", self.palette.error(&drop_message(&label, &e)));
                    report.dropped += 1;
                }
            }
        }
        report.devices.sort_by(|a, b| a.host.cmp(&b.host));
        report
    }

    /// Browse the network for the configured service type and probe every
    /// announced instance
    pub async fn scan_network(&self, service_type: &str) -> Result<DiscoveryReport> {
        info!("{}", self.palette.bold("Scanning for Shelly devices..."));
        let (browser, announcements) = MdnsBrowser::start(service_type)?;
        let report = self.scan(announcements).await;
        browser.stop();
        info!(
            "{}",
            self.palette
                .success(&format!("{} Devices found.\n", report.devices.len()))
        );
        Ok(report)
    }

    /// Consume announced instance names until the discovered set settles, the
    /// poll budget or listener timeout is spent, or the operator interrupts.
    pub async fn scan(&self, mut announcements: mpsc::Receiver<String>) -> DiscoveryReport {
        let mut shutdown = self.shutdown.clone();
        let mut tracker = SettleTracker::new(self.policy);
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep(self.listener_timeout);
        tokio::pin!(deadline);

        let mut queued = HashSet::new();
        let mut pending = VecDeque::new();
        let mut in_flight = FuturesUnordered::new();
        let mut found = BTreeMap::new();
        let mut dropped = 0;
        let mut listening = true;

        loop {
            while in_flight.len() < self.parallel
                && !shutdown.is_triggered()
                && let Some(candidate) = pending.pop_front()
            {
                in_flight.push(self.inspect(candidate));
            }

            tokio::select! {
                announcement = announcements.recv(), if listening => match announcement {
                    Some(name) => {
                        let candidate = Candidate::new(name);
                        if queued.insert(candidate.host.clone()) {
                            trace!("Announced: {}", candidate.friendly_host);
                            pending.push_back(candidate);
                        }
                    }
                    None => listening = false,
                },
                Some((label, result)) = in_flight.next(), if !in_flight.is_empty() => match result {
                    Ok(device) => {
                        debug!("Found {} ({})", device.friendly_host, device.model);
                        found.insert(device.host.clone(), device);
                    }
                    Err(e) => {
                        debug!("{}", drop_message(&label, &e));
                        dropped += 1;
                    }
                },
                _ = ticker.tick() => {
                    if tracker.observe(found.len()) {
                        debug!("Scan settled after {} polls", tracker.polls());
                        break;
                    }
                }
                () = &mut deadline => {
                    warn!("mDNS listener timeout reached");
                    break;
                }
                () = shutdown.triggered() => {
                    info!("Scan interrupted");
                    break;
                }
            }
        }

        DiscoveryReport {
            devices: found.into_values().collect(),
            dropped,
        }
    }
}

fn drop_message(label: &str, error: &FlasherError) -> String {
    match error {
        FlasherError::UnresolvableHost(_) => format!("Could not resolve host: {label}"),
        FlasherError::DeviceUnreachable(_) => format!("Could not get info from device: {label}"),
        FlasherError::Usage(_)
        | FlasherError::Config(_)
        | FlasherError::Io(_)
        | FlasherError::Json(_)
        | FlasherError::FeedUnavailable { .. }
        | FlasherError::DeviceIncompatible { .. }
        | FlasherError::MalformedVersion(_)
        | FlasherError::Http(_)
        | FlasherError::Discovery(_) => {
            format!("Failed to lookup local information of {label}: {error}")
        }
    }
}

/// Strip the service type from an mDNS instance name:
/// `shelly1-ABC._http._tcp.local.` becomes `shelly1-ABC`
pub fn instance_label(fullname: &str, service_type: &str) -> String {
    fullname
        .strip_suffix(service_type)
        .map_or(fullname, |name| name.trim_end_matches('.'))
        .to_owned()
}

/// mDNS service browser feeding announced instance names into a channel
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    service_type: String,
}

impl std::fmt::Debug for MdnsBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MdnsBrowser")
            .field("service_type", &self.service_type)
            .finish_non_exhaustive()
    }
}

impl MdnsBrowser {
    pub fn start(service_type: &str) -> Result<(Self, mpsc::Receiver<String>)> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| FlasherError::Discovery(format!("Failed to start mDNS daemon: {e}")))?;
        let events = daemon
            .browse(service_type)
            .map_err(|e| FlasherError::Discovery(format!("Failed to browse {service_type}: {e}")))?;

        let (tx, rx) = mpsc::channel(ANNOUNCEMENT_QUEUE);
        let suffix = service_type.to_owned();
        tokio::spawn(async move {
            while let Ok(event) = events.recv_async().await {
                if let ServiceEvent::ServiceFound(_, fullname) = event
                    && tx.send(instance_label(&fullname, &suffix)).await.is_err()
                {
                    break;
                }
            }
        });

        Ok((
            Self {
                daemon,
                service_type: service_type.to_owned(),
            },
            rx,
        ))
    }

    pub fn stop(self) {
        if let Err(e) = self.daemon.stop_browse(&self.service_type) {
            debug!("Failed to stop browsing: {e}");
        }
        if let Err(e) = self.daemon.shutdown() {
            debug!("Failed to shut down mDNS daemon: {e}");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::device::tests::settings;
    use crate::probe::ProbedDevice;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::net::SocketAddr;

    /// Probe answering from a fixed table of hosts
    #[derive(Debug, Default)]
    pub(crate) struct FakeProbe {
        devices: HashMap<String, (SocketAddr, Value)>,
    }

    impl FakeProbe {
        pub(crate) fn with_device(mut self, label: &str, address: SocketAddr, info: Value) -> Self {
            self.devices
                .insert(Candidate::new(label).host, (address, info));
            self
        }

        pub(crate) fn with_shelly(self, label: &str, octet: u8) -> Self {
            let address = SocketAddr::from(([10, 0, 0, octet], 80));
            self.with_device(
                label,
                address,
                settings("20201124-092159/v1.9.0@57ac4ad8", "SHSW-1"),
            )
        }
    }

    #[async_trait]
    impl Probe for FakeProbe {
        async fn probe(&self, candidate: Candidate) -> Result<ProbedDevice> {
            let (network_address, info) = self
                .devices
                .get(&candidate.host)
                .cloned()
                .ok_or_else(|| FlasherError::DeviceUnreachable(candidate.host.clone()))?;
            Ok(ProbedDevice {
                candidate,
                network_address,
                info,
            })
        }
    }

    fn engine(probe: FakeProbe, config: &FlasherConfig) -> DiscoveryEngine<FakeProbe> {
        DiscoveryEngine::new(probe, config, Palette::PLAIN, Shutdown::never())
    }

    fn policy(max_polls: u32, settle_polls: u32) -> SettlePolicy {
        SettlePolicy {
            max_polls,
            settle_polls,
        }
    }

    #[test]
    fn test_settle_tracker_stops_after_quiet_polls() {
        let mut tracker = SettleTracker::new(policy(10, 3));
        assert!(!tracker.observe(1));
        assert!(!tracker.observe(2));
        assert!(!tracker.observe(2));
        assert!(!tracker.observe(2));
        assert!(tracker.observe(2));
        assert_eq!(tracker.polls(), 5);
    }

    #[test]
    fn test_settle_tracker_resets_on_growth() {
        let mut tracker = SettleTracker::new(policy(10, 3));
        assert!(!tracker.observe(0));
        assert!(!tracker.observe(0));
        assert!(!tracker.observe(1));
        assert!(!tracker.observe(1));
        assert!(!tracker.observe(1));
        assert!(tracker.observe(1));
    }

    #[test]
    fn test_settle_tracker_poll_budget() {
        let mut tracker = SettleTracker::new(policy(4, 3));
        assert!(!tracker.observe(1));
        assert!(!tracker.observe(2));
        assert!(!tracker.observe(3));
        assert!(tracker.observe(4));
    }

    #[test]
    fn test_settle_tracker_empty_network() {
        let mut tracker = SettleTracker::new(policy(10, 3));
        assert!(!tracker.observe(0));
        assert!(!tracker.observe(0));
        assert!(tracker.observe(0));
    }

    #[test]
    fn test_settle_tracker_stop_bound() {
        for growth_polls in 0..12_u32 {
            let mut tracker = SettleTracker::new(policy(10, 3));
            let mut stopped_at = None;
            for poll in 1..=20_u32 {
                let len = poll.min(growth_polls) as usize;
                if tracker.observe(len) {
                    stopped_at = Some(poll);
                    break;
                }
            }
            let expected = (growth_polls + 3).min(10);
            assert_eq!(stopped_at, Some(expected), "growth for {growth_polls} polls");
        }
    }

    #[test]
    fn test_instance_label() {
        assert_eq!(
            instance_label("shellyplug-s-A1B2._http._tcp.local.", "_http._tcp.local."),
            "shellyplug-s-A1B2"
        );
        assert_eq!(instance_label("printer", "_http._tcp.local."), "printer");
    }

    #[tokio::test]
    async fn test_probe_hosts_sorted_and_filtered() {
        let probe = FakeProbe::default()
            .with_shelly("shelly1-CCC", 3)
            .with_shelly("shelly1-AAA", 1)
            .with_shelly("shelly1-BBB", 2);
        let engine = engine(probe, &FlasherConfig::default());

        let hosts: Vec<String> = ["shelly1-CCC", "offline-host", "shelly1-AAA", "shelly1-BBB", "shelly1-AAA"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let report = engine.probe_hosts(&hosts).await;

        let found: Vec<&str> = report.devices.iter().map(|d| d.host.as_str()).collect();
        assert_eq!(
            found,
            ["shelly1-AAA.local", "shelly1-BBB.local", "shelly1-CCC.local"]
        );
        assert_eq!(report.dropped, 1);
    }

    #[tokio::test]
    async fn test_probe_hosts_drops_unclassifiable() {
        let probe = FakeProbe::default()
            .with_shelly("shelly1-AAA", 1)
            .with_device(
                "printer",
                SocketAddr::from(([10, 0, 0, 9], 80)),
                serde_json::json!({"name": "printer"}),
            );
        let engine = engine(probe, &FlasherConfig::default());

        let report = engine
            .probe_hosts(&["printer".to_owned(), "shelly1-AAA".to_owned()])
            .await;

        assert_eq!(report.devices.len(), 1);
        assert_eq!(report.devices[0].friendly_host, "shelly1-AAA");
        assert_eq!(report.dropped, 1);
    }

    #[tokio::test]
    async fn test_probe_hosts_stops_when_interrupted() {
        let (trigger, shutdown) = Shutdown::channel();
        trigger.trigger();
        let probe = FakeProbe::default().with_shelly("shelly1-AAA", 1);
        let engine = DiscoveryEngine::new(probe, &FlasherConfig::default(), Palette::PLAIN, shutdown);

        let report = engine.probe_hosts(&["shelly1-AAA".to_owned()]).await;
        assert!(report.devices.is_empty());
    }

    /// Announce one new device every `every` starting at `first`, then keep
    /// the channel open without further announcements
    fn announce(names: Vec<String>, first: Duration, every: Duration) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            tokio::time::sleep(first).await;
            for name in names {
                if tx.send(name).await.is_err() {
                    return;
                }
                tokio::time::sleep(every).await;
            }
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(tx);
        });
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_stops_once_settled() {
        let probe = FakeProbe::default()
            .with_shelly("shelly1-AAA", 1)
            .with_shelly("shelly1-BBB", 2)
            .with_shelly("shelly1-CCC", 3);
        let engine = engine(probe, &FlasherConfig::default());
        let names = ["shelly1-CCC", "shelly1-AAA", "shelly1-BBB", "printer"]
            .iter()
            .map(ToString::to_string)
            .collect();

        let start = Instant::now();
        let report = engine
            .scan(announce(names, Duration::from_secs(1), Duration::from_secs(2)))
            .await;
        let elapsed = start.elapsed();

        // Growth until the poll at 6s, then three quiet polls.
        assert!(elapsed >= Duration::from_secs(12), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(14), "{elapsed:?}");
        let found: Vec<&str> = report.devices.iter().map(|d| d.host.as_str()).collect();
        assert_eq!(
            found,
            ["shelly1-AAA.local", "shelly1-BBB.local", "shelly1-CCC.local"]
        );
        assert_eq!(report.dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_respects_poll_budget() {
        let mut probe = FakeProbe::default();
        let mut names = Vec::new();
        for i in 0..40_u8 {
            let name = format!("shelly1-{i:03}");
            probe = probe.with_shelly(&name, i);
            names.push(name);
        }
        let engine = engine(probe, &FlasherConfig::default());

        let start = Instant::now();
        let report = engine
            .scan(announce(names, Duration::from_millis(500), Duration::from_secs(1)))
            .await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_secs(20), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(21), "{elapsed:?}");
        assert_eq!(report.devices.len(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_never_exceeds_listener_timeout() {
        let mut probe = FakeProbe::default();
        let mut names = Vec::new();
        for i in 0..40_u8 {
            let name = format!("shelly1-{i:03}");
            probe = probe.with_shelly(&name, i);
            names.push(name);
        }
        let config = FlasherConfig {
            scan_listener_timeout_secs: 7,
            ..Default::default()
        };
        let engine = engine(probe, &config);

        let start = Instant::now();
        engine
            .scan(announce(names, Duration::from_millis(500), Duration::from_secs(1)))
            .await;

        assert!(start.elapsed() <= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_deduplicates_announcements() {
        let probe = FakeProbe::default().with_shelly("shelly1-AAA", 1);
        let engine = engine(probe, &FlasherConfig::default());
        let names = vec!["shelly1-AAA".to_owned(); 5];

        let report = engine
            .scan(announce(names, Duration::from_millis(100), Duration::from_millis(100)))
            .await;

        assert_eq!(report.devices.len(), 1);
        assert_eq!(report.dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_stops_on_interrupt() {
        let (trigger, shutdown) = Shutdown::channel();
        let probe = FakeProbe::default().with_shelly("shelly1-AAA", 1);
        let engine = DiscoveryEngine::new(probe, &FlasherConfig::default(), Palette::PLAIN, shutdown);
        let (_tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.trigger();
        });

        let start = Instant::now();
        let report = engine.scan(rx).await;
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(report.devices.is_empty());
    }
}
