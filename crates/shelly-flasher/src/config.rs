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

//! Configuration module for the flasher
//!
//! Every value has a default, so the tool runs without a config file. A JSON file
//! passed with `--config` overrides individual fields. The file is only read,
//! never written: the flasher keeps no state between runs.

use crate::error::{FlasherError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_stock_feed_url() -> String {
    "https://api.shelly.cloud/files/firmware".to_owned()
}

fn default_intermediate_feed_url() -> String {
    "https://rojer.me/files/shelly/update.json".to_owned()
}

fn default_download_base_url() -> String {
    "http://dl.dasker.eu/firmware".to_owned()
}

fn default_80() -> u16 {
    80
}

fn default_3() -> u64 {
    3
}

fn default_8() -> usize {
    8
}

fn default_service_type() -> String {
    "_http._tcp.local.".to_owned()
}

fn default_2() -> u64 {
    2
}

fn default_10() -> u32 {
    10
}

fn default_3_polls() -> u32 {
    3
}

fn default_100() -> u64 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlasherConfig {
    /// Shelly cloud feed listing the newest stock firmware per model
    #[serde(default = "default_stock_feed_url")]
    pub stock_feed_url: String,

    /// Feed describing the intermediate conversion builds
    #[serde(default = "default_intermediate_feed_url")]
    pub intermediate_feed_url: String,

    /// Where the `mg2<target>-<model>.zip` images live
    #[serde(default = "default_download_base_url")]
    pub download_base_url: String,

    /// HTTP port of the device web server
    #[serde(default = "default_80")]
    pub device_port: u16,

    /// Timeout for the status probe against a device (seconds)
    #[serde(default = "default_3")]
    pub probe_timeout_secs: u64,

    /// Upper bound for concurrent device probes
    #[serde(default = "default_8")]
    pub max_parallel_probes: usize,

    /// mDNS service type browsed in scan mode
    #[serde(default = "default_service_type")]
    pub service_type: String,

    /// Seconds between two checks of the discovered set
    #[serde(default = "default_2")]
    pub scan_poll_interval_secs: u64,

    /// Maximum number of checks before the scan stops
    #[serde(default = "default_10")]
    pub scan_max_polls: u32,

    /// Consecutive checks without a new device after which the scan stops
    #[serde(default = "default_3_polls")]
    pub scan_settle_polls: u32,

    /// Hard limit on the mDNS listener (seconds)
    #[serde(default = "default_100")]
    pub scan_listener_timeout_secs: u64,
}

impl Default for FlasherConfig {
    fn default() -> Self {
        Self {
            stock_feed_url: default_stock_feed_url(),
            intermediate_feed_url: default_intermediate_feed_url(),
            download_base_url: default_download_base_url(),
            device_port: 80,
            probe_timeout_secs: 3,
            max_parallel_probes: 8,
            service_type: default_service_type(),
            scan_poll_interval_secs: 2,
            scan_max_polls: 10,
            scan_settle_polls: 3,
            scan_listener_timeout_secs: 100,
        }
    }
}

impl FlasherConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn scan_poll_interval(&self) -> Duration {
        Duration::from_secs(self.scan_poll_interval_secs)
    }

    pub fn scan_listener_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_listener_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.max_parallel_probes == 0 {
            return Err(FlasherError::Config(
                "max_parallel_probes must be at least 1".to_owned(),
            ));
        }
        if self.scan_poll_interval_secs == 0 {
            return Err(FlasherError::Config(
                "scan_poll_interval_secs must be at least 1".to_owned(),
            ));
        }
        if self.scan_settle_polls == 0 {
            return Err(FlasherError::Config(
                "scan_settle_polls must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Load the configuration from `path`, or the defaults when no path is given
pub fn load_config(path: Option<&Path>) -> Result<FlasherConfig> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content).map_err(|e| {
                FlasherError::Config(format!("Failed to parse {}: {e}", path.display()))
            })?
        }
        None => FlasherConfig::default(),
    };
    config.validate()?;
    Ok(config)
}
