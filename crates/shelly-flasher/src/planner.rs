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

//! Flash planning: which image a device would receive, and whether it exists

use crate::config::FlasherConfig;
use crate::device::{DeviceRecord, Firmware, LATEST_LABEL};
use crate::error::{FlasherError, Result};
use crate::release::ReleaseFeeds;
use crate::version::{parse_version, stock_version};
use reqwest::{Client, StatusCode};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Firmware a device can be converted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    #[default]
    Tasmota,
    /// Home Accessory Architect
    Haa,
    Espurna,
}

impl Target {
    pub const ALL: [Self; 3] = [Self::Tasmota, Self::Haa, Self::Espurna];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tasmota => "tasmota",
            Self::Haa => "haa",
            Self::Espurna => "espurna",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = FlasherError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| FlasherError::Usage(format!("unknown target firmware: {s}")))
    }
}

/// Label shown for a model without an image for the chosen target
pub fn unsupported_label(model: &str) -> String {
    format!("{model} not supported")
}

#[derive(Debug, Clone)]
pub struct FlashPlanner {
    client: Client,
    download_base_url: String,
    target: Target,
}

impl FlashPlanner {
    pub fn new(config: &FlasherConfig, target: Target) -> Result<Self> {
        let client = Client::builder()
            .timeout(AVAILABILITY_TIMEOUT)
            .build()
            .map_err(|e| FlasherError::Http(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            download_base_url: config.download_base_url.trim_end_matches('/').to_owned(),
            target,
        })
    }

    /// Download URL of the conversion image for this device, if its firmware
    /// family has one
    pub fn resolve_target(&self, record: &DeviceRecord) -> Option<String> {
        match record.firmware {
            Firmware::Stock(_) => Some(format!(
                "{}/mg2{}-{}.zip",
                self.download_base_url, self.target, record.model
            )),
            Firmware::Unknown => None,
        }
    }

    /// GET the image, following redirects. The store does not answer HEAD
    /// reliably, so the body is fetched and discarded.
    pub async fn check_availability(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => {
                debug!("{url} answered {}", response.status());
                response.status() == StatusCode::OK
            }
            Err(e) => {
                warn!("Could not check {url}: {e}");
                false
            }
        }
    }

    /// Resolve and check the target image, updating `download_url` and
    /// `flash_label` in place
    pub async fn plan(&self, record: &mut DeviceRecord) {
        let url = match self.resolve_target(record) {
            Some(url) => self.check_availability(&url).await.then_some(url),
            None => None,
        };

        record.flash_label = if url.is_some() {
            LATEST_LABEL.to_owned()
        } else {
            unsupported_label(&record.model)
        };
        debug!("dlurl: {url:?}");
        record.download_url = url;
    }
}

/// Newer stock firmware published for the device's model, if any.
///
/// Informational only; it never influences the flash decision.
pub fn stock_update(record: &DeviceRecord, feeds: &ReleaseFeeds) -> Option<String> {
    let current = record.current_version()?;
    let release = feeds.latest_stock(&record.stock_model)?;
    let latest_str = stock_version(&release.version);

    match parse_version(latest_str) {
        Ok(latest) if latest.compare(current) == Ordering::Greater => Some(latest_str.to_owned()),
        Ok(_) => None,
        Err(e) => {
            debug!("Ignoring stock release for {}: {e}", record.stock_model);
            None
        }
    }
}
