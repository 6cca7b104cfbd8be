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

//! Release metadata feeds
//!
//! Both feeds are required inputs: a run does not start without them.

use crate::config::FlasherConfig;
use crate::error::{FlasherError, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{trace, warn};

const USER_AGENT: &str = concat!("shelly-flasher/", env!("CARGO_PKG_VERSION"));
const FEED_TIMEOUT: Duration = Duration::from_secs(10);

/// Newest stock firmware published for one model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRelease {
    #[serde(default)]
    pub url: Option<String>,
    /// Build string, same format the devices report in `fw`
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub beta_url: Option<String>,
    #[serde(default)]
    pub beta_ver: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StockFeedDocument {
    #[serde(default)]
    isok: bool,
    #[serde(default)]
    data: BTreeMap<String, StockRelease>,
}

/// Contents of both release feeds
#[derive(Debug, Clone, Default)]
pub struct ReleaseFeeds {
    /// Stock releases keyed by model code (`SHSW-1`, `SHPLG-S`, ...)
    pub stock: BTreeMap<String, StockRelease>,
    /// Intermediate firmware metadata, kept verbatim
    pub intermediate: Value,
}

impl ReleaseFeeds {
    /// Fetch both feeds. Any network or parse failure is fatal to the run.
    pub async fn fetch(config: &FlasherConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FEED_TIMEOUT)
            .build()
            .map_err(|e| FlasherError::Http(format!("Failed to build HTTP client: {e}")))?;

        let stock: StockFeedDocument = fetch_json(&client, &config.stock_feed_url).await?;
        if !stock.isok {
            warn!("Stock release feed did not report success");
        }
        let intermediate: Value = fetch_json(&client, &config.intermediate_feed_url).await?;

        trace!("stock_release_info: {:?}", stock.data);
        trace!("intermediate_release_info: {intermediate}");

        Ok(Self {
            stock: stock.data,
            intermediate,
        })
    }

    pub fn latest_stock(&self, stock_model: &str) -> Option<&StockRelease> {
        self.stock.get(stock_model)
    }
}

async fn fetch_json<T: DeserializeOwned>(client: &Client, url: &str) -> Result<T> {
    let unavailable = |reason: String| FlasherError::FeedUnavailable {
        url: url.to_owned(),
        reason,
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| unavailable(format!("Request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(unavailable(format!("HTTP {}", response.status())));
    }

    response
        .json()
        .await
        .map_err(|e| unavailable(format!("Failed to parse response: {e}")))
}
