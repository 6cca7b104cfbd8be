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

//! Per-device flash decisions and OTA execution
//!
//! Devices are handled one at a time, in the order given. Each ends in exactly
//! one [`FlashOutcome`].

use crate::device::DeviceRecord;
use crate::error::{FlasherError, Result};
use crate::planner::{Target, stock_update};
use crate::release::ReleaseFeeds;
use crate::report::{FlashOutcome, Palette, RunSummary, report_outcome};
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashSet;
use std::io::Write;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

const OTA_TIMEOUT: Duration = Duration::from_secs(30);

/// Yes/no decision point before a device is flashed
#[async_trait]
pub trait Confirm: Send + Sync {
    /// True only when the operator answered exactly `y`
    async fn confirm(&self, question: &str) -> bool;
}

/// Prompts on stdout and reads one line from stdin
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinConfirm;

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&self, question: &str) -> bool {
        let prompt = format!("{question} (y/n) ? ");
        let (tx, rx) = oneshot::channel();
        // Detached so a pending read does not hold up runtime shutdown.
        std::thread::spawn(move || {
            let _ = tx.send(read_answer(&prompt));
        });

        match rx.await {
            Ok(Ok(line)) => is_yes(&line),
            Ok(Err(e)) => {
                warn!("Could not read answer: {e}");
                false
            }
            Err(e) => {
                warn!("Prompt thread exited: {e}");
                false
            }
        }
    }
}

fn read_answer(prompt: &str) -> std::io::Result<String> {
    let mut stdout = std::io::stdout();
    stdout.write_all(prompt.as_bytes())?;
    stdout.flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line)
}

/// Exactly `y`, ignoring the line terminator
fn is_yes(line: &str) -> bool {
    line.trim_end_matches(['\r', '\n']) == "y"
}

/// The devices cannot fetch over TLS, so an `https://` image URL is handed
/// over as `http://`
fn plain_http(url: &str) -> String {
    url.strip_prefix("https://")
        .map_or_else(|| url.to_owned(), |rest| format!("http://{rest}"))
}

/// How the operator asked the batch to run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunFlags {
    /// `--assume-no`: report what would happen, never contact a device
    pub dry_run: bool,
    /// `--assume-yes`: flash without prompting
    pub silent_run: bool,
}

#[derive(Debug)]
pub struct FlashOrchestrator {
    client: Client,
    target: Target,
    flags: RunFlags,
    exclude: HashSet<String>,
    palette: Palette,
    shutdown: Shutdown,
}

impl FlashOrchestrator {
    pub fn new(
        target: Target,
        flags: RunFlags,
        exclude: impl IntoIterator<Item = String>,
        palette: Palette,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(OTA_TIMEOUT)
            .build()
            .map_err(|e| FlasherError::Http(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            target,
            flags,
            exclude: exclude.into_iter().collect(),
            palette,
            shutdown,
        })
    }

    /// Log the identifying lines shown for every device
    pub fn describe(&self, record: &DeviceRecord, feeds: &ReleaseFeeds) {
        let label = |name: &str| self.palette.bold(name);
        info!("{}http://{}", label("Host: "), record.host);
        info!("{}{}", label("Device ID: "), record.device_id);
        info!("{}{}", label("IP: "), record.network_address.ip());
        info!("{}{}", label("Model: "), record.model);
        if let Some(version) = record.current_version() {
            info!("{}{} ({})", label("Firmware: "), version, record.firmware.label());
        }
        if let Some(latest) = stock_update(record, feeds) {
            info!("{}{latest}", label("Stock update available: "));
        }
        debug!("D_URL: {:?}", record.download_url);
        debug!("colour_mode: {:?}", record.colour_mode);
    }

    /// Decide and, if due, execute the flash for one device
    pub async fn evaluate(&self, record: &DeviceRecord, confirm: &dyn Confirm) -> FlashOutcome {
        if self.exclude.contains(&record.friendly_host) {
            info!("Skipping as device has been excluded...\n");
            return FlashOutcome::Excluded;
        }

        let Some(url) = record.download_url.as_deref() else {
            info!("{}\n", self.palette.error("Device is not supported yet..."));
            return FlashOutcome::Unsupported {
                model: record.model.clone(),
            };
        };

        if self.flags.dry_run {
            info!("Would have been converted to intermediate firmware...");
            return FlashOutcome::WouldFlash {
                url: url.to_owned(),
            };
        }

        if !self.flags.silent_run {
            let question = format!(
                "Do you wish to flash {} to {}",
                record.friendly_host, self.target
            );
            let mut shutdown = self.shutdown.clone();
            let accepted = tokio::select! {
                accepted = confirm.confirm(&question) => accepted,
                () = shutdown.triggered() => false,
            };
            if !accepted {
                info!("Skipping Flash...");
                return FlashOutcome::Declined;
            }
        }

        self.flash(record, url).await
    }

    /// Ask the device to fetch and install the image. The device reboots on its
    /// own; the response is not awaited beyond the HTTP exchange.
    pub async fn flash(&self, record: &DeviceRecord, url: &str) -> FlashOutcome {
        info!("Now Flashing...");
        let image = plain_http(url);
        let ota = format!("http://{}/ota?url={image}", record.address());
        debug!("GET {ota}");

        let response = match self.client.get(&ota).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    "{}",
                    self.palette
                        .error(&format!("Flash request to {} failed: {e}", record.friendly_host))
                );
                return FlashOutcome::FlashFailed {
                    error: e.to_string(),
                };
            }
        };

        let status = response.status();
        match response.text().await {
            Ok(body) => debug!("{body}"),
            Err(e) => debug!("Could not read OTA response: {e}"),
        }
        if !status.is_success() {
            warn!(
                "{}",
                self.palette.error(&format!(
                    "{} rejected the flash request: HTTP {status}",
                    record.friendly_host
                ))
            );
            return FlashOutcome::FlashFailed {
                error: format!("HTTP {status}"),
            };
        }
        info!(
            "please wait for {} to reboot to {}.",
            record.friendly_host, self.target
        );
        FlashOutcome::Flashed { url: image }
    }

    /// Walk the devices in order. Stops before the next device once the
    /// operator interrupts.
    pub async fn run(
        &self,
        devices: &[DeviceRecord],
        feeds: &ReleaseFeeds,
        confirm: &dyn Confirm,
    ) -> RunSummary {
        let mut summary = RunSummary::default();
        for record in devices {
            if self.shutdown.is_triggered() {
                info!("Interrupted, remaining devices left untouched");
                break;
            }
            self.describe(record, feeds);
            let outcome = self.evaluate(record, confirm).await;
            report_outcome(&record.friendly_host, &outcome);
            summary.record(&outcome);
            info!(" ");
        }
        summary
    }

    /// Describe each device without planning or flashing anything
    pub fn list(&self, devices: &[DeviceRecord], feeds: &ReleaseFeeds) -> RunSummary {
        let mut summary = RunSummary::default();
        for record in devices {
            self.describe(record, feeds);
            report_outcome(&record.friendly_host, &FlashOutcome::Listed);
            summary.record(&FlashOutcome::Listed);
            info!(" ");
        }
        summary
    }
}
