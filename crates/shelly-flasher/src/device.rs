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

//! Device classification
//!
//! Turns the `/settings` document of a probed device into a [`DeviceRecord`].
//! Nothing in here touches the network.

use crate::error::{FlasherError, Result};
use crate::probe::ProbedDevice;
use crate::version::{VersionKey, parse_version, stock_version};
use serde_json::Value;
use std::net::SocketAddr;

/// Label shown for a target image that exists for the device's model
pub const LATEST_LABEL: &str = "latest";

/// Firmware currently running on a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Firmware {
    /// Stock Shelly firmware (Mongoose OS)
    Stock(StockFirmware),
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockFirmware {
    /// Raw build string, e.g. `20201124-092159/v1.9.0@57ac4ad8`
    pub build: String,
    pub version: VersionKey,
}

impl Firmware {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Stock(_) => "Stock",
            Self::Unknown => "Unknown",
        }
    }

    pub fn version(&self) -> Option<&VersionKey> {
        match self {
            Self::Stock(stock) => Some(&stock.version),
            Self::Unknown => None,
        }
    }
}

/// Detect the firmware family from a status document.
///
/// Stock firmware exposes `fw` and `device.type` in `/settings`. A `fw` value
/// that carries a `/v` marker but no parsable version is an error rather than a
/// silent `0.0.0`.
pub fn detect_firmware(info: &Value) -> Result<Firmware> {
    let (Some(build), Some(_)) = (
        info.get("fw").and_then(Value::as_str),
        info.pointer("/device/type").and_then(Value::as_str),
    ) else {
        return Ok(Firmware::Unknown);
    };

    let version = parse_version(stock_version(build))?;
    Ok(Firmware::Stock(StockFirmware {
        build: build.to_owned(),
        version,
    }))
}

/// Map a Shelly model code to its friendly name, passing unknown codes through
pub fn model_name(code: &str) -> &str {
    match code {
        "SHSW-1" | "switch1" => "Shelly1",
        "SHSW-L" => "Shelly1L",
        "SHSW-PM" | "switch1pm" => "Shelly1PM",
        "SHSW-21" | "switch2" => "Shelly2",
        "SHSW-25" | "switch25" => "Shelly25",
        "SHPLG-1" => "ShellyPlug",
        "SHPLG2-1" => "ShellyPlug2",
        "SHPLG-S" | "shelly-plug-s" => "ShellyPlugS",
        "SHPLG-U1" => "ShellyPlugUS",
        "SHIX3-1" => "ShellyI3",
        "SHBTN-1" => "ShellyButton1",
        "SHBLB-1" => "ShellyBulb",
        "SHVIN-1" => "ShellyVintage",
        "SHBDUO-1" => "ShellyDuo",
        "SHDM-1" | "dimmer1" => "ShellyDimmer1",
        "SHDM-2" | "dimmer2" => "ShellyDimmer2",
        "SHRGBW2" | "rgbw2" => "ShellyRGBW2",
        "SHDW-1" => "ShellyDoorWindow1",
        "SHDW-2" => "ShellyDoorWindow2",
        "SHHT-1" => "ShellyHT",
        "SHSM-01" => "ShellySmoke",
        "SHWT-1" => "ShellyFlood",
        "SHGS-1" => "ShellyGas",
        "SHEM" => "ShellyEM",
        "SHEM-3" => "Shelly3EM",
        "SHUNI-1" => "ShellyUni",
        other => other,
    }
}

/// A classified device, ready for planning
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    /// Canonical name used for network operations and ordering
    pub host: String,
    /// Name as supplied by the operator or announced over mDNS
    pub friendly_host: String,
    pub network_address: SocketAddr,
    pub firmware: Firmware,
    /// Raw `/settings` document, kept for diagnostics
    pub raw_info: Value,
    /// Friendly model name, e.g. `ShellyPlugS`
    pub model: String,
    /// Model code reported by the device, e.g. `SHPLG-S`
    pub stock_model: String,
    pub device_id: String,
    pub colour_mode: Option<String>,
    /// Target image URL, `None` while unresolved or when unsupported
    pub download_url: Option<String>,
    pub flash_label: String,
}

impl DeviceRecord {
    pub fn current_version(&self) -> Option<&VersionKey> {
        self.firmware.version()
    }

    /// Host address of the device web server, `ip:port`
    pub fn address(&self) -> String {
        self.network_address.to_string()
    }
}

/// Classify a probed device.
///
/// Fails for an empty document, an unrecognised firmware family or a malformed
/// stock version. Callers drop the device on error.
pub fn classify(probed: ProbedDevice) -> Result<DeviceRecord> {
    let ProbedDevice {
        candidate,
        network_address,
        info,
    } = probed;

    if info.as_object().is_none_or(serde_json::Map::is_empty) {
        return Err(FlasherError::DeviceUnreachable(candidate.friendly_host));
    }

    let firmware = detect_firmware(&info)?;
    if firmware == Firmware::Unknown {
        return Err(FlasherError::DeviceIncompatible {
            host: candidate.friendly_host,
            reason: "unrecognised firmware".to_owned(),
        });
    }

    let stock_model = info
        .pointer("/device/type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let device_id = info
        .pointer("/mqtt/id")
        .and_then(Value::as_str)
        .map_or_else(|| candidate.friendly_host.clone(), ToOwned::to_owned);
    let colour_mode = info.get("mode").and_then(Value::as_str).map(ToOwned::to_owned);

    Ok(DeviceRecord {
        host: candidate.host,
        friendly_host: candidate.friendly_host,
        network_address,
        firmware,
        model: model_name(&stock_model).to_owned(),
        stock_model,
        device_id,
        colour_mode,
        raw_info: info,
        download_url: None,
        flash_label: LATEST_LABEL.to_owned(),
    })
}
