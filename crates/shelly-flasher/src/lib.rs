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

//! Shelly flasher - discovers Shelly devices and converts them over the air
//!
//! Devices are found from an explicit host list or an mDNS scan, classified
//! from their `/settings` document, matched against the conversion image store
//! and flashed one at a time.

pub mod cli;
pub mod config;
pub mod device;
pub mod discovery;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod probe;
pub mod release;
pub mod report;
pub mod shutdown;
pub mod version;

pub use config::{FlasherConfig, load_config};
pub use device::{DeviceRecord, Firmware};
pub use error::FlasherError;
pub use planner::Target;
pub use version::{VersionKey, is_newer, parse_version};
