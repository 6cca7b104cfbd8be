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

//! Error types for the flasher crate

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlasherError {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to lookup online version information from {url}: {reason}")]
    FeedUnavailable { url: String, reason: String },

    #[error("could not resolve host: {0}")]
    UnresolvableHost(String),

    #[error("could not get info from device: {0}")]
    DeviceUnreachable(String),

    #[error("device {host} is not compatible: {reason}")]
    DeviceIncompatible { host: String, reason: String },

    #[error("malformed version: {0}")]
    MalformedVersion(String),

    #[error("http client error: {0}")]
    Http(String),

    #[error("discovery error: {0}")]
    Discovery(String),
}

pub type Result<T> = std::result::Result<T, FlasherError>;
