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

//! Version parsing and comparison module
//!
//! Firmware versions look like `1.9.0`, `1.9.2_1L`, `1.9.3-rc3` or `2.7.0-beta1`.
//! A build carrying a variant tag ranks above the untagged build with the same
//! `major.minor.patch`. This is the convention the Shelly release feeds use for
//! their intermediate builds and is intentionally not semver pre-release
//! precedence.

use crate::error::{FlasherError, Result};
use std::cmp::Ordering;
use std::fmt;

/// Ordered key derived from a version string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionKey {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Pre-release label, empty for a final release
    pub variant_tag: String,
    pub variant_seq: u32,
}

impl VersionKey {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            ..Self::default()
        }
    }

    pub fn with_variant(mut self, tag: impl Into<String>, seq: u32) -> Self {
        self.variant_tag = tag.into();
        self.variant_seq = seq;
        self
    }

    pub fn is_tagged(&self) -> bool {
        !self.variant_tag.is_empty()
    }

    /// Compare two keys.
    ///
    /// Numeric triple first, then a tagged build beats an untagged one. Two
    /// tagged (or two untagged) builds are ranked by `variant_seq` alone, so
    /// `rc1` and `beta1` compare equal.
    pub fn compare(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| self.is_tagged().cmp(&other.is_tagged()))
            .then_with(|| self.variant_seq.cmp(&other.variant_seq))
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.is_tagged() || self.variant_seq != 0 {
            write!(f, "-{}{}", self.variant_tag, self.variant_seq)?;
        }
        Ok(())
    }
}

/// Parse a firmware version string into a [`VersionKey`].
///
/// The suffix is everything after the first `_` (or the first `-` when there is
/// no underscore). Its non-digit characters form the variant tag and its first
/// run of digits the sequence number.
pub fn parse_version(s: &str) -> Result<VersionKey> {
    let s = s.trim().trim_start_matches(['v', 'V']);
    let (head, suffix) = match s.split_once('_') {
        Some((head, suffix)) => (head, Some(suffix)),
        None => match s.split_once('-') {
            Some((head, suffix)) => (head, Some(suffix)),
            None => (s, None),
        },
    };

    let parts: Vec<&str> = head.split('.').collect();
    let [major, minor, patch] = parts.as_slice() else {
        return Err(FlasherError::MalformedVersion(format!(
            "Invalid version format: {s}, expected X.Y.Z"
        )));
    };

    let mut key = VersionKey::new(
        component(s, major, "major")?,
        component(s, minor, "minor")?,
        component(s, patch, "patch")?,
    );

    if let Some(suffix) = suffix {
        key.variant_tag = suffix.chars().filter(|c| !c.is_ascii_digit()).collect();
        let digits: String = suffix
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(char::is_ascii_digit)
            .collect();
        if !digits.is_empty() {
            key.variant_seq = component(s, &digits, "variant sequence")?;
        }
    }

    Ok(key)
}

fn component(version: &str, part: &str, name: &str) -> Result<u32> {
    part.parse::<u32>().map_err(|_| {
        FlasherError::MalformedVersion(format!("Invalid {name} version in {version}: {part}"))
    })
}

/// Returns true if `candidate` is newer than `reference`
pub fn is_newer(candidate: &str, reference: &str) -> Result<bool> {
    let candidate = parse_version(candidate)?;
    let reference = parse_version(reference)?;
    Ok(candidate.compare(&reference) == Ordering::Greater)
}

/// Extract the version from a stock build string.
///
/// Stock firmware reports `20201124-092159/v1.9.0@57ac4ad8`; the version sits
/// between `/v` and `@`. Builds without the `/v` marker report `0.0.0`.
pub fn stock_version(build: &str) -> &str {
    match build.split_once("/v") {
        Some((_, rest)) => rest.split('@').next().unwrap_or(rest),
        None => "0.0.0",
    }
}
