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

//! Operator-facing reporting
//!
//! Colours and verbosity are plain values handed to whoever prints, so tests
//! and non-terminal output can run with [`Palette::PLAIN`].

use serde::Serialize;
use std::io::IsTerminal;
use tracing::{debug, info};

/// ANSI escape sequences used in operator messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub white: &'static str,
    pub red: &'static str,
    pub green: &'static str,
    pub reset: &'static str,
}

impl Palette {
    pub const ANSI: Self = Self {
        white: "\x1b[1m",
        red: "\x1b[1;91m",
        green: "\x1b[1;92m",
        reset: "\x1b[0m",
    };

    pub const PLAIN: Self = Self {
        white: "",
        red: "",
        green: "",
        reset: "",
    };

    /// Colours on a Unix terminal unless `NO_COLOR` is set
    pub fn detect() -> Self {
        let colour = !cfg!(windows)
            && std::env::var_os("NO_COLOR").is_none()
            && std::io::stdout().is_terminal();
        if colour { Self::ANSI } else { Self::PLAIN }
    }

    pub fn is_plain(&self) -> bool {
        *self == Self::PLAIN
    }

    pub fn paint(&self, colour: &str, text: &str) -> String {
        format!("{colour}{text}{}", self.reset)
    }

    pub fn bold(&self, text: &str) -> String {
        self.paint(self.white, text)
    }

    pub fn error(&self, text: &str) -> String {
        self.paint(self.red, text)
    }

    pub fn success(&self, text: &str) -> String {
        self.paint(self.green, text)
    }
}

/// Log level selected with `--verbose`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    #[default]
    Normal,
    Debug,
    Trace,
}

impl Verbosity {
    /// `--verbose 0` is debug output, `--verbose 1` adds trace output
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some("0") => Self::Debug,
            Some("1") => Self::Trace,
            Some(_) | None => Self::Normal,
        }
    }

    /// `EnvFilter` directive for this level, `None` to defer to `RUST_LOG`
    pub fn directive(self) -> Option<&'static str> {
        match self {
            Self::Normal => None,
            Self::Debug => Some("debug"),
            Self::Trace => Some("trace"),
        }
    }
}

/// Terminal state of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlashOutcome {
    Excluded,
    Unsupported { model: String },
    /// Dry run: the device would have been converted
    WouldFlash { url: String },
    Declined,
    Flashed { url: String },
    FlashFailed { error: String },
    Listed,
}

#[derive(Debug, Clone, Serialize)]
struct DeviceEvent<'a> {
    host: &'a str,
    #[serde(flatten)]
    outcome: &'a FlashOutcome,
}

/// Log an outcome as a JSON event at debug level
pub fn report_outcome(host: &str, outcome: &FlashOutcome) {
    match serde_json::to_string(&DeviceEvent { host, outcome }) {
        Ok(event) => debug!("Device event: {event}"),
        Err(e) => debug!("Could not serialise event for {host}: {e}"),
    }
}

/// Per-run tally of device outcomes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub flashed: usize,
    pub would_flash: usize,
    pub declined: usize,
    pub unsupported: usize,
    pub excluded: usize,
    pub failed: usize,
    pub listed: usize,
    /// Hosts dropped before planning (unreachable or unclassifiable)
    pub dropped: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &FlashOutcome) {
        let counter = match outcome {
            FlashOutcome::Excluded => &mut self.excluded,
            FlashOutcome::Unsupported { .. } => &mut self.unsupported,
            FlashOutcome::WouldFlash { .. } => &mut self.would_flash,
            FlashOutcome::Declined => &mut self.declined,
            FlashOutcome::Flashed { .. } => &mut self.flashed,
            FlashOutcome::FlashFailed { .. } => &mut self.failed,
            FlashOutcome::Listed => &mut self.listed,
        };
        *counter += 1;
    }

    pub fn total(&self) -> usize {
        self.flashed
            + self.would_flash
            + self.declined
            + self.unsupported
            + self.excluded
            + self.failed
            + self.listed
            + self.dropped
    }

    pub fn log(&self, palette: &Palette) {
        let line = format!(
            "Summary: {} flashed, {} would be flashed, {} skipped, {} not supported, {} excluded, {} failed, {} unreachable",
            self.flashed,
            self.would_flash,
            self.declined,
            self.unsupported,
            self.excluded,
            self.failed,
            self.dropped
        );
        if self.failed > 0 {
            info!("{}", palette.error(&line));
        } else {
            info!("{}", palette.bold(&line));
        }
    }
}
