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

//! CLI argument definitions using clap.

use crate::error::{FlasherError, Result};
use crate::orchestrator::RunFlags;
use crate::planner::Target;
use crate::report::Verbosity;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "shelly-flasher")]
#[command(author, version, about = "Shelly firmware flasher")]
#[command(
    long_about = "Finds Shelly devices on stock firmware and converts them over the air.\n\
    \nExamples:\n  \
    shelly-flasher -a                          # Scan the network, prompt per device\n  \
    shelly-flasher -a -n                       # Show what would be flashed\n  \
    shelly-flasher -t haa shellyplug-s-A1B2    # Flash one device to HAA\n  \
    shelly-flasher -a -l                       # List device information only"
)]
pub struct Cli {
    /// Hostnames or addresses of the devices to flash
    #[arg(value_name = "HOSTS")]
    pub hosts: Vec<String>,

    /// Scan the local network for devices
    #[arg(short = 'a', long = "all")]
    pub all: bool,

    #[arg(
        short = 't',
        long = "target",
        default_value = "tasmota",
        value_parser = ["tasmota", "haa", "espurna"],
        help = "Firmware to convert the devices to"
    )]
    pub target: String,

    /// Devices to leave untouched
    #[arg(short = 'e', long = "exclude", num_args = 1.., value_name = "HOSTS")]
    pub exclude: Vec<String>,

    /// Answer no to every prompt: report what would be flashed
    #[arg(short = 'n', long = "assume-no")]
    pub assume_no: bool,

    /// Answer yes to every prompt: flash without asking
    #[arg(short = 'y', long = "assume-yes")]
    pub assume_yes: bool,

    #[arg(
        short = 'v',
        long = "verbose",
        value_parser = ["0", "1"],
        help = "Verbose output",
        long_help = "Verbose output:\n  \
          - 0: debug messages\n  \
          - 1: debug and trace messages"
    )]
    pub verbose: Option<String>,

    /// List device information without flashing
    #[arg(short = 'l', long = "list")]
    pub list: bool,

    /// JSON configuration file
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Reject combinations clap cannot express on its own
    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() == !self.all {
            return Err(FlasherError::Usage(
                "Requires either --all or a list of hosts, not both".to_owned(),
            ));
        }
        if self.assume_no && self.assume_yes {
            return Err(FlasherError::Usage(
                "--assume-no and --assume-yes cannot be used together".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn target(&self) -> Result<Target> {
        self.target.parse()
    }

    pub fn run_flags(&self) -> RunFlags {
        RunFlags {
            dry_run: self.assume_no,
            silent_run: self.assume_yes,
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flag(self.verbose.as_deref())
    }
}
