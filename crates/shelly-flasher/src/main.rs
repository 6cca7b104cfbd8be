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

//! Shelly flasher - entry point for the command line tool

use clap::{CommandFactory, Parser};
use shelly_flasher::cli::Cli;
use shelly_flasher::discovery::DiscoveryEngine;
use shelly_flasher::load_config;
use shelly_flasher::orchestrator::{FlashOrchestrator, StdinConfirm};
use shelly_flasher::planner::FlashPlanner;
use shelly_flasher::probe::HttpProbe;
use shelly_flasher::release::ReleaseFeeds;
use shelly_flasher::report::{Palette, Verbosity};
use shelly_flasher::shutdown::{Shutdown, listen_for_interrupt};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let invalid = e.use_stderr();
            e.print()?;
            if invalid {
                anyhow::bail!("invalid arguments");
            }
            return Ok(());
        }
    };

    let palette = Palette::detect();
    init_tracing(cli.verbosity(), palette);

    if let Err(e) = cli.validate() {
        Cli::command().print_help()?;
        error!("{}", palette.error(&e.to_string()));
        return Err(e.into());
    }
    let target = cli.target()?;
    let config = load_config(cli.config.as_deref())?;
    debug!("Config: {config:?}");

    let feeds = match ReleaseFeeds::fetch(&config).await {
        Ok(feeds) => feeds,
        Err(e) => {
            error!("{}", palette.error(&e.to_string()));
            return Err(e.into());
        }
    };

    let (trigger, shutdown) = Shutdown::channel();
    listen_for_interrupt(trigger);

    let discovery = DiscoveryEngine::new(HttpProbe::new(&config)?, &config, palette, shutdown.clone());
    let report = if cli.all {
        discovery.scan_network(&config.service_type).await?
    } else {
        discovery.probe_hosts(&cli.hosts).await
    };
    let mut devices = report.devices;

    let orchestrator = FlashOrchestrator::new(
        target,
        cli.run_flags(),
        cli.exclude.iter().cloned(),
        palette,
        shutdown.clone(),
    )?;

    let mut summary = if cli.list {
        orchestrator.list(&devices, &feeds)
    } else {
        let planner = FlashPlanner::new(&config, target)?;
        for device in &mut devices {
            if shutdown.is_triggered() {
                break;
            }
            planner.plan(device).await;
        }
        orchestrator.run(&devices, &feeds, &StdinConfirm).await
    };
    summary.dropped = report.dropped;
    summary.log(&palette);

    if shutdown.is_triggered() {
        info!("Stopped on operator request");
    }
    Ok(())
}

/// Message-only output on stdout. `--verbose` raises this crate's level,
/// otherwise `RUST_LOG` applies with `info` as the fallback.
fn init_tracing(verbosity: Verbosity, palette: Palette) {
    let filter = match verbosity.directive() {
        Some(level) => EnvFilter::new(format!("info,shelly_flasher={level}")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_target(false)
        .with_level(false)
        .with_ansi(!palette.is_plain())
        .init();
}
