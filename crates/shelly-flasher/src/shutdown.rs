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

//! Operator interrupt signal
//!
//! Once triggered, no new probe is started and the flash loop stops before the
//! next device. A request that is already in flight is never cancelled.

use tokio::sync::watch;
use tracing::{info, warn};

/// Sending half, held by the signal handler
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half, cloned into every component that must stop early
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn channel() -> (ShutdownTrigger, Self) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Self { rx })
    }

    /// A signal that never fires
    pub fn never() -> Self {
        Self::channel().1
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the trigger fires. Pends forever if the trigger is
    /// dropped without firing.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Trigger the shutdown on Ctrl-C
pub fn listen_for_interrupt(trigger: ShutdownTrigger) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, finishing the current request...");
                trigger.trigger();
            }
            Err(e) => warn!("Could not listen for Ctrl-C: {e}"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_sets_flag() {
        let (trigger, mut shutdown) = Shutdown::channel();
        assert!(!shutdown.is_triggered());

        trigger.trigger();

        assert!(shutdown.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), shutdown.triggered())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_does_not_fire() {
        let mut shutdown = Shutdown::never();
        assert!(!shutdown.is_triggered());
        let waited = tokio::time::timeout(Duration::from_secs(60), shutdown.triggered()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn test_clones_share_state() {
        let (trigger, shutdown) = Shutdown::channel();
        let clone = shutdown.clone();
        trigger.trigger();
        assert!(clone.is_triggered());
    }
}
