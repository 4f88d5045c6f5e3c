//! Supervisory loop: uplink, session, restart with backoff, forever

use super::uplink::{UplinkConnector, UplinkHandle};
use crate::actuator::ActuatorScheduler;
use crate::session::SessionManager;
use crate::transport::TransportError;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use homeasst_shared::Seconds;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, warn};

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Fixed wait before restarting a failed cycle
    pub backoff: Duration,
    /// Uplink re-probe period while a session runs
    pub probe_interval: Duration,
    /// How long the LED stays lit once the uplink is up
    pub indicator_secs: Seconds,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            probe_interval: Duration::from_secs(30),
            indicator_secs: 2.0,
        }
    }
}

/// A running session the supervisor can drive
#[async_trait]
pub trait Session: Send {
    /// Run until the session ends; `Ok` means a clean end
    async fn run(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
impl Session for SessionManager {
    async fn run(&mut self) -> Result<(), TransportError> {
        SessionManager::run(self).await
    }
}

/// Builds a fresh session for each supervisory cycle
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, uplink: &UplinkHandle) -> Result<Box<dyn Session>>;
}

/// Top-level driver; never returns
pub struct Supervisor<U, F> {
    uplink: U,
    factory: F,
    indicator: Option<ActuatorScheduler>,
    config: SupervisorConfig,
}

impl<U: UplinkConnector, F: SessionFactory> Supervisor<U, F> {
    pub fn new(uplink: U, factory: F, config: SupervisorConfig) -> Self {
        Self {
            uplink,
            factory,
            indicator: None,
            config,
        }
    }

    /// Light `led` briefly each time the uplink comes up
    pub fn with_indicator(mut self, led: ActuatorScheduler) -> Self {
        self.indicator = Some(led);
        self
    }

    /// Run cycles forever, waiting `backoff` after each one ends
    pub async fn run(&self) {
        let mut cycle = 0u64;
        loop {
            cycle += 1;
            info!("[SUPERVISOR] Starting cycle {}", cycle);

            match self.cycle().await {
                Ok(()) => warn!("[SUPERVISOR] Cycle {} ended", cycle),
                Err(e) => error!("[SUPERVISOR] Cycle {} failed: {:#}", cycle, e),
            }

            info!("[SUPERVISOR] Restarting in {:?}", self.config.backoff);
            sleep(self.config.backoff).await;
        }
    }

    /// One pass: uplink, indicator, session until it ends or the uplink drops
    pub async fn cycle(&self) -> Result<()> {
        let handle = self.uplink.ensure_uplink().await?;

        if let Some(led) = &self.indicator {
            if let Err(e) = led.turn_on(Some(self.config.indicator_secs)).await {
                warn!("[SUPERVISOR] Uplink indicator failed: {}", e);
            }
        }

        let mut session = self.factory.create(&handle).await?;
        info!(
            "[SUPERVISOR] Session up via {} (uplink after {} attempt(s))",
            handle.target, handle.attempts
        );

        let mut probe = interval(self.config.probe_interval);
        probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        probe.tick().await;

        let run = session.run();
        tokio::pin!(run);

        loop {
            tokio::select! {
                result = &mut run => {
                    return match result {
                        Ok(()) => Ok(()),
                        Err(e) => Err(anyhow!(e).context("session ended")),
                    };
                }
                _ = probe.tick() => {
                    self.uplink.probe(&handle).await?;
                }
            }
        }
    }
}
