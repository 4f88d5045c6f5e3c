//! Uplink establishment and reachability probing

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Uplink failures
#[derive(Error, Debug)]
pub enum UplinkError {
    #[error("uplink to {target} unavailable after {attempts} attempts")]
    Unavailable { target: String, attempts: u32 },

    #[error("uplink probe to {target} failed: {reason}")]
    ProbeFailed { target: String, reason: String },
}

/// Configuration for uplink bring-up
#[derive(Debug, Clone)]
pub struct UplinkConfig {
    /// host:port that must be reachable (collaborator endpoint)
    pub probe_address: String,
    /// Attempts before giving up on one bring-up
    pub max_attempts: u32,
    /// Wait between attempts
    pub retry_interval: Duration,
    /// Bound for one reachability probe
    pub connect_timeout: Duration,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            probe_address: "api.openai.com:443".into(),
            max_attempts: 10,
            retry_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Proof of an established uplink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkHandle {
    pub target: String,
    /// Attempt number that succeeded (1-based)
    pub attempts: u32,
    pub established_at: Instant,
}

/// Establishes and checks the board's uplink
#[async_trait]
pub trait UplinkConnector: Send + Sync {
    /// Bring the uplink up, retrying within the configured budget
    async fn ensure_uplink(&self) -> Result<UplinkHandle, UplinkError>;

    /// Check that an established uplink is still usable
    async fn probe(&self, handle: &UplinkHandle) -> Result<(), UplinkError>;
}

/// Uplink check by TCP reachability of the collaborator host
pub struct TcpUplink {
    config: UplinkConfig,
}

impl TcpUplink {
    pub fn new(config: UplinkConfig) -> Self {
        Self { config }
    }

    async fn reach(&self, target: &str) -> Result<(), String> {
        match timeout(self.config.connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "timed out after {:?}",
                self.config.connect_timeout
            )),
        }
    }
}

#[async_trait]
impl UplinkConnector for TcpUplink {
    async fn ensure_uplink(&self) -> Result<UplinkHandle, UplinkError> {
        let target = &self.config.probe_address;
        let attempts = self.config.max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.reach(target).await {
                Ok(()) => {
                    info!("[UPLINK] {} reachable (attempt {})", target, attempt);
                    return Ok(UplinkHandle {
                        target: target.clone(),
                        attempts: attempt,
                        established_at: Instant::now(),
                    });
                }
                Err(reason) => {
                    debug!(
                        "[UPLINK] Attempt {}/{} to {} failed: {}",
                        attempt, attempts, target, reason
                    );
                }
            }
            if attempt < attempts {
                sleep(self.config.retry_interval).await;
            }
        }

        warn!("[UPLINK] Giving up on {} after {} attempts", target, attempts);
        Err(UplinkError::Unavailable {
            target: target.clone(),
            attempts,
        })
    }

    async fn probe(&self, handle: &UplinkHandle) -> Result<(), UplinkError> {
        self.reach(&handle.target)
            .await
            .map_err(|reason| UplinkError::ProbeFailed {
                target: handle.target.clone(),
                reason,
            })
    }
}
