//! Process configuration
//!
//! Defaults come from each component's config; `HOMEASST_*` environment
//! variables override them at startup.

use crate::actuator::{ActuatorConfig, LedSelection};
use crate::collaborator::CollaboratorConfig;
use crate::command::DispatchConfig;
use crate::connection::{SupervisorConfig, UplinkConfig};
use crate::session::{InboundFraming, SessionConfig};
use crate::transport::{LinkConfig, LinkMode};
use anyhow::{bail, Context, Result};
use reqwest::Url;

/// Everything the firmware needs to start
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub link: LinkConfig,
    pub session: SessionConfig,
    pub dispatch: DispatchConfig,
    pub collaborator: CollaboratorConfig,
    pub uplink: UplinkConfig,
    pub supervisor: SupervisorConfig,
    pub actuator: ActuatorConfig,
}

impl AppConfig {
    /// Defaults overlaid with the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns per variable
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(key) = lookup("HOMEASST_API_KEY").filter(|k| !k.is_empty()) {
            config.collaborator.api_key = Some(key);
        }
        if let Some(url) = lookup("HOMEASST_API_URL") {
            config.collaborator.endpoint = url;
        }
        if let Some(model) = lookup("HOMEASST_MODEL") {
            config.collaborator.model = model;
        }
        if let Some(name) = lookup("HOMEASST_DEVICE_NAME") {
            config.link.device_name = name;
        }
        if let Some(mode) = lookup("HOMEASST_LINK") {
            config.link.mode = match mode.to_ascii_lowercase().as_str() {
                "gatt" | "ble" => LinkMode::Gatt,
                "tcp" => LinkMode::TcpSimulation,
                other => bail!("HOMEASST_LINK must be 'gatt' or 'tcp', got '{}'", other),
            };
        }
        if let Some(addr) = lookup("HOMEASST_TCP_ADDR") {
            config.link.tcp_address = addr;
        }
        if let Some(framing) = lookup("HOMEASST_FRAMING") {
            config.session.framing = match framing.to_ascii_lowercase().as_str() {
                "write" | "per-write" => InboundFraming::PerWrite,
                "newline" | "line" => InboundFraming::Newline,
                other => bail!("HOMEASST_FRAMING must be 'write' or 'newline', got '{}'", other),
            };
        }
        if let Some(led) = lookup("HOMEASST_LED") {
            config.actuator.led = match led.as_str() {
                "" => bail!("HOMEASST_LED is empty"),
                "memory" => LedSelection::Memory,
                name => LedSelection::Sysfs(name.into()),
            };
        }

        config.uplink.probe_address = match lookup("HOMEASST_UPLINK_PROBE") {
            Some(addr) => addr,
            None => probe_target(&config.collaborator.endpoint)?,
        };

        Ok(config)
    }
}

/// host:port of the collaborator endpoint
fn probe_target(endpoint: &str) -> Result<String> {
    let url = Url::parse(endpoint).with_context(|| format!("invalid API URL '{}'", endpoint))?;
    let Some(host) = url.host_str() else {
        bail!("API URL '{}' has no host", endpoint);
    };
    let Some(port) = url.port_or_known_default() else {
        bail!("API URL '{}' has no port", endpoint);
    };
    Ok(format!("{}:{}", host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_vars(&[]).unwrap();
        assert_eq!(config.link.mode, LinkMode::Gatt);
        assert_eq!(config.link.device_name, "PicoAI");
        assert_eq!(config.collaborator.api_key, None);
        assert_eq!(config.uplink.probe_address, "api.openai.com:443");
        assert_eq!(config.uplink.max_attempts, 10);
        assert_eq!(config.session.max_chunk, 100);
        assert_eq!(config.session.framing, InboundFraming::PerWrite);
    }

    #[test]
    fn test_overrides() {
        let config = from_vars(&[
            ("HOMEASST_API_KEY", "sk-test"),
            ("HOMEASST_API_URL", "http://10.0.0.2:8080/v1/chat/completions"),
            ("HOMEASST_MODEL", "local-model"),
            ("HOMEASST_DEVICE_NAME", "Kitchen"),
            ("HOMEASST_LINK", "TCP"),
            ("HOMEASST_TCP_ADDR", "0.0.0.0:9100"),
            ("HOMEASST_LED", "memory"),
            ("HOMEASST_FRAMING", "newline"),
        ])
        .unwrap();

        assert_eq!(config.collaborator.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.collaborator.model, "local-model");
        assert_eq!(config.link.device_name, "Kitchen");
        assert_eq!(config.link.mode, LinkMode::TcpSimulation);
        assert_eq!(config.link.tcp_address, "0.0.0.0:9100");
        assert_eq!(config.actuator.led, LedSelection::Memory);
        assert_eq!(config.session.framing, InboundFraming::Newline);
        assert_eq!(config.uplink.probe_address, "10.0.0.2:8080");
    }

    #[test]
    fn test_explicit_probe_and_sysfs_led() {
        let config = from_vars(&[
            ("HOMEASST_UPLINK_PROBE", "1.1.1.1:53"),
            ("HOMEASST_LED", "ACT"),
        ])
        .unwrap();
        assert_eq!(config.uplink.probe_address, "1.1.1.1:53");
        assert_eq!(config.actuator.led, LedSelection::Sysfs("ACT".into()));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(from_vars(&[("HOMEASST_LINK", "serial")]).is_err());
        assert!(from_vars(&[("HOMEASST_LED", "")]).is_err());
        assert!(from_vars(&[("HOMEASST_FRAMING", "bytes")]).is_err());
        assert!(from_vars(&[("HOMEASST_API_URL", "not a url")]).is_err());
    }
}
