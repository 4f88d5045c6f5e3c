mod actuator;
mod collaborator;
mod command;
mod config;
mod connection;
mod session;
mod transport;

use actuator::ActuatorScheduler;
use anyhow::{Context, Result};
use async_trait::async_trait;
use collaborator::{ChatClient, Collaborator};
use command::{CommandDispatcher, DispatchConfig};
use config::AppConfig;
use connection::{Session, SessionFactory, Supervisor, TcpUplink, UplinkHandle};
use homeasst_shared::{link, AdvertisingPayload};
use session::{SessionConfig, SessionManager};
use std::sync::Arc;
use transport::LinkConfig;

use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Builds a session over a freshly opened link for every supervisory cycle
struct LinkSessions {
    link: LinkConfig,
    session: SessionConfig,
    dispatch: DispatchConfig,
    payload: AdvertisingPayload,
    collaborator: Arc<dyn Collaborator>,
    actuator: ActuatorScheduler,
}

#[async_trait]
impl SessionFactory for LinkSessions {
    async fn create(&self, uplink: &UplinkHandle) -> Result<Box<dyn Session>> {
        let link = transport::open_link(&self.link).await?;
        info!(
            "[SESSION] {} link ready, uplink via {} since {:?}",
            link.name(),
            uplink.target,
            uplink.established_at.elapsed()
        );

        let dispatcher = CommandDispatcher::new(
            self.collaborator.clone(),
            self.actuator.clone(),
            self.dispatch.clone(),
        );
        Ok(Box::new(SessionManager::new(
            link,
            dispatcher,
            self.payload.clone(),
            self.session.clone(),
        )))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = AppConfig::from_env().context("loading configuration")?;

    info!("Home assistant edge starting: {}", config.link.device_name);
    info!("  Link: {:?}", config.link.mode);
    info!("  Model: {} @ {}", config.collaborator.model, config.collaborator.endpoint);
    if config.collaborator.api_key.is_none() {
        warn!("[AI] HOMEASST_API_KEY not set, requests go out unauthenticated");
    }

    let payload = AdvertisingPayload::new(
        &config.link.device_name,
        link::service_alias(link::SERVICE_UUID),
    )
    .context("building advertising payload")?;

    let pin = config.actuator.open_pin().context("opening LED")?;
    let actuator = ActuatorScheduler::new(pin);

    let collaborator: Arc<dyn Collaborator> =
        Arc::new(ChatClient::new(config.collaborator.clone()).context("creating AI client")?);
    info!("[AI] Using {}", collaborator.name());

    let sessions = LinkSessions {
        link: config.link.clone(),
        session: config.session.clone(),
        dispatch: config.dispatch.clone(),
        payload,
        collaborator,
        actuator: actuator.clone(),
    };

    let supervisor = Supervisor::new(
        TcpUplink::new(config.uplink.clone()),
        sessions,
        config.supervisor.clone(),
    )
    .with_indicator(actuator);

    // Only an external kill ends the process
    supervisor.run().await;
    Ok(())
}
