//! Credential lifecycle
//!
//! Stored credentials are validated first. Credentials the platform rejects
//! are cleared, and a device without usable credentials runs the bootstrap
//! handshake until it gets new ones.

mod bootstrap;
mod validator;

pub use bootstrap::{
    bootstrap, parse_credentials, BootstrapError, LinkEvent, MqttProvisioningLink,
    ProvisioningLink, REQUEST_INTERVAL,
};
pub use validator::{
    classify, CredentialValidator, RetryReason, Sleeper, TokioSleeper, ValidationState,
    NETWORK_RETRY_DELAY, PLATFORM_RETRY_DELAY,
};

use std::time::Duration;

use async_trait::async_trait;

use dm_core::config::AgentConfig;
use dm_core::{ClientId, CredentialStore, Credentials};

use crate::rest::RestClient;

/// Wait before running the handshake again after its link died
pub const BOOTSTRAP_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Platform side of the credential lifecycle
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Whether the platform accepts `credentials` (transient trouble is waited out)
    async fn validate(&self, credentials: &Credentials) -> bool;

    /// Run one bootstrap handshake
    async fn bootstrap(&self) -> Result<Credentials, BootstrapError>;
}

/// [`Provisioner`] talking to the configured platform
pub struct PlatformProvisioner<'a> {
    config: &'a AgentConfig,
    client_id: &'a ClientId,
    identity: Credentials,
    sleeper: &'a dyn Sleeper,
}

impl<'a> PlatformProvisioner<'a> {
    pub fn new(
        config: &'a AgentConfig,
        client_id: &'a ClientId,
        identity: Credentials,
        sleeper: &'a dyn Sleeper,
    ) -> Self {
        Self {
            config,
            client_id,
            identity,
            sleeper,
        }
    }
}

#[async_trait]
impl Provisioner for PlatformProvisioner<'_> {
    async fn validate(&self, credentials: &Credentials) -> bool {
        let platform = match RestClient::new(self.config.http_url(), credentials.clone()) {
            Ok(platform) => platform,
            Err(e) => {
                tracing::error!("Cannot create REST client: {}", e);
                return false;
            }
        };
        CredentialValidator::new(&platform, self.sleeper)
            .ensure_valid()
            .await
    }

    async fn bootstrap(&self) -> Result<Credentials, BootstrapError> {
        tracing::info!(
            "Bootstrapping {} as {} via {}",
            self.client_id,
            self.identity.username(),
            self.config.mqtt_url()
        );
        let mut link = MqttProvisioningLink::connect(self.config, self.client_id, &self.identity);
        bootstrap(&mut link).await
    }
}

/// Produce credentials the platform accepts, bootstrapping if necessary
///
/// Never gives up: a failed handshake is retried after [`BOOTSTRAP_RETRY_DELAY`].
pub async fn obtain_credentials(
    store: &CredentialStore,
    provisioner: &dyn Provisioner,
    sleeper: &dyn Sleeper,
) -> Credentials {
    if let Some(credentials) = store.load() {
        tracing::info!("Validating stored credentials for {}", credentials.username());
        if provisioner.validate(&credentials).await {
            return credentials;
        }
        tracing::warn!("Stored credentials are no longer valid, clearing them");
        if let Err(e) = store.clear() {
            tracing::warn!("Failed to clear credentials: {}", e);
        }
    }

    loop {
        match provisioner.bootstrap().await {
            Ok(credentials) => {
                if let Err(e) = store.save(&credentials) {
                    tracing::error!("Failed to persist device credentials: {}", e);
                }
                return credentials;
            }
            Err(e) => {
                tracing::warn!("Bootstrap failed: {}, retrying in {:?}", e, BOOTSTRAP_RETRY_DELAY);
                sleeper.sleep(BOOTSTRAP_RETRY_DELAY).await;
            }
        }
    }
}
