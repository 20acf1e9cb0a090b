//! Credential validation against the platform
//!
//! Validation is a small state machine. Each step asks the platform for the
//! current tenant; transient failures move to [`ValidationState::Retrying`]
//! and the next step waits out the delay before asking again. Only a
//! definitive rejection ends in [`ValidationState::Invalid`].

use std::time::Duration;

use async_trait::async_trait;

use dm_core::traits::PlatformApi;
use dm_core::RestError;

/// Wait after a request that produced no response
pub const NETWORK_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Wait after server-side trouble or a locked account
pub const PLATFORM_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Sleep primitive, injectable so retry timing can be observed in tests
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Why a validation attempt will be repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    NetworkUnavailable,
    PlatformTransient,
    CredentialsLocked,
}

impl RetryReason {
    pub fn delay(&self) -> Duration {
        match self {
            Self::NetworkUnavailable => NETWORK_RETRY_DELAY,
            Self::PlatformTransient | Self::CredentialsLocked => PLATFORM_RETRY_DELAY,
        }
    }
}

/// Where validation currently stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationState {
    Unvalidated,
    Retrying { delay: Duration, reason: RetryReason },
    Valid,
    Invalid,
}

impl ValidationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

/// Classify a failed validation request
///
/// `None` means the platform rejected the credentials for good.
pub fn classify(error: &RestError) -> Option<RetryReason> {
    match error {
        RestError::NoResponse(_) => Some(RetryReason::NetworkUnavailable),
        RestError::Status { status, message } => match *status {
            s if s >= 500 => Some(RetryReason::PlatformTransient),
            401 if message.as_deref().is_some_and(|m| m.to_lowercase().contains("locked")) => {
                Some(RetryReason::CredentialsLocked)
            }
            400..=499 => None,
            _ => Some(RetryReason::PlatformTransient),
        },
        RestError::UnexpectedResponse(_) | RestError::InvalidRequest(_) => {
            Some(RetryReason::PlatformTransient)
        }
    }
}

/// Drives validation of one credential set to a verdict
pub struct CredentialValidator<'a> {
    platform: &'a dyn PlatformApi,
    sleeper: &'a dyn Sleeper,
    state: ValidationState,
}

impl<'a> CredentialValidator<'a> {
    pub fn new(platform: &'a dyn PlatformApi, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            platform,
            sleeper,
            state: ValidationState::Unvalidated,
        }
    }

    pub fn state(&self) -> &ValidationState {
        &self.state
    }

    /// Advance by one attempt (waiting first when retrying)
    pub async fn step(&mut self) -> &ValidationState {
        match &self.state {
            ValidationState::Valid | ValidationState::Invalid => return &self.state,
            ValidationState::Retrying { delay, .. } => self.sleeper.sleep(*delay).await,
            ValidationState::Unvalidated => {}
        }

        self.state = match self.platform.current_tenant().await {
            Ok(tenant) => {
                tracing::info!("Credentials valid for tenant {}", tenant.name);
                ValidationState::Valid
            }
            Err(e) => match classify(&e) {
                Some(reason) => {
                    let delay = reason.delay();
                    tracing::warn!("Credential check failed ({}), retrying in {:?}", e, delay);
                    ValidationState::Retrying { delay, reason }
                }
                None => {
                    tracing::warn!("Credentials rejected: {}", e);
                    ValidationState::Invalid
                }
            },
        };
        &self.state
    }

    /// Run until the platform gives a verdict; transient trouble is waited out
    pub async fn ensure_valid(mut self) -> bool {
        while !self.step().await.is_terminal() {}
        self.state == ValidationState::Valid
    }
}
