//! Agent state management

use std::sync::Arc;

use dm_core::config::{load_config, AgentConfig};
use dm_core::{ClientId, CredentialStore, Credentials, StateDir};

use crate::processors::{
    CommandProcessor, ConfigurationProcessor, LogfileProcessor, OperationProcessor,
    RemoteAccessProcessor, RestartProcessor,
};

/// Long-lived state for the agent daemon
pub struct AgentState {
    /// Configuration as loaded at start
    pub config: AgentConfig,
    /// Identity on the management session
    pub client_id: ClientId,
    /// Where configuration, credentials and markers live
    pub state_dir: StateDir,
}

impl AgentState {
    /// Load the configuration from `state_dir`
    ///
    /// Returns `None` when no client id is configured and none can be derived
    /// from the host.
    pub fn load(state_dir: StateDir) -> Option<Self> {
        let detected = ClientId::detect().map(|id| id.as_str().to_string());
        let config = load_config(&state_dir, detected);
        let client_id = ClientId::new(config.client_id()?);
        Some(Self {
            config,
            client_id,
            state_dir,
        })
    }

    pub fn credential_store(&self) -> CredentialStore {
        CredentialStore::new(self.state_dir.clone())
    }

    /// Processors for one management session, in dispatch order
    pub fn processors(&self, credentials: &Credentials) -> Vec<Arc<dyn OperationProcessor>> {
        vec![
            Arc::new(CommandProcessor::default()),
            Arc::new(RestartProcessor::new(self.state_dir.clone())),
            Arc::new(LogfileProcessor::default()),
            Arc::new(ConfigurationProcessor::new(self.config.clone(), self.state_dir.clone())),
            Arc::new(RemoteAccessProcessor::new(self.config.clone(), credentials.clone())),
        ]
    }
}
