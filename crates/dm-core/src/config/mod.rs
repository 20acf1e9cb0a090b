//! Configuration management for the device agent

mod agent;
pub mod serde_utils;
mod session;

pub use agent::{AgentConfig, HttpProtocol, MqttProtocol, DEFAULT_DOMAIN};
pub use session::{BackoffConfig, SessionConfig, DEFAULT_MAX_PACKET_SIZE};

use serde_json::Value;

use crate::error::ConfigError;
use crate::store::StateDir;

/// File holding the agent configuration
pub const AGENT_CONFIG_FILE: &str = "agent-config.json";

/// Load the agent configuration from the state directory
///
/// A missing or malformed file yields the defaults. The normalized
/// configuration is written back so the file always reflects what is in use.
pub fn load_config(store: &StateDir, default_client_id: Option<String>) -> AgentConfig {
    let stored = store.read::<Value>(AGENT_CONFIG_FILE).unwrap_or(Value::Null);
    let config = AgentConfig::from_value(&stored, default_client_id);

    if let Err(e) = save_config(store, &config) {
        tracing::warn!("Failed to write normalized configuration: {}", e);
    }
    config
}

/// Save the agent configuration to the state directory
pub fn save_config(store: &StateDir, config: &AgentConfig) -> Result<(), ConfigError> {
    store.write(AGENT_CONFIG_FILE, &config.to_value())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let store = StateDir::new(dir.path());

        let config = load_config(&store, Some("linux-aabb".into()));
        assert_eq!(config, AgentConfig::defaults(Some("linux-aabb".into())));

        let written: Value = store.read(AGENT_CONFIG_FILE).unwrap();
        assert_eq!(written["clientId"], json!("linux-aabb"));
        assert_eq!(written["domain"], json!(DEFAULT_DOMAIN));
    }

    #[test]
    fn test_load_normalizes_invalid_keys() {
        let dir = TempDir::new().unwrap();
        let store = StateDir::new(dir.path());
        store
            .write(AGENT_CONFIG_FILE, &json!({"domain": "example.com", "httpPort": "x"}))
            .unwrap();

        let config = load_config(&store, None);
        assert_eq!(config.domain, "example.com");
        assert_eq!(config.http_port, 443);

        let written: Value = store.read(AGENT_CONFIG_FILE).unwrap();
        assert_eq!(written["httpPort"], json!(443));
    }
}
