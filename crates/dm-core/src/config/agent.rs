//! Agent configuration
//!
//! The configuration document is a flat JSON object. Six keys are recognized
//! and validated; any other key is kept verbatim as an extension. A
//! recognized key with an invalid value is replaced by its default when
//! loading, and rejected when set explicitly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::session::SessionConfig;
use crate::error::ConfigError;

/// Platform domain used when none is configured
pub const DEFAULT_DOMAIN: &str = "mqtt.cumulocity.com";

/// Extension key holding transport tuning
const SESSION_KEY: &str = "session";

/// Transport used for the management session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MqttProtocol {
    Mqtt,
    Mqtts,
    Ws,
    Wss,
}

impl MqttProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mqtt => "mqtt",
            Self::Mqtts => "mqtts",
            Self::Ws => "ws",
            Self::Wss => "wss",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "mqtt" => Some(Self::Mqtt),
            "mqtts" => Some(Self::Mqtts),
            "ws" => Some(Self::Ws),
            "wss" => Some(Self::Wss),
            _ => None,
        }
    }

    /// Whether MQTT is tunnelled over WebSockets
    pub fn is_websocket(&self) -> bool {
        matches!(self, Self::Ws | Self::Wss)
    }
}

/// Scheme used for the REST surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpProtocol {
    Http,
    Https,
}

impl HttpProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            _ => None,
        }
    }
}

/// Configuration for the device agent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Device identity; derived from the host when not configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Platform domain
    pub domain: String,

    /// REST port
    pub http_port: u16,

    /// REST scheme
    pub http_protocol: HttpProtocol,

    /// Management session port
    pub mqtt_port: u16,

    /// Management session transport
    pub mqtt_protocol: MqttProtocol,

    /// Unrecognized keys, kept as-is
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

impl AgentConfig {
    /// Default configuration with an optional derived client id
    pub fn defaults(client_id: Option<String>) -> Self {
        Self {
            client_id,
            domain: DEFAULT_DOMAIN.to_string(),
            http_port: 443,
            http_protocol: HttpProtocol::Https,
            mqtt_port: 8883,
            mqtt_protocol: MqttProtocol::Mqtts,
            extensions: BTreeMap::new(),
        }
    }

    /// Build a configuration from a stored document
    ///
    /// Invalid values for recognized keys are logged and replaced by defaults.
    pub fn from_value(value: &Value, default_client_id: Option<String>) -> Self {
        let mut config = Self::defaults(default_client_id);
        let Some(map) = value.as_object() else {
            if !value.is_null() {
                tracing::warn!("Ignoring configuration that is not a JSON object");
            }
            return config;
        };

        for (key, value) in sorted(map) {
            if let Err(e) = config.set_value(key, value.clone()) {
                tracing::warn!("{}, using default value", e);
            }
        }
        config
    }

    /// Check a value against the validator for `key`
    ///
    /// Unrecognized keys accept any value.
    pub fn validate(key: &str, value: &Value) -> Result<(), ConfigError> {
        let valid = match key {
            "domain" | "clientId" => value.as_str().is_some_and(|s| !s.is_empty()),
            "mqttProtocol" => value.as_str().and_then(MqttProtocol::from_name).is_some(),
            "httpProtocol" => value.as_str().and_then(HttpProtocol::from_name).is_some(),
            "mqttPort" | "httpPort" => parse_port(value).is_some(),
            _ => true,
        };

        if valid {
            Ok(())
        } else {
            Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            })
        }
    }

    /// Set a single key after validating it
    pub fn set_value(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        Self::validate(key, &value)?;

        match key {
            "domain" => self.domain = string_of(&value),
            "clientId" => self.client_id = Some(string_of(&value)),
            "mqttProtocol" => {
                if let Some(protocol) = value.as_str().and_then(MqttProtocol::from_name) {
                    self.mqtt_protocol = protocol;
                }
            }
            "httpProtocol" => {
                if let Some(protocol) = value.as_str().and_then(HttpProtocol::from_name) {
                    self.http_protocol = protocol;
                }
            }
            "mqttPort" => self.mqtt_port = parse_port(&value).unwrap_or(self.mqtt_port),
            "httpPort" => self.http_port = parse_port(&value).unwrap_or(self.http_port),
            _ => {
                self.extensions.insert(key.to_string(), value);
            }
        }
        Ok(())
    }

    /// Current value of a key
    pub fn get_value(&self, key: &str) -> Option<Value> {
        match self.to_value() {
            Value::Object(mut map) => map.remove(key),
            _ => None,
        }
    }

    /// Replace the whole configuration
    ///
    /// Every key must be valid, otherwise nothing changes. Keys missing from
    /// `document` take their defaults; the current client id is kept unless
    /// the document sets one.
    pub fn replace(&mut self, document: &Value) -> Result<(), ConfigError> {
        let map = document.as_object().ok_or(ConfigError::NotAnObject)?;
        for (key, value) in map {
            Self::validate(key, value)?;
        }

        let mut next = Self::defaults(self.client_id.clone());
        for (key, value) in sorted(map) {
            next.set_value(key, value.clone())?;
        }
        *self = next;
        Ok(())
    }

    /// Configuration as a JSON document
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Configured or derived client id
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Platform domain
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Management session URL (`ws`/`wss` transports carry the `/mqtt` path)
    pub fn mqtt_url(&self) -> String {
        let base = format!("{}://{}:{}", self.mqtt_protocol.as_str(), self.domain, self.mqtt_port);
        if self.mqtt_protocol.is_websocket() {
            format!("{}/mqtt", base)
        } else {
            base
        }
    }

    /// REST base URL
    pub fn http_url(&self) -> String {
        format!("{}://{}:{}", self.http_protocol.as_str(), self.domain, self.http_port)
    }

    /// Transport tuning from the `session` extension key
    pub fn session(&self) -> SessionConfig {
        match self.extensions.get(SESSION_KEY) {
            None => SessionConfig::default(),
            Some(value) => SessionConfig::deserialize(value).unwrap_or_else(|e| {
                tracing::warn!("Invalid session settings ({}), using defaults", e);
                SessionConfig::default()
            }),
        }
    }
}

/// Iterate a JSON object in key order
fn sorted(map: &Map<String, Value>) -> Vec<(&String, &Value)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

fn string_of(value: &Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}

fn parse_port(value: &Value) -> Option<u16> {
    value
        .as_u64()
        .filter(|port| *port > 0)
        .and_then(|port| u16::try_from(port).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::defaults(Some("linux-0242ac110002".into()));
        assert_eq!(config.mqtt_url(), "mqtts://mqtt.cumulocity.com:8883");
        assert_eq!(config.http_url(), "https://mqtt.cumulocity.com:443");
        assert_eq!(config.client_id(), Some("linux-0242ac110002"));
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let stored = json!({
            "domain": "",
            "mqttProtocol": "carrier-pigeon",
            "mqttPort": -1,
            "httpPort": 8080,
            "httpProtocol": "http",
            "kioskUrl": "http://localhost"
        });
        let config = AgentConfig::from_value(&stored, None);
        assert_eq!(config.domain, DEFAULT_DOMAIN);
        assert_eq!(config.mqtt_protocol, MqttProtocol::Mqtts);
        assert_eq!(config.mqtt_port, 8883);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.http_protocol, HttpProtocol::Http);
        assert_eq!(config.extensions.get("kioskUrl"), Some(&json!("http://localhost")));
    }

    #[test]
    fn test_stored_client_id_wins_over_derived() {
        let config = AgentConfig::from_value(&json!({"clientId": "custom"}), Some("derived".into()));
        assert_eq!(config.client_id(), Some("custom"));
    }

    #[test]
    fn test_websocket_url_has_mqtt_path() {
        let config = AgentConfig::from_value(
            &json!({"domain": "example.com", "mqttProtocol": "wss", "mqttPort": 443}),
            None,
        );
        assert_eq!(config.mqtt_url(), "wss://example.com:443/mqtt");
    }

    #[test]
    fn test_set_value_rejects_invalid() {
        let mut config = AgentConfig::defaults(None);
        assert!(config.set_value("httpPort", json!("eighty")).is_err());
        assert!(config.set_value("httpPort", json!(70000)).is_err());
        assert_eq!(config.http_port, 443);

        config.set_value("httpPort", json!(8443)).unwrap();
        assert_eq!(config.get_value("httpPort"), Some(json!(8443)));
    }

    #[test]
    fn test_replace_is_all_or_nothing() {
        let mut config = AgentConfig::defaults(Some("dev-1".into()));
        config.set_value("domain", json!("old.example.com")).unwrap();

        let err = config.replace(&json!({"domain": "new.example.com", "mqttPort": 0}));
        assert!(err.is_err());
        assert_eq!(config.domain, "old.example.com");

        config.replace(&json!({"domain": "new.example.com"})).unwrap();
        assert_eq!(config.domain, "new.example.com");
        assert_eq!(config.client_id(), Some("dev-1"));
        assert_eq!(config.mqtt_port, 8883);
    }

    #[test]
    fn test_serializes_camel_case_with_extensions() {
        let mut config = AgentConfig::defaults(Some("dev-1".into()));
        config.set_value("measurementInterval", json!(30)).unwrap();
        let value = config.to_value();
        assert_eq!(value["clientId"], json!("dev-1"));
        assert_eq!(value["mqttProtocol"], json!("mqtts"));
        assert_eq!(value["measurementInterval"], json!(30));
    }

    #[test]
    fn test_session_settings_from_extension() {
        let config = AgentConfig::from_value(&json!({"session": {"keep_alive": 10}}), None);
        assert_eq!(config.session().keep_alive.as_secs(), 10);

        let config = AgentConfig::from_value(&json!({"session": "fast"}), None);
        assert_eq!(config.session(), SessionConfig::default());

        let config = AgentConfig::from_value(&json!({"session": {"keep_alive": 1e30}}), None);
        assert_eq!(config.session(), SessionConfig::default());
    }
}
