//! Operation model
//!
//! An operation is a JSON object with an id, an external source naming the
//! target device, and one fragment per operation type keyed by the type name
//! (`{"c8y_Command": {"text": "uptime"}}`).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::serde_utils::{lenient_uint, string_or_number};

/// Operation type names understood by the agent
pub mod types {
    pub const COMMAND: &str = "c8y_Command";
    pub const RESTART: &str = "c8y_Restart";
    pub const LOGFILE_REQUEST: &str = "c8y_LogfileRequest";
    pub const CONFIGURATION: &str = "c8y_Configuration";
    pub const REMOTE_ACCESS_CONNECT: &str = "c8y_RemoteAccessConnect";
}

/// External identity the operation is addressed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSource {
    pub external_id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub id_type: Option<String>,
}

/// A remotely issued unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(
        default,
        deserialize_with = "string_or_number::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_source: Option<ExternalSource>,
    /// Remaining keys, including the type-specific fragments
    #[serde(flatten)]
    pub fragments: Map<String, Value>,
}

impl Operation {
    /// Decode an operation from its JSON notification payload
    pub fn from_json(payload: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// External id of the device this operation targets
    pub fn target(&self) -> Option<&str> {
        self.external_source
            .as_ref()
            .map(|source| source.external_id.as_str())
    }

    /// Whether the operation is addressed to `client_id`
    pub fn is_addressed_to(&self, client_id: &str) -> bool {
        self.target() == Some(client_id)
    }

    /// Raw fragment for `operation_type`
    pub fn fragment(&self, operation_type: &str) -> Option<&Value> {
        self.fragments.get(operation_type)
    }

    /// Whether a processor for `operation_type` on device `client_id` should take this operation
    pub fn is_for(&self, operation_type: &str, client_id: &str) -> bool {
        self.fragment(operation_type).is_some() && self.is_addressed_to(client_id)
    }

    /// Decode the fragment for `operation_type` into a typed payload
    pub fn parse_fragment<T: DeserializeOwned>(&self, operation_type: &str) -> Result<T, ProtocolError> {
        let value = self
            .fragment(operation_type)
            .ok_or_else(|| ProtocolError::MissingFragment(operation_type.to_string()))?;
        T::deserialize(value).map_err(|source| ProtocolError::InvalidFragment {
            fragment: operation_type.to_string(),
            source,
        })
    }

    /// Short description for log lines
    pub fn describe(&self) -> String {
        let types: Vec<&str> = self
            .fragments
            .keys()
            .filter(|key| key.starts_with("c8y_"))
            .map(String::as_str)
            .collect();
        format!(
            "operation {} [{}] for {}",
            self.id.as_deref().unwrap_or("?"),
            types.join(","),
            self.target().unwrap_or("?")
        )
    }
}

/// `c8y_Command` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandRequest {
    pub text: String,
}

/// `c8y_LogfileRequest` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogfileRequest {
    pub log_file: String,
    pub date_from: String,
    pub date_to: String,
    #[serde(default)]
    pub search_text: Option<String>,
    #[serde(default = "default_maximum_lines", deserialize_with = "lenient_uint::deserialize")]
    pub maximum_lines: u32,
}

fn default_maximum_lines() -> u32 {
    1000
}

/// `c8y_Configuration` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConfigurationUpdate {
    pub config: String,
}

/// `c8y_RemoteAccessConnect` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAccessConnect {
    pub hostname: String,
    #[serde(deserialize_with = "lenient_uint::deserialize")]
    pub port: u16,
    pub connection_key: String,
}
