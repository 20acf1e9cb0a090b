//! Platform REST surface

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RestError;

/// Tenant the credentials authenticate against
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domain_name: Option<String>,
}

/// Reference to a managed object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub id: String,
}

/// Event to create on the platform
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEvent {
    pub source: SourceRef,
    #[serde(rename = "type")]
    pub event_type: String,
    pub text: String,
    pub time: DateTime<Utc>,
}

impl NewEvent {
    /// Event stamped with the current time
    pub fn new(source_id: impl Into<String>, event_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: SourceRef { id: source_id.into() },
            event_type: event_type.into(),
            text: text.into(),
            time: Utc::now(),
        }
    }
}

/// File attached to an event
#[derive(Debug, Clone)]
pub struct BinaryUpload {
    pub file_name: String,
    pub content_type: String,
    pub content: Bytes,
}

/// Calls the agent makes against the platform REST API
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Tenant of the authenticated user; doubles as a credential check
    async fn current_tenant(&self) -> Result<TenantInfo, RestError>;

    /// Managed object id registered for an external id
    async fn managed_object_id(&self, id_type: &str, external_id: &str) -> Result<String, RestError>;

    /// Create an event, returning its id
    async fn create_event(&self, event: &NewEvent) -> Result<String, RestError>;

    /// Attach a file to an event, returning the attachment's URL
    async fn upload_event_binary(&self, event_id: &str, upload: BinaryUpload) -> Result<String, RestError>;
}
