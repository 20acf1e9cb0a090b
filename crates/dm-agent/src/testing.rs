//! Test doubles for the session and platform collaborators

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use dm_core::traits::{BinaryUpload, ManagementSession, NewEvent, PlatformApi, TenantInfo};
use dm_core::{ClientId, RestError, SessionError};
use dm_protocol::topic;

use crate::processors::OperationContext;

/// Session that records every publish
#[derive(Default)]
pub struct RecordingSession {
    published: Mutex<Vec<(String, String)>>,
}

impl RecordingSession {
    /// Payloads published upstream, in order
    pub fn records(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic::UPSTREAM)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

#[async_trait]
impl ManagementSession for RecordingSession {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), SessionError> {
        self.published.lock().unwrap().push((topic.to_string(), payload));
        Ok(())
    }
}

/// Platform that serves canned identity/event answers and keeps uploads
#[derive(Default)]
pub struct StubPlatform {
    pub events: Mutex<Vec<NewEvent>>,
    pub uploads: Mutex<Vec<(String, BinaryUpload)>>,
    pub failures: Mutex<VecDeque<RestError>>,
}

impl StubPlatform {
    fn next_failure(&self) -> Result<(), RestError> {
        match self.failures.lock().unwrap().pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PlatformApi for StubPlatform {
    async fn current_tenant(&self) -> Result<TenantInfo, RestError> {
        self.next_failure()?;
        Ok(TenantInfo::default())
    }

    async fn managed_object_id(&self, _id_type: &str, _external_id: &str) -> Result<String, RestError> {
        self.next_failure()?;
        Ok("4711".to_string())
    }

    async fn create_event(&self, event: &NewEvent) -> Result<String, RestError> {
        self.next_failure()?;
        self.events.lock().unwrap().push(event.clone());
        Ok("900".to_string())
    }

    async fn upload_event_binary(&self, event_id: &str, upload: BinaryUpload) -> Result<String, RestError> {
        self.next_failure()?;
        self.uploads.lock().unwrap().push((event_id.to_string(), upload));
        Ok(format!("https://example.com/event/events/{}/binaries", event_id))
    }
}

pub const CLIENT_ID: &str = "linux-0242ac110002";

/// Context over fresh doubles, returning the doubles for inspection
pub fn context() -> (OperationContext, Arc<RecordingSession>, Arc<StubPlatform>) {
    let session = Arc::new(RecordingSession::default());
    let platform = Arc::new(StubPlatform::default());
    let ctx = OperationContext::new(session.clone(), platform.clone(), ClientId::new(CLIENT_ID));
    (ctx, session, platform)
}

/// Operation JSON addressed to `target` with one fragment
pub fn operation(target: &str, operation_type: &str, fragment: serde_json::Value) -> dm_protocol::Operation {
    let mut value = serde_json::json!({
        "id": "42",
        "status": "PENDING",
        "externalSource": {"externalId": target, "type": "c8y_Serial"},
    });
    value[operation_type] = fragment;
    serde_json::from_value(value).unwrap()
}
