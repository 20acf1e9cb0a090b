//! Management session trait

use async_trait::async_trait;

use dm_protocol::{topic, Record};

use crate::error::SessionError;

/// Publish side of the management session
///
/// Processors and the dispatch engine only ever publish; subscriptions and
/// inbound routing are owned by the session event loop.
#[async_trait]
pub trait ManagementSession: Send + Sync {
    /// Publish a raw payload on `topic` with at-least-once delivery
    async fn publish(&self, topic: &str, payload: String) -> Result<(), SessionError>;

    /// Publish a template record on the upstream topic
    async fn publish_record(&self, record: &Record) -> Result<(), SessionError> {
        self.publish(topic::UPSTREAM, record.to_string()).await
    }
}
