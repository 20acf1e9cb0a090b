//! Remote configuration updates

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use dm_core::config::{save_config, AgentConfig};
use dm_core::traits::ManagementSession;
use dm_core::{ConfigError, StateDir};
use dm_protocol::operation::{types, ConfigurationUpdate};
use dm_protocol::{Operation, Record, Template};

use super::status::execute_reported;
use super::{OperationContext, OperationProcessor, ProcessorError};

/// Handles `c8y_Configuration`
///
/// Accepted changes are persisted and reported back; the running agent keeps
/// its current connection settings until the next start.
pub struct ConfigurationProcessor {
    config: Mutex<AgentConfig>,
    state: StateDir,
}

impl ConfigurationProcessor {
    pub fn new(config: AgentConfig, state: StateDir) -> Self {
        Self {
            config: Mutex::new(config),
            state,
        }
    }

    async fn report(session: &dyn ManagementSession, config: &AgentConfig) -> Result<(), ProcessorError> {
        let record = Record::new(Template::SetConfiguration).with_field(config.to_value().to_string());
        session.publish_record(&record).await?;
        Ok(())
    }

    async fn apply(&self, operation: &Operation, ctx: &OperationContext) -> Result<Option<String>, ProcessorError> {
        let update: ConfigurationUpdate = operation.parse_fragment(types::CONFIGURATION)?;
        let document: Value = serde_json::from_str(&update.config).map_err(ConfigError::from)?;

        let mut config = self.config.lock().await;
        let mut next = config.clone();
        next.replace(&document)?;
        save_config(&self.state, &next)?;
        *config = next;

        tracing::info!("Configuration updated, changes apply at next start");
        Self::report(ctx.session.as_ref(), &config).await?;
        Ok(None)
    }
}

#[async_trait]
impl OperationProcessor for ConfigurationProcessor {
    fn operation_type(&self) -> &'static str {
        types::CONFIGURATION
    }

    async fn initialize(&self, ctx: &OperationContext) -> Result<(), ProcessorError> {
        let config = self.config.lock().await;
        Self::report(ctx.session.as_ref(), &config).await
    }

    async fn process_operation(
        &self,
        operation: &Operation,
        ctx: &OperationContext,
    ) -> Result<bool, ProcessorError> {
        if !ctx.accepts(operation, types::CONFIGURATION) {
            return Ok(false);
        }
        execute_reported(ctx.session.as_ref(), types::CONFIGURATION, self.apply(operation, ctx)).await
    }
}
