//! Remote access tunnels

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use dm_core::config::AgentConfig;
use dm_core::Credentials;
use dm_protocol::operation::{types, RemoteAccessConnect};
use dm_protocol::Operation;

use super::status::execute_reported;
use super::{OperationContext, OperationProcessor, ProcessorError};
use crate::tunnel;

/// Handles `c8y_RemoteAccessConnect`
///
/// The operation succeeds once the tunnel is started; relay and local
/// connection failures after that point are only logged.
pub struct RemoteAccessProcessor {
    config: AgentConfig,
    credentials: Credentials,
    tunnels: CancellationToken,
}

impl RemoteAccessProcessor {
    pub fn new(config: AgentConfig, credentials: Credentials) -> Self {
        Self {
            config,
            credentials,
            tunnels: CancellationToken::new(),
        }
    }

    /// Tear down every tunnel this processor started
    pub fn close_all(&self) {
        self.tunnels.cancel();
    }
}

impl Drop for RemoteAccessProcessor {
    fn drop(&mut self) {
        self.tunnels.cancel();
    }
}

#[async_trait]
impl OperationProcessor for RemoteAccessProcessor {
    fn operation_type(&self) -> &'static str {
        types::REMOTE_ACCESS_CONNECT
    }

    async fn initialize(&self, _ctx: &OperationContext) -> Result<(), ProcessorError> {
        Ok(())
    }

    async fn process_operation(
        &self,
        operation: &Operation,
        ctx: &OperationContext,
    ) -> Result<bool, ProcessorError> {
        if !ctx.accepts(operation, types::REMOTE_ACCESS_CONNECT) {
            return Ok(false);
        }

        execute_reported(ctx.session.as_ref(), types::REMOTE_ACCESS_CONNECT, async {
            let target: RemoteAccessConnect = operation.parse_fragment(types::REMOTE_ACCESS_CONNECT)?;
            tracing::info!(
                "Opening tunnel {} to {}:{}",
                target.connection_key,
                target.hostname,
                target.port
            );
            tunnel::spawn_tunnel(
                &self.config,
                self.credentials.clone(),
                target,
                self.tunnels.child_token(),
            );
            Ok(None)
        })
        .await
    }
}
