//! Device restart with reboot-survival bookkeeping
//!
//! A marker file is written before the host is rebooted. The next agent
//! start finds it during initialization, removes it and reports the restart
//! as successful.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dm_core::StateDir;
use dm_protocol::operation::types;
use dm_protocol::Operation;

use super::command::{run_program, COMMAND_TIMEOUT};
use super::status::{report_executing, report_failure, report_success};
use super::{OperationContext, OperationProcessor, ProcessorError};

/// Marker persisted while a restart is in flight
pub const RESTART_MARKER_FILE: &str = "restart.json";

const REBOOT_SCRIPT: &str = "reboot | sudo reboot";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestartMarker {
    #[serde(default)]
    operation_id: Option<String>,
    requested_at: DateTime<Utc>,
}

/// Handles `c8y_Restart`
pub struct RestartProcessor {
    state: StateDir,
    host_os: String,
    command: Vec<String>,
}

impl RestartProcessor {
    pub fn new(state: StateDir) -> Self {
        Self {
            state,
            host_os: std::env::consts::OS.to_string(),
            command: vec!["sh".into(), "-c".into(), REBOOT_SCRIPT.into()],
        }
    }

    /// Override the detected host OS
    pub fn with_host_os(mut self, os: impl Into<String>) -> Self {
        self.host_os = os.into();
        self
    }

    /// Override the reboot command (program followed by its arguments)
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    fn marker_error(source: std::io::Error) -> ProcessorError {
        ProcessorError::Persistence {
            file: RESTART_MARKER_FILE.to_string(),
            source,
        }
    }

    async fn reboot(&self) -> Result<(), ProcessorError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ProcessorError::CommandFailed("no restart command configured".into()))?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_program(program, &args, COMMAND_TIMEOUT).await.map(|_| ())
    }
}

#[async_trait]
impl OperationProcessor for RestartProcessor {
    fn operation_type(&self) -> &'static str {
        types::RESTART
    }

    async fn initialize(&self, ctx: &OperationContext) -> Result<(), ProcessorError> {
        if self.host_os != "linux" {
            return Err(ProcessorError::UnsupportedHost(types::RESTART));
        }

        if self.state.exists(RESTART_MARKER_FILE) {
            tracing::info!("Device was restarted by an operation, confirming it");
            self.state.remove(RESTART_MARKER_FILE).map_err(Self::marker_error)?;
            report_success(ctx.session.as_ref(), types::RESTART, None).await?;
        }
        Ok(())
    }

    async fn process_operation(
        &self,
        operation: &Operation,
        ctx: &OperationContext,
    ) -> Result<bool, ProcessorError> {
        if !ctx.accepts(operation, types::RESTART) {
            return Ok(false);
        }

        let session = ctx.session.as_ref();
        report_executing(session, types::RESTART).await?;

        let marker = RestartMarker {
            operation_id: operation.id.clone(),
            requested_at: Utc::now(),
        };
        if let Err(e) = self.state.write(RESTART_MARKER_FILE, &marker) {
            report_failure(session, types::RESTART, &Self::marker_error(e)).await?;
            return Ok(true);
        }

        // Success is reported by the next start, once the marker is found
        if let Err(e) = self.reboot().await {
            if let Err(remove) = self.state.remove(RESTART_MARKER_FILE) {
                tracing::warn!("Failed to remove restart marker: {}", remove);
            }
            report_failure(session, types::RESTART, &e).await?;
        }
        Ok(true)
    }
}
