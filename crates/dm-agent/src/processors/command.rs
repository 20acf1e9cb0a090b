//! Shell command execution

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use dm_protocol::operation::{types, CommandRequest};
use dm_protocol::Operation;

use super::status::execute_reported;
use super::{OperationContext, OperationProcessor, ProcessorError};

/// Hard limit on a single command
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Run `program` without a shell, returning stdout on a zero exit
///
/// A non-zero exit fails with stderr, or with the exit reason when stderr is
/// empty. The child is killed if `timeout` elapses.
pub async fn run_program(program: &str, args: &[&str], timeout: Duration) -> Result<String, ProcessorError> {
    tracing::info!("Executing {} {:?}", program, args);

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessorError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output.map_err(|source| ProcessorError::Spawn {
            program: program.to_string(),
            source,
        })?,
        Err(_) => {
            tracing::warn!("{} did not finish within {:?}", program, timeout);
            return Err(ProcessorError::Timeout(timeout));
        }
    };

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    tracing::info!("{} exited with {}", program, output.status);
    if stderr.is_empty() {
        Err(ProcessorError::CommandFailed(exit_reason(output.status)))
    } else {
        Err(ProcessorError::CommandFailed(stderr))
    }
}

/// Run `script` with `sh -c`
pub async fn run_shell(script: &str, timeout: Duration) -> Result<String, ProcessorError> {
    run_program("sh", &["-c", script], timeout).await
}

fn exit_reason(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("command exited with status {}", code),
        None => "command terminated by signal".to_string(),
    }
}

/// Handles `c8y_Command`
pub struct CommandProcessor {
    timeout: Duration,
}

impl CommandProcessor {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for CommandProcessor {
    fn default() -> Self {
        Self::with_timeout(COMMAND_TIMEOUT)
    }
}

#[async_trait]
impl OperationProcessor for CommandProcessor {
    fn operation_type(&self) -> &'static str {
        types::COMMAND
    }

    async fn initialize(&self, _ctx: &OperationContext) -> Result<(), ProcessorError> {
        Ok(())
    }

    async fn process_operation(
        &self,
        operation: &Operation,
        ctx: &OperationContext,
    ) -> Result<bool, ProcessorError> {
        if !ctx.accepts(operation, types::COMMAND) {
            return Ok(false);
        }

        execute_reported(ctx.session.as_ref(), types::COMMAND, async {
            let request: CommandRequest = operation.parse_fragment(types::COMMAND)?;
            run_shell(&request.text, self.timeout).await.map(Some)
        })
        .await
    }
}
