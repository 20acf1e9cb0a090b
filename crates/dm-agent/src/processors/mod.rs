//! Operation processors
//!
//! Each processor handles one operation type. The dispatch engine offers
//! every operation to the active processors in registration order; a
//! processor claims it by returning `Ok(true)` from
//! [`OperationProcessor::process_operation`], after publishing an executing
//! status and exactly one terminal status.

mod command;
mod configuration;
mod logfile;
mod remote_access;
mod restart;
pub mod status;

pub use command::{run_program, run_shell, CommandProcessor, COMMAND_TIMEOUT};
pub use configuration::ConfigurationProcessor;
pub use logfile::{journal_time, LogfileProcessor, LOGFILE_EVENT_TYPE};
pub use remote_access::RemoteAccessProcessor;
pub use restart::{RestartProcessor, RESTART_MARKER_FILE};

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use dm_core::traits::{ManagementSession, PlatformApi};
use dm_core::{ClientId, ConfigError, RestError, SessionError};
use dm_protocol::{Operation, ProtocolError};

/// What processors get to work with
#[derive(Clone)]
pub struct OperationContext {
    pub session: Arc<dyn ManagementSession>,
    pub platform: Arc<dyn PlatformApi>,
    pub client_id: ClientId,
}

impl OperationContext {
    pub fn new(
        session: Arc<dyn ManagementSession>,
        platform: Arc<dyn PlatformApi>,
        client_id: ClientId,
    ) -> Self {
        Self {
            session,
            platform,
            client_id,
        }
    }

    /// Whether `operation` carries an `operation_type` fragment and targets this device
    pub fn accepts(&self, operation: &Operation, operation_type: &str) -> bool {
        operation.is_for(operation_type, self.client_id.as_str())
    }
}

/// Handler for one operation type
#[async_trait]
pub trait OperationProcessor: Send + Sync {
    /// Operation type advertised to the platform (`c8y_Command`, ...)
    fn operation_type(&self) -> &'static str;

    /// One-time setup; a failure withdraws the processor for this session
    async fn initialize(&self, ctx: &OperationContext) -> Result<(), ProcessorError>;

    /// Handle `operation`, returning whether it was claimed
    async fn process_operation(
        &self,
        operation: &Operation,
        ctx: &OperationContext,
    ) -> Result<bool, ProcessorError>;
}

/// Processor failures; reported to the platform as their display text
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Invalid operation payload: {0}")]
    InvalidPayload(#[from] ProtocolError),

    #[error("{0}")]
    CommandFailed(String),

    #[error("command timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Platform request failed: {0}")]
    Platform(#[from] RestError),

    #[error("Failed to publish status: {0}")]
    Session(#[from] SessionError),

    #[error("Failed to persist {file}: {source}")]
    Persistence {
        file: String,
        #[source]
        source: io::Error,
    },

    #[error("{0} is only supported on linux")]
    UnsupportedHost(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid time {value:?}: {reason}")]
    InvalidTime { value: String, reason: String },
}
