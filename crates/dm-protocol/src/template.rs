//! Template numbers used by the agent
//!
//! Each record starts with a template number that tells the platform how to
//! interpret the remaining fields.

use std::fmt;

/// Known record templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Template {
    /// Device credentials pushed during bootstrap (`70,<tenant>,<user>,<password>`)
    BootstrapCredentials = 70,
    /// Report the current configuration text
    SetConfiguration = 113,
    /// Advertise supported operation types
    SetSupportedOperations = 114,
    /// Advertise available log files
    SetSupportedLogs = 118,
    /// Create an event
    CreateEvent = 400,
    /// Ask the platform to resend pending operations
    RequestPendingOperations = 500,
    /// Operation is executing
    OperationExecuting = 501,
    /// Operation failed
    OperationFailed = 502,
    /// Operation succeeded
    OperationSuccessful = 503,
}

impl Template {
    /// Convert to the numeric template id
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Convert from the numeric template id
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            70 => Some(Self::BootstrapCredentials),
            113 => Some(Self::SetConfiguration),
            114 => Some(Self::SetSupportedOperations),
            118 => Some(Self::SetSupportedLogs),
            400 => Some(Self::CreateEvent),
            500 => Some(Self::RequestPendingOperations),
            501 => Some(Self::OperationExecuting),
            502 => Some(Self::OperationFailed),
            503 => Some(Self::OperationSuccessful),
            _ => None,
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Status an operation can be moved to by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Executing,
    Failed,
    Successful,
}

impl OperationStatus {
    /// Template used to report this status
    pub fn template(&self) -> Template {
        match self {
            Self::Executing => Template::OperationExecuting,
            Self::Failed => Template::OperationFailed,
            Self::Successful => Template::OperationSuccessful,
        }
    }

    /// Whether this status ends the operation
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Executing)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Executing => "EXECUTING",
            Self::Failed => "FAILED",
            Self::Successful => "SUCCESSFUL",
        };
        f.write_str(name)
    }
}
