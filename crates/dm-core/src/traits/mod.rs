//! Interfaces to the agent's collaborators

mod platform;
mod session;

pub use platform::{BinaryUpload, NewEvent, PlatformApi, SourceRef, TenantInfo};
pub use session::ManagementSession;
