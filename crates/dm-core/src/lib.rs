//! dm-core: Core abstractions and configuration for the device agent
//!
//! This crate provides the configuration model, the file-backed state
//! directory, the credential store, and the traits through which the agent
//! reaches its collaborators (the management session and the platform REST
//! surface).

pub mod config;
pub mod credentials;
pub mod error;
pub mod store;
pub mod traits;
pub mod types;

pub use credentials::{CredentialStore, Credentials};
pub use error::{ConfigError, RestError, SessionError};
pub use store::StateDir;
pub use types::ClientId;
