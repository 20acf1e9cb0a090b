//! dm-agent: Device management agent
//!
//! The agent provisions itself against the management platform, keeps a
//! management session open, and executes the operations the platform sends:
//! shell commands, restarts, log retrieval, configuration updates and remote
//! access tunnels.

pub mod backoff;
pub mod credentials;
pub mod dispatch;
pub mod events;
pub mod processors;
pub mod rest;
pub mod session;
pub mod state;
pub mod tunnel;

#[cfg(test)]
mod testing;

pub use dispatch::OperationDispatcher;
pub use state::AgentState;
