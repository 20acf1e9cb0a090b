//! Remote access tunnel
//!
//! Bridges a platform relay WebSocket to a local TCP service. One
//! `c8y_RemoteAccessConnect` operation yields one tunnel for as long as both
//! sides stay open; there is no reconnection.

mod bridge;
mod relay;

pub use bridge::bridge;
pub use relay::{connect_local, connect_relay, relay_request, relay_url, spawn_tunnel, RELAY_SUBPROTOCOL};

use std::io;

use thiserror::Error;

/// Tunnel failures; logged, never reported as operation status
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Invalid relay request: {0}")]
    Request(String),

    #[error("Relay connection failed: {0}")]
    Relay(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Cannot reach local service {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("Local socket error: {0}")]
    Io(#[from] io::Error),
}
