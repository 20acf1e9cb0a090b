//! Device management agent daemon
//!
//! Obtains device credentials, opens the management session and serves
//! operations until interrupted. A session refused as not authorized sends
//! the agent back through the credential lifecycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dm_agent::credentials::{obtain_credentials, PlatformProvisioner, TokioSleeper};
use dm_agent::events::{status_event, AgentStatus};
use dm_agent::processors::OperationContext;
use dm_agent::rest::RestClient;
use dm_agent::session::{self, DisconnectReason};
use dm_agent::{AgentState, OperationDispatcher};
use dm_core::traits::ManagementSession;
use dm_core::{Credentials, StateDir};

/// Exit status when the device has no usable client id
const EXIT_NO_CLIENT_ID: i32 = 3;

const OPERATION_QUEUE_CAPACITY: usize = 64;

/// How long the session gets to flush the shutdown event
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "dm-agent")]
#[command(about = "Device management agent - provisions the device and executes platform operations")]
#[command(version)]
struct Args {
    /// Directory holding configuration, credentials and restart markers
    #[arg(long, env = "DM_AGENT_STATE_DIR", default_value = "cfg")]
    state_dir: PathBuf,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Device agent starting, state in {:?}", args.state_dir);

    let Some(state) = AgentState::load(StateDir::new(&args.state_dir)) else {
        tracing::error!("No client id configured and none could be derived from the network interfaces");
        std::process::exit(EXIT_NO_CLIENT_ID);
    };
    tracing::info!("Client id: {}", state.client_id);
    tracing::info!("Platform: {}", state.config.mqtt_url());

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Received interrupt, shutting down"),
                Err(e) => tracing::error!("Failed to listen for interrupt: {}", e),
            }
            shutdown.cancel();
        });
    }

    let store = state.credential_store();
    let sleeper = TokioSleeper;

    // Main loop: credentials, then a session until it ends
    loop {
        let provisioner = PlatformProvisioner::new(
            &state.config,
            &state.client_id,
            store.bootstrap_identity(),
            &sleeper,
        );
        let credentials = tokio::select! {
            _ = shutdown.cancelled() => break,
            credentials = obtain_credentials(&store, &provisioner, &sleeper) => credentials,
        };
        tracing::info!("Using device credentials for {}", credentials.username());

        match run_session(&state, credentials, &shutdown).await? {
            DisconnectReason::Shutdown => break,
            DisconnectReason::NotAuthorized => {
                tracing::warn!("Device credentials were refused, provisioning again");
                if let Err(e) = store.clear() {
                    tracing::warn!("Failed to clear credentials: {}", e);
                }
            }
        }
    }

    tracing::info!("Device agent stopped");
    Ok(())
}

/// Serve one management session
async fn run_session(
    state: &AgentState,
    credentials: Credentials,
    shutdown: &CancellationToken,
) -> Result<DisconnectReason> {
    let platform = RestClient::new(state.config.http_url(), credentials.clone())
        .context("Failed to create REST client")?;
    let (session, event_loop) = session::connect(&state.config, &state.client_id, &credentials);
    let session = Arc::new(session);

    let ctx = OperationContext::new(session.clone(), Arc::new(platform), state.client_id.clone());
    let dispatcher = OperationDispatcher::new(ctx);
    let processors = state.processors(&credentials);
    let (operations_tx, mut operations_rx) = mpsc::channel(OPERATION_QUEUE_CAPACITY);

    // Initialization runs alongside the event loop, which has to deliver its publishes
    let dispatch_task = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.initialize(processors).await;
            if let Err(e) = dispatcher.advertise().await {
                tracing::error!("Failed to advertise supported operations: {}", e);
            }
            while let Some(operation) = operations_rx.recv().await {
                dispatcher.submit(operation);
            }
        })
    };

    let loop_cancel = CancellationToken::new();
    let mut event_task = tokio::spawn(event_loop.run(operations_tx, loop_cancel.clone()));

    let reason = tokio::select! {
        result = &mut event_task => result.context("Session event loop failed")?,
        _ = shutdown.cancelled() => {
            let event = status_event(AgentStatus::Shutdown, None);
            if let Err(e) = session.publish_record(&event).await {
                tracing::warn!("Failed to publish shutdown event: {}", e);
            }
            if let Err(e) = session.disconnect().await {
                tracing::warn!("Failed to disconnect cleanly: {}", e);
            }
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut event_task).await.is_err() {
                tracing::warn!("Session did not close within {:?}", SHUTDOWN_GRACE);
                loop_cancel.cancel();
            }
            DisconnectReason::Shutdown
        }
    };

    dispatch_task.abort();
    Ok(reason)
}
