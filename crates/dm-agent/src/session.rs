//! Management session over MQTT
//!
//! [`connect`] splits the session in two: an [`MqttSession`] handle that
//! processors publish through, and a [`SessionEventLoop`] that owns the
//! connection, (re)subscribes after every connect, and routes inbound
//! operations to the dispatch task.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, Publish, QoS, SubscribeFilter, Transport,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dm_core::config::{AgentConfig, MqttProtocol, SessionConfig, DEFAULT_MAX_PACKET_SIZE};
use dm_core::traits::ManagementSession;
use dm_core::{ClientId, Credentials, SessionError};
use dm_protocol::{topic, Operation, Record, Template};

use crate::backoff::ExponentialBackoff;
use crate::events::{status_event, AgentStatus};

/// Build connection options for the configured transport
pub fn mqtt_options(
    config: &AgentConfig,
    client_id: &ClientId,
    credentials: &Credentials,
    session: &SessionConfig,
) -> MqttOptions {
    // WebSocket transports take the full URL as the host
    let host = if config.mqtt_protocol.is_websocket() {
        config.mqtt_url()
    } else {
        config.domain().to_string()
    };

    let mut options = MqttOptions::new(client_id.as_str(), host, config.mqtt_port);
    options
        .set_keep_alive(session.keep_alive.max(Duration::from_secs(1)))
        .set_clean_session(true)
        .set_credentials(credentials.username(), credentials.password.clone());

    // Status records are sized for the platform limit; never go below it
    let max_packet_size = session.max_packet_size.max(DEFAULT_MAX_PACKET_SIZE);
    options.set_max_packet_size(max_packet_size, max_packet_size);

    match config.mqtt_protocol {
        MqttProtocol::Mqtt => {}
        MqttProtocol::Mqtts => {
            options.set_transport(Transport::tls_with_default_config());
        }
        MqttProtocol::Ws => {
            options.set_transport(Transport::Ws);
        }
        MqttProtocol::Wss => {
            options.set_transport(Transport::wss_with_default_config());
        }
    }
    options
}

/// Why the event loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The platform refused the credentials
    NotAuthorized,
    /// Shutdown was requested
    Shutdown,
}

/// Publish handle for the management session
#[derive(Clone)]
pub struct MqttSession {
    client: AsyncClient,
}

impl MqttSession {
    /// Ask the event loop to disconnect cleanly
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.client
            .disconnect()
            .await
            .map_err(|_| SessionError::Closed)
    }
}

#[async_trait]
impl ManagementSession for MqttSession {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), SessionError> {
        tracing::debug!("Publishing on {}: {}", topic, payload);
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.into_bytes())
            .await
            .map_err(|e| SessionError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Open the management session with device credentials
pub fn connect(
    config: &AgentConfig,
    client_id: &ClientId,
    credentials: &Credentials,
) -> (MqttSession, SessionEventLoop) {
    let settings = config.session();
    let options = mqtt_options(config, client_id, credentials, &settings);
    let (client, eventloop) = AsyncClient::new(options, settings.request_capacity);

    tracing::info!("Connecting management session to {}", config.mqtt_url());
    let session = MqttSession {
        client: client.clone(),
    };
    let event_loop = SessionEventLoop {
        client,
        eventloop,
        backoff: ExponentialBackoff::from_config(&settings.backoff),
        connected_before: false,
        in_outage: false,
    };
    (session, event_loop)
}

/// Drives the MQTT connection
pub struct SessionEventLoop {
    client: AsyncClient,
    eventloop: EventLoop,
    backoff: ExponentialBackoff,
    connected_before: bool,
    in_outage: bool,
}

impl SessionEventLoop {
    /// Run until the credentials are refused, the session is disconnected,
    /// or `cancel` fires
    ///
    /// Connection errors are retried with backoff; operations arriving on
    /// the notification topics are forwarded to `operations`.
    pub async fn run(
        mut self,
        operations: mpsc::Sender<Operation>,
        cancel: CancellationToken,
    ) -> DisconnectReason {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return DisconnectReason::Shutdown,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => self.on_connected(),
                Ok(Event::Incoming(Packet::Publish(publish))) => route(publish, &operations).await,
                Ok(Event::Incoming(Packet::SubAck(_))) => {
                    tracing::debug!("Subscribed to management topics");
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    tracing::info!("Management session disconnected");
                    return DisconnectReason::Shutdown;
                }
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(code)) if is_auth_refusal(code) => {
                    tracing::error!("Management session refused: {:?}", code);
                    return DisconnectReason::NotAuthorized;
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    tracing::warn!("Management session error: {}, retrying in {:?}", e, delay);
                    self.on_outage(&e.to_string());

                    tokio::select! {
                        _ = cancel.cancelled() => return DisconnectReason::Shutdown,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn on_connected(&mut self) {
        self.backoff.reset();
        self.in_outage = false;

        let filters = topic::SUBSCRIPTIONS
            .iter()
            .map(|t| SubscribeFilter::new(t.to_string(), QoS::AtLeastOnce));
        if let Err(e) = self.client.try_subscribe_many(filters) {
            tracing::error!("Failed to subscribe to management topics: {}", e);
        }

        if self.connected_before {
            tracing::info!("Management session reconnected");
            self.enqueue(status_event(AgentStatus::Reconnect, None));
            // Pick up operations issued while offline
            self.enqueue(Record::new(Template::RequestPendingOperations));
        } else {
            tracing::info!("Management session connected");
            self.enqueue(status_event(AgentStatus::Startup, None));
        }
        self.connected_before = true;
    }

    /// Queue a disconnect event once per outage; it is delivered after reconnecting
    fn on_outage(&mut self, reason: &str) {
        if self.in_outage || !self.connected_before {
            return;
        }
        self.in_outage = true;
        self.enqueue(status_event(AgentStatus::Disconnect, Some(reason)));
    }

    fn enqueue(&self, record: Record) {
        let payload = record.to_string();
        if let Err(e) = self
            .client
            .try_publish(topic::UPSTREAM, QoS::AtLeastOnce, false, payload.into_bytes())
        {
            tracing::warn!("Failed to queue {} record: {}", record.code(), e);
        }
    }
}

fn is_auth_refusal(code: ConnectReturnCode) -> bool {
    matches!(
        code,
        ConnectReturnCode::NotAuthorized | ConnectReturnCode::BadUserNamePassword
    )
}

/// Hand operations to the dispatch task; log everything else
async fn route(publish: Publish, operations: &mpsc::Sender<Operation>) {
    let payload = String::from_utf8_lossy(&publish.payload);

    if topic::is_operation_topic(&publish.topic) {
        match Operation::from_json(&payload) {
            Ok(operation) => {
                tracing::info!("Received {}", operation.describe());
                if operations.send(operation).await.is_err() {
                    tracing::error!("Dispatch task is gone, dropping operation");
                }
            }
            Err(e) => tracing::warn!("Ignoring undecodable operation on {}: {}", publish.topic, e),
        }
        return;
    }

    match publish.topic.as_str() {
        "error" | "s/e" => tracing::warn!("Platform error on {}: {}", publish.topic, payload),
        _ => tracing::debug!("Message on {}: {}", publish.topic, payload),
    }
}
