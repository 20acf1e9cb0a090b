//! Bootstrap handshake
//!
//! Exchanges the provisioning identity for permanent device credentials. The
//! device subscribes to `s/dcr` and, once subscribed, keeps publishing an
//! empty credential request on `s/ucr` until the platform answers with a
//! `70,<tenant>,<user>,<password>` record.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet, QoS};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use dm_core::config::{AgentConfig, SessionConfig};
use dm_core::{ClientId, Credentials, SessionError};
use dm_protocol::{topic, Record, Template};

use crate::session::mqtt_options;

/// Cadence of credential requests
pub const REQUEST_INTERVAL: Duration = Duration::from_secs(10);

/// How long a graceful close may take before the link task is aborted
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Provisioning link closed before credentials arrived")]
    LinkClosed,
}

/// What the provisioning link reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Subscribed to the credential response topic
    Ready,
    /// A message arrived
    Message { topic: String, payload: String },
    /// Connection trouble; the link keeps trying
    Error(String),
}

/// Session used for the handshake, authenticated with the provisioning identity
#[async_trait]
pub trait ProvisioningLink: Send {
    /// Publish one (empty) credential request
    async fn request_credentials(&mut self) -> Result<(), SessionError>;

    /// Next event, or `None` once the link is gone
    async fn next_event(&mut self) -> Option<LinkEvent>;

    /// Disconnect gracefully
    async fn close(&mut self);
}

/// Run the handshake until credentials arrive
///
/// Malformed responses and anything on other topics are ignored. Requests
/// only start once the link reports [`LinkEvent::Ready`].
pub async fn bootstrap(link: &mut dyn ProvisioningLink) -> Result<Credentials, BootstrapError> {
    let mut ticker: Option<Interval> = None;

    loop {
        tokio::select! {
            _ = next_tick(&mut ticker) => {
                tracing::debug!("Requesting device credentials");
                if let Err(e) = link.request_credentials().await {
                    tracing::warn!("Credential request failed: {}", e);
                }
            }
            event = link.next_event() => match event {
                None => return Err(BootstrapError::LinkClosed),
                Some(LinkEvent::Ready) => {
                    if ticker.is_none() {
                        tracing::info!("Waiting for device credentials (register the device on the platform)");
                        let mut interval = tokio::time::interval(REQUEST_INTERVAL);
                        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        ticker = Some(interval);
                    }
                }
                Some(LinkEvent::Message { topic: from, payload }) => {
                    if from != topic::CREDENTIAL_RESPONSE {
                        tracing::debug!("Ignoring message on {} during bootstrap", from);
                        continue;
                    }
                    match parse_credentials(&payload) {
                        Some(credentials) => {
                            tracing::info!("Received device credentials for {}", credentials.username());
                            link.close().await;
                            return Ok(credentials);
                        }
                        None => tracing::debug!("Ignoring malformed credential response"),
                    }
                }
                Some(LinkEvent::Error(reason)) => {
                    tracing::warn!("Provisioning connection error: {}", reason);
                }
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Credentials from a `70` record with exactly three non-empty fields
pub fn parse_credentials(payload: &str) -> Option<Credentials> {
    let record = Record::parse(payload).ok()?;
    if record.template() != Some(Template::BootstrapCredentials) {
        return None;
    }
    match record.fields() {
        [tenant, user, password] => {
            let credentials = Credentials::new(tenant.as_str(), user.as_str(), password.as_str());
            credentials.is_complete().then_some(credentials)
        }
        _ => None,
    }
}

/// [`ProvisioningLink`] over MQTT
pub struct MqttProvisioningLink {
    client: AsyncClient,
    events: mpsc::Receiver<LinkEvent>,
    task: JoinHandle<()>,
}

impl MqttProvisioningLink {
    /// Connect with the provisioning identity; the connection is made by a background task
    pub fn connect(config: &AgentConfig, client_id: &ClientId, identity: &Credentials) -> Self {
        let session = SessionConfig::default();
        let options = mqtt_options(config, client_id, identity, &session);
        let (client, eventloop) = AsyncClient::new(options, session.request_capacity);
        let (tx, events) = mpsc::channel(16);

        let task = tokio::spawn(run_link(client.clone(), eventloop, tx));
        Self { client, events, task }
    }
}

#[async_trait]
impl ProvisioningLink for MqttProvisioningLink {
    async fn request_credentials(&mut self) -> Result<(), SessionError> {
        self.client
            .publish(topic::CREDENTIAL_REQUEST, QoS::AtLeastOnce, false, Vec::<u8>::new())
            .await
            .map_err(|e| SessionError::Publish {
                topic: topic::CREDENTIAL_REQUEST.to_string(),
                reason: e.to_string(),
            })
    }

    async fn next_event(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!("Provisioning disconnect failed: {}", e);
        }
        if tokio::time::timeout(CLOSE_TIMEOUT, &mut self.task).await.is_err() {
            self.task.abort();
        }
    }
}

impl Drop for MqttProvisioningLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Poll the provisioning connection and forward what matters to the handshake
async fn run_link(client: AsyncClient, mut eventloop: EventLoop, tx: mpsc::Sender<LinkEvent>) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::debug!("Provisioning session connected");
                match client.try_subscribe(topic::CREDENTIAL_RESPONSE, QoS::AtLeastOnce) {
                    Ok(()) => continue,
                    Err(e) => LinkEvent::Error(e.to_string()),
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => LinkEvent::Ready,
            Ok(Event::Incoming(Packet::Publish(publish))) => LinkEvent::Message {
                topic: publish.topic.clone(),
                payload: String::from_utf8_lossy(&publish.payload).into_owned(),
            },
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => continue,
            Err(e) => {
                if tx.send(LinkEvent::Error(e.to_string())).await.is_err() {
                    break;
                }
                tokio::time::sleep(REQUEST_INTERVAL).await;
                continue;
            }
        };

        if tx.send(event).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Link fed from a channel, counting credential requests
    struct FakeLink {
        events: mpsc::Receiver<LinkEvent>,
        requests: Arc<Mutex<usize>>,
        closed: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl ProvisioningLink for FakeLink {
        async fn request_credentials(&mut self) -> Result<(), SessionError> {
            *self.requests.lock().unwrap() += 1;
            Ok(())
        }

        async fn next_event(&mut self) -> Option<LinkEvent> {
            self.events.recv().await
        }

        async fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    struct Harness {
        tx: mpsc::Sender<LinkEvent>,
        requests: Arc<Mutex<usize>>,
        closed: Arc<Mutex<bool>>,
        handle: JoinHandle<Result<Credentials, BootstrapError>>,
    }

    fn start() -> Harness {
        let (tx, events) = mpsc::channel(16);
        let requests = Arc::new(Mutex::new(0));
        let closed = Arc::new(Mutex::new(false));
        let mut link = FakeLink {
            events,
            requests: requests.clone(),
            closed: closed.clone(),
        };
        let handle = tokio::spawn(async move { bootstrap(&mut link).await });
        Harness { tx, requests, closed, handle }
    }

    fn dcr(payload: &str) -> LinkEvent {
        LinkEvent::Message {
            topic: topic::CREDENTIAL_RESPONSE.to_string(),
            payload: payload.to_string(),
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_parse_credentials() {
        let creds = parse_credentials("70,t42,device_linux-aabb,s3cret").unwrap();
        assert_eq!(creds, Credentials::new("t42", "device_linux-aabb", "s3cret"));

        assert!(parse_credentials("").is_none());
        assert!(parse_credentials("70").is_none());
        assert!(parse_credentials("70,t42,user").is_none());
        assert!(parse_credentials("70,t42,,pw").is_none());
        assert!(parse_credentials("70,t42,user,pw,extra").is_none());
        assert!(parse_credentials("71,t42,user,pw").is_none());
        assert!(parse_credentials("{\"tenant\":\"t42\"}").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_start_after_subscription() {
        let h = start();

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(*h.requests.lock().unwrap(), 0);

        h.tx.send(LinkEvent::Ready).await.unwrap();
        settle().await;
        assert_eq!(*h.requests.lock().unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(*h.requests.lock().unwrap(), 3);
        h.handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_responses_never_resolve() {
        let h = start();
        h.tx.send(LinkEvent::Ready).await.unwrap();

        for payload in ["", "70", "70,t,u", "70,,u,p", "41,t,u,p", "garbage"] {
            h.tx.send(dcr(payload)).await.unwrap();
        }
        h.tx
            .send(LinkEvent::Message {
                topic: "s/e".into(),
                payload: "70,t,u,p".into(),
            })
            .await
            .unwrap();
        h.tx.send(LinkEvent::Error("connection reset".into())).await.unwrap();

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(!h.handle.is_finished());
        assert_eq!(*h.requests.lock().unwrap(), 4);
        h.handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_response_resolves_and_closes() {
        let h = start();
        h.tx.send(LinkEvent::Ready).await.unwrap();
        h.tx.send(dcr("70,t42,device_x,pw")).await.unwrap();

        let creds = h.handle.await.unwrap().unwrap();
        assert_eq!(creds.username(), "t42/device_x");
        assert!(*h.closed.lock().unwrap());

        let requests = *h.requests.lock().unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(*h.requests.lock().unwrap(), requests);
    }

    #[tokio::test]
    async fn test_closed_link_is_an_error() {
        let h = start();
        drop(h.tx);
        assert!(matches!(h.handle.await.unwrap(), Err(BootstrapError::LinkClosed)));
    }
}
