//! Relay and local connections for a remote access session

use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use dm_core::config::{AgentConfig, HttpProtocol};
use dm_core::Credentials;
use dm_protocol::operation::RemoteAccessConnect;

use super::{bridge, TunnelError};

/// WebSocket subprotocol the relay speaks
pub const RELAY_SUBPROTOCOL: &str = "binary";

/// Relay endpoint for a connection key
///
/// The relay lives on the REST host; `https` maps to `wss`.
pub fn relay_url(config: &AgentConfig, connection_key: &str) -> String {
    let scheme = match config.http_protocol {
        HttpProtocol::Http => "ws",
        HttpProtocol::Https => "wss",
    };
    format!(
        "{}://{}:{}/service/remoteaccess/device/{}",
        scheme,
        config.domain(),
        config.http_port,
        connection_key
    )
}

/// Handshake request carrying device credentials and the relay subprotocol
pub fn relay_request(url: &str, credentials: &Credentials) -> Result<Request, TunnelError> {
    let mut request = url.into_client_request()?;
    let auth = HeaderValue::from_str(&credentials.basic_auth_header())
        .map_err(|e| TunnelError::Request(e.to_string()))?;

    let headers = request.headers_mut();
    headers.insert(AUTHORIZATION, auth);
    headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(RELAY_SUBPROTOCOL));
    Ok(request)
}

/// Open the relay WebSocket
pub async fn connect_relay(
    url: &str,
    credentials: &Credentials,
) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, TunnelError> {
    let request = relay_request(url, credentials)?;
    let (stream, response) = tokio_tungstenite::connect_async(request).await?;
    tracing::debug!("Relay handshake completed with status {}", response.status());
    Ok(stream)
}

/// Connect to the local service the tunnel exposes
pub async fn connect_local(hostname: &str, port: u16) -> Result<TcpStream, TunnelError> {
    TcpStream::connect((hostname, port))
        .await
        .map_err(|source| TunnelError::Connect {
            target: format!("{}:{}", hostname, port),
            source,
        })
}

async fn run_tunnel(
    url: String,
    credentials: Credentials,
    target: RemoteAccessConnect,
    cancel: CancellationToken,
) -> Result<(), TunnelError> {
    let relay = connect_relay(&url, &credentials).await?;
    tracing::info!("Relay connected for {}:{}", target.hostname, target.port);

    let local = connect_local(&target.hostname, target.port).await?;
    tracing::info!("Tunnel open to {}:{}", target.hostname, target.port);

    bridge(relay, local, cancel).await
}

/// Run one tunnel in the background
///
/// Failures are logged; the operation was already reported when the tunnel
/// was requested. Cancelling `cancel` tears the tunnel down.
pub fn spawn_tunnel(
    config: &AgentConfig,
    credentials: Credentials,
    target: RemoteAccessConnect,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let url = relay_url(config, &target.connection_key);
    tokio::spawn(async move {
        let key = target.connection_key.clone();
        match run_tunnel(url, credentials, target, cancel).await {
            Ok(()) => tracing::info!("Tunnel {} closed", key),
            Err(e) => tracing::error!("Tunnel {} failed: {}", key, e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;

    fn config(protocol: &str) -> AgentConfig {
        AgentConfig::from_value(
            &json!({"domain": "example.com", "httpProtocol": protocol, "httpPort": 8443}),
            None,
        )
    }

    #[test]
    fn test_relay_url_follows_http_protocol() {
        assert_eq!(
            relay_url(&config("https"), "k-1"),
            "wss://example.com:8443/service/remoteaccess/device/k-1"
        );
        assert_eq!(
            relay_url(&config("http"), "k-1"),
            "ws://example.com:8443/service/remoteaccess/device/k-1"
        );
    }

    #[test]
    fn test_relay_request_headers() {
        let creds = Credentials::new("t1", "device_a", "pw");
        let request = relay_request("wss://example.com/service/remoteaccess/device/k-1", &creds).unwrap();

        let headers = request.headers();
        assert_eq!(headers[AUTHORIZATION], creds.basic_auth_header().as_str());
        assert_eq!(headers[SEC_WEBSOCKET_PROTOCOL], "binary");
        assert_eq!(request.uri().path(), "/service/remoteaccess/device/k-1");
    }

    #[test]
    fn test_relay_request_rejects_bad_url() {
        let creds = Credentials::new("t1", "device_a", "pw");
        assert!(relay_request("not a url", &creds).is_err());
    }

    #[tokio::test]
    async fn test_connect_local() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (accepted, connected) = tokio::join!(listener.accept(), connect_local("127.0.0.1", port));
        accepted.unwrap();
        connected.unwrap();

        drop(listener);
        match connect_local("127.0.0.1", port).await {
            Err(TunnelError::Connect { target, .. }) => assert_eq!(target, format!("127.0.0.1:{}", port)),
            other => panic!("expected connect failure, got {:?}", other.map(|_| ())),
        }
    }
}
