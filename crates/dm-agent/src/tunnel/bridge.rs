//! Byte forwarding between the relay socket and the local service

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use super::TunnelError;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// What an inbound relay frame means for the local side
enum Inbound {
    Data(Vec<u8>),
    Close,
    Skip,
}

fn inbound(message: Message) -> Inbound {
    match message {
        Message::Binary(data) => Inbound::Data(data),
        Message::Text(text) => Inbound::Data(text.into_bytes()),
        Message::Close(_) => Inbound::Close,
        // Pings are answered by the WebSocket layer itself
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Inbound::Skip,
    }
}

/// Relay frames into the local socket until the relay closes or `cancel` fires
async fn relay_to_local<S, W>(relay: &mut S, local: &mut W, cancel: &CancellationToken) -> Result<(), TunnelError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            message = relay.next() => message,
        };
        match message.transpose()?.map(inbound) {
            None | Some(Inbound::Close) => return Ok(()),
            Some(Inbound::Data(data)) => local.write_all(&data).await?,
            Some(Inbound::Skip) => {}
        }
    }
}

/// Send local bytes as binary frames until the local side closes or `cancel` fires
async fn local_to_relay<R, K>(local: &mut R, relay: &mut K, cancel: &CancellationToken) -> Result<(), TunnelError>
where
    R: AsyncRead + Unpin,
    K: Sink<Message, Error = WsError> + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            n = local.read(&mut buf) => n?,
        };
        if n == 0 {
            return Ok(());
        }
        relay.send(Message::Binary(buf[..n].to_vec())).await?;
    }
}

/// Forward bytes both ways until either side closes or fails
///
/// Each direction runs as its own task. Whichever finishes first cancels
/// `cancel`, which stops the other; both sides are then closed.
pub async fn bridge<W, L>(relay: WebSocketStream<W>, local: L, cancel: CancellationToken) -> Result<(), TunnelError>
where
    W: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    L: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut relay_tx, mut relay_rx) = relay.split();
    let (mut local_rx, mut local_tx) = tokio::io::split(local);

    let inbound_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = relay_to_local(&mut relay_rx, &mut local_tx, &cancel).await;
            cancel.cancel();
            let _ = local_tx.shutdown().await;
            result
        })
    };

    let outbound_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = local_to_relay(&mut local_rx, &mut relay_tx, &cancel).await;
            cancel.cancel();
            let _ = relay_tx.close().await;
            result
        })
    };

    let (inbound_result, outbound_result) = tokio::join!(inbound_task, outbound_task);
    for result in [inbound_result, outbound_result] {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(e) => return Err(TunnelError::Request(format!("forwarding task failed: {}", e))),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    struct Harness {
        relay: WebSocketStream<DuplexStream>,
        service: DuplexStream,
        cancel: CancellationToken,
        handle: tokio::task::JoinHandle<Result<(), TunnelError>>,
    }

    async fn start() -> Harness {
        let (agent_side, relay_side) = tokio::io::duplex(64 * 1024);
        let agent_ws = WebSocketStream::from_raw_socket(agent_side, Role::Client, None).await;
        let relay = WebSocketStream::from_raw_socket(relay_side, Role::Server, None).await;
        let (agent_tcp, service) = tokio::io::duplex(64 * 1024);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(bridge(agent_ws, agent_tcp, cancel.clone()));
        Harness {
            relay,
            service,
            cancel,
            handle,
        }
    }

    async fn read_exact(stream: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_bytes_flow_both_ways() {
        let mut h = start().await;

        h.relay.send(Message::Binary(vec![0, 1, 2, 255])).await.unwrap();
        assert_eq!(read_exact(&mut h.service, 4).await, vec![0, 1, 2, 255]);

        h.relay.send(Message::Text("SSH-2.0".into())).await.unwrap();
        assert_eq!(read_exact(&mut h.service, 7).await, b"SSH-2.0".to_vec());

        h.service.write_all(&[9, 8, 7]).await.unwrap();
        match h.relay.next().await {
            Some(Ok(Message::Binary(data))) => assert_eq!(data, vec![9, 8, 7]),
            other => panic!("unexpected relay message: {:?}", other),
        }

        h.cancel.cancel();
        h.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_relay_close_closes_local_side() {
        let mut h = start().await;

        h.relay.close(None).await.unwrap();

        let mut rest = Vec::new();
        h.service.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        h.handle.await.unwrap().unwrap();
        assert!(h.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_local_close_closes_relay() {
        let mut h = start().await;

        drop(h.service);

        loop {
            match h.relay.next().await {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(other)) => panic!("unexpected relay message: {:?}", other),
                Some(Err(_)) => break,
            }
        }
        h.handle.await.unwrap().unwrap();
    }
}
