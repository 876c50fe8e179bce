// Copyright (C) 2025 Sodep Developers
// SPDX-License-Identifier: Apache-2.0

//! Noise protocol encrypted WebSocket connection types.
use anyhow::{Result, anyhow, bail};
use futures_util::{SinkExt, StreamExt};
use snow::{TransportState, params::NoiseParams};
use std::sync::LazyLock;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    self as websocket, MaybeTlsStream, WebSocketStream,
    tungstenite::{Message as WsMessage, protocol::WebSocketConfig},
};

use crate::message::SignedMessage;

static NOISE_PARAMS: LazyLock<NoiseParams> =
    LazyLock::new(|| "Noise_NN_25519_ChaChaPoly_BLAKE2s".parse().unwrap());

/// Maximum message length.
const MAX_MSG_LEN: usize = 16384;

/// A noise protocol encrypted WebSocket connection for [SignedMessage].
pub struct EncryptedConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    transport: TransportState,
}

impl EncryptedConnection {
    /// Creates a new connection.
    fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>, transport: TransportState) -> Self {
        Self { stream, transport }
    }

    /// Sends a [SignedMessage].
    pub async fn send(&mut self, msg: &SignedMessage) -> Result<()> {
        let mut buf = [0u8; MAX_MSG_LEN];
        let len = self.transport.write_message(&msg.serialize(), &mut buf)?;
        self.stream.send(WsMessage::binary(buf[..len].to_vec())).await?;

        Ok(())
    }

    /// Waits for a [SignedMessage].
    pub async fn recv(&mut self) -> Option<Result<SignedMessage>> {
        let mut buf = [0u8; MAX_MSG_LEN];
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Binary(payload))) => {
                    break Some(
                        self.transport
                            .read_message(payload.as_ref(), &mut buf)
                            .map_err(anyhow::Error::from)
                            .and_then(|len| SignedMessage::deserialize_and_verify(&buf[..len])),
                    );
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Some(Err(anyhow!("Connection error: {e}"))),
                None => break None,
            }
        }
    }

    /// Closes this connection.
    pub async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// Creates an [EncryptedConnection] from a server stream.
pub async fn accept_async(stream: TcpStream) -> Result<EncryptedConnection> {
    let config = WebSocketConfig::default().max_message_size(Some(MAX_MSG_LEN));

    let mut stream =
        websocket::accept_async_with_config(MaybeTlsStream::Plain(stream), Some(config)).await?;

    // Start Noise protocol handshake with the client.
    let mut noise = snow::Builder::new(NOISE_PARAMS.clone()).build_responder()?;
    let mut buf = [0u8; MAX_MSG_LEN];

    // <- e
    match stream.next().await {
        Some(Ok(WsMessage::Binary(payload))) => {
            noise
                .read_message(payload.as_ref(), &mut buf)
                .map_err(|e| anyhow!("Responder Noise handshake invalid message {e}"))?;
        }
        Some(Ok(_)) => {
            bail!("Responder Noise handshake failed non binary stream");
        }
        Some(Err(e)) => bail!("Responder Noise handshake failed {e}"),
        None => bail!("Responder Noise handshake failed stream closed"),
    };

    // -> e, ee
    let len = noise.write_message(&[], &mut buf)?;
    stream.send(WsMessage::binary(buf[..len].to_vec())).await?;

    let transport = noise.into_transport_mode()?;

    Ok(EncryptedConnection::new(stream, transport))
}

/// Creates an [EncryptedConnection] to a server.
pub async fn connect_async(host: &str, port: u16) -> Result<EncryptedConnection> {
    let config = WebSocketConfig::default().max_message_size(Some(MAX_MSG_LEN));

    let url = format!("ws://{host}:{port}");
    let (mut stream, _) = websocket::connect_async_with_config(url, Some(config), false).await?;

    // Start Noise protocol handshake with the server.
    let mut noise = snow::Builder::new(NOISE_PARAMS.clone()).build_initiator()?;
    let mut buf = [0u8; MAX_MSG_LEN];

    // -> e
    let len = noise.write_message(&[], &mut buf)?;
    stream.send(WsMessage::binary(buf[..len].to_vec())).await?;

    // <- e, ee
    match stream.next().await {
        Some(Ok(WsMessage::Binary(payload))) => {
            noise
                .read_message(payload.as_ref(), &mut buf)
                .map_err(|e| anyhow!("Initiator Noise handshake invalid message {e}"))?;
        }
        Some(Ok(_)) => {
            bail!("Initiator Noise handshake failed non binary stream");
        }
        Some(Err(e)) => bail!("Initiator Noise handshake failed {e}"),
        None => bail!("Initiator Noise handshake failed stream closed"),
    };

    let transport = noise.into_transport_mode()?;

    Ok(EncryptedConnection::new(stream, transport))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{crypto::SigningKey, message::Message};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn handshake_and_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut conn = accept_async(socket).await.unwrap();

            let msg = conn.recv().await.unwrap().unwrap();
            assert!(matches!(msg.message(), Message::JoinTable(s) if s == "Alice"));

            let sk = SigningKey::default();
            let reply = SignedMessage::new(&sk, Message::Error("no table".to_string()));
            conn.send(&reply).await.unwrap();
        });

        let mut conn = connect_async("127.0.0.1", addr.port()).await.unwrap();

        let sk = SigningKey::default();
        let msg = SignedMessage::new(&sk, Message::JoinTable("Alice".to_string()));
        conn.send(&msg).await.unwrap();

        let reply = conn.recv().await.unwrap().unwrap();
        assert!(matches!(reply.message(), Message::Error(s) if s == "no table"));

        conn.close().await;
        server.await.unwrap();
    }
}
