//! Node-to-node transport
//!
//! `Transport::send(address, envelope)` is the only way nodes talk to each
//! other. The TCP implementation frames bincode-encoded envelopes with a
//! big-endian u32 length prefix.

use super::message::{ClusterResponse, Envelope};
use crate::core::{CacheError, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Frames larger than this are rejected
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Sends envelopes to peer nodes
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, address: &str, envelope: Envelope) -> Result<ClusterResponse>;
}

/// Handles envelopes addressed to this node
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope) -> ClusterResponse;
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(
        value,
        bincode::config::standard(),
    )?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}

/// Write one length-prefixed frame
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = encode(value)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(CacheError::Transport(format!(
            "frame too large: {} bytes",
            body.len()
        )));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame; `Ok(None)` on clean EOF
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_SIZE {
        return Err(CacheError::Transport(format!("frame too large: {} bytes", len)));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    decode(&body).map(Some)
}

/// One connection per request over TCP
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(2))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, address: &str, envelope: Envelope) -> Result<ClusterResponse> {
        debug!("TCP send {} to {}", envelope.message.kind(), address);

        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| CacheError::NodeUnavailable(format!("connect to {} timed out", address)))?
            .map_err(|e| CacheError::NodeUnavailable(format!("connect to {}: {}", address, e)))?;

        let exchange = async {
            write_frame(&mut stream, &envelope).await?;
            read_frame::<_, ClusterResponse>(&mut stream)
                .await?
                .ok_or_else(|| CacheError::Transport(format!("{} closed the connection", address)))
        };

        tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| CacheError::NodeUnavailable(format!("request to {} timed out", address)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::config::ConsistencyLevel;
    use crate::protocol::message::ClusterMessage;

    #[tokio::test]
    async fn test_frame_roundtrip_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let envelope = Envelope::new(
            "node-a",
            ClusterMessage::Set {
                key: "user:1".into(),
                value: b"alice".to_vec(),
                ttl_ms: Some(1000),
                consistency: Some(ConsistencyLevel::Strong),
            },
        );

        write_frame(&mut client, &envelope).await.unwrap();
        let received: Envelope = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(received, envelope);
    }

    #[tokio::test]
    async fn test_frame_layout_is_big_endian_length_then_body() {
        let message = ClusterMessage::Delete { key: "k".into() };
        let body = encode(&message).unwrap();
        let mut expected = (body.len() as u32).to_be_bytes().to_vec();
        expected.extend_from_slice(&body);

        let mut mock = tokio_test::io::Builder::new().write(&expected).build();
        write_frame(&mut mock, &message).await.unwrap();

        let mut mock = tokio_test::io::Builder::new().read(&expected).build();
        let decoded: ClusterMessage = read_frame(&mut mock).await.unwrap().unwrap();
        assert_eq!(decoded, message);
    }

    #[tokio::test]
    async fn test_read_frame_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let result: Option<Envelope> = read_frame(&mut server).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_u32((MAX_FRAME_SIZE + 1) as u32).await.unwrap();
        let result = read_frame::<_, Envelope>(&mut server).await;
        assert!(matches!(result, Err(CacheError::Transport(_))));
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_node_unavailable() {
        let transport = TcpTransport::new(Duration::from_millis(200), Duration::from_millis(200));
        // Port 9 (discard) on localhost is normally closed
        let result = transport
            .send(
                "127.0.0.1:9",
                Envelope::new("node-a", ClusterMessage::Get { key: "k".into(), consistency: None }),
            )
            .await;
        assert!(matches!(result, Err(CacheError::NodeUnavailable(_))));
    }
}
