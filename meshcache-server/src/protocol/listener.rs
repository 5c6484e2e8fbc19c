use super::message::{ClusterResponse, Envelope};
use super::transport::{MessageHandler, read_frame, write_frame};
use crate::core::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bind the cluster listener and serve peers until shutdown
pub async fn spawn_cluster_listener(
    bind: &str,
    handler: Arc<dyn MessageHandler>,
    shutdown: watch::Receiver<bool>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(bind).await?;
    let local_addr = listener.local_addr()?;
    info!("Cluster listener bound on {}", local_addr);

    let handle = tokio::spawn(accept_loop(listener, handler, shutdown));
    Ok((local_addr, handle))
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn MessageHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Peer connection from {}", peer);
                    tokio::spawn(handle_connection(stream, peer, Arc::clone(&handler)));
                }
                Err(e) => warn!("Failed to accept peer connection: {}", e),
            },
            _ = shutdown.changed() => {
                info!("Cluster listener shutting down");
                break;
            }
        }
    }
}

/// Serve request/response frames until the peer closes the connection
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn MessageHandler>,
) {
    loop {
        let envelope: Envelope = match read_frame(&mut stream).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => break,
            Err(e) => {
                warn!("Bad frame from {}: {}", peer, e);
                let reply = ClusterResponse::from_error(&e);
                let _ = write_frame(&mut stream, &reply).await;
                break;
            }
        };

        let response = handler.handle(envelope).await;
        if let Err(e) = write_frame(&mut stream, &response).await {
            warn!("Failed to reply to {}: {}", peer, e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::ClusterMessage;
    use crate::protocol::transport::{TcpTransport, Transport};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Upper;

    #[async_trait]
    impl MessageHandler for Upper {
        async fn handle(&self, envelope: Envelope) -> ClusterResponse {
            match envelope.message {
                ClusterMessage::Get { key, .. } => {
                    ClusterResponse::Value(Some(key.to_uppercase().into_bytes()))
                }
                _ => ClusterResponse::Applied,
            }
        }
    }

    #[tokio::test]
    async fn test_tcp_request_response() {
        let (tx, rx) = watch::channel(false);
        let (addr, handle) = spawn_cluster_listener("127.0.0.1:0", Arc::new(Upper), rx)
            .await
            .unwrap();

        let transport = TcpTransport::new(Duration::from_secs(1), Duration::from_secs(1));
        let resp = transport
            .send(
                &addr.to_string(),
                Envelope::new("node-a", ClusterMessage::Get { key: "abc".into(), consistency: None }),
            )
            .await
            .unwrap();
        assert_eq!(resp, ClusterResponse::Value(Some(b"ABC".to_vec())));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
