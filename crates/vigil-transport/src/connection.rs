//! Connection abstraction and TCP connection

use crate::TransportError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use vigil_proto::{Message, MessageCodec};

/// Bidirectional message channel to a backend
///
/// One task may send while another receives; `close` may be called from
/// either side and is idempotent.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Write one message
    async fn send(&self, message: Message) -> Result<(), TransportError>;

    /// Read the next message
    ///
    /// Must be cancel safe: dropping the future must not lose a partially
    /// read frame.
    async fn receive(&self) -> Result<Message, TransportError>;

    /// Close the connection
    async fn close(&self) -> Result<(), TransportError>;

    /// Whether `close` was called or the peer went away
    fn is_closed(&self) -> bool;
}

/// Read side: the codec keeps partial frames between calls
struct ReadSide {
    reader: OwnedReadHalf,
    codec: MessageCodec,
}

/// Length-prefixed message connection over TCP
pub struct TcpConnection {
    peer: String,
    reader: Mutex<ReadSide>,
    writer: Mutex<OwnedWriteHalf>,
    codec: MessageCodec,
    closed: AtomicBool,
}

impl TcpConnection {
    /// Wrap an established stream
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }
        let (reader, writer) = stream.into_split();
        Self {
            peer,
            reader: Mutex::new(ReadSide {
                reader,
                codec: MessageCodec::new(),
            }),
            writer: Mutex::new(writer),
            codec: MessageCodec::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Remote address
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        // an unencodable message is rejected without touching the stream
        let encoded = self
            .codec
            .encode(&message)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(&encoded).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            self.closed.store(true, Ordering::SeqCst);
            return Err(TransportError::Io(e));
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Message, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut side = self.reader.lock().await;
        let ReadSide { reader, codec } = &mut *side;
        match codec.read_message(reader).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => {
                debug!("Connection to {} closed by peer", self.peer);
                self.closed.store(true, Ordering::SeqCst);
                Err(TransportError::Closed)
            }
            Err(e) => {
                let err = TransportError::from(e);
                if err.is_connection_error() {
                    self.closed.store(true, Ordering::SeqCst);
                }
                Err(err)
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Closing connection to {}", self.peer);
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("Error shutting down connection to {}: {}", self.peer, e);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (TcpConnection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server, _) = listener.accept().await.unwrap();
        (TcpConnection::new(client.await.unwrap()), server)
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (conn, server) = connected_pair().await;
        let server = TcpConnection::new(server);

        let message = Message::new("keepalive", Bytes::from_static(b"{}"));
        conn.send(message.clone()).await.unwrap();
        assert_eq!(server.receive().await.unwrap(), message);

        server.send(message.clone()).await.unwrap();
        assert_eq!(conn.receive().await.unwrap(), message);
    }

    #[tokio::test]
    async fn test_peer_close_is_connection_error() {
        let (conn, server) = connected_pair().await;
        drop(server);

        let err = conn.receive().await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_bad_frame_is_protocol_error() {
        let (conn, mut server) = connected_pair().await;

        let mut frame = Vec::new();
        frame.extend_from_slice(&4u32.to_be_bytes());
        frame.extend_from_slice(&[0xC1, 0xC1, 0xC1, 0xC1]);
        server.write_all(&frame).await.unwrap();

        let good = Message::new("event", Bytes::from_static(b"{}"));
        let encoded = MessageCodec::new().encode(&good).unwrap();
        server.write_all(&encoded).await.unwrap();

        let err = conn.receive().await.unwrap_err();
        assert!(!err.is_connection_error());
        assert!(!conn.is_closed());
        assert_eq!(conn.receive().await.unwrap(), good);
    }

    #[tokio::test]
    async fn test_oversized_message_keeps_connection() {
        let (conn, _server) = connected_pair().await;
        let huge = Message::new("event", Bytes::from(vec![0u8; vigil_proto::codec::MAX_FRAME_SIZE + 1]));

        let err = conn.send(huge).await.unwrap_err();
        assert!(!err.is_connection_error());
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (conn, _server) = connected_pair().await;
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(conn.is_closed());
        assert!(matches!(
            conn.send(Message::new("event", Bytes::new())).await,
            Err(TransportError::Closed)
        ));
    }
}
