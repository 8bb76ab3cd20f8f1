//! Message framing over a duplex stream
//!
//! Each message is a JSON document inside a 4-byte big-endian length
//! prefixed frame.

use super::{BoxedStream, Message, P2PError};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::io;
use std::time::Duration;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// A stream speaking the qri message protocol
pub struct WrappedStream {
    framed: Framed<BoxedStream, LengthDelimitedCodec>,
    read_timeout: Duration,
}

impl WrappedStream {
    pub fn new(stream: BoxedStream, read_timeout: Duration) -> Self {
        let codec = LengthDelimitedCodec::builder()
            .length_field_length(4)
            .max_frame_length(MAX_MESSAGE_SIZE)
            .new_codec();
        Self {
            framed: Framed::new(stream, codec),
            read_timeout,
        }
    }

    pub async fn send_message(&mut self, msg: &Message) -> Result<(), P2PError> {
        let data = serde_json::to_vec(msg).map_err(|e| P2PError::Codec(e.to_string()))?;
        self.framed.send(Bytes::from(data)).await?;
        Ok(())
    }

    /// Next message, or `None` once the remote end has closed the stream
    pub async fn receive_message(&mut self) -> Result<Option<Message>, P2PError> {
        let frame = match tokio::time::timeout(self.read_timeout, self.framed.next()).await {
            Err(_) => return Err(P2PError::Timeout),
            Ok(None) => return Ok(None),
            Ok(Some(Err(e))) if is_end_of_stream(&e) => return Ok(None),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(Some(Ok(frame))) => frame,
        };

        let msg = serde_json::from_slice(&frame).map_err(|e| P2PError::Codec(e.to_string()))?;
        Ok(Some(msg))
    }

    /// Flush pending writes and close our half of the stream
    pub async fn close(&mut self) -> Result<(), P2PError> {
        SinkExt::<Bytes>::close(&mut self.framed).await?;
        Ok(())
    }
}

fn is_end_of_stream(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::MsgType;
    use libp2p::PeerId;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    fn pair() -> (WrappedStream, WrappedStream) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (
            WrappedStream::new(Box::new(a), Duration::from_secs(5)),
            WrappedStream::new(Box::new(b), Duration::from_secs(5)),
        )
    }

    #[tokio::test]
    async fn test_send_receive() {
        let (mut a, mut b) = pair();
        let msg = Message::new(
            PeerId::random(),
            MsgType::DatasetInfo,
            json!({ "peername": "peer", "name": "cities" }),
        )
        .with_hang_up();

        a.send_message(&msg).await.unwrap();
        let received = b.receive_message().await.unwrap().unwrap();

        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn test_end_of_stream_is_not_an_error() {
        let (mut a, mut b) = pair();
        a.close().await.unwrap();

        assert!(b.receive_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_flushes_pending_message() {
        let (mut a, mut b) = pair();
        let msg = Message::new(PeerId::random(), MsgType::Ping, json!(null));

        a.send_message(&msg).await.unwrap();
        a.close().await.unwrap();

        assert_eq!(b.receive_message().await.unwrap(), Some(msg));
        assert!(b.receive_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_deadline() {
        let (_a, b) = tokio::io::duplex(1024);
        let mut b = WrappedStream::new(Box::new(b), Duration::from_millis(50));

        assert!(matches!(b.receive_message().await, Err(P2PError::Timeout)));
    }

    #[tokio::test]
    async fn test_garbage_frame() {
        let (mut a, b) = tokio::io::duplex(1024);
        let mut b = WrappedStream::new(Box::new(b), Duration::from_secs(5));

        a.write_all(&[0, 0, 0, 3, b'{', b'{', b'{']).await.unwrap();
        assert!(matches!(b.receive_message().await, Err(P2PError::Codec(_))));
    }
}
