use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use uuid::Uuid;

use crate::codec::{MessageCodec, ProtocolError};

/// A framed, bidirectional message channel. Bytes read from the underlying stream accumulate in
/// the codec's buffer until a whole message is available; partial messages are never handed out.
pub struct Connection<S = TcpStream> {
    pub id: Uuid,
    framed: Framed<S, MessageCodec>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Connection<S> {
        Connection {
            id: Uuid::new_v4(),
            framed: Framed::new(stream, MessageCodec),
        }
    }

    /// Reads the next message. `Ok(None)` means the peer closed the stream between messages.
    pub async fn read_message(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        self.framed.next().await.transpose()
    }

    /// Writes one message and flushes it to the peer.
    pub async fn write_message(&mut self, payload: impl AsRef<[u8]>) -> Result<(), ProtocolError> {
        self.framed.send(payload.as_ref()).await
    }
}
