// Every message, in both directions, is a 4 byte big-endian length followed by that many bytes
// of payload:
//
// +-------------+---------------------+
// | 0 0 0 15    |  SELECT * FROM users |
// +-------------+---------------------+
//    4 bytes          N bytes
//
// There is no upper bound on N. Memory is only committed as the payload actually arrives, at
// most `RESERVE_CHUNK` bytes ahead of it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error as ThisError;
use tokio_util::codec::{Decoder, Encoder};

/// Size of the length prefix in bytes.
pub const PREFIX_LEN: usize = 4;

/// Upper bound on how much buffer space is reserved ahead of a payload that has not arrived yet.
const RESERVE_CHUNK: usize = 64 * 1024;

#[derive(Debug, ThisError)]
pub enum ProtocolError {
    #[error("protocol error; connection closed mid-frame, expected {expected} bytes, got {received}")]
    Truncated { expected: usize, received: usize },
    #[error("protocol error; payload of {0} bytes does not fit a 4 byte length prefix")]
    TooLarge(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl MessageCodec {
    /// Total number of bytes the frame at the front of `src` occupies, if the prefix is there.
    fn frame_len(src: &[u8]) -> Option<usize> {
        let prefix: [u8; PREFIX_LEN] = src.get(..PREFIX_LEN)?.try_into().ok()?;
        Some(PREFIX_LEN + u32::from_be_bytes(prefix) as usize)
    }
}

impl Decoder for MessageCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let frame_len = match Self::frame_len(src) {
            Some(len) => len,
            None => {
                src.reserve(PREFIX_LEN - src.len());
                return Ok(None);
            }
        };

        if src.len() < frame_len {
            // The announced length is untrusted, so grow in bounded steps.
            src.reserve((frame_len - src.len()).min(RESERVE_CHUNK));
            return Ok(None);
        }

        src.advance(PREFIX_LEN);
        Ok(Some(src.split_to(frame_len - PREFIX_LEN).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let received = src.len();
        let expected = Self::frame_len(src).unwrap_or(PREFIX_LEN);
        src.clear();

        Err(ProtocolError::Truncated { expected, received })
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = item.as_ref();
        let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::TooLarge(payload.len()))?;

        dst.reserve(PREFIX_LEN + payload.len());
        dst.put_u32(len);
        dst.extend_from_slice(payload);

        Ok(())
    }
}
