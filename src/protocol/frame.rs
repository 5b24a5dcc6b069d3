use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use futures_util::SinkExt;
use serde_json::Value;
use thiserror::Error;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio_util::codec::{Decoder, Encoder, FramedWrite};

use super::types::MessageType;

/// Default cap on a single frame; a well-formed transfer chunk is well
/// below this even after hex encoding.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// A decoded frame: raw tag plus parsed JSON body. The tag may fall outside
/// the closed [`MessageType`] set — the session layer answers those with
/// `ERROR` instead of dropping the connection.
#[derive(Debug, Clone)]
pub struct Frame {
    pub tag: u16,
    pub body: Value,
}

impl Frame {
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_tag(self.tag)
    }
}

/// An outgoing message with a known tag.
#[derive(Debug, Clone)]
pub struct Message {
    pub msg_type: MessageType,
    pub body: Value,
}

impl Message {
    pub fn new(msg_type: MessageType, body: Value) -> Self {
        Self { msg_type, body }
    }

    /// `ERROR {error, code}` with the default code 500.
    pub fn error(error: impl Into<String>) -> Self {
        Self::error_with_code(error, 500)
    }

    pub fn error_with_code(error: impl Into<String>, code: i64) -> Self {
        Self::new(
            MessageType::Error,
            serde_json::json!({ "error": error.into(), "code": code }),
        )
    }

    /// Generic `SUCCESS` with an arbitrary payload.
    pub fn success(body: Value) -> Self {
        Self::new(MessageType::Success, body)
    }

    /// Generic `SUCCESS {success: true}`.
    pub fn success_empty() -> Self {
        Self::success(serde_json::json!({ "success": true }))
    }
}

/// Frame codec failures. `ShortFrame` and `MalformedBody` consume the
/// offending frame, so the stream can keep being read; the rest are fatal
/// for the connection.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of stream mid-frame")]
    UnexpectedEof,
    #[error("short frame: declared length {0} does not cover the type field")]
    ShortFrame(u32),
    #[error("frame of {length} bytes exceeds the {limit}-byte limit")]
    FrameTooLarge { length: usize, limit: usize },
    #[error("malformed message body: {0}")]
    MalformedBody(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Whether the connection can continue after replying `ERROR`.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ShortFrame(_) | Self::MalformedBody(_))
    }
}

/// Length-prefixed tagged-JSON codec: `[length:u32 BE][type:u16 BE][body]`,
/// `length` counting the type field plus the body.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_frame_size: usize,
}

impl MessageCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for MessageCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        if src.len() < 4 {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                length,
                limit: self.max_frame_size,
            });
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let frame = src.split_to(length);

        if length < 2 {
            return Err(CodecError::ShortFrame(length as u32));
        }

        let tag = u16::from_be_bytes([frame[0], frame[1]]);
        let body = if frame.len() == 2 {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_slice(&frame[2..])?
        };

        Ok(Some(Frame { tag, body }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(CodecError::UnexpectedEof),
        }
    }
}

impl<'a> Encoder<&'a Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, message: &Message, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body = serde_json::to_vec(&message.body)?;
        let length = body.len() + 2;
        if length > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                length,
                limit: self.max_frame_size,
            });
        }

        dst.reserve(4 + length);
        dst.put_u32(length as u32);
        dst.put_u16(message.msg_type.tag());
        dst.put_slice(&body);
        Ok(())
    }
}

/// Shared handle to a connection's write half.
///
/// Every frame goes through one async mutex, so a response and an
/// unsolicited notification can never interleave bytes mid-frame. Each
/// `send` flushes before releasing the lock.
#[derive(Clone)]
pub struct MessageWriter {
    inner: Arc<Mutex<FramedWrite<OwnedWriteHalf, MessageCodec>>>,
}

impl MessageWriter {
    pub fn new(write_half: OwnedWriteHalf, max_frame_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FramedWrite::new(
                write_half,
                MessageCodec::new(max_frame_size),
            ))),
        }
    }

    pub async fn send(&self, message: &Message) -> Result<(), CodecError> {
        self.inner.lock().await.send(message).await
    }

    /// Identity comparison, used to deregister only the writer that was
    /// registered for a player (a relogin may have replaced it).
    pub fn same_writer(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
