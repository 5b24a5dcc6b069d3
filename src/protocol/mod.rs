//! Wire protocol shared by every connection.
//!
//! A frame on the wire is `[length:u32 BE][type:u16 BE][body]` where `body`
//! is a UTF-8 JSON object and `length` counts the type field plus the body.
//! The tag set is closed; unknown tags are answered with `ERROR` without
//! closing the connection.

pub mod frame;
pub mod payloads;
pub mod types;

pub use frame::{CodecError, Frame, Message, MessageCodec, MessageWriter};
pub use types::MessageType;
