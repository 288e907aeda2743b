//! ISO 8583 message codec: field schema, bitmaps, and the pack/unpack
//! machinery that turns a [`Message`] into (and out of) wire bytes.

pub mod bitmap;
pub mod buffer;
pub mod field;
pub mod message;

pub use field::{Encoding, FieldDescriptor, FieldType, Padding, Prefix};
pub use message::{pack, unpack, FieldValue, Message};
