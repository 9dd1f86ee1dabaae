//! Wire Protocol
//!
//! Defines the message format exchanged between client and server over the
//! tagged-messaging transport.
//!
//! Every message starts with a fixed 28-byte packed header (magic, variant,
//! key length, value length, request id, payload checksum), encoded
//! little-endian. Requests carry `key ‖ value` after the header; responses
//! carry a 32-bit status code followed by the value, if any. Transport tags
//! route each variant to the matching posted receive without inspecting the
//! payload.

pub mod message;

pub use message::{
    HEADER_LEN, MESSAGE_MAGIC, MessageHeader, MessageKind, ProtocolError, RESPONSE_PREFIX_LEN,
    RequestFrame, ResponseFrame, STATUS_KEY_FOUND, STATUS_KEY_NOT_FOUND, TAG_MATCH_MASK,
    TAG_READ_REQUEST, TAG_READ_RESPONSE, TAG_WRITE_REQUEST, TAG_WRITE_RESPONSE, checksum,
    decode_request, decode_response, encode_read_request, encode_read_response,
    encode_write_request, encode_write_response, hex_preview,
};
