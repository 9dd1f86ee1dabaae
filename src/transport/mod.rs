//! Tagged-Messaging Transport Module
//!
//! Implements the message-oriented transport the store runs over, plus the
//! manager that owns its process-wide state.
//!
//! ## Core Mechanisms
//! - **Framing** (`tagged`): each link carries discrete messages as
//!   `tag ‖ length ‖ payload` frames. Receivers post buffers with a
//!   (tag, mask) pair; an inbound message is handed to the first posted
//!   receive it matches, and queued as "unexpected" until one is posted.
//! - **Buffer ownership**: `Endpoint::send_tagged` takes the buffer by value
//!   and returns a handle resolved once the bytes are on the wire; posted
//!   receives own their message until the awaiting task takes it.
//! - **Manager** (`manager`): allocates request ids, parks pending-operation
//!   promises, and drives a completion queue so promises are resolved by a
//!   dedicated progress loop instead of inside transport callbacks.

pub mod manager;
pub mod tagged;

pub use manager::{
    Completion, DEFAULT_MAX_MESSAGE_BYTES, TransportConfig, TransportManager, parse_host_port,
};
pub use tagged::{Endpoint, Listener, ReceiveHandle, ReceivedMessage, SendHandle, Tag, TagWorker};

#[cfg(test)]
mod tests;
