use std::net::SocketAddr;
use std::sync::Arc;

use crate::kvstore::KvError;
use crate::protocol::{self, MessageKind};
use crate::transport::{Endpoint, ReceivedMessage, TransportManager};

/// Receive buffers kept posted at all times to absorb request bursts.
pub const PREPOSTED_RECEIVES: usize = 10;

/// Starts serving on `listen_addr`: creates the listener and pre-posts the
/// receive pool. Returns the bound address.
pub async fn start(
    manager: &Arc<TransportManager>,
    listen_addr: &str,
) -> Result<SocketAddr, KvError> {
    let local_addr = manager.create_listener(listen_addr).await?;

    tracing::info!("Posting {} initial receive buffers", PREPOSTED_RECEIVES);
    for _ in 0..PREPOSTED_RECEIVES {
        post_receive(manager);
    }

    Ok(local_addr)
}

/// Posts one wildcard receive and spawns the task that dispatches whatever
/// it matches. Each completed receive posts its own replacement, keeping
/// the pool at full depth until shutdown.
pub(crate) fn post_receive(manager: &Arc<TransportManager>) {
    // Accept any tag; the variant is read from the header.
    let receive = manager.worker().post_receive(0, 0);

    let manager = manager.clone();
    tokio::spawn(async move {
        let Some(message) = receive.message().await else {
            // Cancelled by shutdown.
            return;
        };

        handle_message(&manager, &message);

        if !manager.is_shutting_down() {
            post_receive(&manager);
        }
    });
}

/// Verifies and dispatches one inbound message.
fn handle_message(manager: &Arc<TransportManager>, message: &ReceivedMessage) {
    let header = match protocol::MessageHeader::decode(&message.payload) {
        Ok(header) => header,
        Err(e) => {
            tracing::error!(
                "Dropping malformed message from {}: {} [{}]",
                message.source.peer(),
                e,
                protocol::hex_preview(&message.payload, 16)
            );
            return;
        }
    };

    tracing::debug!(
        "Received message: type={:?}, key_len={}, value_len={}, request_id={}",
        header.kind,
        header.key_length,
        header.value_length,
        header.request_id
    );

    match header.kind {
        MessageKind::WriteRequest => handle_write_request(manager, message),
        MessageKind::ReadRequest => handle_read_request(manager, message),
        other => {
            tracing::error!(
                "Dropping unexpected {:?} on the server receive path (request_id={})",
                other,
                header.request_id
            );
        }
    }
}

fn handle_write_request(manager: &Arc<TransportManager>, message: &ReceivedMessage) {
    let frame = match protocol::decode_request(&message.payload) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(
                "Dropping malformed write request from {}: {}",
                message.source.peer(),
                e
            );
            return;
        }
    };

    tracing::info!(
        "Write request for key '{}' ({} value bytes, request_id={})",
        String::from_utf8_lossy(&frame.key),
        frame.value.len(),
        frame.header.request_id
    );

    manager.storage().store(frame.key, frame.value);

    let response = protocol::encode_write_response(frame.header.request_id, 0);
    send_response(&message.source, MessageKind::WriteResponse, response);
}

fn handle_read_request(manager: &Arc<TransportManager>, message: &ReceivedMessage) {
    let frame = match protocol::decode_request(&message.payload) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(
                "Dropping malformed read request from {}: {}",
                message.source.peer(),
                e
            );
            return;
        }
    };

    let value = manager.storage().get(&frame.key);
    match &value {
        Some(bytes) => {
            tracing::info!(
                "Read request for key '{}': found {} bytes",
                String::from_utf8_lossy(&frame.key),
                bytes.len()
            );
        }
        None => {
            tracing::info!(
                "Read request for key '{}': not found",
                String::from_utf8_lossy(&frame.key)
            );
        }
    }

    let response = protocol::encode_read_response(frame.header.request_id, value.as_deref());
    send_response(&message.source, MessageKind::ReadResponse, response);
}

/// Emits a response on the link the request arrived on. The buffer moves
/// into the send; a follow-up task logs a failed completion.
fn send_response(endpoint: &Endpoint, kind: MessageKind, response: Vec<u8>) {
    let peer = endpoint.peer();
    let send = endpoint.send_tagged(kind.tag(), response);

    tokio::spawn(async move {
        if let Err(e) = send.completed().await {
            tracing::error!("Failed to send {:?} to {}: {}", kind, peer, e);
        }
    });
}
