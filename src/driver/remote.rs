//! Client RPC Path
//!
//! Turns read/write calls into framed request/response exchanges. Each RPC
//! allocates a request id, parks a promise in the manager's pending table,
//! posts a receive for the matching response tag, and sends the request.
//! Response-parsing tasks never resolve promises themselves; they enqueue
//! completion tuples the manager's progress loop applies.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::kvstore::{KvError, ReadResult, TimestampedGeneration};
use crate::protocol::{
    self, HEADER_LEN, STATUS_KEY_FOUND, TAG_MATCH_MASK, TAG_READ_REQUEST, TAG_READ_RESPONSE,
    TAG_WRITE_REQUEST, TAG_WRITE_RESPONSE,
};
use crate::transport::{Completion, Endpoint, TransportManager};

/// Responses declaring a value larger than this are treated as absent
/// rather than trusted.
const MAX_SANE_VALUE_LEN: u32 = 1_000_000;

/// Per-driver-instance connection to one remote server.
pub struct RemoteClient {
    manager: Arc<TransportManager>,
    endpoint: Endpoint,
}

impl RemoteClient {
    pub async fn connect(
        manager: Arc<TransportManager>,
        remote_addr: &str,
    ) -> Result<Self, KvError> {
        let endpoint = manager.connect(remote_addr).await?;
        Ok(Self { manager, endpoint })
    }

    pub fn peer(&self) -> std::net::SocketAddr {
        self.endpoint.peer()
    }

    /// Write RPC. Resolves with a fresh generation stamp once the server
    /// acknowledges the store.
    pub async fn write(&self, key: &[u8], value: &[u8]) -> Result<TimestampedGeneration, KvError> {
        self.manager.ensure_active()?;
        self.check_message_size(HEADER_LEN + key.len() + value.len())?;

        let request_id = self.manager.next_request_id();
        let message = protocol::encode_write_request(request_id, key, value);

        tracing::debug!(
            "Sending write request: key='{}', {} value bytes, request_id={}",
            String::from_utf8_lossy(key),
            value.len(),
            request_id
        );

        let (promise, ack) = oneshot::channel();
        self.manager.register_write(request_id, promise);

        // Post the response receive before the request leaves so the ack
        // cannot race the matching window.
        let receive = self
            .manager
            .worker()
            .post_receive(TAG_WRITE_RESPONSE, TAG_MATCH_MASK);
        let completions = self.manager.completion_sender();
        tokio::spawn(async move {
            let Some(message) = receive.message().await else {
                return;
            };
            let completion = match protocol::decode_response(&message.payload) {
                Ok(response) => Completion::WriteAck {
                    request_id: response.header.request_id,
                    status: Ok(response.status_code),
                },
                Err(e) => {
                    tracing::warn!("Malformed write response: {}", e);
                    Completion::WriteAck {
                        request_id,
                        status: Err(KvError::Internal(format!(
                            "malformed write response: {}",
                            e
                        ))),
                    }
                }
            };
            let _ = completions.send(completion);
        });

        let send = self.endpoint.send_tagged(TAG_WRITE_REQUEST, message);
        let completions = self.manager.completion_sender();
        tokio::spawn(async move {
            if let Err(e) = send.completed().await {
                let _ = completions.send(Completion::WriteAck {
                    request_id,
                    status: Err(KvError::Internal(format!("send failed: {}", e))),
                });
            }
        });

        match ack.await {
            Ok(Ok(())) => Ok(TimestampedGeneration::fresh()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(KvError::Cancelled(
                "transport manager shut down".to_string(),
            )),
        }
    }

    /// Read RPC. Transport failures normalize to an absent outcome with a
    /// no-value stamp.
    pub async fn read(&self, key: &[u8]) -> Result<ReadResult, KvError> {
        self.manager.ensure_active()?;
        self.check_message_size(HEADER_LEN + key.len())?;

        let request_id = self.manager.next_request_id();
        let message = protocol::encode_read_request(request_id, key);

        tracing::debug!(
            "Sending read request: key='{}', request_id={}",
            String::from_utf8_lossy(key),
            request_id
        );

        let (promise, outcome) = oneshot::channel();
        self.manager.register_read(request_id, promise);

        let receive = self
            .manager
            .worker()
            .post_receive(TAG_READ_RESPONSE, TAG_MATCH_MASK);
        let completions = self.manager.completion_sender();
        tokio::spawn(async move {
            let Some(message) = receive.message().await else {
                return;
            };
            let (resolved_id, outcome) = parse_read_response(&message.payload, request_id);
            let _ = completions.send(Completion::ReadOutcome {
                request_id: resolved_id,
                outcome,
            });
        });

        let send = self.endpoint.send_tagged(TAG_READ_REQUEST, message);
        let completions = self.manager.completion_sender();
        tokio::spawn(async move {
            if let Err(e) = send.completed().await {
                tracing::error!("Read request send failed: {}", e);
                let _ = completions.send(Completion::ReadOutcome {
                    request_id,
                    outcome: ReadResult::missing(),
                });
            }
        });

        match outcome.await {
            Ok(result) => Ok(result),
            // Promise dropped without resolution (manager torn down).
            Err(_) => Ok(ReadResult::missing()),
        }
    }

    fn check_message_size(&self, total: usize) -> Result<(), KvError> {
        let limit = self.manager.config().max_message_bytes;
        if total > limit {
            return Err(KvError::InvalidArgument(format!(
                "message of {} bytes exceeds the {}-byte limit",
                total, limit
            )));
        }
        Ok(())
    }
}

/// Parses a read response into its outcome. Correlation uses the request id
/// echoed in the header; `fallback_id` keeps the promise resolvable when
/// the response is too damaged to read one.
pub(crate) fn parse_read_response(payload: &[u8], fallback_id: u64) -> (u64, ReadResult) {
    let response = match protocol::decode_response(payload) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Failed to decode read response: {}", e);
            return (fallback_id, ReadResult::missing());
        }
    };

    let request_id = response.header.request_id;

    if response.header.value_length > MAX_SANE_VALUE_LEN {
        tracing::error!(
            "Read response declares implausible value length {}, treating as absent",
            response.header.value_length
        );
        return (request_id, ReadResult::missing());
    }

    if response.status_code == STATUS_KEY_FOUND {
        tracing::debug!(
            "Read response: {} value bytes, request_id={}",
            response.value.len(),
            request_id
        );
        (request_id, ReadResult::value(response.value))
    } else {
        tracing::debug!("Read response: key not found, request_id={}", request_id);
        (request_id, ReadResult::missing())
    }
}
