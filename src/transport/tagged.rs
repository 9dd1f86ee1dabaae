use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Transport tags are plain 64-bit labels; matching is `incoming & mask ==
/// tag & mask`, so a mask of 0 accepts anything.
pub type Tag = u64;

/// A message taken off a link, carrying the endpoint it arrived on so
/// responses can be sent back on exactly that link.
pub struct ReceivedMessage {
    pub tag: Tag,
    pub payload: Vec<u8>,
    pub source: Endpoint,
}

pub(crate) struct Outbound {
    tag: Tag,
    payload: Vec<u8>,
    completed: oneshot::Sender<io::Result<()>>,
}

/// Handle to one connected peer. Cloneable; all clones feed the same writer
/// task.
#[derive(Clone, Debug)]
pub struct Endpoint {
    pub(crate) peer: SocketAddr,
    pub(crate) tx: mpsc::UnboundedSender<Outbound>,
}

impl Endpoint {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Sends one tagged message. The buffer moves into the writer task; the
    /// returned handle resolves once the bytes are on the wire and the
    /// buffer has been reclaimed. A closed link fails the handle
    /// immediately.
    pub fn send_tagged(&self, tag: Tag, payload: Vec<u8>) -> SendHandle {
        let (completed, done) = oneshot::channel();
        if self
            .tx
            .send(Outbound {
                tag,
                payload,
                completed,
            })
            .is_err()
        {
            let (failed, done) = oneshot::channel();
            let _ = failed.send(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "endpoint closed",
            )));
            return SendHandle { done };
        }
        SendHandle { done }
    }
}

/// Resolves when a posted send has completed (or failed).
pub struct SendHandle {
    done: oneshot::Receiver<io::Result<()>>,
}

impl SendHandle {
    pub async fn completed(self) -> io::Result<()> {
        match self.done.await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "link closed before send completed",
            )),
        }
    }
}

/// Resolves when a posted receive has matched a message. Returns `None` if
/// the receive was cancelled by shutdown.
pub struct ReceiveHandle {
    slot: oneshot::Receiver<ReceivedMessage>,
}

impl ReceiveHandle {
    pub async fn message(self) -> Option<ReceivedMessage> {
        self.slot.await.ok()
    }
}

struct PostedReceive {
    tag: Tag,
    mask: Tag,
    slot: oneshot::Sender<ReceivedMessage>,
}

struct MatchState {
    posted: Vec<PostedReceive>,
    unexpected: VecDeque<ReceivedMessage>,
}

/// Tag-matching state shared by every link of one manager.
///
/// Inbound messages are matched against posted receives in posting order;
/// a message no receive matches waits in the unexpected queue until a
/// matching receive is posted.
pub struct TagWorker {
    state: Mutex<MatchState>,
    max_message_bytes: usize,
}

impl TagWorker {
    pub fn new(max_message_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MatchState {
                posted: Vec::new(),
                unexpected: VecDeque::new(),
            }),
            max_message_bytes,
        })
    }

    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    /// Posts a receive for messages matching `(tag, mask)`. A queued
    /// unexpected message satisfies the receive immediately.
    pub fn post_receive(&self, tag: Tag, mask: Tag) -> ReceiveHandle {
        let mut state = self.state.lock().unwrap();

        if let Some(index) = state
            .unexpected
            .iter()
            .position(|message| tag_matches(tag, mask, message.tag))
        {
            let message = state
                .unexpected
                .remove(index)
                .expect("indexed unexpected message");
            let (slot, handle) = oneshot::channel();
            let _ = slot.send(message);
            return ReceiveHandle { slot: handle };
        }

        let (slot, handle) = oneshot::channel();
        state.posted.push(PostedReceive { tag, mask, slot });
        ReceiveHandle { slot: handle }
    }

    /// Hands an inbound message to the first matching posted receive.
    /// Receives whose awaiting task has gone away are discarded in passing.
    pub(crate) fn deliver(&self, message: ReceivedMessage) {
        let mut state = self.state.lock().unwrap();

        let mut message = message;
        let mut index = 0;
        while index < state.posted.len() {
            if tag_matches(
                state.posted[index].tag,
                state.posted[index].mask,
                message.tag,
            ) {
                let entry = state.posted.remove(index);
                match entry.slot.send(message) {
                    Ok(()) => return,
                    Err(returned) => {
                        message = returned;
                    }
                }
            } else {
                index += 1;
            }
        }

        tracing::debug!(
            "No receive posted for tag 0x{:x}, queuing {} bytes",
            message.tag,
            message.payload.len()
        );
        state.unexpected.push_back(message);
    }

    /// Drops every posted receive (their handles resolve as cancelled) and
    /// discards queued unexpected messages.
    pub fn cancel_all(&self) {
        let mut state = self.state.lock().unwrap();
        let posted = state.posted.len();
        let queued = state.unexpected.len();
        state.posted.clear();
        state.unexpected.clear();

        if posted > 0 || queued > 0 {
            tracing::info!(
                "Cancelled {} posted receives, dropped {} queued messages",
                posted,
                queued
            );
        }
    }

    pub fn posted_count(&self) -> usize {
        self.state.lock().unwrap().posted.len()
    }

    pub fn unexpected_count(&self) -> usize {
        self.state.lock().unwrap().unexpected.len()
    }
}

fn tag_matches(tag: Tag, mask: Tag, incoming: Tag) -> bool {
    incoming & mask == tag & mask
}

/// Link-level notifications consumed by the manager's progress loop.
pub(crate) enum LinkEvent {
    /// A listener accepted a new peer.
    Connected(Endpoint),
    /// A link closed; in-flight operations on it will never complete.
    Disconnected { peer: SocketAddr, reason: String },
}

/// Accepting socket plus its background accept task.
pub struct Listener {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl Listener {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

pub(crate) async fn bind_listener(
    addr: SocketAddr,
    worker: Arc<TagWorker>,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> io::Result<Listener> {
    let socket = TcpListener::bind(addr).await?;
    let local_addr = socket.local_addr()?;

    let accept_task = tokio::spawn(async move {
        loop {
            match socket.accept().await {
                Ok((stream, peer)) => {
                    tracing::info!("Accepted connection from {}", peer);
                    match spawn_link(stream, worker.clone(), events.clone()) {
                        Ok(endpoint) => {
                            let _ = events.send(LinkEvent::Connected(endpoint));
                        }
                        Err(e) => {
                            tracing::error!("Failed to set up link for {}: {}", peer, e);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    });

    Ok(Listener {
        local_addr,
        accept_task,
    })
}

pub(crate) async fn connect_endpoint(
    addr: SocketAddr,
    worker: Arc<TagWorker>,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> io::Result<Endpoint> {
    let stream = TcpStream::connect(addr).await?;
    spawn_link(stream, worker, events)
}

/// Splits a connected stream into its writer and reader tasks and returns
/// the endpoint handle feeding the writer.
fn spawn_link(
    stream: TcpStream,
    worker: Arc<TagWorker>,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> io::Result<Endpoint> {
    stream.set_nodelay(true)?;
    let peer = stream.peer_addr()?;
    let (read_half, write_half) = stream.into_split();

    let (tx, rx) = mpsc::unbounded_channel();
    let endpoint = Endpoint { peer, tx };

    tokio::spawn(write_loop(write_half, rx));
    tokio::spawn(read_loop(read_half, endpoint.clone(), worker, events));

    Ok(endpoint)
}

async fn write_loop(mut half: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(message) = outbound.recv().await {
        let result = write_frame(&mut half, message.tag, &message.payload).await;
        let failed = result.is_err();
        let _ = message.completed.send(result);
        if failed {
            // Remaining queued sends resolve as broken when their
            // completion senders drop with this task.
            break;
        }
    }
}

async fn write_frame(half: &mut OwnedWriteHalf, tag: Tag, payload: &[u8]) -> io::Result<()> {
    half.write_u64_le(tag).await?;
    half.write_u32_le(payload.len() as u32).await?;
    half.write_all(payload).await?;
    half.flush().await
}

async fn read_loop(
    mut half: OwnedReadHalf,
    source: Endpoint,
    worker: Arc<TagWorker>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    let peer = source.peer;
    let reason = loop {
        let tag = match half.read_u64_le().await {
            Ok(tag) => tag,
            Err(e) => break e.to_string(),
        };
        let length = match half.read_u32_le().await {
            Ok(length) => length as usize,
            Err(e) => break e.to_string(),
        };

        if length > worker.max_message_bytes() {
            tracing::error!(
                "Frame of {} bytes from {} exceeds the {}-byte limit, closing link",
                length,
                peer,
                worker.max_message_bytes()
            );
            break format!("oversized frame ({} bytes)", length);
        }

        let mut payload = vec![0u8; length];
        if let Err(e) = half.read_exact(&mut payload).await {
            break e.to_string();
        }

        worker.deliver(ReceivedMessage {
            tag,
            payload,
            source: source.clone(),
        });
    };

    tracing::info!("Link to {} closed: {}", peer, reason);
    let _ = events.send(LinkEvent::Disconnected { peer, reason });
}
