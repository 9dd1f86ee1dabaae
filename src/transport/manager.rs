use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::kvstore::{KvError, ReadResult};
use crate::storage::DramStorage;

use super::tagged::{self, Endpoint, LinkEvent, Listener, TagWorker};

/// Default cap on a single on-wire message (header + key + value).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Extra scheduler passes granted during shutdown so in-flight handler
/// tasks can push their final completions through the progress loop.
const SHUTDOWN_DRAIN_ITERATIONS: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    pub max_message_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

/// Outcome tuples produced by completion tasks and drained by the progress
/// loop, which resolves the matching pending promise.
pub enum Completion {
    WriteAck {
        request_id: u64,
        status: Result<u32, KvError>,
    },
    ReadOutcome {
        request_id: u64,
        outcome: ReadResult,
    },
}

struct LinkState {
    listener: Option<Listener>,
    /// Server's view of each connected client (accepted links).
    client_endpoints: Vec<Endpoint>,
    /// Client-side links to remote servers, tracked for shutdown.
    remote_endpoints: Vec<Endpoint>,
}

/// Owns the transport state shared by every driver instance opened against
/// it: the tag-matching worker, the listener and link registries, the
/// pending-operation tables, and the request-id allocator.
///
/// Completion callbacks never resolve promises directly. They enqueue
/// `Completion` values; the manager's progress loop drains the queue and
/// resolves promises without holding any transport lock.
///
/// Drivers normally share the lazily initialized process-wide manager
/// (`TransportManager::shared()`), but tests and embedders may create as
/// many independent managers as they need.
pub struct TransportManager {
    config: TransportConfig,
    worker: Arc<TagWorker>,
    storage: Arc<DramStorage>,
    pending_writes: DashMap<u64, oneshot::Sender<Result<(), KvError>>>,
    pending_reads: DashMap<u64, oneshot::Sender<ReadResult>>,
    next_request_id: AtomicU64,
    links: Mutex<LinkState>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    shutting_down: AtomicBool,
    progress: Mutex<Option<JoinHandle<()>>>,
}

impl TransportManager {
    pub fn new(config: TransportConfig) -> Arc<Self> {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let manager = Arc::new(Self {
            config,
            worker: TagWorker::new(config.max_message_bytes),
            storage: Arc::new(DramStorage::new()),
            pending_writes: DashMap::new(),
            pending_reads: DashMap::new(),
            next_request_id: AtomicU64::new(1),
            links: Mutex::new(LinkState {
                listener: None,
                client_endpoints: Vec::new(),
                remote_endpoints: Vec::new(),
            }),
            link_tx,
            completion_tx,
            shutting_down: AtomicBool::new(false),
            progress: Mutex::new(None),
        });

        let progress_task = tokio::spawn(Self::progress_loop(
            manager.clone(),
            link_rx,
            completion_rx,
        ));
        *manager.progress.lock().unwrap() = Some(progress_task);

        tracing::info!(
            "Transport manager initialized ({} byte message limit)",
            config.max_message_bytes
        );

        manager
    }

    /// The lazily initialized process-wide manager, torn down with the
    /// process.
    pub fn shared() -> Arc<TransportManager> {
        static SHARED: OnceLock<Arc<TransportManager>> = OnceLock::new();
        SHARED
            .get_or_init(|| TransportManager::new(TransportConfig::default()))
            .clone()
    }

    pub fn config(&self) -> TransportConfig {
        self.config
    }

    pub fn worker(&self) -> &Arc<TagWorker> {
        &self.worker
    }

    /// The server map (used by the receive path and the server-local driver
    /// paths).
    pub fn storage(&self) -> &Arc<DramStorage> {
        &self.storage
    }

    pub(crate) fn completion_sender(&self) -> mpsc::UnboundedSender<Completion> {
        self.completion_tx.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn ensure_active(&self) -> Result<(), KvError> {
        if self.is_shutting_down() {
            return Err(KvError::FailedPrecondition(
                "transport manager is shut down".to_string(),
            ));
        }
        Ok(())
    }

    /// Allocates the next request id. Ids start at 1 and increase
    /// monotonically; u64 does not overflow in practice.
    pub fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register_write(&self, request_id: u64, promise: oneshot::Sender<Result<(), KvError>>) {
        self.pending_writes.insert(request_id, promise);
    }

    pub fn register_read(&self, request_id: u64, promise: oneshot::Sender<ReadResult>) {
        self.pending_reads.insert(request_id, promise);
    }

    /// Resolves the pending write registered under `request_id`. A
    /// completion for an unknown id is ignored.
    pub fn complete_write(&self, request_id: u64, result: Result<(), KvError>) {
        match self.pending_writes.remove(&request_id) {
            Some((_, promise)) => {
                let _ = promise.send(result);
            }
            None => {
                tracing::debug!("Write completion for unknown request {}", request_id);
            }
        }
    }

    /// Resolves the pending read registered under `request_id`. A
    /// completion for an unknown id is ignored.
    pub fn complete_read(&self, request_id: u64, outcome: ReadResult) {
        match self.pending_reads.remove(&request_id) {
            Some((_, promise)) => {
                let _ = promise.send(outcome);
            }
            None => {
                tracing::debug!("Read completion for unknown request {}", request_id);
            }
        }
    }

    /// Binds the listening socket for server mode and starts accepting.
    /// Accepted links are registered as client endpoints by the progress
    /// loop.
    pub async fn create_listener(&self, listen_addr: &str) -> Result<SocketAddr, KvError> {
        self.ensure_active()?;
        let addr = parse_host_port(listen_addr)?;

        tracing::info!("Creating listener for {}", listen_addr);

        let listener = tagged::bind_listener(addr, self.worker.clone(), self.link_tx.clone())
            .await
            .map_err(|e| listener_error(listen_addr, e))?;
        let local_addr = listener.local_addr();

        {
            let mut links = self.links.lock().unwrap();
            if links.listener.is_some() {
                return Err(KvError::FailedPrecondition(
                    "listener already active on this manager".to_string(),
                ));
            }
            links.listener = Some(listener);
        }

        tracing::info!("Listener created on {}", local_addr);
        Ok(local_addr)
    }

    /// Connects to a remote server for client mode. The endpoint is tracked
    /// for shutdown.
    pub async fn connect(&self, remote_addr: &str) -> Result<Endpoint, KvError> {
        self.ensure_active()?;
        let addr = parse_host_port(remote_addr)?;

        tracing::info!("Connecting to {}", remote_addr);

        let endpoint = tagged::connect_endpoint(addr, self.worker.clone(), self.link_tx.clone())
            .await
            .map_err(|e| {
                KvError::Internal(format!("failed to connect to {}: {}", remote_addr, e))
            })?;

        self.links
            .lock()
            .unwrap()
            .remote_endpoints
            .push(endpoint.clone());

        tracing::info!("Connected to {}", remote_addr);
        Ok(endpoint)
    }

    /// Number of currently accepted client links (server mode).
    pub fn connected_clients(&self) -> usize {
        self.links.lock().unwrap().client_endpoints.len()
    }

    /// Tears the manager down: cancels posted receives, destroys the
    /// listener and every link, resolves pending writes as cancelled and
    /// pending reads as absent, then stops the progress loop. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("Shutting down transport manager");

        // Cancel posted receives first so their awaiting tasks exit instead
        // of posting replacements.
        self.worker.cancel_all();

        {
            let mut links = self.links.lock().unwrap();
            if links.listener.take().is_some() {
                tracing::info!("Destroyed listener");
            }
            let endpoint_count = links.client_endpoints.len() + links.remote_endpoints.len();
            links.client_endpoints.clear();
            links.remote_endpoints.clear();
            if endpoint_count > 0 {
                tracing::info!("Destroyed {} endpoints", endpoint_count);
            }
        }

        for _ in 0..SHUTDOWN_DRAIN_ITERATIONS {
            tokio::task::yield_now().await;
        }

        let write_ids: Vec<u64> = self.pending_writes.iter().map(|entry| *entry.key()).collect();
        for request_id in write_ids {
            self.complete_write(
                request_id,
                Err(KvError::Cancelled(
                    "transport manager shutting down".to_string(),
                )),
            );
        }

        let read_ids: Vec<u64> = self.pending_reads.iter().map(|entry| *entry.key()).collect();
        for request_id in read_ids {
            self.complete_read(request_id, ReadResult::missing());
        }

        if let Some(task) = self.progress.lock().unwrap().take() {
            task.abort();
        }

        tracing::info!("Transport manager shutdown complete");
    }

    /// Drains link events and completion tuples, resolving promises outside
    /// of any transport lock.
    async fn progress_loop(
        manager: Arc<Self>,
        mut link_rx: mpsc::UnboundedReceiver<LinkEvent>,
        mut completion_rx: mpsc::UnboundedReceiver<Completion>,
    ) {
        loop {
            tokio::select! {
                event = link_rx.recv() => match event {
                    Some(LinkEvent::Connected(endpoint)) => {
                        manager.register_client_endpoint(endpoint);
                    }
                    Some(LinkEvent::Disconnected { peer, reason }) => {
                        manager.handle_link_down(peer, &reason);
                    }
                    None => break,
                },
                completion = completion_rx.recv() => match completion {
                    Some(completion) => manager.apply_completion(completion),
                    None => break,
                },
            }
        }

        tracing::debug!("Progress loop stopped");
    }

    fn apply_completion(&self, completion: Completion) {
        match completion {
            Completion::WriteAck { request_id, status } => {
                let result = match status {
                    Ok(0) => Ok(()),
                    Ok(code) => Err(KvError::Internal(format!(
                        "server rejected write with status {}",
                        code
                    ))),
                    Err(e) => Err(e),
                };
                self.complete_write(request_id, result);
            }
            Completion::ReadOutcome {
                request_id,
                outcome,
            } => {
                self.complete_read(request_id, outcome);
            }
        }
    }

    fn register_client_endpoint(&self, endpoint: Endpoint) {
        let mut links = self.links.lock().unwrap();
        links.client_endpoints.push(endpoint);
        tracing::info!(
            "Registered client endpoint, total clients: {}",
            links.client_endpoints.len()
        );
    }

    /// Error-handler path: a closed link can never deliver responses for
    /// requests in flight on it, so everything pending is failed.
    fn handle_link_down(&self, peer: SocketAddr, reason: &str) {
        if self.is_shutting_down() {
            return;
        }

        tracing::error!("Connection error on {}: {}", peer, reason);

        {
            let mut links = self.links.lock().unwrap();
            links.client_endpoints.retain(|endpoint| endpoint.peer() != peer);
            links.remote_endpoints.retain(|endpoint| endpoint.peer() != peer);
        }

        let detail = format!("connection to {} lost: {}", peer, reason);

        let write_ids: Vec<u64> = self.pending_writes.iter().map(|entry| *entry.key()).collect();
        for request_id in write_ids {
            self.complete_write(request_id, Err(KvError::Internal(detail.clone())));
        }

        let read_ids: Vec<u64> = self.pending_reads.iter().map(|entry| *entry.key()).collect();
        for request_id in read_ids {
            self.complete_read(request_id, ReadResult::missing());
        }
    }
}

/// Parses `host:port` into an IPv4 socket address. Host may be `0.0.0.0`,
/// `127.0.0.1`/`localhost`, or any dotted-quad address; port must lie in
/// (0, 65535].
pub fn parse_host_port(addr: &str) -> Result<SocketAddr, KvError> {
    let Some((host, port_str)) = addr.rsplit_once(':') else {
        return Err(KvError::InvalidArgument(format!(
            "invalid address '{}', expected host:port",
            addr
        )));
    };

    let port: u32 = port_str.parse().map_err(|_| {
        KvError::InvalidArgument(format!("invalid port '{}'", port_str))
    })?;
    if port == 0 || port > 65535 {
        return Err(KvError::InvalidArgument(format!(
            "port {} out of range",
            port
        )));
    }

    let ip = if host == "localhost" {
        Ipv4Addr::LOCALHOST
    } else {
        host.parse::<Ipv4Addr>().map_err(|_| {
            KvError::InvalidArgument(format!("invalid host address '{}'", host))
        })?
    };

    Ok(SocketAddr::from((ip, port as u16)))
}

fn listener_error(listen_addr: &str, e: io::Error) -> KvError {
    match e.kind() {
        io::ErrorKind::AddrInUse => {
            KvError::ResourceExhausted(format!("port busy for {}: {}", listen_addr, e))
        }
        io::ErrorKind::AddrNotAvailable => KvError::Unreachable(format!(
            "address {} is unreachable or invalid: {}",
            listen_addr, e
        )),
        io::ErrorKind::Unsupported => KvError::Unimplemented(format!(
            "listener not supported for {}: {}",
            listen_addr, e
        )),
        _ => KvError::Internal(format!(
            "failed to create listener on {}: {}",
            listen_addr, e
        )),
    }
}
