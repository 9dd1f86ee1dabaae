//! Driver Facade
//!
//! `RemoteDramDriver` implements the kvstore operation contract and
//! dispatches each call to the server-local or remote path depending on the
//! mode it was opened in.

use std::sync::{Arc, OnceLock};

use crate::kvstore::{
    Driver, DriverFuture, DriverRegistry, KeyRange, KvError, ListOptions, ListSink, ReadOptions,
    ReadResult, TimestampedGeneration, WriteOptions,
};
use crate::server;
use crate::transport::{TransportConfig, TransportManager};

use super::config::{self, Mode, RemoteDramConfig};
use super::remote::RemoteClient;

enum DriverMode {
    /// Listener running; reads and writes hit the in-process map.
    Server,
    /// Connected to a remote server; reads and writes are RPCs.
    Client(RemoteClient),
}

/// The `remote_dram` kvstore driver.
pub struct RemoteDramDriver {
    manager: Arc<TransportManager>,
    mode: DriverMode,
}

impl RemoteDramDriver {
    /// Opens a driver against the process-wide manager (or a dedicated one
    /// when the config overrides the message limit).
    pub async fn open(config: RemoteDramConfig) -> Result<Arc<Self>, KvError> {
        let manager = match config.max_message_bytes {
            Some(limit) => TransportManager::new(TransportConfig {
                max_message_bytes: limit,
            }),
            None => TransportManager::shared(),
        };
        Self::open_with_manager(config, manager).await
    }

    /// Opens a driver against an explicit manager handle.
    pub async fn open_with_manager(
        config: RemoteDramConfig,
        manager: Arc<TransportManager>,
    ) -> Result<Arc<Self>, KvError> {
        let mode = match config.validate()? {
            Mode::Server(listen_addr) => {
                tracing::info!("Opening remote_dram driver in server mode on {}", listen_addr);
                server::start(&manager, &listen_addr).await?;
                DriverMode::Server
            }
            Mode::Client(remote_addr) => {
                tracing::info!("Opening remote_dram driver in client mode to {}", remote_addr);
                let client = RemoteClient::connect(manager.clone(), &remote_addr).await?;
                DriverMode::Client(client)
            }
        };

        Ok(Arc::new(Self { manager, mode }))
    }

    pub fn is_server_mode(&self) -> bool {
        matches!(self.mode, DriverMode::Server)
    }

    pub fn manager(&self) -> &Arc<TransportManager> {
        &self.manager
    }

    async fn read_impl(&self, key: &[u8]) -> Result<ReadResult, KvError> {
        match &self.mode {
            DriverMode::Server => Ok(self.read_local(key)),
            DriverMode::Client(client) => client.read(key).await,
        }
    }

    async fn write_impl(
        &self,
        key: &[u8],
        value: Option<Vec<u8>>,
    ) -> Result<TimestampedGeneration, KvError> {
        let Some(value) = value else {
            return Err(KvError::InvalidArgument(
                "write value cannot be null".to_string(),
            ));
        };

        match &self.mode {
            DriverMode::Server => Ok(self.write_local(key, value)),
            DriverMode::Client(client) => client.write(key, &value).await,
        }
    }

    /// Server-mode read against the in-process map. Does not touch the
    /// wire.
    fn read_local(&self, key: &[u8]) -> ReadResult {
        match self.manager.storage().get(key) {
            Some(value) => ReadResult::value(value),
            None => ReadResult::missing(),
        }
    }

    /// Server-mode write against the in-process map. Does not touch the
    /// wire.
    fn write_local(&self, key: &[u8], value: Vec<u8>) -> TimestampedGeneration {
        self.manager.storage().store(key.to_vec(), value);
        TimestampedGeneration::fresh()
    }
}

impl Driver for RemoteDramDriver {
    fn read<'a>(
        &'a self,
        key: &'a [u8],
        _options: ReadOptions,
    ) -> DriverFuture<'a, Result<ReadResult, KvError>> {
        Box::pin(async move { self.read_impl(key).await })
    }

    fn write<'a>(
        &'a self,
        key: &'a [u8],
        value: Option<Vec<u8>>,
        _options: WriteOptions,
    ) -> DriverFuture<'a, Result<TimestampedGeneration, KvError>> {
        Box::pin(async move { self.write_impl(key, value).await })
    }

    fn delete_range<'a>(&'a self, _range: KeyRange) -> DriverFuture<'a, Result<(), KvError>> {
        Box::pin(async {
            Err(KvError::Unimplemented(
                "remote_dram driver does not support delete_range".to_string(),
            ))
        })
    }

    fn list(&self, _options: ListOptions, sink: ListSink) {
        let _ = sink.send(Err(KvError::Unimplemented(
            "remote_dram driver does not support list".to_string(),
        )));
    }
}

/// Registers the `remote_dram` opener in `registry`.
pub fn register(registry: &DriverRegistry) {
    registry.register(config::DRIVER_ID, |json| async move {
        let config = RemoteDramConfig::from_json(json)?;
        let driver: Arc<dyn Driver> = RemoteDramDriver::open(config).await?;
        Ok(driver)
    });
}

/// The process-wide driver registry with `remote_dram` pre-registered.
pub fn default_registry() -> Arc<DriverRegistry> {
    static REGISTRY: OnceLock<Arc<DriverRegistry>> = OnceLock::new();
    REGISTRY
        .get_or_init(|| {
            let registry = DriverRegistry::new();
            register(&registry);
            registry
        })
        .clone()
}
