//! Driver Configuration
//!
//! JSON binding for the `remote_dram` driver config. Exactly one of
//! `listen_addr` (server mode) and `remote_addr` (client mode) must be set.

use serde::{Deserialize, Serialize};

use crate::kvstore::KvError;

/// Identifier the driver is registered under.
pub const DRIVER_ID: &str = "remote_dram";

/// Deserialized driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDramConfig {
    /// Must equal `remote_dram`.
    pub driver: String,

    /// Server listen address (`host:port`), enables server mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_addr: Option<String>,

    /// Remote server address (`host:port`), enables client mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,

    /// Cap on a single on-wire message (header + key + value). Defaults to
    /// the transport's 64 KiB limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_bytes: Option<usize>,
}

/// Which role the config selects, with its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Server(String),
    Client(String),
}

impl RemoteDramConfig {
    pub fn from_json(value: serde_json::Value) -> Result<Self, KvError> {
        serde_json::from_value(value)
            .map_err(|e| KvError::InvalidArgument(format!("invalid driver config: {}", e)))
    }

    /// Checks the driver id and mode selection, returning the role to open.
    pub fn validate(&self) -> Result<Mode, KvError> {
        if self.driver != DRIVER_ID {
            return Err(KvError::InvalidArgument(format!(
                "config is for driver '{}', expected '{}'",
                self.driver, DRIVER_ID
            )));
        }

        match (&self.listen_addr, &self.remote_addr) {
            (Some(_), Some(_)) => Err(KvError::InvalidArgument(
                "cannot specify both listen_addr and remote_addr".to_string(),
            )),
            (None, None) => Err(KvError::InvalidArgument(
                "must specify either listen_addr (server mode) or remote_addr (client mode)"
                    .to_string(),
            )),
            (Some(listen), None) => Ok(Mode::Server(listen.clone())),
            (None, Some(remote)) => Ok(Mode::Client(remote.clone())),
        }
    }

    /// Convenience constructor for server-mode configs.
    pub fn server(listen_addr: &str) -> Self {
        Self {
            driver: DRIVER_ID.to_string(),
            listen_addr: Some(listen_addr.to_string()),
            remote_addr: None,
            max_message_bytes: None,
        }
    }

    /// Convenience constructor for client-mode configs.
    pub fn client(remote_addr: &str) -> Self {
        Self {
            driver: DRIVER_ID.to_string(),
            listen_addr: None,
            remote_addr: Some(remote_addr.to_string()),
            max_message_bytes: None,
        }
    }
}
