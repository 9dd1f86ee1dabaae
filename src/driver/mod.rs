//! Remote DRAM Driver Module
//!
//! The kvstore facade over the transport. A driver instance is opened in
//! one of two modes:
//!
//! - **Server mode** (`listen_addr`): starts the listener and receive pool;
//!   read/write on the instance go straight to the in-process map, which is
//!   useful for self-tests but does not exercise the wire.
//! - **Client mode** (`remote_addr`): connects an endpoint to a server and
//!   turns read/write into framed RPCs correlated by request id.
//!
//! ## Submodules
//! - **`config`**: JSON config binding and mode validation.
//! - **`remote`**: The client RPC path (encode, register promise, post the
//!   response receive, send, await the completion).
//! - **`facade`**: `RemoteDramDriver` itself plus registration into the
//!   driver registry.

pub mod config;
pub mod facade;
pub mod remote;

pub use config::{DRIVER_ID, Mode, RemoteDramConfig};
pub use facade::{RemoteDramDriver, default_registry, register};
pub use remote::RemoteClient;
