//! Remote DRAM Key-Value Store
//!
//! This library crate implements a key→bytes store whose backing storage is
//! the memory of a peer process reached over a tagged-messaging transport.
//! One binary hosts both roles: a **server** that owns the in-memory map and
//! a **client** that issues Read/Write RPCs against it. The role is selected
//! by configuration (`listen_addr` vs `remote_addr`).
//!
//! ## Architecture Modules
//! The system is composed of six loosely coupled subsystems:
//!
//! - **`kvstore`**: The operation contract shared with the enclosing driver
//!   registry: read outcomes, generation stamps, error kinds, the dyn-safe
//!   `Driver` trait, and the registry mapping driver ids to openers.
//! - **`protocol`**: The wire format. Fixed 28-byte packed headers, four
//!   message variants, payload checksums, and the transport tag constants
//!   used to route responses to the matching receive.
//! - **`storage`**: The server-side state. A single-mutex key→bytes map with
//!   last-writer-wins overwrite semantics.
//! - **`transport`**: The tagged-messaging layer (framed links, posted
//!   receives with tag/mask matching) and the `TransportManager` that owns
//!   links, request ids, pending-operation tables, and the completion queue.
//! - **`server`**: The receive path. Pre-posts a pool of wildcard receives,
//!   dispatches decoded requests into storage, and emits responses on the
//!   exact link each request arrived on.
//! - **`driver`**: The kvstore facade. JSON config binding, the remote RPC
//!   client, the server-local convenience paths, and driver registration.

pub mod driver;
pub mod kvstore;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod transport;
