//! KvStore Operation Contract
//!
//! Defines the interface a key-value driver presents to the rest of the
//! system: read outcomes with generation stamps, the error kinds surfaced to
//! callers, the dyn-safe `Driver` trait, and a registry mapping driver ids
//! to async openers.
//!
//! Drivers register themselves under a string id (this crate ships
//! `remote_dram`); callers open a store by handing the registry a JSON
//! config whose `driver` member selects the implementation.

pub mod error;
pub mod registry;
pub mod types;

pub use error::KvError;
pub use registry::DriverRegistry;
pub use types::{
    Driver, DriverFuture, Generation, KeyRange, ListOptions, ListSink, ReadOptions, ReadResult,
    ReadState, TimestampedGeneration, WriteOptions,
};
