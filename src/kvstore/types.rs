use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;

use tokio::sync::mpsc;

use super::error::KvError;

/// Opaque stamp attached to write and read outcomes.
///
/// A stamp is unique per successful write; `no_value` marks outcomes that
/// carry no stored value (a missing key, a cancelled read).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation(Option<String>);

impl Generation {
    /// Mints a fresh, globally unique stamp.
    pub fn fresh() -> Self {
        Self(Some(uuid::Uuid::new_v4().to_string()))
    }

    /// The stamp of an outcome with no stored value.
    pub fn no_value() -> Self {
        Self(None)
    }

    pub fn is_no_value(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// A generation stamp paired with the wall-clock time it was minted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedGeneration {
    pub generation: Generation,
    pub time: SystemTime,
}

impl TimestampedGeneration {
    pub fn fresh() -> Self {
        Self {
            generation: Generation::fresh(),
            time: SystemTime::now(),
        }
    }

    pub fn no_value() -> Self {
        Self {
            generation: Generation::no_value(),
            time: SystemTime::now(),
        }
    }
}

/// Discriminates the two read outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// The key was present; `value` holds its bytes.
    Value,
    /// The key was absent (or the read could not be completed).
    Missing,
}

/// Outcome of a read operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    pub state: ReadState,
    pub value: Vec<u8>,
    pub stamp: TimestampedGeneration,
}

impl ReadResult {
    /// A valued outcome with a fresh stamp.
    pub fn value(bytes: Vec<u8>) -> Self {
        Self {
            state: ReadState::Value,
            value: bytes,
            stamp: TimestampedGeneration::fresh(),
        }
    }

    /// An absent outcome with a no-value stamp.
    pub fn missing() -> Self {
        Self {
            state: ReadState::Missing,
            value: Vec::new(),
            stamp: TimestampedGeneration::no_value(),
        }
    }

    pub fn is_missing(&self) -> bool {
        self.state == ReadState::Missing
    }
}

/// Options accepted by `Driver::read`. Currently ignored by this driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions;

/// Options accepted by `Driver::write`. Currently ignored by this driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions;

/// Options accepted by `Driver::list`. Currently ignored by this driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions;

/// Half-open key interval `[inclusive_min, exclusive_max)`.
#[derive(Debug, Clone, Default)]
pub struct KeyRange {
    pub inclusive_min: Vec<u8>,
    pub exclusive_max: Vec<u8>,
}

/// Receiver side of a list operation: each item is a key or a terminal
/// error.
pub type ListSink = mpsc::UnboundedSender<Result<Vec<u8>, KvError>>;

/// Boxed future returned by `Driver` methods, borrowing the call arguments.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The kvstore operation contract.
///
/// Object-safe so the registry can hand out `Arc<dyn Driver>`; methods
/// return boxed futures for the same reason.
pub trait Driver: Send + Sync {
    /// Reads the value stored under `key`.
    fn read<'a>(
        &'a self,
        key: &'a [u8],
        options: ReadOptions,
    ) -> DriverFuture<'a, Result<ReadResult, KvError>>;

    /// Stores `value` under `key`. A `None` value is rejected with
    /// `InvalidArgument`.
    fn write<'a>(
        &'a self,
        key: &'a [u8],
        value: Option<Vec<u8>>,
        options: WriteOptions,
    ) -> DriverFuture<'a, Result<TimestampedGeneration, KvError>>;

    /// Deletes all keys in `range`.
    fn delete_range<'a>(&'a self, range: KeyRange) -> DriverFuture<'a, Result<(), KvError>>;

    /// Streams keys into `sink`. A driver without list support delivers the
    /// error through the sink.
    fn list(&self, options: ListOptions, sink: ListSink);
}
