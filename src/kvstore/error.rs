use thiserror::Error;

/// Error kinds surfaced to kvstore callers.
///
/// Each variant carries a human-readable description; callers dispatch on
/// the variant, logs carry the text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    /// Malformed address, bad port, conflicting mode selection, or a null
    /// write value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The transport manager was used after shutdown (or a listener was
    /// requested twice on the same manager).
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// The listener port is already in use.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The listener address is invalid or unreachable.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The operation is not supported by this driver.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// Generic transport failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// The transport manager is shutting down.
    #[error("cancelled: {0}")]
    Cancelled(String),
}
