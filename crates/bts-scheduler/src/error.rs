use bts_core::TaskId;
use thiserror::Error;

/// Errors raised while converting extras to and from their flat encoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The caller supplied a value that has no extras representation.
    #[error("Unsupported extra value for key '{key}': {reason}")]
    Unsupported { key: String, reason: String },

    /// A persisted or delivered item could not be turned back into a value.
    #[error("Malformed extra '{key}': {reason}")]
    Malformed { key: String, reason: String },

    /// The same key appeared twice in an encoded list.
    #[error("Duplicate extra key: {0}")]
    DuplicateKey(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Builder-time validation failures for [`crate::types::TaskInfo`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskInfoError {
    #[error("window end ({end_ms}ms) must be after window start ({start_ms}ms)")]
    EmptyWindow { start_ms: i64, end_ms: i64 },

    #[error("window offsets must be non-negative")]
    NegativeWindow,

    #[error("trigger time must be non-negative, got {0}")]
    NegativeTrigger(i64),

    #[error("periodic interval must be positive, got {0}")]
    InvalidInterval(i64),

    #[error("flex ({flex_ms}ms) must be within 0..=interval ({interval_ms}ms)")]
    InvalidFlex { interval_ms: i64, flex_ms: i64 },
}

/// Errors from the SQLite-backed task registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored record could not be decoded.
    #[error("Corrupt record for task {task_id}: {source}")]
    Corrupt {
        task_id: TaskId,
        #[source]
        source: CodecError,
    },

    /// A previous holder of the connection lock panicked.
    #[error("Registry lock poisoned")]
    Poisoned,
}

/// Errors reported by an OS scheduling primitive.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The primitive refused the request.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The primitive is not usable on this device (e.g. missing services).
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The primitive has no registration for the given task.
    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),
}

/// A stored backend name that no [`crate::backend::BackendKind`] matches.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown backend kind: {0}")]
pub struct UnknownBackendKind(pub String);

/// Errors raised while handing work to the main thread.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The main loop has shut down and will not run more work.
    #[error("Main thread is gone")]
    MainThreadGone,

    /// The closure panicked or was dropped before replying.
    #[error("Main thread dropped the task before replying")]
    NoReply,
}

pub type Result<T> = std::result::Result<T, RegistryError>;
