//! Engine error taxonomy.

use std::fmt;

/// Errors the engine can return from a single operation.
///
/// These map onto wire-level `ERROR`/`SERVER_ERROR`/`CLIENT_ERROR` lines in
/// `protocol::response`; they never carry the connection or shard lock
/// state with them.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A command's arguments were malformed (bad flags, bad length, bad
    /// exptime) before the engine ever touched a shard.
    #[error("bad argument: {0}")]
    BadArg(String),

    /// No arena/slab space left to satisfy an allocation, and growth was
    /// not possible under the configured memory ceiling.
    #[error("out of memory")]
    OutOfMemory,

    /// `get`/`delete` against a key with no live entry.
    #[error("not found")]
    NotFound,

    /// A size class or arena page was requested that is smaller than the
    /// minimum the allocator supports.
    #[error("requested size too small")]
    TooSmall,

    /// Transport-level failure reading or writing a connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the store and protocol layers.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// The wire-protocol class this error renders as.
    pub fn wire_class(&self) -> WireErrorClass {
        match self {
            EngineError::BadArg(_) => WireErrorClass::ClientError,
            EngineError::OutOfMemory => WireErrorClass::ServerError,
            EngineError::NotFound => WireErrorClass::NotFound,
            EngineError::TooSmall => WireErrorClass::ClientError,
            EngineError::Io(_) => WireErrorClass::ServerError,
        }
    }
}

/// Which of the three memcached error line shapes an `EngineError` renders
/// as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireErrorClass {
    /// Key has no live entry; not actually an error line, callers check
    /// for this before falling back to `ERROR`.
    NotFound,
    ClientError,
    ServerError,
}

impl fmt::Display for WireErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireErrorClass::NotFound => write!(f, "NOT_FOUND"),
            WireErrorClass::ClientError => write!(f, "CLIENT_ERROR"),
            WireErrorClass::ServerError => write!(f, "SERVER_ERROR"),
        }
    }
}
