//! Wire commands this engine understands. `cas`/`add`/
//! `replace`/`incr`/`decr`/`append`/`prepend` and multi-key `get` are
//! explicitly out of scope.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { key: Vec<u8> },
    Set { key: Vec<u8>, flags: u32, exptime: i64, data: Vec<u8>, noreply: bool },
    Delete { key: Vec<u8>, noreply: bool },
    Stats,
    FlushAll,
    Quit,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("malformed command line")]
    MalformedLine,
    #[error("bad data chunk: expected {0} bytes terminated by CRLF")]
    BadDataChunk(usize),
    #[error("line too long")]
    LineTooLong,
    #[error("bad key: must be 1-250 bytes with no spaces or control characters")]
    BadKey,
}

impl ProtocolError {
    /// Whether this renders as a memcached `CLIENT_ERROR` line rather
    /// than a bare `ERROR` line — true for errors about a command's
    /// arguments, as opposed to its grammar.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ProtocolError::BadDataChunk(_) | ProtocolError::BadKey)
    }
}
