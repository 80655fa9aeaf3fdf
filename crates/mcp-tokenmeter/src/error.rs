//! Error taxonomy for the measurement pipeline.
//!
//! Fatal conditions are typed so the binary can map them to distinct exit
//! codes. Partial resource failures never show up here: they become warning
//! strings inside `FetchResult`.

use std::time::Duration;

use thiserror::Error;

use crate::mcp::Category;

/// The embedded vocabulary could not be turned into a usable table.
#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("vocabulary line {line}: invalid base64 token: {source}")]
    Base64 {
        line: usize,
        #[source]
        source: base64::DecodeError,
    },
    #[error("vocabulary line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("vocabulary has no entry for byte {0:#04x}")]
    MissingByte(u8),
    #[error("split pattern does not compile: {0}")]
    Pattern(#[from] Box<fancy_regex::Error>),
    #[error("special token matcher: {0}")]
    SpecialTokens(#[from] aho_corasick::BuildError),
}

/// A single JSON-RPC exchange with the server went wrong.
#[derive(Debug, Error)]
pub enum RpcFailure {
    #[error("transport: {0}")]
    Io(#[from] std::io::Error),
    #[error("server closed the connection")]
    Closed,
    #[error("{method} timed out after {}ms", .after.as_millis())]
    Timeout { method: String, after: Duration },
    #[error("{message} (code {code})")]
    Remote { code: i64, message: String },
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// The server process could not be brought to a usable session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server process has no {0} pipe")]
    MissingPipe(&'static str),
    #[error("handshake failed: {0}")]
    Handshake(#[source] RpcFailure),
    #[error("malformed handshake response: {0}")]
    Malformed(String),
}

/// Listing one category failed part way through.
#[derive(Debug, Error)]
#[error("listing {category} failed: {cause}")]
pub struct EnumerationError {
    pub category: Category,
    #[source]
    pub cause: RpcFailure,
}

impl EnumerationError {
    /// Warning line recorded when the category tolerates partial results.
    pub fn as_warning(&self) -> String {
        format!("{}: {}", self.category, self.cause)
    }
}

/// Everything that aborts a fetch as a whole.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Enumeration(#[from] EnumerationError),
    #[error("cancelled")]
    Cancelled,
    #[error("timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
}
