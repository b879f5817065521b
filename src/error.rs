//! Error types shared across the store, transport, and protocol layers.
//!
//! The server protocol engine (see [`crate::server`]) is the single place
//! that classifies errors into wire [`crate::protocol::Status`] values; every
//! other layer just produces a typed error and lets it bubble up.

use thiserror::Error;

/// Errors produced by the chat store.
///
/// Mirrors the `storeError`/`allocError` taxonomy from the chat store
/// contract: store implementations return an opaque message string, and the
/// most recent one is retrievable via [`crate::store::ChatStore::last_error`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Backend(String),
    #[error("allocation failed: {0}")]
    Alloc(String),
}

impl StoreError {
    pub fn message(&self) -> String {
        match self {
            StoreError::Backend(m) | StoreError::Alloc(m) => m.clone(),
        }
    }
}

/// Errors produced by a transport adapter.
///
/// Transports never classify these as user/system/fatal; that is the
/// server protocol engine's job.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed")]
    Closed,
    #[error("short read/write: expected {expected} bytes, got {actual}")]
    ShortIo { expected: usize, actual: usize },
    #[error("header line exceeds maximum length of {0} bytes")]
    HeaderTooLong(usize),
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    #[error("{0}")]
    Other(String),
}

/// Errors produced while decoding a frame payload (NUL-separated fields).
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("expected {expected} NUL-separated fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("payload is not valid UTF-8")]
    NotUtf8,
}

/// The classified error surfaced by the server protocol engine, carrying the
/// wire status it must be reported with.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("{0}")]
    UserErr(String),
    #[error("SYS_ERR: {0}")]
    SysErr(String),
    #[error("FATAL_ERR: {0}")]
    FatalErr(String),
}

impl ChatError {
    pub fn bad_room() -> Self {
        ChatError::UserErr("BAD_ROOM: unknown room".to_string())
    }

    pub fn bad_topic() -> Self {
        ChatError::UserErr("BAD_TOPIC: unknown topic".to_string())
    }

    /// The message text as it should appear on the wire, without any status
    /// prefix (the prefix is added by the client when printing, not encoded
    /// into the body).
    pub fn wire_message(&self) -> &str {
        match self {
            ChatError::UserErr(m) => m,
            ChatError::SysErr(m) => m,
            ChatError::FatalErr(m) => m,
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        ChatError::SysErr(e.message())
    }
}
