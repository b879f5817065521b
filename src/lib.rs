//! # Rusty Chat
//!
//! A transport-agnostic multi-user chat service. One wire protocol —
//! ASCII-line or packed-struct headers framing a NUL-separated payload —
//! carried over four interchangeable transports: anonymous pipes, named
//! FIFOs, a semaphore-guarded shared-memory segment, and TCP. Only TCP
//! supports more than one concurrent session per server process; the other
//! three are inherently one client, one server, one session.
//!
//! - [`protocol`]: wire framing (headers, payload encoding, the
//!   [`protocol::channel::FrameChannel`] abstraction unifying line vs.
//!   packed headers).
//! - [`transport`]: the four byte-stream adapters, each reducing to a
//!   [`transport::Duplex`].
//! - [`store`]: the persistent, case-insensitive, indexed chat repository.
//! - [`server`]: the request loops (single-session and multi-session/TCP)
//!   and the shared `query_sequence` dispatch.
//! - [`session`]: the TCP room registry used for broadcast.
//! - [`client`]: the response-collection state machine shared by every
//!   client binary.
//! - [`error`]: the store/transport/payload/chat error taxonomy, with
//!   [`server`] as the sole point that classifies errors into a wire status.

pub mod cli;
pub mod client;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod session;
pub mod store;
pub mod transport;

pub use error::ChatError;
pub use store::{ChatStore, SqliteChatStore};

/// The current version of the chat service.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
