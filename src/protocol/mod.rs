//! # Wire Protocol: Headers and Payload Framing
//!
//! This module defines the request/response framing shared by every
//! transport adapter (see [`crate::transport`]). Two header kinds flow over
//! every connection: [`ClientHeader`] and [`ServerHeader`]. Stream
//! transports (pipes, FIFOs, TCP) encode headers as a single ASCII line
//! (see [`line`]); the shared-memory transport encodes them as a fixed
//! `#[repr(C)]` struct transmitted by value (see [`packed`]).
//!
//! Payload encoding is the same NUL-separated field layout regardless of
//! transport (see [`payload`]).

pub mod channel;
pub mod line;
pub mod packed;
pub mod payload;

/// The four command types of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CmdType {
    Add = 0,
    Query = 1,
    End = 2,
    Init = 3,
}

impl CmdType {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(CmdType::Add),
            1 => Some(CmdType::Query),
            2 => Some(CmdType::End),
            3 => Some(CmdType::Init),
            _ => None,
        }
    }
}

/// Server response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    UserErr = 1,
    SysErr = 2,
    FatalErr = 3,
    EndAck = 4,
}

impl Status {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Status::Ok),
            1 => Some(Status::UserErr),
            2 => Some(Status::SysErr),
            3 => Some(Status::FatalErr),
            4 => Some(Status::EndAck),
            _ => None,
        }
    }

    /// The prefix a client prints before the error message, per the error
    /// handling design: `""` for user errors, `"SYS_ERR: "`/`"FATAL_ERR: "`
    /// for the other two kinds. `Ok`/`EndAck` have no prefix.
    pub fn err_prefix(self) -> &'static str {
        match self {
            Status::UserErr => "",
            Status::SysErr => "SYS_ERR: ",
            Status::FatalErr => "FATAL_ERR: ",
            Status::Ok | Status::EndAck => "",
        }
    }
}

/// Request header sent by the client before a payload (if any).
///
/// `count` is only meaningful for `QUERY` (`-1` otherwise); `n_topics` and
/// `n_bytes` describe the payload that immediately follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHeader {
    pub cmd_type: CmdType,
    pub count: i64,
    pub n_topics: usize,
    pub n_bytes: usize,
}

impl ClientHeader {
    pub fn add(n_topics: usize, n_bytes: usize) -> Self {
        ClientHeader {
            cmd_type: CmdType::Add,
            count: -1,
            n_topics,
            n_bytes,
        }
    }

    pub fn query(count: i64, n_topics: usize, n_bytes: usize) -> Self {
        ClientHeader {
            cmd_type: CmdType::Query,
            count,
            n_topics,
            n_bytes,
        }
    }

    pub fn end() -> Self {
        ClientHeader {
            cmd_type: CmdType::End,
            count: -1,
            n_topics: 0,
            n_bytes: 0,
        }
    }

    pub fn init(n_bytes: usize) -> Self {
        ClientHeader {
            cmd_type: CmdType::Init,
            count: -1,
            n_topics: 0,
            n_bytes,
        }
    }
}

/// Response header sent by the server before a payload (if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerHeader {
    pub status: Status,
    pub n_bytes: usize,
}

impl ServerHeader {
    pub fn ok(n_bytes: usize) -> Self {
        ServerHeader {
            status: Status::Ok,
            n_bytes,
        }
    }

    pub fn end_ack() -> Self {
        ServerHeader {
            status: Status::EndAck,
            n_bytes: 0,
        }
    }

    pub fn error(status: Status, message: &str) -> Self {
        debug_assert_ne!(status, Status::Ok);
        ServerHeader {
            status,
            n_bytes: message.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_type_round_trips() {
        for v in 0..4 {
            assert_eq!(CmdType::from_i32(v).unwrap() as i32, v);
        }
        assert!(CmdType::from_i32(4).is_none());
    }

    #[test]
    fn status_round_trips() {
        for v in 0..5 {
            assert_eq!(Status::from_i32(v).unwrap() as i32, v);
        }
        assert!(Status::from_i32(5).is_none());
    }

    #[test]
    fn err_prefixes_match_taxonomy() {
        assert_eq!(Status::UserErr.err_prefix(), "");
        assert_eq!(Status::SysErr.err_prefix(), "SYS_ERR: ");
        assert_eq!(Status::FatalErr.err_prefix(), "FATAL_ERR: ");
    }
}
