//! # Command-Line Interface
//!
//! One `clap`-derive argument struct per binary (spec §6.5): the two daemons
//! (`chatd-tcp`, `chatd-fifo`) and the four clients (`chat-client-tcp`,
//! `chat-client-pipe`, `chat-client-fifo`, `chat-client-shm`). Validation
//! that the spec assigns to the excluded terminal parser — USER starting
//! with `@`, ROOM starting with a letter, port range, minimum shared-memory
//! size — is enforced here instead, via `clap`'s `value_parser` hook, since
//! these are positional CLI arguments rather than terminal command syntax.
//!
//! `chat-client-fifo` takes `SERVER_DIR` rather than the spec's general
//! `DBFILE_PATH` for "local variants": unlike the pipe and shared-memory
//! clients (which fork their own single-session server and therefore need
//! the database path directly), the FIFO client connects to an
//! already-running `chatd-fifo` daemon that owns the database. Recorded as
//! a Design decision in DESIGN.md.

use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser,
};
use std::path::PathBuf;

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

fn validate_port(s: &str) -> Result<u16, String> {
    let port: u16 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid port number"))?;
    if !(1024..=65535).contains(&port) {
        return Err(format!("port must be in [1024, 65535], got {port}"));
    }
    Ok(port)
}

fn validate_user(s: &str) -> Result<String, String> {
    if !s.starts_with('@') {
        return Err(format!("USER must start with '@', got '{s}'"));
    }
    Ok(s.to_string())
}

fn validate_room(s: &str) -> Result<String, String> {
    match s.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => Ok(s.to_string()),
        _ => Err(format!("ROOM must start with a letter, got '{s}'")),
    }
}

fn validate_shm_size_kib(s: &str) -> Result<usize, String> {
    let kib: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid size in KiB"))?;
    let bytes = kib.saturating_mul(1024);
    if bytes < crate::transport::shm::MIN_SHM_SIZE {
        return Err(format!(
            "shared-memory size must be at least {} bytes, got {bytes}",
            crate::transport::shm::MIN_SHM_SIZE
        ));
    }
    Ok(bytes)
}

/// `chatd-tcp PORT DBFILE_PATH`: the TCP multi-user chat daemon.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "TCP chat daemon", styles = styles())]
pub struct ChatdTcpArgs {
    /// TCP port to listen on, in [1024, 65535].
    #[arg(value_parser = validate_port)]
    pub port: u16,

    /// Path to the SQLite database file backing the chat store.
    pub dbfile_path: PathBuf,
}

/// `chatd-fifo SERVER_DIR DBFILE_PATH`: the named-FIFO chat daemon.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "FIFO chat daemon", styles = styles())]
pub struct ChatdFifoArgs {
    /// Directory holding the well-known `REQUESTS` FIFO and the per-client
    /// FIFO pairs.
    pub server_dir: PathBuf,

    /// Path to the SQLite database file backing the chat store.
    pub dbfile_path: PathBuf,
}

/// `chat-client-tcp HOST PORT USER ROOM`.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "TCP chat client", styles = styles())]
pub struct ChatClientTcpArgs {
    /// Daemon host to connect to.
    pub host: String,

    /// Daemon port, in [1024, 65535].
    #[arg(value_parser = validate_port)]
    pub port: u16,

    /// This session's user name; must start with `@`.
    #[arg(value_parser = validate_user)]
    pub user: String,

    /// The room to join; must start with a letter.
    #[arg(value_parser = validate_room)]
    pub room: String,
}

/// `chat-client-pipe DBFILE_PATH`: forks its own single-session server
/// connected by a pair of anonymous pipes.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Anonymous-pipe chat client", styles = styles())]
pub struct ChatClientPipeArgs {
    /// Path to the SQLite database file the forked server opens.
    pub dbfile_path: PathBuf,
}

/// `chat-client-fifo SERVER_DIR`: connects to an already-running
/// `chatd-fifo` daemon.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Named-FIFO chat client", styles = styles())]
pub struct ChatClientFifoArgs {
    /// Directory holding the daemon's well-known `REQUESTS` FIFO.
    pub server_dir: PathBuf,
}

/// `chat-client-shm DBFILE_PATH [SHM_SIZE_KiB]`: forks its own
/// single-session server connected by a shared-memory segment.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Shared-memory chat client", styles = styles())]
pub struct ChatClientShmArgs {
    /// Path to the SQLite database file the forked server opens.
    pub dbfile_path: PathBuf,

    /// Shared-memory segment size in KiB; must yield at least 1024 bytes.
    #[arg(value_parser = validate_shm_size_kib, default_value_t = 4096)]
    pub shm_size_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_validator_rejects_out_of_range() {
        assert!(validate_port("80").is_err());
        assert!(validate_port("70000").is_err());
        assert!(validate_port("8080").is_ok());
    }

    #[test]
    fn user_validator_requires_at_sign() {
        assert!(validate_user("zdu").is_err());
        assert!(validate_user("@zdu").is_ok());
    }

    #[test]
    fn room_validator_requires_leading_letter() {
        assert!(validate_room("1sysprog").is_err());
        assert!(validate_room("sysprog").is_ok());
    }

    #[test]
    fn shm_size_validator_enforces_minimum() {
        assert!(validate_shm_size_kib("0").is_err());
        assert_eq!(validate_shm_size_kib("4").unwrap(), 4096);
    }

    #[test]
    fn chatd_tcp_args_parse_positionals() {
        let args = ChatdTcpArgs::parse_from(["chatd-tcp", "9000", "chat.db"]);
        assert_eq!(args.port, 9000);
        assert_eq!(args.dbfile_path, PathBuf::from("chat.db"));
    }

    #[test]
    fn chat_client_tcp_args_parse_positionals() {
        let args =
            ChatClientTcpArgs::parse_from(["chat-client-tcp", "127.0.0.1", "9000", "@zdu", "sysprog"]);
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, 9000);
        assert_eq!(args.user, "@zdu");
        assert_eq!(args.room, "sysprog");
    }
}
