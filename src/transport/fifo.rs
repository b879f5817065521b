//! Named-FIFO transport (spec §4.5, "FIFOs"): a well-known request FIFO
//! (`REQUESTS`) in the server directory, and a pair of per-client FIFOs
//! named `<pid>.0`/`<pid>.1` created by the client before it announces
//! itself.
//!
//! Ported from the original daemon's FIFO-naming and open-ordering
//! convention (`utils.c`): the client creates `<pid>.0`/`<pid>.1`, writes
//! its pid as a line into `REQUESTS`, then opens `<pid>.0` for reading and
//! `<pid>.1` for writing, in that order. The daemon reads a pid from
//! `REQUESTS`, double-forks a worker (so the daemon never accumulates
//! zombies — the intermediate child exits immediately and the worker is
//! reparented to init), and the worker opens the client's two FIFOs in the
//! same order but with roles reversed, to avoid the classic FIFO open
//! deadlock.

use super::BoxedDuplex;
use crate::error::TransportError;
use nix::sys::stat::Mode;
use nix::unistd::{fork, ForkResult, Pid};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::pin::Pin;
use std::task::{Context, Poll};

pub const REQUESTS_FIFO_NAME: &str = "REQUESTS";

fn client_fifo_name(pid: Pid, zero_one: u8) -> String {
    format!("{}.{}", pid.as_raw(), zero_one)
}

/// Create the well-known `REQUESTS` FIFO in `server_dir` if it does not
/// already exist.
pub fn ensure_requests_fifo(server_dir: &Path) -> Result<PathBuf, TransportError> {
    let path = server_dir.join(REQUESTS_FIFO_NAME);
    match nix::unistd::mkfifo(&path, Mode::from_bits_truncate(0o666)) {
        Ok(()) => {}
        Err(nix::errno::Errno::EEXIST) => {}
        Err(e) => return Err(TransportError::Other(e.to_string())),
    }
    Ok(path)
}

/// Create this client's private pair of FIFOs (`<pid>.0`, `<pid>.1`) in
/// `server_dir`.
pub fn make_client_fifos(server_dir: &Path) -> Result<Pid, TransportError> {
    let pid = nix::unistd::getpid();
    for zero_one in 0..2u8 {
        let path = server_dir.join(client_fifo_name(pid, zero_one));
        match nix::unistd::mkfifo(&path, Mode::from_bits_truncate(0o666)) {
            Ok(()) => {}
            Err(e) => return Err(TransportError::Other(e.to_string())),
        }
    }
    Ok(pid)
}

/// Remove this client's private FIFO pair. Best-effort: called during
/// client teardown.
pub fn remove_client_fifos(server_dir: &Path, pid: Pid) {
    for zero_one in 0..2u8 {
        let _ = std::fs::remove_file(server_dir.join(client_fifo_name(pid, zero_one)));
    }
}

/// The client side: announce `pid` on `REQUESTS`, then open its own FIFO
/// pair (`.0` for reading, `.1` for writing), in that fixed order to match
/// the worker's reversed ordering and avoid the FIFO-open deadlock.
pub async fn connect_client(server_dir: &Path, pid: Pid) -> Result<BoxedDuplex, TransportError> {
    let requests_path = server_dir.join(REQUESTS_FIFO_NAME);
    {
        let mut requests = OpenOptions::new()
            .write(true)
            .open(&requests_path)
            .map_err(TransportError::Io)?;
        use std::io::Write;
        writeln!(requests, "{}", pid.as_raw()).map_err(TransportError::Io)?;
    }

    let read_path = server_dir.join(client_fifo_name(pid, 0));
    let write_path = server_dir.join(client_fifo_name(pid, 1));
    let read_fd = open_blocking(&read_path, false)?;
    let write_fd = open_blocking(&write_path, true)?;
    Ok(Box::new(FifoDuplex::new(read_fd, write_fd)?))
}

/// The daemon side: block reading pids from `REQUESTS`, double-forking a
/// worker per request so the daemon process itself never waits on a
/// worker's exit status.
pub fn serve_requests<F>(requests_path: &Path, server_dir: PathBuf, handle_client: F) -> !
where
    F: Fn(Pid, PathBuf) + Send + Sync + 'static + Copy,
{
    let requests = File::open(requests_path).unwrap_or_else(|e| {
        panic!("cannot open {}: {e}", requests_path.display());
    });
    let mut reader = std::io::BufReader::new(requests);
    loop {
        use std::io::BufRead;
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => continue,
            Ok(_) => {}
            Err(_) => continue,
        }
        let Ok(raw_pid) = line.trim().parse::<i32>() else {
            continue;
        };
        let client_pid = Pid::from_raw(raw_pid);

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                match unsafe { fork() } {
                    Ok(ForkResult::Child) => {
                        handle_client(client_pid, server_dir.clone());
                        std::process::exit(0);
                    }
                    Ok(ForkResult::Parent { .. }) => std::process::exit(0),
                    Err(_) => std::process::exit(1),
                }
            }
            Ok(ForkResult::Parent { child, .. }) => {
                let _ = nix::sys::wait::waitpid(child, None);
            }
            Err(_) => {}
        }
    }
}

/// Worker-side connection: open the named client's FIFOs with reversed
/// roles (write `.0`, read `.1`) relative to the client.
pub fn connect_worker(server_dir: &Path, client_pid: Pid) -> Result<BoxedDuplex, TransportError> {
    let write_path = server_dir.join(client_fifo_name(client_pid, 0));
    let read_path = server_dir.join(client_fifo_name(client_pid, 1));
    let write_fd = open_blocking(&write_path, true)?;
    let read_fd = open_blocking(&read_path, false)?;
    Ok(Box::new(FifoDuplex::new(read_fd, write_fd)?))
}

fn open_blocking(path: &Path, write: bool) -> Result<std::os::fd::OwnedFd, TransportError> {
    use std::os::fd::IntoRawFd;
    let file = if write {
        OpenOptions::new().write(true).custom_flags(0).open(path)
    } else {
        OpenOptions::new().read(true).custom_flags(0).open(path)
    }
    .map_err(TransportError::Io)?;
    Ok(unsafe { std::os::fd::OwnedFd::from_raw_fd(file.into_raw_fd()) })
}

/// An open pair of FIFO fds presented as one async duplex stream, the same
/// poll-driven approach as [`super::pipe::PipeDuplex`].
pub struct FifoDuplex {
    read: AsyncFd<ReadEnd>,
    write: AsyncFd<WriteEnd>,
}

struct ReadEnd(std::os::fd::OwnedFd);
struct WriteEnd(std::os::fd::OwnedFd);

impl AsRawFd for ReadEnd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}
impl AsRawFd for WriteEnd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl FifoDuplex {
    fn new(
        read_fd: std::os::fd::OwnedFd,
        write_fd: std::os::fd::OwnedFd,
    ) -> Result<Self, TransportError> {
        set_nonblocking(read_fd.as_raw_fd())?;
        set_nonblocking(write_fd.as_raw_fd())?;
        Ok(FifoDuplex {
            read: AsyncFd::new(ReadEnd(read_fd)).map_err(TransportError::Io)?,
            write: AsyncFd::new(WriteEnd(write_fd)).map_err(TransportError::Io)?,
        })
    }
}

fn set_nonblocking(fd: RawFd) -> Result<(), TransportError> {
    let flags = nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_GETFL)
        .map_err(|e| TransportError::Other(e.to_string()))?;
    let mut flags = nix::fcntl::OFlag::from_bits_truncate(flags);
    flags.insert(nix::fcntl::OFlag::O_NONBLOCK);
    nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_SETFL(flags))
        .map_err(|e| TransportError::Other(e.to_string()))?;
    Ok(())
}

impl AsyncRead for FifoDuplex {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            let mut guard = match this.read.poll_read_ready(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| {
                let fd = inner.get_ref().as_raw_fd();
                nix::unistd::read(fd, unfilled).map_err(io::Error::from)
            }) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for FifoDuplex {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            let mut guard = match this.write.poll_write_ready(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            };
            match guard.try_io(|inner| {
                let fd = inner.get_ref().as_raw_fd();
                nix::unistd::write(fd, buf).map_err(io::Error::from)
            }) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_fifo_name_matches_pid_dot_zero_one_convention() {
        let pid = Pid::from_raw(4242);
        assert_eq!(client_fifo_name(pid, 0), "4242.0");
        assert_eq!(client_fifo_name(pid, 1), "4242.1");
    }

    #[test]
    fn ensure_requests_fifo_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let first = ensure_requests_fifo(dir.path()).unwrap();
        let second = ensure_requests_fifo(dir.path()).unwrap();
        assert_eq!(first, second);
        assert!(first.exists());
    }
}
