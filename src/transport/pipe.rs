//! Anonymous-pipe transport (spec §4.5, "Pipes"): a single client and a
//! single server process connected by a pair of unidirectional pipes
//! created before `fork`, one per direction. There is exactly one session
//! per process pair; the parent either becomes the client or the server
//! depending on which side of `spawn_server` it ends up on.
//!
//! Grounded in `nix::unistd::{fork, pipe}`, the same primitives the
//! original FIFO daemon (`chatd.c`) uses for its double-fork worker
//! pattern, generalized here to the simpler single-fork anonymous-pipe
//! case described by the spec.

use super::BoxedDuplex;
use crate::error::TransportError;
use nix::unistd::{close, fork, pipe, ForkResult};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// One half of a duplex built from two raw pipe fds, wrapped for async I/O
/// via `tokio::io::unix::AsyncFd`.
pub struct PipeDuplex {
    read: AsyncFd<ReadHalf>,
    write: AsyncFd<WriteHalf>,
}

struct ReadHalf(OwnedFd);
struct WriteHalf(OwnedFd);

impl AsRawFd for ReadHalf {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}
impl AsRawFd for WriteHalf {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl PipeDuplex {
    fn new(read_fd: OwnedFd, write_fd: OwnedFd) -> Result<Self, TransportError> {
        set_nonblocking(read_fd.as_raw_fd())?;
        set_nonblocking(write_fd.as_raw_fd())?;
        Ok(PipeDuplex {
            read: AsyncFd::new(ReadHalf(read_fd)).map_err(TransportError::Io)?,
            write: AsyncFd::new(WriteHalf(write_fd)).map_err(TransportError::Io)?,
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

impl AsyncRead for PipeDuplex {
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

impl AsyncWrite for PipeDuplex {
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

/// Outcome of [`spawn_server`] in the parent process: either it became the
/// client (holding a duplex connected to the freshly forked server child),
/// or — unreachable in practice since the child branch never returns — the
/// server.
pub enum SpawnOutcome {
    Client(BoxedDuplex),
}

/// Fork a server child connected to this (client) process by a pair of
/// anonymous pipes, matching the spec's "client forks the server" pipe
/// session model. `run_server` is invoked in the child with its end of the
/// duplex and must not return (the child exits when it does).
pub fn spawn_server<F>(run_server: F) -> Result<SpawnOutcome, TransportError>
where
    F: FnOnce(BoxedDuplex) + Send + 'static,
{
    // client_to_server: client writes, server reads.
    // server_to_client: server writes, client reads.
    let (c2s_read, c2s_write) = pipe().map_err(|e| TransportError::Other(e.to_string()))?;
    let (s2c_read, s2c_write) = pipe().map_err(|e| TransportError::Other(e.to_string()))?;

    match unsafe { fork() }.map_err(|e| TransportError::Other(e.to_string()))? {
        ForkResult::Child => {
            close(c2s_write.as_raw_fd()).ok();
            close(s2c_read.as_raw_fd()).ok();
            let duplex = PipeDuplex::new(c2s_read, s2c_write)
                .unwrap_or_else(|e| panic!("server failed to set up pipe duplex: {e}"));
            run_server(Box::new(duplex));
            std::process::exit(0);
        }
        ForkResult::Parent { .. } => {
            close(c2s_read.as_raw_fd()).ok();
            close(s2c_write.as_raw_fd()).ok();
            let duplex = PipeDuplex::new(s2c_read, c2s_write)?;
            Ok(SpawnOutcome::Client(Box::new(duplex)))
        }
    }
}

/// Build a [`PipeDuplex`] directly from a pair of already-open fds. Used by
/// the binary entry points when the pipes are set up outside `fork` (for
/// example, inherited from a parent that already did the forking).
pub fn duplex_from_fds(read_fd: RawFd, write_fd: RawFd) -> Result<BoxedDuplex, TransportError> {
    let read = unsafe { OwnedFd::from_raw_fd(read_fd) };
    let write = unsafe { OwnedFd::from_raw_fd(write_fd) };
    Ok(Box::new(PipeDuplex::new(read, write)?))
}
