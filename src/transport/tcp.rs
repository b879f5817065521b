//! TCP transport: the only transport supporting true multi-client broadcast
//! (spec §4.6). Grounded in the teacher's `TcpSocketTransport`, including its
//! `socket2` Nagle-disabling dance (TCP_NODELAY matters here since headers
//! and small payloads are written as separate `write_all` calls).

use super::BoxedDuplex;
use crate::error::TransportError;
use tokio::net::{TcpListener, TcpStream};

/// Connect to `addr` (`host:port`) and return a ready-to-use duplex stream
/// with Nagle's algorithm disabled.
pub async fn connect(addr: &str) -> Result<BoxedDuplex, TransportError> {
    let stream = TcpStream::connect(addr).await?;
    let stream = tune(stream)?;
    Ok(Box::new(stream))
}

/// A bound TCP listener accepting one connection per client session.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let inner = TcpListener::bind(addr).await?;
        Ok(Listener { inner })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, TransportError> {
        Ok(self.inner.local_addr()?)
    }

    /// Accept the next connection, returning its peer address alongside the
    /// tuned duplex stream.
    pub async fn accept(&self) -> Result<(std::net::SocketAddr, BoxedDuplex), TransportError> {
        let (stream, peer) = self.inner.accept().await?;
        let stream = tune(stream)?;
        Ok((peer, Box::new(stream)))
    }
}

fn tune(stream: TcpStream) -> Result<TcpStream, TransportError> {
    let std_stream = stream.into_std()?;
    let socket = socket2::Socket::from(std_stream.try_clone()?);
    socket.set_nodelay(true)?;
    Ok(TcpStream::from_std(std_stream)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn client_connects_and_exchanges_bytes_with_accepted_server() {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (_, mut duplex) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            duplex.read_exact(&mut buf).await.unwrap();
            duplex.write_all(b"world").await.unwrap();
        });

        let mut client = connect(&addr.to_string()).await.unwrap();
        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");

        server.await.unwrap();
    }
}
