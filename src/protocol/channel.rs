//! Unifies the two header encodings (line vs. packed, see [`super::line`] /
//! [`super::packed`]) behind one [`FrameChannel`] trait so the client and
//! server protocol engines (spec §4.4/§4.5) do not need to know which
//! transport produced their byte stream.
//!
//! Every transport in [`crate::transport`] reduces to an
//! `AsyncRead + AsyncWrite` duplex (including the shared-memory transport,
//! whose `ShmDuplex` already implements both). The only thing that differs
//! per transport is how a header is framed on the wire: stream transports
//! (pipe/FIFO/TCP) use the `\n`-terminated ASCII line from spec §6.1,
//! shared memory uses the fixed `#[repr(C)]` struct from §6.2. Payload
//! bytes are identical either way.

use super::packed::{self, PackedClientHeader, PackedServerHeader};
use super::{line, ClientHeader, ServerHeader};
use crate::error::TransportError;
use crate::transport::Duplex;
use async_trait::async_trait;

/// One end of a framed chat connection: read/write a header, then its
/// payload bytes, in either direction.
#[async_trait]
pub trait FrameChannel: Send {
    async fn write_client_frame(
        &mut self,
        hdr: ClientHeader,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    async fn read_client_frame(&mut self) -> Result<(ClientHeader, Vec<u8>), TransportError>;

    async fn write_server_frame(
        &mut self,
        hdr: ServerHeader,
        payload: &[u8],
    ) -> Result<(), TransportError>;

    async fn read_server_frame(&mut self) -> Result<(ServerHeader, Vec<u8>), TransportError>;
}

/// A [`FrameChannel`] over any stream-oriented duplex (pipe, FIFO, TCP),
/// using the ASCII line header encoding.
pub struct LineChannel<D> {
    duplex: D,
}

impl<D: Duplex> LineChannel<D> {
    pub fn new(duplex: D) -> Self {
        LineChannel { duplex }
    }
}

#[async_trait]
impl<D: Duplex> FrameChannel for LineChannel<D> {
    async fn write_client_frame(
        &mut self,
        hdr: ClientHeader,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        line::write_client_header(&mut self.duplex, &hdr).await?;
        line::write_all_bytes(&mut self.duplex, payload).await
    }

    async fn read_client_frame(&mut self) -> Result<(ClientHeader, Vec<u8>), TransportError> {
        let hdr = line::read_client_header(&mut self.duplex).await?;
        let payload = line::read_exact_bytes(&mut self.duplex, hdr.n_bytes).await?;
        Ok((hdr, payload))
    }

    async fn write_server_frame(
        &mut self,
        hdr: ServerHeader,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        line::write_server_header(&mut self.duplex, &hdr).await?;
        line::write_all_bytes(&mut self.duplex, payload).await
    }

    async fn read_server_frame(&mut self) -> Result<(ServerHeader, Vec<u8>), TransportError> {
        let hdr = line::read_server_header(&mut self.duplex).await?;
        let payload = line::read_exact_bytes(&mut self.duplex, hdr.n_bytes).await?;
        Ok((hdr, payload))
    }
}

/// A [`FrameChannel`] over the shared-memory duplex, using the packed
/// `#[repr(C)]` header encoding (spec §6.2). Headers are transmitted as raw
/// struct bytes through the same bounded single-slot buffer payload bytes
/// use.
pub struct PackedChannel<D> {
    duplex: D,
}

impl<D: Duplex> PackedChannel<D> {
    pub fn new(duplex: D) -> Self {
        PackedChannel { duplex }
    }
}

#[async_trait]
impl<D: Duplex> FrameChannel for PackedChannel<D> {
    async fn write_client_frame(
        &mut self,
        hdr: ClientHeader,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let packed: PackedClientHeader = hdr.into();
        let bytes = unsafe { packed::as_bytes(&packed) };
        line::write_all_bytes(&mut self.duplex, bytes).await?;
        line::write_all_bytes(&mut self.duplex, payload).await
    }

    async fn read_client_frame(&mut self) -> Result<(ClientHeader, Vec<u8>), TransportError> {
        let raw = line::read_exact_bytes(
            &mut self.duplex,
            std::mem::size_of::<PackedClientHeader>(),
        )
        .await?;
        let packed: PackedClientHeader = unsafe { packed::from_bytes(&raw) };
        let hdr: ClientHeader = packed.try_into()?;
        let payload = line::read_exact_bytes(&mut self.duplex, hdr.n_bytes).await?;
        Ok((hdr, payload))
    }

    async fn write_server_frame(
        &mut self,
        hdr: ServerHeader,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let packed: PackedServerHeader = hdr.into();
        let bytes = unsafe { packed::as_bytes(&packed) };
        line::write_all_bytes(&mut self.duplex, bytes).await?;
        line::write_all_bytes(&mut self.duplex, payload).await
    }

    async fn read_server_frame(&mut self) -> Result<(ServerHeader, Vec<u8>), TransportError> {
        let raw = line::read_exact_bytes(
            &mut self.duplex,
            std::mem::size_of::<PackedServerHeader>(),
        )
        .await?;
        let packed: PackedServerHeader = unsafe { packed::from_bytes(&raw) };
        let hdr: ServerHeader = packed.try_into()?;
        let payload = line::read_exact_bytes(&mut self.duplex, hdr.n_bytes).await?;
        Ok((hdr, payload))
    }
}
