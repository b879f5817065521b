//! Fixed-layout packed headers for the shared-memory transport.
//!
//! The shared-memory ring carries headers as raw struct bytes rather than
//! an ASCII line, per spec §6.2. Values are transmitted through the same
//! three-semaphore protocol as message bodies (see [`crate::transport::shm`]).

use crate::protocol::{ClientHeader, CmdType, ServerHeader, Status};

/// `ClientHdr { cmd, nTopics, count, reqSize }`, fixed layout.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PackedClientHeader {
    pub cmd: i32,
    pub n_topics: u64,
    pub count: i64,
    pub req_size: u64,
}

/// `ServerHdr { status, resSize }`, fixed layout.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PackedServerHeader {
    pub status: i32,
    pub res_size: u64,
}

impl From<ClientHeader> for PackedClientHeader {
    fn from(h: ClientHeader) -> Self {
        PackedClientHeader {
            cmd: h.cmd_type as i32,
            n_topics: h.n_topics as u64,
            count: h.count,
            req_size: h.n_bytes as u64,
        }
    }
}

impl TryFrom<PackedClientHeader> for ClientHeader {
    type Error = crate::error::TransportError;

    fn try_from(h: PackedClientHeader) -> Result<Self, Self::Error> {
        let cmd_type = CmdType::from_i32(h.cmd).ok_or_else(|| {
            crate::error::TransportError::MalformedHeader(format!("unknown cmdType {}", h.cmd))
        })?;
        Ok(ClientHeader {
            cmd_type,
            count: h.count,
            n_topics: h.n_topics as usize,
            n_bytes: h.req_size as usize,
        })
    }
}

impl From<ServerHeader> for PackedServerHeader {
    fn from(h: ServerHeader) -> Self {
        PackedServerHeader {
            status: h.status as i32,
            res_size: h.n_bytes as u64,
        }
    }
}

impl TryFrom<PackedServerHeader> for ServerHeader {
    type Error = crate::error::TransportError;

    fn try_from(h: PackedServerHeader) -> Result<Self, Self::Error> {
        let status = Status::from_i32(h.status).ok_or_else(|| {
            crate::error::TransportError::MalformedHeader(format!("unknown status {}", h.status))
        })?;
        Ok(ServerHeader {
            status,
            n_bytes: h.res_size as usize,
        })
    }
}

/// View a packed header as its raw byte representation, for copying through
/// the shared-memory ring buffer.
///
/// # Safety
/// `T` must be `#[repr(C)]`, contain no padding-sensitive invariants, and be
/// `Copy` — true for both packed header structs in this module.
pub unsafe fn as_bytes<T: Copy>(value: &T) -> &[u8] {
    std::slice::from_raw_parts((value as *const T) as *const u8, std::mem::size_of::<T>())
}

/// # Safety
/// `bytes` must contain at least `size_of::<T>()` bytes with a valid bit
/// pattern for `T`.
pub unsafe fn from_bytes<T: Copy>(bytes: &[u8]) -> T {
    debug_assert!(bytes.len() >= std::mem::size_of::<T>());
    std::ptr::read_unaligned(bytes.as_ptr() as *const T)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_client_header_round_trips_through_bytes() {
        let hdr = ClientHeader::query(3, 2, 99);
        let packed: PackedClientHeader = hdr.into();
        let bytes = unsafe { as_bytes(&packed) }.to_vec();
        let roundtripped: PackedClientHeader = unsafe { from_bytes(&bytes) };
        let decoded: ClientHeader = roundtripped.try_into().unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn packed_server_header_round_trips_through_bytes() {
        let hdr = ServerHeader::ok(128);
        let packed: PackedServerHeader = hdr.into();
        let bytes = unsafe { as_bytes(&packed) }.to_vec();
        let roundtripped: PackedServerHeader = unsafe { from_bytes(&bytes) };
        let decoded: ServerHeader = roundtripped.try_into().unwrap();
        assert_eq!(decoded, hdr);
    }
}
