//! ASCII line encoding for stream transports (pipes, FIFOs, TCP).
//!
//! Each header is a single line terminated by `\n`, at most
//! [`MAX_HEADER_LEN`] bytes, per spec §6.1:
//!
//! - client: `"%d %d %zu %zu\n"` = `cmdType count nTopics nBytes`
//! - server: `"%d %zu\n"` = `status nBytes`

use crate::error::TransportError;
use crate::protocol::{ClientHeader, CmdType, ServerHeader, Status};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum length of an encoded header line, including the trailing `\n`.
pub const MAX_HEADER_LEN: usize = 80;

pub fn encode_client_header(hdr: &ClientHeader) -> String {
    format!(
        "{} {} {} {}\n",
        hdr.cmd_type as i32, hdr.count, hdr.n_topics, hdr.n_bytes
    )
}

pub fn encode_server_header(hdr: &ServerHeader) -> String {
    format!("{} {}\n", hdr.status as i32, hdr.n_bytes)
}

pub fn decode_client_header(line: &str) -> Result<ClientHeader, TransportError> {
    let mut parts = line.trim_end().split_whitespace();
    let cmd = parts
        .next()
        .ok_or_else(|| TransportError::MalformedHeader("missing cmdType".into()))?
        .parse::<i32>()
        .map_err(|e| TransportError::MalformedHeader(e.to_string()))?;
    let cmd_type = CmdType::from_i32(cmd)
        .ok_or_else(|| TransportError::MalformedHeader(format!("unknown cmdType {cmd}")))?;
    let count = parts
        .next()
        .ok_or_else(|| TransportError::MalformedHeader("missing count".into()))?
        .parse::<i64>()
        .map_err(|e| TransportError::MalformedHeader(e.to_string()))?;
    let n_topics = parts
        .next()
        .ok_or_else(|| TransportError::MalformedHeader("missing nTopics".into()))?
        .parse::<usize>()
        .map_err(|e| TransportError::MalformedHeader(e.to_string()))?;
    let n_bytes = parts
        .next()
        .ok_or_else(|| TransportError::MalformedHeader("missing nBytes".into()))?
        .parse::<usize>()
        .map_err(|e| TransportError::MalformedHeader(e.to_string()))?;
    Ok(ClientHeader {
        cmd_type,
        count,
        n_topics,
        n_bytes,
    })
}

pub fn decode_server_header(line: &str) -> Result<ServerHeader, TransportError> {
    let mut parts = line.trim_end().split_whitespace();
    let status = parts
        .next()
        .ok_or_else(|| TransportError::MalformedHeader("missing status".into()))?
        .parse::<i32>()
        .map_err(|e| TransportError::MalformedHeader(e.to_string()))?;
    let status = Status::from_i32(status)
        .ok_or_else(|| TransportError::MalformedHeader(format!("unknown status {status}")))?;
    let n_bytes = parts
        .next()
        .ok_or_else(|| TransportError::MalformedHeader("missing nBytes".into()))?
        .parse::<usize>()
        .map_err(|e| TransportError::MalformedHeader(e.to_string()))?;
    Ok(ServerHeader { status, n_bytes })
}

/// Read one `\n`-terminated line, enforcing [`MAX_HEADER_LEN`]. Reads a byte
/// at a time, which is acceptable here since headers are tiny and this path
/// is not the hot loop (payload bodies use bulk reads).
async fn read_line<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, TransportError> {
    let mut buf = Vec::with_capacity(32);
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        if byte[0] == b'\n' {
            break;
        }
        buf.push(byte[0]);
        if buf.len() >= MAX_HEADER_LEN {
            return Err(TransportError::HeaderTooLong(MAX_HEADER_LEN));
        }
    }
    String::from_utf8(buf).map_err(|e| TransportError::MalformedHeader(e.to_string()))
}

pub async fn read_client_header<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<ClientHeader, TransportError> {
    let line = read_line(reader).await?;
    decode_client_header(&line)
}

pub async fn read_server_header<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<ServerHeader, TransportError> {
    let line = read_line(reader).await?;
    decode_server_header(&line)
}

pub async fn write_client_header<W: AsyncWrite + Unpin>(
    writer: &mut W,
    hdr: &ClientHeader,
) -> Result<(), TransportError> {
    let line = encode_client_header(hdr);
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}

pub async fn write_server_header<W: AsyncWrite + Unpin>(
    writer: &mut W,
    hdr: &ServerHeader,
) -> Result<(), TransportError> {
    let line = encode_server_header(hdr);
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}

/// Read exactly `n` bytes, looping on partial reads. Short I/O before EOF is
/// a transport error, per the contract common to all transports.
pub async fn read_exact_bytes<R: AsyncRead + Unpin>(
    reader: &mut R,
    n: usize,
) -> Result<Vec<u8>, TransportError> {
    let mut buf = vec![0u8; n];
    reader.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::Closed
        } else {
            TransportError::Io(e)
        }
    })?;
    Ok(buf)
}

pub async fn write_all_bytes<W: AsyncWrite + Unpin>(
    writer: &mut W,
    bytes: &[u8],
) -> Result<(), TransportError> {
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_client_header_per_wire_format() {
        let hdr = ClientHeader::add(2, 10);
        assert_eq!(encode_client_header(&hdr), "0 -1 2 10\n");
    }

    #[test]
    fn encodes_server_header_per_wire_format() {
        let hdr = ServerHeader::ok(0);
        assert_eq!(encode_server_header(&hdr), "0 0\n");
    }

    #[test]
    fn decodes_round_trip() {
        let hdr = ClientHeader::query(5, 3, 42);
        let line = encode_client_header(&hdr);
        let decoded = decode_client_header(&line).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[tokio::test]
    async fn reads_header_over_a_pipe() {
        let (mut read_half, mut write_half) = tokio::io::duplex(128);
        let hdr = ClientHeader::end();
        write_client_header(&mut write_half, &hdr).await.unwrap();
        let decoded = read_client_header(&mut read_half).await.unwrap();
        assert_eq!(decoded, hdr);
    }

    #[tokio::test]
    async fn overlong_header_line_is_rejected() {
        let (mut read_half, mut write_half) = tokio::io::duplex(256);
        let long_line = "0 ".repeat(60) + "\n";
        write_half.write_all(long_line.as_bytes()).await.unwrap();
        drop(write_half);
        let err = read_client_header(&mut read_half).await.unwrap_err();
        assert!(matches!(err, TransportError::HeaderTooLong(_)));
    }
}
