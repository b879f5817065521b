//! # Client Protocol Engine
//!
//! The response-collection state machine every client binary shares (spec
//! §4.4): at most one `ok` line printed per logical response, error
//! messages prefixed by the wire [`Status`] taxonomy, and a success/error
//! sink split so a caller can wire them to stdout/stderr (or a buffer, in
//! tests).
//!
//! [`ChatClient`] drives this synchronously over a single [`FrameChannel`]
//! and is what the pipe/FIFO/shared-memory client binaries use: one request,
//! one response, in lockstep. TCP is different — the server can push an
//! unsolicited room broadcast at any time, so its client instead splits the
//! duplex and runs [`receive_loop`] as a standalone background task reading
//! continuously, while sends happen independently from the submit side (spec
//! §4.6's "no reply correlation is required because all server-to-client
//! frames share the same OK-body format").

use crate::error::TransportError;
use crate::protocol::channel::FrameChannel;
use crate::protocol::{line, ClientHeader, ServerHeader, Status};
use std::io::Write;

/// Handle one received server frame against the running `printed_ok` state
/// of the current logical response. Returns `true` once the response (this
/// frame included) is complete: a terminal empty-OK, an `EndAck`, or any
/// non-OK status.
fn handle_response_frame(
    header: &ServerHeader,
    body: &[u8],
    printed_ok: &mut bool,
    out: &mut impl Write,
    err: &mut impl Write,
) -> bool {
    match header.status {
        Status::EndAck => true,
        Status::Ok => {
            if !*printed_ok {
                let _ = writeln!(out, "ok");
                *printed_ok = true;
            }
            if body.is_empty() {
                true
            } else {
                let _ = out.write_all(body);
                let _ = out.flush();
                false
            }
        }
        other => {
            let _ = writeln!(
                err,
                "err {}{}",
                other.err_prefix(),
                String::from_utf8_lossy(body)
            );
            true
        }
    }
}

/// Read server frames from `channel` until one logical response is
/// complete, printing to `out`/`err` as described in [`handle_response_frame`].
async fn collect_response<C: FrameChannel>(
    channel: &mut C,
    out: &mut impl Write,
    err: &mut impl Write,
) -> Result<(), TransportError> {
    let mut printed_ok = false;
    loop {
        let (header, body) = channel.read_server_frame().await?;
        if handle_response_frame(&header, &body, &mut printed_ok, out, err) {
            return Ok(());
        }
    }
}

/// Drives ADD/QUERY/END requests over one [`FrameChannel`], synchronously
/// collecting the response to each before the next request is sent. Used by
/// the pipe, FIFO, and shared-memory client binaries, none of which can
/// receive an unsolicited frame outside of a request/response cycle.
pub struct ChatClient<C> {
    channel: C,
}

impl<C: FrameChannel> ChatClient<C> {
    pub fn new(channel: C) -> Self {
        ChatClient { channel }
    }

    /// Send ADD and print its response (an `ok` line, no body) to `out`/`err`.
    pub async fn add(
        &mut self,
        user: &str,
        room: &str,
        message: &str,
        topics: &[String],
        out: &mut impl Write,
        err: &mut impl Write,
    ) -> Result<(), TransportError> {
        let payload = crate::protocol::payload::encode_add(user, room, message, topics);
        self.channel
            .write_client_frame(ClientHeader::add(topics.len(), payload.len()), &payload)
            .await?;
        collect_response(&mut self.channel, out, err).await
    }

    /// Send QUERY and print its response (an `ok` line followed by zero or
    /// more result bodies) to `out`/`err`.
    pub async fn query(
        &mut self,
        room: &str,
        topics: &[String],
        count: i64,
        out: &mut impl Write,
        err: &mut impl Write,
    ) -> Result<(), TransportError> {
        let payload = crate::protocol::payload::encode_query(room, topics);
        self.channel
            .write_client_frame(
                ClientHeader::query(count, topics.len(), payload.len()),
                &payload,
            )
            .await?;
        collect_response(&mut self.channel, out, err).await
    }

    /// Send END. Point-to-point transports expect no response (the server
    /// simply returns from its session loop); see [`end_and_await_ack`] for
    /// the TCP variant that does wait.
    pub async fn end(&mut self) -> Result<(), TransportError> {
        self.channel.write_client_frame(ClientHeader::end(), &[]).await
    }
}

/// A write-only half of a framed connection, used by the TCP client so
/// requests can be submitted while [`receive_loop`] owns the read half.
/// TCP is always line-encoded (spec §6.1); shared memory is the only
/// transport using the packed encoding and it never splits its duplex.
pub struct ChannelWriter<W> {
    writer: W,
}

impl<W: tokio::io::AsyncWrite + Unpin + Send> ChannelWriter<W> {
    pub fn new(writer: W) -> Self {
        ChannelWriter { writer }
    }

    pub async fn write_client_frame(
        &mut self,
        hdr: ClientHeader,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        line::write_client_header(&mut self.writer, &hdr).await?;
        line::write_all_bytes(&mut self.writer, payload).await
    }
}

/// A read-only half of a framed connection, used by the TCP client's
/// background [`receive_loop`].
pub struct ChannelReader<R> {
    reader: R,
}

impl<R: tokio::io::AsyncRead + Unpin + Send> ChannelReader<R> {
    pub fn new(reader: R) -> Self {
        ChannelReader { reader }
    }

    pub async fn read_server_frame(&mut self) -> Result<(ServerHeader, Vec<u8>), TransportError> {
        let hdr = line::read_server_header(&mut self.reader).await?;
        let payload = line::read_exact_bytes(&mut self.reader, hdr.n_bytes).await?;
        Ok((hdr, payload))
    }
}

/// Runs forever, printing every incoming frame to `out`/`err` exactly as
/// [`collect_response`] would for a single request — the TCP server frames
/// every response (its own or a broadcast) the same way, so one state
/// machine serves both (spec §4.6). Returns when the connection closes.
pub async fn receive_loop<R: tokio::io::AsyncRead + Unpin + Send>(
    reader: &mut ChannelReader<R>,
    out: &mut impl Write,
    err: &mut impl Write,
) -> Result<(), TransportError> {
    let mut printed_ok = false;
    loop {
        let (header, body) = match reader.read_server_frame().await {
            Ok(frame) => frame,
            Err(TransportError::Closed) => return Ok(()),
            Err(e) => return Err(e),
        };
        if handle_response_frame(&header, &body, &mut printed_ok, out, err) {
            printed_ok = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::channel::LineChannel;
    use crate::protocol::payload;

    async fn roundtrip_add(
        responses: Vec<(ServerHeader, Vec<u8>)>,
    ) -> (Vec<u8>, Vec<u8>) {
        let (client_side, server_side) = tokio::io::duplex(65536);
        let mut client = ChatClient::new(LineChannel::new(client_side));
        let mut server = LineChannel::new(server_side);

        let server_task = tokio::spawn(async move {
            let _ = server.read_client_frame().await.unwrap();
            for (hdr, body) in responses {
                server.write_server_frame(hdr, &body).await.unwrap();
            }
        });

        let mut out = Vec::new();
        let mut err = Vec::new();
        client
            .add("@zdu", "sysprog", "hi", &[], &mut out, &mut err)
            .await
            .unwrap();
        server_task.await.unwrap();
        (out, err)
    }

    /// A terminal empty-OK prints exactly one `ok` line and no body.
    #[tokio::test]
    async fn add_response_prints_single_ok_line() {
        let (out, err) = roundtrip_add(vec![(ServerHeader::ok(0), Vec::new())]).await;
        assert_eq!(String::from_utf8(out).unwrap(), "ok\n");
        assert!(err.is_empty());
    }

    /// A user error prints no `ok` line, just the prefixed error.
    #[tokio::test]
    async fn user_error_response_prints_no_ok_line() {
        let (out, err) = roundtrip_add(vec![(
            ServerHeader::error(Status::UserErr, "BAD_ROOM: unknown room"),
            b"BAD_ROOM: unknown room".to_vec(),
        )])
        .await;
        assert!(out.is_empty());
        assert_eq!(String::from_utf8(err).unwrap(), "err BAD_ROOM: unknown room\n");
    }

    /// A sys error gets the `SYS_ERR: ` prefix prepended by the client.
    #[tokio::test]
    async fn sys_error_response_gets_prefix() {
        let (_out, err) = roundtrip_add(vec![(
            ServerHeader::error(Status::SysErr, "disk full"),
            b"disk full".to_vec(),
        )])
        .await;
        assert_eq!(String::from_utf8(err).unwrap(), "err SYS_ERR: disk full\n");
    }

    /// Multiple QUERY result frames print one `ok` line, then every body
    /// verbatim with no separator, then nothing for the terminal empty-OK.
    #[tokio::test]
    async fn query_response_with_multiple_results_prints_one_ok_then_bodies() {
        let (client_side, server_side) = tokio::io::duplex(65536);
        let mut client = ChatClient::new(LineChannel::new(client_side));
        let mut server = LineChannel::new(server_side);

        let server_task = tokio::spawn(async move {
            let _ = server.read_client_frame().await.unwrap();
            server
                .write_server_frame(ServerHeader::ok(5), b"first")
                .await
                .unwrap();
            server
                .write_server_frame(ServerHeader::ok(6), b"second")
                .await
                .unwrap();
            server
                .write_server_frame(ServerHeader::ok(0), &[])
                .await
                .unwrap();
        });

        let mut out = Vec::new();
        let mut err = Vec::new();
        client
            .query("sysprog", &[], -1, &mut out, &mut err)
            .await
            .unwrap();
        server_task.await.unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "ok\nfirstsecond");
        assert!(err.is_empty());
    }

    /// The payload a test double expects from `encode_query`/`encode_add`
    /// sanity-checks against what `ChatClient` actually sends on the wire.
    #[tokio::test]
    async fn add_sends_expected_header_and_payload() {
        let (client_side, server_side) = tokio::io::duplex(65536);
        let mut client = ChatClient::new(LineChannel::new(client_side));
        let mut server = LineChannel::new(server_side);

        let server_task = tokio::spawn(async move {
            let (hdr, payload) = server.read_client_frame().await.unwrap();
            server
                .write_server_frame(ServerHeader::ok(0), &[])
                .await
                .unwrap();
            (hdr, payload)
        });

        let mut out = Vec::new();
        let mut err = Vec::new();
        let topics = vec!["db".to_string()];
        client
            .add("@zdu", "sysprog", "hi", &topics, &mut out, &mut err)
            .await
            .unwrap();
        let (hdr, payload) = server_task.await.unwrap();
        assert_eq!(hdr.n_topics, 1);
        assert_eq!(payload, payload::encode_add("@zdu", "sysprog", "hi", &topics));
    }
}
