//! # Server Protocol Engine
//!
//! The single-session request loop used by the pipe/FIFO/shared-memory
//! transports, the multi-session loop used by TCP, and the shared
//! `query_sequence` dispatch both loops funnel QUERY through (spec §4.5).
//!
//! This is the sole "choke point" (spec §7) that classifies a
//! [`crate::error::StoreError`]/[`crate::error::PayloadError`] into a wire
//! [`Status`] and writes the corresponding [`ServerHeader`]: every other
//! layer (store, codec, transport) just produces a typed error and lets it
//! bubble up here.

use crate::error::{ChatError, TransportError};
use crate::protocol::channel::FrameChannel;
use crate::protocol::{payload, CmdType, ServerHeader, Status};
use crate::session::{SessionId, SessionRegistry};
use crate::store::{ChatRecord, ChatStore};
use std::ops::ControlFlow;
use std::sync::Arc;

/// Format one matching message as the OK result body spec §6.3 describes:
/// `<ISO8601>\n<user> <room>[ <topic ...>]\n<message>`, no trailing newline
/// beyond what is already in `message`.
fn format_result_body(record: &ChatRecord) -> String {
    let timestamp = iso8601_millis(record.created_at_millis);
    let mut line2 = format!("{} {}", record.user, record.room);
    for topic in &record.topics {
        line2.push(' ');
        line2.push_str(topic);
    }
    format!("{timestamp}\n{line2}\n{}", record.message)
}

/// `YYYY-MM-DDThh:mm:ss.ttt` using server local time, per spec §4.5's
/// ISO-8601 formatter note (output need never exceed 24 bytes including a
/// NUL in the original's fixed buffer; here it's an owned `String`).
fn iso8601_millis(millis: i64) -> String {
    use chrono::{Local, TimeZone};
    let dt = Local
        .timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Local::now);
    dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

async fn emit_terminal<C: FrameChannel>(
    channel: &mut C,
    result: Result<(), ChatError>,
) -> Result<(), TransportError> {
    match result {
        Ok(()) => channel.write_server_frame(ServerHeader::ok(0), &[]).await,
        Err(e) => {
            let status = match &e {
                ChatError::UserErr(_) => Status::UserErr,
                ChatError::SysErr(_) => Status::SysErr,
                ChatError::FatalErr(_) => Status::FatalErr,
            };
            let msg = e.wire_message().to_string();
            channel
                .write_server_frame(ServerHeader::error(status, &msg), msg.as_bytes())
                .await
        }
    }
}

/// The QUERY dispatch algorithm shared by both server loops (spec §4.5).
///
/// Validates `room`/`topics` are known before touching the store (BAD_ROOM/
/// BAD_TOPIC are user errors, not store errors), then streams up to `count`
/// matches as OK result frames followed by a terminal empty-OK frame. A
/// negative `count` means unbounded.
pub async fn query_sequence<C: FrameChannel>(
    channel: &mut C,
    store: &dyn ChatStore,
    room: &str,
    topics: &[String],
    count: i64,
) -> Result<(), TransportError> {
    let room_count = match store.count_room(room) {
        Ok(n) => n,
        Err(e) => return emit_terminal(channel, Err(e.into())).await,
    };
    if room_count == 0 {
        return emit_terminal(channel, Err(ChatError::bad_room())).await;
    }

    for topic in topics {
        let topic_count = match store.count_topic(topic) {
            Ok(n) => n,
            Err(e) => return emit_terminal(channel, Err(e.into())).await,
        };
        if topic_count == 0 {
            return emit_terminal(channel, Err(ChatError::bad_topic())).await;
        }
    }

    let limit = if count < 0 { usize::MAX } else { count as usize };
    let mut records: Vec<ChatRecord> = Vec::new();
    let query_result = store.query(room, topics, limit, &mut |record| {
        records.push(record);
        ControlFlow::Continue(())
    });
    if let Err(e) = query_result {
        return emit_terminal(channel, Err(e.into())).await;
    }

    for record in &records {
        let body = format_result_body(record);
        channel
            .write_server_frame(ServerHeader::ok(body.len()), body.as_bytes())
            .await?;
    }
    emit_terminal(channel, Ok(())).await
}

/// Dispatch one ADD request: decode the payload, insert into the store, and
/// emit the terminal response. Payload decode failures and store failures
/// both surface as `SYS_ERR` — neither is a user error in the taxonomy,
/// since a malformed payload on these transports indicates a client/server
/// protocol bug rather than a user-supplied bad value.
async fn handle_add<C: FrameChannel>(
    channel: &mut C,
    store: &dyn ChatStore,
    payload: &[u8],
) -> Result<(), TransportError> {
    let add = match payload::decode_add(payload) {
        Ok(add) => add,
        Err(e) => return emit_terminal(channel, Err(ChatError::SysErr(e.to_string()))).await,
    };
    let result = store
        .add(&add.user, &add.room, &add.topics, &add.message)
        .map_err(ChatError::from);
    emit_terminal(channel, result).await
}

async fn handle_query<C: FrameChannel>(
    channel: &mut C,
    store: &dyn ChatStore,
    payload: &[u8],
    count: i64,
) -> Result<(), TransportError> {
    let query = match payload::decode_query(payload) {
        Ok(q) => q,
        Err(e) => return emit_terminal(channel, Err(ChatError::SysErr(e.to_string()))).await,
    };
    query_sequence(channel, store, &query.room, &query.topics, count).await
}

/// The single-session server loop used by the pipe, FIFO, and shared-memory
/// transports (spec §4.5): one client, one server process, purely
/// reactive. Returns when the client sends `END` or the connection closes.
pub async fn single_session_loop<C: FrameChannel>(
    channel: &mut C,
    store: &dyn ChatStore,
) -> Result<(), TransportError> {
    loop {
        let (header, payload) = match channel.read_client_frame().await {
            Ok(frame) => frame,
            Err(TransportError::Closed) => return Ok(()),
            Err(e) => return Err(e),
        };
        match header.cmd_type {
            CmdType::Add => handle_add(channel, store, &payload).await?,
            CmdType::Query => handle_query(channel, store, &payload, header.count).await?,
            CmdType::End => return Ok(()),
            CmdType::Init => {
                // INIT is only meaningful on the multi-session TCP loop; a
                // single-session transport never sends it.
                emit_terminal(
                    channel,
                    Err(ChatError::FatalErr(
                        "INIT is not valid on this transport".to_string(),
                    )),
                )
                .await?;
                return Ok(());
            }
        }
    }
}

/// The multi-session TCP server loop (spec §4.5/§4.6): the first frame must
/// be INIT, after which the session is registered in `registry` and ADDs
/// trigger a room broadcast in addition to the normal response. `session_id`
/// must be unique per connection.
pub async fn multi_session_loop<C: FrameChannel>(
    channel: &mut C,
    store: &dyn ChatStore,
    registry: &Arc<SessionRegistry>,
    session_id: SessionId,
) -> Result<(), TransportError> {
    let (header, payload) = channel.read_client_frame().await?;
    if header.cmd_type != CmdType::Init {
        return emit_terminal(
            channel,
            Err(ChatError::FatalErr(
                "first frame on a session must be INIT".to_string(),
            )),
        )
        .await;
    }
    let init = payload::decode_init(&payload)
        .map_err(|e| TransportError::MalformedHeader(e.to_string()))?;

    let (outbox_tx, mut outbox_rx) = tokio::sync::mpsc::channel::<(ServerHeader, Vec<u8>)>(64);
    registry
        .init_session(session_id, init.user.clone(), init.room.clone(), outbox_tx)
        .await;
    registry
        .broadcast_to_room(
            &init.room,
            Some(session_id),
            format!("user {} has entered the room\n", init.user),
        )
        .await;

    let result = run_session(
        channel,
        store,
        registry,
        session_id,
        &init.user,
        &init.room,
        &mut outbox_rx,
    )
    .await;

    registry.cleanup_session(session_id).await;
    registry
        .broadcast_to_room(
            &init.room,
            Some(session_id),
            format!("user {} has left the room\n", init.user),
        )
        .await;
    result
}

/// Drains `outbox_rx` (broadcasts pushed by other sessions via `registry`)
/// concurrently with reading this session's own request frames, so a
/// broadcast can be delivered even while this session is otherwise idle.
async fn run_session<C: FrameChannel>(
    channel: &mut C,
    store: &dyn ChatStore,
    registry: &Arc<SessionRegistry>,
    session_id: SessionId,
    user: &str,
    room: &str,
    outbox_rx: &mut tokio::sync::mpsc::Receiver<(ServerHeader, Vec<u8>)>,
) -> Result<(), TransportError> {
    loop {
        tokio::select! {
            biased;
            frame = channel.read_client_frame() => {
                let (header, payload) = match frame {
                    Ok(f) => f,
                    Err(TransportError::Closed) => return Ok(()),
                    Err(e) => return Err(e),
                };
                match header.cmd_type {
                    CmdType::Add => {
                        handle_add(channel, store, &payload).await?;
                        if let Ok(add) = payload::decode_add(&payload) {
                            let mut body = format!("message from {}\n", user);
                            for topic in &add.topics {
                                body.push_str(topic);
                                body.push(' ');
                            }
                            body.push_str(&add.message);
                            registry.broadcast_to_room(room, Some(session_id), body).await;
                        }
                    }
                    CmdType::Query => handle_query(channel, store, &payload, header.count).await?,
                    CmdType::End => {
                        channel.write_server_frame(ServerHeader::end_ack(), &[]).await?;
                        return Ok(());
                    }
                    CmdType::Init => {
                        emit_terminal(channel, Err(ChatError::FatalErr(
                            "INIT already completed for this session".to_string(),
                        ))).await?;
                        return Ok(());
                    }
                }
            }
            Some((header, body)) = outbox_rx.recv() => {
                channel.write_server_frame(header, &body).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::channel::LineChannel;
    use crate::protocol::ClientHeader;
    use crate::store::SqliteChatStore;

    async fn roundtrip_single_session(
        requests: Vec<(ClientHeader, Vec<u8>)>,
    ) -> Vec<(crate::protocol::ServerHeader, Vec<u8>)> {
        let store = SqliteChatStore::open_in_memory().unwrap();
        let (client_side, server_side) = tokio::io::duplex(65536);
        let mut client = LineChannel::new(client_side);
        let mut server = LineChannel::new(server_side);

        let server_task = tokio::spawn(async move {
            single_session_loop(&mut server, &store).await.unwrap();
        });

        let mut responses = Vec::new();
        for (hdr, payload) in requests {
            client.write_client_frame(hdr, &payload).await.unwrap();
            loop {
                let (resp_hdr, resp_body) = client.read_server_frame().await.unwrap();
                let is_terminal = resp_hdr.n_bytes == 0 || resp_hdr.status != Status::Ok;
                responses.push((resp_hdr, resp_body));
                if is_terminal {
                    break;
                }
            }
        }
        client
            .write_client_frame(ClientHeader::end(), &[])
            .await
            .unwrap();
        server_task.await.unwrap();
        responses
    }

    /// S1: ADD then QUERY by single topic.
    #[tokio::test]
    async fn scenario_add_then_query_single_topic() {
        let topics = vec!["#db".to_string(), "#sqlite".to_string(), "#db".to_string()];
        let add_payload = payload::encode_add("@ZDU", "Sysprog", "sqlite is pretty cool", &topics);
        let query_payload = payload::encode_query("Sysprog", &["#db".to_string()]);

        let responses = roundtrip_single_session(vec![
            (ClientHeader::add(topics.len(), add_payload.len()), add_payload),
            (ClientHeader::query(1, 1, query_payload.len()), query_payload),
        ])
        .await;

        assert_eq!(responses[0].0.status, Status::Ok);
        assert_eq!(responses[0].1, Vec::<u8>::new());

        assert_eq!(responses[1].0.status, Status::Ok);
        let body = String::from_utf8(responses[1].1.clone()).unwrap();
        assert!(body.contains("@zdu sysprog #db #sqlite"));
        assert!(body.ends_with("sqlite is pretty cool"));

        assert_eq!(responses[2].0.status, Status::Ok);
        assert_eq!(responses[2].1, Vec::<u8>::new());
    }

    /// S2: QUERY that matches zero results still returns a single terminal OK.
    #[tokio::test]
    async fn scenario_query_matches_zero() {
        let add_payload = payload::encode_add("@zdu", "sysprog", "msg", &["#db".to_string()]);
        let query_payload =
            payload::encode_query("sysprog", &["#pipe".to_string(), "#db".to_string()]);

        let responses = roundtrip_single_session(vec![
            (ClientHeader::add(1, add_payload.len()), add_payload),
            (
                ClientHeader::query(10, 2, query_payload.len()),
                query_payload,
            ),
        ])
        .await;

        assert_eq!(responses[1].0.status, Status::Ok);
        assert_eq!(responses[1].1, Vec::<u8>::new());
    }

    /// S3: QUERY against an unknown room yields BAD_ROOM.
    #[tokio::test]
    async fn scenario_query_unknown_room() {
        let query_payload = payload::encode_query("Unknown", &["#db".to_string()]);
        let responses = roundtrip_single_session(vec![(
            ClientHeader::query(1, 1, query_payload.len()),
            query_payload,
        )])
        .await;

        assert_eq!(responses[0].0.status, Status::UserErr);
        assert_eq!(
            String::from_utf8(responses[0].1.clone()).unwrap(),
            "BAD_ROOM: unknown room"
        );
    }

    /// S4: QUERY with an unknown topic yields BAD_TOPIC.
    #[tokio::test]
    async fn scenario_query_unknown_topic() {
        let add_payload = payload::encode_add("@zdu", "sysprog", "msg", &["#db".to_string()]);
        let query_payload = payload::encode_query("sysprog", &["#nonexistent".to_string()]);

        let responses = roundtrip_single_session(vec![
            (ClientHeader::add(1, add_payload.len()), add_payload),
            (
                ClientHeader::query(1, 1, query_payload.len()),
                query_payload,
            ),
        ])
        .await;

        assert_eq!(responses[1].0.status, Status::UserErr);
        assert_eq!(
            String::from_utf8(responses[1].1.clone()).unwrap(),
            "BAD_TOPIC: unknown topic"
        );
    }

    /// S5: multi-topic AND query returns only the message with both topics.
    #[tokio::test]
    async fn scenario_multi_topic_and() {
        let add1 = payload::encode_add(
            "@a",
            "sysprog",
            "m1",
            &["#unix".to_string(), "#pipe".to_string()],
        );
        let add2 = payload::encode_add(
            "@b",
            "sysprog",
            "m2",
            &["#unix".to_string(), "#db".to_string()],
        );
        let query = payload::encode_query(
            "sysprog",
            &["#unix".to_string(), "#pipe".to_string()],
        );

        let responses = roundtrip_single_session(vec![
            (ClientHeader::add(2, add1.len()), add1),
            (ClientHeader::add(2, add2.len()), add2),
            (ClientHeader::query(10, 2, query.len()), query),
        ])
        .await;

        let body = String::from_utf8(responses[2].1.clone()).unwrap();
        assert!(body.ends_with("m1"));
        assert_eq!(responses[3].1, Vec::<u8>::new());
    }
}
