//! S6 (spec end-to-end scenario): multi-user broadcast over the TCP
//! transport, exercised against a real `Listener`/`connect` pair rather than
//! an in-memory duplex — the only transport where more than one session can
//! observe another session's activity.

use rusty_chat::protocol::channel::{FrameChannel, LineChannel};
use rusty_chat::protocol::{payload, ClientHeader, Status};
use rusty_chat::server;
use rusty_chat::session::{SessionIdAllocator, SessionRegistry};
use rusty_chat::store::SqliteChatStore;
use rusty_chat::transport::tcp;
use std::sync::Arc;

#[tokio::test]
async fn scenario_s6_multi_user_broadcast_over_tcp() {
    let store = Arc::new(SqliteChatStore::open_in_memory().unwrap());
    let listener = tcp::Listener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = SessionRegistry::new();
    let ids = Arc::new(SessionIdAllocator::new());

    tokio::spawn(async move {
        loop {
            let (_, duplex) = listener.accept().await.unwrap();
            let store = Arc::clone(&store);
            let registry = Arc::clone(&registry);
            let ids = Arc::clone(&ids);
            tokio::spawn(async move {
                let session_id = ids.next_id();
                let mut channel = LineChannel::new(duplex);
                let _ =
                    server::multi_session_loop(&mut channel, store.as_ref(), &registry, session_id)
                        .await;
            });
        }
    });

    let mut a = LineChannel::new(tcp::connect(&addr.to_string()).await.unwrap());
    let init_a = payload::encode_init("@a", "Sysprog");
    a.write_client_frame(ClientHeader::init(init_a.len()), &init_a)
        .await
        .unwrap();

    // Synchronization barrier: a QUERY response can only be produced once
    // A's session is fully registered, since both happen in sequence on the
    // same connection's session loop. This lets B join next without a race
    // against A's registration.
    let query_payload = payload::encode_query("Sysprog", &[]);
    a.write_client_frame(
        ClientHeader::query(-1, 0, query_payload.len()),
        &query_payload,
    )
    .await
    .unwrap();
    let (hdr, _) = a.read_server_frame().await.unwrap();
    assert_eq!(hdr.status, Status::UserErr);

    let mut b = LineChannel::new(tcp::connect(&addr.to_string()).await.unwrap());
    let init_b = payload::encode_init("@b", "Sysprog");
    b.write_client_frame(ClientHeader::init(init_b.len()), &init_b)
        .await
        .unwrap();

    // A receives the join broadcast: a body frame, then a terminal empty OK.
    let (hdr, body) = a.read_server_frame().await.unwrap();
    assert_eq!(hdr.status, Status::Ok);
    assert_eq!(body, b"user @b has entered the room\n");
    let (hdr, body) = a.read_server_frame().await.unwrap();
    assert_eq!(hdr.status, Status::Ok);
    assert!(body.is_empty());

    // B adds a message: B gets its own plain ok, A gets the live broadcast
    // (not a DB-query result — no leading ISO timestamp line).
    let add_payload = payload::encode_add("@b", "Sysprog", "hi from b", &["db".to_string()]);
    b.write_client_frame(ClientHeader::add(1, add_payload.len()), &add_payload)
        .await
        .unwrap();

    let (hdr, body) = b.read_server_frame().await.unwrap();
    assert_eq!(hdr.status, Status::Ok);
    assert!(body.is_empty());

    let (hdr, body) = a.read_server_frame().await.unwrap();
    assert_eq!(hdr.status, Status::Ok);
    assert_eq!(String::from_utf8(body).unwrap(), "message from @b\ndb hi from b");
    let (hdr, body) = a.read_server_frame().await.unwrap();
    assert_eq!(hdr.status, Status::Ok);
    assert!(body.is_empty());

    // B ends the session: B gets an EndAck, A receives the leave broadcast.
    b.write_client_frame(ClientHeader::end(), &[]).await.unwrap();
    let (hdr, _) = b.read_server_frame().await.unwrap();
    assert_eq!(hdr.status, Status::EndAck);

    let (hdr, body) = a.read_server_frame().await.unwrap();
    assert_eq!(hdr.status, Status::Ok);
    assert_eq!(body, b"user @b has left the room\n");
    let (hdr, body) = a.read_server_frame().await.unwrap();
    assert_eq!(hdr.status, Status::Ok);
    assert!(body.is_empty());
}
