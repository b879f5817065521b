//! `chat-client-tcp HOST PORT USER ROOM`: the TCP multi-user client.
//!
//! Unlike the point-to-point clients, the server can push an unsolicited
//! room broadcast at any time, so the duplex is split: a background task
//! runs [`client::receive_loop`] continuously while the REPL submits
//! requests independently on the write half.

mod support;

use anyhow::{Context, Result};
use clap::Parser;
use rusty_chat::cli::ChatClientTcpArgs;
use rusty_chat::client::{receive_loop, ChannelReader, ChannelWriter};
use rusty_chat::protocol::{payload, ClientHeader};
use rusty_chat::transport::tcp;

#[tokio::main]
async fn main() -> Result<()> {
    rusty_chat::logging::init();
    let args = ChatClientTcpArgs::parse();

    let addr = format!("{}:{}", args.host, args.port);
    let duplex = tcp::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let (read_half, write_half) = tokio::io::split(duplex);
    let mut writer = ChannelWriter::new(write_half);
    let mut reader = ChannelReader::new(read_half);

    let init_body = payload::encode_init(&args.user, &args.room);
    writer
        .write_client_frame(ClientHeader::init(init_body.len()), &init_body)
        .await
        .context("failed to send INIT")?;

    tokio::spawn(async move {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = stdout.lock();
        let mut err = stderr.lock();
        let _ = receive_loop(&mut reader, &mut out, &mut err).await;
    });

    let stdin = std::io::stdin();
    let mut stdin_reader = stdin.lock();
    loop {
        let cmd = match support::read_command(&mut stdin_reader) {
            Ok(Some(cmd)) => cmd,
            Ok(None) | Err(_) => break,
        };
        match cmd {
            support::Command::Add {
                user,
                room,
                topics,
                message,
            } => {
                let body = payload::encode_add(&user, &room, &message, &topics);
                if writer
                    .write_client_frame(ClientHeader::add(topics.len(), body.len()), &body)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            support::Command::Query {
                room,
                count,
                topics,
            } => {
                let body = payload::encode_query(&room, &topics);
                if writer
                    .write_client_frame(ClientHeader::query(count, topics.len(), body.len()), &body)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            support::Command::End => {
                let _ = writer.write_client_frame(ClientHeader::end(), &[]).await;
                break;
            }
        }
    }
    Ok(())
}
