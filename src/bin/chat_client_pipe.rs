//! `chat-client-pipe DBFILE_PATH`: forks its own single-session server
//! connected by a pair of anonymous pipes.
//!
//! The fork happens in [`rusty_chat::transport::pipe::spawn_server`], before
//! either side has a tokio runtime (a multi-threaded runtime does not
//! survive `fork`); each side only builds its runtime after the fork has
//! already happened.

mod support;

use anyhow::{Context, Result};
use clap::Parser;
use rusty_chat::cli::ChatClientPipeArgs;
use rusty_chat::client::ChatClient;
use rusty_chat::protocol::channel::LineChannel;
use rusty_chat::server;
use rusty_chat::store::SqliteChatStore;
use rusty_chat::transport::pipe::{self, SpawnOutcome};

fn main() -> Result<()> {
    rusty_chat::logging::init();
    let args = ChatClientPipeArgs::parse();
    let dbfile_path = args.dbfile_path.clone();

    let outcome = pipe::spawn_server(move |duplex| {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build server runtime");
        rt.block_on(async move {
            let store = match SqliteChatStore::open(&dbfile_path) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!("failed to open store: {e}");
                    return;
                }
            };
            let mut channel = LineChannel::new(duplex);
            if let Err(e) = server::single_session_loop(&mut channel, &store).await {
                tracing::warn!("session ended with error: {e}");
            }
        });
    })
    .context("failed to fork server connected by anonymous pipes")?;

    let SpawnOutcome::Client(duplex) = outcome;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build client runtime")?;
    rt.block_on(async move {
        let mut client = ChatClient::new(LineChannel::new(duplex));
        support::run_repl(&mut client).await;
    });
    Ok(())
}
