//! `chat-client-fifo SERVER_DIR`: connects to an already-running
//! `chatd-fifo` daemon via a private pair of named FIFOs.

mod support;

use anyhow::{Context, Result};
use clap::Parser;
use rusty_chat::cli::ChatClientFifoArgs;
use rusty_chat::client::ChatClient;
use rusty_chat::protocol::channel::LineChannel;
use rusty_chat::transport::fifo;

#[tokio::main]
async fn main() -> Result<()> {
    rusty_chat::logging::init();
    let args = ChatClientFifoArgs::parse();

    let pid = fifo::make_client_fifos(&args.server_dir).context("failed to create client fifos")?;

    let duplex = match fifo::connect_client(&args.server_dir, pid).await {
        Ok(d) => d,
        Err(e) => {
            fifo::remove_client_fifos(&args.server_dir, pid);
            return Err(e).context("failed to connect to daemon");
        }
    };

    let mut client = ChatClient::new(LineChannel::new(duplex));
    support::run_repl(&mut client).await;

    fifo::remove_client_fifos(&args.server_dir, pid);
    Ok(())
}
