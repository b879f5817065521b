//! `chat-client-shm DBFILE_PATH [SHM_SIZE_KiB]`: forks its own single-session
//! server connected by a shared-memory segment.
//!
//! The client creates the shared mapping, then forks before either side has
//! a tokio runtime: the child inherits the mapping (via `fork`, not by
//! reopening it by id) and takes the server handle; the parent keeps the
//! original handle and runs the REPL.

mod support;

use anyhow::{Context, Result};
use clap::Parser;
use rusty_chat::cli::ChatClientShmArgs;
use rusty_chat::client::ChatClient;
use rusty_chat::protocol::channel::PackedChannel;
use rusty_chat::server;
use rusty_chat::store::SqliteChatStore;
use rusty_chat::transport::shm::ShmDuplex;

fn main() -> Result<()> {
    rusty_chat::logging::init();
    let args = ChatClientShmArgs::parse();

    let client_duplex = ShmDuplex::create(args.shm_size_bytes)
        .context("failed to create shared-memory segment")?;

    match unsafe { nix::unistd::fork() }.context("fork failed")? {
        nix::unistd::ForkResult::Child => {
            let server_duplex = client_duplex.server_handle();
            // `ShmDuplex` blocks the polling thread on `sem_wait` via
            // `block_in_place`, which requires a multi-threaded runtime
            // (it panics under `new_current_thread`); safe to build one
            // here since `fork` has already happened in both branches.
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .expect("failed to build server runtime");
            rt.block_on(async move {
                let store = match SqliteChatStore::open(&args.dbfile_path) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!("failed to open store: {e}");
                        std::process::exit(1);
                    }
                };
                let mut channel = PackedChannel::new(server_duplex);
                if let Err(e) = server::single_session_loop(&mut channel, &store).await {
                    tracing::warn!("session ended with error: {e}");
                }
            });
            std::process::exit(0);
        }
        nix::unistd::ForkResult::Parent { .. } => {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to build client runtime")?;
            rt.block_on(async move {
                let mut client = ChatClient::new(PackedChannel::new(client_duplex));
                support::run_repl(&mut client).await;
            });
            Ok(())
        }
    }
}
