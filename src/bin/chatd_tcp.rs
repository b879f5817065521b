//! `chatd-tcp PORT DBFILE_PATH`: the TCP multi-user chat daemon.
//!
//! Daemonizes with a single `fork` before any tokio runtime exists (a
//! multi-threaded runtime does not survive `fork` safely): the parent
//! prints the child's pid and exits, the child detaches via `setsid` and
//! then builds its own runtime to run the accept loop.

use anyhow::{Context, Result};
use clap::Parser;
use rusty_chat::cli::ChatdTcpArgs;
use rusty_chat::protocol::channel::LineChannel;
use rusty_chat::server;
use rusty_chat::session::{SessionIdAllocator, SessionRegistry};
use rusty_chat::store::SqliteChatStore;
use rusty_chat::transport::tcp;
use std::sync::Arc;

fn main() -> Result<()> {
    let args = ChatdTcpArgs::parse();

    match unsafe { nix::unistd::fork() }.context("failed to fork daemon process")? {
        nix::unistd::ForkResult::Parent { child } => {
            println!("{}", child.as_raw());
            return Ok(());
        }
        nix::unistd::ForkResult::Child => {
            let _ = nix::unistd::setsid();
        }
    }

    rusty_chat::logging::init();

    let store = Arc::new(
        SqliteChatStore::open(&args.dbfile_path)
            .with_context(|| format!("failed to open store at {}", args.dbfile_path.display()))?,
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build daemon runtime")?;

    rt.block_on(async move {
        let listener = tcp::Listener::bind(&format!("0.0.0.0:{}", args.port))
            .await
            .with_context(|| format!("failed to bind port {}", args.port))?;
        let registry = SessionRegistry::new();
        let ids = Arc::new(SessionIdAllocator::new());

        loop {
            let (peer, duplex) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                    continue;
                }
            };
            let store = Arc::clone(&store);
            let registry = Arc::clone(&registry);
            let ids = Arc::clone(&ids);
            tokio::spawn(async move {
                let session_id = ids.next_id();
                let mut channel = LineChannel::new(duplex);
                if let Err(e) =
                    server::multi_session_loop(&mut channel, store.as_ref(), &registry, session_id)
                        .await
                {
                    tracing::warn!(peer = %peer, "session ended with error: {e}");
                }
            });
        }
    })
}
