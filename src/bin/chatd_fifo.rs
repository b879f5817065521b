//! `chatd-fifo SERVER_DIR DBFILE_PATH`: the named-FIFO chat daemon.
//!
//! Same daemonization contract as `chatd-tcp` (fork, print child pid, exit;
//! the child detaches and serves). Once detached, the child never returns
//! from `fifo::serve_requests`: it double-forks a worker per connecting
//! client, each of which builds its own single-threaded runtime to run one
//! `single_session_loop`.

use anyhow::{Context, Result};
use clap::Parser;
use rusty_chat::cli::ChatdFifoArgs;
use rusty_chat::protocol::channel::LineChannel;
use rusty_chat::server;
use rusty_chat::store::SqliteChatStore;
use rusty_chat::transport::fifo;

fn main() -> Result<()> {
    let args = ChatdFifoArgs::parse();

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

    std::fs::create_dir_all(&args.server_dir)
        .with_context(|| format!("failed to create server dir {}", args.server_dir.display()))?;
    let requests_path = fifo::ensure_requests_fifo(&args.server_dir)
        .context("failed to create REQUESTS fifo")?;

    // Leaked so it is `Copy` and can cross into the `Copy` worker closure
    // `serve_requests` requires; the daemon never exits to reclaim it.
    let db_path: &'static std::path::Path =
        Box::leak(args.dbfile_path.clone().into_boxed_path());
    let server_dir = args.server_dir.clone();

    fifo::serve_requests(&requests_path, server_dir, move |client_pid, server_dir| {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!("failed to build worker runtime: {e}");
                return;
            }
        };
        rt.block_on(async move {
            let store = match SqliteChatStore::open(db_path) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!("failed to open store: {e}");
                    return;
                }
            };
            match fifo::connect_worker(&server_dir, client_pid) {
                Ok(duplex) => {
                    let mut channel = LineChannel::new(duplex);
                    if let Err(e) = server::single_session_loop(&mut channel, &store).await {
                        tracing::warn!(pid = client_pid.as_raw(), "session ended with error: {e}");
                    }
                }
                Err(e) => tracing::warn!("connect_worker failed: {e}"),
            }
        });
    });
}
