//! # CLI Interface
//!
//! Two flags, no subcommands. Both fall back to environment variables.

use clap::Parser;
use kvchain_protocol::abci::ListenAddr;
use kvchain_protocol::config::DEFAULT_SOCKET_ADDR;
use std::path::PathBuf;

/// kvchain application node.
///
/// Serves a deterministic key-value application to an external consensus
/// engine over a unix or TCP socket. Stops cleanly on SIGINT or SIGTERM.
#[derive(Parser, Debug)]
#[command(name = "kvchain-node", about = "kvchain application node", version)]
pub struct KvchainCli {
    /// Home directory holding `config/config.toml`, key files and the store.
    ///
    /// Defaults to `$HOME/.cometbft/`.
    #[arg(long = "cmt-home", env = "CMT_HOME", value_name = "DIR")]
    pub home: Option<PathBuf>,

    /// Listen address for the consensus engine: `unix://<path>`,
    /// `tcp://<host:port>` or `<host:port>`.
    #[arg(
        long = "socket-addr",
        env = "KVCHAIN_SOCKET_ADDR",
        value_name = "ADDR",
        default_value = DEFAULT_SOCKET_ADDR
    )]
    pub socket_addr: ListenAddr,
}
