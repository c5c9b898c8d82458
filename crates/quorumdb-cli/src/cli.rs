use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

/// quorumdb: a peer-to-peer shared password database.
///
/// Every peer identifies itself with a client certificate and key; the two
/// positional arguments are required (§6) and unreadable files are a
/// startup error, not a prompt to retry.
#[derive(Debug, Parser)]
#[command(name = "quorumdb", version, about = "Peer-to-peer shared password database")]
pub struct Args {
    /// PEM-encoded client certificate presented to every peer this process
    /// dials or accepts a connection from.
    pub client_cert_path: PathBuf,

    /// PEM-encoded private key matching `client_cert_path`.
    pub client_key_path: PathBuf,

    /// Path to a `config.toml` layer (defaults to `./config.toml`, silently
    /// skipped if absent).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Overrides `ca_bundle_path` from `config.toml` / the environment.
    #[arg(long)]
    pub ca_bundle: Option<PathBuf>,

    /// Overrides `share_dir` from `config.toml` / the environment.
    #[arg(long)]
    pub share_dir: Option<PathBuf>,

    /// Overrides `rpc_bind_address` from `config.toml` / the environment.
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Overrides `advertised_host` from `config.toml` / the environment.
    #[arg(long)]
    pub advertised_host: Option<IpAddr>,
}
