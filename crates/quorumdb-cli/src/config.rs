//! Layered startup configuration (§10 "Configuration"): a `config.toml`
//! read first, environment variables overriding any field it set, and CLI
//! flags overriding both. No field is ever silently left unset — missing
//! required values are a hard startup error, not a default guess.

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::cli::Args;

/// Typed configuration every peer needs beyond the two positional TLS
/// material paths (§6). `share_dir` is where follower replicas and
/// newly-created local stores are written; `ca_bundle_path` is the shared
/// CA every peer's certificate chains to; `rpc_bind_address` is where this
/// process's [`quorumdb_rpc::Daemon`] instances listen; `advertised_host`
/// is the address published in mDNS SRV records when this peer shares a
/// store.
#[derive(Debug, Clone)]
pub struct Config {
    pub share_dir: PathBuf,
    pub ca_bundle_path: PathBuf,
    pub rpc_bind_address: SocketAddr,
    pub advertised_host: IpAddr,
}

/// Mirrors [`Config`] but with every field optional, so a layer that
/// doesn't mention a key leaves it untouched rather than clobbering an
/// earlier layer's value with a default.
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    share_dir: Option<PathBuf>,
    ca_bundle_path: Option<PathBuf>,
    rpc_bind_address: Option<SocketAddr>,
    advertised_host: Option<IpAddr>,
}

impl PartialConfig {
    fn merge(self, other: PartialConfig) -> Self {
        Self {
            share_dir: other.share_dir.or(self.share_dir),
            ca_bundle_path: other.ca_bundle_path.or(self.ca_bundle_path),
            rpc_bind_address: other.rpc_bind_address.or(self.rpc_bind_address),
            advertised_host: other.advertised_host.or(self.advertised_host),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("`{0}` in the environment is not valid: {1}")]
    BadEnvValue(&'static str, String),
    #[error("missing required configuration value `{0}` (set it in config.toml, via environment, or as a CLI flag)")]
    Missing(&'static str),
}

fn from_file(path: &Path) -> Result<PartialConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn from_env() -> Result<PartialConfig, ConfigError> {
    let share_dir = env::var("QUORUMDB_SHARE_DIR").ok().map(PathBuf::from);
    let ca_bundle_path = env::var("QUORUMDB_CA_BUNDLE_PATH").ok().map(PathBuf::from);
    let rpc_bind_address = match env::var("QUORUMDB_RPC_BIND_ADDRESS") {
        Ok(value) => Some(
            value
                .parse()
                .map_err(|_| ConfigError::BadEnvValue("QUORUMDB_RPC_BIND_ADDRESS", value))?,
        ),
        Err(_) => None,
    };
    let advertised_host = match env::var("QUORUMDB_ADVERTISED_HOST") {
        Ok(value) => Some(
            value
                .parse()
                .map_err(|_| ConfigError::BadEnvValue("QUORUMDB_ADVERTISED_HOST", value))?,
        ),
        Err(_) => None,
    };
    Ok(PartialConfig {
        share_dir,
        ca_bundle_path,
        rpc_bind_address,
        advertised_host,
    })
}

fn from_args(args: &Args) -> PartialConfig {
    PartialConfig {
        share_dir: args.share_dir.clone(),
        ca_bundle_path: args.ca_bundle.clone(),
        rpc_bind_address: args.bind,
        advertised_host: args.advertised_host,
    }
}

/// Builds the effective configuration: `config.toml` (if present) < env
/// vars < CLI flags. `share_dir` defaults to the current directory and
/// `rpc_bind_address` defaults to an OS-chosen port on all interfaces when
/// no layer supplies one; `ca_bundle_path` has no sane default and is a
/// hard error if never set.
pub fn load(args: &Args) -> Result<Config, ConfigError> {
    let mut layer = PartialConfig::default();

    let config_path = args.config.clone().unwrap_or_else(|| PathBuf::from("config.toml"));
    if config_path.exists() {
        layer = layer.merge(from_file(&config_path)?);
    }

    layer = layer.merge(from_env()?);
    layer = layer.merge(from_args(args));

    Ok(Config {
        share_dir: layer.share_dir.unwrap_or_else(|| PathBuf::from(".")),
        ca_bundle_path: layer.ca_bundle_path.ok_or(ConfigError::Missing("ca_bundle_path"))?,
        rpc_bind_address: layer
            .rpc_bind_address
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)),
        advertised_host: layer
            .advertised_host
            .unwrap_or_else(|| IpAddr::V4(Ipv4Addr::LOCALHOST)),
    })
}
