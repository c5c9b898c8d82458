//! Operator-facing binary. Loads TLS material and configuration, wires up
//! discovery and the notification queue, then hands control to the menu
//! loop (§6).

mod cli;
mod config;
mod menu;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use quorumdb_discovery::Discovery;
use quorumdb_notify::NotificationQueue;
use quorumdb_rpc::TlsMaterial;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args = cli::Args::parse();

    let config = match config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&config.share_dir) {
        eprintln!("cannot create share directory {}: {e}", config.share_dir.display());
        std::process::exit(1);
    }

    let tls = match TlsMaterial::load(&args.client_cert_path, &args.client_key_path, &config.ca_bundle_path) {
        Ok(tls) => Arc::new(tls),
        Err(e) => {
            eprintln!("TLS material error: {e}");
            std::process::exit(1);
        }
    };

    let discovery = match Discovery::new() {
        Ok(d) => Arc::new(d),
        Err(e) => {
            eprintln!("mDNS discovery unavailable: {e}");
            std::process::exit(1);
        }
    };

    let notifications = Arc::new(NotificationQueue::new());

    let app = menu::App::new(tls, discovery, notifications, config);
    let code = menu::run(app).await;
    std::process::exit(code);
}
