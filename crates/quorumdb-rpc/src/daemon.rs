use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, instrument, warn};

use quorumdb_core::QuorumResult;

use crate::channel::TlsChannel;
use crate::envelope::Envelope;
use crate::tls::TlsMaterial;

/// Implemented by whatever owns the RPC surface for a role (leader,
/// follower, or a bare context before any role exists). `one_way` methods
/// dispatch here too — the daemon just never reads a reply for them because
/// the caller never sent one via [`crate::proxy::Proxy::call_one_way`].
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        method: &str,
        peer_cn: &str,
        payload: serde_json::Value,
    ) -> QuorumResult<serde_json::Value>;
}

/// The inbound half of C4: binds a TCP listener, TLS-handshakes every
/// connection and dispatches envelopes to a [`Handler`] on the runtime's
/// worker pool.
pub struct Daemon {
    local_addr: SocketAddr,
}

impl Daemon {
    /// Binds `bind_addr` and spawns the accept loop as a background task,
    /// returning immediately with the address actually bound (useful when
    /// `bind_addr`'s port is 0).
    pub async fn bind(
        bind_addr: SocketAddr,
        tls: Arc<TlsMaterial>,
        handler: Arc<dyn Handler>,
    ) -> QuorumResult<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| quorumdb_core::QuorumError::Internal(format!("bind failed: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| quorumdb_core::QuorumError::Internal(format!("local_addr failed: {e}")))?;
        let acceptor = TlsAcceptor::from(tls.server_config.clone());

        tokio::spawn(accept_loop(listener, acceptor, handler));

        Ok(Self { local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

async fn accept_loop(listener: TcpListener, acceptor: TlsAcceptor, handler: Arc<dyn Handler>) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed, continuing");
                continue;
            }
        };
        let acceptor = acceptor.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(%peer_addr, error = %e, "TLS handshake failed");
                    return;
                }
            };
            let channel = match TlsChannel::from_server(tls_stream) {
                Ok(c) => c,
                Err(e) => {
                    warn!(%peer_addr, error = %e, "rejecting unauthenticated peer");
                    return;
                }
            };
            serve_connection(Arc::new(channel), handler).await;
        });
    }
}

#[instrument(skip(channel, handler), fields(peer_cn = channel.peer_cn()))]
async fn serve_connection(channel: Arc<TlsChannel>, handler: Arc<dyn Handler>) {
    info!("peer connected");
    loop {
        let envelope = match channel.recv().await {
            Ok(e) => e,
            Err(e) => {
                info!(error = %e, "connection closed");
                return;
            }
        };
        let handler = handler.clone();
        let channel = channel.clone();
        tokio::spawn(dispatch(channel, handler, envelope));
    }
}

#[instrument(skip(channel, handler, envelope), fields(method = %envelope.method, request_id = envelope.request_id))]
async fn dispatch(channel: Arc<TlsChannel>, handler: Arc<dyn Handler>, envelope: Envelope) {
    let peer_cn = channel.peer_cn().to_string();
    let is_one_way = envelope.method.starts_with("one_way:");
    let method = envelope.method.trim_start_matches("one_way:").to_string();

    let result = handler.handle(&method, &peer_cn, envelope.payload).await;

    if is_one_way {
        if let Err(e) = result {
            warn!(%method, error = %e, "one-way call failed, no reply expected");
        }
        return;
    }

    let payload = match result {
        Ok(value) => value,
        Err(e) => serde_json::json!({"error": e.code(), "message": e.to_string()}),
    };
    let reply = Envelope {
        method,
        request_id: envelope.request_id,
        payload,
    };
    if let Err(e) = channel.send(&reply).await {
        error!(error = %e, "failed to send reply");
    }
}
