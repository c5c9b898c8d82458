use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use quorumdb_core::{QuorumError, QuorumResult, RPC_CONNECT_TIMEOUT};

use crate::channel::TlsChannel;
use crate::envelope::Envelope;
use crate::tls::TlsMaterial;

/// A short-lived outbound binding to one peer's RPC URI. Every call carries
/// the 5 s connect timeout from §4.4/§5; callers create a fresh `Proxy` per
/// logical destination rather than pooling connections, matching "short-lived
/// proxies bound to a target URI".
pub struct Proxy {
    channel: TlsChannel,
    next_request_id: AtomicU64,
}

impl Proxy {
    /// Parses `uri` as `host:port` and connects, TLS-handshaking as a
    /// client. `server_name` must be present in the peer's certificate (we
    /// use the bare host for SNI since this is a closed LAN cluster, not a
    /// public CA deployment).
    pub async fn connect(uri: &str, tls: &TlsMaterial) -> QuorumResult<Self> {
        let addr: SocketAddr = uri
            .parse()
            .map_err(|e| QuorumError::Unreachable(format!("bad peer URI `{uri}`: {e}")))?;

        let connect = TcpStream::connect(addr);
        let stream = tokio::time::timeout(RPC_CONNECT_TIMEOUT, connect)
            .await
            .map_err(|_| QuorumError::Unreachable(format!("connect to {uri} timed out")))?
            .map_err(|e| QuorumError::Unreachable(format!("connect to {uri} failed: {e}")))?;

        let connector = TlsConnector::from(tls.client_config.clone());
        let server_name = ServerName::try_from(addr.ip().to_string())
            .map_err(|e| QuorumError::Internal(format!("bad server name: {e}")))?;

        let handshake = connector.connect(server_name, stream);
        let tls_stream = tokio::time::timeout(RPC_CONNECT_TIMEOUT, handshake)
            .await
            .map_err(|_| QuorumError::Unreachable(format!("TLS handshake with {uri} timed out")))?
            .map_err(|e| QuorumError::Unreachable(format!("TLS handshake with {uri} failed: {e}")))?;

        let channel = TlsChannel::from_client(tls_stream)?;
        Ok(Self {
            channel,
            next_request_id: AtomicU64::new(1),
        })
    }

    /// The Common Name the peer's certificate presented during the
    /// handshake — used to confirm we dialed who we expected (§4.7.1 step
    /// 1, "capture the leader's peer CN").
    pub fn peer_cn(&self) -> &str {
        self.channel.peer_cn()
    }

    /// Request/response call: sends `method`/`payload`, waits for the
    /// matching reply envelope.
    pub async fn call(&self, method: &str, payload: serde_json::Value) -> QuorumResult<serde_json::Value> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.channel
            .send(&Envelope {
                method: method.to_string(),
                request_id,
                payload,
            })
            .await?;

        loop {
            let reply = self.channel.recv().await?;
            if reply.request_id == request_id {
                if let Some(message) = reply.payload.get("error").and_then(|v| v.as_str()) {
                    let detail = reply
                        .payload
                        .get("message")
                        .and_then(|v| v.as_str())
                        .unwrap_or(message)
                        .to_string();
                    return Err(QuorumError::Internal(detail));
                }
                return Ok(reply.payload);
            }
        }
    }

    /// One-way call: sends the envelope and returns as soon as the write
    /// completes, without waiting for any reply (§4.4).
    pub async fn call_one_way(&self, method: &str, payload: serde_json::Value) -> QuorumResult<()> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.channel
            .send(&Envelope {
                method: format!("one_way:{method}"),
                request_id,
                payload,
            })
            .await
    }
}

pub struct ProxyHandle(Arc<Proxy>);

impl ProxyHandle {
    pub fn new(proxy: Proxy) -> Self {
        Self(Arc::new(proxy))
    }
}

impl std::ops::Deref for ProxyHandle {
    type Target = Proxy;

    fn deref(&self) -> &Proxy {
        &self.0
    }
}

impl Clone for ProxyHandle {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
