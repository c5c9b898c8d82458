use rustls::pki_types::CertificateDer;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_rustls::{client::TlsStream as ClientTlsStream, server::TlsStream as ServerTlsStream};

use quorumdb_core::{QuorumError, QuorumResult};

use crate::envelope::{read_envelope, write_envelope, Envelope};
use crate::tls::common_name_of;

enum Inner {
    Server(ServerTlsStream<TcpStream>),
    Client(ClientTlsStream<TcpStream>),
}

/// A handshaked mutual-TLS stream, server- or client-side, wrapped in a
/// single mutex so concurrent callers serialise on the underlying socket
/// the way a connection-oriented RPC channel expects (§4.4).
pub struct TlsChannel {
    stream: AsyncMutex<Inner>,
    peer_cn: String,
}

impl TlsChannel {
    pub(crate) fn from_server(stream: ServerTlsStream<TcpStream>) -> QuorumResult<Self> {
        let peer_cn = peer_cn_of_server(&stream)?;
        Ok(Self {
            stream: AsyncMutex::new(Inner::Server(stream)),
            peer_cn,
        })
    }

    pub(crate) fn from_client(stream: ClientTlsStream<TcpStream>) -> QuorumResult<Self> {
        let peer_cn = peer_cn_of_client(&stream)?;
        Ok(Self {
            stream: AsyncMutex::new(Inner::Client(stream)),
            peer_cn,
        })
    }

    /// Common Name of the certificate the other side presented during the
    /// handshake — the identity every authorisation check in §4.6/§4.7 uses.
    pub fn peer_cn(&self) -> &str {
        &self.peer_cn
    }

    pub async fn send(&self, envelope: &Envelope) -> QuorumResult<()> {
        let mut guard = self.stream.lock().await;
        match &mut *guard {
            Inner::Server(s) => write_envelope(s, envelope).await,
            Inner::Client(s) => write_envelope(s, envelope).await,
        }
    }

    pub async fn recv(&self) -> QuorumResult<Envelope> {
        let mut guard = self.stream.lock().await;
        match &mut *guard {
            Inner::Server(s) => read_envelope(s).await,
            Inner::Client(s) => read_envelope(s).await,
        }
    }
}

fn peer_cn_of_server(stream: &ServerTlsStream<TcpStream>) -> QuorumResult<String> {
    let (_, connection) = stream.get_ref();
    let certs = connection
        .peer_certificates()
        .ok_or_else(|| QuorumError::Unauthorised)?;
    leaf_cn(certs)
}

fn peer_cn_of_client(stream: &ClientTlsStream<TcpStream>) -> QuorumResult<String> {
    let (_, connection) = stream.get_ref();
    let certs = connection
        .peer_certificates()
        .ok_or_else(|| QuorumError::Unauthorised)?;
    leaf_cn(certs)
}

fn leaf_cn(certs: &[CertificateDer<'static>]) -> QuorumResult<String> {
    let leaf = certs.first().ok_or(QuorumError::Unauthorised)?;
    common_name_of(leaf)
}
