use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use quorumdb_core::{QuorumError, QuorumResult};
use x509_parser::prelude::FromDer;

fn read_certs(path: &Path) -> QuorumResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| QuorumError::Internal(format!("cannot read {}: {e}", path.display())))?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| QuorumError::Internal(format!("bad certificate {}: {e}", path.display())))
}

fn read_key(path: &Path) -> QuorumResult<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| QuorumError::Internal(format!("cannot read {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| QuorumError::Internal(format!("bad private key {}: {e}", path.display())))?
        .ok_or_else(|| QuorumError::Internal(format!("no private key found in {}", path.display())))
}

fn build_root_store(ca_bundle_path: &Path) -> QuorumResult<RootCertStore> {
    let mut store = RootCertStore::empty();
    for cert in read_certs(ca_bundle_path)? {
        store
            .add(cert)
            .map_err(|e| QuorumError::Internal(format!("bad CA certificate: {e}")))?;
    }
    Ok(store)
}

/// Bundles the material every peer loads once at startup (§6): its own
/// client/server identity plus the shared CA used to validate everyone
/// else's.
pub struct TlsMaterial {
    pub server_config: Arc<ServerConfig>,
    pub client_config: Arc<ClientConfig>,
}

static INSTALL_CRYPTO_PROVIDER: std::sync::Once = std::sync::Once::new();

impl TlsMaterial {
    pub fn load(cert_path: &Path, key_path: &Path, ca_bundle_path: &Path) -> QuorumResult<Self> {
        INSTALL_CRYPTO_PROVIDER
            .call_once(|| { let _ = rustls::crypto::ring::default_provider().install_default(); });

        let certs = read_certs(cert_path)?;
        let key = read_key(key_path)?;
        let roots = build_root_store(ca_bundle_path)?;

        let client_verifier = WebPkiClientVerifier::builder(Arc::new(roots.clone()))
            .build()
            .map_err(|e| QuorumError::Internal(format!("client verifier setup failed: {e}")))?;

        let server_config = ServerConfig::builder()
            .with_client_cert_verifier(client_verifier)
            .with_single_cert(certs.clone(), key.clone_key())
            .map_err(|e| QuorumError::Internal(format!("server TLS config failed: {e}")))?;

        let client_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
            .map_err(|e| QuorumError::Internal(format!("client TLS config failed: {e}")))?;

        Ok(Self {
            server_config: Arc::new(server_config),
            client_config: Arc::new(client_config),
        })
    }
}

/// Extracts the Common Name from a peer's leaf certificate — the stable
/// identity used for all `followers` membership checks (§3).
pub fn common_name_of(cert: &CertificateDer<'_>) -> QuorumResult<String> {
    let (_, parsed) = x509_parser::certificate::X509Certificate::from_der(cert.as_ref())
        .map_err(|e| QuorumError::Internal(format!("cannot parse peer certificate: {e}")))?;
    let result = parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| QuorumError::Internal("peer certificate has no Common Name".into()));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_name_of_rejects_garbage_der() {
        let cert = CertificateDer::from(vec![0u8; 4]);
        assert!(common_name_of(&cert).is_err());
    }
}
