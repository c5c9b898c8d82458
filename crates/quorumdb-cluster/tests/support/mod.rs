//! Shared fixtures for the end-to-end scenarios in `cluster.rs`: a
//! throwaway CA plus one leaf certificate per peer, written out as PEM so
//! `TlsMaterial::load` exercises the same file-reading path production
//! code does.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

use quorumdb_rpc::TlsMaterial;

/// A disposable single-CA PKI: every peer's leaf certificate is signed by
/// the same root so one CA bundle file validates the whole cluster.
/// `TlsMaterial::load` installs the process-wide crypto provider itself,
/// so there is nothing test-specific to set up beyond the certificates.
pub struct Pki {
    dir: tempfile::TempDir,
    ca_bundle_path: PathBuf,
    issuer_key: KeyPair,
    issuer_cert: rcgen::Certificate,
}

impl Pki {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");

        let mut ca_params = CertificateParams::new(Vec::new()).expect("ca params");
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let mut ca_dn = DistinguishedName::new();
        ca_dn.push(DnType::CommonName, "quorumdb test CA");
        ca_params.distinguished_name = ca_dn;
        let issuer_key = KeyPair::generate().expect("ca key");
        let issuer_cert = ca_params.self_signed(&issuer_key).expect("self-sign CA");

        let ca_bundle_path = dir.path().join("ca.pem");
        std::fs::write(&ca_bundle_path, issuer_cert.pem()).expect("write ca bundle");

        Self { dir, ca_bundle_path, issuer_key, issuer_cert }
    }

    /// Issues a leaf certificate for `cn`, writes it and its key to PEM
    /// files under the fixture's temp dir, and loads the resulting
    /// [`TlsMaterial`] (own identity + the shared CA as trust root).
    pub fn issue(&self, cn: &str) -> Arc<TlsMaterial> {
        let mut params = CertificateParams::new(vec!["127.0.0.1".to_string()]).expect("leaf params");
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;

        let key = KeyPair::generate().expect("leaf key");
        let cert = params
            .signed_by(&key, &self.issuer_cert, &self.issuer_key)
            .expect("sign leaf");

        let cert_path = self.dir.path().join(format!("{cn}.cert.pem"));
        let key_path = self.dir.path().join(format!("{cn}.key.pem"));
        std::fs::write(&cert_path, cert.pem()).expect("write leaf cert");
        std::fs::write(&key_path, key.serialize_pem()).expect("write leaf key");

        Arc::new(TlsMaterial::load(&cert_path, &key_path, &self.ca_bundle_path).expect("load tls material"))
    }

    pub fn store_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

pub fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().expect("valid loopback address")
}
