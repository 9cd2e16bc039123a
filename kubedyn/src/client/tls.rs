//! Assembly of rustls client configurations from [`Config`](crate::Config) material.
use std::sync::{Arc, Mutex};

use rustls::{
    client::ResolvesClientCert,
    crypto::ring as crypto_provider,
    pki_types::{CertificateDer, PrivateKeyDer},
    sign::CertifiedKey,
    ClientConfig, SignatureScheme,
};
use thiserror::Error;

use crate::config::Identity;

/// Errors from assembling TLS material
#[derive(Debug, Error)]
pub enum Error {
    /// Identity PEM is invalid
    #[error("identity PEM is invalid: {0}")]
    InvalidIdentityPem(#[source] std::io::Error),

    /// Identity PEM is missing a private key: the key must be PKCS8 or RSA/PKCS1 or SEC1
    #[error("identity PEM is missing a private key: the key must be PKCS8 or RSA/PKCS1 or SEC1")]
    MissingPrivateKey,

    /// Identity PEM is missing certificate
    #[error("identity PEM is missing certificate")]
    MissingCertificate,

    /// Invalid private key
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(#[source] rustls::Error),

    /// Failed to add a root certificate
    #[error("failed to add a root certificate: {0}")]
    AddRootCertificate(#[source] rustls::Error),

    /// No valid native root CA certificates found
    #[error("no valid native root CA certificates found: {0}")]
    NoValidNativeRootCA(#[source] std::io::Error),
}

/// Create a `rustls::ClientConfig` for the given roots, identity and verify policy.
pub(crate) fn rustls_client_config(
    identity: &Identity,
    root_certs: Option<&[Vec<u8>]>,
    accept_invalid: bool,
) -> Result<ClientConfig, Error> {
    use hyper_rustls::ConfigBuilderExt;

    let config_builder = if let Some(certs) = root_certs {
        ClientConfig::builder().with_root_certificates(root_store(certs)?)
    } else {
        ClientConfig::builder()
            .with_native_roots()
            .map_err(Error::NoValidNativeRootCA)?
    };

    let mut client_config = match identity {
        Identity::None => config_builder.with_no_client_auth(),
        Identity::Pem(pem) => {
            let (chain, pkey) = client_auth(pem)?;
            config_builder
                .with_client_auth_cert(chain, pkey)
                .map_err(Error::InvalidPrivateKey)?
        }
        Identity::Paths { cert, key } => {
            let resolver = ReloadingCertResolver::new(cert.clone(), key.clone())?;
            config_builder.with_client_cert_resolver(Arc::new(resolver))
        }
    };

    if accept_invalid {
        client_config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoCertificateVerification {}));
    }
    Ok(client_config)
}

fn root_store(root_certs: &[Vec<u8>]) -> Result<rustls::RootCertStore, Error> {
    let mut root_store = rustls::RootCertStore::empty();
    for der in root_certs {
        root_store
            .add(CertificateDer::from(der.clone()))
            .map_err(Error::AddRootCertificate)?;
    }
    Ok(root_store)
}

fn client_auth(data: &[u8]) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), Error> {
    use rustls_pemfile::Item;

    let mut cert_chain = Vec::new();
    let mut private_key = None;
    let mut reader = std::io::Cursor::new(data);
    for item in rustls_pemfile::read_all(&mut reader) {
        match item.map_err(Error::InvalidIdentityPem)? {
            Item::X509Certificate(cert) => cert_chain.push(cert),
            Item::Pkcs8Key(key) => private_key = Some(PrivateKeyDer::Pkcs8(key)),
            Item::Pkcs1Key(key) => private_key = Some(PrivateKeyDer::Pkcs1(key)),
            Item::Sec1Key(key) => private_key = Some(PrivateKeyDer::Sec1(key)),
            _ => {}
        }
    }

    let private_key = private_key.ok_or(Error::MissingPrivateKey)?;
    if cert_chain.is_empty() {
        return Err(Error::MissingCertificate);
    }
    Ok((cert_chain, private_key))
}

fn certified_key(cert_pem: &[u8], key_pem: &[u8]) -> Result<CertifiedKey, Error> {
    let mut reader = std::io::Cursor::new(cert_pem);
    let chain = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(Error::InvalidIdentityPem)?;
    if chain.is_empty() {
        return Err(Error::MissingCertificate);
    }

    let mut reader = std::io::Cursor::new(key_pem);
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(Error::InvalidIdentityPem)?
        .ok_or(Error::MissingPrivateKey)?;
    let signer = crypto_provider::sign::any_supported_type(&key).map_err(Error::InvalidPrivateKey)?;
    Ok(CertifiedKey::new(chain, signer))
}

// Jittered reload window for file-backed identities, matching the token file
// reload cadence.
fn reload_deadline() -> std::time::Instant {
    use rand::Rng;
    let factor: f64 = rand::rng().random_range(0.95..=1.0);
    std::time::Instant::now() + std::time::Duration::from_secs_f64(60.0 * factor)
}

/// Client certificate resolver that re-reads its PEM files periodically
///
/// Rotated certificates take effect on the next TLS handshake. A failed
/// reload keeps serving the previous identity; only construction is fatal.
pub(crate) struct ReloadingCertResolver {
    cert_path: std::path::PathBuf,
    key_path: std::path::PathBuf,
    state: Mutex<ReloadState>,
}

struct ReloadState {
    key: Arc<CertifiedKey>,
    reload_at: std::time::Instant,
}

impl ReloadingCertResolver {
    fn new(cert_path: std::path::PathBuf, key_path: std::path::PathBuf) -> Result<Self, Error> {
        let key = Arc::new(Self::load(&cert_path, &key_path)?);
        Ok(Self {
            cert_path,
            key_path,
            state: Mutex::new(ReloadState {
                key,
                reload_at: reload_deadline(),
            }),
        })
    }

    fn load(cert_path: &std::path::Path, key_path: &std::path::Path) -> Result<CertifiedKey, Error> {
        let cert_pem = std::fs::read(cert_path).map_err(Error::InvalidIdentityPem)?;
        let key_pem = std::fs::read(key_path).map_err(Error::InvalidIdentityPem)?;
        certified_key(&cert_pem, &key_pem)
    }
}

impl std::fmt::Debug for ReloadingCertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadingCertResolver")
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .finish()
    }
}

impl ResolvesClientCert for ReloadingCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if std::time::Instant::now() >= state.reload_at {
            match Self::load(&self.cert_path, &self.key_path) {
                Ok(fresh) => state.key = Arc::new(fresh),
                Err(e) => {
                    tracing::warn!("failed to reload client identity from {:?}: {e}", self.cert_path);
                }
            }
            state.reload_at = reload_deadline();
        }
        Some(state.key.clone())
    }

    fn has_certs(&self) -> bool {
        true
    }
}

#[derive(Debug)]
struct NoCertificateVerification {}

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &crypto_provider::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &crypto_provider::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        crypto_provider::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_identity_material_is_fatal() {
        let err = client_auth(b"not a pem").unwrap_err();
        assert!(matches!(err, Error::MissingPrivateKey | Error::MissingCertificate));
    }

    #[test]
    fn reloading_resolver_requires_readable_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReloadingCertResolver::new(dir.path().join("tls.crt"), dir.path().join("tls.key"));
        assert!(matches!(err, Err(Error::InvalidIdentityPem(_))));
    }
}
