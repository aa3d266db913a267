//! TLS configuration, credential loading and handshake diagnostics.
//!
//! # Responsibilities
//! - Load certificate chains, private keys and trusted roots from PEM files
//! - Build mutually-authenticated rustls server and client configs
//! - Pin the minimum protocol version
//! - Describe a completed handshake (protocol, cipher, peer subject)

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::{ParsedCertificate, WebPkiClientVerifier};
use rustls::{CommonState, DigitallySignedStruct, RootCertStore, SignatureScheme, SupportedProtocolVersion};
use thiserror::Error;

use crate::config::{TlsConfig, TlsVersion};

/// Errors raised while assembling TLS material. All of them are setup errors.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}: no certificates found", .0.display())]
    NoCertificates(PathBuf),

    #[error("{}: no private key found", .0.display())]
    NoPrivateKey(PathBuf),

    #[error("{0} not configured")]
    Missing(&'static str),

    #[error("invalid server name '{0}'")]
    InvalidServerName(String),

    #[error("TLS error: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("certificate verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),
}

/// A local certificate chain and its private key.
#[derive(Debug)]
pub struct Identity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl Clone for Identity {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl Identity {
    pub fn new(cert_chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self { cert_chain, key }
    }

    /// Load a PEM certificate chain and a PEM private key.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let cert_chain = load_certs(cert_path)?;
        let mut reader = open(key_path)?;
        let key = rustls_pemfile::private_key(&mut reader)
            .map_err(|source| TlsError::Io { path: key_path.to_path_buf(), source })?
            .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;
        Ok(Self { cert_chain, key })
    }
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Io { path: path.to_path_buf(), source })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io { path: path.to_path_buf(), source })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

/// Load a PEM bundle of trusted root certificates.
pub fn load_root_store(path: &Path) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert)?;
    }
    Ok(roots)
}

/// Resolve the identity and trusted roots named in a [`TlsConfig`].
pub fn load_credentials(config: &TlsConfig) -> Result<(Identity, RootCertStore), TlsError> {
    let cert = config.cert.as_deref().ok_or(TlsError::Missing("tls.cert"))?;
    let key = config.key.as_deref().ok_or(TlsError::Missing("tls.key"))?;
    let root_ca = config.root_ca.as_deref().ok_or(TlsError::Missing("tls.root_ca"))?;

    let identity = Identity::from_pem_files(cert, key)?;
    let roots = load_root_store(root_ca)?;
    tracing::debug!(
        chain_len = identity.cert_chain.len(),
        roots = roots.len(),
        "Credentials loaded"
    );
    Ok((identity, roots))
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn protocol_versions(min: TlsVersion) -> &'static [&'static SupportedProtocolVersion] {
    static FROM_TLS12: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13, &rustls::version::TLS12];
    static FROM_TLS13: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];
    match min {
        TlsVersion::Tls12 => FROM_TLS12,
        TlsVersion::Tls13 => FROM_TLS13,
    }
}

/// Server side: present `identity`, require a client certificate that chains
/// to `client_roots`.
pub fn server_config(
    identity: Identity,
    client_roots: RootCertStore,
    min_version: TlsVersion,
) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let provider = provider();
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(client_roots), provider.clone()).build()?;

    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(protocol_versions(min_version))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(identity.cert_chain, identity.key)?;

    Ok(Arc::new(config))
}

/// Client side: present `identity`, verify the server against `server_roots`.
///
/// With `verify_hostname = false` the chain and handshake signatures are still
/// verified but the certificate is not matched against the server name.
pub fn client_config(
    identity: Identity,
    server_roots: RootCertStore,
    min_version: TlsVersion,
    verify_hostname: bool,
) -> Result<Arc<rustls::ClientConfig>, TlsError> {
    let provider = provider();
    let roots = Arc::new(server_roots);
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(protocol_versions(min_version))?;

    let config = if verify_hostname {
        builder
            .with_root_certificates(roots)
            .with_client_auth_cert(identity.cert_chain, identity.key)?
    } else {
        tracing::warn!("Server hostname verification disabled; certificate chain is still verified");
        let verifier = ChainOnlyVerifier::new(roots, provider)?;
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_client_auth_cert(identity.cert_chain, identity.key)?
    };

    Ok(Arc::new(config))
}

/// Build the name presented to the server during the handshake.
///
/// An explicit override wins. Otherwise the host part of `endpoint` is used,
/// which yields an IP-address name for bare IP endpoints.
pub fn server_name(endpoint: &str, name_override: Option<&str>) -> Result<ServerName<'static>, TlsError> {
    let host = match name_override {
        Some(name) => name,
        None => endpoint
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(endpoint)
            .trim_start_matches('[')
            .trim_end_matches(']'),
    };
    ServerName::try_from(host.to_string()).map_err(|_| TlsError::InvalidServerName(host.to_string()))
}

/// Verifies the server chain against the trusted roots without a name check.
#[derive(Debug)]
struct ChainOnlyVerifier {
    roots: Arc<RootCertStore>,
    provider: Arc<CryptoProvider>,
}

impl ChainOnlyVerifier {
    fn new(roots: Arc<RootCertStore>, provider: Arc<CryptoProvider>) -> Result<Self, TlsError> {
        if roots.is_empty() {
            return Err(rustls::server::VerifierBuilderError::NoRootAnchors.into());
        }
        Ok(Self { roots, provider })
    }
}

impl ServerCertVerifier for ChainOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let cert = ParsedCertificate::try_from(end_entity)?;
        rustls::client::verify_server_cert_signed_by_trust_anchor(
            &cert,
            &self.roots,
            intermediates,
            now,
            self.provider.signature_verification_algorithms.all,
        )?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Summary of a completed handshake, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub handshake_complete: bool,
    pub protocol: Option<String>,
    pub cipher_suite: Option<String>,
    pub peer_verified: bool,
    pub peer_subject: Option<String>,
}

impl HandshakeInfo {
    /// Works for both `ServerConnection` and `ClientConnection` via deref.
    pub fn from_state(state: &CommonState) -> Self {
        let peer = state.peer_certificates().and_then(|certs| certs.first());
        Self {
            handshake_complete: !state.is_handshaking(),
            protocol: state.protocol_version().map(|v| format!("{v:?}")),
            cipher_suite: state.negotiated_cipher_suite().map(|s| format!("{:?}", s.suite())),
            peer_verified: peer.is_some(),
            peer_subject: peer.and_then(peer_subject),
        }
    }

    pub fn log(&self, peer_addr: &std::net::SocketAddr) {
        tracing::info!(
            peer_addr = %peer_addr,
            handshake_complete = self.handshake_complete,
            protocol = self.protocol.as_deref().unwrap_or("-"),
            cipher_suite = self.cipher_suite.as_deref().unwrap_or("-"),
            peer_subject = self.peer_subject.as_deref().unwrap_or("-"),
            "TLS handshake complete"
        );
    }
}

/// Distinguished name of a DER certificate, e.g. `CN=client-1`.
pub fn peer_subject(der: &CertificateDer<'_>) -> Option<String> {
    x509_parser::parse_x509_certificate(der.as_ref())
        .ok()
        .map(|(_, cert)| cert.subject().to_string())
}
