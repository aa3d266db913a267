//! Shared utilities for integration and load testing.
//!
//! Every test run mints its own throwaway PKI with rcgen; nothing is read
//! from disk.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::RootCertStore;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use tls_echo::config::{ClientConfig, ServerConfig, TlsVersion};
use tls_echo::net::tls::{self, Identity};
use tls_echo::{EchoServer, RunningServer};

/// A certificate authority that can issue leaf certificates.
pub struct Authority {
    cert: Certificate,
    key: KeyPair,
}

impl Authority {
    pub fn new(common_name: &str) -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    pub fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    pub fn roots(&self) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        roots.add(self.der()).unwrap();
        roots
    }

    /// Issue a leaf usable for both server and client authentication.
    /// Entries of `sans` that parse as IP addresses become IP SANs.
    pub fn issue(&self, common_name: &str, sans: &[&str]) -> Leaf {
        let mut params = CertificateParams::new(sans.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth, ExtendedKeyUsagePurpose::ClientAuth];
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        Leaf { cert, key }
    }
}

/// A leaf certificate and its key.
pub struct Leaf {
    cert: Certificate,
    key: KeyPair,
}

impl Leaf {
    pub fn identity(&self) -> Identity {
        Identity::new(
            vec![self.cert.der().clone()],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key.serialize_der())),
        )
    }

    pub fn cert_pem(&self) -> String {
        self.cert.pem()
    }

    pub fn key_pem(&self) -> String {
        self.key.serialize_pem()
    }
}

/// Trusted CA plus a rogue CA that the server does not trust.
pub struct Pki {
    pub ca: Authority,
    pub rogue: Authority,
    pub server: Leaf,
    pub client: Leaf,
    pub rogue_client: Leaf,
}

impl Pki {
    pub fn new() -> Self {
        let ca = Authority::new("echo test root");
        let rogue = Authority::new("rogue root");
        let server = ca.issue("echo-server", &["localhost", "127.0.0.1"]);
        let client = ca.issue("echo-client", &["echo-client"]);
        let rogue_client = rogue.issue("rogue-client", &["rogue-client"]);
        Self {
            ca,
            rogue,
            server,
            client,
            rogue_client,
        }
    }

    pub fn server_tls(&self) -> Arc<rustls::ServerConfig> {
        tls::server_config(self.server.identity(), self.ca.roots(), TlsVersion::Tls12).unwrap()
    }

    pub fn client_tls(&self) -> Arc<rustls::ClientConfig> {
        tls::client_config(self.client.identity(), self.ca.roots(), TlsVersion::Tls12, true).unwrap()
    }

    pub fn rogue_client_tls(&self) -> Arc<rustls::ClientConfig> {
        tls::client_config(self.rogue_client.identity(), self.ca.roots(), TlsVersion::Tls12, true).unwrap()
    }
}

/// Server settings for tests: ephemeral port, given idle window.
pub fn server_config(idle_timeout_ms: u64) -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        idle_timeout_ms,
        ..ServerConfig::default()
    }
}

/// Client settings pointing at a running server.
pub fn client_config(server: &RunningServer, clients: usize) -> ClientConfig {
    ClientConfig {
        server_address: server.local_addr().to_string(),
        clients,
        ..ClientConfig::default()
    }
}

pub async fn start_server(pki: &Pki, config: ServerConfig) -> RunningServer {
    EchoServer::new(config, pki.server_tls()).start().await.unwrap()
}

/// Raw mutual-TLS connection, bypassing the client fleet.
pub async fn connect(server: &RunningServer, tls: Arc<rustls::ClientConfig>) -> std::io::Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect(server.local_addr()).await?;
    let name = tls::server_name(&server.local_addr().to_string(), None).unwrap();
    TlsConnector::from(tls).connect(name, tcp).await
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Await `fut`, failing the test if it takes longer than `timeout`.
pub async fn within<T>(timeout: Duration, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, fut).await.expect("operation timed out")
}
