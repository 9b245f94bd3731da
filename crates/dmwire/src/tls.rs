//! TLS support.
//!
//! The server announces its TLS policy in the handshake response. After
//! the handshake exchange the client upgrades the socket:
//!
//! 1. Policy `Always`: every later frame travels inside TLS.
//! 2. Policy `HandshakeOnly`: a TLS handshake proves the server identity,
//!    then frames continue in plaintext on the raw socket.
//!
//! TLS requires the `tls` feature:
//!
//! ```toml
//! [dependencies]
//! dmwire = { version = "0.1", features = ["tls"] }
//! ```

use dmwire_core::{ConfigError, Error, TransportError, TransportErrorKind};

use crate::config::{SslMode, TlsConfig};

#[cfg(feature = "tls")]
use std::io::{Read, Write};
#[cfg(feature = "tls")]
use std::sync::Arc;

/// TLS policy announced by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerTlsPolicy {
    #[default]
    Disabled,
    /// All frames after the handshake are encrypted
    Always,
    /// Only the TLS handshake runs; frames stay in plaintext
    HandshakeOnly,
}

impl ServerTlsPolicy {
    pub fn from_wire(code: i32) -> Self {
        match code {
            1 => ServerTlsPolicy::Always,
            2 => ServerTlsPolicy::HandshakeOnly,
            _ => ServerTlsPolicy::Disabled,
        }
    }
}

/// Reconcile the client's mode with the server's policy.
pub fn negotiate_tls(ssl_mode: SslMode, server: ServerTlsPolicy) -> Result<ServerTlsPolicy, Error> {
    match (ssl_mode, server) {
        (SslMode::Off, ServerTlsPolicy::Disabled) => Ok(ServerTlsPolicy::Disabled),
        (SslMode::Off, _) => Err(policy_mismatch("server requires TLS but ssl_mode is off")),
        (SslMode::Force, ServerTlsPolicy::Disabled) => Err(policy_mismatch(
            "TLS required but server does not offer it",
        )),
        (_, policy) => Ok(policy),
    }
}

/// Validate TLS configuration for the given SSL mode.
pub fn validate_tls_config(ssl_mode: SslMode, tls_config: &TlsConfig) -> Result<(), Error> {
    if !ssl_mode.should_try_ssl() {
        return Ok(());
    }
    if tls_config.client_cert_path.is_some() && tls_config.client_key_path.is_none() {
        return Err(tls_error(
            "Client certificate provided without client key. \
             Both must be set for mutual TLS.",
        ));
    }
    if tls_config.danger_skip_verify && tls_config.ca_cert_path.is_some() {
        tracing::warn!("ca_cert_path is ignored because certificate verification is skipped");
    }
    Ok(())
}

fn policy_mismatch(message: &str) -> Error {
    Error::Config(ConfigError {
        message: message.to_string(),
        source: None,
    })
}

fn tls_error(message: impl Into<String>) -> Error {
    Error::Transport(TransportError {
        kind: TransportErrorKind::Tls,
        message: message.into(),
        source: None,
    })
}

/// TLS connection wrapper using rustls.
#[cfg(feature = "tls")]
pub struct TlsStream<S: Read + Write> {
    conn: rustls::ClientConnection,
    stream: S,
}

#[cfg(feature = "tls")]
impl<S: Read + Write> std::fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStream")
            .field("protocol_version", &self.conn.protocol_version())
            .field("is_handshaking", &self.conn.is_handshaking())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> TlsStream<S> {
    /// Wrap `stream` and drive the TLS handshake to completion.
    pub fn new(mut stream: S, tls_config: &TlsConfig, server_name: &str) -> Result<Self, Error> {
        let config = build_client_config(tls_config)?;

        let sni_name = tls_config.server_name.as_deref().unwrap_or(server_name);
        let server_name = sni_name
            .to_string()
            .try_into()
            .map_err(|e| tls_error(format!("Invalid server name '{}': {}", sni_name, e)))?;

        let mut conn = rustls::ClientConnection::new(Arc::new(config), server_name)
            .map_err(|e| tls_error(format!("Failed to create TLS connection: {}", e)))?;

        while conn.is_handshaking() {
            while conn.wants_write() {
                conn.write_tls(&mut stream)
                    .map_err(|e| tls_error(format!("TLS handshake write error: {}", e)))?;
            }
            if conn.wants_read() {
                let n = conn
                    .read_tls(&mut stream)
                    .map_err(|e| tls_error(format!("TLS handshake read error: {}", e)))?;
                if n == 0 {
                    return Err(tls_error("peer closed the socket during the TLS handshake"));
                }
                conn.process_new_packets()
                    .map_err(|e| tls_error(format!("TLS handshake error: {}", e)))?;
            }
        }

        tracing::debug!(version = ?conn.protocol_version(), "TLS handshake complete");
        Ok(TlsStream { conn, stream })
    }

    pub fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        self.conn.protocol_version()
    }

    /// Give back the raw stream, discarding the TLS session.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> Read for TlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            if !self.conn.wants_read() {
                return Ok(0);
            }
            if self.conn.read_tls(&mut self.stream)? == 0 {
                return Ok(0);
            }
            self.conn
                .process_new_packets()
                .map_err(|e| std::io::Error::other(format!("TLS error: {}", e)))?;
        }
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> Write for TlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.conn.writer().write(buf)?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.conn.writer().flush()?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        self.stream.flush()
    }
}

#[cfg(feature = "tls")]
fn build_client_config(tls_config: &TlsConfig) -> Result<rustls::ClientConfig, Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    if tls_config.danger_skip_verify {
        build_no_verify_config(&provider)
    } else if let Some(ca_path) = &tls_config.ca_cert_path {
        build_custom_ca_config(&provider, tls_config, ca_path)
    } else {
        build_webpki_config(&provider, tls_config)
    }
}

/// Build a ClientConfig that accepts any server certificate.
#[cfg(feature = "tls")]
fn build_no_verify_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
) -> Result<rustls::ClientConfig, Error> {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error as RustlsError, SignatureScheme};

    #[derive(Debug)]
    struct AcceptAnyCert {
        schemes: Vec<SignatureScheme>,
    }

    impl ServerCertVerifier for AcceptAnyCert {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, RustlsError> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.schemes.clone()
        }
    }

    let verifier = AcceptAnyCert {
        schemes: provider
            .signature_verification_algorithms
            .supported_schemes(),
    };

    let config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("Failed to set TLS versions: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    Ok(config)
}

#[cfg(feature = "tls")]
fn build_webpki_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
    tls_config: &TlsConfig,
) -> Result<rustls::ClientConfig, Error> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("Failed to set TLS versions: {}", e)))?
        .with_root_certificates(root_store);

    add_client_auth(builder, tls_config)
}

#[cfg(feature = "tls")]
fn load_certs(
    path: &std::path::Path,
    what: &str,
) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, Error> {
    use std::fs::File;
    use std::io::BufReader;

    let file = File::open(path)
        .map_err(|e| tls_error(format!("Failed to open {} '{}': {}", what, path.display(), e)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("Failed to parse {}: {}", what, e)))?;
    if certs.is_empty() {
        return Err(tls_error(format!(
            "No certificates found in {} '{}'",
            what,
            path.display()
        )));
    }
    Ok(certs)
}

#[cfg(feature = "tls")]
fn build_custom_ca_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
    tls_config: &TlsConfig,
    ca_path: &std::path::Path,
) -> Result<rustls::ClientConfig, Error> {
    let mut root_store = rustls::RootCertStore::empty();
    for cert in load_certs(ca_path, "CA certificate")? {
        root_store
            .add(cert)
            .map_err(|e| tls_error(format!("Failed to add CA certificate: {}", e)))?;
    }

    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("Failed to set TLS versions: {}", e)))?
        .with_root_certificates(root_store);

    add_client_auth(builder, tls_config)
}

#[cfg(feature = "tls")]
fn add_client_auth(
    builder: rustls::ConfigBuilder<rustls::ClientConfig, rustls::client::WantsClientCert>,
    tls_config: &TlsConfig,
) -> Result<rustls::ClientConfig, Error> {
    use std::fs::File;
    use std::io::BufReader;

    let (Some(cert_path), Some(key_path)) =
        (&tls_config.client_cert_path, &tls_config.client_key_path)
    else {
        return Ok(builder.with_no_client_auth());
    };

    let certs = load_certs(cert_path, "client certificate")?;

    let key_file = File::open(key_path).map_err(|e| {
        tls_error(format!(
            "Failed to open client key '{}': {}",
            key_path.display(),
            e
        ))
    })?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| tls_error(format!("Failed to parse client key: {}", e)))?
        .ok_or_else(|| tls_error(format!("No private key found in '{}'", key_path.display())))?;

    builder
        .with_client_auth_cert(certs, key)
        .map_err(|e| tls_error(format!("Failed to configure client auth: {}", e)))
}

/// TLS connection wrapper (placeholder when `tls` feature is disabled).
#[cfg(not(feature = "tls"))]
#[derive(Debug)]
pub struct TlsStream<S> {
    #[allow(dead_code)]
    inner: S,
}

#[cfg(not(feature = "tls"))]
impl<S> TlsStream<S> {
    /// Always fails: the crate was built without the `tls` feature.
    #[allow(unused_variables)]
    pub fn new(stream: S, tls_config: &TlsConfig, server_name: &str) -> Result<Self, Error> {
        Err(tls_error(
            "TLS support requires the 'tls' feature. \
             Add `dmwire = { features = [\"tls\"] }` to your Cargo.toml.",
        ))
    }
}
