//! Connection configuration.
//!
//! `Config` is an immutable description of how to reach and talk to a
//! server. It derives serde so that external loaders can build it from
//! files or environment; parsing connection strings is left to callers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dmwire_core::{ConfigError, Error, Result};
use serde::{Deserialize, Serialize};

use crate::crypto::ExternalCipherProvider;
use crate::protocol::CompressionId;

/// TLS policy requested by the client.
///
/// The server announces its own policy in the handshake; this mode
/// decides how the client reacts to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    /// Never negotiate TLS; fail if the server insists on it
    Off,
    /// Require TLS; fail if the server does not offer it
    Force,
    /// Follow whatever the server announces
    #[default]
    Prefer,
}

impl SslMode {
    /// Check if TLS may be negotiated.
    pub const fn should_try_ssl(self) -> bool {
        !matches!(self, SslMode::Off)
    }

    /// Check if TLS is required.
    pub const fn is_required(self) -> bool {
        matches!(self, SslMode::Force)
    }
}

/// When outgoing bodies are compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    #[default]
    Off,
    Always,
    /// Only bodies above the threshold sent to a non-local peer
    Conditional,
}

impl CompressionMode {
    pub fn from_wire(code: i32) -> Self {
        match code {
            1 => CompressionMode::Always,
            2 => CompressionMode::Conditional,
            _ => CompressionMode::Off,
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            CompressionMode::Off => 0,
            CompressionMode::Always => 1,
            CompressionMode::Conditional => 2,
        }
    }
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn to_wire(self) -> i32 {
        match self {
            IsolationLevel::ReadUncommitted => 0,
            IsolationLevel::ReadCommitted => 1,
            IsolationLevel::RepeatableRead => 2,
            IsolationLevel::Serializable => 3,
        }
    }

    pub fn from_wire(code: i32) -> Option<Self> {
        match code {
            0 => Some(IsolationLevel::ReadUncommitted),
            1 => Some(IsolationLevel::ReadCommitted),
            2 => Some(IsolationLevel::RepeatableRead),
            3 => Some(IsolationLevel::Serializable),
            _ => None,
        }
    }
}

/// Certificates and verification options for TLS.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM bundle of trusted CAs; webpki roots are used when unset
    pub ca_cert_path: Option<PathBuf>,
    /// Client certificate for mutual TLS
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    /// Accept any server certificate
    pub danger_skip_verify: bool,
    /// SNI / verification name, defaults to the host
    pub server_name: Option<String>,
}

impl TlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn client_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_cert_path = Some(path.into());
        self
    }

    pub fn client_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_key_path = Some(path.into());
        self
    }

    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.danger_skip_verify = skip;
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub app_name: String,

    pub ssl_mode: SslMode,
    pub tls: TlsConfig,

    pub compression_mode: CompressionMode,
    pub compression_id: CompressionId,

    /// Negotiate a session key and encrypt the login credentials
    pub encryption_enabled: bool,
    /// Location handed to third-party cipher providers
    pub cipher_path: String,
    #[serde(skip)]
    pub cipher_provider: Option<Arc<dyn ExternalCipherProvider>>,

    /// Ask the server for the block (columnar) row format
    pub block_format: bool,
    pub row_prefetch: i32,
    /// Bytes the server may buffer ahead of a fetch
    pub buffer_prefetch: i32,
    pub max_rows: i64,

    pub statement_pool_size: usize,
    /// Byte budget of the result cache; zero disables it
    pub result_cache_size: usize,
    /// How long a cache hit is trusted before revalidation; zero trusts forever
    pub result_cache_refresh: Duration,

    /// 1 groups rows into one request, 2 executes row by row
    pub batch_type: i32,
    pub continue_batch_on_error: bool,
    pub batch_allow_max_errors: i32,
    /// Execute procedure batches row by row
    pub batch_not_on_call: bool,

    pub autocommit: bool,
    /// Permit commit/rollback while in autocommit mode
    pub always_allow_commit: bool,
    pub isolation: IsolationLevel,
    pub read_only: bool,
    /// Session time zone in minutes east of UTC
    pub time_zone: i16,
    pub schema: Option<String>,

    pub connect_timeout: Duration,
    /// Read/write timeout on the socket; `None` blocks indefinitely
    pub socket_timeout: Option<Duration>,
    /// Server-side session idle timeout in seconds; zero means none
    pub session_timeout: i32,
    /// Per-statement timeout in seconds; zero means none
    pub query_timeout: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5236,
            user: "SYSDBA".to_string(),
            password: String::new(),
            app_name: String::new(),
            ssl_mode: SslMode::default(),
            tls: TlsConfig::default(),
            compression_mode: CompressionMode::Off,
            compression_id: CompressionId::Zlib,
            encryption_enabled: true,
            cipher_path: String::new(),
            cipher_provider: None,
            block_format: false,
            row_prefetch: 10,
            buffer_prefetch: 0,
            max_rows: 0,
            statement_pool_size: 15,
            result_cache_size: 20 * 1024 * 1024,
            result_cache_refresh: Duration::from_secs(10),
            batch_type: 1,
            continue_batch_on_error: false,
            batch_allow_max_errors: 0,
            batch_not_on_call: false,
            autocommit: true,
            always_allow_commit: false,
            isolation: IsolationLevel::ReadCommitted,
            read_only: false,
            time_zone: 480,
            schema: None,
            connect_timeout: Duration::from_secs(30),
            socket_timeout: None,
            session_timeout: 0,
            query_timeout: 0,
        }
    }
}

fn config_error(message: impl Into<String>) -> Error {
    Error::Config(ConfigError {
        message: message.into(),
        source: None,
    })
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    pub fn tls_config(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn compression(mut self, mode: CompressionMode, id: CompressionId) -> Self {
        self.compression_mode = mode;
        self.compression_id = id;
        self
    }

    pub fn encryption(mut self, enabled: bool) -> Self {
        self.encryption_enabled = enabled;
        self
    }

    /// Register a provider for cipher ids above the built-in range.
    pub fn cipher_provider(
        mut self,
        path: impl Into<String>,
        provider: Arc<dyn ExternalCipherProvider>,
    ) -> Self {
        self.cipher_path = path.into();
        self.cipher_provider = Some(provider);
        self
    }

    pub fn block_format(mut self, enabled: bool) -> Self {
        self.block_format = enabled;
        self
    }

    pub fn row_prefetch(mut self, rows: i32) -> Self {
        self.row_prefetch = rows;
        self
    }

    pub fn max_rows(mut self, rows: i64) -> Self {
        self.max_rows = rows;
        self
    }

    pub fn statement_pool_size(mut self, size: usize) -> Self {
        self.statement_pool_size = size;
        self
    }

    pub fn result_cache(mut self, size: usize, refresh: Duration) -> Self {
        self.result_cache_size = size;
        self.result_cache_refresh = refresh;
        self
    }

    pub fn batch_type(mut self, batch_type: i32) -> Self {
        self.batch_type = batch_type;
        self
    }

    pub fn continue_batch_on_error(mut self, enabled: bool) -> Self {
        self.continue_batch_on_error = enabled;
        self
    }

    pub fn autocommit(mut self, enabled: bool) -> Self {
        self.autocommit = enabled;
        self
    }

    pub fn always_allow_commit(mut self, enabled: bool) -> Self {
        self.always_allow_commit = enabled;
        self
    }

    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = level;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn time_zone(mut self, minutes: i16) -> Self {
        self.time_zone = minutes;
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    pub fn query_timeout(mut self, seconds: i32) -> Self {
        self.query_timeout = seconds;
        self
    }

    /// Get the socket address string for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn result_cache_enabled(&self) -> bool {
        self.result_cache_size > 0
    }

    /// Reject inconsistent combinations before any I/O happens.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(config_error("host must not be empty"));
        }
        if self.port == 0 {
            return Err(config_error("port must not be zero"));
        }
        if self.user.is_empty() {
            return Err(config_error("user must not be empty"));
        }
        if !matches!(self.batch_type, 1 | 2) {
            return Err(config_error(format!(
                "batch_type must be 1 or 2, got {}",
                self.batch_type
            )));
        }
        if self.row_prefetch <= 0 {
            return Err(config_error("row_prefetch must be positive"));
        }
        if self.buffer_prefetch < 0 {
            return Err(config_error("buffer_prefetch must not be negative"));
        }
        if !self.cipher_path.is_empty() && self.cipher_provider.is_none() {
            return Err(config_error(
                "cipher_path is set but no external cipher provider is registered",
            ));
        }
        if self.cipher_provider.is_some() && !self.encryption_enabled {
            return Err(config_error(
                "an external cipher provider requires encryption_enabled",
            ));
        }
        if self.tls.client_cert_path.is_some() != self.tls.client_key_path.is_some() {
            return Err(config_error(
                "client certificate and client key must be set together",
            ));
        }
        if self.ssl_mode.is_required() && !cfg!(feature = "tls") {
            return Err(config_error(
                "ssl_mode=force requires the 'tls' feature",
            ));
        }
        Ok(())
    }
}
