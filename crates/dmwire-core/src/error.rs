//! Error types for dmwire operations.

use std::fmt;

/// The primary error type for all driver operations.
#[derive(Debug)]
pub enum Error {
    /// Socket or TLS failures (connect, disconnect, timeout, cancel)
    Transport(TransportError),
    /// Frame checksum did not verify
    ChecksumMismatch(ChecksumError),
    /// Negative return code reported by the server
    Server(ServerError),
    /// Malformed or unexpected wire data
    Protocol(ProtocolError),
    /// Charset transcoding failure
    Encoding(EncodingError),
    /// Batch finished with per-row failures
    Batch(BatchError),
    /// Value conversion errors
    Type(TypeError),
    /// Connection is closed or broken
    ConnectionClosed,
    /// Configuration errors
    Config(ConfigError),
    /// Buffer cursor errors
    Buffer(BufferError),
    /// I/O errors
    Io(std::io::Error),
}

#[derive(Debug)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Failed to establish the TCP session
    Connect,
    /// Connection refused by the peer
    Refused,
    /// Connection lost during operation
    Disconnected,
    /// TLS negotiation or record failure
    Tls,
    /// Socket read/write timed out
    Timeout,
    /// Cancelled between round trips
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumError {
    pub expected: u32,
    pub actual: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: i32,
    pub message: String,
    pub sql: Option<String>,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingError {
    pub charset: &'static str,
    pub message: String,
}

/// One failed row inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// 1-based row number within the batch
    pub row: usize,
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError {
    /// Per-row update counts; failed rows carry -1 or -3
    pub update_counts: Vec<i64>,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// Read past the written length
    Underrun { needed: usize, available: usize },
    /// Write or seek past the addressable range
    Overflow { requested: usize, limit: usize },
}

impl Error {
    /// Does this error leave the connection unusable?
    ///
    /// The connection moves to `Broken` when a call fails with a fatal error.
    /// A buffer underrun means a reply was shorter than its own framing
    /// claims, so it counts as a protocol violation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::ChecksumMismatch(_)
                | Error::Protocol(_)
                | Error::Io(_)
                | Error::Buffer(BufferError::Underrun { .. })
        )
    }

    /// Is this a retryable error (timeouts, lost connections)?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(t) => matches!(
                t.kind,
                TransportErrorKind::Timeout | TransportErrorKind::Disconnected
            ),
            _ => false,
        }
    }

    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        self.is_fatal() || matches!(self, Error::ConnectionClosed)
    }

    /// Server error code, if the server reported one.
    pub fn server_code(&self) -> Option<i32> {
        match self {
            Error::Server(s) => Some(s.code),
            _ => None,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Server(s) => s.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "Transport error: {}", e.message),
            Error::ChecksumMismatch(e) => write!(f, "Checksum mismatch: {}", e),
            Error::Server(e) => write!(f, "Server error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Encoding(e) => write!(f, "Encoding error: {}", e),
            Error::Batch(e) => write!(f, "Batch error: {}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::ConnectionClosed => write!(f, "Connection is closed"),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Buffer(e) => write!(f, "Buffer error: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ChecksumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expected {:#010x}, computed {:#010x}",
            self.expected, self.actual
        )
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[CODE:{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.charset)
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} rows failed",
            self.failures.len(),
            self.update_counts.len()
        )?;
        for failure in &self.failures {
            write!(
                f,
                "\n  row {}: [CODE:{}] {}",
                failure.row, failure.code, failure.message
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::Underrun { needed, available } => write!(
                f,
                "buffer underrun: needed {} bytes, {} available",
                needed, available
            ),
            BufferError::Overflow { requested, limit } => write!(
                f,
                "buffer overflow: requested {} bytes, limit {}",
                requested, limit
            ),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Transport(err)
    }
}

impl From<ChecksumError> for Error {
    fn from(err: ChecksumError) -> Self {
        Error::ChecksumMismatch(err)
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<EncodingError> for Error {
    fn from(err: EncodingError) -> Self {
        Error::Encoding(err)
    }
}

impl From<BatchError> for Error {
    fn from(err: BatchError) -> Self {
        Error::Batch(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<BufferError> for Error {
    fn from(err: BufferError) -> Self {
        Error::Buffer(err)
    }
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, Error>;
