//! Client driver for the DM database wire protocol.
//!
//! This crate speaks the DM protocol directly over TCP. It provides:
//!
//! - Frame encoding with optional checksums, compression and session ciphers
//! - Handshake negotiation, including TLS and Diffie-Hellman key agreement
//! - Login and session attribute tracking
//! - Prepared and direct statements, batches and off-row parameter data
//! - Result paging, multiple result sets and a connection-level result cache
//! - Chunked BLOB and CLOB access through server locators
//!
//! # Protocol Overview
//!
//! Every message is a 64-byte header followed by a body. The header
//! carries the statement handle, the message code, the body length and a
//! return code; the rest of it holds per-message fields. Requests and
//! replies alternate strictly on one socket.
//!
//! # Example
//!
//! ```rust,ignore
//! use dmwire::{Config, Connection};
//!
//! let config = Config::new()
//!     .host("localhost")
//!     .port(5236)
//!     .user("SYSDBA")
//!     .password("secret");
//!
//! let mut conn = Connection::connect(config)?;
//! let rows = conn.query("SELECT NAME FROM SYSOBJECTS")?;
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod lob;
pub mod pool;
pub mod protocol;
pub mod resultset;
pub mod statement;
pub mod tls;
pub mod transport;
pub mod types;
pub mod version;

pub use config::{CompressionMode, Config, IsolationLevel, SslMode, TlsConfig};
pub use connection::{CancelToken, Connection, ConnectionState, SessionInfo, connect};
pub use dmwire_core::{
    BatchError, BatchFailure, ColumnInfo, Error, Result, Row, ServerError, TransportErrorKind,
    Value,
};
pub use lob::{Lob, LobKind};
pub use resultset::ResultSet;
pub use statement::{Execution, Statement};
pub use types::{Column, ParamIo, Parameter};
pub use version::ServerVersion;
