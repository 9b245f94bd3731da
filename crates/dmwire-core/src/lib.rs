//! Core types for the dmwire driver.
//!
//! - `Error` and its per-kind structs, with fatality classification
//! - `Value` for dynamically-typed parameters and columns
//! - `Row` and the shared `ColumnInfo`

pub mod error;
pub mod row;
pub mod value;

pub use error::{
    BatchError, BatchFailure, BufferError, ChecksumError, ConfigError, EncodingError, Error,
    ProtocolError, Result, ServerError, TransportError, TransportErrorKind, TypeError,
};
pub use row::{ColumnInfo, Row};
pub use value::Value;
