//! DM wire protocol implementation.
//!
//! Every message is a 64-byte header followed by a body:
//!
//! | bytes   | field                                  |
//! |---------|----------------------------------------|
//! | 0..4    | statement id (i32)                     |
//! | 4..6    | message code (i16)                     |
//! | 6..10   | body length (i32)                      |
//! | 10..14  | server return code (responses)         |
//! | 18      | compressed flag                        |
//! | 19      | legacy XOR checksum of bytes 0..19     |
//! | 20..64  | message-specific fields                |
//!
//! All integers are little-endian. Connections negotiated with the CRC
//! header variant append a CRC32 trailer covering header and body.

pub mod buffer;
pub mod checksum;
pub mod codec;
pub mod compress;
pub mod execute;
pub mod handshake;
pub mod lob;
pub mod login;
pub mod message;
pub mod segment;
pub mod session;
pub mod statement;

pub use buffer::ByteBuffer;
pub use checksum::ChecksumTable;
pub use codec::Charset;
pub use compress::CompressionId;
pub use message::{Message, MessageState, Response};
pub use segment::SegmentedStream;

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 64;

/// Largest frame (header plus body) the protocol allows.
pub const MAX_FRAME_LEN: usize = 0x2000_0000;

/// Size of the CRC32 trailer in the CRC header variant.
pub const CRC_LEN: usize = 4;

/// Header field offsets.
pub mod header {
    pub const STMT_ID: usize = 0;
    pub const CODE: usize = 4;
    pub const BODY_LEN: usize = 6;
    pub const RET_CODE: usize = 10;
    pub const COMPRESSED: usize = 18;
    pub const CHECKSUM: usize = 19;
    /// First message-specific field.
    pub const FIELDS: usize = 20;
}

/// Client protocol version sent in the handshake.
pub const CLIENT_VERSION: &str = "7.6.0.0";

/// Bodies larger than this are compressed in conditional mode.
pub const COMPRESS_THRESHOLD: usize = 8192;

/// Maximum length of an encoded user name or password.
pub const MAX_CREDENTIAL_LEN: usize = 128;

/// Chunk size for off-row parameter data and LOB writes.
pub const LOB_WRITE_CHUNK: usize = 16_000;

/// Maximum bytes requested per binary LOB read.
pub const LOB_READ_BYTES: usize = 32_000;

/// Maximum characters requested per text LOB read.
pub const LOB_READ_CHARS: usize = 16_000;

/// Largest value inlined in an execute request.
pub const MAX_INLINE_LEN: usize = 0xFFFF;

/// Server return codes with special meaning.
pub mod ret_code {
    /// Fetch asked for more rows than the server's rowset size; benign.
    pub const ROWSET_EXCEEDED: i32 = -7036;
    /// Batch finished but some rows failed; a row-error list follows.
    /// Positive, so the response is parsed rather than rejected.
    pub const BATCH_WITH_ERROR: i32 = 6604;
}

/// Statement kinds reported in prepare/execute responses.
#[allow(dead_code)]
pub mod ret_type {
    pub const DDL: i16 = 147;
    pub const EXPLAIN: i16 = 149;
    pub const SET_SCHEMA: i16 = 153;
    pub const INSERT: i16 = 157;
    pub const DELETE: i16 = 158;
    pub const UPDATE: i16 = 159;
    pub const SELECT: i16 = 160;
    pub const PROCEDURE: i16 = 162;
    pub const SET_TIMEZONE: i16 = 165;
    pub const SET_ISOLATION: i16 = 166;
    pub const SELECT_FOR_UPDATE: i16 = 198;
    pub const DATE_FORMAT: i16 = 251;
    pub const TIME_FORMAT: i16 = 252;
    pub const TIMESTAMP_FORMAT: i16 = 253;
    pub const TIME_TZ_FORMAT: i16 = 254;
    pub const TIMESTAMP_TZ_FORMAT: i16 = 255;
    pub const DATE_LANGUAGE: i16 = 256;

    pub fn is_dml(kind: i16) -> bool {
        matches!(kind, INSERT | DELETE | UPDATE)
    }

    pub fn is_query(kind: i16) -> bool {
        matches!(kind, SELECT | SELECT_FOR_UPDATE)
    }
}

/// Message codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum MessageCode {
    Login = 1,
    AllocStatement = 3,
    FreeStatement = 4,
    Prepare = 5,
    Execute = 6,
    Fetch = 7,
    Commit = 8,
    Rollback = 9,
    Execute2 = 13,
    PutData = 14,
    SetCursorName = 27,
    LobLength = 29,
    LobWrite = 30,
    LobTruncate = 31,
    LobRead = 32,
    MoreResults = 44,
    SetIsolation = 52,
    TableTimestamps = 71,
    PreExecute = 90,
    ExecOpt = 91,
    Handshake = 200,
}

impl MessageCode {
    /// Decode a code from the header.
    pub fn from_i16(code: i16) -> Option<Self> {
        let code = match code {
            1 => MessageCode::Login,
            3 => MessageCode::AllocStatement,
            4 => MessageCode::FreeStatement,
            5 => MessageCode::Prepare,
            6 => MessageCode::Execute,
            7 => MessageCode::Fetch,
            8 => MessageCode::Commit,
            9 => MessageCode::Rollback,
            13 => MessageCode::Execute2,
            14 => MessageCode::PutData,
            27 => MessageCode::SetCursorName,
            29 => MessageCode::LobLength,
            30 => MessageCode::LobWrite,
            31 => MessageCode::LobTruncate,
            32 => MessageCode::LobRead,
            44 => MessageCode::MoreResults,
            52 => MessageCode::SetIsolation,
            71 => MessageCode::TableTimestamps,
            90 => MessageCode::PreExecute,
            91 => MessageCode::ExecOpt,
            200 => MessageCode::Handshake,
            _ => return None,
        };
        Some(code)
    }

    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

/// Frame integrity scheme negotiated in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderVariant {
    /// XOR of header bytes 0..19 stored at byte 19.
    #[default]
    LegacyXor,
    /// CRC32 trailer over header and body.
    Crc32,
}
