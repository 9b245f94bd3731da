//! Fixed-width numeric decoding and charset transcoding.

use std::borrow::Cow;

use dmwire_core::{EncodingError, Error, Result};
use encoding_rs::{EUC_KR, Encoding, GB18030, UTF_8};
use serde::{Deserialize, Serialize};

/// Server character sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Charset {
    Utf8,
    #[default]
    Gb18030,
    EucKr,
}

impl Charset {
    /// Map the handshake encoding code; unknown codes mean GB18030.
    pub fn from_server_code(code: i32) -> Self {
        match code {
            1 => Charset::Utf8,
            2 => Charset::EucKr,
            _ => Charset::Gb18030,
        }
    }

    pub fn server_code(self) -> i32 {
        match self {
            Charset::Utf8 => 1,
            Charset::EucKr => 2,
            Charset::Gb18030 => 0,
        }
    }

    pub fn name(self) -> &'static str {
        self.encoding().name()
    }

    fn encoding(self) -> &'static Encoding {
        match self {
            Charset::Utf8 => UTF_8,
            Charset::Gb18030 => GB18030,
            Charset::EucKr => EUC_KR,
        }
    }

    /// Encode text, failing on characters the charset cannot represent.
    pub fn encode<'a>(self, text: &'a str) -> Result<Cow<'a, [u8]>> {
        if self == Charset::Utf8 {
            return Ok(Cow::Borrowed(text.as_bytes()));
        }
        let (bytes, _, had_errors) = self.encoding().encode(text);
        if had_errors {
            return Err(Error::Encoding(EncodingError {
                charset: self.name(),
                message: "text contains unmappable characters".to_string(),
            }));
        }
        Ok(bytes)
    }

    /// Decode bytes, failing on malformed sequences.
    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        self.encoding()
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(Cow::into_owned)
            .ok_or_else(|| {
                Error::Encoding(EncodingError {
                    charset: self.name(),
                    message: format!("malformed {}-byte sequence", bytes.len()),
                })
            })
    }
}

fn array<const N: usize>(bytes: &[u8], offset: usize) -> Option<[u8; N]> {
    bytes.get(offset..offset + N)?.try_into().ok()
}

pub fn i16_at(bytes: &[u8], offset: usize) -> Option<i16> {
    array(bytes, offset).map(i16::from_le_bytes)
}

pub fn i32_at(bytes: &[u8], offset: usize) -> Option<i32> {
    array(bytes, offset).map(i32::from_le_bytes)
}

pub fn u32_at(bytes: &[u8], offset: usize) -> Option<u32> {
    array(bytes, offset).map(u32::from_le_bytes)
}

pub fn i64_at(bytes: &[u8], offset: usize) -> Option<i64> {
    array(bytes, offset).map(i64::from_le_bytes)
}

pub fn u64_at(bytes: &[u8], offset: usize) -> Option<u64> {
    array(bytes, offset).map(u64::from_le_bytes)
}

pub fn f32_at(bytes: &[u8], offset: usize) -> Option<f32> {
    array(bytes, offset).map(f32::from_le_bytes)
}

pub fn f64_at(bytes: &[u8], offset: usize) -> Option<f64> {
    array(bytes, offset).map(f64::from_le_bytes)
}
