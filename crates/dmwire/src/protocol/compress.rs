//! Body compression (zlib or snappy).

use std::io::{Read, Write};

use dmwire_core::{Error, ProtocolError, Result};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};

/// Compression algorithm id exchanged in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionId {
    #[default]
    Zlib,
    Snappy,
}

impl CompressionId {
    pub fn from_wire(id: u8) -> Option<Self> {
        match id {
            0 => Some(CompressionId::Zlib),
            1 => Some(CompressionId::Snappy),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            CompressionId::Zlib => 0,
            CompressionId::Snappy => 1,
        }
    }
}

fn compression_error(
    message: impl Into<String>,
    source: impl std::error::Error + Send + Sync + 'static,
) -> Error {
    Error::Protocol(ProtocolError {
        message: message.into(),
        raw_data: None,
        source: Some(Box::new(source)),
    })
}

pub fn compress(id: CompressionId, data: &[u8]) -> Result<Vec<u8>> {
    match id {
        CompressionId::Zlib => {
            let mut encoder =
                ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| compression_error("zlib compression failed", e))?;
            encoder
                .finish()
                .map_err(|e| compression_error("zlib compression failed", e))
        }
        CompressionId::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| compression_error("snappy compression failed", e)),
    }
}

/// Inflate `data`; `size_hint` is the length announced by the sender.
pub fn decompress(id: CompressionId, data: &[u8], size_hint: usize) -> Result<Vec<u8>> {
    match id {
        CompressionId::Zlib => {
            let mut out = Vec::with_capacity(size_hint);
            ZlibDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| compression_error("zlib decompression failed", e))?;
            Ok(out)
        }
        CompressionId::Snappy => snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| compression_error("snappy decompression failed", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        b"SELECT * FROM SYSOBJECTS WHERE NAME = ?; "
            .iter()
            .cycle()
            .take(20_000)
            .copied()
            .collect()
    }

    #[test]
    fn test_zlib_restores_input() {
        let data = sample();
        let packed = compress(CompressionId::Zlib, &data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(
            decompress(CompressionId::Zlib, &packed, data.len()).unwrap(),
            data
        );
    }

    #[test]
    fn test_snappy_restores_input() {
        let data = sample();
        let packed = compress(CompressionId::Snappy, &data).unwrap();
        assert_eq!(
            decompress(CompressionId::Snappy, &packed, data.len()).unwrap(),
            data
        );
    }

    #[test]
    fn test_empty_input() {
        for id in [CompressionId::Zlib, CompressionId::Snappy] {
            let packed = compress(id, &[]).unwrap();
            assert!(decompress(id, &packed, 0).unwrap().is_empty());
        }
    }

    #[test]
    fn test_garbage_is_protocol_error() {
        let err = decompress(CompressionId::Zlib, &[1, 2, 3, 4], 10).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_wire_ids() {
        assert_eq!(CompressionId::from_wire(1), Some(CompressionId::Snappy));
        assert_eq!(CompressionId::from_wire(7), None);
    }
}
