//! Session negotiation (code 200).
//!
//! The client announces its compression, encryption and result format
//! preferences and, when encryption is on, its DH public key. The reply
//! fixes the server charset, the TLS policy, the compression settings,
//! the frame integrity scheme and the cipher.

use dmwire_core::Result;

use crate::config::CompressionMode;
use crate::crypto::{cipher_id, hash_id};
use crate::tls::ServerTlsPolicy;
use crate::version::{FeatureSet, MIN_SERVER_VERSION, ServerVersion};

use super::message::{MessageContext, Request, Response, protocol_error, read_string};
use super::{
    ByteBuffer, CLIENT_VERSION, Charset, CompressionId, HeaderVariant, MessageCode, header,
};

/// Message version this client speaks.
pub const CLIENT_MSG_VERSION: u16 = 2;

/// Block-format flag value in handshake, prepare and execute headers.
pub const BLOCK_FORMAT_ON: u8 = 2;

mod offset {
    use super::header::FIELDS;

    pub const ZERO: usize = FIELDS;
    pub const COMPRESSION: usize = FIELDS + 4;
    pub const ENCRYPT: usize = FIELDS + 8;
    pub const ENCRYPT_MODE: usize = FIELDS + 9;
    pub const BLOCK_FORMAT: usize = FIELDS + 10;
    pub const COMPRESSION_ID: usize = FIELDS + 11;
    pub const CERTIFICATE: usize = FIELDS + 12;
    pub const RESERVED: usize = FIELDS + 13;
    pub const ONE: usize = FIELDS + 14;
    pub const MSG_VERSION: usize = FIELDS + 15;

    pub const R_SSL: usize = FIELDS;
    pub const R_SERIES: usize = FIELDS + 4;
    pub const R_ENCODING: usize = FIELDS + 8;
    pub const R_COMPRESSION: usize = FIELDS + 12;
    pub const R_HAS_PUBKEY: usize = FIELDS + 20;
    pub const R_CIPHER_INFO: usize = FIELDS + 21;
    pub const R_BLOCK_FORMAT: usize = FIELDS + 22;
    pub const R_COMPRESSION_ID: usize = FIELDS + 23;
    pub const R_CRC: usize = FIELDS + 25;
    pub const R_NEW_CLIENT_TYPE: usize = FIELDS + 27;
    pub const R_MSG_VERSION: usize = FIELDS + 28;
}

#[derive(Debug, Clone, Default)]
pub struct HandshakeRequest {
    pub compression: CompressionMode,
    pub compression_id: CompressionId,
    pub block_format: bool,
    /// Client DH public key; present when encryption is requested
    pub dh_public: Option<Vec<u8>>,
}

/// Everything the handshake reply negotiates.
#[derive(Debug, Clone)]
pub struct HandshakeInfo {
    pub tls: ServerTlsPolicy,
    pub server_series: i32,
    pub charset: Charset,
    pub compression: CompressionMode,
    pub compression_id: CompressionId,
    pub block_format: bool,
    pub header_variant: HeaderVariant,
    pub new_client_type: bool,
    pub msg_version: u16,
    pub server_version: ServerVersion,
    pub features: FeatureSet,
    pub cipher_id: i32,
    pub hash_id: i32,
    pub server_public_key: Option<Vec<u8>>,
    /// Only the login credentials are encrypted
    pub login_encryption: bool,
    /// Every frame body after the handshake is encrypted
    pub stream_encryption: bool,
}

impl Request for HandshakeRequest {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::Handshake
    }

    fn write_header(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<()> {
        let encrypt = self.dh_public.is_some();
        frame.put_i32_at(offset::ZERO, 0)?;
        frame.put_i32_at(offset::COMPRESSION, self.compression.to_wire())?;
        frame.put_u8_at(offset::ENCRYPT, u8::from(encrypt))?;
        frame.put_u8_at(offset::ENCRYPT_MODE, if encrypt { 2 } else { 0 })?;
        frame.put_u8_at(
            offset::BLOCK_FORMAT,
            if self.block_format { BLOCK_FORMAT_ON } else { 0 },
        )?;
        frame.put_u8_at(offset::COMPRESSION_ID, self.compression_id.to_wire())?;
        frame.put_u8_at(offset::CERTIFICATE, 0)?;
        frame.put_u8_at(offset::RESERVED, 0)?;
        frame.put_u8_at(offset::ONE, 1)?;
        frame.put_u16_at(offset::MSG_VERSION, CLIENT_MSG_VERSION)?;
        Ok(())
    }

    fn write_body(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<()> {
        frame.write_i32_bytes(CLIENT_VERSION.as_bytes())?;
        frame.write_u8(0);
        if let Some(key) = &self.dh_public {
            frame.write_i32_bytes(key)?;
        }
        Ok(())
    }

    fn read_response(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<Response> {
        let charset = Charset::from_server_code(frame.get_i32_at(offset::R_ENCODING)?);
        let compression_id = CompressionId::from_wire(frame.get_u8_at(offset::R_COMPRESSION_ID)?)
            .ok_or_else(|| protocol_error("server chose an unknown compression id"))?;
        let has_pubkey = frame.get_u8_at(offset::R_HAS_PUBKEY)?;
        let cipher_info = frame.get_u8_at(offset::R_CIPHER_INFO)?;

        let version_text = read_string(frame, charset)?;
        let server_version = ServerVersion::parse(&version_text)?;
        if server_version < MIN_SERVER_VERSION {
            return Err(protocol_error(format!(
                "server version {} is older than the supported minimum {}",
                server_version, MIN_SERVER_VERSION
            )));
        }

        let cipher = if cipher_info > 0 {
            frame.read_i32()?
        } else {
            cipher_id::UNSPECIFIED
        };
        let server_public_key = if has_pubkey > 0 {
            Some(frame.read_i32_bytes()?.to_vec())
        } else {
            None
        };
        let hash = if cipher_info == 2 {
            frame.read_i32()?
        } else {
            hash_id::UNSPECIFIED
        };
        let keyed = server_public_key.is_some();

        let info = HandshakeInfo {
            tls: ServerTlsPolicy::from_wire(frame.get_i32_at(offset::R_SSL)?),
            server_series: frame.get_i32_at(offset::R_SERIES)?,
            charset,
            compression: CompressionMode::from_wire(frame.get_i32_at(offset::R_COMPRESSION)?),
            compression_id,
            block_format: frame.get_u8_at(offset::R_BLOCK_FORMAT)? > 0,
            header_variant: if frame.get_u8_at(offset::R_CRC)? == 1 {
                HeaderVariant::Crc32
            } else {
                HeaderVariant::LegacyXor
            },
            new_client_type: frame.get_u8_at(offset::R_NEW_CLIENT_TYPE)? == 1,
            msg_version: frame.get_u16_at(offset::R_MSG_VERSION)?,
            server_version,
            features: FeatureSet::for_version(server_version),
            cipher_id: cipher,
            hash_id: hash,
            server_public_key,
            login_encryption: keyed && cipher == cipher_id::UNSPECIFIED,
            stream_encryption: keyed && cipher != cipher_id::UNSPECIFIED,
        };
        tracing::debug!(
            server_version = %info.server_version,
            charset = info.charset.name(),
            compression = ?info.compression,
            header = ?info.header_variant,
            cipher = info.cipher_id,
            "handshake negotiated"
        );
        Ok(Response::Handshake(info))
    }
}
