//! Socket ownership and frame encoding.
//!
//! Outgoing frames are built in a `ByteBuffer` whose first `HEADER_LEN`
//! bytes are the header. [`encode_frame`] turns such a buffer into wire
//! bytes (compress, encrypt, patch length, checksum) and
//! [`decode_frame`] reverses it for a frame read from any `Read`.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use dmwire_core::{
    ChecksumError, Error, ProtocolError, Result, TransportError, TransportErrorKind,
};

use crate::config::{CompressionMode, Config, TlsConfig};
use crate::crypto::Cipher;
use crate::protocol::checksum::header_xor;
use crate::protocol::compress::{compress, decompress};
use crate::protocol::{
    ByteBuffer, COMPRESS_THRESHOLD, CRC_LEN, ChecksumTable, CompressionId, HEADER_LEN,
    HeaderVariant, MAX_FRAME_LEN, MessageCode, header,
};
use crate::tls::{ServerTlsPolicy, TlsStream};

/// Per-connection framing rules, fixed once the handshake completes.
#[derive(Debug, Clone, Default)]
pub struct FramePolicy {
    pub header: HeaderVariant,
    pub compression: CompressionMode,
    pub compression_id: CompressionId,
    /// Session cipher applied to whole bodies
    pub cipher: Option<Arc<dyn Cipher>>,
    pub peer_is_local: bool,
}

impl FramePolicy {
    fn should_compress(&self, code: i16, body_len: usize) -> bool {
        if body_len == 0 || code == MessageCode::Handshake.as_i16() {
            return false;
        }
        match self.compression {
            CompressionMode::Off => false,
            CompressionMode::Always => true,
            CompressionMode::Conditional => !self.peer_is_local && body_len > COMPRESS_THRESHOLD,
        }
    }

    fn should_decompress(&self, frame: &ByteBuffer) -> Result<bool> {
        let code = frame.get_i16_at(header::CODE)?;
        if frame.len() == HEADER_LEN || code == MessageCode::Handshake.as_i16() {
            return Ok(false);
        }
        Ok(match self.compression {
            CompressionMode::Off => false,
            CompressionMode::Always => true,
            CompressionMode::Conditional => frame.get_u8_at(header::COMPRESSED)? == 1,
        })
    }

    fn cipher_for(&self, code: i16) -> Option<&Arc<dyn Cipher>> {
        if code == MessageCode::Handshake.as_i16() {
            None
        } else {
            self.cipher.as_ref()
        }
    }
}

fn protocol_error(message: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: message.into(),
        raw_data: None,
        source: None,
    })
}

fn io_error(context: &str, e: io::Error) -> Error {
    let kind = match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportErrorKind::Timeout,
        io::ErrorKind::ConnectionRefused => TransportErrorKind::Refused,
        _ => TransportErrorKind::Disconnected,
    };
    Error::Transport(TransportError {
        kind,
        message: format!("{}: {}", context, e),
        source: Some(Box::new(e)),
    })
}

/// Start a frame: a zeroed header carrying the code and statement id.
pub fn new_frame(code: MessageCode, stmt_id: i32) -> ByteBuffer {
    let mut frame = ByteBuffer::with_capacity(HEADER_LEN + 64);
    frame.resize(HEADER_LEN);
    let bytes = frame.as_mut_slice();
    bytes[header::STMT_ID..header::STMT_ID + 4].copy_from_slice(&stmt_id.to_le_bytes());
    bytes[header::CODE..header::CODE + 2].copy_from_slice(&code.as_i16().to_le_bytes());
    frame
}

/// Replace everything after the header with `body`.
fn replace_body(frame: &mut ByteBuffer, body: &[u8]) {
    frame.truncate(HEADER_LEN);
    frame.write_bytes(body);
}

/// Finish a frame in place so it can be written verbatim.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn encode_frame(policy: &FramePolicy, frame: &mut ByteBuffer) -> Result<()> {
    if frame.len() < HEADER_LEN {
        return Err(protocol_error("frame shorter than its header"));
    }
    let code = frame.get_i16_at(header::CODE)?;
    let body_len = frame.len() - HEADER_LEN;

    if policy.should_compress(code, body_len) {
        let packed = compress(policy.compression_id, &frame.as_slice()[HEADER_LEN..])?;
        frame.truncate(HEADER_LEN);
        frame.write_u32(body_len as u32);
        frame.write_bytes(&packed);
        frame.put_u8_at(header::COMPRESSED, 1)?;
    }

    if let Some(cipher) = policy.cipher_for(code) {
        if frame.len() > HEADER_LEN {
            let sealed = cipher.encrypt(&frame.as_slice()[HEADER_LEN..])?;
            replace_body(frame, &sealed);
        }
    }

    let mut wire_len = frame.len() - HEADER_LEN;
    if policy.header == HeaderVariant::Crc32 {
        wire_len += CRC_LEN;
    }
    if HEADER_LEN + wire_len > MAX_FRAME_LEN {
        return Err(protocol_error(format!(
            "frame of {} bytes exceeds the protocol limit",
            HEADER_LEN + wire_len
        )));
    }
    frame.put_i32_at(header::BODY_LEN, wire_len as i32)?;

    match policy.header {
        HeaderVariant::LegacyXor => {
            let xor = header_xor(frame.as_slice());
            frame.put_u8_at(header::CHECKSUM, xor)?;
        }
        HeaderVariant::Crc32 => {
            let crc = ChecksumTable::global().crc32(frame.as_slice(), 0, frame.len());
            frame.write_u32(crc);
        }
    }
    Ok(())
}

/// Read one frame, verify it, and undo encryption and compression.
///
/// The returned buffer is positioned at the start of the body and its
/// length field reflects the plain body.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub fn decode_frame<R: Read>(policy: &FramePolicy, reader: &mut R) -> Result<ByteBuffer> {
    let mut frame = ByteBuffer::with_capacity(HEADER_LEN);
    frame.resize(HEADER_LEN);
    reader
        .read_exact(frame.as_mut_slice())
        .map_err(|e| io_error("reading frame header", e))?;

    let declared = frame.get_i32_at(header::BODY_LEN)?;
    if declared < 0 || HEADER_LEN + declared as usize > MAX_FRAME_LEN {
        return Err(protocol_error(format!("invalid body length {}", declared)));
    }
    let declared = declared as usize;
    frame.resize(HEADER_LEN + declared);
    reader
        .read_exact(&mut frame.as_mut_slice()[HEADER_LEN..])
        .map_err(|e| io_error("reading frame body", e))?;

    match policy.header {
        HeaderVariant::Crc32 => {
            if declared < CRC_LEN {
                return Err(protocol_error("frame too short for its CRC trailer"));
            }
            let data_end = frame.len() - CRC_LEN;
            let expected = frame.get_u32_at(data_end)?;
            let actual = ChecksumTable::global().crc32(frame.as_slice(), 0, data_end);
            if expected != actual {
                return Err(Error::ChecksumMismatch(ChecksumError { expected, actual }));
            }
            frame.truncate(data_end);
        }
        HeaderVariant::LegacyXor => {
            let expected = frame.get_u8_at(header::CHECKSUM)?;
            let actual = header_xor(frame.as_slice());
            if expected != actual {
                return Err(Error::ChecksumMismatch(ChecksumError {
                    expected: u32::from(expected),
                    actual: u32::from(actual),
                }));
            }
        }
    }

    let code = frame.get_i16_at(header::CODE)?;
    if let Some(cipher) = policy.cipher_for(code) {
        if frame.len() > HEADER_LEN {
            let plain = cipher.decrypt(&frame.as_slice()[HEADER_LEN..])?;
            replace_body(&mut frame, &plain);
        }
    }

    if policy.should_decompress(&frame)? {
        let original = frame.get_u32_at(HEADER_LEN)? as usize;
        if original > MAX_FRAME_LEN {
            return Err(protocol_error(format!(
                "announced uncompressed size {} exceeds the protocol limit",
                original
            )));
        }
        let plain = decompress(
            policy.compression_id,
            &frame.as_slice()[HEADER_LEN + 4..],
            original,
        )?;
        if plain.len() != original {
            return Err(protocol_error(format!(
                "decompressed {} bytes, expected {}",
                plain.len(),
                original
            )));
        }
        replace_body(&mut frame, &plain);
        frame.put_u8_at(header::COMPRESSED, 0)?;
    }

    let body_len = frame.len() - HEADER_LEN;
    frame.put_i32_at(header::BODY_LEN, body_len as i32)?;
    frame.set_position(HEADER_LEN)?;
    Ok(frame)
}

enum Stream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<TlsStream<TcpStream>>),
    Closed,
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.read(buf),
            Stream::Closed => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.write(buf),
            Stream::Closed => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            #[cfg(feature = "tls")]
            Stream::Tls(s) => s.flush(),
            Stream::Closed => Ok(()),
        }
    }
}

/// Owns the socket and applies the frame policy to every exchange.
pub struct Transport {
    stream: Stream,
    policy: FramePolicy,
    peer: Option<SocketAddr>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stream = match &self.stream {
            Stream::Plain(_) => "plain",
            #[cfg(feature = "tls")]
            Stream::Tls(_) => "tls",
            Stream::Closed => "closed",
        };
        f.debug_struct("Transport")
            .field("stream", &stream)
            .field("peer", &self.peer)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Transport {
    /// Open a TCP session to the configured host.
    pub fn connect(config: &Config) -> Result<Self> {
        let addrs = config.socket_addr().to_socket_addrs().map_err(|e| {
            Error::Transport(TransportError {
                kind: TransportErrorKind::Connect,
                message: format!("Failed to resolve {}: {}", config.socket_addr(), e),
                source: Some(Box::new(e)),
            })
        })?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true).map_err(|e| io_error("set_nodelay", e))?;
                    stream
                        .set_read_timeout(config.socket_timeout)
                        .map_err(|e| io_error("set_read_timeout", e))?;
                    stream
                        .set_write_timeout(config.socket_timeout)
                        .map_err(|e| io_error("set_write_timeout", e))?;
                    tracing::debug!(%addr, "TCP connected");
                    return Ok(Self::from_stream(stream));
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(match last_error {
            Some(e) => {
                let kind = match e.kind() {
                    io::ErrorKind::ConnectionRefused => TransportErrorKind::Refused,
                    io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
                    _ => TransportErrorKind::Connect,
                };
                Error::Transport(TransportError {
                    kind,
                    message: format!("Failed to connect to {}: {}", config.socket_addr(), e),
                    source: Some(Box::new(e)),
                })
            }
            None => Error::Transport(TransportError {
                kind: TransportErrorKind::Connect,
                message: format!("{} resolved to no addresses", config.socket_addr()),
                source: None,
            }),
        })
    }

    /// Wrap an already connected socket.
    pub fn from_stream(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        let policy = FramePolicy {
            peer_is_local: peer.is_some_and(|a| a.ip().is_loopback()),
            ..FramePolicy::default()
        };
        Self {
            stream: Stream::Plain(stream),
            policy,
            peer,
        }
    }

    pub fn policy(&self) -> &FramePolicy {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut FramePolicy {
        &mut self.policy
    }

    pub fn is_tls(&self) -> bool {
        #[cfg(feature = "tls")]
        {
            matches!(self.stream, Stream::Tls(_))
        }
        #[cfg(not(feature = "tls"))]
        {
            false
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.stream, Stream::Closed)
    }

    /// Encode and write one frame.
    pub fn send(&mut self, frame: &mut ByteBuffer) -> Result<()> {
        encode_frame(&self.policy, frame)?;
        tracing::trace!(
            code = frame.get_i16_at(header::CODE)?,
            stmt_id = frame.get_i32_at(header::STMT_ID)?,
            len = frame.len(),
            "send frame"
        );
        self.stream
            .write_all(frame.as_slice())
            .and_then(|()| self.stream.flush())
            .map_err(|e| io_error("writing frame", e))
    }

    /// Read and decode one frame.
    pub fn receive(&mut self) -> Result<ByteBuffer> {
        let frame = decode_frame(&self.policy, &mut self.stream)?;
        tracing::trace!(
            code = frame.get_i16_at(header::CODE)?,
            ret = frame.get_i32_at(header::RET_CODE)?,
            len = frame.len() - HEADER_LEN,
            "receive frame"
        );
        Ok(frame)
    }

    /// Apply the server's TLS policy to the socket.
    pub fn upgrade_tls(
        &mut self,
        policy: ServerTlsPolicy,
        tls: &TlsConfig,
        server_name: &str,
    ) -> Result<()> {
        match policy {
            ServerTlsPolicy::Disabled => Ok(()),
            ServerTlsPolicy::HandshakeOnly => {
                let Stream::Plain(tcp) = &mut self.stream else {
                    return Err(protocol_error("TLS upgrade on a non-plain stream"));
                };
                TlsStream::new(tcp, tls, server_name)?;
                tracing::debug!("TLS handshake verified; continuing in plaintext");
                Ok(())
            }
            ServerTlsPolicy::Always => {
                let Stream::Plain(tcp) = std::mem::replace(&mut self.stream, Stream::Closed)
                else {
                    return Err(protocol_error("TLS upgrade on a non-plain stream"));
                };
                self.wrap_tls(tcp, tls, server_name)
            }
        }
    }

    #[cfg(feature = "tls")]
    fn wrap_tls(&mut self, tcp: TcpStream, tls: &TlsConfig, server_name: &str) -> Result<()> {
        let stream = TlsStream::new(tcp, tls, server_name)?;
        self.stream = Stream::Tls(Box::new(stream));
        tracing::debug!("transport upgraded to TLS");
        Ok(())
    }

    #[cfg(not(feature = "tls"))]
    fn wrap_tls(&mut self, tcp: TcpStream, tls: &TlsConfig, server_name: &str) -> Result<()> {
        TlsStream::new(tcp, tls, server_name).map(|_| ())
    }

    /// Close the socket. Later sends fail without touching the network.
    pub fn shutdown(&mut self) {
        match std::mem::replace(&mut self.stream, Stream::Closed) {
            Stream::Plain(tcp) => {
                let _ = tcp.shutdown(std::net::Shutdown::Both);
            }
            #[cfg(feature = "tls")]
            Stream::Tls(tls) => {
                let _ = tls.into_inner().shutdown(std::net::Shutdown::Both);
            }
            Stream::Closed => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{BuiltinCipher, HashAlgorithm, SymmetricAlgorithm};
    use std::io::Cursor;

    fn frame_with_body(code: MessageCode, body: &[u8]) -> ByteBuffer {
        let mut frame = new_frame(code, 7);
        frame.put_i32_at(header::FIELDS, 0x1234).unwrap();
        frame.write_bytes(body);
        frame
    }

    fn pass_through(policy: &FramePolicy, code: MessageCode, body: &[u8]) -> ByteBuffer {
        let mut frame = frame_with_body(code, body);
        encode_frame(policy, &mut frame).unwrap();
        decode_frame(policy, &mut Cursor::new(frame.into_vec())).unwrap()
    }

    fn cipher() -> Arc<dyn Cipher> {
        Arc::new(BuiltinCipher::new(
            SymmetricAlgorithm::Aes128Cfb,
            HashAlgorithm::Sha1,
            &[3u8; 128],
        ))
    }

    #[test]
    fn test_legacy_frame() {
        let policy = FramePolicy::default();
        let mut frame = frame_with_body(MessageCode::Prepare, b"select 1");
        encode_frame(&policy, &mut frame).unwrap();
        assert_eq!(frame.get_i32_at(header::BODY_LEN).unwrap(), 8);
        assert_eq!(frame.len(), HEADER_LEN + 8);

        let decoded = decode_frame(&policy, &mut Cursor::new(frame.into_vec())).unwrap();
        assert_eq!(decoded.position(), HEADER_LEN);
        assert_eq!(decoded.get_i32_at(header::STMT_ID).unwrap(), 7);
        assert_eq!(decoded.get_i32_at(header::FIELDS).unwrap(), 0x1234);
        assert_eq!(&decoded.as_slice()[HEADER_LEN..], b"select 1");
    }

    #[test]
    fn test_crc_trailer_counted_in_length() {
        let policy = FramePolicy {
            header: HeaderVariant::Crc32,
            ..FramePolicy::default()
        };
        let mut frame = frame_with_body(MessageCode::Execute, &[1, 2, 3]);
        encode_frame(&policy, &mut frame).unwrap();
        assert_eq!(frame.get_i32_at(header::BODY_LEN).unwrap(), 7);
        assert_eq!(frame.len(), HEADER_LEN + 7);

        let decoded = decode_frame(&policy, &mut Cursor::new(frame.into_vec())).unwrap();
        assert_eq!(&decoded.as_slice()[HEADER_LEN..], &[1, 2, 3]);
        assert_eq!(decoded.get_i32_at(header::BODY_LEN).unwrap(), 3);
    }

    #[test]
    fn test_crc_detects_any_flipped_bit() {
        let policy = FramePolicy {
            header: HeaderVariant::Crc32,
            ..FramePolicy::default()
        };
        let mut frame = frame_with_body(MessageCode::Fetch, b"rows");
        encode_frame(&policy, &mut frame).unwrap();
        let wire = frame.into_vec();
        // the length field is left alone so the read boundaries stay intact
        for byte in (0..wire.len() - CRC_LEN).filter(|b| !(6..10).contains(b)) {
            let mut corrupt = wire.clone();
            corrupt[byte] ^= 0x10;
            let err = decode_frame(&policy, &mut Cursor::new(corrupt)).unwrap_err();
            assert!(matches!(err, Error::ChecksumMismatch(_)), "byte {}", byte);
        }
    }

    #[test]
    fn test_xor_mismatch_is_fatal() {
        let policy = FramePolicy::default();
        let mut frame = frame_with_body(MessageCode::Commit, &[]);
        encode_frame(&policy, &mut frame).unwrap();
        let mut wire = frame.into_vec();
        wire[0] ^= 1;
        let err = decode_frame(&policy, &mut Cursor::new(wire)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_always_compression() {
        let policy = FramePolicy {
            compression: CompressionMode::Always,
            ..FramePolicy::default()
        };
        let body = vec![b'x'; 4000];
        let mut frame = frame_with_body(MessageCode::Execute, &body);
        encode_frame(&policy, &mut frame).unwrap();
        assert_eq!(frame.get_u8_at(header::COMPRESSED).unwrap(), 1);
        assert_eq!(frame.get_u32_at(HEADER_LEN).unwrap(), 4000);
        assert!(frame.len() < HEADER_LEN + 4000);

        let decoded = pass_through(&policy, MessageCode::Execute, &body);
        assert_eq!(&decoded.as_slice()[HEADER_LEN..], body.as_slice());
    }

    #[test]
    fn test_conditional_compression_threshold() {
        let policy = FramePolicy {
            compression: CompressionMode::Conditional,
            ..FramePolicy::default()
        };
        let mut small = frame_with_body(MessageCode::Execute, &[0; COMPRESS_THRESHOLD]);
        encode_frame(&policy, &mut small).unwrap();
        assert_eq!(small.get_u8_at(header::COMPRESSED).unwrap(), 0);

        let mut large = frame_with_body(MessageCode::Execute, &[0; COMPRESS_THRESHOLD + 1]);
        encode_frame(&policy, &mut large).unwrap();
        assert_eq!(large.get_u8_at(header::COMPRESSED).unwrap(), 1);

        let local = FramePolicy {
            peer_is_local: true,
            ..policy
        };
        let mut large = frame_with_body(MessageCode::Execute, &[0; COMPRESS_THRESHOLD + 1]);
        encode_frame(&local, &mut large).unwrap();
        assert_eq!(large.get_u8_at(header::COMPRESSED).unwrap(), 0);
    }

    #[test]
    fn test_handshake_never_compressed_or_encrypted() {
        let policy = FramePolicy {
            compression: CompressionMode::Always,
            cipher: Some(cipher()),
            ..FramePolicy::default()
        };
        let mut frame = frame_with_body(MessageCode::Handshake, b"7.6.0.0");
        encode_frame(&policy, &mut frame).unwrap();
        assert_eq!(&frame.as_slice()[HEADER_LEN..], b"7.6.0.0");
    }

    #[test]
    fn test_encrypted_compressed_crc_frame() {
        let policy = FramePolicy {
            header: HeaderVariant::Crc32,
            compression: CompressionMode::Always,
            compression_id: CompressionId::Snappy,
            cipher: Some(cipher()),
            peer_is_local: false,
        };
        let body: Vec<u8> = (0..10_000u32).map(|i| (i % 97) as u8).collect();
        let mut frame = frame_with_body(MessageCode::Execute, &body);
        encode_frame(&policy, &mut frame).unwrap();
        assert!(!frame.as_slice()[HEADER_LEN..].starts_with(&10_000u32.to_le_bytes()));

        let decoded = pass_through(&policy, MessageCode::Execute, &body);
        assert_eq!(&decoded.as_slice()[HEADER_LEN..], body.as_slice());
    }

    #[test]
    fn test_truncated_stream_is_transport_error() {
        let policy = FramePolicy::default();
        let err = decode_frame(&policy, &mut Cursor::new(vec![0u8; 10])).unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError {
                kind: TransportErrorKind::Disconnected,
                ..
            })
        ));
    }

    #[test]
    fn test_negative_length_rejected() {
        let policy = FramePolicy::default();
        let mut wire = vec![0u8; HEADER_LEN];
        wire[header::BODY_LEN..header::BODY_LEN + 4].copy_from_slice(&(-5i32).to_le_bytes());
        let err = decode_frame(&policy, &mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
