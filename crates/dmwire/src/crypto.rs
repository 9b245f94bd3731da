//! Session-key negotiation and message ciphers.
//!
//! When encryption is requested the client sends an ephemeral
//! Diffie-Hellman public value (1024-bit MODP group, generator 2) in the
//! handshake. The server answers with its own public value plus a cipher
//! id and a hash id. The shared secret is stretched into key and IV
//! material with the negotiated hash:
//!
//! ```text
//! material = H(secret) || H(H(secret)) || ...
//! key = material[..key_len], iv = material[key_len..key_len + iv_len]
//! ```
//!
//! Ids below [`MIN_EXTERNAL_CIPHER_ID`] select a built-in CFB cipher.
//! Ids at or above it are delegated to an [`ExternalCipherProvider`].

use std::fmt;
use std::sync::Arc;

use cfb_mode::cipher::{AsyncStreamCipher, BlockCipher, BlockEncryptMut, KeyInit, KeyIvInit};
use dmwire_core::{ConfigError, Error, ProtocolError, Result};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::BigUint;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Length of DH public values and shared secrets on the wire.
pub const DH_KEY_LENGTH: usize = 128;

/// Random bytes in the private exponent.
const DH_PRIVATE_LENGTH: usize = 32;

/// First cipher id handled by an external provider.
pub const MIN_EXTERNAL_CIPHER_ID: i32 = 5000;

/// RFC 2409 second Oakley group.
const DH_PRIME: [u8; DH_KEY_LENGTH] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xC9, 0x0F, 0xDA, 0xA2, 0x21, 0x68, 0xC2, 0x34,
    0xC4, 0xC6, 0x62, 0x8B, 0x80, 0xDC, 0x1C, 0xD1, 0x29, 0x02, 0x4E, 0x08, 0x8A, 0x67, 0xCC, 0x74,
    0x02, 0x0B, 0xBE, 0xA6, 0x3B, 0x13, 0x9B, 0x22, 0x51, 0x4A, 0x08, 0x79, 0x8E, 0x34, 0x04, 0xDD,
    0xEF, 0x95, 0x19, 0xB3, 0xCD, 0x3A, 0x43, 0x1B, 0x30, 0x2B, 0x0A, 0x6D, 0xF2, 0x5F, 0x14, 0x37,
    0x4F, 0xE1, 0x35, 0x6D, 0x6D, 0x51, 0xC2, 0x45, 0xE4, 0x85, 0xB5, 0x76, 0x62, 0x5E, 0x7E, 0xC6,
    0xF4, 0x4C, 0x42, 0xE9, 0xA6, 0x37, 0xED, 0x6B, 0x0B, 0xFF, 0x5C, 0xB6, 0xF4, 0x06, 0xB7, 0xED,
    0xEE, 0x38, 0x6B, 0xFB, 0x5A, 0x89, 0x9F, 0xA5, 0xAE, 0x9F, 0x24, 0x11, 0x7C, 0x4B, 0x1F, 0xE6,
    0x49, 0x28, 0x66, 0x51, 0xEC, 0xE6, 0x53, 0x81, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

const DH_GENERATOR: u32 = 2;

/// Built-in cipher ids.
pub mod cipher_id {
    /// Server left the choice to the client.
    pub const UNSPECIFIED: i32 = -1;
    pub const DES_CFB: i32 = 129;
    pub const DES3_CFB: i32 = 130;
    pub const AES128_CFB: i32 = 131;
    pub const AES192_CFB: i32 = 132;
    pub const AES256_CFB: i32 = 133;
}

/// Hash ids used for key derivation.
pub mod hash_id {
    pub const UNSPECIFIED: i32 = -1;
    pub const MD5: i32 = 1;
    pub const SHA1: i32 = 2;
    pub const SHA256: i32 = 3;
}

fn crypto_error(message: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: message.into(),
        raw_data: None,
        source: None,
    })
}

// ==================== Diffie-Hellman ====================

/// An ephemeral DH keypair.
pub struct DhKeyPair {
    private: BigUint,
    public: BigUint,
}

impl DhKeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; DH_PRIVATE_LENGTH];
        loop {
            OsRng.fill_bytes(&mut bytes);
            let private = BigUint::from_bytes_be(&bytes);
            if private > BigUint::from(1u32) {
                return Self::from_private(private);
            }
        }
    }

    /// Build a keypair from a known private exponent.
    pub fn from_private(private: BigUint) -> Self {
        let public = BigUint::from(DH_GENERATOR).modpow(&private, &prime());
        Self { private, public }
    }

    /// Public value, left-padded to `DH_KEY_LENGTH` bytes.
    pub fn public_bytes(&self) -> Vec<u8> {
        fixed_width(&self.public)
    }

    /// Shared secret with the peer's public value.
    pub fn compute_session_key(&self, peer_public: &[u8]) -> Result<Vec<u8>> {
        compute_session_key(&self.private, peer_public)
    }
}

impl fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DhKeyPair").finish_non_exhaustive()
    }
}

fn prime() -> BigUint {
    BigUint::from_bytes_be(&DH_PRIME)
}

fn fixed_width(value: &BigUint) -> Vec<u8> {
    let raw = value.to_bytes_be();
    let mut out = vec![0u8; DH_KEY_LENGTH.saturating_sub(raw.len())];
    out.extend_from_slice(&raw);
    out
}

/// `peer_public ^ local_private mod p`, rejecting degenerate peer values.
pub fn compute_session_key(local_private: &BigUint, peer_public: &[u8]) -> Result<Vec<u8>> {
    let p = prime();
    let y = BigUint::from_bytes_be(peer_public);
    let one = BigUint::from(1u32);
    if y <= one || y >= &p - &one {
        return Err(crypto_error("peer DH public value out of range"));
    }
    Ok(fixed_width(&y.modpow(local_private, &p)))
}

// ==================== Key derivation ====================

/// Hash used to stretch the shared secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    /// Map a wire hash id; unspecified means MD5.
    pub fn from_id(id: i32) -> Result<Self> {
        match id {
            hash_id::UNSPECIFIED | hash_id::MD5 => Ok(HashAlgorithm::Md5),
            hash_id::SHA1 => Ok(HashAlgorithm::Sha1),
            hash_id::SHA256 => Ok(HashAlgorithm::Sha256),
            other => Err(crypto_error(format!("unsupported hash id {}", other))),
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Md5 => md5::compute(data).0.to_vec(),
            HashAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// Stretch `secret` to `len` bytes by iterated hashing.
pub fn derive_key_material(hash: HashAlgorithm, secret: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + 32);
    let mut block = hash.digest(secret);
    while out.len() < len {
        out.extend_from_slice(&block);
        block = hash.digest(&block);
    }
    out.truncate(len);
    out
}

// ==================== Ciphers ====================

/// A message cipher. Each call starts from the initial IV.
pub trait Cipher: Send + Sync + fmt::Debug {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Source of third-party ciphers for ids at or above
/// [`MIN_EXTERNAL_CIPHER_ID`].
pub trait ExternalCipherProvider: Send + Sync + fmt::Debug {
    fn create(
        &self,
        cipher_id: i32,
        session_key: &[u8],
        cipher_path: &str,
        hash: HashAlgorithm,
    ) -> Result<Arc<dyn Cipher>>;
}

/// Built-in symmetric algorithms, all in CFB mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymmetricAlgorithm {
    DesCfb,
    TripleDesCfb,
    Aes128Cfb,
    Aes192Cfb,
    Aes256Cfb,
}

impl SymmetricAlgorithm {
    pub fn from_cipher_id(id: i32) -> Option<Self> {
        match id {
            cipher_id::UNSPECIFIED | cipher_id::DES_CFB => Some(SymmetricAlgorithm::DesCfb),
            cipher_id::DES3_CFB => Some(SymmetricAlgorithm::TripleDesCfb),
            cipher_id::AES128_CFB => Some(SymmetricAlgorithm::Aes128Cfb),
            cipher_id::AES192_CFB => Some(SymmetricAlgorithm::Aes192Cfb),
            cipher_id::AES256_CFB => Some(SymmetricAlgorithm::Aes256Cfb),
            _ => None,
        }
    }

    pub fn key_len(self) -> usize {
        match self {
            SymmetricAlgorithm::DesCfb => 8,
            SymmetricAlgorithm::TripleDesCfb => 24,
            SymmetricAlgorithm::Aes128Cfb => 16,
            SymmetricAlgorithm::Aes192Cfb => 24,
            SymmetricAlgorithm::Aes256Cfb => 32,
        }
    }

    pub fn iv_len(self) -> usize {
        match self {
            SymmetricAlgorithm::DesCfb | SymmetricAlgorithm::TripleDesCfb => 8,
            _ => 16,
        }
    }
}

/// Built-in CFB cipher keyed from the session secret.
#[derive(Clone)]
pub struct BuiltinCipher {
    algorithm: SymmetricAlgorithm,
    key: Vec<u8>,
    iv: Vec<u8>,
}

impl BuiltinCipher {
    pub fn new(algorithm: SymmetricAlgorithm, hash: HashAlgorithm, session_key: &[u8]) -> Self {
        let key_len = algorithm.key_len();
        let mut material =
            derive_key_material(hash, session_key, key_len + algorithm.iv_len());
        let iv = material.split_off(key_len);
        Self {
            algorithm,
            key: material,
            iv,
        }
    }

    pub fn algorithm(&self) -> SymmetricAlgorithm {
        self.algorithm
    }
}

impl fmt::Debug for BuiltinCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinCipher")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

fn cfb_encrypt<C>(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let mut out = data.to_vec();
    cfb_mode::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| crypto_error("invalid cipher key or IV length"))?
        .encrypt(&mut out);
    Ok(out)
}

fn cfb_decrypt<C>(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let mut out = data.to_vec();
    cfb_mode::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| crypto_error("invalid cipher key or IV length"))?
        .decrypt(&mut out);
    Ok(out)
}

impl Cipher for BuiltinCipher {
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let (key, iv) = (&self.key, &self.iv);
        match self.algorithm {
            SymmetricAlgorithm::DesCfb => cfb_encrypt::<des::Des>(key, iv, data),
            SymmetricAlgorithm::TripleDesCfb => cfb_encrypt::<des::TdesEde3>(key, iv, data),
            SymmetricAlgorithm::Aes128Cfb => cfb_encrypt::<aes::Aes128>(key, iv, data),
            SymmetricAlgorithm::Aes192Cfb => cfb_encrypt::<aes::Aes192>(key, iv, data),
            SymmetricAlgorithm::Aes256Cfb => cfb_encrypt::<aes::Aes256>(key, iv, data),
        }
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let (key, iv) = (&self.key, &self.iv);
        match self.algorithm {
            SymmetricAlgorithm::DesCfb => cfb_decrypt::<des::Des>(key, iv, data),
            SymmetricAlgorithm::TripleDesCfb => cfb_decrypt::<des::TdesEde3>(key, iv, data),
            SymmetricAlgorithm::Aes128Cfb => cfb_decrypt::<aes::Aes128>(key, iv, data),
            SymmetricAlgorithm::Aes192Cfb => cfb_decrypt::<aes::Aes192>(key, iv, data),
            SymmetricAlgorithm::Aes256Cfb => cfb_decrypt::<aes::Aes256>(key, iv, data),
        }
    }
}

/// Build the cipher selected in the handshake.
///
/// Unspecified ids fall back to DES_CFB and MD5.
pub fn build_cipher(
    cipher_id: i32,
    hash_id: i32,
    session_key: &[u8],
    cipher_path: &str,
    provider: Option<&Arc<dyn ExternalCipherProvider>>,
) -> Result<Arc<dyn Cipher>> {
    let hash = HashAlgorithm::from_id(hash_id)?;
    if cipher_id >= MIN_EXTERNAL_CIPHER_ID {
        let provider = provider.ok_or_else(|| {
            Error::Config(ConfigError {
                message: format!(
                    "server selected external cipher {} but no provider is configured",
                    cipher_id
                ),
                source: None,
            })
        })?;
        return provider.create(cipher_id, session_key, cipher_path, hash);
    }
    let algorithm = SymmetricAlgorithm::from_cipher_id(cipher_id)
        .ok_or_else(|| crypto_error(format!("unsupported cipher id {}", cipher_id)))?;
    tracing::debug!(?algorithm, ?hash, "built-in session cipher selected");
    Ok(Arc::new(BuiltinCipher::new(algorithm, hash, session_key)))
}
