//! Growable byte buffer with an independent read cursor.
//!
//! Writes append at the end and advance the length. Reads advance a
//! separate cursor and fail with `BufferError::Underrun` instead of
//! panicking when the data runs out. Header fields are patched in place
//! with the `put_*_at` family.

#![allow(clippy::cast_possible_truncation)]

use dmwire_core::BufferError;

type BufResult<T> = std::result::Result<T, BufferError>;

/// A byte buffer used for building and parsing frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
    pos: usize,
}

impl ByteBuffer {
    /// Create a new buffer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new buffer with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            pos: 0,
        }
    }

    /// Wrap existing bytes; the read cursor starts at 0.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of written bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Grow storage so `n` more bytes fit, to `max(2 * capacity, len + n)`.
    pub fn ensure_capacity(&mut self, n: usize) {
        let len = self.data.len();
        let cap = self.data.capacity();
        if len + n > cap {
            let target = (2 * cap).max(len + n);
            self.data.reserve_exact(target - len);
        }
    }

    /// Drop everything past `len` and clamp the read cursor.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
        self.pos = self.pos.min(len);
    }

    /// Zero-fill up to `len` bytes.
    pub fn resize(&mut self, len: usize) {
        if len > self.data.len() {
            self.ensure_capacity(len - self.data.len());
        }
        self.data.resize(len, 0);
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.pos = 0;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Zero-copy view of `len` bytes starting at `offset`.
    pub fn slice(&self, offset: usize, len: usize) -> BufResult<&[u8]> {
        let end = offset.checked_add(len).ok_or(BufferError::Overflow {
            requested: len,
            limit: usize::MAX - offset,
        })?;
        self.data.get(offset..end).ok_or(BufferError::Underrun {
            needed: len,
            available: self.data.len().saturating_sub(offset),
        })
    }

    // ==================== Read cursor ====================

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) -> BufResult<()> {
        if pos > self.data.len() {
            return Err(BufferError::Overflow {
                requested: pos,
                limit: self.data.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    /// Bytes left between the read cursor and the written length.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn skip(&mut self, n: usize) -> BufResult<()> {
        self.take(n).map(|_| ())
    }

    fn take(&mut self, n: usize) -> BufResult<&[u8]> {
        if self.remaining() < n {
            return Err(BufferError::Underrun {
                needed: n,
                available: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..start + n])
    }

    fn take_array<const N: usize>(&mut self) -> BufResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> BufResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> BufResult<i8> {
        Ok(i8::from_le_bytes(self.take_array()?))
    }

    pub fn read_u16(&mut self) -> BufResult<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_i16(&mut self) -> BufResult<i16> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> BufResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> BufResult<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> BufResult<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> BufResult<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> BufResult<f32> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> BufResult<f64> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// Read exactly `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> BufResult<&[u8]> {
        self.take(n)
    }

    /// Read bytes prefixed by a u8 length.
    pub fn read_u8_bytes(&mut self) -> BufResult<&[u8]> {
        let n = usize::from(self.read_u8()?);
        self.take(n)
    }

    /// Read bytes prefixed by a u16 length.
    pub fn read_u16_bytes(&mut self) -> BufResult<&[u8]> {
        let n = usize::from(self.read_u16()?);
        self.take(n)
    }

    /// Read bytes prefixed by an i32 length; negative lengths read nothing.
    pub fn read_i32_bytes(&mut self) -> BufResult<&[u8]> {
        let n = usize::try_from(self.read_i32()?).unwrap_or(0);
        self.take(n)
    }

    /// Read up to (and consume) a NUL terminator.
    pub fn read_cstr(&mut self) -> BufResult<&[u8]> {
        let rest = &self.data[self.pos..];
        let Some(nul) = rest.iter().position(|&b| b == 0) else {
            return Err(BufferError::Underrun {
                needed: rest.len() + 1,
                available: rest.len(),
            });
        };
        let start = self.pos;
        self.pos += nul + 1;
        Ok(&self.data[start..start + nul])
    }

    // ==================== Appending writes ====================

    pub fn write_u8(&mut self, value: u8) {
        self.write_bytes(&[value]);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.ensure_capacity(bytes.len());
        self.data.extend_from_slice(bytes);
    }

    /// Write bytes with a u8 length prefix.
    pub fn write_u8_bytes(&mut self, bytes: &[u8]) -> BufResult<()> {
        let len = u8::try_from(bytes.len()).map_err(|_| BufferError::Overflow {
            requested: bytes.len(),
            limit: usize::from(u8::MAX),
        })?;
        self.write_u8(len);
        self.write_bytes(bytes);
        Ok(())
    }

    /// Write bytes with a u16 length prefix.
    pub fn write_u16_bytes(&mut self, bytes: &[u8]) -> BufResult<()> {
        let len = u16::try_from(bytes.len()).map_err(|_| BufferError::Overflow {
            requested: bytes.len(),
            limit: usize::from(u16::MAX),
        })?;
        self.write_u16(len);
        self.write_bytes(bytes);
        Ok(())
    }

    /// Write bytes with an i32 length prefix.
    pub fn write_i32_bytes(&mut self, bytes: &[u8]) -> BufResult<()> {
        let len = i32::try_from(bytes.len()).map_err(|_| BufferError::Overflow {
            requested: bytes.len(),
            limit: i32::MAX as usize,
        })?;
        self.write_i32(len);
        self.write_bytes(bytes);
        Ok(())
    }

    /// Write bytes followed by a NUL terminator.
    pub fn write_cstr(&mut self, bytes: &[u8]) {
        self.write_bytes(bytes);
        self.write_u8(0);
    }

    // ==================== Positional access ====================

    fn window_mut(&mut self, offset: usize, len: usize) -> BufResult<&mut [u8]> {
        let available = self.data.len();
        self.data
            .get_mut(offset..offset + len)
            .ok_or(BufferError::Overflow {
                requested: offset + len,
                limit: available,
            })
    }

    pub fn put_bytes_at(&mut self, offset: usize, bytes: &[u8]) -> BufResult<()> {
        self.window_mut(offset, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    pub fn put_u8_at(&mut self, offset: usize, value: u8) -> BufResult<()> {
        self.put_bytes_at(offset, &[value])
    }

    pub fn put_i16_at(&mut self, offset: usize, value: i16) -> BufResult<()> {
        self.put_bytes_at(offset, &value.to_le_bytes())
    }

    pub fn put_u16_at(&mut self, offset: usize, value: u16) -> BufResult<()> {
        self.put_bytes_at(offset, &value.to_le_bytes())
    }

    pub fn put_i32_at(&mut self, offset: usize, value: i32) -> BufResult<()> {
        self.put_bytes_at(offset, &value.to_le_bytes())
    }

    pub fn put_i64_at(&mut self, offset: usize, value: i64) -> BufResult<()> {
        self.put_bytes_at(offset, &value.to_le_bytes())
    }

    fn array_at<const N: usize>(&self, offset: usize) -> BufResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(offset, N)?);
        Ok(out)
    }

    pub fn get_u8_at(&self, offset: usize) -> BufResult<u8> {
        Ok(self.array_at::<1>(offset)?[0])
    }

    pub fn get_i16_at(&self, offset: usize) -> BufResult<i16> {
        Ok(i16::from_le_bytes(self.array_at(offset)?))
    }

    pub fn get_u16_at(&self, offset: usize) -> BufResult<u16> {
        Ok(u16::from_le_bytes(self.array_at(offset)?))
    }

    pub fn get_i32_at(&self, offset: usize) -> BufResult<i32> {
        Ok(i32::from_le_bytes(self.array_at(offset)?))
    }

    pub fn get_u32_at(&self, offset: usize) -> BufResult<u32> {
        Ok(u32::from_le_bytes(self.array_at(offset)?))
    }

    pub fn get_i64_at(&self, offset: usize) -> BufResult<i64> {
        Ok(i64::from_le_bytes(self.array_at(offset)?))
    }
}
