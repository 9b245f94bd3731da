//! Frame checksums: CRC32 (slicing-by-8) and the legacy header XOR.

use std::sync::OnceLock;

use super::header;

const POLY: u32 = 0xEDB8_8320;

/// Eight 256-entry CRC32 tables for the reflected IEEE polynomial.
#[derive(Debug, Clone)]
pub struct ChecksumTable {
    tables: Box<[[u32; 256]; 8]>,
}

impl ChecksumTable {
    pub fn new() -> Self {
        let mut tables = Box::new([[0u32; 256]; 8]);
        for i in 0..256u32 {
            let mut crc = i;
            for _ in 0..8 {
                crc = if crc & 1 == 1 { (crc >> 1) ^ POLY } else { crc >> 1 };
            }
            tables[0][i as usize] = crc;
        }
        for i in 0..256 {
            for t in 1..8 {
                let prev = tables[t - 1][i];
                tables[t][i] = (prev >> 8) ^ tables[0][(prev & 0xFF) as usize];
            }
        }
        Self { tables }
    }

    /// Process-wide shared instance.
    pub fn global() -> &'static ChecksumTable {
        static TABLE: OnceLock<ChecksumTable> = OnceLock::new();
        TABLE.get_or_init(ChecksumTable::new)
    }

    /// CRC32 of `buffer[start..end]`.
    pub fn crc32(&self, buffer: &[u8], start: usize, end: usize) -> u32 {
        let t = &self.tables;
        let mut crc = u32::MAX;
        let mut chunks = buffer[start..end].chunks_exact(8);
        for c in &mut chunks {
            let lo = crc ^ u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
            let hi = u32::from_le_bytes([c[4], c[5], c[6], c[7]]);
            crc = t[7][(lo & 0xFF) as usize]
                ^ t[6][((lo >> 8) & 0xFF) as usize]
                ^ t[5][((lo >> 16) & 0xFF) as usize]
                ^ t[4][(lo >> 24) as usize]
                ^ t[3][(hi & 0xFF) as usize]
                ^ t[2][((hi >> 8) & 0xFF) as usize]
                ^ t[1][((hi >> 16) & 0xFF) as usize]
                ^ t[0][(hi >> 24) as usize];
        }
        for &b in chunks.remainder() {
            crc = (crc >> 8) ^ t[0][((crc ^ u32::from(b)) & 0xFF) as usize];
        }
        !crc
    }
}

impl Default for ChecksumTable {
    fn default() -> Self {
        Self::new()
    }
}

/// XOR of header bytes `[0, 19)`, stored at byte 19.
pub fn header_xor(frame: &[u8]) -> u8 {
    frame[..header::CHECKSUM].iter().fold(0, |acc, b| acc ^ b)
}
