//! FIFO of byte segments drained in bounded frames.
//!
//! Off-row parameters and LOB writes are pushed whole and then pulled
//! out at most `LOB_WRITE_CHUNK` bytes at a time.

use std::collections::VecDeque;

use super::ByteBuffer;

#[derive(Debug)]
struct Segment {
    bytes: Vec<u8>,
    offset: usize,
}

impl Segment {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }
}

#[derive(Debug, Default)]
pub struct SegmentedStream {
    segments: VecDeque<Segment>,
    total: usize,
}

impl SegmentedStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment; empty segments are ignored.
    pub fn push(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        self.total += bytes.len();
        self.segments.push_back(Segment { bytes, offset: 0 });
    }

    /// Total bytes not yet drained.
    pub fn remaining(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Copy up to `max_len` bytes into `buffer`, returning the count.
    pub fn read_into(&mut self, buffer: &mut ByteBuffer, max_len: usize) -> usize {
        let mut copied = 0;
        while copied < max_len {
            let Some(front) = self.segments.front_mut() else {
                break;
            };
            let n = front.remaining().min(max_len - copied);
            buffer.write_bytes(&front.bytes[front.offset..front.offset + n]);
            front.offset += n;
            copied += n;
            if front.remaining() == 0 {
                self.segments.pop_front();
            }
        }
        self.total -= copied;
        copied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drains_across_segments() {
        let mut stream = SegmentedStream::new();
        stream.push(vec![1, 2, 3]);
        stream.push(Vec::new());
        stream.push(vec![4, 5]);
        assert_eq!(stream.remaining(), 5);

        let mut buf = ByteBuffer::new();
        assert_eq!(stream.read_into(&mut buf, 4), 4);
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(stream.remaining(), 1);

        let mut rest = ByteBuffer::new();
        assert_eq!(stream.read_into(&mut rest, 100), 1);
        assert_eq!(rest.as_slice(), &[5]);
        assert!(stream.is_empty());
        assert_eq!(stream.read_into(&mut rest, 100), 0);
    }

    #[test]
    fn test_chunked_frames() {
        let mut stream = SegmentedStream::new();
        stream.push(vec![7; 16_001]);
        let mut sizes = Vec::new();
        while !stream.is_empty() {
            let mut buf = ByteBuffer::new();
            sizes.push(stream.read_into(&mut buf, 16_000));
        }
        assert_eq!(sizes, vec![16_000, 1]);
    }
}
