//! LOB messages: length, read, write and truncate against a server
//! locator.
//!
//! Offsets on the wire are 1-based and count bytes for binary LOBs and
//! characters for text LOBs.

#![allow(clippy::cast_sign_loss)]

use dmwire_core::Result;

use super::message::{MessageContext, Request, Response, protocol_error};
use super::{ByteBuffer, MessageCode};

/// First chunk of a write.
pub const CHUNK_FIRST: u8 = 0x01;
/// Last chunk of a write.
pub const CHUNK_LAST: u8 = 0x02;

/// Server-side address of a LOB value plus its read/write cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobLocator {
    pub flag: u8,
    pub blob_id: u64,
    pub group_id: i16,
    pub file_id: i16,
    pub page_no: i32,
    pub cur_file_id: i16,
    pub cur_page_no: i32,
    pub total_offset: i32,
    pub table_id: i32,
    pub column_id: i16,
    pub row_id: u64,
    pub ex_group_id: i16,
    pub ex_file_id: i16,
    pub ex_page_no: i32,
}

impl Default for LobLocator {
    fn default() -> Self {
        Self {
            flag: 0,
            blob_id: 0,
            group_id: 0,
            file_id: 0,
            page_no: 0,
            cur_file_id: -1,
            cur_page_no: -1,
            total_offset: 0,
            table_id: 0,
            column_id: 0,
            row_id: 0,
            ex_group_id: 0,
            ex_file_id: 0,
            ex_page_no: 0,
        }
    }
}

impl LobLocator {
    /// Forget the cursor after the value was replaced or truncated.
    pub fn reset_cursor(&mut self) {
        self.cur_file_id = -1;
        self.cur_page_no = -1;
        self.total_offset = 0;
    }

    fn write_address(&self, frame: &mut ByteBuffer) {
        frame.write_u8(self.flag);
        frame.write_u64(self.blob_id);
        frame.write_i16(self.group_id);
        frame.write_i16(self.file_id);
        frame.write_i32(self.page_no);
    }

    fn write_row(&self, frame: &mut ByteBuffer) {
        frame.write_i32(self.table_id);
        frame.write_i16(self.column_id);
        frame.write_u64(self.row_id);
    }

    fn write_extension(&self, frame: &mut ByteBuffer) {
        frame.write_i16(self.ex_group_id);
        frame.write_i16(self.ex_file_id);
        frame.write_i32(self.ex_page_no);
    }
}

#[derive(Debug, Clone)]
pub struct LobLengthRequest<'a> {
    pub locator: &'a LobLocator,
}

impl Request for LobLengthRequest<'_> {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::LobLength
    }

    fn write_body(&self, frame: &mut ByteBuffer, ctx: &MessageContext) -> Result<()> {
        self.locator.write_address(frame);
        if ctx.new_lob_flag {
            self.locator.write_row(frame);
            self.locator.write_extension(frame);
        }
        Ok(())
    }

    fn read_response(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<Response> {
        let len = if frame.remaining() == 8 {
            frame.read_i64()?
        } else {
            i64::from(frame.read_u32()?)
        };
        Ok(Response::LobLength(len))
    }
}

/// Read `len` units starting at the 1-based position `start`.
#[derive(Debug, Clone)]
pub struct LobReadRequest<'a> {
    pub locator: &'a LobLocator,
    pub start: i32,
    pub len: i32,
}

/// Cursor fields the server reports after a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LobCursor {
    pub cur_file_id: i16,
    pub cur_page_no: i32,
    pub total_offset: i32,
}

#[derive(Debug, Clone, Default)]
pub struct LobChunk {
    /// No data remains past this chunk
    pub read_over: bool,
    pub data: Vec<u8>,
    pub cursor: Option<LobCursor>,
}

impl Request for LobReadRequest<'_> {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::LobRead
    }

    fn write_body(&self, frame: &mut ByteBuffer, ctx: &MessageContext) -> Result<()> {
        let loc = self.locator;
        frame.write_u8(loc.flag);
        frame.write_i32(loc.table_id);
        frame.write_i16(loc.column_id);
        frame.write_u64(loc.blob_id);
        frame.write_i16(loc.group_id);
        frame.write_i16(loc.file_id);
        frame.write_i32(loc.page_no);
        frame.write_i16(loc.cur_file_id);
        frame.write_i32(loc.cur_page_no);
        frame.write_i32(loc.total_offset);
        frame.write_i32(self.start);
        frame.write_i32(self.len);
        if ctx.new_lob_flag {
            frame.write_u64(loc.row_id);
            loc.write_extension(frame);
        }
        Ok(())
    }

    fn read_response(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<Response> {
        let read_over = frame.read_u8()? == 1;
        let len = frame.read_i32()?;
        if len <= 0 {
            return Ok(Response::LobChunk(LobChunk {
                read_over,
                data: Vec::new(),
                cursor: None,
            }));
        }
        let cursor = LobCursor {
            cur_file_id: frame.read_i16()?,
            cur_page_no: frame.read_i32()?,
            total_offset: frame.read_i32()?,
        };
        let data = frame.read_bytes(len as usize)?.to_vec();
        Ok(Response::LobChunk(LobChunk {
            read_over,
            data,
            cursor: Some(cursor),
        }))
    }
}

/// Write one chunk at the 1-based position `start`.
#[derive(Debug, Clone)]
pub struct LobWriteRequest<'a> {
    pub locator: &'a LobLocator,
    /// `CHUNK_FIRST` and/or `CHUNK_LAST`
    pub chunk_flags: u8,
    pub start: i32,
    pub data: &'a [u8],
}

/// Progress and relocated address after a chunk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LobWritten {
    pub written: i32,
    pub blob_id: u64,
    pub file_id: i16,
    pub page_no: i32,
    pub cursor: LobCursor,
}

impl Request for LobWriteRequest<'_> {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::LobWrite
    }

    fn write_body(&self, frame: &mut ByteBuffer, ctx: &MessageContext) -> Result<()> {
        let loc = self.locator;
        let len = i32::try_from(self.data.len())
            .map_err(|_| protocol_error("LOB chunk too large"))?;
        frame.write_u8(loc.flag);
        frame.write_u8(self.chunk_flags);
        frame.write_u64(loc.blob_id);
        frame.write_i16(loc.group_id);
        frame.write_i16(loc.file_id);
        frame.write_i32(loc.page_no);
        frame.write_i16(loc.cur_file_id);
        frame.write_i32(loc.cur_page_no);
        frame.write_i32(loc.total_offset);
        loc.write_row(frame);
        frame.write_i32(self.start);
        frame.write_i32(len);
        frame.write_bytes(self.data);
        if ctx.new_lob_flag {
            loc.write_extension(frame);
        }
        Ok(())
    }

    fn read_response(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<Response> {
        Ok(Response::LobWritten(LobWritten {
            written: frame.read_i32()?,
            blob_id: frame.read_u64()?,
            file_id: frame.read_i16()?,
            page_no: frame.read_i32()?,
            cursor: LobCursor {
                cur_file_id: frame.read_i16()?,
                cur_page_no: frame.read_i32()?,
                total_offset: frame.read_i32()?,
            },
        }))
    }
}

/// Cut the value to `new_len` units.
#[derive(Debug, Clone)]
pub struct LobTruncateRequest<'a> {
    pub locator: &'a LobLocator,
    pub new_len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LobTruncated {
    pub len: u32,
    pub blob_id: u64,
}

impl Request for LobTruncateRequest<'_> {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::LobTruncate
    }

    fn write_body(&self, frame: &mut ByteBuffer, ctx: &MessageContext) -> Result<()> {
        self.locator.write_address(frame);
        self.locator.write_row(frame);
        frame.write_u32(self.new_len);
        if ctx.new_lob_flag {
            self.locator.write_extension(frame);
        }
        Ok(())
    }

    fn read_response(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<Response> {
        Ok(Response::LobTruncated(LobTruncated {
            len: frame.read_u32()?,
            blob_id: frame.read_u64()?,
        }))
    }
}
