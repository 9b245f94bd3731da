//! Client-side handles for BLOB and CLOB values.
//!
//! A LOB column arrives as a locator. Small values are stored in the row
//! and travel inside the locator; larger ones live off-row and are read
//! or written in chunks through LOB messages. Positions are 0-based here
//! and counted in bytes for binary values and in characters for text.

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use dmwire_core::{Error, Result, TypeError};

use crate::connection::Connection;
use crate::protocol::codec::{i16_at, i32_at, u64_at};
use crate::protocol::lob::{
    CHUNK_FIRST, CHUNK_LAST, LobCursor, LobLengthRequest, LobLocator, LobReadRequest,
    LobTruncateRequest, LobWriteRequest,
};
use crate::protocol::{Charset, LOB_READ_BYTES, LOB_READ_CHARS, LOB_WRITE_CHUNK, Message, Response};
use crate::types::{Column, sql_type};

/// Locator flag of a value stored inside the row.
pub const IN_ROW: u8 = 0x01;
/// Locator flag of a value stored in its own pages.
pub const OFF_ROW: u8 = 0x02;

mod offset {
    pub const FLAG: usize = 0;
    pub const BLOB_ID: usize = 1;
    pub const LEN: usize = 9;
    pub const INLINE: usize = 13;
    pub const GROUP_ID: usize = 13;
    pub const FILE_ID: usize = 15;
    pub const PAGE_NO: usize = 17;
    pub const TABLE_ID: usize = 21;
    pub const COLUMN_ID: usize = 25;
    pub const ROW_ID: usize = 27;
    pub const EX_GROUP_ID: usize = 35;
    pub const EX_FILE_ID: usize = 37;
    pub const EX_PAGE_NO: usize = 39;
    pub const EX_INLINE: usize = 43;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobKind {
    /// BLOB; positions count bytes
    Binary,
    /// CLOB; positions count characters
    Text,
}

impl LobKind {
    fn read_limit(self) -> usize {
        match self {
            LobKind::Binary => LOB_READ_BYTES,
            LobKind::Text => LOB_READ_CHARS,
        }
    }
}

fn locator_error(actual: impl Into<String>, column: Option<&str>) -> Error {
    Error::Type(TypeError {
        expected: "LOB locator",
        actual: actual.into(),
        column: column.map(str::to_string),
    })
}

fn position(units: usize) -> Result<i32> {
    i32::try_from(units).map_err(|_| {
        Error::Type(TypeError {
            expected: "LOB position",
            actual: format!("{} is out of range", units),
            column: None,
        })
    })
}

/// A BLOB or CLOB value bound to its server locator.
#[derive(Debug, Clone)]
pub struct Lob {
    kind: LobKind,
    locator: LobLocator,
    /// Row-stored payload, dropped once the value is written to
    inline: Option<Vec<u8>>,
    /// Length reported by the locator or the last length request
    length: Option<i64>,
}

impl Lob {
    /// Open the locator bytes decoded from a LOB column.
    pub fn from_column(column: &Column, bytes: &[u8], new_lob_flag: bool) -> Result<Self> {
        let kind = match column.sql_type {
            sql_type::BLOB => LobKind::Binary,
            sql_type::CLOB => LobKind::Text,
            other => {
                return Err(locator_error(
                    format!("{} column", sql_type::name(other)),
                    Some(&column.name),
                ));
            }
        };
        let short = || locator_error(format!("{} locator bytes", bytes.len()), Some(&column.name));

        let flag = *bytes.get(offset::FLAG).ok_or_else(short)?;
        let mut locator = LobLocator {
            flag,
            blob_id: u64_at(bytes, offset::BLOB_ID).ok_or_else(short)?,
            table_id: column.lob_table_id,
            column_id: column.lob_column_id,
            ..LobLocator::default()
        };
        let len = i32_at(bytes, offset::LEN).ok_or_else(short)?;

        let inline_at = if new_lob_flag {
            locator.group_id = i16_at(bytes, offset::GROUP_ID).ok_or_else(short)?;
            locator.file_id = i16_at(bytes, offset::FILE_ID).ok_or_else(short)?;
            locator.page_no = i32_at(bytes, offset::PAGE_NO).ok_or_else(short)?;
            locator.table_id = i32_at(bytes, offset::TABLE_ID).ok_or_else(short)?;
            locator.column_id = i16_at(bytes, offset::COLUMN_ID).ok_or_else(short)?;
            locator.row_id = u64_at(bytes, offset::ROW_ID).ok_or_else(short)?;
            locator.ex_group_id = i16_at(bytes, offset::EX_GROUP_ID).ok_or_else(short)?;
            locator.ex_file_id = i16_at(bytes, offset::EX_FILE_ID).ok_or_else(short)?;
            locator.ex_page_no = i32_at(bytes, offset::EX_PAGE_NO).ok_or_else(short)?;
            offset::EX_INLINE
        } else {
            if flag != IN_ROW {
                locator.group_id = i16_at(bytes, offset::GROUP_ID).ok_or_else(short)?;
                locator.file_id = i16_at(bytes, offset::FILE_ID).ok_or_else(short)?;
                locator.page_no = i32_at(bytes, offset::PAGE_NO).ok_or_else(short)?;
            }
            offset::INLINE
        };

        let inline = if flag == IN_ROW {
            let data = bytes
                .get(inline_at..inline_at + len.max(0) as usize)
                .ok_or_else(short)?;
            Some(data.to_vec())
        } else {
            None
        };
        Ok(Self {
            kind,
            locator,
            inline,
            length: (flag == IN_ROW && kind == LobKind::Binary).then_some(i64::from(len)),
        })
    }

    /// Wrap a locator obtained elsewhere; the value is treated as off-row.
    pub fn from_locator(kind: LobKind, locator: LobLocator) -> Self {
        Self {
            kind,
            locator,
            inline: None,
            length: None,
        }
    }

    pub fn kind(&self) -> LobKind {
        self.kind
    }

    pub fn locator(&self) -> &LobLocator {
        &self.locator
    }

    /// Whether the payload is held locally.
    pub fn is_inline(&self) -> bool {
        self.inline.is_some()
    }

    /// Length in bytes or characters.
    pub fn length(&mut self, conn: &mut Connection) -> Result<i64> {
        if let Some(len) = self.length {
            return Ok(len);
        }
        if let Some(data) = &self.inline {
            let len = match self.kind {
                LobKind::Binary => data.len(),
                LobKind::Text => conn.context().charset.decode(data)?.chars().count(),
            };
            let len = i64::try_from(len).unwrap_or(i64::MAX);
            self.length = Some(len);
            return Ok(len);
        }
        let message = Message::LobLength(LobLengthRequest {
            locator: &self.locator,
        });
        match conn.round_trip(&message)? {
            Response::LobLength(len) => {
                self.length = Some(len);
                Ok(len)
            }
            other => Err(other.unexpected("LOB length")),
        }
    }

    /// Read up to `len` units starting at `offset`, returning the raw
    /// bytes in the session character set for text values.
    pub fn read(&mut self, conn: &mut Connection, offset: usize, len: usize) -> Result<Vec<u8>> {
        let charset = conn.context().charset;
        if let Some(data) = &self.inline {
            return slice_inline(self.kind, data, offset, len, charset);
        }

        let mut out = Vec::new();
        let mut done = 0usize;
        while done < len {
            let want = (len - done).min(self.kind.read_limit());
            let message = Message::LobRead(LobReadRequest {
                locator: &self.locator,
                start: position(offset + done + 1)?,
                len: position(want)?,
            });
            let chunk = match conn.round_trip(&message)? {
                Response::LobChunk(chunk) => chunk,
                other => return Err(other.unexpected("LOB read")),
            };
            if let Some(cursor) = chunk.cursor {
                self.apply_cursor(cursor);
            }
            let units = match self.kind {
                LobKind::Binary => chunk.data.len(),
                LobKind::Text => charset.decode(&chunk.data)?.chars().count(),
            };
            out.extend_from_slice(&chunk.data);
            done += units;
            if chunk.read_over || units == 0 {
                break;
            }
        }
        tracing::trace!(blob_id = self.locator.blob_id, offset, units = done, "LOB read");
        Ok(out)
    }

    /// Read the whole value.
    pub fn read_to_end(&mut self, conn: &mut Connection) -> Result<Vec<u8>> {
        self.read(conn, 0, i32::MAX as usize)
    }

    /// Read `len` characters of a text value starting at `offset`.
    pub fn read_string(&mut self, conn: &mut Connection, offset: usize, len: usize) -> Result<String> {
        let bytes = self.read(conn, offset, len)?;
        conn.context().charset.decode(&bytes)
    }

    /// Overwrite binary content starting at byte `offset`. Returns the
    /// number of bytes the server stored.
    pub fn write(&mut self, conn: &mut Connection, offset: usize, data: &[u8]) -> Result<usize> {
        if self.kind == LobKind::Text {
            let text = conn.context().charset.decode(data)?;
            return self.write_text(conn, offset, &text);
        }
        let chunks: Vec<(&[u8], usize)> = if data.is_empty() {
            vec![(data, 0)]
        } else {
            data.chunks(LOB_WRITE_CHUNK).map(|c| (c, c.len())).collect()
        };
        self.write_chunks(conn, offset, &chunks)
    }

    /// Overwrite text starting at character `offset`. Chunks never split
    /// a character.
    pub fn write_text(&mut self, conn: &mut Connection, offset: usize, text: &str) -> Result<usize> {
        let charset = conn.context().charset;
        let mut encoded = Vec::new();
        let mut rest = text;
        loop {
            let split = rest
                .char_indices()
                .nth(LOB_WRITE_CHUNK)
                .map_or(rest.len(), |(i, _)| i);
            let (head, tail) = rest.split_at(split);
            encoded.push((charset.encode(head)?.into_owned(), head.chars().count()));
            rest = tail;
            if rest.is_empty() {
                break;
            }
        }
        let chunks: Vec<(&[u8], usize)> = encoded.iter().map(|(b, n)| (b.as_slice(), *n)).collect();
        self.write_chunks(conn, offset, &chunks)
    }

    fn write_chunks(&mut self, conn: &mut Connection, offset: usize, chunks: &[(&[u8], usize)]) -> Result<usize> {
        let last = chunks.len().saturating_sub(1);
        let mut start = offset + 1;
        let mut total = 0usize;
        for (i, &(data, units)) in chunks.iter().enumerate() {
            let mut flags = 0;
            if i == 0 {
                flags |= CHUNK_FIRST;
            }
            if i == last {
                flags |= CHUNK_LAST;
            }
            let message = Message::LobWrite(LobWriteRequest {
                locator: &self.locator,
                chunk_flags: flags,
                start: position(start)?,
                data,
            });
            let written = match conn.round_trip(&message)? {
                Response::LobWritten(written) => written,
                other => return Err(other.unexpected("LOB write")),
            };
            self.inline = None;
            self.length = None;
            self.locator.flag = OFF_ROW;
            self.locator.blob_id = written.blob_id;
            self.locator.file_id = written.file_id;
            self.locator.page_no = written.page_no;
            self.apply_cursor(written.cursor);
            if written.written <= 0 {
                break;
            }
            total += written.written as usize;
            start += units;
        }
        tracing::trace!(blob_id = self.locator.blob_id, offset, total, "LOB write");
        Ok(total)
    }

    /// Cut the value to `len` units.
    pub fn truncate(&mut self, conn: &mut Connection, len: usize) -> Result<i64> {
        let new_len = u32::try_from(len).map_err(|_| {
            Error::Type(TypeError {
                expected: "LOB length",
                actual: format!("{} is out of range", len),
                column: None,
            })
        })?;
        let message = Message::LobTruncate(LobTruncateRequest {
            locator: &self.locator,
            new_len,
        });
        let truncated = match conn.round_trip(&message)? {
            Response::LobTruncated(truncated) => truncated,
            other => return Err(other.unexpected("LOB truncate")),
        };
        self.locator.blob_id = truncated.blob_id;
        self.locator.reset_cursor();
        if let Some(data) = &mut self.inline {
            match self.kind {
                LobKind::Binary => data.truncate(len),
                LobKind::Text => {
                    let charset = conn.context().charset;
                    let text: String = charset.decode(data)?.chars().take(len).collect();
                    *data = charset.encode(&text)?.into_owned();
                }
            }
        }
        let len = i64::from(truncated.len);
        self.length = Some(len);
        Ok(len)
    }

    fn apply_cursor(&mut self, cursor: LobCursor) {
        self.locator.cur_file_id = cursor.cur_file_id;
        self.locator.cur_page_no = cursor.cur_page_no;
        self.locator.total_offset = cursor.total_offset;
    }
}

fn slice_inline(kind: LobKind, data: &[u8], offset: usize, len: usize, charset: Charset) -> Result<Vec<u8>> {
    match kind {
        LobKind::Binary => {
            let start = offset.min(data.len());
            let end = start.saturating_add(len).min(data.len());
            Ok(data[start..end].to_vec())
        }
        LobKind::Text => {
            let text: String = charset.decode(data)?.chars().skip(offset).take(len).collect();
            Ok(charset.encode(&text)?.into_owned())
        }
    }
}
