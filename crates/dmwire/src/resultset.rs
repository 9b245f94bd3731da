//! Result rows.
//!
//! The server sends rows either row by row with length-prefixed values
//! (the standard format) or column by column with null maps and packed
//! values (the block format). Both are read into [`RawRow`]s, which are
//! decoded against the column descriptors into [`Row`]s.

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use std::sync::Arc;

use dmwire_core::{ColumnInfo, Result, Row, Value};

use crate::protocol::ByteBuffer;
use crate::protocol::Charset;
use crate::protocol::message::protocol_error;
use crate::types::{Column, decode_value, sql_type};

/// Length marker of a NULL value.
const NULL_LEN: u16 = 0xFFFE;
/// Length marker announcing an i32 length.
const LONG_LEN: u16 = 0xFFFF;

/// One undecoded row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    /// Server row handle (row id or discriminator)
    pub handle: Option<Vec<u8>>,
    /// One entry per declared column, `None` for NULL
    pub values: Vec<Option<Vec<u8>>>,
}

impl RawRow {
    pub fn payload_len(&self) -> usize {
        self.handle.as_ref().map_or(0, Vec::len)
            + self.values.iter().flatten().map(Vec::len).sum::<usize>()
    }
}

/// Read a value preceded by a u16 length or one of its markers.
pub(crate) fn read_marked_value(frame: &mut ByteBuffer) -> Result<Option<Vec<u8>>> {
    let value = match frame.read_u16()? {
        NULL_LEN => None,
        LONG_LEN => Some(frame.read_i32_bytes()?.to_vec()),
        len => Some(frame.read_bytes(usize::from(len))?.to_vec()),
    };
    Ok(value)
}

/// Read `nrows` rows in the standard format.
pub fn read_standard_rows(frame: &mut ByteBuffer, nrows: usize, ncols: usize) -> Result<Vec<RawRow>> {
    if nrows > frame.remaining() {
        return Err(protocol_error(format!(
            "row count {} exceeds the {} bytes left in the reply",
            nrows,
            frame.remaining()
        )));
    }
    let mut rows = Vec::with_capacity(nrows);
    for _ in 0..nrows {
        frame.skip(2)?;
        let handle = frame.read_bytes(8)?.to_vec();
        frame.skip(2 * ncols)?;
        let mut values = Vec::with_capacity(ncols);
        for _ in 0..ncols {
            values.push(read_marked_value(frame)?);
        }
        rows.push(RawRow {
            handle: Some(handle),
            values,
        });
    }
    Ok(rows)
}

/// How a block-format value is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockWidth {
    Fixed(usize),
    /// i32 pad, i32 length, then length plus pad bytes
    Padded,
    /// i32 length, then the bytes
    Prefixed,
}

fn block_width(code: i32) -> BlockWidth {
    use sql_type::*;

    match code {
        INT | BIT | TINYINT | SMALLINT | BOOLEAN | NULL | REAL => BlockWidth::Fixed(4),
        BIGINT | DOUBLE => BlockWidth::Fixed(8),
        DATE | TIME | DATETIME | TIME_TZ | DATETIME_TZ | INTERVAL_YM => BlockWidth::Fixed(12),
        INTERVAL_DT => BlockWidth::Fixed(24),
        CHAR | VARCHAR2 | VARCHAR | BINARY | VARBINARY | BLOB | CLOB => BlockWidth::Padded,
        DECIMAL => BlockWidth::Prefixed,
        _ => BlockWidth::Fixed(0),
    }
}

fn read_len(frame: &mut ByteBuffer) -> Result<usize> {
    let len = frame.read_i32()?;
    usize::try_from(len).map_err(|_| protocol_error(format!("negative value length {}", len)))
}

fn read_block_value(frame: &mut ByteBuffer, code: i32) -> Result<Vec<u8>> {
    match block_width(code) {
        BlockWidth::Fixed(n) => Ok(frame.read_bytes(n)?.to_vec()),
        BlockWidth::Prefixed => {
            let len = read_len(frame)?;
            Ok(frame.read_bytes(len)?.to_vec())
        }
        BlockWidth::Padded => {
            let pad = read_len(frame)?;
            let len = read_len(frame)?;
            let mut bytes = frame.read_bytes(len + pad)?.to_vec();
            bytes[len..].fill(b' ');
            Ok(bytes)
        }
    }
}

/// Read one block of rows.
///
/// The block may carry one column more than declared; with a
/// non-negative `discriminator` that column is the row handle.
pub fn read_block_rows(frame: &mut ByteBuffer, declared: usize, discriminator: i16) -> Result<Vec<RawRow>> {
    let nrows = frame.read_u32()? as usize;
    let ncols = usize::from(frame.read_u16()?);
    frame.skip(4 + 4 + 1)?;

    let mut types = Vec::with_capacity(ncols);
    for _ in 0..ncols {
        types.push(i32::from(frame.read_u16()?));
    }
    frame.skip(4 * ncols)?;

    if nrows > frame.remaining() {
        return Err(protocol_error(format!(
            "block row count {} exceeds the {} bytes left in the reply",
            nrows,
            frame.remaining()
        )));
    }

    let disc = usize::try_from(discriminator).ok();
    let handle_column = disc.filter(|_| ncols == declared + 1);

    // slot 0 holds the handle, slots 1.. the declared columns
    let mut slots: Vec<Vec<Option<Vec<u8>>>> = vec![vec![None; declared + 1]; nrows];
    for (icol, code) in types.iter().copied().enumerate() {
        let slot = match handle_column {
            Some(d) if icol == d => 0,
            Some(d) if icol > d => icol,
            _ => icol + 1,
        };
        if slot > declared {
            return Err(protocol_error(format!(
                "block carries {} columns for {} declared",
                ncols, declared
            )));
        }

        let all_not_null = frame.read_i32()? == 1;
        let nulls = if all_not_null {
            None
        } else {
            let mut map = Vec::with_capacity(nrows);
            for _ in 0..nrows {
                map.push(frame.read_u8()? == 0);
            }
            Some(map)
        };

        for (irow, row) in slots.iter_mut().enumerate() {
            if nulls.as_ref().is_some_and(|n| n[irow]) {
                continue;
            }
            row[slot] = Some(read_block_value(frame, code)?);
        }
    }

    if let Some(d) = disc.filter(|_| handle_column.is_none()) {
        for row in &mut slots {
            row[0] = row.get(d + 1).cloned().flatten();
        }
    }

    Ok(slots
        .into_iter()
        .map(|mut row| {
            let handle = row[0].take();
            row.remove(0);
            RawRow {
                handle,
                values: row,
            }
        })
        .collect())
}

/// Decode raw rows against their column descriptors.
pub fn decode_rows(
    columns: &[Column],
    info: &Arc<ColumnInfo>,
    raw: Vec<RawRow>,
    charset: Charset,
) -> Result<Vec<Row>> {
    raw.into_iter()
        .map(|row| {
            let mut values = Vec::with_capacity(columns.len());
            for (col, data) in columns.iter().zip(row.values) {
                values.push(match data {
                    None => Value::Null,
                    Some(bytes) => decode_value(col, &bytes, charset)?,
                });
            }
            Ok(Row::with_columns(Arc::clone(info), values))
        })
        .collect()
}

/// Shared name lookup for a column list.
pub fn column_info(columns: &[Column]) -> Arc<ColumnInfo> {
    Arc::new(ColumnInfo::new(
        columns.iter().map(|c| c.name.clone()).collect(),
    ))
}

/// Rows of one query, possibly only the first page of them.
#[derive(Debug, Clone)]
pub struct ResultSet {
    columns: Arc<[Column]>,
    info: Arc<ColumnInfo>,
    rows: Vec<Row>,
    /// Total rows reported by the server; negative when unknown
    total_rows: i64,
    /// Rows received so far, the cursor position of the next fetch
    received: i64,
    id: i16,
}

impl ResultSet {
    pub fn new(columns: Arc<[Column]>, rows: Vec<Row>, total_rows: i64) -> Self {
        let info = column_info(&columns);
        let received = rows.len() as i64;
        Self {
            columns,
            info,
            rows,
            total_rows,
            received,
            id: 1,
        }
    }

    pub(crate) fn with_id(mut self, id: i16) -> Self {
        self.id = id;
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub(crate) fn column_arc(&self) -> Arc<[Column]> {
        Arc::clone(&self.columns)
    }

    pub fn column_info(&self) -> &Arc<ColumnInfo> {
        &self.info
    }

    /// Rows received so far.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total_rows(&self) -> i64 {
        self.total_rows
    }

    pub(crate) fn id(&self) -> i16 {
        self.id
    }

    pub(crate) fn received(&self) -> i64 {
        self.received
    }

    /// Whether the server holds rows not yet fetched.
    pub fn has_more(&self) -> bool {
        self.total_rows > self.received
    }

    /// Append a fetched page; returns how many rows it added.
    pub(crate) fn extend(&mut self, rows: Vec<Row>) -> usize {
        let n = rows.len();
        self.received += n as i64;
        self.rows.extend(rows);
        n
    }

    /// Mark the set complete; the server has nothing more to send.
    pub(crate) fn finish(&mut self) {
        self.total_rows = self.received;
    }

    /// Keep at most `limit` rows.
    pub(crate) fn truncate(&mut self, limit: usize) {
        self.rows.truncate(limit);
    }
}
