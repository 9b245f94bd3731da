//! Execution messages and the execute response.
//!
//! Execute and Execute2 carry a matrix of bound rows. PreExecute and
//! PutData stream off-row parameter data ahead of an execute. Fetch and
//! MoreResults page through result sets.

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use dmwire_core::{BatchFailure, Error, Result, TypeError};

use crate::resultset::{RawRow, read_block_rows, read_marked_value, read_standard_rows};
use crate::types::{Column, ParamIo, Parameter, sql_type};

use super::handshake::BLOCK_FORMAT_ON;
use super::message::{
    MessageContext, Request, Response, protocol_error, read_fixed_string, read_string,
};
use super::statement::{read_columns, reject_complex_columns};
use super::{ByteBuffer, MAX_INLINE_LEN, MessageCode, header, ret_code, ret_type};

mod offset {
    use super::header::FIELDS;

    pub const AUTOCOMMIT: usize = FIELDS;
    pub const PARAM_COUNT: usize = FIELDS + 1;
    pub const ONE: usize = FIELDS + 3;
    pub const ROW_COUNT: usize = FIELDS + 4;
    pub const CURSOR_ROW: usize = FIELDS + 12;
    pub const MAX_ROWS: usize = FIELDS + 20;
    pub const ONE_2: usize = FIELDS + 28;
    pub const CONTINUE_ON_ERROR: usize = FIELDS + 29;
    pub const RESERVED: usize = FIELDS + 30;
    pub const RESERVED_2: usize = FIELDS + 31;
    pub const TIMEOUT: usize = FIELDS + 32;
    pub const MAX_ERRORS: usize = FIELDS + 36;
    pub const INNER_EXEC: usize = FIELDS + 40;

    pub const R_RET_TYPE: usize = FIELDS;
    pub const R_COLUMNS: usize = FIELDS + 2;
    pub const R_UPDATE_COUNT: usize = FIELDS + 4;
    pub const R_OUT_PARAMS: usize = FIELDS + 12;
    pub const R_UPDATABLE: usize = FIELDS + 14;
    pub const R_ROW_COUNT: usize = FIELDS + 15;
    pub const R_PRINT_LEN: usize = FIELDS + 19;
    pub const R_BLOCK_FORMAT: usize = FIELDS + 23;
    pub const R_DISCRIMINATOR: usize = FIELDS + 24;
    pub const R_ROW_ID: usize = FIELDS + 23;
    /// Exec id, cache offset, flags and trx status
    pub const R_TAIL: usize = FIELDS + 31;

    pub const PRE_COUNT: usize = FIELDS;
    pub const PRE_RESERVED: usize = FIELDS + 2;

    pub const PUT_INDEX: usize = FIELDS;

    pub const F_CURSOR: usize = FIELDS;
    pub const F_COUNT: usize = FIELDS + 8;
    pub const F_RESULT_SET: usize = FIELDS + 16;
    pub const F_PREFETCH: usize = FIELDS + 18;
    pub const FR_UPDATE_COUNT: usize = FIELDS;
    pub const FR_ROW_COUNT: usize = FIELDS + 8;

    pub const MORE_RESULT_SET: usize = FIELDS;
}

/// Wire marker of a NULL parameter value.
const NULL_MARKER: u16 = 0xFFFE;

/// Response flag: per-row update counts follow.
const FLAG_UPDATE_COUNTS: u8 = 0x01;
/// Response flag: generated ids follow.
const FLAG_GENERATED_IDS: u8 = 0x02;

/// Bounds for the fetch buffer hint.
const PREFETCH_MIN: i32 = 32;
const PREFETCH_MAX: i32 = 65536;

/// Type and direction announced for one parameter column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindType {
    pub io: ParamIo,
    pub sql_type: i32,
    pub precision: i32,
    pub scale: i32,
}

impl BindType {
    pub fn from_parameter(param: &Parameter) -> Self {
        Self {
            io: param.io,
            sql_type: param.sql_type,
            precision: param.precision,
            scale: param.scale,
        }
    }

    fn write(&self, frame: &mut ByteBuffer) {
        // cursor parameters are always announced as in/out
        let io = if self.sql_type == sql_type::CURSOR && self.io == ParamIo::Out {
            ParamIo::InOut
        } else {
            self.io
        };
        frame.write_u8(io.to_wire());
        frame.write_i32(self.sql_type);
        frame.write_i32(self.precision);
        frame.write_i32(self.scale);
    }
}

/// Payload of one parameter in one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindData {
    Null,
    Inline(Vec<u8>),
    /// Already streamed with PutData
    OffRow,
}

/// Caller-side binding mistakes; nothing has been sent yet.
fn bind_error(expected: &'static str, actual: String) -> Error {
    Error::Type(TypeError {
        expected,
        actual,
        column: None,
    })
}

fn write_bind_data(frame: &mut ByteBuffer, data: &BindData) -> Result<()> {
    match data {
        BindData::Null => frame.write_u16(NULL_MARKER),
        BindData::OffRow => frame.write_i16(0),
        BindData::Inline(bytes) => {
            if bytes.len() > MAX_INLINE_LEN {
                return Err(bind_error(
                    "inline value of at most 65535 bytes",
                    format!("{} bytes", bytes.len()),
                ));
            }
            frame.write_u16_bytes(bytes)?;
        }
    }
    Ok(())
}

/// Run a prepared statement over one or more rows of bound values.
#[derive(Debug, Clone)]
pub struct ExecuteRequest<'a> {
    pub stmt_id: i32,
    pub params: &'a [Parameter],
    /// One entry per parameter
    pub types: &'a [BindType],
    /// One entry per parameter per row; output-only entries are skipped
    pub rows: &'a [Vec<BindData>],
    /// Columns from prepare, used when the reply does not resend them
    pub columns: &'a [Column],
    pub read_base_col_name: bool,
    pub max_rows: i64,
}

impl Request for ExecuteRequest<'_> {
    fn code(&self, ctx: &MessageContext) -> MessageCode {
        if ctx.features.execute2 {
            MessageCode::Execute2
        } else {
            MessageCode::Execute
        }
    }

    fn stmt_id(&self) -> i32 {
        self.stmt_id
    }

    fn write_header(&self, frame: &mut ByteBuffer, ctx: &MessageContext) -> Result<()> {
        let param_count = u16::try_from(self.types.len())
            .map_err(|_| bind_error("at most 65535 parameters", self.types.len().to_string()))?;
        let max_rows = if self.max_rows <= 0 { i64::MAX } else { self.max_rows };
        let timeout = if ctx.query_timeout == 0 { -1 } else { ctx.query_timeout };

        frame.put_u8_at(offset::AUTOCOMMIT, u8::from(ctx.autocommit))?;
        frame.put_u16_at(offset::PARAM_COUNT, param_count)?;
        frame.put_u8_at(offset::ONE, 1)?;
        frame.put_i64_at(offset::ROW_COUNT, self.rows.len() as i64)?;
        frame.put_i64_at(offset::CURSOR_ROW, 0)?;
        frame.put_i64_at(offset::MAX_ROWS, max_rows)?;
        frame.put_u8_at(offset::ONE_2, 1)?;
        frame.put_u8_at(
            offset::CONTINUE_ON_ERROR,
            u8::from(ctx.continue_batch_on_error),
        )?;
        frame.put_u8_at(offset::RESERVED, 0)?;
        frame.put_u8_at(offset::RESERVED_2, 0)?;
        frame.put_i32_at(offset::TIMEOUT, timeout)?;
        frame.put_i32_at(offset::MAX_ERRORS, ctx.batch_allow_max_errors)?;
        frame.put_u8_at(offset::INNER_EXEC, 0)?;
        Ok(())
    }

    fn write_body(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<()> {
        for ty in self.types {
            ty.write(frame);
        }
        for row in self.rows {
            if row.len() != self.types.len() {
                return Err(bind_error(
                    "one value per parameter",
                    format!("{} values for {} parameters", row.len(), self.types.len()),
                ));
            }
            for (ty, data) in self.types.iter().zip(row) {
                if ty.io.is_input() {
                    write_bind_data(frame, data)?;
                }
            }
        }
        Ok(())
    }

    fn read_response(&self, frame: &mut ByteBuffer, ctx: &MessageContext) -> Result<Response> {
        let info = read_execute_response(frame, ctx, self.params, self.columns, self.read_base_col_name)?;
        Ok(Response::Executed(Box::new(info)))
    }
}

/// Session attribute changed by the executed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    TimeZone(i16),
    Isolation { level: i32, read_only: bool },
    Schema(String),
    /// Date/time format; `kind` is the statement kind that set it
    Format { kind: i16, value: String },
    DateLanguage(u8),
}

/// Decoded execute response.
#[derive(Debug, Clone, Default)]
pub struct ExecuteInfo {
    pub ret_type: i16,
    /// Header return code; positive codes flag partial batch failure
    pub ret_code: i32,
    pub update_count: i64,
    /// Per-row counts of a batch, when the server sends them
    pub update_counts: Vec<i64>,
    pub row_count: i64,
    pub updatable: bool,
    pub row_id: i64,
    pub exec_id: i32,
    pub cache_offset: i32,
    pub trx_status: i32,
    pub print: Option<String>,
    /// Indexed like the statement's parameters; only output slots are filled
    pub out_params: Vec<Option<Vec<u8>>>,
    /// Columns resent by the server
    pub columns: Option<Vec<Column>>,
    pub has_result_set: bool,
    pub block_format: bool,
    pub rows: Vec<RawRow>,
    /// Reply bytes occupied by the rows
    pub rows_size: usize,
    pub table_ids: Vec<i32>,
    pub table_timestamps: Vec<i64>,
    pub last_insert_id: Option<i64>,
    pub explain: Option<String>,
    pub session: Option<SessionUpdate>,
    pub batch_failures: Vec<BatchFailure>,
}

/// Decode the reply to Execute, Execute2, MoreResults or an exec-direct
/// Prepare.
pub fn read_execute_response(
    frame: &mut ByteBuffer,
    ctx: &MessageContext,
    params: &[Parameter],
    known_columns: &[Column],
    read_base_col_name: bool,
) -> Result<ExecuteInfo> {
    let ret = frame.get_i16_at(offset::R_RET_TYPE)?;
    let column_count = usize::from(frame.get_u16_at(offset::R_COLUMNS)?);
    let out_count = usize::from(frame.get_u16_at(offset::R_OUT_PARAMS)?);
    let row_count = frame.get_i32_at(offset::R_ROW_COUNT)?;
    let print_len = frame.get_i32_at(offset::R_PRINT_LEN)?;
    let mut info = ExecuteInfo {
        ret_type: ret,
        ret_code: frame.get_i32_at(header::RET_CODE)?,
        update_count: frame.get_i64_at(offset::R_UPDATE_COUNT)?,
        row_count: i64::from(row_count),
        updatable: frame.get_u8_at(offset::R_UPDATABLE)? != 0,
        ..ExecuteInfo::default()
    };

    let returns_rows = ret == ret_type::SELECT || ret == ret_type::PROCEDURE;
    let mut discriminator = -1;
    if returns_rows {
        info.block_format = frame.get_u8_at(offset::R_BLOCK_FORMAT)? == BLOCK_FORMAT_ON;
        discriminator = frame.get_i16_at(offset::R_DISCRIMINATOR)?;
    } else {
        info.row_id = frame.get_i64_at(offset::R_ROW_ID)?;
    }
    let tail = offset::R_TAIL;
    info.exec_id = frame.get_i32_at(tail)?;
    info.cache_offset = frame.get_i32_at(tail + 4)?;
    let flags = frame.get_u8_at(tail + 8)?;
    info.trx_status = frame.get_i32_at(tail + 9)?;

    if print_len > 0 {
        info.print = Some(read_fixed_string(frame, print_len as usize, ctx.charset)?);
    }
    if out_count > 0 {
        info.out_params = read_out_params(frame, out_count, params)?;
    }

    match ret {
        ret_type::SET_TIMEZONE => {
            info.session = Some(SessionUpdate::TimeZone(frame.read_i16()?));
        }
        ret_type::SELECT | ret_type::PROCEDURE => {
            info.has_result_set = ret == ret_type::SELECT || column_count > 0 || row_count > 0;
            if column_count > 0 {
                let columns = read_columns(frame, column_count, read_base_col_name, ctx.charset)?;
                reject_complex_columns(&columns)?;
                info.columns = Some(columns);
            }
            let ncols = info.columns.as_deref().unwrap_or(known_columns).len();
            read_result_rows(frame, &mut info, ncols, row_count, discriminator)?;
        }
        ret_type::SET_ISOLATION => {
            let level = i32::from(frame.read_i16()?);
            let read_only = frame.read_u8()? == 1;
            info.session = Some(SessionUpdate::Isolation { level, read_only });
        }
        ret_type::SET_SCHEMA => {
            info.session = Some(SessionUpdate::Schema(read_string(frame, ctx.charset)?));
        }
        ret_type::EXPLAIN => {
            info.explain = Some(read_string(frame, ctx.charset)?);
        }
        ret_type::INSERT | ret_type::DELETE | ret_type::UPDATE => {
            read_dml_tail(frame, &mut info, flags, ctx)?;
        }
        ret_type::DATE_FORMAT..=ret_type::TIMESTAMP_TZ_FORMAT => {
            let len = usize::from(frame.read_u8()?);
            let value = read_fixed_string(frame, len, ctx.charset)?;
            info.session = Some(SessionUpdate::Format { kind: ret, value });
        }
        ret_type::DATE_LANGUAGE => {
            info.session = Some(SessionUpdate::DateLanguage(frame.read_u8()?));
        }
        _ => {}
    }
    Ok(info)
}

/// Output values are listed in parameter order, output slots only.
fn read_out_params(frame: &mut ByteBuffer, count: usize, params: &[Parameter]) -> Result<Vec<Option<Vec<u8>>>> {
    let slots: Vec<usize> = params
        .iter()
        .enumerate()
        .filter(|(_, p)| p.io != ParamIo::In)
        .map(|(i, _)| i)
        .collect();
    if count > slots.len() {
        return Err(protocol_error(format!(
            "{} output values for {} output parameters",
            count,
            slots.len()
        )));
    }
    let mut out = vec![None; params.len()];
    for slot in slots.into_iter().take(count) {
        out[slot] = read_marked_value(frame)?;
    }
    Ok(out)
}

fn read_result_rows(
    frame: &mut ByteBuffer,
    info: &mut ExecuteInfo,
    ncols: usize,
    row_count: i32,
    discriminator: i16,
) -> Result<()> {
    if row_count > 0 {
        let start = frame.position();
        info.rows = if info.block_format {
            read_block_rows(frame, ncols, discriminator)?
        } else {
            read_standard_rows(frame, row_count as usize, ncols)?
        };
        info.rows_size = frame.position() - start;
    }
    if info.cache_offset > 0 {
        let count = frame.read_i16()?.max(0) as usize;
        for _ in 0..count {
            info.table_ids.push(frame.read_i32()?);
            info.table_timestamps.push(frame.read_i64()?);
        }
    }
    Ok(())
}

fn read_dml_tail(frame: &mut ByteBuffer, info: &mut ExecuteInfo, flags: u8, ctx: &MessageContext) -> Result<()> {
    if flags & FLAG_UPDATE_COUNTS != 0 {
        let n = frame.read_i32()?.max(0) as usize;
        for _ in 0..n {
            info.update_counts.push(frame.read_i64()?);
        }
    }
    if flags & FLAG_GENERATED_IDS != 0 {
        let n = frame.read_i32()?.max(0);
        let mut last = None;
        for _ in 0..n {
            last = Some(frame.read_i64()?);
        }
        info.last_insert_id = last;
    } else if info.update_count == 1 {
        info.last_insert_id = Some(info.row_id);
    }
    if info.ret_code == ret_code::BATCH_WITH_ERROR {
        info.batch_failures = read_batch_errors(frame, &mut info.update_counts, ctx)?;
    }
    Ok(())
}

/// Count entry for a row the server rejected inside a batch.
pub const ROW_FAILED_IN_BATCH: i64 = -3;

fn read_batch_errors(
    frame: &mut ByteBuffer,
    counts: &mut [i64],
    ctx: &MessageContext,
) -> Result<Vec<BatchFailure>> {
    frame.skip(4)?;
    let n = frame.read_i32()?.max(0);
    let mut failures = Vec::new();
    for _ in 0..n {
        let irow = frame.read_i32()?;
        let code = frame.read_i32()?;
        let message = super::message::read_short_string(frame, ctx.charset)?;
        let index = usize::try_from(irow)
            .ok()
            .filter(|&i| i < counts.len() || counts.is_empty())
            .ok_or_else(|| protocol_error(format!("batch error names row {}", irow)))?;
        if let Some(count) = counts.get_mut(index) {
            *count = ROW_FAILED_IN_BATCH;
        }
        failures.push(BatchFailure {
            row: index + 1,
            code,
            message,
        });
    }
    Ok(failures)
}

/// Announce parameter types ahead of off-row data for one row.
#[derive(Debug, Clone)]
pub struct PreExecuteRequest<'a> {
    pub stmt_id: i32,
    pub types: &'a [BindType],
}

impl Request for PreExecuteRequest<'_> {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::PreExecute
    }

    fn stmt_id(&self) -> i32 {
        self.stmt_id
    }

    fn write_header(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<()> {
        let count = i16::try_from(self.types.len())
            .map_err(|_| bind_error("at most 32767 parameters", self.types.len().to_string()))?;
        frame.put_i16_at(offset::PRE_COUNT, count)?;
        frame.put_u8_at(offset::PRE_RESERVED, 0)?;
        Ok(())
    }

    fn write_body(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<()> {
        for ty in self.types {
            ty.write(frame);
        }
        Ok(())
    }

    fn read_response(&self, _frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<Response> {
        Ok(Response::Ack)
    }
}

/// One chunk of off-row data for a parameter.
///
/// Unlike LOB writes, chunks carry no first/last flags: the server
/// appends them in order until the execute request arrives.
#[derive(Debug, Clone)]
pub struct PutDataRequest<'a> {
    pub stmt_id: i32,
    pub param_index: i16,
    pub data: &'a [u8],
}

impl Request for PutDataRequest<'_> {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::PutData
    }

    fn stmt_id(&self) -> i32 {
        self.stmt_id
    }

    fn write_header(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<()> {
        frame.put_i16_at(offset::PUT_INDEX, self.param_index)?;
        Ok(())
    }

    fn write_body(&self, frame: &mut ByteBuffer, ctx: &MessageContext) -> Result<()> {
        let len = i32::try_from(self.data.len())
            .map_err(|_| bind_error("off-row chunk below 2 GiB", self.data.len().to_string()))?;
        frame.write_i32(len);
        if ctx.new_lob_flag {
            frame.write_i32(-1);
        }
        frame.write_bytes(self.data);
        Ok(())
    }

    fn read_response(&self, _frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<Response> {
        Ok(Response::Ack)
    }
}

/// Ask for `count` rows starting at row `cursor`.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub stmt_id: i32,
    pub cursor: i64,
    pub count: i64,
    pub result_set_id: i16,
    pub columns: &'a [Column],
    pub block_format: bool,
    /// Estimated bytes per row; zero when unknown
    pub row_size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FetchInfo {
    pub update_count: i64,
    pub rows: Vec<RawRow>,
}

impl Request for FetchRequest<'_> {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::Fetch
    }

    fn stmt_id(&self) -> i32 {
        self.stmt_id
    }

    fn write_header(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<()> {
        frame.put_i64_at(offset::F_CURSOR, self.cursor)?;
        frame.put_i64_at(offset::F_COUNT, self.count)?;
        frame.put_i16_at(offset::F_RESULT_SET, self.result_set_id)?;
        if self.row_size > 0 && self.count > 0 {
            let wanted = (self.row_size as i64).saturating_mul(self.count);
            let hint = wanted.clamp(i64::from(PREFETCH_MIN), i64::from(PREFETCH_MAX)) as i32;
            frame.put_i32_at(offset::F_PREFETCH, hint)?;
        }
        Ok(())
    }

    fn read_response(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<Response> {
        let update_count = frame.get_i64_at(offset::FR_UPDATE_COUNT)?;
        let row_count = frame.get_i32_at(offset::FR_ROW_COUNT)?;
        let rows = if row_count <= 0 {
            Vec::new()
        } else if self.block_format {
            read_block_rows(frame, self.columns.len(), -1)?
        } else {
            read_standard_rows(frame, row_count as usize, self.columns.len())?
        };
        Ok(Response::Fetched(FetchInfo { update_count, rows }))
    }
}

/// Advance a statement to its next result set.
#[derive(Debug, Clone)]
pub struct MoreResultsRequest<'a> {
    pub stmt_id: i32,
    pub result_set_id: i16,
    pub params: &'a [Parameter],
    pub read_base_col_name: bool,
}

impl Request for MoreResultsRequest<'_> {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::MoreResults
    }

    fn stmt_id(&self) -> i32 {
        self.stmt_id
    }

    fn write_header(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<()> {
        frame.put_i16_at(offset::MORE_RESULT_SET, self.result_set_id)?;
        Ok(())
    }

    fn read_response(&self, frame: &mut ByteBuffer, ctx: &MessageContext) -> Result<Response> {
        let info = read_execute_response(frame, ctx, self.params, &[], self.read_base_col_name)?;
        Ok(Response::Executed(Box::new(info)))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Reply header fields of an execute response.
    #[derive(Debug, Clone, Default)]
    pub struct ExecuteReply {
        pub ret_code: i32,
        pub ret_type: i16,
        pub columns: u16,
        pub update_count: i64,
        pub out_params: u16,
        pub row_count: i32,
        pub print_len: i32,
        pub block_format: bool,
        pub row_id: i64,
        pub cache_offset: i32,
        pub flags: u8,
        pub trx_status: i32,
    }

    impl ExecuteReply {
        pub fn frame(&self, code: MessageCode) -> ByteBuffer {
            let mut frame = crate::protocol::message::testing::reply_frame(code, self.ret_code);
            frame.put_i16_at(offset::R_RET_TYPE, self.ret_type).unwrap();
            frame.put_u16_at(offset::R_COLUMNS, self.columns).unwrap();
            frame.put_i64_at(offset::R_UPDATE_COUNT, self.update_count).unwrap();
            frame.put_u16_at(offset::R_OUT_PARAMS, self.out_params).unwrap();
            frame.put_i32_at(offset::R_ROW_COUNT, self.row_count).unwrap();
            frame.put_i32_at(offset::R_PRINT_LEN, self.print_len).unwrap();
            if self.ret_type == ret_type::SELECT || self.ret_type == ret_type::PROCEDURE {
                let format = if self.block_format { BLOCK_FORMAT_ON } else { 0 };
                frame.put_u8_at(offset::R_BLOCK_FORMAT, format).unwrap();
                frame.put_i16_at(offset::R_DISCRIMINATOR, -1).unwrap();
            } else {
                frame.put_i64_at(offset::R_ROW_ID, self.row_id).unwrap();
            }
            let tail = offset::R_TAIL;
            frame.put_i32_at(tail + 4, self.cache_offset).unwrap();
            frame.put_u8_at(tail + 8, self.flags).unwrap();
            frame.put_i32_at(tail + 9, self.trx_status).unwrap();
            frame
        }
    }

    /// DML reply carrying per-row counts.
    pub fn dml_reply(code: MessageCode, counts: &[i64]) -> ByteBuffer {
        let mut frame = ExecuteReply {
            ret_type: ret_type::INSERT,
            update_count: counts.iter().filter(|c| **c > 0).sum(),
            flags: FLAG_UPDATE_COUNTS,
            ..ExecuteReply::default()
        }
        .frame(code);
        frame.write_i32(counts.len() as i32);
        for c in counts {
            frame.write_i64(*c);
        }
        frame
    }

    /// Batch error list entries of (zero-based row, code, message).
    pub fn write_batch_errors(frame: &mut ByteBuffer, errors: &[(i32, i32, &str)]) {
        frame.write_i32(0);
        frame.write_i32(errors.len() as i32);
        for (row, code, message) in errors {
            frame.write_i32(*row);
            frame.write_i32(*code);
            frame.write_u16_bytes(message.as_bytes()).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::protocol::message::testing::ScriptedIo;
    use crate::protocol::message::{Message, exchange};
    use crate::protocol::statement::testing::write_column;
    use crate::protocol::{Charset, HEADER_LEN};
    use crate::resultset::testing::write_standard_rows;
    use crate::version::FeatureSet;

    fn ctx() -> MessageContext {
        MessageContext {
            charset: Charset::Utf8,
            ..MessageContext::default()
        }
    }

    fn int_type(io: ParamIo) -> BindType {
        BindType {
            io,
            sql_type: sql_type::INT,
            precision: 4,
            scale: 0,
        }
    }

    fn executed(response: Response) -> ExecuteInfo {
        match response {
            Response::Executed(info) => *info,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_execute_request_body() {
        let types = [int_type(ParamIo::In), int_type(ParamIo::Out), int_type(ParamIo::In)];
        let rows = vec![vec![
            BindData::Inline(vec![1, 0, 0, 0]),
            BindData::Null,
            BindData::Null,
        ]];
        let request = ExecuteRequest {
            stmt_id: 3,
            params: &[],
            types: &types,
            rows: &rows,
            columns: &[],
            read_base_col_name: false,
            max_rows: 0,
        };
        let frame = Message::Execute(request).encode(&ctx()).unwrap();
        assert_eq!(frame.get_i16_at(header::CODE).unwrap(), MessageCode::Execute.as_i16());
        assert_eq!(frame.get_u16_at(offset::PARAM_COUNT).unwrap(), 3);
        assert_eq!(frame.get_i64_at(offset::ROW_COUNT).unwrap(), 1);
        assert_eq!(frame.get_i32_at(offset::TIMEOUT).unwrap(), -1);

        let mut body = ByteBuffer::from_vec(frame.as_slice()[HEADER_LEN..].to_vec());
        body.skip(3 * 13).unwrap();
        assert_eq!(body.read_u16_bytes().unwrap(), &[1, 0, 0, 0]);
        // the output parameter carries no data
        assert_eq!(body.read_u16().unwrap(), NULL_MARKER);
        assert_eq!(body.remaining(), 0);
    }

    #[test]
    fn test_execute2_on_newer_servers() {
        let ctx = MessageContext {
            features: FeatureSet {
                execute2: true,
                ..FeatureSet::default()
            },
            ..ctx()
        };
        let request = ExecuteRequest {
            stmt_id: 1,
            params: &[],
            types: &[],
            rows: &[],
            columns: &[],
            read_base_col_name: false,
            max_rows: 0,
        };
        assert_eq!(Message::Execute(request).code(&ctx), MessageCode::Execute2);
    }

    #[test]
    fn test_oversized_inline_value_rejected() {
        let types = [int_type(ParamIo::In)];
        let rows = vec![vec![BindData::Inline(vec![0; MAX_INLINE_LEN + 1])]];
        let request = ExecuteRequest {
            stmt_id: 1,
            params: &[],
            types: &types,
            rows: &rows,
            columns: &[],
            read_base_col_name: false,
            max_rows: 0,
        };
        assert!(Message::Execute(request).encode(&ctx()).is_err());
    }

    #[test]
    fn test_select_response_with_columns_and_rows() {
        let mut reply = ExecuteReply {
            ret_type: ret_type::SELECT,
            columns: 1,
            update_count: 2,
            row_count: 2,
            cache_offset: 1,
            ..ExecuteReply::default()
        }
        .frame(MessageCode::Execute);
        write_column(&mut reply, "NAME", sql_type::VARCHAR, 10, false);
        write_standard_rows(&mut reply, &[vec![Some(&b"a"[..])], vec![None]]);
        reply.write_i16(1);
        reply.write_i32(1001);
        reply.write_i64(77);

        let mut io = ScriptedIo::default().reply(reply);
        let request = ExecuteRequest {
            stmt_id: 1,
            params: &[],
            types: &[],
            rows: &[vec![]],
            columns: &[],
            read_base_col_name: false,
            max_rows: 0,
        };
        let info = executed(exchange(&mut io, &ctx(), &Message::Execute(request)).unwrap());
        assert!(info.has_result_set);
        assert_eq!(info.columns.as_ref().map(Vec::len), Some(1));
        assert_eq!(info.rows.len(), 2);
        assert_eq!(info.rows[1].values, vec![None]);
        assert!(info.rows_size > 0);
        assert_eq!(info.table_ids, vec![1001]);
        assert_eq!(info.table_timestamps, vec![77]);
    }

    #[test]
    fn test_dml_response_with_print_and_out_params() {
        let params = [
            Parameter {
                io: ParamIo::In,
                ..Parameter::default()
            },
            Parameter {
                io: ParamIo::Out,
                ..Parameter::default()
            },
        ];
        let mut reply = ExecuteReply {
            ret_type: ret_type::UPDATE,
            update_count: 1,
            out_params: 1,
            print_len: 5,
            row_id: 42,
            ..ExecuteReply::default()
        }
        .frame(MessageCode::Execute);
        reply.write_bytes(b"hello");
        reply.write_u16_bytes(&[9, 0, 0, 0]).unwrap();

        let mut io = ScriptedIo::default().reply(reply);
        let request = ExecuteRequest {
            stmt_id: 1,
            params: &params,
            types: &[],
            rows: &[],
            columns: &[],
            read_base_col_name: false,
            max_rows: 0,
        };
        let info = executed(exchange(&mut io, &ctx(), &Message::Execute(request)).unwrap());
        assert_eq!(info.print.as_deref(), Some("hello"));
        assert_eq!(info.out_params, vec![None, Some(vec![9, 0, 0, 0])]);
        assert_eq!(info.row_id, 42);
        assert_eq!(info.last_insert_id, Some(42));
    }

    #[test]
    fn test_batch_error_list_marks_rows() {
        let mut reply = dml_reply(MessageCode::Execute, &[1, 1, 1, 1, 1]);
        reply.put_i32_at(header::RET_CODE, ret_code::BATCH_WITH_ERROR).unwrap();
        write_batch_errors(&mut reply, &[(2, -6602, "unique violated")]);

        let mut io = ScriptedIo::default().reply(reply);
        let request = ExecuteRequest {
            stmt_id: 1,
            params: &[],
            types: &[],
            rows: &[],
            columns: &[],
            read_base_col_name: false,
            max_rows: 0,
        };
        let info = executed(exchange(&mut io, &ctx(), &Message::Execute(request)).unwrap());
        assert_eq!(info.update_counts, vec![1, 1, ROW_FAILED_IN_BATCH, 1, 1]);
        assert_eq!(info.batch_failures.len(), 1);
        assert_eq!(info.batch_failures[0].row, 3);
        assert_eq!(info.batch_failures[0].code, -6602);
    }

    #[test]
    fn test_set_schema_and_isolation_updates() {
        let mut reply = ExecuteReply {
            ret_type: ret_type::SET_SCHEMA,
            ..ExecuteReply::default()
        }
        .frame(MessageCode::Execute);
        reply.write_i32_bytes(b"APP").unwrap();
        let mut io = ScriptedIo::default().reply(reply);
        let info = read_with(&mut io);
        assert_eq!(info.session, Some(SessionUpdate::Schema("APP".into())));

        let mut reply = ExecuteReply {
            ret_type: ret_type::SET_ISOLATION,
            ..ExecuteReply::default()
        }
        .frame(MessageCode::Execute);
        reply.write_i16(3);
        reply.write_u8(1);
        let mut io = ScriptedIo::default().reply(reply);
        let info = read_with(&mut io);
        assert_eq!(
            info.session,
            Some(SessionUpdate::Isolation {
                level: 3,
                read_only: true
            })
        );
    }

    fn read_with(io: &mut ScriptedIo) -> ExecuteInfo {
        let request = MoreResultsRequest {
            stmt_id: 1,
            result_set_id: 2,
            params: &[],
            read_base_col_name: false,
        };
        executed(exchange(io, &ctx(), &Message::MoreResults(request)).unwrap())
    }

    #[test]
    fn test_fetch_prefetch_hint_and_rows() {
        let mut reply = crate::protocol::message::testing::reply_frame(MessageCode::Fetch, 0);
        reply.put_i64_at(offset::FR_UPDATE_COUNT, 10).unwrap();
        reply.put_i32_at(offset::FR_ROW_COUNT, 1).unwrap();
        write_standard_rows(&mut reply, &[vec![Some(&b"x"[..])]]);

        let columns = [Column::default()];
        let request = FetchRequest {
            stmt_id: 4,
            cursor: 5,
            count: 100,
            result_set_id: 1,
            columns: &columns,
            block_format: false,
            row_size: 1000,
        };
        let mut io = ScriptedIo::default().reply(reply);
        let Response::Fetched(info) = exchange(&mut io, &ctx(), &Message::Fetch(request)).unwrap() else {
            panic!("wrong response kind");
        };
        assert_eq!(info.update_count, 10);
        assert_eq!(info.rows.len(), 1);
        let sent = &io.sent[0];
        assert_eq!(sent.get_i64_at(offset::F_CURSOR).unwrap(), 5);
        assert_eq!(sent.get_i32_at(offset::F_PREFETCH).unwrap(), PREFETCH_MAX);
    }

    #[test]
    fn test_put_data_with_new_lob_flag() {
        let ctx = MessageContext {
            new_lob_flag: true,
            ..ctx()
        };
        let request = PutDataRequest {
            stmt_id: 2,
            param_index: 1,
            data: b"abc",
        };
        let frame = Message::PutData(request).encode(&ctx).unwrap();
        assert_eq!(frame.get_i16_at(offset::PUT_INDEX).unwrap(), 1);
        let mut body = ByteBuffer::from_vec(frame.as_slice()[HEADER_LEN..].to_vec());
        assert_eq!(body.read_i32().unwrap(), 3);
        assert_eq!(body.read_i32().unwrap(), -1);
        assert_eq!(body.read_bytes(3).unwrap(), b"abc");
    }
}
