//! Statement lifecycle messages: allocate, prepare, free, cursor name.

#![allow(clippy::cast_sign_loss)]

use dmwire_core::{Error, Result, TypeError};

use crate::types::{Column, ComplexKind, ParamIo, Parameter, item_flag};

use super::execute::read_execute_response;
use super::handshake::BLOCK_FORMAT_ON;
use super::message::{MessageContext, Request, Response, read_fixed_string, read_short_string};
use super::{ByteBuffer, Charset, MessageCode, header};

mod offset {
    use super::header::FIELDS;

    pub const AUTOCOMMIT: usize = FIELDS;
    pub const EXEC_DIRECT: usize = FIELDS + 1;
    pub const RESERVED: usize = FIELDS + 2;
    pub const ONE: usize = FIELDS + 3;
    pub const NATIVE_MODE: usize = FIELDS + 4;
    pub const EXEC_TYPE: usize = FIELDS + 5;
    pub const MAX_ROWS: usize = FIELDS + 7;
    pub const BLOCK_FORMAT: usize = FIELDS + 15;
    pub const RESERVED_2: usize = FIELDS + 16;
    pub const ONE_2: usize = FIELDS + 18;
    pub const RESERVED_3: usize = FIELDS + 19;
    pub const RESERVED_4: usize = FIELDS + 20;
    pub const TIMEOUT: usize = FIELDS + 21;
    pub const INNER_EXEC: usize = FIELDS + 25;

    pub const R_RET_TYPE: usize = FIELDS;
    pub const R_PARAMS: usize = FIELDS + 2;
    pub const R_COLUMNS: usize = FIELDS + 4;
    pub const R_TRX: usize = FIELDS + 14;

    pub const READ_BASE_NAME: usize = FIELDS;
}

/// Ask the server for a new statement handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocStatementRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedStatement {
    pub stmt_id: i32,
    /// Column descriptors will carry the underlying column name
    pub read_base_col_name: bool,
}

impl Request for AllocStatementRequest {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::AllocStatement
    }

    fn write_header(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<()> {
        frame.put_u8_at(header::FIELDS, 1)?;
        Ok(())
    }

    fn read_response(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<Response> {
        Ok(Response::Allocated(AllocatedStatement {
            stmt_id: frame.get_i32_at(header::STMT_ID)?,
            read_base_col_name: frame.get_u8_at(offset::READ_BASE_NAME)? == 1,
        }))
    }
}

/// Release a server statement handle.
#[derive(Debug, Clone, Copy)]
pub struct FreeStatementRequest {
    pub stmt_id: i32,
}

impl Request for FreeStatementRequest {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::FreeStatement
    }

    fn stmt_id(&self) -> i32 {
        self.stmt_id
    }

    fn read_response(&self, _frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<Response> {
        Ok(Response::Ack)
    }
}

/// Prepare a statement, or with `exec_direct` prepare and run it at once.
#[derive(Debug, Clone)]
pub struct PrepareRequest<'a> {
    pub stmt_id: i32,
    pub sql: &'a str,
    pub exec_direct: bool,
    /// Statement row limit; zero or less means unlimited
    pub max_rows: i64,
    pub read_base_col_name: bool,
    /// Result caching needs every row, so the limit is lifted
    pub cache_results: bool,
}

/// Descriptors of a prepared statement.
#[derive(Debug, Clone, Default)]
pub struct PrepareInfo {
    pub ret_type: i16,
    pub params: Vec<Parameter>,
    pub columns: Vec<Column>,
    pub trx_status: i32,
}

impl Request for PrepareRequest<'_> {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::Prepare
    }

    fn stmt_id(&self) -> i32 {
        self.stmt_id
    }

    fn write_header(&self, frame: &mut ByteBuffer, ctx: &MessageContext) -> Result<()> {
        let max_rows = if self.max_rows <= 0 || self.cache_results {
            i64::MAX
        } else {
            self.max_rows
        };
        frame.put_u8_at(offset::AUTOCOMMIT, u8::from(ctx.autocommit))?;
        frame.put_u8_at(offset::EXEC_DIRECT, u8::from(self.exec_direct))?;
        frame.put_u8_at(offset::RESERVED, 0)?;
        frame.put_u8_at(offset::ONE, 1)?;
        frame.put_u8_at(offset::NATIVE_MODE, u8::from(!ctx.oracle_compatible))?;
        frame.put_i16_at(offset::EXEC_TYPE, 0)?;
        frame.put_i64_at(offset::MAX_ROWS, max_rows)?;
        frame.put_u8_at(
            offset::BLOCK_FORMAT,
            if ctx.block_format { BLOCK_FORMAT_ON } else { 0 },
        )?;
        frame.put_i16_at(offset::RESERVED_2, 0)?;
        frame.put_u8_at(offset::ONE_2, 1)?;
        frame.put_u8_at(offset::RESERVED_3, 0)?;
        frame.put_u8_at(offset::RESERVED_4, 0)?;
        frame.put_i32_at(offset::TIMEOUT, ctx.query_timeout)?;
        frame.put_u8_at(offset::INNER_EXEC, 0)?;
        Ok(())
    }

    fn write_body(&self, frame: &mut ByteBuffer, ctx: &MessageContext) -> Result<()> {
        let sql = ctx.charset.encode(self.sql)?;
        frame.write_cstr(&sql);
        Ok(())
    }

    fn read_response(&self, frame: &mut ByteBuffer, ctx: &MessageContext) -> Result<Response> {
        if self.exec_direct {
            let info = read_execute_response(frame, ctx, &[], &[], self.read_base_col_name)?;
            return Ok(Response::Executed(Box::new(info)));
        }

        let ret_type = frame.get_i16_at(offset::R_RET_TYPE)?;
        let param_count = usize::from(frame.get_u16_at(offset::R_PARAMS)?);
        let column_count = frame.get_i16_at(offset::R_COLUMNS)?.max(0) as usize;
        let trx_status = frame.get_i32_at(offset::R_TRX)?;

        let params = read_parameters(frame, param_count, ctx.charset)?;
        let columns = read_columns(frame, column_count, self.read_base_col_name, ctx.charset)?;
        Ok(Response::Prepared(PrepareInfo {
            ret_type,
            params,
            columns,
            trx_status,
        }))
    }
}

/// Name the cursor of a statement.
#[derive(Debug, Clone)]
pub struct SetCursorNameRequest<'a> {
    pub stmt_id: i32,
    pub name: &'a str,
}

impl Request for SetCursorNameRequest<'_> {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::SetCursorName
    }

    fn stmt_id(&self) -> i32 {
        self.stmt_id
    }

    fn write_body(&self, frame: &mut ByteBuffer, ctx: &MessageContext) -> Result<()> {
        let name = ctx.charset.encode(self.name)?;
        frame.write_cstr(&name);
        frame.write_i32(1);
        Ok(())
    }

    fn read_response(&self, _frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<Response> {
        Ok(Response::Ack)
    }
}

fn complex_error(kind: ComplexKind, name: &str) -> Error {
    Error::Type(TypeError {
        expected: "scalar type",
        actual: format!("{:?} object type", kind),
        column: Some(name.to_string()),
    })
}

/// Four i16 name lengths followed by the names themselves.
fn read_names(frame: &mut ByteBuffer, charset: Charset) -> Result<[String; 4]> {
    let mut lens = [0usize; 4];
    for len in &mut lens {
        *len = frame.read_i16()?.max(0) as usize;
    }
    let mut names: [String; 4] = Default::default();
    for (name, len) in names.iter_mut().zip(lens) {
        *name = read_fixed_string(frame, len, charset)?;
    }
    Ok(names)
}

/// Decode `count` parameter descriptors.
///
/// Object-typed parameters are followed by packed type descriptors this
/// driver does not interpret, so they are rejected.
pub fn read_parameters(frame: &mut ByteBuffer, count: usize, charset: Charset) -> Result<Vec<Parameter>> {
    let mut params = Vec::with_capacity(count);
    for _ in 0..count {
        let sql_type = frame.read_i32()?;
        let precision = frame.read_i32()?;
        let scale = frame.read_i32()?;
        let nullable = frame.read_i32()? != 0;
        let flags = frame.read_i16()?;
        frame.skip(4)?;
        let io = ParamIo::from_wire(frame.read_i16()?);
        let [name, type_name, table_name, schema_name] = read_names(frame, charset)?;
        let lob = flags & item_flag::LOB != 0;
        let (lob_table_id, lob_column_id) = if lob {
            (frame.read_i32()?, frame.read_i16()?)
        } else {
            (0, 0)
        };
        params.push(Parameter {
            name,
            type_name,
            table_name,
            schema_name,
            sql_type,
            precision,
            scale,
            nullable,
            recommended: flags & item_flag::RECOMMEND != 0,
            lob,
            io,
            lob_table_id,
            lob_column_id,
            complex: ComplexKind::detect(sql_type, scale),
        });
    }
    match params.iter().find_map(|p| p.complex.map(|k| (k, &p.name))) {
        Some((kind, name)) => Err(complex_error(kind, name)),
        None => Ok(params),
    }
}

/// Decode `count` column descriptors.
pub fn read_columns(
    frame: &mut ByteBuffer,
    count: usize,
    read_base_col_name: bool,
    charset: Charset,
) -> Result<Vec<Column>> {
    let mut columns = Vec::with_capacity(count);
    for _ in 0..count {
        let sql_type = frame.read_i32()?;
        let precision = frame.read_i32()?;
        let scale = frame.read_i32()?;
        let nullable = frame.read_i32()? != 0;
        let flags = frame.read_i16()?;
        frame.skip(6)?;
        let [name, type_name, table_name, schema_name] = read_names(frame, charset)?;
        let base_name = if read_base_col_name {
            Some(read_short_string(frame, charset)?)
        } else {
            None
        };
        let lob = flags & item_flag::LOB != 0;
        let (lob_table_id, lob_column_id) = if lob {
            (frame.read_i32()?, frame.read_i16()?)
        } else {
            (0, 0)
        };
        columns.push(Column {
            name,
            type_name,
            table_name,
            schema_name,
            base_name,
            sql_type,
            precision,
            scale,
            nullable,
            identity: flags & item_flag::IDENTITY != 0,
            readonly: flags & item_flag::READONLY != 0,
            lob,
            lob_table_id,
            lob_column_id,
            complex: ComplexKind::detect(sql_type, scale),
        });
    }
    Ok(columns)
}

/// Fail if any column carries an object type; its packed descriptor
/// would have to be skipped before the rows that follow.
pub fn reject_complex_columns(columns: &[Column]) -> Result<()> {
    match columns.iter().find_map(|c| c.complex.map(|k| (k, &c.name))) {
        Some((kind, name)) => Err(complex_error(kind, name)),
        None => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    fn write_names(frame: &mut ByteBuffer, names: [&str; 4]) {
        for n in names {
            frame.write_i16(n.len() as i16);
        }
        for n in names {
            frame.write_bytes(n.as_bytes());
        }
    }

    /// Encode one column descriptor the way the server does.
    pub fn write_column(frame: &mut ByteBuffer, name: &str, sql_type: i32, precision: i32, lob: bool) {
        frame.write_i32(sql_type);
        frame.write_i32(precision);
        frame.write_i32(0);
        frame.write_i32(1);
        frame.write_i16(if lob { item_flag::LOB } else { 0 });
        frame.write_bytes(&[0; 6]);
        write_names(frame, [name, crate::types::sql_type::name(sql_type), "T", "SYSDBA"]);
        if lob {
            frame.write_i32(1001);
            frame.write_i16(2);
        }
    }

    /// Encode one parameter descriptor the way the server does.
    pub fn write_parameter(frame: &mut ByteBuffer, name: &str, sql_type: i32, io: ParamIo, lob: bool) {
        frame.write_i32(sql_type);
        frame.write_i32(if lob { i32::MAX } else { 4 });
        frame.write_i32(0);
        frame.write_i32(1);
        frame.write_i16(if lob { item_flag::LOB } else { item_flag::RECOMMEND });
        frame.write_i32(0);
        frame.write_i16(i16::from(io.to_wire()));
        write_names(frame, [name, crate::types::sql_type::name(sql_type), "T", "SYSDBA"]);
        if lob {
            frame.write_i32(1001);
            frame.write_i16(3);
        }
    }
}
