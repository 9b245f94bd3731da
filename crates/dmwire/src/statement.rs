//! Prepared and direct statements.
//!
//! A [`Statement`] borrows its [`Connection`] for as long as it lives,
//! which keeps the protocol's one-request-at-a-time rule in the type
//! system. Closing a statement parks its server handle in the
//! connection's pool when there is room; dropping one without closing
//! does the same without any network traffic.

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use std::sync::Arc;

use dmwire_core::{BatchError, BatchFailure, Error, Result, TypeError, Value};

use crate::connection::Connection;
use crate::pool::PooledStatement;
use crate::protocol::execute::{
    BindData, BindType, ExecuteInfo, ExecuteRequest, FetchRequest, MoreResultsRequest,
    PreExecuteRequest, PutDataRequest,
};
use crate::protocol::statement::{PrepareInfo, PrepareRequest, SetCursorNameRequest};
use crate::protocol::{ByteBuffer, LOB_WRITE_CHUNK, Message, Response, SegmentedStream, ret_type};
use crate::resultset::{ResultSet, decode_rows};
use crate::types::{BoundValue, Column, ParamIo, Parameter, decode_value, encode_value};

/// Count reported for a batch row whose outcome the server did not list.
pub const SUCCESS_NO_INFO: i64 = -2;

/// Count recorded for a row that failed in a row-by-row batch.
pub const EXECUTE_FAILED: i64 = -1;

/// What one execution produced.
#[derive(Debug, Clone, Default)]
pub struct Execution {
    /// Statement kind reported by the server
    pub kind: i16,
    pub update_count: i64,
    pub update_counts: Vec<i64>,
    pub last_insert_id: Option<i64>,
    pub result_set: Option<ResultSet>,
    /// One value per parameter; input-only slots are `Null`
    pub out_params: Vec<Value>,
    /// Output of server-side print calls
    pub print: Option<String>,
    pub explain: Option<String>,
    /// Served from the connection's result cache
    pub from_cache: bool,
    pub(crate) table_ids: Vec<i32>,
    pub(crate) table_timestamps: Vec<i64>,
}

impl Execution {
    pub fn is_query(&self) -> bool {
        self.result_set.is_some()
    }

    pub fn into_result_set(self) -> Option<ResultSet> {
        self.result_set
    }
}

fn type_error(expected: &'static str, actual: String, column: Option<String>) -> Error {
    Error::Type(TypeError {
        expected,
        actual,
        column,
    })
}

/// Attach the statement text to server errors.
fn with_sql(err: Error, sql: &str) -> Error {
    match err {
        Error::Server(mut e) => {
            e.sql = Some(sql.to_string());
            Error::Server(e)
        }
        other => other,
    }
}

/// Server statement bound to a connection.
pub struct Statement<'c> {
    conn: &'c mut Connection,
    id: i32,
    sql: String,
    kind: i16,
    params: Vec<Parameter>,
    columns: Arc<[Column]>,
    bindings: Vec<Option<Value>>,
    read_base_col_name: bool,
    cursor_name: Option<String>,
    /// Average bytes per row seen so far, for the fetch buffer hint
    row_size: usize,
    result_set_id: i16,
    closed: bool,
}

impl std::fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("id", &self.id)
            .field("sql", &self.sql)
            .field("kind", &self.kind)
            .field("params", &self.params.len())
            .field("columns", &self.columns.len())
            .finish_non_exhaustive()
    }
}

impl<'c> Statement<'c> {
    pub(crate) fn prepared(
        conn: &'c mut Connection,
        handle: PooledStatement,
        sql: &str,
        info: PrepareInfo,
    ) -> Self {
        let bindings = vec![None; info.params.len()];
        Self {
            conn,
            id: handle.id,
            sql: sql.to_string(),
            kind: info.ret_type,
            params: info.params,
            columns: Arc::from(info.columns),
            bindings,
            read_base_col_name: handle.read_base_col_name,
            cursor_name: handle.cursor_name,
            row_size: 0,
            result_set_id: 1,
            closed: false,
        }
    }

    pub(crate) fn direct(conn: &'c mut Connection, handle: PooledStatement, sql: &str) -> Self {
        Self::prepared(conn, handle, sql, PrepareInfo::default())
    }

    /// Server statement id.
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Statement kind from the last prepare or execute.
    pub fn kind(&self) -> i16 {
        self.kind
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn cursor_name(&self) -> Option<&str> {
        self.cursor_name.as_deref()
    }

    /// The connection this statement runs on, e.g. for LOB access.
    pub fn connection(&mut self) -> &mut Connection {
        self.conn
    }

    /// Bind the value of the 0-based parameter `index`.
    pub fn bind(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        let count = self.bindings.len();
        let slot = self.bindings.get_mut(index).ok_or_else(|| {
            type_error(
                "parameter index in range",
                format!("index {} of {} parameters", index, count),
                None,
            )
        })?;
        *slot = Some(value.into());
        Ok(())
    }

    pub fn bind_all(&mut self, values: &[Value]) -> Result<()> {
        if values.len() != self.params.len() {
            return Err(type_error(
                "one value per parameter",
                format!("{} values for {} parameters", values.len(), self.params.len()),
                None,
            ));
        }
        for (slot, value) in self.bindings.iter_mut().zip(values) {
            *slot = Some(value.clone());
        }
        Ok(())
    }

    pub fn clear_bindings(&mut self) {
        self.bindings.iter_mut().for_each(|slot| *slot = None);
    }

    pub fn set_cursor_name(&mut self, name: &str) -> Result<()> {
        let message = Message::SetCursorName(SetCursorNameRequest {
            stmt_id: self.id,
            name,
        });
        match self.conn.round_trip(&message)? {
            Response::Ack => {
                self.cursor_name = Some(name.to_string());
                Ok(())
            }
            other => Err(other.unexpected("set cursor name")),
        }
    }

    /// Run the statement once with the bound values.
    pub fn execute(&mut self) -> Result<Execution> {
        let values = self.bound_values()?;
        let bound = self.encode_row(&values)?;
        let info = self
            .run_bound_row(bound)
            .map_err(|e| with_sql(e, &self.sql))?;
        self.finish(info)
    }

    /// Run the statement once per row of `rows`.
    ///
    /// Rows go to the server in one request unless a row carries LOB data,
    /// the configured batch type asks for row-by-row execution, or the
    /// column types differ between rows. Returns one update count per row.
    pub fn execute_batch(&mut self, rows: &[Vec<Value>]) -> Result<Vec<i64>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let bound = rows
            .iter()
            .map(|row| self.encode_row(row))
            .collect::<Result<Vec<_>>>()?;

        let needs_off_row = bound.iter().any(|row| {
            row.iter()
                .zip(&self.params)
                .any(|(value, param)| param.is_lob() && value.data.is_some())
        });
        let config = self.conn.config();
        let by_row = needs_off_row
            || config.batch_type == 2
            || (self.kind == ret_type::PROCEDURE && config.batch_not_on_call);

        let uniform = if by_row {
            None
        } else {
            uniform_types(&self.params, &bound)
        };
        tracing::debug!(
            stmt_id = self.id,
            rows = rows.len(),
            on_call = uniform.is_some(),
            "executing batch"
        );
        match uniform {
            Some(types) => self.batch_on_call(&types, bound),
            None => self.batch_by_row(bound),
        }
    }

    /// Fetch up to `count` more rows into `rs`; zero uses the configured
    /// prefetch. Returns the number of rows added.
    pub fn fetch(&mut self, rs: &mut ResultSet, count: usize) -> Result<usize> {
        if !rs.has_more() {
            return Ok(0);
        }
        let wanted = if count == 0 {
            i64::from(self.conn.config().row_prefetch.max(1))
        } else {
            count as i64
        };
        let wanted = wanted.min(rs.total_rows() - rs.received());
        let columns = rs.column_arc();
        let message = Message::Fetch(FetchRequest {
            stmt_id: self.id,
            cursor: rs.received(),
            count: wanted,
            result_set_id: rs.id(),
            columns: &columns,
            block_format: self.conn.context().block_format,
            row_size: self.row_size,
        });
        let info = match self.conn.round_trip(&message)? {
            Response::Fetched(info) => info,
            other => return Err(other.unexpected("fetch")),
        };
        if info.rows.is_empty() {
            rs.finish();
            return Ok(0);
        }
        let charset = self.conn.context().charset;
        let rows = decode_rows(&columns, rs.column_info(), info.rows, charset)?;
        let added = rs.extend(rows);
        tracing::trace!(stmt_id = self.id, added, "fetched rows");
        Ok(added)
    }

    /// Fetch until the server has no rows left.
    pub fn fetch_all(&mut self, rs: &mut ResultSet) -> Result<()> {
        while rs.has_more() {
            if self.fetch(rs, 0)? == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Advance to the next result set of a multi-result execution.
    pub fn more_results(&mut self) -> Result<Option<Execution>> {
        let next = self.result_set_id + 1;
        let message = Message::MoreResults(MoreResultsRequest {
            stmt_id: self.id,
            result_set_id: next,
            params: &self.params,
            read_base_col_name: self.read_base_col_name,
        });
        let info = match self.conn.round_trip(&message)? {
            Response::Executed(info) => *info,
            other => return Err(other.unexpected("more results")),
        };
        if !info.has_result_set {
            return Ok(None);
        }
        self.result_set_id = next;
        self.finish(info).map(Some)
    }

    /// Close the statement, parking its handle when the pool has room.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        let handle = self.handle();
        self.conn.release_statement(handle)
    }

    /// Prepare-and-run in one round trip, then drain every row.
    pub(crate) fn run_direct(&mut self, cache_results: bool) -> Result<Execution> {
        let message = Message::Prepare(PrepareRequest {
            stmt_id: self.id,
            sql: &self.sql,
            exec_direct: true,
            max_rows: self.conn.config().max_rows,
            read_base_col_name: self.read_base_col_name,
            cache_results,
        });
        let info = match self.conn.round_trip(&message) {
            Ok(Response::Executed(info)) => *info,
            Ok(other) => return Err(other.unexpected("execute")),
            Err(e) => return Err(with_sql(e, &self.sql)),
        };
        self.kind = info.ret_type;
        let table_ids = info.table_ids.clone();
        let table_timestamps = info.table_timestamps.clone();
        let mut execution = self.finish(info)?;
        if let Some(rs) = execution.result_set.as_mut() {
            self.fetch_all(rs)?;
        }
        execution.table_ids = table_ids;
        execution.table_timestamps = table_timestamps;
        Ok(execution)
    }

    fn handle(&mut self) -> PooledStatement {
        PooledStatement {
            id: self.id,
            cursor_name: self.cursor_name.take(),
            read_base_col_name: self.read_base_col_name,
        }
    }

    fn bound_values(&self) -> Result<Vec<Value>> {
        self.params
            .iter()
            .zip(&self.bindings)
            .enumerate()
            .map(|(i, (param, slot))| match slot {
                Some(value) => Ok(value.clone()),
                None if param.io == ParamIo::Out => Ok(Value::Null),
                None => Err(type_error(
                    "bound value",
                    format!("parameter {} is unbound", i),
                    Some(param.name.clone()),
                )),
            })
            .collect()
    }

    fn encode_row(&self, values: &[Value]) -> Result<Vec<BoundValue>> {
        if values.len() != self.params.len() {
            return Err(type_error(
                "one value per parameter",
                format!("{} values for {} parameters", values.len(), self.params.len()),
                None,
            ));
        }
        let charset = self.conn.context().charset;
        values
            .iter()
            .zip(&self.params)
            .map(|(value, param)| encode_value(value, param, charset))
            .collect()
    }

    /// Execute one row, streaming LOB values ahead of the request.
    fn run_bound_row(&mut self, bound: Vec<BoundValue>) -> Result<ExecuteInfo> {
        let types = bind_types(&self.params, &bound);
        let mut off_row = Vec::new();
        let mut data = Vec::with_capacity(bound.len());
        for (index, (param, value)) in self.params.iter().zip(bound).enumerate() {
            data.push(match value.data {
                None => BindData::Null,
                Some(bytes) if param.is_lob() => {
                    off_row.push((index, bytes));
                    BindData::OffRow
                }
                Some(bytes) => BindData::Inline(bytes),
            });
        }

        if !off_row.is_empty() {
            self.expect_ack(
                &Message::PreExecute(PreExecuteRequest {
                    stmt_id: self.id,
                    types: &types,
                }),
                "pre-execute",
            )?;
            for (index, bytes) in off_row {
                self.put_data(index, bytes)?;
            }
        }
        self.send_execute(&types, &[data])
    }

    fn put_data(&mut self, index: usize, bytes: Vec<u8>) -> Result<()> {
        let param_index = i16::try_from(index)
            .map_err(|_| type_error("parameter index below 32768", index.to_string(), None))?;
        let len = bytes.len();
        let mut pending = SegmentedStream::new();
        pending.push(bytes);
        let mut chunk = ByteBuffer::with_capacity(len.min(LOB_WRITE_CHUNK));
        loop {
            chunk.clear();
            pending.read_into(&mut chunk, LOB_WRITE_CHUNK);
            self.expect_ack(
                &Message::PutData(PutDataRequest {
                    stmt_id: self.id,
                    param_index,
                    data: chunk.as_slice(),
                }),
                "put data",
            )?;
            if pending.is_empty() {
                break;
            }
        }
        tracing::trace!(stmt_id = self.id, param = index, len, "streamed off-row value");
        Ok(())
    }

    fn send_execute(&mut self, types: &[BindType], rows: &[Vec<BindData>]) -> Result<ExecuteInfo> {
        let message = Message::Execute(ExecuteRequest {
            stmt_id: self.id,
            params: &self.params,
            types,
            rows,
            columns: &self.columns,
            read_base_col_name: self.read_base_col_name,
            max_rows: self.conn.config().max_rows,
        });
        match self.conn.round_trip(&message)? {
            Response::Executed(info) => Ok(*info),
            other => Err(other.unexpected("execute")),
        }
    }

    fn expect_ack(&mut self, message: &Message<'_>, what: &str) -> Result<()> {
        match self.conn.round_trip(message)? {
            Response::Ack => Ok(()),
            other => Err(other.unexpected(what)),
        }
    }

    fn batch_on_call(&mut self, types: &[BindType], bound: Vec<Vec<BoundValue>>) -> Result<Vec<i64>> {
        let n = bound.len();
        let rows: Vec<Vec<BindData>> = bound
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|value| value.data.map_or(BindData::Null, BindData::Inline))
                    .collect()
            })
            .collect();
        let info = self
            .send_execute(types, &rows)
            .map_err(|e| with_sql(e, &self.sql))?;
        self.conn.absorb(&info);

        let counts = if info.update_counts.len() == n {
            info.update_counts
        } else if n == 1 {
            vec![info.update_count]
        } else {
            vec![SUCCESS_NO_INFO; n]
        };
        if info.batch_failures.is_empty() {
            return Ok(counts);
        }
        for failure in &info.batch_failures {
            tracing::warn!(row = failure.row, code = failure.code, "batch row rejected by server");
        }
        Err(Error::Batch(BatchError {
            update_counts: counts,
            failures: info.batch_failures,
        }))
    }

    fn batch_by_row(&mut self, bound: Vec<Vec<BoundValue>>) -> Result<Vec<i64>> {
        let config = self.conn.config();
        let continue_on_error = config.continue_batch_on_error;
        let max_errors = usize::try_from(config.batch_allow_max_errors).unwrap_or(0);

        let mut counts = Vec::with_capacity(bound.len());
        let mut failures = Vec::new();
        for (i, row) in bound.into_iter().enumerate() {
            let err = match self.run_bound_row(row) {
                Ok(info) => {
                    self.conn.absorb(&info);
                    counts.push(info.update_count);
                    continue;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => e,
            };
            let failure = BatchFailure {
                row: i + 1,
                code: err.server_code().unwrap_or(0),
                message: match &err {
                    Error::Server(e) => e.message.clone(),
                    other => other.to_string(),
                },
            };
            if !continue_on_error {
                failures.push(failure);
                break;
            }
            tracing::warn!(row = failure.row, code = failure.code, message = %failure.message, "batch row failed; continuing");
            counts.push(EXECUTE_FAILED);
            failures.push(failure);
            if max_errors > 0 && failures.len() >= max_errors {
                break;
            }
        }

        if failures.is_empty() {
            Ok(counts)
        } else {
            Err(Error::Batch(BatchError {
                update_counts: counts,
                failures,
            }))
        }
    }

    /// Apply an execute reply to the statement and connection.
    fn finish(&mut self, mut info: ExecuteInfo) -> Result<Execution> {
        self.conn.absorb(&info);
        if let Some(columns) = info.columns.take() {
            self.columns = Arc::from(columns);
        }
        let charset = self.conn.context().charset;

        let out_params = if info.out_params.is_empty() {
            Vec::new()
        } else {
            self.params
                .iter()
                .enumerate()
                .map(|(i, param)| match info.out_params.get(i) {
                    Some(Some(bytes)) => decode_value(&param.as_column(), bytes, charset),
                    _ => Ok(Value::Null),
                })
                .collect::<Result<Vec<_>>>()?
        };

        let result_set = if info.has_result_set {
            if !info.rows.is_empty() {
                self.row_size = info.rows_size / info.rows.len();
            }
            let max_rows = self.conn.config().max_rows;
            let total = if max_rows > 0 {
                info.update_count.min(max_rows)
            } else {
                info.update_count
            };
            let mut rs = ResultSet::new(Arc::clone(&self.columns), Vec::new(), total)
                .with_id(self.result_set_id);
            let rows = decode_rows(&self.columns, rs.column_info(), std::mem::take(&mut info.rows), charset)?;
            rs.extend(rows);
            Some(rs)
        } else {
            None
        };

        Ok(Execution {
            kind: info.ret_type,
            update_count: if info.has_result_set { 0 } else { info.update_count },
            update_counts: info.update_counts,
            last_insert_id: info.last_insert_id,
            result_set,
            out_params,
            print: info.print,
            explain: info.explain,
            from_cache: false,
            table_ids: Vec::new(),
            table_timestamps: Vec::new(),
        })
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        if !self.closed {
            let handle = self.handle();
            self.conn.park_statement(handle);
        }
    }
}

fn bind_types(params: &[Parameter], bound: &[BoundValue]) -> Vec<BindType> {
    params
        .iter()
        .zip(bound)
        .map(|(param, value)| BindType {
            io: param.io,
            sql_type: value.sql_type,
            precision: value.precision,
            scale: value.scale,
        })
        .collect()
}

/// One bind type per column that fits every row, or `None` when rows
/// disagree on a column's type.
fn uniform_types(params: &[Parameter], rows: &[Vec<BoundValue>]) -> Option<Vec<BindType>> {
    let mut types = Vec::with_capacity(params.len());
    for (i, param) in params.iter().enumerate() {
        let mut chosen: Option<BindType> = None;
        for value in rows.iter().map(|row| &row[i]).filter(|v| v.data.is_some()) {
            match chosen.as_mut() {
                None => {
                    chosen = Some(BindType {
                        io: param.io,
                        sql_type: value.sql_type,
                        precision: value.precision,
                        scale: value.scale,
                    });
                }
                Some(ty) if ty.sql_type == value.sql_type && ty.scale == value.scale => {
                    ty.precision = ty.precision.max(value.precision);
                }
                Some(_) => return None,
            }
        }
        types.push(chosen.unwrap_or_else(|| BindType::from_parameter(param)));
    }
    Some(types)
}
