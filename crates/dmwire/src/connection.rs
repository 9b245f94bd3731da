//! DM connection implementation.
//!
//! A connection walks `Disconnected → TcpConnected → [TlsUpgraded] →
//! HandshakeDone → LoggedIn → Ready`. Once ready, every operation is one
//! or more request/response round trips over the single socket. A fatal
//! error (transport, checksum or protocol) moves the connection to
//! `Broken`; after that, and after `close()`, every call fails with
//! `ConnectionClosed` without touching the network.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use dmwire_core::{ConfigError, Error, Result, TransportError, TransportErrorKind};

use crate::cache::{CacheKey, Lookup, ResultCache};
use crate::config::{CompressionMode, Config, IsolationLevel};
use crate::crypto::{Cipher, DhKeyPair, build_cipher};
use crate::pool::{PooledStatement, StatementPool};
use crate::protocol::execute::{ExecuteInfo, SessionUpdate};
use crate::protocol::handshake::{HandshakeInfo, HandshakeRequest};
use crate::protocol::login::{LoginInfo, LoginRequest};
use crate::protocol::message::{FrameIo, MessageContext, exchange};
use crate::protocol::session::{
    CommitRequest, RollbackRequest, SetIsolationRequest, TableTimestampsRequest,
};
use crate::protocol::statement::{AllocStatementRequest, FreeStatementRequest, PrepareRequest};
use crate::protocol::{HeaderVariant, Message, Response, ret_type};
use crate::resultset::ResultSet;
use crate::statement::{Execution, Statement};
use crate::tls::{ServerTlsPolicy, negotiate_tls, validate_tls_config};
use crate::transport::Transport;
use crate::version::ServerVersion;

/// Connection state in the DM protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// TCP connection established, handshake pending
    TcpConnected,
    /// Socket wrapped in TLS
    TlsUpgraded,
    /// Framing, compression and cipher negotiated
    HandshakeDone,
    /// Credentials accepted
    LoggedIn,
    /// Ready for statements
    Ready,
    /// Closed by the caller; terminal
    Closed,
    /// A fatal error left the socket unusable; terminal
    Broken,
}

/// Session attributes negotiated at connect time and updated by
/// statements that change them.
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    pub server_version: Option<ServerVersion>,
    pub charset: &'static str,
    pub compression: CompressionMode,
    pub header_variant: HeaderVariant,
    /// Session cipher id; negative when frames travel unencrypted
    pub cipher_id: i32,
    pub tls: bool,
    pub msg_version: u16,
    pub isolation: i32,
    pub read_only: bool,
    /// Minutes east of UTC
    pub time_zone: i16,
    pub schema: String,
    pub session_id: Option<i64>,
    pub trx_status: i32,
    pub guid: String,
    pub db_name: String,
    pub instance_name: String,
    pub max_row_size: i32,
    /// date, time, timestamp, timestamp-tz, time-tz
    pub formats: [Option<String>; 5],
    pub date_language: u8,
}

/// Cancels the in-flight work of a connection from another thread.
///
/// The flag is checked before each round trip. A cancelled connection
/// closes its socket and becomes `Broken`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn config_error(message: impl Into<String>) -> Error {
    Error::Config(ConfigError {
        message: message.into(),
        source: None,
    })
}

/// A session with a DM server.
pub struct Connection {
    io: Option<Box<dyn FrameIo + Send>>,
    ctx: MessageContext,
    state: ConnectionState,
    config: Config,
    session: SessionInfo,
    pool: StatementPool,
    cache: ResultCache,
    cancel: CancelToken,
    /// Handles dropped while the pool was full; freed on the next prepare
    orphans: Vec<i32>,
    in_transaction: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("schema", &self.session.schema)
            .field("session_id", &self.session.session_id)
            .field("pooled", &self.pool.len())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// A connection that has not been opened yet.
    pub fn new(config: Config) -> Self {
        let ctx = MessageContext {
            autocommit: config.autocommit,
            query_timeout: config.query_timeout,
            max_rows: config.max_rows,
            continue_batch_on_error: config.continue_batch_on_error,
            batch_allow_max_errors: config.batch_allow_max_errors,
            buffer_prefetch: config.buffer_prefetch,
            ..MessageContext::default()
        };
        Self {
            io: None,
            ctx,
            state: ConnectionState::Disconnected,
            pool: StatementPool::new(config.statement_pool_size),
            cache: ResultCache::new(config.result_cache_size, config.result_cache_refresh),
            session: SessionInfo::default(),
            cancel: CancelToken::new(),
            orphans: Vec::new(),
            in_transaction: false,
            config,
        }
    }

    /// Open a connection and log in.
    pub fn connect(config: Config) -> Result<Self> {
        let mut conn = Self::new(config);
        conn.open()?;
        Ok(conn)
    }

    /// Drive a fresh connection to `Ready`.
    pub fn open(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Closed | ConnectionState::Broken => return Err(Error::ConnectionClosed),
            _ => return Err(config_error("connection is already open")),
        }
        self.config.validate()?;
        validate_tls_config(self.config.ssl_mode, &self.config.tls)?;

        let mut transport = Transport::connect(&self.config)?;
        self.advance(ConnectionState::TcpConnected);
        if let Err(e) = self.establish(&mut transport) {
            transport.shutdown();
            self.state = if e.is_fatal() {
                ConnectionState::Broken
            } else {
                ConnectionState::Disconnected
            };
            tracing::debug!(error = %e, state = ?self.state, "connect failed");
            return Err(e);
        }
        self.io = Some(Box::new(transport));
        self.advance(ConnectionState::Ready);

        if let Some(schema) = self.config.schema.clone() {
            self.set_schema(&schema)?;
        }
        Ok(())
    }

    fn advance(&mut self, next: ConnectionState) {
        tracing::debug!(from = ?self.state, to = ?next, "connection state");
        self.state = next;
    }

    fn establish(&mut self, transport: &mut Transport) -> Result<()> {
        let keys = self.config.encryption_enabled.then(DhKeyPair::generate);
        let request = HandshakeRequest {
            compression: self.config.compression_mode,
            compression_id: self.config.compression_id,
            block_format: self.config.block_format,
            dh_public: keys.as_ref().map(DhKeyPair::public_bytes),
        };
        let info = match exchange(transport, &self.ctx, &Message::Handshake(request))? {
            Response::Handshake(info) => info,
            other => return Err(other.unexpected("handshake")),
        };

        let tls = negotiate_tls(self.config.ssl_mode, info.tls)?;
        if tls != ServerTlsPolicy::Disabled {
            let server_name = self
                .config
                .tls
                .server_name
                .clone()
                .unwrap_or_else(|| self.config.host.clone());
            transport.upgrade_tls(tls, &self.config.tls, &server_name)?;
            self.session.tls = transport.is_tls();
            self.advance(ConnectionState::TlsUpgraded);
        }

        let cipher = match (&keys, &info.server_public_key) {
            (Some(keys), Some(peer)) => {
                let session_key = keys.compute_session_key(peer)?;
                Some(build_cipher(
                    info.cipher_id,
                    info.hash_id,
                    &session_key,
                    &self.config.cipher_path,
                    self.config.cipher_provider.as_ref(),
                )?)
            }
            (Some(_), None) => {
                tracing::debug!("server sent no public key; continuing without encryption");
                None
            }
            _ => None,
        };

        let policy = transport.policy_mut();
        policy.header = info.header_variant;
        policy.compression = info.compression;
        policy.compression_id = info.compression_id;
        if info.stream_encryption {
            policy.cipher.clone_from(&cipher);
        }
        self.apply_handshake(&info);
        self.advance(ConnectionState::HandshakeDone);

        let credential_cipher: Option<&dyn Cipher> = if info.login_encryption {
            cipher.as_deref()
        } else {
            None
        };
        let host_name = std::env::var("HOSTNAME").unwrap_or_default();
        let login = LoginRequest {
            user: &self.config.user,
            password: &self.config.password,
            app_name: &self.config.app_name,
            os_name: std::env::consts::OS,
            host_name: &host_name,
            new_client_type: info.new_client_type,
            isolation: self.config.isolation.to_wire(),
            language: 0,
            read_only: self.config.read_only,
            time_zone: self.config.time_zone,
            session_timeout: self.config.session_timeout,
            new_lob_flag: self.ctx.features.extended_lob_locator,
            credential_cipher,
        };
        let login_info = match exchange(transport, &self.ctx, &Message::Login(login))? {
            Response::Login(info) => info,
            other => return Err(other.unexpected("login")),
        };
        self.apply_login(&login_info);
        self.advance(ConnectionState::LoggedIn);
        Ok(())
    }

    fn apply_handshake(&mut self, info: &HandshakeInfo) {
        self.ctx.charset = info.charset;
        self.ctx.features = info.features;
        self.ctx.msg_version = info.msg_version;
        self.ctx.block_format = info.block_format;

        self.session.server_version = Some(info.server_version);
        self.session.charset = info.charset.name();
        self.session.compression = info.compression;
        self.session.header_variant = info.header_variant;
        self.session.cipher_id = if info.stream_encryption {
            info.cipher_id
        } else {
            -1
        };
        self.session.msg_version = info.msg_version;
    }

    fn apply_login(&mut self, info: &LoginInfo) {
        self.ctx.new_lob_flag = info.new_lob_flag;
        self.ctx.max_row_size = info.max_row_size;
        if self.ctx.buffer_prefetch == 0 {
            self.ctx.buffer_prefetch = info.buffer_prefetch;
        }
        self.ctx.oracle_compatible = info.formats.iter().any(Option::is_some);

        let session = &mut self.session;
        session.isolation = info.isolation;
        session.read_only = self.config.read_only;
        session.time_zone = self.config.time_zone;
        session.schema.clone_from(&info.schema);
        session.session_id = info.session_id;
        session.guid.clone_from(&info.guid);
        session.db_name.clone_from(&info.db_name);
        session.instance_name.clone_from(&info.instance_name);
        session.max_row_size = info.max_row_size;
        session.formats.clone_from(&info.formats);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn session(&self) -> &SessionInfo {
        &self.session
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn context(&self) -> &MessageContext {
        &self.ctx
    }

    /// Whether statements commit on their own.
    pub fn autocommit(&self) -> bool {
        self.ctx.autocommit
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Token that cancels this connection's work from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn result_cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn statement_pool(&self) -> &StatementPool {
        &self.pool
    }

    /// Send one message and parse its reply, breaking the connection on
    /// fatal errors.
    pub(crate) fn round_trip(&mut self, message: &Message<'_>) -> Result<Response> {
        if self.state != ConnectionState::Ready {
            return Err(Error::ConnectionClosed);
        }
        if self.cancel.is_cancelled() {
            self.break_connection();
            return Err(Error::Transport(TransportError {
                kind: TransportErrorKind::Cancelled,
                message: "operation cancelled".to_string(),
                source: None,
            }));
        }
        let io = self.io.as_mut().ok_or(Error::ConnectionClosed)?;
        let result = exchange(io.as_mut(), &self.ctx, message);
        match &result {
            Err(e) if e.is_fatal() => {
                tracing::debug!(error = %e, "fatal error; connection broken");
                self.break_connection();
            }
            _ => {}
        }
        result
    }

    fn break_connection(&mut self) {
        if let Some(mut io) = self.io.take() {
            io.close();
        }
        self.state = ConnectionState::Broken;
    }

    fn expect_ack(&mut self, message: &Message<'_>, what: &str) -> Result<()> {
        match self.round_trip(message)? {
            Response::Ack => Ok(()),
            other => Err(other.unexpected(what)),
        }
    }

    /// Fold session changes reported by an execute reply into the
    /// connection.
    pub(crate) fn absorb(&mut self, info: &ExecuteInfo) {
        self.session.trx_status = info.trx_status;
        match &info.session {
            Some(SessionUpdate::TimeZone(tz)) => self.session.time_zone = *tz,
            Some(SessionUpdate::Isolation { level, read_only }) => {
                self.session.isolation = *level;
                self.session.read_only = *read_only;
            }
            Some(SessionUpdate::Schema(schema)) => {
                tracing::debug!(%schema, "session schema changed");
                self.session.schema.clone_from(schema);
            }
            Some(SessionUpdate::Format { kind, value }) => {
                let slot = match *kind {
                    ret_type::DATE_FORMAT => 0,
                    ret_type::TIME_FORMAT => 1,
                    ret_type::TIMESTAMP_FORMAT => 2,
                    ret_type::TIMESTAMP_TZ_FORMAT => 3,
                    _ => 4,
                };
                self.session.formats[slot] = Some(value.clone());
            }
            Some(SessionUpdate::DateLanguage(lang)) => self.session.date_language = *lang,
            None => {}
        }
    }

    fn acquire_statement(&mut self) -> Result<PooledStatement> {
        self.free_orphans()?;
        if let Some(handle) = self.pool.pop() {
            tracing::trace!(stmt_id = handle.id, "reusing pooled statement");
            return Ok(handle);
        }
        match self.round_trip(&Message::AllocStatement(AllocStatementRequest))? {
            Response::Allocated(allocated) => Ok(PooledStatement {
                id: allocated.stmt_id,
                cursor_name: None,
                read_base_col_name: allocated.read_base_col_name,
            }),
            other => Err(other.unexpected("allocate statement")),
        }
    }

    /// Return a handle to the pool, or free it on the server when the
    /// pool is full.
    pub(crate) fn release_statement(&mut self, handle: PooledStatement) -> Result<()> {
        if self.state != ConnectionState::Ready {
            return Ok(());
        }
        match self.pool.push(handle) {
            Ok(()) => Ok(()),
            Err(handle) => self.free_statement(handle.id),
        }
    }

    /// Like `release_statement` but never touches the network.
    pub(crate) fn park_statement(&mut self, handle: PooledStatement) {
        if self.state != ConnectionState::Ready {
            return;
        }
        if let Err(handle) = self.pool.push(handle) {
            self.orphans.push(handle.id);
        }
    }

    fn free_statement(&mut self, stmt_id: i32) -> Result<()> {
        self.expect_ack(
            &Message::FreeStatement(FreeStatementRequest { stmt_id }),
            "free statement",
        )
    }

    fn free_orphans(&mut self) -> Result<()> {
        for stmt_id in std::mem::take(&mut self.orphans) {
            match self.free_statement(stmt_id) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::warn!(stmt_id, error = %e, "failed to free statement"),
            }
        }
        Ok(())
    }

    /// Prepare a statement for repeated execution.
    pub fn prepare(&mut self, sql: &str) -> Result<Statement<'_>> {
        let handle = self.acquire_statement()?;
        let message = Message::Prepare(PrepareRequest {
            stmt_id: handle.id,
            sql,
            exec_direct: false,
            max_rows: self.config.max_rows,
            read_base_col_name: handle.read_base_col_name,
            cache_results: false,
        });
        let reply = self.round_trip(&message);
        let info = match reply {
            Ok(Response::Prepared(info)) => info,
            Ok(other) => {
                self.park_statement(handle);
                return Err(other.unexpected("prepare"));
            }
            Err(e) => {
                self.park_statement(handle);
                return Err(match e {
                    Error::Server(mut s) => {
                        s.sql = Some(sql.to_string());
                        Error::Server(s)
                    }
                    other => other,
                });
            }
        };
        self.session.trx_status = info.trx_status;
        tracing::debug!(stmt_id = handle.id, params = info.params.len(), columns = info.columns.len(), "statement prepared");
        Ok(Statement::prepared(self, handle, sql, info))
    }

    /// Run a statement without parameters in one round trip and read all
    /// of its rows. Queries are served from the result cache when
    /// possible.
    pub fn execute_direct(&mut self, sql: &str) -> Result<Execution> {
        self.direct(sql, true)
    }

    /// Run a query and return its rows.
    pub fn query(&mut self, sql: &str) -> Result<ResultSet> {
        let execution = self.execute_direct(sql)?;
        Ok(execution
            .into_result_set()
            .unwrap_or_else(|| ResultSet::new(Arc::from(Vec::new()), Vec::new(), 0)))
    }

    fn direct(&mut self, sql: &str, use_cache: bool) -> Result<Execution> {
        if self.state != ConnectionState::Ready {
            return Err(Error::ConnectionClosed);
        }
        let key = (use_cache && self.cache.is_enabled())
            .then(|| CacheKey::new(&self.session.guid, &self.session.schema, sql, 0));
        let hit = match &key {
            Some(key) => self.cached(key)?,
            None => None,
        };
        if let Some(hit) = hit {
            return Ok(hit);
        }

        let handle = self.acquire_statement()?;
        let mut stmt = Statement::direct(self, handle, sql);
        let execution = stmt.run_direct(key.is_some())?;
        stmt.close()?;

        if let (Some(key), Some(rs)) = (key, execution.result_set.as_ref()) {
            let stored = self.cache.insert(
                key,
                rs.column_arc(),
                rs.rows().to_vec(),
                execution.table_ids.clone(),
                execution.table_timestamps.clone(),
                Instant::now(),
            );
            tracing::trace!(stored, rows = rs.len(), "result cache insert");
        }
        Ok(execution)
    }

    fn cached(&mut self, key: &CacheKey) -> Result<Option<Execution>> {
        let now = Instant::now();
        let entry = match self.cache.lookup(key, now) {
            Lookup::Miss => return Ok(None),
            Lookup::Hit(entry) => entry,
            Lookup::Probe(table_ids) => {
                let message = Message::TableTimestamps(TableTimestampsRequest {
                    table_ids: &table_ids,
                });
                let stamps = match self.round_trip(&message) {
                    Ok(Response::TableTimestamps(stamps)) => stamps,
                    Ok(other) => return Err(other.unexpected("table timestamps")),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::warn!(error = %e, "result cache probe failed; evicting");
                        self.cache.evict(key);
                        return Ok(None);
                    }
                };
                match self.cache.confirm(key, &stamps, now) {
                    Some(entry) => entry,
                    None => return Ok(None),
                }
            }
        };

        let mut rows = entry.rows;
        if let Some(limit) = usize::try_from(self.config.max_rows).ok().filter(|&n| n > 0) {
            rows.truncate(limit);
        }
        let total = i64::try_from(rows.len()).unwrap_or(i64::MAX);
        tracing::trace!(sql = %key.sql, rows = rows.len(), "result cache hit");
        Ok(Some(Execution {
            kind: ret_type::SELECT,
            result_set: Some(ResultSet::new(entry.columns, rows, total)),
            from_cache: true,
            ..Execution::default()
        }))
    }

    /// Start a transaction by leaving autocommit mode until the next
    /// commit or rollback.
    pub fn begin(&mut self) -> Result<()> {
        if self.state != ConnectionState::Ready {
            return Err(Error::ConnectionClosed);
        }
        if self.in_transaction {
            return Err(config_error("a transaction is already open"));
        }
        self.ctx.autocommit = false;
        self.in_transaction = true;
        tracing::debug!("transaction started");
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.check_transaction_control("commit")?;
        self.expect_ack(&Message::Commit(CommitRequest), "commit")?;
        self.end_transaction();
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.check_transaction_control("rollback")?;
        self.expect_ack(&Message::Rollback(RollbackRequest), "rollback")?;
        self.end_transaction();
        Ok(())
    }

    fn check_transaction_control(&self, what: &str) -> Result<()> {
        if self.state != ConnectionState::Ready {
            return Err(Error::ConnectionClosed);
        }
        if self.ctx.autocommit && !self.config.always_allow_commit {
            return Err(config_error(format!(
                "{} is not allowed in autocommit mode",
                what
            )));
        }
        Ok(())
    }

    fn end_transaction(&mut self) {
        self.in_transaction = false;
        self.ctx.autocommit = self.config.autocommit;
    }

    pub fn set_isolation(&mut self, level: IsolationLevel) -> Result<()> {
        self.expect_ack(
            &Message::SetIsolation(SetIsolationRequest {
                level: level.to_wire(),
            }),
            "set isolation",
        )?;
        self.session.isolation = level.to_wire();
        Ok(())
    }

    /// Switch the default schema of the session.
    pub fn set_schema(&mut self, schema: &str) -> Result<()> {
        let sql = format!("SET SCHEMA \"{}\"", schema.replace('"', "\"\""));
        let before = self.session.schema.clone();
        self.direct(&sql, false)?;
        if self.session.schema == before {
            self.session.schema = schema.to_string();
        }
        Ok(())
    }

    /// Check that the server still answers.
    pub fn ping(&mut self) -> Result<()> {
        self.direct("SELECT 1", false).map(|_| ())
    }

    /// Roll back an open transaction, free every statement handle and
    /// close the socket. The connection is `Closed` afterwards whatever
    /// the server answers.
    pub fn close(&mut self) {
        match self.state {
            ConnectionState::Closed => return,
            ConnectionState::Ready => {}
            _ => {
                self.break_connection();
                self.state = ConnectionState::Closed;
                return;
            }
        }

        if self.in_transaction || !self.ctx.autocommit {
            if let Err(e) = self.expect_ack(&Message::Rollback(RollbackRequest), "rollback") {
                tracing::warn!(error = %e, "rollback on close failed");
            }
        }
        let mut handles = std::mem::take(&mut self.orphans);
        handles.extend(self.pool.drain().into_iter().map(|h| h.id));
        for stmt_id in handles {
            if self.state != ConnectionState::Ready {
                break;
            }
            if let Err(e) = self.free_statement(stmt_id) {
                tracing::warn!(stmt_id, error = %e, "failed to free statement on close");
            }
        }
        self.cache.clear();
        if let Some(mut io) = self.io.take() {
            io.close();
        }
        self.state = ConnectionState::Closed;
        tracing::debug!("connection closed");
    }

    #[cfg(test)]
    pub(crate) fn with_io(config: Config, io: Box<dyn FrameIo + Send>, ctx: MessageContext) -> Self {
        let mut conn = Self::new(config);
        conn.ctx = MessageContext {
            autocommit: conn.ctx.autocommit,
            ..ctx
        };
        conn.io = Some(io);
        conn.state = ConnectionState::Ready;
        conn.session.guid = "test-guid".to_string();
        conn.session.schema = "SYSDBA".to_string();
        conn
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(mut io) = self.io.take() {
            io.close();
        }
    }
}

/// Open a connection with `config`.
pub fn connect(config: Config) -> Result<Connection> {
    Connection::connect(config)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared scripted peer for connection-level tests.

    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::protocol::ByteBuffer;
    use crate::protocol::message::testing::ScriptedIo;

    /// Scripted frames visible to the test after the connection took
    /// ownership of the I/O.
    #[derive(Debug, Clone, Default)]
    pub struct SharedIo(pub Arc<Mutex<ScriptedIo>>);

    impl SharedIo {
        pub fn reply(&self, frame: ByteBuffer) {
            self.0.lock().unwrap().replies.push_back(frame);
        }

        pub fn sent(&self) -> Vec<ByteBuffer> {
            self.0.lock().unwrap().sent.clone()
        }

        pub fn sent_codes(&self) -> Vec<i16> {
            self.sent()
                .iter()
                .map(|f| f.get_i16_at(crate::protocol::header::CODE).unwrap())
                .collect()
        }
    }

    impl FrameIo for SharedIo {
        fn send_frame(&mut self, frame: &mut ByteBuffer) -> Result<()> {
            self.0.lock().unwrap().send_frame(frame)
        }

        fn receive_frame(&mut self) -> Result<ByteBuffer> {
            self.0.lock().unwrap().receive_frame()
        }
    }

    pub fn ready(config: Config) -> (Connection, SharedIo) {
        let io = SharedIo::default();
        let ctx = MessageContext {
            charset: crate::protocol::Charset::Utf8,
            ..MessageContext::default()
        };
        (Connection::with_io(config, Box::new(io.clone()), ctx), io)
    }
}
