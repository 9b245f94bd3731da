//! The request/response cycle shared by every message kind.
//!
//! A [`Message`] is a closed set of request structs. Running one through
//! an [`Exchange`] writes the header fields, writes the body, sends the
//! frame, receives the reply, checks the server return code and parses
//! the kind-specific response into a [`Response`].

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use dmwire_core::{Error, ProtocolError, Result, ServerError};

use crate::transport::{Transport, new_frame};
use crate::version::FeatureSet;

use super::execute::{
    ExecuteInfo, ExecuteRequest, FetchInfo, FetchRequest, MoreResultsRequest, PreExecuteRequest,
    PutDataRequest,
};
use super::handshake::{HandshakeInfo, HandshakeRequest};
use super::lob::{
    LobChunk, LobLengthRequest, LobReadRequest, LobTruncateRequest, LobTruncated,
    LobWriteRequest, LobWritten,
};
use super::login::{LoginInfo, LoginRequest};
use super::session::{
    CommitRequest, RollbackRequest, SetIsolationRequest, TableTimestampsRequest,
};
use super::statement::{
    AllocStatementRequest, AllocatedStatement, FreeStatementRequest, PrepareInfo, PrepareRequest,
    SetCursorNameRequest,
};
use super::{ByteBuffer, Charset, HEADER_LEN, MessageCode, header, ret_code};

/// Session facts every encoder and decoder may consult.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub charset: Charset,
    pub features: FeatureSet,
    /// Message version the server reported in the handshake
    pub msg_version: u16,
    /// LOB requests carry the extended row/page fields
    pub new_lob_flag: bool,
    pub autocommit: bool,
    /// Seconds; zero means none
    pub query_timeout: i32,
    pub max_rows: i64,
    pub block_format: bool,
    pub continue_batch_on_error: bool,
    pub batch_allow_max_errors: i32,
    pub buffer_prefetch: i32,
    pub max_row_size: i32,
    pub oracle_compatible: bool,
}

impl Default for MessageContext {
    fn default() -> Self {
        Self {
            charset: Charset::default(),
            features: FeatureSet::default(),
            msg_version: 0,
            new_lob_flag: false,
            autocommit: true,
            query_timeout: 0,
            max_rows: 0,
            block_format: false,
            continue_batch_on_error: false,
            batch_allow_max_errors: 0,
            buffer_prefetch: 0,
            max_row_size: 0,
            oracle_compatible: false,
        }
    }
}

/// Where an exchange currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Init,
    HeaderWritten,
    BodyWritten,
    Sent,
    HeaderRead,
    BodyRead,
    Parsed,
    Failed,
}

/// Encoding and decoding hooks of one message kind.
pub(crate) trait Request {
    fn code(&self, ctx: &MessageContext) -> MessageCode;

    fn stmt_id(&self) -> i32 {
        0
    }

    fn write_header(&self, _frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<()> {
        Ok(())
    }

    fn write_body(&self, _frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<()> {
        Ok(())
    }

    fn read_response(&self, frame: &mut ByteBuffer, ctx: &MessageContext) -> Result<Response>;
}

/// Every request the driver can send.
#[derive(Debug)]
pub enum Message<'a> {
    Handshake(HandshakeRequest),
    Login(LoginRequest<'a>),
    AllocStatement(AllocStatementRequest),
    FreeStatement(FreeStatementRequest),
    Prepare(PrepareRequest<'a>),
    Execute(ExecuteRequest<'a>),
    PreExecute(PreExecuteRequest<'a>),
    PutData(PutDataRequest<'a>),
    Fetch(FetchRequest<'a>),
    MoreResults(MoreResultsRequest<'a>),
    Commit(CommitRequest),
    Rollback(RollbackRequest),
    SetIsolation(SetIsolationRequest),
    SetCursorName(SetCursorNameRequest<'a>),
    LobLength(LobLengthRequest<'a>),
    LobRead(LobReadRequest<'a>),
    LobWrite(LobWriteRequest<'a>),
    LobTruncate(LobTruncateRequest<'a>),
    TableTimestamps(TableTimestampsRequest<'a>),
}

impl Message<'_> {
    fn request(&self) -> &dyn Request {
        match self {
            Message::Handshake(m) => m,
            Message::Login(m) => m,
            Message::AllocStatement(m) => m,
            Message::FreeStatement(m) => m,
            Message::Prepare(m) => m,
            Message::Execute(m) => m,
            Message::PreExecute(m) => m,
            Message::PutData(m) => m,
            Message::Fetch(m) => m,
            Message::MoreResults(m) => m,
            Message::Commit(m) => m,
            Message::Rollback(m) => m,
            Message::SetIsolation(m) => m,
            Message::SetCursorName(m) => m,
            Message::LobLength(m) => m,
            Message::LobRead(m) => m,
            Message::LobWrite(m) => m,
            Message::LobTruncate(m) => m,
            Message::TableTimestamps(m) => m,
        }
    }

    pub fn code(&self, ctx: &MessageContext) -> MessageCode {
        self.request().code(ctx)
    }

    /// Build the unencoded frame for this request.
    pub fn encode(&self, ctx: &MessageContext) -> Result<ByteBuffer> {
        let request = self.request();
        let mut frame = new_frame(request.code(ctx), request.stmt_id());
        request.write_header(&mut frame, ctx)?;
        request.write_body(&mut frame, ctx)?;
        Ok(frame)
    }
}

/// Parsed reply of one exchange.
#[derive(Debug)]
pub enum Response {
    /// Nothing beyond the return code
    Ack,
    Handshake(HandshakeInfo),
    Login(Box<LoginInfo>),
    Allocated(AllocatedStatement),
    Prepared(PrepareInfo),
    Executed(Box<ExecuteInfo>),
    Fetched(FetchInfo),
    LobLength(i64),
    LobChunk(LobChunk),
    LobWritten(LobWritten),
    LobTruncated(LobTruncated),
    TableTimestamps(Vec<i64>),
}

impl Response {
    fn kind(&self) -> &'static str {
        match self {
            Response::Ack => "ack",
            Response::Handshake(_) => "handshake",
            Response::Login(_) => "login",
            Response::Allocated(_) => "allocate",
            Response::Prepared(_) => "prepare",
            Response::Executed(_) => "execute",
            Response::Fetched(_) => "fetch",
            Response::LobLength(_) => "lob length",
            Response::LobChunk(_) => "lob read",
            Response::LobWritten(_) => "lob write",
            Response::LobTruncated(_) => "lob truncate",
            Response::TableTimestamps(_) => "table timestamps",
        }
    }

    /// Error for a reply that does not match the request.
    pub fn unexpected(&self, wanted: &str) -> Error {
        protocol_error(format!(
            "expected a {} response, got {}",
            wanted,
            self.kind()
        ))
    }
}

/// Anything that can move whole frames.
pub trait FrameIo {
    fn send_frame(&mut self, frame: &mut ByteBuffer) -> Result<()>;
    fn receive_frame(&mut self) -> Result<ByteBuffer>;

    /// Release the underlying channel without sending anything.
    fn close(&mut self) {}
}

impl FrameIo for Transport {
    fn send_frame(&mut self, frame: &mut ByteBuffer) -> Result<()> {
        self.send(frame)
    }

    fn receive_frame(&mut self) -> Result<ByteBuffer> {
        self.receive()
    }

    fn close(&mut self) {
        self.shutdown();
    }
}

/// Drives one message through the cycle.
#[derive(Debug)]
pub struct Exchange<'m, 'a> {
    message: &'m Message<'a>,
    state: MessageState,
}

impl<'m, 'a> Exchange<'m, 'a> {
    pub fn new(message: &'m Message<'a>) -> Self {
        Self {
            message,
            state: MessageState::Init,
        }
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    pub fn run<T: FrameIo + ?Sized>(&mut self, io: &mut T, ctx: &MessageContext) -> Result<Response> {
        let result = self.cycle(io, ctx);
        if result.is_err() {
            self.state = MessageState::Failed;
        }
        result
    }

    fn cycle<T: FrameIo + ?Sized>(&mut self, io: &mut T, ctx: &MessageContext) -> Result<Response> {
        let request = self.message.request();
        let code = request.code(ctx);
        let mut frame = new_frame(code, request.stmt_id());

        request.write_header(&mut frame, ctx)?;
        self.state = MessageState::HeaderWritten;
        request.write_body(&mut frame, ctx)?;
        self.state = MessageState::BodyWritten;

        io.send_frame(&mut frame)?;
        self.state = MessageState::Sent;

        let mut reply = io.receive_frame()?;
        self.state = MessageState::HeaderRead;
        check_response(&mut reply, code, ctx)?;
        self.state = MessageState::BodyRead;

        let response = request.read_response(&mut reply, ctx)?;
        self.state = MessageState::Parsed;
        Ok(response)
    }
}

/// Run one message to completion.
pub fn exchange<T: FrameIo + ?Sized>(
    io: &mut T,
    ctx: &MessageContext,
    message: &Message<'_>,
) -> Result<Response> {
    Exchange::new(message).run(io, ctx)
}

/// Apply the return-code rules to a decoded reply.
///
/// Negative codes fail with the server's message, except the benign
/// rowset-exceeded code. A successful handshake or login carries a
/// message block that is consumed here so body parsing starts after it.
pub fn check_response(frame: &mut ByteBuffer, code: MessageCode, ctx: &MessageContext) -> Result<()> {
    frame.set_position(HEADER_LEN)?;
    let ret = frame.get_i32_at(header::RET_CODE)?;
    let charset = if code == MessageCode::Handshake {
        Charset::from_server_code(frame.get_i32_at(header::FIELDS + 8)?)
    } else {
        ctx.charset
    };

    if ret < 0 && ret != ret_code::ROWSET_EXCEEDED {
        let message = read_message_block(frame, charset)?;
        tracing::debug!(code = ret, %message, "server returned an error");
        return Err(Error::Server(ServerError {
            code: ret,
            message,
            sql: None,
        }));
    }
    if ret == 0 && matches!(code, MessageCode::Handshake | MessageCode::Login) {
        read_message_block(frame, charset)?;
    }
    Ok(())
}

/// Three skipped length-prefixed fields followed by the message text.
pub fn read_message_block(frame: &mut ByteBuffer, charset: Charset) -> Result<String> {
    if frame.remaining() == 0 {
        return Ok(String::new());
    }
    for _ in 0..3 {
        frame.read_i32_bytes()?;
    }
    let text = frame.read_i32_bytes()?;
    charset.decode(text)
}

pub(crate) fn protocol_error(message: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: message.into(),
        raw_data: None,
        source: None,
    })
}

/// Read an i32-length string in the session charset.
pub(crate) fn read_string(frame: &mut ByteBuffer, charset: Charset) -> Result<String> {
    let bytes = frame.read_i32_bytes()?;
    charset.decode(bytes)
}

/// Read a u16-length string in the session charset.
pub(crate) fn read_short_string(frame: &mut ByteBuffer, charset: Charset) -> Result<String> {
    let bytes = frame.read_u16_bytes()?;
    charset.decode(bytes)
}

/// Read a string whose length was given earlier.
pub(crate) fn read_fixed_string(frame: &mut ByteBuffer, len: usize, charset: Charset) -> Result<String> {
    let bytes = frame.read_bytes(len)?;
    charset.decode(bytes)
}

/// Write an i32-length string in the session charset.
pub(crate) fn write_string(frame: &mut ByteBuffer, text: &str, charset: Charset) -> Result<()> {
    let bytes = charset.encode(text)?;
    frame.write_i32_bytes(&bytes)?;
    Ok(())
}
