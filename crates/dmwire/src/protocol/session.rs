//! Transaction and session messages.

use dmwire_core::Result;

use super::message::{MessageContext, Request, Response, protocol_error};
use super::{ByteBuffer, MessageCode, header};

#[derive(Debug, Clone, Copy, Default)]
pub struct CommitRequest;

impl Request for CommitRequest {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::Commit
    }

    fn read_response(&self, _frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<Response> {
        Ok(Response::Ack)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RollbackRequest;

impl Request for RollbackRequest {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::Rollback
    }

    fn read_response(&self, _frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<Response> {
        Ok(Response::Ack)
    }
}

/// Change the session isolation level (wire code 0-3).
#[derive(Debug, Clone, Copy)]
pub struct SetIsolationRequest {
    pub level: i32,
}

impl Request for SetIsolationRequest {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::SetIsolation
    }

    fn write_header(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<()> {
        frame.put_i32_at(header::FIELDS, self.level)?;
        Ok(())
    }

    fn read_response(&self, _frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<Response> {
        Ok(Response::Ack)
    }
}

/// Probe the modification timestamps of tables behind a cached result.
#[derive(Debug, Clone)]
pub struct TableTimestampsRequest<'a> {
    pub table_ids: &'a [i32],
}

impl Request for TableTimestampsRequest<'_> {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::TableTimestamps
    }

    fn write_header(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<()> {
        let count = u16::try_from(self.table_ids.len())
            .map_err(|_| protocol_error(format!("{} tables in one probe", self.table_ids.len())))?;
        frame.put_u16_at(header::FIELDS, count)?;
        Ok(())
    }

    fn write_body(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<()> {
        for id in self.table_ids {
            frame.write_i32(*id);
        }
        Ok(())
    }

    fn read_response(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<Response> {
        let count = usize::from(frame.get_u16_at(header::FIELDS)?);
        let mut stamps = Vec::with_capacity(count.min(frame.remaining() / 8));
        for _ in 0..count {
            stamps.push(frame.read_i64()?);
        }
        Ok(Response::TableTimestamps(stamps))
    }
}
