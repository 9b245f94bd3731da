//! Authentication (code 1) and the session attributes it returns.

#![allow(clippy::cast_sign_loss)]

use dmwire_core::{ConfigError, Error, Result};

use crate::crypto::Cipher;

use super::message::{
    MessageContext, Request, Response, read_fixed_string, read_string,
};
use super::{ByteBuffer, MAX_CREDENTIAL_LEN, MessageCode, header};

/// Client type codes announced in the login header.
pub mod client_type {
    pub const LEGACY: i32 = 2;
    pub const CURRENT: i32 = 5;
}

mod offset {
    use super::header::FIELDS;

    pub const CLIENT_TYPE: usize = FIELDS;
    pub const ISOLATION: usize = FIELDS + 4;
    pub const LANGUAGE: usize = FIELDS + 8;
    pub const READ_ONLY: usize = FIELDS + 12;
    pub const TIME_ZONE: usize = FIELDS + 13;
    pub const SESSION_TIMEOUT: usize = FIELDS + 15;
    pub const MPP_LOCAL: usize = FIELDS + 19;
    pub const RW_SEPARATE: usize = FIELDS + 20;
    pub const NEW_LOB: usize = FIELDS + 21;
    pub const OS_AUTH: usize = FIELDS + 22;

    pub const R_MAX_ROW_SIZE: usize = FIELDS;
    pub const R_DDL_AUTOCOMMIT: usize = FIELDS + 8;
    pub const R_ISOLATION: usize = FIELDS + 9;
    pub const R_CASE_SENSITIVE: usize = FIELDS + 13;
    pub const R_BACKSLASH: usize = FIELDS + 14;
    pub const R_SERVER_MODE: usize = FIELDS + 15;
    pub const R_SERVER_STATUS: usize = FIELDS + 17;
    pub const R_CONST_PARA: usize = FIELDS + 19;
    pub const R_DB_TIME_ZONE: usize = FIELDS + 20;
    pub const R_STANDBY: usize = FIELDS + 22;
    pub const R_NEW_LOB: usize = FIELDS + 23;
    pub const R_BUFFER_PREFETCH: usize = FIELDS + 24;
    pub const R_LIFETIME: usize = FIELDS + 28;
    pub const R_DSC_CONTROL: usize = FIELDS + 30;
}

/// Oracle-style default date/time formats announced by the server.
pub const ORACLE_FORMATS: [&str; 5] = [
    "DD-MON-YY",
    "HH12.MI.SS.FF6 AM",
    "DD-MON-YY HH12.MI.SS.FF6 AM",
    "DD-MON-YY HH12.MI.SS.FF6 AM +TZH:TZM",
    "HH12.MI.SS.FF6 AM +TZH:TZM",
];

pub struct LoginRequest<'a> {
    pub user: &'a str,
    pub password: &'a str,
    pub app_name: &'a str,
    pub os_name: &'a str,
    pub host_name: &'a str,
    pub new_client_type: bool,
    pub isolation: i32,
    pub language: i32,
    pub read_only: bool,
    /// Minutes east of UTC
    pub time_zone: i16,
    pub session_timeout: i32,
    pub new_lob_flag: bool,
    /// Set when only the credentials are encrypted
    pub credential_cipher: Option<&'a dyn Cipher>,
}

impl std::fmt::Debug for LoginRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("user", &self.user)
            .field("app_name", &self.app_name)
            .field("encrypted", &self.credential_cipher.is_some())
            .finish_non_exhaustive()
    }
}

/// Standby server advertised by a primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandbyInfo {
    pub host: String,
    pub port: i32,
    pub count: u16,
}

/// Session attributes returned by a successful login.
#[derive(Debug, Clone, Default)]
pub struct LoginInfo {
    pub max_row_size: i32,
    pub ddl_autocommit: bool,
    pub isolation: i32,
    pub case_sensitive: bool,
    pub backslash_escape: bool,
    pub server_mode: i16,
    pub server_status: i16,
    pub const_para_opt: bool,
    pub db_time_zone: i16,
    pub new_lob_flag: bool,
    pub buffer_prefetch: i32,
    pub lifetime_remaining: i16,
    pub dsc_control: bool,
    pub instance_name: String,
    pub schema: String,
    pub last_login_ip: String,
    pub last_login_time: String,
    pub failed_attempts: i32,
    pub warning_id: i32,
    pub grace_time_remaining: i32,
    pub guid: String,
    pub db_name: String,
    pub standby: Option<StandbyInfo>,
    pub session_id: Option<i64>,
    /// date, time, timestamp, timestamp-tz, time-tz
    pub formats: [Option<String>; 5],
}

fn credential(text: &str, what: &str, ctx: &MessageContext, cipher: Option<&dyn Cipher>) -> Result<Vec<u8>> {
    let bytes = ctx.charset.encode(text)?;
    if bytes.len() > MAX_CREDENTIAL_LEN {
        return Err(Error::Config(ConfigError {
            message: format!(
                "{} is {} bytes; the limit is {}",
                what,
                bytes.len(),
                MAX_CREDENTIAL_LEN
            ),
            source: None,
        }));
    }
    match cipher {
        Some(cipher) => cipher.encrypt(&bytes),
        None => Ok(bytes.into_owned()),
    }
}

impl Request for LoginRequest<'_> {
    fn code(&self, _ctx: &MessageContext) -> MessageCode {
        MessageCode::Login
    }

    fn write_header(&self, frame: &mut ByteBuffer, _ctx: &MessageContext) -> Result<()> {
        let client = if self.new_client_type {
            client_type::CURRENT
        } else {
            client_type::LEGACY
        };
        frame.put_i32_at(offset::CLIENT_TYPE, client)?;
        frame.put_i32_at(offset::ISOLATION, self.isolation)?;
        frame.put_i32_at(offset::LANGUAGE, self.language)?;
        frame.put_u8_at(offset::READ_ONLY, u8::from(self.read_only))?;
        frame.put_i16_at(offset::TIME_ZONE, self.time_zone)?;
        frame.put_i32_at(offset::SESSION_TIMEOUT, self.session_timeout)?;
        frame.put_u8_at(offset::MPP_LOCAL, 0)?;
        frame.put_u8_at(offset::RW_SEPARATE, 0)?;
        frame.put_u8_at(offset::NEW_LOB, u8::from(self.new_lob_flag))?;
        frame.put_u8_at(offset::OS_AUTH, 0)?;
        Ok(())
    }

    fn write_body(&self, frame: &mut ByteBuffer, ctx: &MessageContext) -> Result<()> {
        let user = credential(self.user, "user name", ctx, self.credential_cipher)?;
        let password = credential(self.password, "password", ctx, self.credential_cipher)?;
        frame.write_i32_bytes(&user)?;
        frame.write_i32_bytes(&password)?;
        for text in [self.app_name, self.os_name, self.host_name] {
            let bytes = ctx.charset.encode(text)?;
            frame.write_i32_bytes(&bytes)?;
        }
        // read-write standby
        frame.write_u8(0);
        Ok(())
    }

    fn read_response(&self, frame: &mut ByteBuffer, ctx: &MessageContext) -> Result<Response> {
        let cs = ctx.charset;
        let mut info = LoginInfo {
            max_row_size: frame.get_i32_at(offset::R_MAX_ROW_SIZE)?,
            ddl_autocommit: frame.get_u8_at(offset::R_DDL_AUTOCOMMIT)? == 1,
            isolation: frame.get_i32_at(offset::R_ISOLATION)?,
            case_sensitive: frame.get_u8_at(offset::R_CASE_SENSITIVE)? == 1,
            backslash_escape: frame.get_u8_at(offset::R_BACKSLASH)? == 1,
            server_mode: frame.get_i16_at(offset::R_SERVER_MODE)?,
            server_status: frame.get_i16_at(offset::R_SERVER_STATUS)?,
            const_para_opt: frame.get_u8_at(offset::R_CONST_PARA)? == 1,
            db_time_zone: frame.get_i16_at(offset::R_DB_TIME_ZONE)?,
            new_lob_flag: frame.get_u8_at(offset::R_NEW_LOB)? == 1,
            buffer_prefetch: frame.get_i32_at(offset::R_BUFFER_PREFETCH)?,
            lifetime_remaining: frame.get_i16_at(offset::R_LIFETIME)?,
            dsc_control: frame.get_u8_at(offset::R_DSC_CONTROL)? == 1,
            ..LoginInfo::default()
        };

        info.instance_name = read_string(frame, cs)?;
        let schema_len = frame.read_i32()?;
        info.schema = if schema_len == 0 && ctx.msg_version > 0 {
            self.user.to_uppercase()
        } else {
            read_fixed_string(frame, schema_len.max(0) as usize, cs)?
        };
        info.last_login_ip = read_string(frame, cs)?;
        info.last_login_time = read_string(frame, cs)?;
        info.failed_attempts = frame.read_i32()?;
        info.warning_id = frame.read_i32()?;
        info.grace_time_remaining = frame.read_i32()?;
        info.guid = read_string(frame, cs)?;
        info.db_name = read_string(frame, cs)?;

        if frame.get_u8_at(offset::R_STANDBY)? == 1 {
            info.standby = Some(StandbyInfo {
                host: read_string(frame, cs)?,
                port: frame.read_i32()?,
                count: frame.read_u16()?,
            });
        }
        if frame.remaining() > 0 {
            info.session_id = Some(frame.read_i64()?);
        }
        if frame.remaining() > 0 && frame.read_u8()? == 1 {
            for (slot, format) in info.formats.iter_mut().zip(ORACLE_FORMATS) {
                *slot = Some(format.to_string());
            }
        }
        if frame.remaining() > 0 {
            for slot in &mut info.formats {
                let format = cs.decode(frame.read_u8_bytes()?)?;
                if !format.is_empty() {
                    *slot = Some(format);
                }
            }
        }

        tracing::debug!(
            schema = %info.schema,
            session_id = ?info.session_id,
            db_name = %info.db_name,
            "login accepted"
        );
        Ok(Response::Login(Box::new(info)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{BuiltinCipher, HashAlgorithm, SymmetricAlgorithm};
    use crate::protocol::message::testing::{ScriptedIo, reply_frame, write_message_block};
    use crate::protocol::message::{Message, exchange};
    use crate::protocol::{Charset, HEADER_LEN};

    fn request<'a>(user: &'a str, password: &'a str) -> LoginRequest<'a> {
        LoginRequest {
            user,
            password,
            app_name: "app",
            os_name: "linux",
            host_name: "h",
            new_client_type: true,
            isolation: 1,
            language: 0,
            read_only: false,
            time_zone: 480,
            session_timeout: 0,
            new_lob_flag: true,
            credential_cipher: None,
        }
    }

    fn ctx() -> MessageContext {
        MessageContext {
            charset: Charset::Utf8,
            msg_version: 1,
            ..MessageContext::default()
        }
    }

    fn body_strings(frame: &mut ByteBuffer, n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|_| frame.read_i32_bytes().unwrap().to_vec()).collect()
    }

    #[test]
    fn test_request_layout() {
        let frame = Message::Login(request("SYSDBA", "secret"))
            .encode(&ctx())
            .unwrap();
        assert_eq!(frame.get_i32_at(offset::CLIENT_TYPE).unwrap(), client_type::CURRENT);
        assert_eq!(frame.get_i16_at(offset::TIME_ZONE).unwrap(), 480);
        assert_eq!(frame.get_u8_at(offset::NEW_LOB).unwrap(), 1);
        let mut body = ByteBuffer::from_vec(frame.as_slice()[HEADER_LEN..].to_vec());
        let strings = body_strings(&mut body, 5);
        assert_eq!(strings[0], b"SYSDBA");
        assert_eq!(strings[1], b"secret");
        assert_eq!(strings[2], b"app");
        assert_eq!(body.read_u8().unwrap(), 0);
        assert_eq!(body.remaining(), 0);
    }

    #[test]
    fn test_credentials_are_encrypted() {
        let cipher = BuiltinCipher::new(SymmetricAlgorithm::DesCfb, HashAlgorithm::Md5, &[3; 128]);
        let mut req = request("SYSDBA", "secret");
        req.credential_cipher = Some(&cipher);
        let frame = Message::Login(req).encode(&ctx()).unwrap();
        let mut body = ByteBuffer::from_vec(frame.as_slice()[HEADER_LEN..].to_vec());
        let strings = body_strings(&mut body, 2);
        assert_ne!(strings[0], b"SYSDBA");
        assert_eq!(cipher.decrypt(&strings[0]).unwrap(), b"SYSDBA");
        assert_eq!(cipher.decrypt(&strings[1]).unwrap(), b"secret");
    }

    #[test]
    fn test_credential_length_limit() {
        let long = "x".repeat(MAX_CREDENTIAL_LEN + 1);
        let err = Message::Login(request(&long, "p")).encode(&ctx()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let exact = "x".repeat(MAX_CREDENTIAL_LEN);
        assert!(Message::Login(request(&exact, "p")).encode(&ctx()).is_ok());
    }

    #[test]
    fn test_response_defaults_schema_to_user() {
        let mut reply = reply_frame(MessageCode::Login, 0);
        reply.put_i32_at(offset::R_MAX_ROW_SIZE, 8000).unwrap();
        reply.put_i32_at(offset::R_ISOLATION, 1).unwrap();
        reply.put_i16_at(offset::R_DB_TIME_ZONE, 480).unwrap();
        reply.put_u8_at(offset::R_NEW_LOB, 1).unwrap();
        write_message_block(&mut reply, "");
        reply.write_i32_bytes(b"DMSERVER").unwrap();
        reply.write_i32(0);
        reply.write_i32_bytes(b"10.0.0.1").unwrap();
        reply.write_i32_bytes(b"2024-01-01").unwrap();
        reply.write_i32(0);
        reply.write_i32(0);
        reply.write_i32(-1);
        reply.write_i32_bytes(b"guid").unwrap();
        reply.write_i32_bytes(b"DAMENG").unwrap();
        reply.write_i64(77);
        reply.write_u8(0);
        for format in ["YYYY-MM-DD", "", "", "", ""] {
            reply.write_u8_bytes(format.as_bytes()).unwrap();
        }

        let mut io = ScriptedIo::default().reply(reply);
        let message = Message::Login(request("sysdba", "p"));
        let Response::Login(info) = exchange(&mut io, &ctx(), &message).unwrap() else {
            panic!("wrong response kind");
        };
        assert_eq!(info.schema, "SYSDBA");
        assert_eq!(info.instance_name, "DMSERVER");
        assert_eq!(info.db_name, "DAMENG");
        assert_eq!(info.session_id, Some(77));
        assert_eq!(info.max_row_size, 8000);
        assert!(info.new_lob_flag);
        assert_eq!(info.formats[0].as_deref(), Some("YYYY-MM-DD"));
        assert_eq!(info.formats[1], None);
        assert!(info.standby.is_none());
    }
}
