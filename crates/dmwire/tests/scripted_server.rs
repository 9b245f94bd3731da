//! End-to-end tests against an in-process server that speaks the wire
//! protocol with the crate's own frame codec.

use std::collections::HashMap;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dmwire::config::CompressionMode;
use dmwire::crypto::{DhKeyPair, build_cipher, cipher_id, hash_id};
use dmwire::lob::OFF_ROW;
use dmwire::protocol::lob::LobLocator;
use dmwire::protocol::{ByteBuffer, CompressionId, HEADER_LEN, HeaderVariant, MessageCode, header};
use dmwire::transport::{FramePolicy, decode_frame, encode_frame, new_frame};
use dmwire::{Config, Connection, ConnectionState, Error, Lob, LobKind, Value};

const FIELDS: usize = header::FIELDS;

const SERVER_VERSION: &[u8] = b"8.1.2.192";
const RET_DDL: i16 = 147;
const RET_INSERT: i16 = 157;
const RET_SELECT: i16 = 160;
const SQL_INT: i32 = 7;
const SQL_VARCHAR: i32 = 2;
const SQL_CLOB: i32 = 19;

/// What the server announces in its handshake reply.
#[derive(Debug, Clone, Copy)]
struct Negotiation {
    compression: CompressionMode,
    compression_id: CompressionId,
    crc: bool,
    send_key: bool,
    /// Cipher and hash id when the whole stream is encrypted
    stream_cipher: Option<(i32, i32)>,
}

impl Default for Negotiation {
    fn default() -> Self {
        Self {
            compression: CompressionMode::Off,
            compression_id: CompressionId::Zlib,
            crc: false,
            send_key: false,
            stream_cipher: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Received {
    code: i16,
    stmt_id: i32,
    header: Vec<u8>,
    body: Vec<u8>,
}

impl Received {
    fn message(&self) -> Option<MessageCode> {
        MessageCode::from_i16(self.code)
    }

    fn body(&self) -> ByteBuffer {
        ByteBuffer::from_vec(self.body.clone())
    }

    fn header_u8(&self, offset: usize) -> u8 {
        self.header[offset]
    }

    /// SQL text of a prepare request.
    fn sql(&self) -> String {
        let end = self.body.iter().position(|&b| b == 0).unwrap_or(self.body.len());
        String::from_utf8(self.body[..end].to_vec()).unwrap()
    }
}

#[derive(Debug, Default)]
struct ServerLog {
    user: Vec<u8>,
    password: Vec<u8>,
    frames: Vec<Received>,
}

impl ServerLog {
    fn codes(&self) -> Vec<i16> {
        self.frames.iter().map(|f| f.code).collect()
    }

    fn count(&self, code: MessageCode) -> usize {
        self.frames.iter().filter(|f| f.message() == Some(code)).count()
    }
}

fn message_block(frame: &mut ByteBuffer, text: &str) {
    for _ in 0..3 {
        frame.write_i32(0);
    }
    frame.write_i32_bytes(text.as_bytes()).unwrap();
}

fn send(policy: &FramePolicy, stream: &mut TcpStream, mut frame: ByteBuffer) -> bool {
    encode_frame(policy, &mut frame).unwrap();
    stream.write_all(frame.as_slice()).is_ok()
}

/// Driver logs show up with `RUST_LOG=dmwire=trace`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn spawn_server<H>(neg: Negotiation, mut handler: H) -> (u16, JoinHandle<ServerLog>)
where
    H: FnMut(&Received) -> ByteBuffer + Send + 'static,
{
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut policy = FramePolicy::default();
        let mut log = ServerLog::default();

        let mut hello = decode_frame(&policy, &mut stream).unwrap();
        hello.read_i32_bytes().unwrap();
        hello.read_u8().unwrap();
        let client_key = if hello.get_u8_at(FIELDS + 8).unwrap() == 1 {
            Some(hello.read_i32_bytes().unwrap().to_vec())
        } else {
            None
        };

        let keys = DhKeyPair::generate();
        let session_key = match &client_key {
            Some(peer) if neg.send_key => Some(keys.compute_session_key(peer).unwrap()),
            _ => None,
        };
        let stream_cipher = neg.stream_cipher.filter(|_| session_key.is_some());

        let mut reply = new_frame(MessageCode::Handshake, 0);
        reply.put_i32_at(FIELDS + 8, 1).unwrap();
        reply.put_i32_at(FIELDS + 12, neg.compression.to_wire()).unwrap();
        reply.put_u8_at(FIELDS + 20, u8::from(session_key.is_some())).unwrap();
        reply
            .put_u8_at(FIELDS + 21, if stream_cipher.is_some() { 2 } else { 0 })
            .unwrap();
        reply.put_u8_at(FIELDS + 23, neg.compression_id.to_wire()).unwrap();
        reply.put_u8_at(FIELDS + 25, u8::from(neg.crc)).unwrap();
        reply.put_u16_at(FIELDS + 28, 2).unwrap();
        message_block(&mut reply, "");
        reply.write_i32_bytes(SERVER_VERSION).unwrap();
        if let Some((cipher, _)) = stream_cipher {
            reply.write_i32(cipher);
        }
        if session_key.is_some() {
            reply.write_i32_bytes(&keys.public_bytes()).unwrap();
        }
        if let Some((_, hash)) = stream_cipher {
            reply.write_i32(hash);
        }
        assert!(send(&policy, &mut stream, reply));

        policy.header = if neg.crc {
            HeaderVariant::Crc32
        } else {
            HeaderVariant::LegacyXor
        };
        policy.compression = neg.compression;
        policy.compression_id = neg.compression_id;
        if let (Some(key), Some((cipher, hash))) = (&session_key, stream_cipher) {
            policy.cipher = Some(build_cipher(cipher, hash, key, "", None).unwrap());
        }

        let mut login = decode_frame(&policy, &mut stream).unwrap();
        let user = login.read_i32_bytes().unwrap().to_vec();
        let password = login.read_i32_bytes().unwrap().to_vec();
        (log.user, log.password) = match &session_key {
            Some(key) if stream_cipher.is_none() => {
                let cipher =
                    build_cipher(cipher_id::UNSPECIFIED, hash_id::UNSPECIFIED, key, "", None).unwrap();
                (cipher.decrypt(&user).unwrap(), cipher.decrypt(&password).unwrap())
            }
            _ => (user, password),
        };

        let mut reply = new_frame(MessageCode::Login, 0);
        reply.put_i32_at(FIELDS, 8000).unwrap();
        reply.put_i32_at(FIELDS + 9, 1).unwrap();
        message_block(&mut reply, "");
        reply.write_i32_bytes(b"DMSERVER").unwrap();
        reply.write_i32_bytes(b"APP").unwrap();
        reply.write_i32_bytes(b"127.0.0.1").unwrap();
        reply.write_i32_bytes(b"2026-10-01 12:00:00").unwrap();
        for _ in 0..3 {
            reply.write_i32(0);
        }
        reply.write_i32_bytes(b"guid-1").unwrap();
        reply.write_i32_bytes(b"DAMENG").unwrap();
        reply.write_i64(77);
        assert!(send(&policy, &mut stream, reply));

        while let Ok(frame) = decode_frame(&policy, &mut stream) {
            let received = Received {
                code: frame.get_i16_at(header::CODE).unwrap(),
                stmt_id: frame.get_i32_at(header::STMT_ID).unwrap(),
                header: frame.as_slice()[..HEADER_LEN].to_vec(),
                body: frame.as_slice()[HEADER_LEN..].to_vec(),
            };
            let reply = handler(&received);
            log.frames.push(received);
            if !send(&policy, &mut stream, reply) {
                break;
            }
        }
        log
    });
    (port, handle)
}

fn config(port: u16) -> Config {
    Config::new()
        .host("127.0.0.1")
        .port(port)
        .user("app")
        .password("secret")
        .encryption(false)
        .connect_timeout(Duration::from_secs(5))
}

fn ack(req: &Received) -> ByteBuffer {
    new_frame(req.message().unwrap_or(MessageCode::Commit), req.stmt_id)
}

fn error_reply(req: &Received, code: i32, text: &str) -> ByteBuffer {
    let mut reply = ack(req);
    reply.put_i32_at(header::RET_CODE, code).unwrap();
    message_block(&mut reply, text);
    reply
}

fn alloc_reply(stmt_id: i32) -> ByteBuffer {
    new_frame(MessageCode::AllocStatement, stmt_id)
}

fn ddl_reply(req: &Received) -> ByteBuffer {
    let mut reply = ack(req);
    reply.put_i16_at(FIELDS, RET_DDL).unwrap();
    reply
}

fn write_names(frame: &mut ByteBuffer, name: &str) {
    frame.write_i16(i16::try_from(name.len()).unwrap());
    for _ in 0..3 {
        frame.write_i16(0);
    }
    frame.write_bytes(name.as_bytes());
}

/// One VARCHAR column named NAME; each table is reported with its stamp.
fn select_reply(req: &Received, names: &[&str], tables: &[(i32, i64)]) -> ByteBuffer {
    let rows = i32::try_from(names.len()).unwrap();
    let mut reply = ack(req);
    reply.put_i16_at(FIELDS, RET_SELECT).unwrap();
    reply.put_u16_at(FIELDS + 2, 1).unwrap();
    reply.put_i64_at(FIELDS + 4, i64::from(rows)).unwrap();
    reply.put_i32_at(FIELDS + 15, rows).unwrap();
    reply.put_i16_at(FIELDS + 24, -1).unwrap();
    reply
        .put_i32_at(FIELDS + 35, i32::from(!tables.is_empty()))
        .unwrap();

    reply.write_i32(SQL_VARCHAR);
    reply.write_i32(50);
    reply.write_i32(0);
    reply.write_i32(1);
    reply.write_i16(0);
    reply.write_bytes(&[0; 6]);
    write_names(&mut reply, "NAME");

    for name in names {
        reply.write_u16(0);
        reply.write_bytes(&[0; 8]);
        reply.write_bytes(&[0; 2]);
        reply.write_u16_bytes(name.as_bytes()).unwrap();
    }
    if !tables.is_empty() {
        reply.write_i16(i16::try_from(tables.len()).unwrap());
        for (id, stamp) in tables {
            reply.write_i32(*id);
            reply.write_i64(*stamp);
        }
    }
    reply
}

/// Prepared INSERT with a single INT parameter.
fn insert_prepare_reply(req: &Received) -> ByteBuffer {
    let mut reply = ack(req);
    reply.put_i16_at(FIELDS, RET_INSERT).unwrap();
    reply.put_u16_at(FIELDS + 2, 1).unwrap();
    reply.put_i16_at(FIELDS + 4, 0).unwrap();
    reply.write_i32(SQL_INT);
    reply.write_i32(10);
    reply.write_i32(0);
    reply.write_i32(1);
    reply.write_i16(0);
    reply.write_bytes(&[0; 4]);
    reply.write_i16(0);
    write_names(&mut reply, "ID");
    reply
}

fn insert_reply(req: &Received, row_id: i64) -> ByteBuffer {
    let mut reply = ack(req);
    reply.put_i16_at(FIELDS, RET_INSERT).unwrap();
    reply.put_i64_at(FIELDS + 4, 1).unwrap();
    reply.put_i64_at(FIELDS + 23, row_id).unwrap();
    reply
}

fn is_exec_direct(req: &Received) -> bool {
    req.header_u8(FIELDS + 1) == 1
}

#[test]
fn stream_encryption_with_compression_reaches_ready() {
    let neg = Negotiation {
        compression: CompressionMode::Always,
        crc: true,
        send_key: true,
        stream_cipher: Some((cipher_id::AES128_CFB, hash_id::SHA1)),
        ..Negotiation::default()
    };
    let (port, server) = spawn_server(neg, |req| match req.message() {
        Some(MessageCode::AllocStatement) => alloc_reply(21),
        Some(MessageCode::Prepare) => ddl_reply(req),
        _ => ack(req),
    });

    let mut conn = Connection::connect(config(port).encryption(true)).unwrap();
    assert_eq!(conn.state(), ConnectionState::Ready);
    let session = conn.session();
    assert_eq!(session.schema, "APP");
    assert_eq!(session.db_name, "DAMENG");
    assert_eq!(session.instance_name, "DMSERVER");
    assert_eq!(session.guid, "guid-1");
    assert_eq!(session.session_id, Some(77));
    assert_eq!(session.cipher_id, cipher_id::AES128_CFB);
    assert_eq!(session.compression, CompressionMode::Always);
    assert_eq!(session.header_variant, HeaderVariant::Crc32);
    assert_eq!(session.charset, "UTF-8");

    let sql = "CREATE TABLE T1 (ID INT, NAME VARCHAR(20))";
    let execution = conn.execute_direct(sql).unwrap();
    assert_eq!(execution.kind, RET_DDL);
    assert!(!execution.is_query());
    drop(conn);

    let log = server.join().unwrap();
    assert_eq!(log.user, b"app");
    assert_eq!(log.password, b"secret");
    let prepare = log
        .frames
        .iter()
        .find(|f| f.message() == Some(MessageCode::Prepare))
        .unwrap();
    assert!(is_exec_direct(prepare));
    assert_eq!(prepare.stmt_id, 21);
    assert_eq!(prepare.sql(), sql);
}

#[test]
fn login_only_encryption_protects_credentials() {
    let neg = Negotiation {
        send_key: true,
        ..Negotiation::default()
    };
    let (port, server) = spawn_server(neg, ack);
    let password = "0123456789abcdefghijklmnopqrstu";
    assert_eq!(password.len(), 31);

    let mut conn = Connection::connect(config(port).encryption(true).password(password)).unwrap();
    assert!(conn.is_ready());
    assert_eq!(conn.session().cipher_id, -1);
    conn.close();
    assert_eq!(conn.state(), ConnectionState::Closed);

    let log = server.join().unwrap();
    assert_eq!(log.user, b"app");
    assert_eq!(log.password, password.as_bytes());
    assert!(log.frames.is_empty());
}

fn batch_server() -> (u16, JoinHandle<ServerLog>) {
    let mut executes = 0;
    spawn_server(Negotiation::default(), move |req| match req.message() {
        Some(MessageCode::AllocStatement) => alloc_reply(31),
        Some(MessageCode::Prepare) => insert_prepare_reply(req),
        Some(MessageCode::Execute | MessageCode::Execute2) => {
            executes += 1;
            if executes == 3 {
                error_reply(req, -6602, "unique constraint violated")
            } else {
                insert_reply(req, i64::from(executes))
            }
        }
        _ => ack(req),
    })
}

fn batch_rows() -> Vec<Vec<Value>> {
    (1..=5).map(|i| vec![Value::Int(i)]).collect()
}

fn sent_ids(log: &ServerLog) -> Vec<i32> {
    log.frames
        .iter()
        .filter(|f| matches!(f.message(), Some(MessageCode::Execute | MessageCode::Execute2)))
        .map(|f| {
            let mut body = f.body();
            // io, type, precision, scale
            body.skip(13).unwrap();
            let value = body.read_u16_bytes().unwrap();
            i32::from_le_bytes(value.try_into().unwrap())
        })
        .collect()
}

#[test]
fn row_by_row_batch_continues_past_failure() {
    let (port, server) = batch_server();
    let mut conn = Connection::connect(config(port).batch_type(2).continue_batch_on_error(true)).unwrap();
    {
        let mut stmt = conn.prepare("INSERT INTO T VALUES (?)").unwrap();
        assert_eq!(stmt.parameters().len(), 1);
        let Err(Error::Batch(batch)) = stmt.execute_batch(&batch_rows()) else {
            panic!("expected a batch error");
        };
        assert_eq!(batch.update_counts, vec![1, 1, -1, 1, 1]);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].row, 3);
        assert_eq!(batch.failures[0].code, -6602);
        assert_eq!(batch.failures[0].message, "unique constraint violated");
    }
    assert!(conn.is_ready());
    drop(conn);

    let log = server.join().unwrap();
    assert_eq!(sent_ids(&log), vec![1, 2, 3, 4, 5]);
}

#[test]
fn row_by_row_batch_stops_at_failure() {
    let (port, server) = batch_server();
    let mut conn = Connection::connect(config(port).batch_type(2)).unwrap();
    {
        let mut stmt = conn.prepare("INSERT INTO T VALUES (?)").unwrap();
        let Err(Error::Batch(batch)) = stmt.execute_batch(&batch_rows()) else {
            panic!("expected a batch error");
        };
        assert_eq!(batch.update_counts, vec![1, 1]);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].row, 3);
    }
    drop(conn);

    let log = server.join().unwrap();
    assert_eq!(sent_ids(&log), vec![1, 2, 3]);
}

/// Keeps LOB contents per blob id. Bodies use the layout without the
/// extended locator fields.
fn lob_server() -> (u16, JoinHandle<ServerLog>) {
    let mut store: HashMap<u64, Vec<u8>> = HashMap::new();
    spawn_server(Negotiation::default(), move |req| {
        let mut body = req.body();
        match req.message() {
            Some(MessageCode::LobWrite) => {
                body.skip(2).unwrap();
                let blob_id = body.read_u64().unwrap();
                body.set_position(42).unwrap();
                let start = usize::try_from(body.read_i32().unwrap() - 1).unwrap();
                let len = usize::try_from(body.read_i32().unwrap()).unwrap();
                let data = body.read_bytes(len).unwrap().to_vec();
                let value = store.entry(blob_id).or_default();
                value.truncate(start);
                value.extend_from_slice(&data);

                let mut reply = ack(req);
                reply.write_i32(i32::try_from(len).unwrap());
                reply.write_u64(blob_id);
                reply.write_i16(1);
                reply.write_i32(100);
                reply.write_i16(1);
                reply.write_i32(100);
                reply.write_i32(i32::try_from(start + len).unwrap());
                reply
            }
            Some(MessageCode::LobRead) => {
                body.skip(7).unwrap();
                let blob_id = body.read_u64().unwrap();
                body.set_position(33).unwrap();
                let start = usize::try_from(body.read_i32().unwrap() - 1).unwrap();
                let want = usize::try_from(body.read_i32().unwrap()).unwrap();
                let value = store.get(&blob_id).cloned().unwrap_or_default();
                let end = (start + want).min(value.len());
                let chunk = value.get(start..end).unwrap_or_default();

                let mut reply = ack(req);
                reply.write_u8(u8::from(end >= value.len()));
                reply.write_i32(i32::try_from(chunk.len()).unwrap());
                if !chunk.is_empty() {
                    reply.write_i16(1);
                    reply.write_i32(100);
                    reply.write_i32(i32::try_from(end).unwrap());
                    reply.write_bytes(chunk);
                }
                reply
            }
            Some(MessageCode::LobLength) => {
                body.skip(1).unwrap();
                let blob_id = body.read_u64().unwrap();
                let len = store.get(&blob_id).map_or(0, Vec::len);
                let mut reply = ack(req);
                reply.write_u32(u32::try_from(len).unwrap());
                reply
            }
            _ => ack(req),
        }
    })
}

#[test]
fn lob_write_read_length_across_chunk_boundaries() {
    let sizes = [0usize, 1, 16_000, 16_001, 1_000_000];
    let (port, server) = lob_server();
    let mut conn = Connection::connect(config(port)).unwrap();

    for (i, &size) in sizes.iter().enumerate() {
        let blob_id = 1000 + i as u64;
        let locator = LobLocator {
            flag: OFF_ROW,
            blob_id,
            table_id: 1001,
            column_id: 2,
            ..LobLocator::default()
        };
        let mut lob = Lob::from_locator(LobKind::Binary, locator);
        let data: Vec<u8> = (0..size).map(|n| (n % 251) as u8).collect();

        assert_eq!(lob.write(&mut conn, 0, &data).unwrap(), size);
        assert_eq!(lob.length(&mut conn).unwrap(), i64::try_from(size).unwrap());
        assert_eq!(lob.read_to_end(&mut conn).unwrap(), data);
        assert_eq!(lob.locator().blob_id, blob_id);
    }
    drop(conn);

    let log = server.join().unwrap();
    let writes_for = |blob_id: u64| {
        log.frames
            .iter()
            .filter(|f| f.message() == Some(MessageCode::LobWrite))
            .filter(|f| {
                let mut body = f.body();
                body.skip(2).unwrap();
                body.read_u64().unwrap() == blob_id
            })
            .count()
    };
    let chunks: Vec<usize> = (0..sizes.len() as u64).map(|i| writes_for(1000 + i)).collect();
    assert_eq!(chunks, vec![1, 1, 1, 2, 63]);
    assert_eq!(log.count(MessageCode::LobLength), sizes.len());
}

#[test]
fn cached_result_skips_execution() {
    let (port, server) = spawn_server(Negotiation::default(), |req| match req.message() {
        Some(MessageCode::AllocStatement) => alloc_reply(41),
        Some(MessageCode::Prepare) => select_reply(req, &["alice", "bob"], &[(1001, 5)]),
        _ => ack(req),
    });
    let mut conn = Connection::connect(config(port).result_cache(1 << 20, Duration::ZERO)).unwrap();

    let first = conn.execute_direct("SELECT NAME FROM T").unwrap();
    assert!(!first.from_cache);
    let second = conn.execute_direct("SELECT NAME FROM T").unwrap();
    assert!(second.from_cache);
    let names: Vec<String> = second
        .into_result_set()
        .unwrap()
        .rows()
        .iter()
        .filter_map(|r| r.get(0).and_then(Value::as_str).map(str::to_string))
        .collect();
    assert_eq!(names, vec!["alice", "bob"]);
    drop(conn);

    let log = server.join().unwrap();
    assert_eq!(log.count(MessageCode::Prepare), 1);
}

#[test]
fn changed_table_timestamp_forces_reexecution() {
    let mut stamp = 5;
    let (port, server) = spawn_server(Negotiation::default(), move |req| match req.message() {
        Some(MessageCode::AllocStatement) => alloc_reply(51),
        Some(MessageCode::Prepare) => select_reply(req, &["carol"], &[(1001, stamp)]),
        Some(MessageCode::TableTimestamps) => {
            stamp += 1;
            let mut reply = ack(req);
            reply.put_u16_at(FIELDS, 1).unwrap();
            reply.write_i64(stamp);
            reply
        }
        _ => ack(req),
    });
    let mut conn =
        Connection::connect(config(port).result_cache(1 << 20, Duration::from_millis(1))).unwrap();

    conn.query("SELECT NAME FROM T").unwrap();
    thread::sleep(Duration::from_millis(20));
    let again = conn.execute_direct("SELECT NAME FROM T").unwrap();
    assert!(!again.from_cache);
    assert_eq!(again.into_result_set().unwrap().len(), 1);
    drop(conn);

    let log = server.join().unwrap();
    assert_eq!(log.codes(), vec![3, 5, 71, 5]);
    let probe = &log.frames[2];
    assert_eq!(probe.body().read_i32().unwrap(), 1001);
}

#[test]
fn closed_connection_rejects_calls_without_io() {
    let (port, server) = spawn_server(Negotiation::default(), |req| match req.message() {
        Some(MessageCode::AllocStatement) => alloc_reply(61),
        Some(MessageCode::Prepare) => ddl_reply(req),
        _ => ack(req),
    });
    let mut conn = Connection::connect(config(port)).unwrap();
    conn.execute_direct("CREATE TABLE T2 (ID INT)").unwrap();
    assert_eq!(conn.statement_pool().len(), 1);

    conn.close();
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(matches!(conn.query("SELECT 1"), Err(Error::ConnectionClosed)));
    assert!(matches!(conn.commit(), Err(Error::ConnectionClosed)));
    assert!(matches!(conn.prepare("SELECT 1"), Err(Error::ConnectionClosed)));
    conn.close();
    drop(conn);

    let log = server.join().unwrap();
    assert_eq!(log.codes(), vec![3, 5, 4]);
    assert_eq!(log.frames[2].stmt_id, 61);
}

/// Prepared INSERT with a single CLOB parameter.
fn clob_prepare_reply(req: &Received) -> ByteBuffer {
    let mut reply = ack(req);
    reply.put_i16_at(FIELDS, RET_INSERT).unwrap();
    reply.put_u16_at(FIELDS + 2, 1).unwrap();
    reply.write_i32(SQL_CLOB);
    reply.write_i32(i32::MAX);
    reply.write_i32(0);
    reply.write_i32(1);
    reply.write_i16(0x02);
    reply.write_bytes(&[0; 4]);
    reply.write_i16(0);
    write_names(&mut reply, "DOC");
    reply.write_i32(1001);
    reply.write_i16(3);
    reply
}

#[test]
fn lob_parameter_streams_before_execute() {
    let (port, server) = spawn_server(Negotiation::default(), |req| match req.message() {
        Some(MessageCode::AllocStatement) => alloc_reply(71),
        Some(MessageCode::Prepare) => clob_prepare_reply(req),
        Some(MessageCode::Execute | MessageCode::Execute2) => insert_reply(req, 5),
        _ => ack(req),
    });
    let text = "d".repeat(20_000);
    let mut conn = Connection::connect(config(port)).unwrap();
    {
        let mut stmt = conn.prepare("INSERT INTO DOCS VALUES (?)").unwrap();
        assert!(stmt.parameters()[0].is_lob());
        stmt.bind(0, text.as_str()).unwrap();
        let execution = stmt.execute().unwrap();
        assert_eq!(execution.update_count, 1);
    }
    drop(conn);

    let log = server.join().unwrap();
    let codes: Vec<Option<MessageCode>> = log.frames.iter().map(Received::message).collect();
    assert_eq!(
        codes[..4],
        [
            Some(MessageCode::AllocStatement),
            Some(MessageCode::Prepare),
            Some(MessageCode::PreExecute),
            Some(MessageCode::PutData),
        ]
    );

    let mut streamed = Vec::new();
    for frame in log.frames.iter().filter(|f| f.message() == Some(MessageCode::PutData)) {
        let mut body = frame.body();
        let len = usize::try_from(body.read_i32().unwrap()).unwrap();
        assert!(len <= 16_000);
        streamed.extend_from_slice(body.read_bytes(len).unwrap());
    }
    assert_eq!(streamed, text.as_bytes());
    assert_eq!(log.count(MessageCode::PutData), 2);

    let execute = log.frames.last().unwrap();
    assert!(matches!(execute.message(), Some(MessageCode::Execute | MessageCode::Execute2)));
    let mut body = execute.body();
    body.skip(1).unwrap();
    assert_eq!(body.read_i32().unwrap(), SQL_CLOB);
    body.skip(8).unwrap();
    assert_eq!(body.read_i16().unwrap(), 0);
}
