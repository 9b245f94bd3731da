//! Tests against a real DM server, enabled by `DMWIRE_TEST_URL`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dmwire::{Config, Connection, Error, Value};

const DM_URL_ENV: &str = "DMWIRE_TEST_URL";

fn dm_test_config() -> Option<Config> {
    let raw = std::env::var(DM_URL_ENV).ok()?;
    let cfg = parse_dm_url(&raw)?;
    Some(cfg.connect_timeout(Duration::from_secs(10)))
}

fn parse_dm_url(url: &str) -> Option<Config> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }

    let rest = url.strip_prefix("dm://")?;
    let (auth, host_and_path) = rest.split_once('@')?;
    let (user, password) = match auth.split_once(':') {
        Some((u, p)) => (u, Some(p)),
        None => (auth, None),
    };

    let (host_port, schema) = match host_and_path.split_once('/') {
        Some((hp, path)) => (hp, Some(path)),
        None => (host_and_path, None),
    };
    let schema = schema
        .map(|s| s.split_once('?').map_or(s, |(left, _)| left))
        .filter(|s| !s.is_empty());

    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port_str)) if port_str.chars().all(|c| c.is_ascii_digit()) => {
            (host, port_str.parse::<u16>().ok()?)
        }
        _ => (host_port, 5236),
    };

    let mut cfg = Config::new().host(host).port(port).user(user);
    if let Some(pw) = password.filter(|p| !p.is_empty()) {
        cfg = cfg.password(pw);
    }
    if let Some(schema) = schema {
        cfg = cfg.schema(schema);
    }
    Some(cfg)
}

fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_nanos()
}

fn test_table_name(prefix: &str) -> String {
    format!("{prefix}_{}", unique_suffix() % 1_000_000_000)
}

#[test]
fn dm_url_parsing() {
    let cfg = parse_dm_url("dm://SYSDBA:secret@db.local:5237/APP").unwrap();
    assert_eq!(cfg.host, "db.local");
    assert_eq!(cfg.port, 5237);
    assert_eq!(cfg.user, "SYSDBA");
    assert_eq!(cfg.password, "secret");
    assert_eq!(cfg.schema.as_deref(), Some("APP"));

    let cfg = parse_dm_url("dm://SYSDBA@localhost").unwrap();
    assert_eq!(cfg.port, 5236);
    assert!(parse_dm_url("mysql://root@localhost").is_none());
}

#[test]
fn dm_connect_select_1() {
    let Some(cfg) = dm_test_config() else {
        eprintln!("skipping DM integration tests: set {DM_URL_ENV}");
        return;
    };

    let mut conn = Connection::connect(cfg).expect("connect");
    assert!(conn.is_ready());
    let rows = conn.query("SELECT 1").expect("query");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.rows()[0].get(0).and_then(Value::as_i64), Some(1));
    conn.close();
}

#[test]
fn dm_insert_select_and_rollback() {
    let Some(cfg) = dm_test_config() else {
        eprintln!("skipping DM integration tests: set {DM_URL_ENV}");
        return;
    };

    let mut conn = Connection::connect(cfg).expect("connect");
    let table = test_table_name("DMWIRE_T");
    let _ = conn.execute_direct(&format!("DROP TABLE {table}"));
    conn.execute_direct(&format!("CREATE TABLE {table} (ID INT, NAME VARCHAR(32))"))
        .expect("create");

    {
        let mut stmt = conn
            .prepare(&format!("INSERT INTO {table} VALUES (?, ?)"))
            .expect("prepare");
        let counts = stmt
            .execute_batch(&[
                vec![Value::Int(1), Value::from("alice")],
                vec![Value::Int(2), Value::from("bob")],
            ])
            .expect("batch");
        assert_eq!(counts.len(), 2);
        stmt.close().expect("close statement");
    }

    conn.begin().expect("begin");
    conn.execute_direct(&format!("DELETE FROM {table}")).expect("delete");
    conn.rollback().expect("rollback");

    let rows = conn
        .query(&format!("SELECT NAME FROM {table} ORDER BY ID"))
        .expect("select");
    let names: Vec<&str> = rows.rows().iter().filter_map(|r| r.get(0).and_then(Value::as_str)).collect();
    assert_eq!(names, vec!["alice", "bob"]);

    let err = conn.execute_direct("SELECT * FROM DMWIRE_NO_SUCH_TABLE").unwrap_err();
    assert!(matches!(err, Error::Server(_)));
    assert!(conn.is_ready());

    let _ = conn.execute_direct(&format!("DROP TABLE {table}"));
    conn.close();
}
