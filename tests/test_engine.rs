//! End-to-end integration tests: a fake ISO 8583 host, composed templates,
//! and the full `Engine::start`/`send`/`shutdown` path.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use jiso::codec::{self, Message};
use jiso::config::{Cli, HeaderStyleArg, NapsTagArg};
use jiso::spec::MessageSpec;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const SPEC_JSON: &str = r#"{
    "name": "test-spec",
    "fields": {
        "0": {"type": "numeric", "length": 4, "enc": "ASCII", "prefix": "fixed"},
        "1": {"type": "bitmap", "length": 8, "enc": "BINARY", "prefix": "fixed"},
        "7": {"type": "numeric", "length": 10, "enc": "ASCII", "prefix": "fixed"},
        "11": {"type": "numeric", "length": 6, "enc": "ASCII", "prefix": "fixed"},
        "37": {"type": "string", "length": 12, "enc": "ASCII", "prefix": "fixed"},
        "39": {"type": "string", "length": 2, "enc": "ASCII", "prefix": "fixed"},
        "41": {"type": "string", "length": 8, "enc": "ASCII", "prefix": "fixed"}
    }
}"#;

const TX_JSON: &str = r#"[
    {
        "name": "echo",
        "description": "round-trips with the auto STAN and RRN",
        "fields": {"0": "0800", "11": "auto", "37": "auto", "41": "TERM0001"}
    }
]"#;

fn write_temp(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    path
}

fn base_cli(host: String, port: u16, spec_file: std::path::PathBuf, transactions_file: std::path::PathBuf, counters_dir: std::path::PathBuf) -> Cli {
    Cli {
        host,
        port,
        spec_file,
        transactions_file,
        header_style: HeaderStyleArg::Ascii4,
        naps_tag: NapsTagArg::Atm,
        reconnect_attempts: 2,
        connect_timeout: Duration::from_millis(500),
        total_connect_timeout: Duration::from_secs(2),
        response_timeout: Duration::from_millis(500),
        hex: false,
        counters_dir: Some(counters_dir),
        db_path: None,
    }
}

/// Accepts one connection and echoes every frame back as MTI `0810` with
/// response code `00`, preserving whatever fields the request carried.
async fn run_echo_server(listener: TcpListener, spec: Arc<MessageSpec>) {
    let (mut socket, _) = listener.accept().await.unwrap();
    loop {
        let mut header = [0u8; 4];
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        let len: usize = std::str::from_utf8(&header).unwrap().trim().parse().unwrap();
        let mut body = vec![0u8; len];
        socket.read_exact(&mut body).await.unwrap();

        let request = codec::unpack(&body, &spec).unwrap();
        let mut reply = Message::new("0810");
        for number in spec.field_numbers() {
            if let Some(value) = request.get(number) {
                reply.set(number, value.clone());
            }
        }
        reply.set(39, "00");
        let raw = codec::pack(&reply, &spec).unwrap();

        let out_header = format!("{:04}", raw.len());
        socket.write_all(out_header.as_bytes()).await.unwrap();
        socket.write_all(&raw).await.unwrap();
    }
}

#[tokio::test]
async fn send_composes_auto_fields_and_matches_the_response_by_stan() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let spec = Arc::new(MessageSpec::from_json_str(SPEC_JSON).unwrap());
    tokio::spawn(run_echo_server(listener, spec));

    let dir = tempfile::tempdir().unwrap();
    let spec_file = write_temp(&dir, "spec.json", SPEC_JSON);
    let tx_file = write_temp(&dir, "tx.json", TX_JSON);
    let counters_dir = dir.path().join("counters");

    let cli = base_cli("127.0.0.1".into(), port, spec_file, tx_file, counters_dir);
    let config = cli.into_config().unwrap();
    let engine = jiso::Engine::start(config).await.unwrap();

    let reply = engine.send("echo").await.unwrap();
    assert_eq!(reply.mti, "0810");
    assert_eq!(reply.get_str(11), Some("000001"));
    assert_eq!(reply.get_str(39), Some("00"));

    assert_eq!(engine.transaction_stats().count(), 1);
    assert!(engine.is_connected().await);

    // A second send must mint the next STAN in sequence.
    let reply2 = engine.send("echo").await.unwrap();
    assert_eq!(reply2.get_str(11), Some("000002"));

    engine.shutdown().await;
}

#[tokio::test]
async fn send_times_out_when_the_host_never_replies() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        std::mem::forget(socket); // accept but never respond
    });

    let dir = tempfile::tempdir().unwrap();
    let spec_file = write_temp(&dir, "spec.json", SPEC_JSON);
    let tx_file = write_temp(&dir, "tx.json", TX_JSON);
    let counters_dir = dir.path().join("counters");

    let mut cli = base_cli("127.0.0.1".into(), port, spec_file, tx_file, counters_dir);
    cli.response_timeout = Duration::from_millis(100);
    let config = cli.into_config().unwrap();
    let engine = jiso::Engine::start(config).await.unwrap();

    let err = engine.send("echo").await.unwrap_err();
    assert!(matches!(err, jiso::Error::ResponseTimeout(_)));

    engine.shutdown().await;
}

#[tokio::test]
async fn unknown_transaction_name_is_not_found() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let spec = Arc::new(MessageSpec::from_json_str(SPEC_JSON).unwrap());
    tokio::spawn(run_echo_server(listener, spec));

    let dir = tempfile::tempdir().unwrap();
    let spec_file = write_temp(&dir, "spec.json", SPEC_JSON);
    let tx_file = write_temp(&dir, "tx.json", TX_JSON);
    let counters_dir = dir.path().join("counters");

    let cli = base_cli("127.0.0.1".into(), port, spec_file, tx_file, counters_dir);
    let config = cli.into_config().unwrap();
    let engine = jiso::Engine::start(config).await.unwrap();

    let err = engine.send("nonexistent").await.unwrap_err();
    assert!(matches!(err, jiso::Error::NotFound { .. }));

    engine.shutdown().await;
}
