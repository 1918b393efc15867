//! End-to-end wire-protocol scenarios driven over a real TCP connection.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use shardcache::config::{Config, Env};
use shardcache::server::Listener;
use shardcache::shutdown::GracefulShutdown;
use shardcache::store::{Engine, EngineConfig};

async fn start_server() -> SocketAddr {
    let config = Config {
        port: 0,
        daemonize: false,
        env: Env::Dev,
        engine: EngineConfig { shard_count: 4, max_memory_bytes: None },
    };
    let listener = Listener::bind(&config).expect("bind");
    let addr = listener.local_addr();

    let engine = std::sync::Arc::new(Engine::new(config.engine));
    let shutdown = CancellationToken::new();
    let graceful = GracefulShutdown::new(shutdown.clone());
    tokio::spawn(async move {
        let _ = listener.serve(engine, shutdown, graceful).await;
    });
    addr
}

async fn roundtrip(stream: &mut TcpStream, request: &[u8], expected: &[u8]) {
    stream.write_all(request).await.expect("write");
    let mut received = vec![0u8; expected.len()];
    stream.read_exact(&mut received).await.expect("read");
    assert_eq!(received, expected);
}

#[tokio::test]
async fn set_then_get_returns_stored_value() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    roundtrip(&mut stream, b"set greeting 0 0 5\r\nhello\r\n", b"STORED\r\n").await;
    roundtrip(
        &mut stream,
        b"get greeting\r\n",
        b"VALUE greeting 0 5\r\nhello\r\nEND\r\n",
    )
    .await;
}

#[tokio::test]
async fn get_missing_key_returns_end_only() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    roundtrip(&mut stream, b"get nope\r\n", b"END\r\n").await;
}

#[tokio::test]
async fn delete_then_get_is_not_found_then_missing() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    roundtrip(&mut stream, b"set k 0 0 1\r\nv\r\n", b"STORED\r\n").await;
    roundtrip(&mut stream, b"delete k\r\n", b"DELETED\r\n").await;
    roundtrip(&mut stream, b"delete k\r\n", b"NOT_FOUND\r\n").await;
    roundtrip(&mut stream, b"get k\r\n", b"END\r\n").await;
}

#[tokio::test]
async fn flush_all_empties_the_store() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    roundtrip(&mut stream, b"set k 0 0 1\r\nv\r\n", b"STORED\r\n").await;
    roundtrip(&mut stream, b"flush_all\r\n", b"OK\r\n").await;
    roundtrip(&mut stream, b"get k\r\n", b"END\r\n").await;
}

#[tokio::test]
async fn stats_reports_well_formed_block() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    stream.write_all(b"stats\r\n").await.expect("write");
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = stream.read(&mut chunk).await.expect("read");
        buf.extend_from_slice(&chunk[..n]);
        if buf.ends_with(b"END\r\n") || n == 0 {
            break;
        }
    }
    let text = String::from_utf8(buf).expect("utf8");
    assert!(text.contains("STAT storage_mode sharded-open-addressing\r\n"));
    assert!(text.contains("STAT bloom_bits 0\r\n"));
    assert!(text.ends_with("END\r\n"));
}

#[tokio::test]
async fn quit_closes_the_connection() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    stream.write_all(b"quit\r\n").await.expect("write");
    let mut buf = [0u8; 8];
    let n = stream.read(&mut buf).await.expect("read");
    assert_eq!(n, 0, "server should close the connection after quit");
}

#[tokio::test]
async fn pipelined_commands_are_each_answered_in_order() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.expect("connect");

    stream
        .write_all(b"set a 0 0 1\r\nx\r\nset b 0 0 1\r\ny\r\nget a\r\nget b\r\n")
        .await
        .expect("write");

    let expected = b"STORED\r\nSTORED\r\nVALUE a 0 1\r\nx\r\nEND\r\nVALUE b 0 1\r\ny\r\nEND\r\n";
    let mut received = vec![0u8; expected.len()];
    stream.read_exact(&mut received).await.expect("read");
    assert_eq!(received, expected);
}
