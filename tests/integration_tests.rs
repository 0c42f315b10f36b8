//! Integration tests for RespVault
//!
//! Tests the complete system including server, client, and persistence

use bytes::Bytes;
use respvault::{Client, RespVaultError, RespVaultServer, ServerConfig, SyncPolicy, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

struct TestServer {
    server: Arc<RespVaultServer>,
    handle: JoinHandle<respvault::Result<()>>,
    addr: String,
}

impl TestServer {
    /// Start a server on an ephemeral port backed by `aof_path`.
    async fn start(aof_path: &Path) -> Self {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            aof_path: aof_path.to_path_buf(),
            max_connections: 100,
            sync_policy: SyncPolicy::EverySecond,
            ..ServerConfig::default()
        };

        let server = Arc::new(RespVaultServer::new(config).await.unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let serving = Arc::clone(&server);
        let handle = tokio::spawn(async move { serving.serve(listener).await });

        // A full round trip means the accept loop is running.
        let mut client = Client::connect(&addr).await.unwrap();
        client.ping().await.unwrap();
        client.close().await.unwrap();

        Self { server, handle, addr }
    }

    async fn client(&self) -> Client {
        Client::connect(&self.addr).await.unwrap()
    }

    /// Stop accepting, close the log, and wait for the server task.
    async fn stop(self) {
        self.server.shutdown().unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_basic_operations() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(&dir.path().join("test.aof")).await;
    let mut client = server.client().await;

    client.set("test_key", "test_value").await.unwrap();
    assert_eq!(
        client.get("test_key").await.unwrap(),
        Some(Bytes::from("test_value"))
    );
    assert_eq!(client.get("nonexistent").await.unwrap(), None);

    assert_eq!(client.exists(["test_key", "nonexistent", "test_key"]).await.unwrap(), 2);
    assert_eq!(client.del(["test_key", "nonexistent"]).await.unwrap(), 1);
    assert_eq!(client.get("test_key").await.unwrap(), None);

    assert_eq!(client.incr("counter").await.unwrap(), 1);
    assert_eq!(client.incr("counter").await.unwrap(), 2);
    assert_eq!(client.get("counter").await.unwrap(), Some(Bytes::from("2")));

    assert_eq!(
        client.command(["PING", "hello"]).await.unwrap(),
        Value::bulk("hello")
    );

    client.close().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_hash_operations() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(&dir.path().join("test.aof")).await;
    let mut client = server.client().await;

    assert_eq!(client.hgetall("user").await.unwrap(), None);

    client.hset("user", "name", "ada").await.unwrap();
    client.hset("user", "lang", "rust").await.unwrap();
    client.hset("user", "name", "grace").await.unwrap();

    assert_eq!(
        client.hget("user", "name").await.unwrap(),
        Some(Bytes::from("grace"))
    );
    assert_eq!(client.hget("user", "missing").await.unwrap(), None);

    let mut fields = client.hgetall("user").await.unwrap().unwrap();
    fields.sort();
    assert_eq!(
        fields,
        vec![
            (Bytes::from("lang"), Bytes::from("rust")),
            (Bytes::from("name"), Bytes::from("grace")),
        ]
    );

    // Scalar and hash keys live in separate spaces.
    assert_eq!(client.get("user").await.unwrap(), None);

    client.close().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_command_errors_keep_connection_open() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(&dir.path().join("test.aof")).await;
    let mut client = server.client().await;

    assert_eq!(
        client.command(["FLUSHALL"]).await.unwrap(),
        Value::error("ERR unknown command 'FLUSHALL'")
    );
    assert_eq!(
        client.command(["GET"]).await.unwrap(),
        Value::error("ERR wrong number of arguments for 'get' command")
    );

    client.set("text", "abc").await.unwrap();
    let err = client.incr("text").await.unwrap_err();
    assert!(matches!(err, RespVaultError::Server(ref msg) if msg == "ERR value is not an integer"));

    assert_eq!(
        client.send(&Value::Integer(5)).await.unwrap(),
        Value::error("ERR invalid request format")
    );

    client.ping().await.unwrap();
    client.close().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_binary_safe_values() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(&dir.path().join("test.aof")).await;
    let mut client = server.client().await;

    let value = Bytes::from_static(b"line1\r\nline2\0\xff");
    client.set("bin", value.clone()).await.unwrap();
    assert_eq!(client.get("bin").await.unwrap(), Some(value));

    client.set("empty", "").await.unwrap();
    assert_eq!(client.get("empty").await.unwrap(), Some(Bytes::new()));

    client.close().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_increments() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(&dir.path().join("test.aof")).await;

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let mut client = server.client().await;
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                client.incr("hits").await.unwrap();
            }
            client.close().await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut client = server.client().await;
    assert_eq!(client.get("hits").await.unwrap(), Some(Bytes::from("500")));
    client.close().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_persistence_across_restart() {
    let dir = tempdir().unwrap();
    let aof_path = dir.path().join("persist.aof");

    {
        let server = TestServer::start(&aof_path).await;
        let mut client = server.client().await;

        client.set("persistent_key", "persistent_value").await.unwrap();
        client.set("deleted_key", "gone").await.unwrap();
        client.del(["deleted_key"]).await.unwrap();
        client.incr("counter").await.unwrap();
        client.incr("counter").await.unwrap();
        client.hset("h", "f", "v").await.unwrap();
        // Failed commands must not reach the log.
        client.command(["SET", "only_key"]).await.unwrap();

        client.close().await.unwrap();
        server.stop().await;
    }

    let server = TestServer::start(&aof_path).await;
    let mut client = server.client().await;

    assert_eq!(
        client.get("persistent_key").await.unwrap(),
        Some(Bytes::from("persistent_value"))
    );
    assert_eq!(client.get("deleted_key").await.unwrap(), None);
    assert_eq!(client.get("counter").await.unwrap(), Some(Bytes::from("2")));
    assert_eq!(client.hget("h", "f").await.unwrap(), Some(Bytes::from("v")));

    // Replay does not append, so the log holds each command exactly once.
    let log = std::fs::read(&aof_path).unwrap();
    let sets = log.windows(5).filter(|w| *w == b"\r\nSET").count();
    assert_eq!(sets, 2);

    client.close().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_protocol_error_closes_connection() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(&dir.path().join("test.aof")).await;

    let mut stream = TcpStream::connect(&server.addr).await.unwrap();
    stream.write_all(b"?garbage\r\n").await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    assert!(reply.starts_with(b"-ERR Protocol error"));
    assert!(reply.ends_with(b"\r\n"));

    // Other clients are unaffected.
    let mut client = server.client().await;
    client.ping().await.unwrap();
    client.close().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_deeply_nested_request_only_drops_its_connection() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(&dir.path().join("test.aof")).await;

    let mut stream = TcpStream::connect(&server.addr).await.unwrap();
    // Small enough to arrive in one read, so the server leaves nothing unread.
    let mut payload = b"*1\r\n".repeat(64);
    payload.extend_from_slice(b"$1\r\na\r\n");
    stream.write_all(&payload).await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    assert!(reply.starts_with(b"-ERR Protocol error: nesting too deep"));

    let mut client = server.client().await;
    client.set("still", "alive").await.unwrap();
    assert_eq!(client.get("still").await.unwrap(), Some(Bytes::from("alive")));
    client.close().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_pipelined_requests() {
    let dir = tempdir().unwrap();
    let server = TestServer::start(&dir.path().join("test.aof")).await;

    let mut stream = TcpStream::connect(&server.addr).await.unwrap();
    let mut batch = Vec::new();
    batch.extend_from_slice(&Value::request(["SET", "a", "1"]).encode());
    batch.extend_from_slice(&Value::request(["INCR", "a"]).encode());
    batch.extend_from_slice(&Value::request(["GET", "a"]).encode());
    stream.write_all(&batch).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply, b"+OK\r\n:2\r\n$1\r\n2\r\n");

    server.stop().await;
}
