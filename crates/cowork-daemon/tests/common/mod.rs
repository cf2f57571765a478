//! Shared helpers for protocol integration tests: a server on a temp
//! socket and a raw frame-level client.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cowork_daemon::SocketServer;
use cowork_daemon::backend::{HostBackend, HostBackendConfig};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Generous ceiling for every read in tests.
pub const READ_TIMEOUT: Duration = Duration::from_secs(15);

pub struct TestServer {
    pub server: SocketServer<HostBackend>,
    pub backend: Arc<HostBackend>,
    pub socket_path: PathBuf,
    pub tmp: TempDir,
}

impl TestServer {
    pub async fn connect(&self) -> UnixStream {
        UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to test server")
    }
}

/// Start a server on a fresh temp socket with an isolated data directory.
pub fn start_test_server() -> TestServer {
    let tmp = TempDir::new().expect("tempdir");
    let socket_path = tmp.path().join("cowork-test.sock");

    let backend = Arc::new(HostBackend::new(HostBackendConfig {
        data_dir: tmp.path().join("data"),
        bundles_dir: tmp.path().join("bundles"),
    }));

    let server = SocketServer::new(&socket_path, Arc::clone(&backend));
    server.start().expect("start test server");

    TestServer {
        server,
        backend,
        socket_path,
        tmp,
    }
}

/// Write one length-prefixed frame.
pub async fn send_frame(stream: &mut UnixStream, payload: &[u8]) {
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&u32::try_from(payload.len()).unwrap().to_be_bytes());
    buf.extend_from_slice(payload);
    stream.write_all(&buf).await.expect("write frame");
}

/// Serialize and send one request.
pub async fn send_request(stream: &mut UnixStream, request: serde_json::Value) {
    let payload = serde_json::to_vec(&request).unwrap();
    send_frame(stream, &payload).await;
}

/// Read one frame; `None` when the server closed the connection.
pub async fn read_frame(stream: &mut UnixStream) -> Option<Vec<u8>> {
    let read = async {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await.ok()?;
        let len = u32::from_be_bytes(header) as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.ok()?;
        Some(payload)
    };
    tokio::time::timeout(READ_TIMEOUT, read)
        .await
        .expect("timed out reading frame")
}

/// Read one frame and parse it as JSON.
pub async fn read_json(stream: &mut UnixStream) -> serde_json::Value {
    let payload = read_frame(stream).await.expect("connection closed");
    serde_json::from_slice(&payload).expect("frame is not JSON")
}

/// Read JSON frames until one matches `predicate`.
pub async fn read_json_until(
    stream: &mut UnixStream,
    predicate: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    loop {
        let value = read_json(stream).await;
        if predicate(&value) {
            return value;
        }
    }
}
