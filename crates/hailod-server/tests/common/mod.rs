//! Shared fixtures for the daemon integration tests.

#![allow(dead_code)]

pub mod mocks;

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use hailod_core::{Config, HttpBind};
use hailod_server::Daemon;
use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
};

/// A daemon under test, bound inside its own temp directory.
pub struct TestDaemon {
    pub daemon: Daemon,
    pub socket_path: PathBuf,
    pub http_addr: Option<SocketAddr>,
    dir: tempfile::TempDir,
}

impl TestDaemon {
    /// Start a daemon on a scripted adapter, HTTP disabled.
    pub async fn start(adapter: mocks::MockAdapter) -> Self {
        Self::start_with(adapter, false, Duration::from_secs(5)).await
    }

    /// Start a daemon with the HTTP status server on a free port.
    pub async fn start_with_http(adapter: mocks::MockAdapter) -> Self {
        Self::start_with(adapter, true, Duration::from_secs(5)).await
    }

    pub async fn start_with(
        adapter: mocks::MockAdapter,
        http: bool,
        shutdown_grace: Duration,
    ) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = dir.path().join("device.sock");
        let http_addr = http.then(free_port);
        let config = Config {
            socket_path: socket_path.clone(),
            socket_group: None,
            http_bind: match http_addr {
                Some(addr) => HttpBind::Addr(addr),
                None => HttpBind::Off,
            },
            shutdown_grace,
            ..Config::default()
        };
        let daemon = Daemon::start(config, adapter).await.expect("start daemon");
        Self {
            daemon,
            socket_path,
            http_addr,
            dir,
        }
    }

    /// Create a dummy HEF file inside the daemon's temp directory.
    pub fn hef(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"hef-bytes").expect("write hef fixture");
        path
    }

    pub async fn connect(&self) -> UnixStream {
        UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to daemon socket")
    }

    pub async fn shutdown(self) {
        self.daemon.shutdown().await.expect("shutdown daemon");
    }
}

/// Find a free TCP port for the HTTP status server.
pub fn free_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("ephemeral port addr")
}

/// Write one raw protocol frame.
///
/// The peer may have already torn the connection down (e.g. right after a
/// daemon shutdown), so a broken pipe here is a valid outcome, not a bug;
/// callers detect that case via `try_recv_frame` returning `None`.
pub async fn send_frame(stream: &mut UnixStream, value: &Value) {
    let body = serde_json::to_vec(value).unwrap();
    if stream
        .write_all(&(body.len() as u32).to_be_bytes())
        .await
        .is_err()
    {
        return;
    }
    let _ = stream.write_all(&body).await;
}

/// Read one raw protocol frame; panics on EOF.
pub async fn recv_frame(stream: &mut UnixStream) -> Value {
    try_recv_frame(stream).await.expect("connection closed")
}

/// Read one raw protocol frame, or `None` on clean EOF.
///
/// A reset connection (the peer closing while we're mid-read) is treated the
/// same as a clean EOF here; both mean "connection closed" to callers.
pub async fn try_recv_frame(stream: &mut UnixStream) -> Option<Value> {
    let mut prefix = [0u8; 4];
    match stream.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(err)
            if matches!(
                err.kind(),
                std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset
            ) =>
        {
            return None;
        }
        Err(err) => panic!("frame read failed: {err}"),
    }
    let mut body = vec![0u8; u32::from_be_bytes(prefix) as usize];
    stream.read_exact(&mut body).await.unwrap();
    Some(serde_json::from_slice(&body).unwrap())
}

/// One request/response exchange on an existing connection.
pub async fn round_trip(stream: &mut UnixStream, value: &Value) -> Value {
    send_frame(stream, value).await;
    recv_frame(stream).await
}
