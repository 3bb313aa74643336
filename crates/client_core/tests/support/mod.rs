#![allow(dead_code)]

use std::time::Duration;

use client_core::{ConnectionConfig, Endpoint, MonitorConfig, RetryConfig};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener,
    },
    time::{sleep, timeout},
};

pub const RETRY_DELAY: Duration = Duration::from_millis(150);
const WAIT_LIMIT: Duration = Duration::from_secs(3);

/// Stand-in for the guiding server on a loopback port.
pub struct FakeServer {
    listener: TcpListener,
}

impl FakeServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake server");
        Self { listener }
    }

    pub fn endpoint(&self) -> Endpoint {
        let addr = self.listener.local_addr().expect("local addr");
        Endpoint {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    pub async fn accept(&self) -> Peer {
        let (stream, _) = timeout(WAIT_LIMIT, self.listener.accept())
            .await
            .expect("client connects in time")
            .expect("accept");
        let (reader, writer) = stream.into_split();
        Peer {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// `true` if a client connected within `within`.
    pub async fn accepts_within(&self, within: Duration) -> bool {
        timeout(within, self.listener.accept()).await.is_ok()
    }
}

/// The server side of one accepted connection.
pub struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("write to client");
    }

    /// Writes `bytes` untouched; the caller supplies any terminator.
    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("write to client");
    }

    /// Next record exactly as written by the client, terminator included.
    pub async fn recv_raw(&mut self) -> String {
        let mut line = String::new();
        let read = timeout(WAIT_LIMIT, self.reader.read_line(&mut line))
            .await
            .expect("client writes in time")
            .expect("read from client");
        assert!(read > 0, "client closed the connection");
        line
    }

    pub async fn recv_request(&mut self) -> Value {
        let raw = self.recv_raw().await;
        serde_json::from_str(raw.trim_end()).expect("request is json")
    }
}

pub fn connection_config(endpoint: Endpoint) -> ConnectionConfig {
    ConnectionConfig {
        endpoint,
        connect_timeout: Duration::from_secs(1),
        retry: RetryConfig::Fixed { delay: RETRY_DELAY },
    }
}

/// Polling off unless a test turns it on.
pub fn monitor_config(endpoint: Endpoint) -> MonitorConfig {
    MonitorConfig {
        connection: connection_config(endpoint),
        request_timeout: Duration::from_secs(2),
        poll_interval: Duration::ZERO,
        poll_methods: Vec::new(),
    }
}

pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let reached = timeout(WAIT_LIMIT, async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}
