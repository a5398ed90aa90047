//! Test harness for signing E2E tests.
//!
//! Starts a real server on an ephemeral loopback port and talks to it with
//! the real client, so every test exercises TLS, HTTP and both HMAC checks.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use keygate_auth::{CaIdentity, KeyAlgorithm, Token};
use keygate_client::{ClientSettings, RemoteClient, TrustCaptureConnector};
use keygate_server::{RateLimit, RemoteServer, ServerSettings};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

pub const CA_HOSTNAME: &str = "localhost";
pub const TOKEN: &str = "shared-secret";

/// A running CA plus everything needed to talk to it.
pub struct TestCa {
    pub ca: CaIdentity,
    pub server: RemoteServer,
    pub addr: SocketAddr,
}

impl TestCa {
    /// Start an ECDSA P-256 CA without rate limiting.
    pub async fn start() -> Self {
        Self::start_with(KeyAlgorithm::EcdsaP256, None).await
    }

    pub async fn start_with(algorithm: KeyAlgorithm, rate_limit: Option<RateLimit>) -> Self {
        Self::start_with_settings(
            algorithm,
            ServerSettings {
                rate_limit,
                ..Self::server_settings()
            },
        )
        .await
    }

    /// Loopback settings on an ephemeral port, rate limiting off.
    pub fn server_settings() -> ServerSettings {
        ServerSettings {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            rate_limit: None,
            ..ServerSettings::default()
        }
    }

    pub async fn start_with_settings(algorithm: KeyAlgorithm, settings: ServerSettings) -> Self {
        let ca = CaIdentity::generate(CA_HOSTNAME, algorithm, 30).expect("CA generation");
        let server = RemoteServer::new(settings, ca.clone(), Token::new(TOKEN).unwrap())
            .expect("server construction");
        let addr = server.start().await.expect("server start");

        Self { ca, server, addr }
    }

    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            port: self.addr.port(),
            ..ClientSettings::new(CA_HOSTNAME)
        }
    }

    /// Client configured for this CA with the given token.
    pub fn client(&self, token: &str) -> RemoteClient {
        RemoteClient::new(self.settings(), Token::new(token).unwrap()).expect("client construction")
    }

    pub async fn stop(self) {
        self.server.shutdown().await.expect("server shutdown");
    }

    /// Open a TLS connection to the server without sending anything.
    pub async fn connect(&self) -> TlsStream<TcpStream> {
        TrustCaptureConnector::new(CA_HOSTNAME)
            .unwrap()
            .connect(CA_HOSTNAME, self.addr.port())
            .await
            .expect("connect")
            .stream
    }

    /// Send raw HTTP/1.1 bytes over TLS and return `(status, body)`.
    pub async fn raw_request(&self, request: &[u8]) -> (u16, String) {
        let mut stream = self.connect().await;

        stream.write_all(request).await.expect("write");
        stream.flush().await.expect("flush");
        read_response(&mut stream).await
    }

    /// Send raw bytes, then read until the server closes the connection.
    ///
    /// Returns everything received. Panics if the server keeps the
    /// connection open longer than `within`.
    pub async fn raw_until_close(&self, request: &[u8], within: Duration) -> Vec<u8> {
        let mut stream = self.connect().await;
        stream.write_all(request).await.expect("write");
        stream.flush().await.expect("flush");

        let mut received = Vec::new();
        let read = async {
            let mut chunk = [0u8; 4096];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => received.extend_from_slice(&chunk[..n]),
                }
            }
        };
        tokio::time::timeout(within, read)
            .await
            .expect("server kept a stalled connection open");
        received
    }
}

/// Status code of a raw HTTP/1.1 response, if one was received.
pub fn status_of(response: &[u8]) -> Option<u16> {
    String::from_utf8_lossy(response)
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
}

/// `POST /v1/sign` with a chunked body of `len` bytes.
pub fn chunked_sign_request(len: usize) -> Vec<u8> {
    const CHUNK: usize = 64 * 1024;

    let mut out = format!(
        "POST /v1/sign HTTP/1.1\r\nHost: {CA_HOSTNAME}\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n"
    )
    .into_bytes();
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(CHUNK);
        out.extend_from_slice(format!("{n:x}\r\n").as_bytes());
        out.extend(std::iter::repeat(b'a').take(n));
        out.extend_from_slice(b"\r\n");
        remaining -= n;
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

/// Read one HTTP/1.1 response framed by Content-Length.
async fn read_response<S: AsyncReadExt + Unpin>(stream: &mut S) -> (u16, String) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        if let Some(head_end) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
            let status: u16 = head
                .split_whitespace()
                .nth(1)
                .and_then(|s| s.parse().ok())
                .expect("status line");
            let content_length: usize = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse().ok())
                        .flatten()
                })
                .unwrap_or(0);

            let body_start = head_end + 4;
            if buf.len() >= body_start + content_length {
                let body = &buf[body_start..body_start + content_length];
                return (status, String::from_utf8_lossy(body).to_string());
            }
        }

        let n = stream.read(&mut chunk).await.expect("read");
        assert!(n > 0, "connection closed before a full response arrived");
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
