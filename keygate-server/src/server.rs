//! HTTPS listener with an explicit start/shutdown lifecycle.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use keygate_auth::protocol::CONTENT_TYPE_JSON;
use keygate_auth::{
    AuthenticatedResponse, CaIdentity, CertificateAuthority, LocalSigner, Token, MAX_BODY_SIZE,
    SIGN_PATH,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;

use crate::config::ServerSettings;
use crate::error::ServerError;
use crate::handler::RequestHandler;
use crate::rate_limit::SigningRateLimiter;
use crate::tls::TlsServerConfig;

const INTERNAL_ERROR_BODY: &[u8] = br#"{"error":"internal error"}"#;

/// State shared by every connection.
struct Shared {
    acceptor: TlsAcceptor,
    handler: RequestHandler,
    limiter: Option<SigningRateLimiter>,
    handshake_timeout: Duration,
    request_timeout: Duration,
    connections: Arc<Semaphore>,
}

enum ServerState {
    Stopped,
    Running(RunningServer),
}

struct RunningServer {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// TLS-terminating signing service.
///
/// Bound at construction to its settings, CA identity and token. `start` and
/// `shutdown` must alternate: starting a running server or stopping a stopped
/// one fails immediately with [`ServerError::AlreadyRunning`] or
/// [`ServerError::NotRunning`].
pub struct RemoteServer {
    settings: ServerSettings,
    shared: Arc<Shared>,
    state: Mutex<ServerState>,
}

impl RemoteServer {
    /// Build a server that signs with a [`LocalSigner`] over `ca`.
    pub fn new(settings: ServerSettings, ca: CaIdentity, token: Token) -> Result<Self, ServerError> {
        let algorithm = settings.signing_algorithm.unwrap_or(ca.algorithm());
        let signer = LocalSigner::new(ca.clone(), algorithm, settings.validity_days)?;
        Self::with_signer(settings, &ca, token, Arc::new(signer))
    }

    /// Build a server around an arbitrary signer.
    ///
    /// `ca` is only used as the TLS identity; the response HMAC always covers
    /// the issuer certificate the signer returns.
    pub fn with_signer(
        settings: ServerSettings,
        ca: &CaIdentity,
        token: Token,
        signer: Arc<dyn CertificateAuthority>,
    ) -> Result<Self, ServerError> {
        if token.is_weak() {
            tracing::warn!(
                min_len = keygate_auth::token::MIN_RECOMMENDED_TOKEN_LEN,
                "Token is shorter than recommended"
            );
        }

        let tls = TlsServerConfig::from_identity(ca)?;
        let shared = Shared {
            acceptor: TlsAcceptor::from(tls.into_rustls_config()),
            handler: RequestHandler::new(signer, token),
            limiter: settings.rate_limit.map(SigningRateLimiter::new),
            handshake_timeout: settings.handshake_timeout,
            request_timeout: settings.request_timeout,
            connections: Arc::new(Semaphore::new(settings.max_connections)),
        };

        Ok(Self {
            settings,
            shared: Arc::new(shared),
            state: Mutex::new(ServerState::Stopped),
        })
    }

    /// Bind the listener and start accepting connections.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// the port is `0`.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut state = self.state.lock().await;
        if matches!(*state, ServerState::Running(_)) {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = self.settings.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, Arc::clone(&self.shared), shutdown_rx));

        *state = ServerState::Running(RunningServer {
            local_addr,
            shutdown_tx,
            task,
        });
        tracing::info!(addr = %local_addr, "Signing service listening");
        Ok(local_addr)
    }

    /// Stop accepting connections and abort in-flight ones.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        let mut state = self.state.lock().await;
        let ServerState::Running(running) = std::mem::replace(&mut *state, ServerState::Stopped)
        else {
            return Err(ServerError::NotRunning);
        };

        let _ = running.shutdown_tx.send(());
        if let Err(e) = running.task.await {
            tracing::error!(error = %e, "Accept loop task panicked");
        }
        tracing::info!(addr = %running.local_addr, "Signing service stopped");
        Ok(())
    }

    /// Address of the running listener, if started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock().await {
            ServerState::Running(running) => Some(running.local_addr),
            ServerState::Stopped => None,
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((tcp_stream, peer_addr)) => {
                        let Ok(permit) = Arc::clone(&shared.connections).try_acquire_owned() else {
                            tracing::warn!(peer = %peer_addr, "Connection limit reached, dropping connection");
                            continue;
                        };
                        connections.spawn(serve_connection(tcp_stream, peer_addr, Arc::clone(&shared), permit));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "TCP accept failed");
                    }
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = &mut shutdown_rx => {
                tracing::info!("Shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    connections.shutdown().await;
}

async fn serve_connection(
    tcp_stream: TcpStream,
    peer_addr: SocketAddr,
    shared: Arc<Shared>,
    _permit: OwnedSemaphorePermit,
) {
    let tls_stream = match tokio::time::timeout(
        shared.handshake_timeout,
        shared.acceptor.accept(tcp_stream),
    )
    .await
    {
        Ok(Ok(tls_stream)) => {
            tracing::debug!(peer = %peer_addr, "TLS handshake successful");
            tls_stream
        }
        Ok(Err(e)) => {
            tracing::warn!(peer = %peer_addr, error = %e, "TLS handshake failed");
            return;
        }
        Err(_) => {
            tracing::warn!(peer = %peer_addr, timeout_secs = ?shared.handshake_timeout, "TLS handshake timed out");
            return;
        }
    };

    let request_timeout = shared.request_timeout;
    let service = service_fn(move |request| {
        let shared = Arc::clone(&shared);
        async move { Ok::<_, Infallible>(route(request, &shared, peer_addr).await) }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(request_timeout);
    if let Err(e) = builder
        .serve_connection(TokioIo::new(tls_stream), service)
        .await
    {
        tracing::debug!(peer = %peer_addr, error = %e, "Connection closed with error");
    }
}

async fn route(
    request: Request<Incoming>,
    shared: &Shared,
    peer_addr: SocketAddr,
) -> Response<Full<Bytes>> {
    if request.uri().path() != SIGN_PATH {
        return json_error(StatusCode::NOT_FOUND, "not found");
    }
    if request.method() != Method::POST {
        return json_error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }
    if let Some(limiter) = &shared.limiter {
        if limiter.check().is_err() {
            return json_error(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
        }
    }

    let declared_len = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared_len.is_some_and(|len| len > MAX_BODY_SIZE as u64) {
        tracing::warn!(peer = %peer_addr, declared_len, "Rejecting oversized request");
        return json_error(StatusCode::BAD_REQUEST, "request body too large");
    }

    let read = Limited::new(request.into_body(), MAX_BODY_SIZE).collect();
    let body = match tokio::time::timeout(shared.request_timeout, read).await {
        Err(_) => {
            tracing::warn!(peer = %peer_addr, timeout = ?shared.request_timeout, "Request body timed out");
            return json_error(StatusCode::REQUEST_TIMEOUT, "request timed out");
        }
        Ok(Ok(collected)) => collected.to_bytes(),
        Ok(Err(e)) if e.is::<LengthLimitError>() => {
            tracing::warn!(peer = %peer_addr, "Rejecting oversized request");
            return json_error(StatusCode::BAD_REQUEST, "request body too large");
        }
        Ok(Err(e)) => {
            tracing::debug!(peer = %peer_addr, error = %e, "Failed to read request body");
            return json_error(StatusCode::BAD_REQUEST, "failed to read request body");
        }
    };

    let response = shared.handler.handle(&body).await;
    tracing::debug!(peer = %peer_addr, status = response.status.as_u16(), "Handled sign request");
    json_response(response.status, &response.body)
}

fn json_error(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &AuthenticatedResponse::error(message))
}

fn json_response(status: StatusCode, body: &AuthenticatedResponse) -> Response<Full<Bytes>> {
    let (status, bytes) = match body.to_json() {
        Ok(bytes) => (status, Bytes::from(bytes)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Bytes::from_static(INTERNAL_ERROR_BODY),
            )
        }
    };

    let mut response = Response::new(Full::new(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygate_auth::KeyAlgorithm;
    use std::net::{IpAddr, Ipv4Addr};

    fn server() -> RemoteServer {
        let ca = CaIdentity::generate("localhost", KeyAlgorithm::EcdsaP256, 30).unwrap();
        let settings = ServerSettings {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..ServerSettings::default()
        };
        RemoteServer::new(settings, ca, Token::new("shared-secret").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_start_twice_is_error() {
        let server = server();
        server.start().await.unwrap();

        assert!(matches!(
            server.start().await,
            Err(ServerError::AlreadyRunning)
        ));

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_start_is_error() {
        let server = server();
        assert!(matches!(
            server.shutdown().await,
            Err(ServerError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_local_addr_tracks_lifecycle() {
        let server = server();
        assert!(server.local_addr().await.is_none());

        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr().await, Some(addr));

        server.shutdown().await.unwrap();
        assert!(server.local_addr().await.is_none());
        assert!(matches!(
            server.shutdown().await,
            Err(ServerError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_bind_conflict_reported() {
        let first = server();
        let addr = first.start().await.unwrap();

        let ca = CaIdentity::generate("localhost", KeyAlgorithm::EcdsaP256, 30).unwrap();
        let settings = ServerSettings {
            bind_address: addr.ip(),
            port: addr.port(),
            ..ServerSettings::default()
        };
        let second =
            RemoteServer::new(settings, ca, Token::new("shared-secret").unwrap()).unwrap();

        assert!(matches!(
            second.start().await,
            Err(ServerError::Bind { .. })
        ));
        first.shutdown().await.unwrap();
    }

    #[test]
    fn test_algorithm_mismatch_rejected_at_construction() {
        let ca = CaIdentity::generate("localhost", KeyAlgorithm::EcdsaP256, 30).unwrap();
        let settings = ServerSettings {
            signing_algorithm: Some(KeyAlgorithm::Ed25519),
            ..ServerSettings::default()
        };
        let result = RemoteServer::new(settings, ca, Token::new("shared-secret").unwrap());
        assert!(matches!(result, Err(ServerError::Ca(_))));
    }

    #[test]
    fn test_json_error_shape() {
        let response = json_error(StatusCode::NOT_FOUND, "not found");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            CONTENT_TYPE_JSON
        );
    }
}
