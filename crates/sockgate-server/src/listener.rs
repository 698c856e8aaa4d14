//! Shared HTTP upgrade listener.
//!
//! Accepts TCP (optionally TLS) connections, reads one request head per
//! connection, and dispatches upgrade requests through the
//! [`EndpointRegistry`]. Everything the registry does not claim gets the
//! listener's own default response and is closed.

use crate::gateway::upgrade::BAD_REQUEST_RESPONSE;
use crate::gateway::{EndpointRegistry, Outcome};
use crate::request::{read_head, respond_and_close, BoxedTransport, UpgradeRequest};
use sockgate_core::{GateError, GateResult};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Sent for an upgrade request no endpoint claims.
pub const NOT_FOUND_RESPONSE: &[u8] = b"HTTP/1.1 404 Not Found\r\n\r\n";

/// Sent for a plain (non-upgrade) request.
pub const UPGRADE_REQUIRED_RESPONSE: &[u8] = b"HTTP/1.1 426 Upgrade Required\r\n\r\n";

/// Per-connection limits applied before dispatch.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Time allowed for the TLS handshake and the request head.
    pub handshake_timeout: Duration,
    pub max_header_bytes: usize,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            max_header_bytes: 16 * 1024,
        }
    }
}

/// Bind the listening socket.
pub async fn bind(host: &str, port: u16) -> GateResult<TcpListener> {
    let listener = TcpListener::bind((host, port))
        .await
        .map_err(|e| GateError::Transport(format!("bind {host}:{port} failed: {e}")))?;
    info!(addr = %listener.local_addr()?, "upgrade listener started");
    Ok(listener)
}

/// Accept connections, each on its own task, until `shutdown` turns true.
///
/// Handshakes still in flight at that point are abandoned and their
/// transports dropped.
pub async fn serve(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    endpoints: Arc<EndpointRegistry>,
    options: ListenerOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => {
                info!("upgrade listener stopped");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let tls = tls.clone();
                    let endpoints = Arc::clone(&endpoints);
                    let options = options.clone();
                    let mut shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = accept_connection(stream, addr, tls, &endpoints, &options) => {}
                            _ = stopped(&mut shutdown) => {
                                debug!(remote = %addr, "handshake abandoned on shutdown");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    }
}

/// Resolves once the shutdown flag is set or its sender is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn accept_connection(
    stream: TcpStream,
    addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    endpoints: &EndpointRegistry,
    options: &ListenerOptions,
) {
    let transport: BoxedTransport = match tls {
        Some(acceptor) => {
            match tokio::time::timeout(options.handshake_timeout, acceptor.accept(stream)).await {
                Ok(Ok(tls_stream)) => Box::new(tls_stream),
                Ok(Err(e)) => {
                    debug!(remote = %addr, error = %e, "TLS handshake failed");
                    return;
                }
                Err(_) => {
                    debug!(remote = %addr, "TLS handshake timed out");
                    return;
                }
            }
        }
        None => Box::new(stream),
    };

    serve_transport(transport, Some(addr), endpoints, options).await;
}

/// Handle one raw transport: read the head, then upgrade, reject, or answer
/// with the listener default. The transport never outlives this call unless
/// it was upgraded.
pub async fn serve_transport(
    mut transport: BoxedTransport,
    remote_addr: Option<SocketAddr>,
    endpoints: &EndpointRegistry,
    options: &ListenerOptions,
) {
    let head = match tokio::time::timeout(
        options.handshake_timeout,
        read_head(&mut transport, options.max_header_bytes),
    )
    .await
    {
        Ok(Ok(head)) => head,
        Ok(Err(e)) => {
            debug!(remote = ?remote_addr, error = %e, "unreadable request head");
            respond_and_close(transport, BAD_REQUEST_RESPONSE).await;
            return;
        }
        Err(_) => {
            debug!(remote = ?remote_addr, "request head timed out");
            return;
        }
    };

    if head.version != 1 {
        respond_and_close(transport, BAD_REQUEST_RESPONSE).await;
        return;
    }

    let request = UpgradeRequest::new(head, transport, remote_addr);
    if !request.is_upgrade() {
        debug!(remote = ?remote_addr, path = %request.path, "plain request on upgrade listener");
        respond_and_close(request.transport, UPGRADE_REQUIRED_RESPONSE).await;
        return;
    }

    match endpoints.dispatch(request).await {
        Outcome::Ignored(request) => {
            warn!(remote = ?remote_addr, path = %request.path, "no endpoint for upgrade request");
            respond_and_close(request.transport, NOT_FOUND_RESPONSE).await;
        }
        Outcome::Upgraded(_) | Outcome::Rejected(_) => {}
    }
}

/// Load TLS certificate and key from PEM files.
pub fn load_tls_acceptor(
    cert_path: &std::path::Path,
    key_path: &std::path::Path,
) -> GateResult<TlsAcceptor> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| GateError::Config(format!("cannot read cert {}: {e}", cert_path.display())))?;
    let key_pem = std::fs::read(key_path)
        .map_err(|e| GateError::Config(format!("cannot read key {}: {e}", key_path.display())))?;

    let certs: Vec<rustls::pki_types::CertificateDer<'static>> =
        rustls_pemfile::certs(&mut &cert_pem[..]).collect::<Result<Vec<_>, _>>()?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])?
        .ok_or_else(|| GateError::Config("no private key found in PEM".into()))?;

    let mut tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| GateError::Config(format!("TLS config: {e}")))?;

    // WebSocket upgrades are HTTP/1.1 only.
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
