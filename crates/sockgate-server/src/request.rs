//! Upgrade request: the parsed HTTP/1.1 head plus the raw transport.
//!
//! The listener reads the head off the transport with `httparse`; any bytes
//! that arrived after the blank line are kept in [`UpgradeRequest::head`] and
//! replayed into the upgraded connection.

use sockgate_core::{parse_query, GateError, GateResult};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::http::header::{CONNECTION, UPGRADE};
use tokio_tungstenite::tungstenite::http::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

/// Upper bound on writing a final response before the transport is dropped anyway.
const RESPOND_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of headers accepted in a request head.
const MAX_HEADERS: usize = 64;

/// Read chunk size while waiting for the end of the head.
const READ_CHUNK: usize = 2048;

/// A raw bidirectional byte transport (plain TCP, TLS, or an in-memory pipe).
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedTransport = Box<dyn Transport>;

/// The parsed head of one HTTP request.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    /// Request target as sent (`/ws?access_token=...`).
    pub target: String,
    /// Minor HTTP version (1 for HTTP/1.1).
    pub version: u8,
    pub headers: HeaderMap,
    /// Bytes received after the end of the head.
    pub trailing: Vec<u8>,
}

/// One upgrade handshake attempt.
///
/// Owns the raw transport until the handshake reaches a terminal outcome:
/// upgraded, rejected, or handed back to the listener unclaimed.
pub struct UpgradeRequest {
    pub method: String,
    pub target: String,
    /// Minor HTTP version (1 for HTTP/1.1).
    pub version: u8,
    /// Path component of the target, not percent-decoded.
    pub path: String,
    /// Decoded query parameters, in request order.
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
    pub transport: BoxedTransport,
    /// Already-buffered bytes that belong to the upgraded protocol.
    pub head: Vec<u8>,
}

impl std::fmt::Debug for UpgradeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("remote_addr", &self.remote_addr)
            .field("head_len", &self.head.len())
            .finish_non_exhaustive()
    }
}

impl UpgradeRequest {
    pub fn new(head: RequestHead, transport: BoxedTransport, remote_addr: Option<SocketAddr>) -> Self {
        let (path, query) = split_target(&head.target);
        Self {
            method: head.method,
            target: head.target,
            version: head.version,
            path,
            query: parse_query(&query),
            headers: head.headers,
            remote_addr,
            transport,
            head: head.trailing,
        }
    }

    /// Header value as a string, if present and visible ASCII.
    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        header_str(&self.headers, name)
    }

    /// Whether this request asks for a protocol upgrade at all
    /// (`Connection: upgrade` plus an `Upgrade` header).
    pub fn is_upgrade(&self) -> bool {
        is_upgrade(&self.headers)
    }
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Whether a comma-separated header contains `token` (case-insensitive).
pub(crate) fn header_has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers.get_all(name).iter().any(|v| {
        v.to_str()
            .map(|s| s.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    })
}

pub(crate) fn is_upgrade(headers: &HeaderMap) -> bool {
    headers.contains_key(UPGRADE) && header_has_token(headers, &CONNECTION, "upgrade")
}

/// Split a request target into path and raw query string.
///
/// Accepts origin-form (`/a?b`) and absolute-form (`http://h/a?b`) targets.
pub fn split_target(target: &str) -> (String, String) {
    let target = target.split('#').next().unwrap_or_default();
    if target.starts_with('/') {
        return match target.split_once('?') {
            Some((path, query)) => (path.to_string(), query.to_string()),
            None => (target.to_string(), String::new()),
        };
    }
    match url::Url::parse(target) {
        Ok(url) => (url.path().to_string(), url.query().unwrap_or_default().to_string()),
        Err(_) => (target.to_string(), String::new()),
    }
}

/// Read and parse one request head from `transport`.
///
/// Fails if the peer closes first, the head exceeds `max_bytes`, or the bytes
/// are not a valid HTTP/1.x request.
pub async fn read_head<T>(transport: &mut T, max_bytes: usize) -> GateResult<RequestHead>
where
    T: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = transport.read(&mut chunk).await?;
        if n == 0 {
            return Err(GateError::InvalidRequest(
                "connection closed before end of request head".into(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&buf) {
            Ok(httparse::Status::Complete(len)) => {
                if len > max_bytes {
                    return Err(GateError::InvalidRequest(format!(
                        "request head too large: {len} bytes (max {max_bytes})"
                    )));
                }
                return build_head(&req, &buf[len..]);
            }
            Ok(httparse::Status::Partial) => {
                if buf.len() > max_bytes {
                    return Err(GateError::InvalidRequest(format!(
                        "request head too large: over {max_bytes} bytes"
                    )));
                }
            }
            Err(e) => return Err(GateError::InvalidRequest(e.to_string())),
        }
    }
}

fn build_head(req: &httparse::Request<'_, '_>, trailing: &[u8]) -> GateResult<RequestHead> {
    let mut headers = HeaderMap::with_capacity(req.headers.len());
    for h in req.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|e| GateError::InvalidRequest(format!("header name: {e}")))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|e| GateError::InvalidRequest(format!("header {name}: {e}")))?;
        headers.append(name, value);
    }

    Ok(RequestHead {
        method: req.method.unwrap_or_default().to_string(),
        target: req.path.unwrap_or_default().to_string(),
        version: req.version.unwrap_or(1),
        headers,
        trailing: trailing.to_vec(),
    })
}

/// Write a raw response best-effort, then close and drop the transport.
///
/// A failed write (peer already gone) still ends in the transport being
/// closed.
pub async fn respond_and_close(mut transport: BoxedTransport, response: &[u8]) {
    let closing = async {
        if let Err(e) = transport.write_all(response).await {
            debug!(error = %e, "response write failed");
        }
        let _ = transport.shutdown().await;
    };
    if tokio::time::timeout(RESPOND_TIMEOUT, closing).await.is_err() {
        debug!("response write timed out");
    }
}
