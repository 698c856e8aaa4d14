//! The upgrade gateway: one endpoint path, one authorization policy.
//!
//! Per request: match the path (no await before this), resolve the caller's
//! accountability unless the endpoint is public, then either complete the
//! WebSocket handshake or reject with a bare `401` and close the transport.

use super::connections::ConnectionRegistry;
use super::{Connection, ConnectionHandler, Outcome, Rejection, RequestContext};
use crate::request::{respond_and_close, UpgradeRequest};
use sockgate_core::{
    extract_token, AccountabilityResolver, Authorization, GatewayConfig, ResolveError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_tungstenite::tungstenite::handshake::server::create_response;
use tokio_tungstenite::tungstenite::http::{HeaderMap, Request, Response, Version};
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// Written verbatim to the raw transport of an unauthorized request.
pub const UNAUTHORIZED_RESPONSE: &[u8] = b"HTTP/1.1 401 Unauthorized\r\n\r\n";

/// Written when an authorized request is not a valid WebSocket handshake.
pub const BAD_REQUEST_RESPONSE: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

/// An authentication-gated WebSocket upgrade endpoint.
pub struct UpgradeGateway {
    config: GatewayConfig,
    resolver: Arc<dyn AccountabilityResolver>,
    handler: Arc<dyn ConnectionHandler>,
    connections: Arc<ConnectionRegistry>,
    /// `None` waits on the resolver indefinitely.
    resolve_timeout: Option<Duration>,
}

impl UpgradeGateway {
    pub fn new(
        config: GatewayConfig,
        resolver: Arc<dyn AccountabilityResolver>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Self {
        let connections = Arc::new(ConnectionRegistry::new(config.endpoint_path.clone()));
        Self {
            config,
            resolver,
            handler,
            connections,
            resolve_timeout: None,
        }
    }

    /// Bound the resolver call; a timeout counts as a resolver failure.
    pub fn with_resolve_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint_path
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Exact path match against the configured endpoint.
    pub fn matches(&self, path: &str) -> bool {
        path == self.config.endpoint_path
    }

    /// Offer a request to this gateway.
    ///
    /// A non-matching request comes back as [`Outcome::Ignored`] without its
    /// transport having been read from or written to.
    pub async fn handle(&self, request: UpgradeRequest) -> Outcome {
        if !self.matches(&request.path) {
            return Outcome::Ignored(request);
        }

        debug!(
            endpoint = %self.config.endpoint_path,
            remote = ?request.remote_addr,
            public = self.config.public,
            "upgrade request accepted"
        );

        let authorization = self.authorize(&request.headers, &request.query).await;
        if let Authorization::Unauthenticated(reason) = authorization {
            warn!(
                endpoint = %self.config.endpoint_path,
                remote = ?request.remote_addr,
                reason = %reason,
                "upgrade denied"
            );
            respond_and_close(request.transport, UNAUTHORIZED_RESPONSE).await;
            return Outcome::Rejected(Rejection::Unauthorized(reason));
        }

        self.complete_upgrade(request, authorization).await
    }

    /// Decide whether a request may upgrade. Never fails.
    pub async fn authorize(&self, headers: &HeaderMap, query: &[(String, String)]) -> Authorization {
        if self.config.public {
            return Authorization::Public;
        }

        let token = extract_token(headers, query);
        let resolving = self.resolver.resolve(token.as_deref());
        let resolved = match self.resolve_timeout {
            Some(limit) => tokio::time::timeout(limit, resolving)
                .await
                .unwrap_or(Err(ResolveError::Timeout)),
            None => resolving.await,
        };

        Authorization::from_resolved(resolved)
    }

    async fn complete_upgrade(&self, request: UpgradeRequest, authorization: Authorization) -> Outcome {
        let UpgradeRequest {
            method,
            target,
            version,
            query,
            headers,
            remote_addr,
            mut transport,
            head,
            ..
        } = request;

        let response = match handshake_response(&method, &target, version, &headers) {
            Ok(response) => response,
            Err(reason) => {
                debug!(endpoint = %self.config.endpoint_path, reason = %reason, "invalid handshake");
                respond_and_close(transport, BAD_REQUEST_RESPONSE).await;
                return Outcome::Rejected(Rejection::BadHandshake(reason));
            }
        };

        let written = async {
            transport.write_all(&response).await?;
            transport.flush().await
        }
        .await;
        if let Err(e) = written {
            debug!(endpoint = %self.config.endpoint_path, error = %e, "peer gone during upgrade");
            return Outcome::Rejected(Rejection::Transport(e.to_string()));
        }

        let stream = WebSocketStream::from_partially_read(transport, head, Role::Server, None).await;

        let principal = authorization.principal().map(str::to_string);
        let ctx = RequestContext {
            endpoint: self.config.endpoint_path.clone(),
            query,
            headers,
            remote_addr,
            authorization,
        };

        let handler = Arc::clone(&self.handler);
        let id = self
            .connections
            .spawn_supervised(remote_addr, principal.clone(), move |id| {
                handler.on_connection(Connection { id, stream }, ctx)
            })
            .await;
        let Some(id) = id else {
            return Outcome::Rejected(Rejection::Closed);
        };

        info!(
            endpoint = %self.config.endpoint_path,
            id,
            remote = ?remote_addr,
            user = principal.as_deref().unwrap_or("-"),
            "connection upgraded"
        );

        Outcome::Upgraded(id)
    }

    /// Force-close every connection this gateway produced.
    pub async fn terminate_all(&self) -> usize {
        self.connections.terminate_all().await
    }
}

/// Validate the handshake as a whole and serialize the `101` response.
fn handshake_response(
    method: &str,
    target: &str,
    version: u8,
    headers: &HeaderMap,
) -> Result<Vec<u8>, String> {
    let mut request = Request::builder()
        .method(method)
        .uri(target)
        .version(if version == 1 {
            Version::HTTP_11
        } else {
            Version::HTTP_10
        })
        .body(())
        .map_err(|e| e.to_string())?;
    *request.headers_mut() = headers.clone();

    let response = create_response(&request).map_err(|e| e.to_string())?;
    Ok(response_bytes(&response))
}

fn response_bytes(response: &Response<()>) -> Vec<u8> {
    let mut out = format!("{:?} {}\r\n", response.version(), response.status()).into_bytes();
    for (name, value) in response.headers() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{read_head, UpgradeRequest};
    use futures_util::{SinkExt, StreamExt};
    use sockgate_core::{ResolveFuture, TrustRecord, Unauthenticated};
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::Message;

    /// Token → record table; `BADTOKEN` simulates a resolver failure.
    struct TableResolver(HashMap<String, TrustRecord>);

    impl TableResolver {
        fn new() -> Self {
            let mut table = HashMap::new();
            table.insert("GOODTOKEN".to_string(), TrustRecord::for_user("u1"));
            table.insert("TOKEN_Y".to_string(), TrustRecord::for_user("y"));
            table.insert(
                "ROLE_ONLY".to_string(),
                TrustRecord {
                    role: Some("editor".into()),
                    ..TrustRecord::default()
                },
            );
            Self(table)
        }
    }

    impl AccountabilityResolver for TableResolver {
        fn resolve<'a>(&'a self, token: Option<&'a str>) -> ResolveFuture<'a> {
            Box::pin(async move {
                match token {
                    None => Ok(TrustRecord::anonymous()),
                    Some("BADTOKEN") => Err(ResolveError::Unavailable("backend down".into())),
                    Some("SLOW") => std::future::pending().await,
                    Some(t) => self
                        .0
                        .get(t)
                        .cloned()
                        .ok_or_else(|| ResolveError::InvalidToken(t.to_string())),
                }
            })
        }
    }

    fn gateway(path: &str, public: bool) -> (UpgradeGateway, mpsc::UnboundedReceiver<RequestContext>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = move |mut conn: Connection, ctx: RequestContext| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(ctx);
                // Echo until the peer goes away.
                while let Some(Ok(msg)) = conn.stream.next().await {
                    if msg.is_text() && conn.stream.send(msg).await.is_err() {
                        break;
                    }
                }
            }
        };
        let gw = UpgradeGateway::new(
            GatewayConfig::new(path, public),
            Arc::new(TableResolver::new()),
            Arc::new(handler),
        );
        (gw, rx)
    }

    async fn server_request(server: DuplexStream) -> UpgradeRequest {
        let mut server = server;
        let head = read_head(&mut server, 16 * 1024).await.unwrap();
        UpgradeRequest::new(head, Box::new(server), None)
    }

    /// Send a raw request head; return the server-side request.
    async fn raw_request(raw: &str) -> (DuplexStream, UpgradeRequest) {
        let (mut client, server) = tokio::io::duplex(16 * 1024);
        client.write_all(raw.as_bytes()).await.unwrap();
        (client, server_request(server).await)
    }

    fn ws_head(target: &str, extra: &str) -> String {
        format!(
            "GET {target} HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n{extra}\r\n"
        )
    }

    async fn read_all(mut client: DuplexStream) -> Vec<u8> {
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut out))
            .await
            .unwrap()
            .unwrap();
        out
    }

    /// Drive a real client handshake against the gateway.
    async fn upgrade_with(
        gw: &UpgradeGateway,
        request: tokio_tungstenite::tungstenite::handshake::client::Request,
    ) -> (
        Outcome,
        Result<
            WebSocketStream<DuplexStream>,
            tokio_tungstenite::tungstenite::Error,
        >,
    ) {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let client_task = tokio::spawn(async move {
            tokio_tungstenite::client_async(request, client)
                .await
                .map(|(ws, _)| ws)
        });
        let outcome = gw.handle(server_request(server).await).await;
        (outcome, client_task.await.unwrap())
    }

    #[tokio::test]
    async fn query_token_upgrades_with_principal() {
        let (gw, mut rx) = gateway("/ws", false);
        let req = "ws://localhost/ws?access_token=GOODTOKEN"
            .into_client_request()
            .unwrap();
        let (outcome, client) = upgrade_with(&gw, req).await;
        assert!(matches!(outcome, Outcome::Upgraded(_)));

        let ctx = rx.recv().await.unwrap();
        assert_eq!(ctx.principal(), Some("u1"));
        assert_eq!(ctx.endpoint, "/ws");
        assert!(!ctx.is_public());

        let mut client = client.unwrap();
        client.send(Message::text("ping")).await.unwrap();
        let echoed = client.next().await.unwrap().unwrap();
        assert_eq!(echoed.into_text().unwrap(), "ping");
        assert_eq!(gw.connections().count().await, 1);
    }

    #[tokio::test]
    async fn bearer_header_upgrades_with_principal() {
        let (gw, mut rx) = gateway("/ws", false);
        let mut req = "ws://localhost/ws".into_client_request().unwrap();
        req.headers_mut()
            .insert("Authorization", "Bearer TOKEN_Y".parse().unwrap());
        let (outcome, client) = upgrade_with(&gw, req).await;
        assert!(matches!(outcome, Outcome::Upgraded(_)));
        assert!(client.is_ok());
        assert_eq!(rx.recv().await.unwrap().principal(), Some("y"));
    }

    #[tokio::test]
    async fn query_token_wins_over_header() {
        let (gw, mut rx) = gateway("/ws", false);
        let mut req = "ws://localhost/ws?access_token=GOODTOKEN"
            .into_client_request()
            .unwrap();
        req.headers_mut()
            .insert("Authorization", "Bearer TOKEN_Y".parse().unwrap());
        let (outcome, _client) = upgrade_with(&gw, req).await;
        assert!(matches!(outcome, Outcome::Upgraded(_)));
        assert_eq!(rx.recv().await.unwrap().principal(), Some("u1"));
    }

    #[tokio::test]
    async fn missing_token_rejected_with_401() {
        let (gw, mut rx) = gateway("/ws", false);
        let (client, req) = raw_request(&ws_head("/ws", "")).await;
        let outcome = gw.handle(req).await;
        assert!(matches!(
            outcome,
            Outcome::Rejected(Rejection::Unauthorized(Unauthenticated::NoPrincipal))
        ));
        assert_eq!(read_all(client).await, UNAUTHORIZED_RESPONSE);
        assert!(rx.try_recv().is_err());
        assert_eq!(gw.connections().count().await, 0);
    }

    #[tokio::test]
    async fn wrong_scheme_treated_as_no_token() {
        let (gw, _rx) = gateway("/ws", false);
        for auth in ["NotBearer GOODTOKEN", "Bearer", "Bearer GOODTOKEN extra"] {
            let (client, req) =
                raw_request(&ws_head("/ws", &format!("Authorization: {auth}\r\n"))).await;
            assert!(matches!(gw.handle(req).await, Outcome::Rejected(_)), "{auth}");
            assert_eq!(read_all(client).await, b"HTTP/1.1 401 Unauthorized\r\n\r\n");
        }
    }

    #[tokio::test]
    async fn record_without_principal_rejected() {
        let (gw, _rx) = gateway("/ws", false);
        let (client, req) = raw_request(&ws_head("/ws?access_token=ROLE_ONLY", "")).await;
        assert!(matches!(
            gw.handle(req).await,
            Outcome::Rejected(Rejection::Unauthorized(Unauthenticated::NoPrincipal))
        ));
        assert_eq!(read_all(client).await, UNAUTHORIZED_RESPONSE);
    }

    #[tokio::test]
    async fn resolver_failure_rejected() {
        let (gw, mut rx) = gateway("/ws", false);
        let (client, req) = raw_request(&ws_head("/ws?access_token=BADTOKEN", "")).await;
        match gw.handle(req).await {
            Outcome::Rejected(Rejection::Unauthorized(Unauthenticated::Resolver(e))) => {
                assert!(e.is_backend())
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(read_all(client).await, UNAUTHORIZED_RESPONSE);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_token_rejected() {
        let (gw, _rx) = gateway("/ws", false);
        let (client, req) = raw_request(&ws_head("/ws?access_token=nope", "")).await;
        assert!(matches!(gw.handle(req).await, Outcome::Rejected(_)));
        assert_eq!(read_all(client).await, UNAUTHORIZED_RESPONSE);
    }

    #[tokio::test]
    async fn resolver_timeout_rejected() {
        let (gw, _rx) = gateway("/ws", false);
        let gw = gw.with_resolve_timeout(Some(Duration::from_millis(50)));
        let (client, req) = raw_request(&ws_head("/ws?access_token=SLOW", "")).await;
        assert!(matches!(
            gw.handle(req).await,
            Outcome::Rejected(Rejection::Unauthorized(Unauthenticated::Resolver(
                ResolveError::Timeout
            )))
        ));
        assert_eq!(read_all(client).await, UNAUTHORIZED_RESPONSE);
    }

    #[tokio::test]
    async fn rejection_survives_vanished_peer() {
        let (gw, _rx) = gateway("/ws", false);
        let (client, req) = raw_request(&ws_head("/ws", "")).await;
        drop(client);
        assert!(matches!(gw.handle(req).await, Outcome::Rejected(_)));
    }

    #[tokio::test]
    async fn public_endpoint_ignores_tokens() {
        let (gw, mut rx) = gateway("/ws", true);
        let mut clients = Vec::new();
        for target in ["ws://localhost/ws", "ws://localhost/ws?access_token=BADTOKEN"] {
            let req = target.into_client_request().unwrap();
            let (outcome, client) = upgrade_with(&gw, req).await;
            assert!(matches!(outcome, Outcome::Upgraded(_)), "{target}");
            clients.push(client.unwrap());
            let ctx = rx.recv().await.unwrap();
            assert!(ctx.is_public());
            assert_eq!(ctx.principal(), None);
        }
        assert_eq!(gw.connections().count().await, 2);
    }

    #[tokio::test]
    async fn other_path_left_untouched() {
        for public in [false, true] {
            let (gw, mut rx) = gateway("/ws", public);
            let (mut client, req) = raw_request(&ws_head("/other", "")).await;
            let outcome = gw.handle(req).await;
            let Outcome::Ignored(mut req) = outcome else {
                panic!("expected ignored");
            };
            assert_eq!(req.path, "/other");

            // Nothing was written to the client...
            let mut buf = [0u8; 1];
            assert!(
                tokio::time::timeout(Duration::from_millis(50), client.read(&mut buf))
                    .await
                    .is_err()
            );
            // ...and the transport is still usable by whoever handles it next.
            req.transport.write_all(b"still open").await.unwrap();
            let mut got = [0u8; 10];
            client.read_exact(&mut got).await.unwrap();
            assert_eq!(&got, b"still open");
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn path_match_is_exact() {
        let (gw, _rx) = gateway("/ws", true);
        assert!(gw.matches("/ws"));
        assert!(!gw.matches("/ws/"));
        assert!(!gw.matches("/WS"));
        assert!(!gw.matches("/ws/x"));
    }

    #[tokio::test]
    async fn authorized_but_malformed_handshake_gets_400() {
        let (gw, _rx) = gateway("/ws", true);
        let raw = "GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";
        let (client, req) = raw_request(raw).await;
        assert!(matches!(
            gw.handle(req).await,
            Outcome::Rejected(Rejection::BadHandshake(_))
        ));
        assert_eq!(read_all(client).await, BAD_REQUEST_RESPONSE);
    }

    #[tokio::test]
    async fn handshake_needs_http11_and_connection_upgrade() {
        let (gw, mut rx) = gateway("/ws", true);
        let key = "Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n";
        for raw in [
            format!("GET /ws HTTP/1.0\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n{key}\r\n"),
            format!("GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: keep-alive\r\n{key}\r\n"),
            format!("POST /ws HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n{key}\r\n"),
            format!("GET /ws HTTP/1.1\r\nHost: x\r\nUpgrade: h2c\r\nConnection: Upgrade\r\n{key}\r\n"),
        ] {
            let (client, req) = raw_request(&raw).await;
            assert!(
                matches!(gw.handle(req).await, Outcome::Rejected(Rejection::BadHandshake(_))),
                "{raw:?}"
            );
            assert_eq!(read_all(client).await, BAD_REQUEST_RESPONSE);
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn switching_response_carries_accept_key() {
        let (gw, _rx) = gateway("/ws", true);
        let (mut client, req) = raw_request(&ws_head("/ws", "")).await;
        assert!(matches!(gw.handle(req).await, Outcome::Upgraded(_)));

        let mut buf = vec![0u8; 512];
        let n = client.read(&mut buf).await.unwrap();
        let response = String::from_utf8_lossy(&buf[..n]).to_ascii_lowercase();
        assert!(response.starts_with("http/1.1 101 switching protocols\r\n"));
        assert!(response.contains("sec-websocket-accept: s3pplmbitxaq9kygzzhzrbk+xoo=\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn closed_gateway_refuses_upgrade() {
        let (gw, mut rx) = gateway("/ws", true);
        gw.connections().close().await;
        let req = "ws://localhost/ws".into_client_request().unwrap();
        let (outcome, _client) = upgrade_with(&gw, req).await;
        assert!(matches!(outcome, Outcome::Rejected(Rejection::Closed)));
        assert!(rx.try_recv().is_err());
        assert_eq!(gw.connections().count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_rejects_do_not_interfere() {
        let (gw, mut rx) = gateway("/ws", false);
        let gw = Arc::new(gw);
        let mut tasks = Vec::new();
        for i in 0..8 {
            let gw = Arc::clone(&gw);
            tasks.push(tokio::spawn(async move {
                let target = if i % 2 == 0 {
                    "/ws?access_token=BADTOKEN"
                } else {
                    "/ws"
                };
                let (client, req) = raw_request(&ws_head(target, "")).await;
                let outcome = gw.handle(req).await;
                (outcome, read_all(client).await)
            }));
        }
        for task in tasks {
            let (outcome, bytes) = task.await.unwrap();
            assert!(matches!(outcome, Outcome::Rejected(_)));
            assert_eq!(bytes, UNAUTHORIZED_RESPONSE);
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_resolver_does_not_block_other_requests() {
        let (gw, mut rx) = gateway("/ws", false);
        let gw = Arc::new(gw);

        let slow_gw = Arc::clone(&gw);
        let slow = tokio::spawn(async move {
            let (_client, req) = raw_request(&ws_head("/ws?access_token=SLOW", "")).await;
            slow_gw.handle(req).await
        });

        let req = "ws://localhost/ws?access_token=GOODTOKEN"
            .into_client_request()
            .unwrap();
        let (outcome, _client) = upgrade_with(&gw, req).await;
        assert!(matches!(outcome, Outcome::Upgraded(_)));
        assert_eq!(rx.recv().await.unwrap().principal(), Some("u1"));
        assert!(!slow.is_finished());
        slow.abort();
    }

    #[tokio::test]
    async fn terminate_all_closes_upgraded_connections() {
        let (gw, mut rx) = gateway("/ws", true);
        let mut clients = Vec::new();
        for _ in 0..3 {
            let req = "ws://localhost/ws".into_client_request().unwrap();
            let (outcome, client) = upgrade_with(&gw, req).await;
            assert!(matches!(outcome, Outcome::Upgraded(_)));
            rx.recv().await.unwrap();
            clients.push(client.unwrap());
        }
        assert_eq!(gw.connections().count().await, 3);

        assert_eq!(gw.terminate_all().await, 3);
        tokio::time::timeout(Duration::from_secs(5), gw.connections().wait_empty())
            .await
            .unwrap();

        // Each client sees its transport vanish.
        for mut client in clients {
            let next = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .unwrap();
            assert!(!matches!(next, Some(Ok(Message::Text(_)))));
        }
        assert_eq!(gw.terminate_all().await, 0);
    }

    #[tokio::test]
    async fn buffered_bytes_reach_the_connection() {
        let (gw, _rx) = gateway("/ws", true);
        let (client, server) = tokio::io::duplex(16 * 1024);

        // A masked client text frame "hi" sent right behind the head.
        let mut raw = ws_head("/ws", "").into_bytes();
        raw.extend_from_slice(&[0x81, 0x82, 1, 2, 3, 4, b'h' ^ 1, b'i' ^ 2]);
        let mut client = client;
        client.write_all(&raw).await.unwrap();

        let req = server_request(server).await;
        assert_eq!(req.head.len(), 8);
        assert!(matches!(gw.handle(req).await, Outcome::Upgraded(_)));

        // Skip the 101 response, then expect the echoed (unmasked) frame.
        let mut resp = Vec::new();
        let mut byte = [0u8; 1];
        while !resp.ends_with(b"\r\n\r\n") {
            client.read_exact(&mut byte).await.unwrap();
            resp.push(byte[0]);
        }
        assert!(resp.starts_with(b"HTTP/1.1 101"));
        let mut frame = [0u8; 4];
        tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut frame))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, [0x81, 0x02, b'h', b'i']);
    }
}
