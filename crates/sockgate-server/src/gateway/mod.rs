//! Gateway module: authentication-gated WebSocket upgrades.
//!
//! # Submodule Architecture
//!
//! - **[`upgrade`]**: the [`UpgradeGateway`] owns one endpoint path and its
//!   authorization policy. For a matching request it resolves the caller's
//!   accountability, then either completes the WebSocket upgrade or writes a
//!   bare `401` and destroys the transport.
//!
//! - **[`endpoints`]**: the [`EndpointRegistry`] is the single dispatch point
//!   on a shared listener. It looks the gateway up by exact path, so at most
//!   one gateway ever sees a given request, and refuses duplicate paths.
//!
//! - **[`connections`]**: the [`ConnectionRegistry`] tracks the live
//!   connections a gateway produced and supports bulk forced termination.
//!
//! # Data Flow
//!
//! ```text
//! listener (request head parsed)
//!   → EndpointRegistry::dispatch          (sync path lookup)
//!     → UpgradeGateway::handle
//!         → extract_token + AccountabilityResolver::resolve   (only await)
//!         → reject: "HTTP/1.1 401 Unauthorized\r\n\r\n" + close
//!         → upgrade: 101 + WebSocketStream
//!             → ConnectionRegistry::spawn_supervised → ConnectionHandler
//! ```

pub mod connections;
pub mod endpoints;
pub mod upgrade;

pub use connections::{ConnectionInfo, ConnectionRegistry};
pub use endpoints::EndpointRegistry;
pub use upgrade::UpgradeGateway;

use crate::request::{BoxedTransport, UpgradeRequest};
use sockgate_core::{Authorization, TrustRecord, Unauthenticated};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use tokio_tungstenite::tungstenite::http::HeaderMap;
use tokio_tungstenite::WebSocketStream;

/// An established WebSocket connection handed to the downstream handler.
pub struct Connection {
    /// Id in the owning gateway's connection registry.
    pub id: u64,
    pub stream: WebSocketStream<BoxedTransport>,
}

/// What the downstream handler learns about the handshake.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Endpoint path of the gateway that accepted the request.
    pub endpoint: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
    /// `Public` on public endpoints, `Authenticated` otherwise.
    pub authorization: Authorization,
}

impl RequestContext {
    pub fn accountability(&self) -> Option<&TrustRecord> {
        self.authorization.record()
    }

    pub fn principal(&self) -> Option<&str> {
        self.authorization.principal()
    }

    pub fn is_public(&self) -> bool {
        matches!(self.authorization, Authorization::Public)
    }
}

/// Boxed future returned by [`ConnectionHandler::on_connection`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Receives every connection a gateway upgrades, exactly once each.
///
/// The returned future owns the connection; when it completes the connection
/// is considered closed and leaves the registry. Forced termination drops it.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn on_connection(&self, conn: Connection, ctx: RequestContext) -> HandlerFuture;
}

impl<F, Fut> ConnectionHandler for F
where
    F: Fn(Connection, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn on_connection(&self, conn: Connection, ctx: RequestContext) -> HandlerFuture {
        Box::pin(self(conn, ctx))
    }
}

/// Terminal outcome of offering one request to a gateway.
#[derive(Debug)]
pub enum Outcome {
    /// Path did not match; the request and its transport are returned untouched.
    Ignored(UpgradeRequest),
    /// Upgraded and registered under this connection id.
    Upgraded(u64),
    /// A rejection response was written (best effort) and the transport closed.
    Rejected(Rejection),
}

impl Outcome {
    pub fn is_ignored(&self) -> bool {
        matches!(self, Outcome::Ignored(_))
    }
}

/// Why a matching request did not end in an upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Unauthorized(Unauthenticated),
    /// Authorized, but not a valid WebSocket handshake.
    BadHandshake(String),
    /// The peer went away while the switching response was written.
    Transport(String),
    /// The gateway was shut down while the handshake was in flight.
    Closed,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Unauthorized(reason) => write!(f, "unauthorized: {reason}"),
            Rejection::BadHandshake(reason) => write!(f, "bad handshake: {reason}"),
            Rejection::Transport(reason) => write!(f, "transport: {reason}"),
            Rejection::Closed => write!(f, "gateway closed"),
        }
    }
}
