//! Default downstream handler: greet, then echo.

use crate::gateway::{Connection, ConnectionHandler, HandlerFuture, RequestContext};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Maximum frame size echoed back (1 MiB); larger frames end the connection.
const MAX_ECHO_FRAME: usize = 1_048_576;

/// Sends one JSON welcome frame, then echoes text and binary frames until
/// the peer closes.
pub struct EchoHandler;

impl ConnectionHandler for EchoHandler {
    fn on_connection(&self, conn: Connection, ctx: RequestContext) -> HandlerFuture {
        Box::pin(echo(conn, ctx))
    }
}

/// The welcome frame for a connection.
pub fn welcome(ctx: &RequestContext) -> serde_json::Value {
    serde_json::json!({
        "type": "welcome",
        "endpoint": ctx.endpoint,
        "public": ctx.is_public(),
        "user": ctx.principal(),
        "role": ctx.accountability().and_then(|r| r.role.as_deref()),
    })
}

async fn echo(conn: Connection, ctx: RequestContext) {
    let Connection { id, mut stream } = conn;

    if let Err(e) = stream.send(Message::Text(welcome(&ctx).to_string())).await {
        debug!(id, error = %e, "welcome send failed");
        return;
    }

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!(id, error = %e, "receive failed");
                break;
            }
        };
        let reply = match msg {
            Message::Text(_) | Message::Binary(_) if msg.len() > MAX_ECHO_FRAME => {
                debug!(id, len = msg.len(), "frame too large");
                break;
            }
            Message::Text(_) | Message::Binary(_) => msg,
            Message::Ping(payload) => Message::Pong(payload),
            Message::Close(_) => break,
            Message::Pong(_) | Message::Frame(_) => continue,
        };
        if let Err(e) = stream.send(reply).await {
            debug!(id, error = %e, "send failed");
            break;
        }
    }

    let _ = stream.close(None).await;
}
