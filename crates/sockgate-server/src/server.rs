//! Gateway server: builds the endpoint registry from config and owns the
//! listener lifecycle, including graceful shutdown.

use crate::config::ServerConfig;
use crate::echo::EchoHandler;
use crate::gateway::{ConnectionHandler, EndpointRegistry, UpgradeGateway};
use crate::listener::{self, ListenerOptions};
use crate::resolver::LocalResolver;
use sockgate_core::{AccountabilityResolver, GateResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

/// The sockgate server instance.
pub struct GateServer {
    config: ServerConfig,
    endpoints: Arc<EndpointRegistry>,
    tls: Option<TlsAcceptor>,
    /// Flips to `true` on shutdown; stops the listener and in-flight handshakes.
    stop: watch::Sender<bool>,
}

impl GateServer {
    /// Server with the local resolver and the echo handler on every endpoint.
    pub fn new(config: ServerConfig) -> GateResult<Self> {
        let resolver = Arc::new(LocalResolver::from_config(&config));
        Self::with_parts(config, resolver, Arc::new(EchoHandler))
    }

    /// Server with a caller-supplied resolver and handler shared by all endpoints.
    pub fn with_parts(
        config: ServerConfig,
        resolver: Arc<dyn AccountabilityResolver>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> GateResult<Self> {
        let mut endpoints = EndpointRegistry::new();
        for endpoint in &config.endpoints {
            let gateway =
                UpgradeGateway::new(endpoint.clone(), Arc::clone(&resolver), Arc::clone(&handler))
                    .with_resolve_timeout(config.resolve_timeout);
            endpoints.register(gateway)?;
        }

        let tls = match (&config.cert_path, &config.key_path) {
            (Some(cert), Some(key)) => Some(listener::load_tls_acceptor(cert, key)?),
            _ => None,
        };

        Ok(Self {
            config,
            endpoints: Arc::new(endpoints),
            tls,
            stop: watch::channel(false).0,
        })
    }

    pub fn endpoints(&self) -> &Arc<EndpointRegistry> {
        &self.endpoints
    }

    fn listener_options(&self) -> ListenerOptions {
        ListenerOptions {
            handshake_timeout: self.config.handshake_timeout,
            max_header_bytes: self.config.max_header_bytes,
        }
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> GateResult<TcpListener> {
        listener::bind(&self.config.bind, self.config.port).await
    }

    /// Serve upgrade requests on an already-bound listener until shutdown.
    pub async fn serve(&self, tcp: TcpListener) {
        info!(
            endpoints = ?self.endpoints.paths(),
            tls = self.tls.is_some(),
            "serving upgrade requests"
        );
        listener::serve(
            tcp,
            self.tls.clone(),
            Arc::clone(&self.endpoints),
            self.listener_options(),
            self.stop.subscribe(),
        )
        .await;
    }

    /// Bind and serve.
    pub async fn run(&self) -> GateResult<()> {
        let tcp = self.bind().await?;
        self.serve(tcp).await;
        Ok(())
    }

    /// Stop accepting and abandon in-flight handshakes, close every
    /// registry, then wait up to `grace` for the connection tasks to finish.
    /// Returns how many connections were signalled.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.stop.send_replace(true);
        let signalled = self.endpoints.close().await;
        info!(connections = signalled, "terminating connections");

        if tokio::time::timeout(grace, self.endpoints.wait_empty())
            .await
            .is_err()
        {
            warn!(
                remaining = self.endpoints.connection_count().await,
                "connections still open after grace period"
            );
        }
        signalled
    }
}
