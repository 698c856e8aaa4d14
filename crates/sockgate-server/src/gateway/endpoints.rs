//! Endpoint registry: the single dispatch point for a shared listener.
//!
//! Gateways are keyed by their exact endpoint path, so a request is offered
//! to at most one gateway and two gateways can never claim the same path.

use super::upgrade::UpgradeGateway;
use super::Outcome;
use crate::request::UpgradeRequest;
use sockgate_core::{GateError, GateResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Gateways sharing one listener, indexed by endpoint path.
#[derive(Default)]
pub struct EndpointRegistry {
    gateways: HashMap<String, Arc<UpgradeGateway>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gateway under its endpoint path.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::DuplicateEndpoint`] if the path is taken, and
    /// [`GateError::Config`] if the path is not a valid request path.
    pub fn register(&mut self, gateway: UpgradeGateway) -> GateResult<Arc<UpgradeGateway>> {
        gateway.config().validate()?;
        let path = gateway.endpoint().to_string();
        if self.gateways.contains_key(&path) {
            return Err(GateError::DuplicateEndpoint(path));
        }

        let gateway = Arc::new(gateway);
        info!(endpoint = %path, public = gateway.config().public, "endpoint registered");
        self.gateways.insert(path, Arc::clone(&gateway));
        Ok(gateway)
    }

    pub fn get(&self, path: &str) -> Option<&Arc<UpgradeGateway>> {
        self.gateways.get(path)
    }

    /// Registered endpoint paths, sorted.
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.gateways.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    pub fn gateways(&self) -> impl Iterator<Item = &Arc<UpgradeGateway>> {
        self.gateways.values()
    }

    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }

    /// Offer a request to the gateway owning its path.
    ///
    /// The lookup is synchronous; a miss returns the request untouched.
    pub async fn dispatch(&self, request: UpgradeRequest) -> Outcome {
        match self.gateways.get(&request.path) {
            Some(gateway) => gateway.handle(request).await,
            None => Outcome::Ignored(request),
        }
    }

    /// Force-close the connections of every gateway.
    pub async fn terminate_all(&self) -> usize {
        let mut total = 0;
        for gateway in self.gateways.values() {
            total += gateway.terminate_all().await;
        }
        total
    }

    /// Close every gateway's registry: no further upgrades complete, and
    /// live connections are signalled. Returns how many were signalled.
    pub async fn close(&self) -> usize {
        let mut total = 0;
        for gateway in self.gateways.values() {
            total += gateway.connections().close().await;
        }
        total
    }

    /// Live connections across all gateways.
    pub async fn connection_count(&self) -> usize {
        let mut total = 0;
        for gateway in self.gateways.values() {
            total += gateway.connections().count().await;
        }
        total
    }

    /// Resolves once every gateway's registry is empty.
    pub async fn wait_empty(&self) {
        for gateway in self.gateways.values() {
            gateway.connections().wait_empty().await;
        }
    }
}
