//! Per-endpoint gateway configuration.

use crate::error::{GateError, GateResult};
use serde::Deserialize;

/// Endpoint path used when none is configured.
pub const DEFAULT_ENDPOINT_PATH: &str = "/websocket";

/// Configuration of one upgrade gateway. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Exact request path this gateway claims.
    #[serde(rename = "path", default = "default_endpoint_path")]
    pub endpoint_path: String,
    /// Skip authorization entirely.
    #[serde(default)]
    pub public: bool,
}

fn default_endpoint_path() -> String {
    DEFAULT_ENDPOINT_PATH.to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint_path: default_endpoint_path(),
            public: false,
        }
    }
}

impl GatewayConfig {
    pub fn new(endpoint_path: impl Into<String>, public: bool) -> Self {
        Self {
            endpoint_path: endpoint_path.into(),
            public,
        }
    }

    /// Reject paths that can never match a request path.
    pub fn validate(&self) -> GateResult<()> {
        if !self.endpoint_path.starts_with('/') {
            return Err(GateError::Config(format!(
                "endpoint path must start with '/': {:?}",
                self.endpoint_path
            )));
        }
        if self.endpoint_path.contains('?') || self.endpoint_path.contains('#') {
            return Err(GateError::Config(format!(
                "endpoint path must not contain a query or fragment: {:?}",
                self.endpoint_path
            )));
        }
        Ok(())
    }
}
