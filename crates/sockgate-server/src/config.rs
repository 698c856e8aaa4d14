//! Server configuration: TOML file + CLI overrides.

use serde::Deserialize;
use sockgate_core::{GateError, GateResult, GatewayConfig, TrustRecord};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
    /// `[[endpoint]]` tables, one gateway each.
    #[serde(default, rename = "endpoint")]
    pub endpoints: Vec<GatewayConfig>,
}

impl ConfigFile {
    pub fn parse(content: &str) -> GateResult<Self> {
        toml::from_str(content).map_err(|e| GateError::Config(format!("config parse error: {e}")))
    }
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cert: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: u64,
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout: u64,
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            cert: None,
            key: None,
            handshake_timeout: default_handshake_timeout(),
            resolve_timeout: default_resolve_timeout(),
            max_header_bytes: default_max_header_bytes(),
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    /// Hex-encoded HMAC secret for signed access tokens.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_token_ttl")]
    pub token_ttl: u64,
    #[serde(default)]
    pub tokens: Vec<StaticToken>,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            secret: None,
            token_ttl: default_token_ttl(),
            tokens: Vec::new(),
        }
    }
}

/// `[[auth.tokens]]` entry: a fixed token and the record it resolves to.
#[derive(Debug, Clone, Deserialize)]
pub struct StaticToken {
    pub token: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub app: bool,
}

impl StaticToken {
    fn record(&self) -> TrustRecord {
        TrustRecord {
            user: self.user.clone(),
            role: self.role.clone(),
            admin: self.admin,
            app: self.app,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8055
}
fn default_handshake_timeout() -> u64 {
    10
}
fn default_resolve_timeout() -> u64 {
    5
}
fn default_max_header_bytes() -> usize {
    16 * 1024
}
fn default_token_ttl() -> u64 {
    86400
}

/// Values given on the command line; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub cert: Option<String>,
    pub key: Option<String>,
    pub resolve_timeout: Option<u64>,
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub handshake_timeout: Duration,
    /// `None` disables the resolver timeout.
    pub resolve_timeout: Option<Duration>,
    pub max_header_bytes: usize,
    pub secret: Option<Vec<u8>>,
    pub token_ttl: u64,
    pub static_tokens: HashMap<String, TrustRecord>,
    pub endpoints: Vec<GatewayConfig>,
}

impl ServerConfig {
    /// Load config from a TOML file, then apply CLI overrides.
    ///
    /// A missing file is not an error; defaults are used.
    pub fn load(config_path: Option<&Path>, overrides: ConfigOverrides) -> GateResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    ConfigFile::parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config, overrides)
    }

    /// Merge a parsed file with overrides and validate the result.
    pub fn resolve(file: ConfigFile, overrides: ConfigOverrides) -> GateResult<Self> {
        let cert = overrides.cert.or(file.server.cert);
        let key = overrides.key.or(file.server.key);
        if cert.is_some() != key.is_some() {
            return Err(GateError::Config(
                "TLS needs both cert and key".to_string(),
            ));
        }

        let secret = file
            .auth
            .secret
            .as_deref()
            .map(|s| {
                hex::decode(s.trim())
                    .map_err(|e| GateError::Config(format!("auth.secret is not hex: {e}")))
            })
            .transpose()?;
        if matches!(secret.as_deref(), Some([])) {
            return Err(GateError::Config("auth.secret is empty".to_string()));
        }

        let mut static_tokens = HashMap::new();
        for entry in &file.auth.tokens {
            if entry.token.is_empty() {
                return Err(GateError::Config("empty static token".to_string()));
            }
            if static_tokens.insert(entry.token.clone(), entry.record()).is_some() {
                return Err(GateError::Config(format!(
                    "static token listed twice (user {:?})",
                    entry.user
                )));
            }
        }

        let endpoints = if file.endpoints.is_empty() {
            vec![GatewayConfig::default()]
        } else {
            file.endpoints
        };
        for endpoint in &endpoints {
            endpoint.validate()?;
        }

        let resolve_timeout = overrides.resolve_timeout.unwrap_or(file.server.resolve_timeout);

        Ok(Self {
            bind: overrides.bind.unwrap_or(file.server.bind),
            port: overrides.port.unwrap_or(file.server.port),
            cert_path: cert.as_deref().map(expand_tilde_str),
            key_path: key.as_deref().map(expand_tilde_str),
            handshake_timeout: Duration::from_secs(file.server.handshake_timeout.max(1)),
            resolve_timeout: (resolve_timeout > 0).then(|| Duration::from_secs(resolve_timeout)),
            max_header_bytes: file.server.max_header_bytes,
            secret,
            token_ttl: file.auth.token_ttl,
            static_tokens,
            endpoints,
        })
    }

    pub fn tls_enabled(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
