//! Accountability: who is behind an upgrade request.
//!
//! A resolver turns an optional access token into a [`TrustRecord`]. The
//! gateway folds the outcome into an explicit [`Authorization`] so that a
//! failed resolution is a value, not a swallowed fault.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Result of resolving an access token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustRecord {
    /// Authenticated user identity, if any.
    #[serde(default)]
    pub user: Option<String>,
    /// Role of the user. Carried for downstream handlers; not used for gating.
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub app: bool,
}

impl TrustRecord {
    /// A record with no principal (token absent).
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A record for the given user with no role.
    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            ..Self::default()
        }
    }

    /// The authenticated principal. Empty user strings do not count.
    pub fn principal(&self) -> Option<&str> {
        self.user.as_deref().filter(|u| !u.is_empty())
    }
}

/// Why a token could not be resolved. Every variant rejects the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("resolver unavailable: {0}")]
    Unavailable(String),

    #[error("resolver timed out")]
    Timeout,
}

impl ResolveError {
    /// Whether the failure is on the resolver side rather than the token's.
    pub fn is_backend(&self) -> bool {
        matches!(self, ResolveError::Unavailable(_) | ResolveError::Timeout)
    }
}

/// Boxed future returned by [`AccountabilityResolver::resolve`].
pub type ResolveFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TrustRecord, ResolveError>> + Send + 'a>>;

/// Turns an optional access token into a trust record.
///
/// Implementations may do network or storage I/O; this is the only
/// suspension point on the authorization path.
pub trait AccountabilityResolver: Send + Sync {
    fn resolve<'a>(&'a self, token: Option<&'a str>) -> ResolveFuture<'a>;
}

/// Why a request was not authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unauthenticated {
    /// Resolution succeeded but carried no usable principal.
    NoPrincipal,
    /// The resolver failed.
    Resolver(ResolveError),
}

impl std::fmt::Display for Unauthenticated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unauthenticated::NoPrincipal => write!(f, "no principal"),
            Unauthenticated::Resolver(e) => write!(f, "{e}"),
        }
    }
}

/// Authorization decision for one upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// The endpoint is public; no resolution was attempted.
    Public,
    /// A principal was resolved.
    Authenticated(TrustRecord),
    /// Rejected.
    Unauthenticated(Unauthenticated),
}

impl Authorization {
    /// Fold a resolver outcome into a decision.
    pub fn from_resolved(result: Result<TrustRecord, ResolveError>) -> Self {
        match result {
            Ok(record) if record.principal().is_some() => Authorization::Authenticated(record),
            Ok(_) => Authorization::Unauthenticated(Unauthenticated::NoPrincipal),
            Err(e) => Authorization::Unauthenticated(Unauthenticated::Resolver(e)),
        }
    }

    pub fn is_allowed(&self) -> bool {
        !matches!(self, Authorization::Unauthenticated(_))
    }

    /// The trust record, if one was resolved.
    pub fn record(&self) -> Option<&TrustRecord> {
        match self {
            Authorization::Authenticated(r) => Some(r),
            _ => None,
        }
    }

    pub fn principal(&self) -> Option<&str> {
        self.record().and_then(TrustRecord::principal)
    }
}
