//! sockgate-core: shared library for the sockgate upgrade gateway.
//!
//! Provides access-token extraction from handshake requests, signed access
//! tokens, accountability (trust record) types and the resolver trait, and
//! per-endpoint gateway configuration.

pub mod accountability;
pub mod config;
pub mod error;
pub mod extract;
pub mod token;

// Re-export commonly used items at crate root.
pub use accountability::{
    AccountabilityResolver, Authorization, ResolveError, ResolveFuture, TrustRecord,
    Unauthenticated,
};
pub use config::{GatewayConfig, DEFAULT_ENDPOINT_PATH};
pub use error::{GateError, GateResult};
pub use extract::{extract_token, parse_query, ACCESS_TOKEN_PARAM};
pub use token::{generate_secret, issue_access_token, verify_access_token};
