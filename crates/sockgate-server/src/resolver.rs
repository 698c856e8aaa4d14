//! Local accountability resolver: static tokens plus signed access tokens.

use crate::config::ServerConfig;
use sockgate_core::{
    verify_access_token, AccountabilityResolver, ResolveError, ResolveFuture, TrustRecord,
};
use std::collections::HashMap;

/// Resolves tokens without leaving the process.
///
/// Lookup order: no token yields an anonymous record; a configured static
/// token yields its record; anything else must be an access token signed
/// with the configured secret.
pub struct LocalResolver {
    static_tokens: HashMap<String, TrustRecord>,
    secret: Option<Vec<u8>>,
}

impl LocalResolver {
    pub fn new(static_tokens: HashMap<String, TrustRecord>, secret: Option<Vec<u8>>) -> Self {
        Self {
            static_tokens,
            secret,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.static_tokens.clone(), config.secret.clone())
    }

    fn lookup(&self, token: Option<&str>) -> Result<TrustRecord, ResolveError> {
        let Some(token) = token else {
            return Ok(TrustRecord::anonymous());
        };

        if let Some(record) = self.static_tokens.get(token) {
            return Ok(record.clone());
        }

        match &self.secret {
            Some(secret) => verify_access_token(secret, token).map(TrustRecord::for_user),
            None => Err(ResolveError::InvalidToken("unknown token".into())),
        }
    }
}

impl AccountabilityResolver for LocalResolver {
    fn resolve<'a>(&'a self, token: Option<&'a str>) -> ResolveFuture<'a> {
        Box::pin(async move { self.lookup(token) })
    }
}
