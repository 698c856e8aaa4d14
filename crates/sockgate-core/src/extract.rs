//! Access-token extraction from an upgrade request.
//!
//! A token may arrive either as the `access_token` query parameter (browsers
//! cannot set headers on a WebSocket handshake) or as an
//! `Authorization: Bearer <token>` header. The query parameter wins.

use http::header::AUTHORIZATION;
use http::HeaderMap;

/// Query parameter carrying an access token.
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

/// Extract an access token from decoded query pairs and request headers.
///
/// Returns `None` for any malformed input; this never fails.
pub fn extract_token(headers: &HeaderMap, query: &[(String, String)]) -> Option<String> {
    // First non-empty occurrence; an empty value counts as absent.
    if let Some((_, value)) = query
        .iter()
        .find(|(k, v)| k == ACCESS_TOKEN_PARAM && !v.is_empty())
    {
        return Some(value.clone());
    }

    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    bearer_token(value).map(str::to_string)
}

/// Parse `Bearer <token>`: exactly two single-space separated parts.
fn bearer_token(value: &str) -> Option<&str> {
    let mut parts = value.split(' ');
    let scheme = parts.next()?;
    let token = parts.next()?;
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token)
}

/// Decode an `application/x-www-form-urlencoded` query string into pairs.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}
