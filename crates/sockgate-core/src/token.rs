//! HMAC-signed access tokens.
//!
//! Tokens bind a user to an expiry time so a client can authenticate a
//! handshake without a round trip to an identity service.
//! Format: `hex(user) "." hex([8-byte expiry][32-byte HMAC-SHA256])`

use crate::accountability::ResolveError;
use crate::error::{GateError, GateResult};
use ring::hmac;
use std::time::{SystemTime, UNIX_EPOCH};

const EXPIRY_LEN: usize = 8;
const TAG_LEN: usize = 32;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn signed_data(expiry: u64, user: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(EXPIRY_LEN + user.len());
    data.extend_from_slice(&expiry.to_be_bytes());
    data.extend_from_slice(user.as_bytes());
    data
}

/// Issue an access token for `user`, valid for `ttl_secs`.
pub fn issue_access_token(secret: &[u8], user: &str, ttl_secs: u64) -> String {
    issue_with_expiry(secret, user, now_secs().saturating_add(ttl_secs))
}

fn issue_with_expiry(secret: &[u8], user: &str, expiry: u64) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let tag = hmac::sign(&key, &signed_data(expiry, user));

    let mut sig = Vec::with_capacity(EXPIRY_LEN + TAG_LEN);
    sig.extend_from_slice(&expiry.to_be_bytes());
    sig.extend_from_slice(tag.as_ref());

    format!("{}.{}", hex::encode(user.as_bytes()), hex::encode(sig))
}

/// Verify an access token and return the user it was issued for.
///
/// Checks the structure first, then the HMAC signature, then the expiry.
pub fn verify_access_token(secret: &[u8], token: &str) -> Result<String, ResolveError> {
    let (user_hex, sig_hex) = token
        .split_once('.')
        .ok_or_else(|| ResolveError::Malformed("missing separator".into()))?;

    let user_bytes =
        hex::decode(user_hex).map_err(|e| ResolveError::Malformed(format!("user: {e}")))?;
    let user = String::from_utf8(user_bytes)
        .map_err(|_| ResolveError::Malformed("user is not utf-8".into()))?;
    let sig = hex::decode(sig_hex).map_err(|e| ResolveError::Malformed(format!("signature: {e}")))?;

    if sig.len() != EXPIRY_LEN + TAG_LEN {
        return Err(ResolveError::Malformed(format!(
            "invalid signature length: expected {}, got {}",
            EXPIRY_LEN + TAG_LEN,
            sig.len()
        )));
    }

    let mut expiry_bytes = [0u8; EXPIRY_LEN];
    expiry_bytes.copy_from_slice(&sig[..EXPIRY_LEN]);
    let expiry = u64::from_be_bytes(expiry_bytes);

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hmac::verify(&key, &signed_data(expiry, &user), &sig[EXPIRY_LEN..])
        .map_err(|_| ResolveError::InvalidToken("bad signature".into()))?;

    if now_secs() > expiry {
        return Err(ResolveError::Expired);
    }

    Ok(user)
}

/// Generate a random signing secret (32 bytes).
pub fn generate_secret() -> GateResult<Vec<u8>> {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    let mut secret = vec![0u8; 32];
    rng.fill(&mut secret)
        .map_err(|_| GateError::Other("RNG failure".into()))?;
    Ok(secret)
}
