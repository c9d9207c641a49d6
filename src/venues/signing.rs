//! HMAC-SHA256 request signing for exchange venues.

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(secret: &str, message: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow!("HMAC key error: {e}"))?;
    mac.update(message.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Binance signature: lowercase hex HMAC of the query string.
pub fn sign_hex(query: &str, secret: &str) -> Result<String> {
    Ok(hex::encode(hmac_sha256(secret, query)?))
}

/// OKX prehash: `timestamp + METHOD + requestPath + body`.
pub fn okx_prehash(timestamp: &str, method: &str, path: &str, body: &str) -> String {
    format!("{timestamp}{}{path}{body}", method.to_uppercase())
}

/// OKX signature: standard base64 HMAC of the prehash string.
pub fn sign_base64(message: &str, secret: &str) -> Result<String> {
    Ok(BASE64.encode(hmac_sha256(secret, message)?))
}
