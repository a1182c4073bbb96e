//! HMAC request signing for the authenticated venue surfaces.
//!
//! The venue authenticates both the USER WebSocket subscribe frame and the
//! private REST endpoints with the same primitive: an HMAC-SHA256 over
//! `timestamp + method + path (+ body)`, keyed by the URL-safe-base64
//! decoded API secret, with the digest re-encoded URL-safe.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::types::WsAuth;

type HmacSha256 = Hmac<Sha256>;

/// Path signed for USER WebSocket authentication.
const WS_USER_PATH: &str = "/ws/user";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("API secret is not valid base64: {0}")]
    BadSecret(#[from] base64::DecodeError),
}

/// Credential set for the venue's private surfaces.
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    /// URL-safe base64 encoded HMAC key.
    pub api_secret: String,
    pub passphrase: String,
    /// On-chain signing address associated with the key.
    pub address: String,
}

/// Sign `timestamp + method + path + body` with the API secret.
///
/// Returns the URL-safe base64 encoded digest.
pub fn sign_request(
    api_secret: &str,
    timestamp: i64,
    method: &str,
    path: &str,
    body: &str,
) -> Result<String, AuthError> {
    let key = URL_SAFE.decode(api_secret)?;
    let mut mac = HmacSha256::new_from_slice(&key).expect("hmac accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());
    Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
}

/// Build the authentication block for the USER channel subscribe frame.
///
/// The signature covers `timestamp + "GET" + "/ws/user"` with the current
/// UNIX-seconds timestamp.
pub fn ws_auth_payload(creds: &ApiCredentials) -> Result<WsAuth, AuthError> {
    let timestamp = Utc::now().timestamp();
    let signature = sign_request(&creds.api_secret, timestamp, "GET", WS_USER_PATH, "")?;
    Ok(WsAuth {
        api_key: creds.api_key.clone(),
        passphrase: creds.passphrase.clone(),
        address: creds.address.clone(),
        timestamp: timestamp.to_string(),
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_creds() -> ApiCredentials {
        ApiCredentials {
            api_key: "key-1".to_string(),
            // "test-secret-bytes" URL-safe encoded
            api_secret: URL_SAFE.encode(b"test-secret-bytes"),
            passphrase: "pass-1".to_string(),
            address: "0xabc".to_string(),
        }
    }

    #[test]
    fn test_sign_request_deterministic() {
        let creds = test_creds();
        let a = sign_request(&creds.api_secret, 1_700_000_000, "GET", "/ws/user", "").unwrap();
        let b = sign_request(&creds.api_secret, 1_700_000_000, "GET", "/ws/user", "").unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_sign_request_varies_with_inputs() {
        let creds = test_creds();
        let base = sign_request(&creds.api_secret, 1_700_000_000, "GET", "/ws/user", "").unwrap();
        let other_ts =
            sign_request(&creds.api_secret, 1_700_000_001, "GET", "/ws/user", "").unwrap();
        let other_path =
            sign_request(&creds.api_secret, 1_700_000_000, "GET", "/orders", "").unwrap();
        assert_ne!(base, other_ts);
        assert_ne!(base, other_path);
    }

    #[test]
    fn test_sign_request_url_safe_output() {
        let creds = test_creds();
        let sig = sign_request(&creds.api_secret, 1_700_000_000, "POST", "/order", "{}").unwrap();
        assert!(!sig.contains('+'));
        assert!(!sig.contains('/'));
    }

    #[test]
    fn test_sign_request_rejects_bad_secret() {
        assert!(sign_request("!!not-base64!!", 0, "GET", "/ws/user", "").is_err());
    }

    #[test]
    fn test_ws_auth_payload_fields() {
        let creds = test_creds();
        let auth = ws_auth_payload(&creds).unwrap();
        assert_eq!(auth.api_key, "key-1");
        assert_eq!(auth.passphrase, "pass-1");
        assert_eq!(auth.address, "0xabc");
        assert!(auth.timestamp.parse::<i64>().is_ok());
        assert!(!auth.signature.is_empty());
    }
}
