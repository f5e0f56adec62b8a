use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The order-gateway secret is itself base64-encoded (possibly URL-safe,
/// possibly missing padding); decode it once to raw key bytes before using
/// it as the HMAC key.
fn normalize_base64(secret: &str) -> Vec<u8> {
    let padded = match secret.len() % 4 {
        2 => format!("{secret}=="),
        3 => format!("{secret}="),
        _ => secret.to_string(),
    };
    let translated: String = padded.chars().map(|c| if c == '-' { '+' } else if c == '_' { '/' } else { c }).collect();
    STANDARD.decode(&translated).unwrap_or_else(|_| secret.as_bytes().to_vec())
}

/// `base64_url(hmac_sha256(normalize_base64(secret), "<unix_seconds><method><path><body>"))`,
/// per the order-gateway and user-channel auth scheme.
pub fn sign_request(secret: &str, timestamp: i64, method: &str, path: &str, body: Option<&str>) -> String {
    let message = format!("{}{}{}{}", timestamp, method, path, body.unwrap_or(""));
    let key = normalize_base64(secret);

    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    let digest = mac.finalize().into_bytes();

    URL_SAFE_NO_PAD.encode(digest)
}

/// Convenience wrapper for the `/ws/user` handshake signature:
/// `sign_request(secret, ts, "GET", "/ws/user", None)`.
pub fn sign_user_channel(secret: &str, timestamp: i64) -> String {
    sign_request(secret, timestamp, "GET", "/ws/user", None)
}
