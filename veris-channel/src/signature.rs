use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 over the raw callback payload.
pub fn sign(secret: &str, payload: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification; malformed hex fails closed.
pub fn verify(secret: &str, payload: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_verifies() {
        let sig = sign("secret", "payload");
        assert!(verify("secret", "payload", &sig));
    }

    #[test]
    fn wrong_secret_or_payload_fails() {
        let sig = sign("secret", "payload");
        assert!(!verify("other", "payload", &sig));
        assert!(!verify("secret", "tampered", &sig));
        assert!(!verify("secret", "payload", "not-hex"));
    }
}
