// Webhook authenticity (§6, §9 "Webhook authenticity"): `X-Signature:
// sha256=<hex>` is an HMAC-SHA256 over the raw request body keyed by a
// per-tenant secret. Unsigned or badly-signed deliveries are treated as
// attacker traffic, not a retryable error.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn verify(secret: &[u8], raw_body: &[u8], header_value: Option<&str>) -> bool {
    let Some(header_value) = header_value else { return false };
    let Some(hex_sig) = header_value.strip_prefix("sha256=") else { return false };
    let Ok(sig_bytes) = hex::decode(hex_sig) else { return false };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else { return false };
    mac.update(raw_body);
    mac.verify_slice(&sig_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &[u8], body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_signature() {
        let secret = b"tenant-secret";
        let body = br#"{"tx_hash":"0xabc"}"#;
        let header = sign(secret, body);
        assert!(verify(secret, body, Some(&header)));
    }

    #[test]
    fn rejects_missing_header() {
        assert!(!verify(b"secret", b"{}", None));
    }

    #[test]
    fn rejects_tampered_body() {
        let secret = b"tenant-secret";
        let header = sign(secret, b"original");
        assert!(!verify(secret, b"tampered", Some(&header)));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = b"payload";
        let header = sign(b"right-secret", body);
        assert!(!verify(b"wrong-secret", body, Some(&header)));
    }
}
