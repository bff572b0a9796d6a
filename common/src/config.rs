// Defaults named explicitly in the spec (§5 "Timeouts"), so every crate
// that needs one pulls from here instead of re-guessing the number.

use std::fmt;
use std::time::Duration;

pub const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_ADAPTER_MAX_RETRIES: u32 = 3;
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 3600);
pub const DEFAULT_DEPOSIT_EXPIRY: Duration = Duration::from_secs(24 * 3600);
pub const DEFAULT_BRIDGE_ATTESTATION_CEILING: Duration = Duration::from_secs(12 * 3600);
pub const DEFAULT_JOB_CLAIM_TIMEOUT_MULTIPLE: u32 = 2;

pub const DEFAULT_ALLOCATION_RATIO_SPENDING: &str = "0.70";
pub const DEFAULT_ALLOCATION_RATIO_STASH: &str = "0.30";

/// Wraps secret material (adapter API keys, HMAC secrets, AES key) so a
/// `#[derive(Debug)]` on a config struct can never accidentally log it.
/// Plaintext only lives in memory for the call that needs it; this wrapper
/// does not itself encrypt — persisted secrets are AES-256-GCM ciphertext
/// at rest (§5, §9), decrypted into one of these just before use.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***redacted***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_debug_never_prints_plaintext() {
        let secret = Secret::new("super-secret-key".to_string());
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("super-secret-key"));
        assert_eq!(secret.expose(), "super-secret-key");
    }
}
