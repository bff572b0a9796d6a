// Session-secret material (bank-rail OTP session tokens, provider API
// keys) is stored only as AES-256-GCM ciphertext at rest (§5, §9);
// plaintext lives in memory only for the duration of a single outbound
// call. Nonce-prepended encrypt/decrypt, the same layout as
// `tos_wallet::Cipher` (XChaCha20-Poly1305 there, AES-256-GCM here per
// spec) — random nonce generated per call, stored alongside the
// ciphertext rather than derived.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use money_common::Error;

pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub const NONCE_SIZE: usize = 12;

    pub fn new(key_bytes: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Self { cipher: Aes256Gcm::new(key) }
    }

    /// Encrypts `plaintext`, returning `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| Error::internal("failed to encrypt secret material"))?;
        let mut out = Vec::with_capacity(Self::NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts the `nonce || ciphertext` layout produced by `encrypt`.
    /// The returned plaintext must only be held for the single outbound
    /// call that needs it.
    pub fn decrypt(&self, encrypted: &[u8]) -> Result<Vec<u8>, Error> {
        if encrypted.len() < Self::NONCE_SIZE {
            return Err(Error::validation("encrypted secret material is truncated"));
        }
        let (nonce_bytes, ciphertext) = encrypted.split_at(Self::NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::internal("failed to decrypt secret material"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_secret_material() {
        let key = [7u8; 32];
        let cipher = SecretCipher::new(&key);
        let plaintext = b"session-otp-secret";
        let encrypted = cipher.encrypt(plaintext).unwrap();
        assert_ne!(encrypted, plaintext.to_vec());
        let decrypted = cipher.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn distinct_calls_use_distinct_nonces() {
        let key = [3u8; 32];
        let cipher = SecretCipher::new(&key);
        let a = cipher.encrypt(b"same-plaintext").unwrap();
        let b = cipher.encrypt(b"same-plaintext").unwrap();
        assert_ne!(a, b);
    }
}
