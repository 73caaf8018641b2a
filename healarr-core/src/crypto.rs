//! `CredentialStore` implementation (spec §6): AES-256-GCM at rest for
//! arr-instance API keys, keyed by a secret sourced from configuration.
//! Ciphertext is stored as base64(nonce || ciphertext) so a single text
//! column holds the whole envelope, mirroring the nonce+ciphertext framing
//! used for auth-token storage elsewhere in the retrieved Rust corpus.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use zeroize::Zeroizing;

use crate::capabilities::CredentialStore;
use crate::error::{HealarrError, Result};

const NONCE_SIZE: usize = 12;

/// AES-256-GCM backed credential store. The key is held zeroized on drop;
/// nothing about it is ever logged or serialised.
pub struct AesGcmCredentialStore {
    key: Zeroizing<[u8; 32]>,
}

impl AesGcmCredentialStore {
    /// `key_bytes` must be exactly 32 bytes (spec: "a key sourced from
    /// config"). Typically derived once at startup from the configured
    /// `CREDENTIAL_KEY` secret.
    pub fn new(key_bytes: [u8; 32]) -> Self {
        Self {
            key: Zeroizing::new(key_bytes),
        }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_slice()))
    }
}

impl CredentialStore for AesGcmCredentialStore {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = self.cipher();
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| HealarrError::Internal(format!("encryption failed: {e}")))?;

        let mut envelope = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        envelope.extend_from_slice(nonce.as_slice());
        envelope.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(envelope))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let envelope = BASE64
            .decode(ciphertext)
            .map_err(|e| HealarrError::Internal(format!("invalid ciphertext encoding: {e}")))?;

        if envelope.len() < NONCE_SIZE {
            return Err(HealarrError::Internal(
                "ciphertext shorter than nonce".to_string(),
            ));
        }
        let (nonce_bytes, data) = envelope.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher()
            .decrypt(nonce, data)
            .map_err(|e| HealarrError::Internal(format!("decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| HealarrError::Internal(format!("decrypted value is not UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AesGcmCredentialStore {
        AesGcmCredentialStore::new([7u8; 32])
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let store = store();
        let ciphertext = store.encrypt("sk-arr-instance-key").unwrap();
        assert_ne!(ciphertext, "sk-arr-instance-key");
        assert_eq!(store.decrypt(&ciphertext).unwrap(), "sk-arr-instance-key");
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let store = store();
        let mut ciphertext = store.encrypt("secret").unwrap();
        ciphertext.push('A');
        assert!(store.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn different_keys_cannot_cross_decrypt() {
        let a = AesGcmCredentialStore::new([1u8; 32]);
        let b = AesGcmCredentialStore::new([2u8; 32]);
        let ciphertext = a.encrypt("secret").unwrap();
        assert!(b.decrypt(&ciphertext).is_err());
    }
}
