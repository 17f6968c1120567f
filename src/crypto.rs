// dumptool/src/crypto.rs
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::errors::{AppError, Result};

const NONCE_LEN: usize = 12;

/// Encrypts target credentials at rest.
///
/// Built once at startup and handed to every component that needs it.
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// AES-256-GCM over a base64 key; ciphertexts are `base64(nonce || sealed)`.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    pub fn from_base64_key(key_base64: &str) -> Result<Self> {
        let key = STANDARD
            .decode(key_base64.trim())
            .map_err(|e| AppError::Config(format!("invalid encryption key format: {}", e)))?;
        if key.len() != 32 {
            return Err(AppError::Config(format!(
                "encryption key must be 32 bytes when decoded, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        Ok(AesGcmCipher { cipher })
    }

    /// A fresh random key in the format `from_base64_key` expects.
    pub fn generate_key() -> String {
        let key = Aes256Gcm::generate_key(OsRng);
        STANDARD.encode(key)
    }
}

impl CredentialCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| AppError::Credential("failed to encrypt credential".to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(STANDARD.encode(out))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let data = STANDARD
            .decode(ciphertext)
            .map_err(|e| AppError::Credential(format!("failed to decode encrypted password: {}", e)))?;
        if data.len() < NONCE_LEN {
            return Err(AppError::Credential("encrypted data too short".to_string()));
        }
        let (nonce, sealed) = data.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| AppError::Credential("failed to decrypt password".to_string()))?;
        String::from_utf8(plain)
            .map_err(|e| AppError::Credential(format!("decrypted password is not UTF-8: {}", e)))
    }
}
