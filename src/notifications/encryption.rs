use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("Invalid key: expected 32 bytes (64 hex characters)")]
    InvalidKey,
}

/// AES-256-GCM for channel config blobs. Output is `nonce || ciphertext`.
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    pub fn new(key: &[u8]) -> Result<Self, EncryptionError> {
        Ok(Self {
            cipher: Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::InvalidKey)?,
        })
    }

    pub fn from_hex_key(hex_key: &str) -> Result<Self, EncryptionError> {
        let key = hex::decode(hex_key.trim()).map_err(|_| EncryptionError::InvalidKey)?;
        Self::new(&key)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng); // unique per message
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;

        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    pub fn decrypt(&self, encrypted_data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if encrypted_data.len() < NONCE_LEN {
            return Err(EncryptionError::DecryptionFailed(
                "Invalid encrypted data: too short to contain a nonce".to_string(),
            ));
        }
        let (nonce_bytes, ciphertext) = encrypted_data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_encrypt_decrypt_cycle() {
        let service = EncryptionService::from_hex_key(KEY_HEX).unwrap();
        let plaintext = br#"{"type":"slack","webhook_url":"https://hooks.slack.com/x"}"#;

        let encrypted = service.encrypt(plaintext).unwrap();
        assert_ne!(&encrypted[NONCE_LEN..], plaintext.as_slice());
        assert_eq!(service.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn test_nonce_differs_per_call() {
        let service = EncryptionService::from_hex_key(KEY_HEX).unwrap();
        let a = service.encrypt(b"same").unwrap();
        let b = service.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let service = EncryptionService::from_hex_key(KEY_HEX).unwrap();
        let other = EncryptionService::new(&[7u8; 32]).unwrap();
        let encrypted = service.encrypt(b"secret").unwrap();
        assert!(matches!(
            other.decrypt(&encrypted),
            Err(EncryptionError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_rejects_short_input_and_bad_keys() {
        let service = EncryptionService::from_hex_key(KEY_HEX).unwrap();
        assert!(service.decrypt(&[0u8; 5]).is_err());
        assert!(matches!(
            EncryptionService::from_hex_key("abcd"),
            Err(EncryptionError::InvalidKey)
        ));
        assert!(matches!(
            EncryptionService::from_hex_key("not hex at all"),
            Err(EncryptionError::InvalidKey)
        ));
    }
}
