use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand_core::{OsRng, RngCore};

#[derive(Debug)]
pub enum CryptoError {
    Encrypt(String),
    Decrypt(String),
    Decode(String),
    Json(serde_json::Error),
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::Encrypt(e) => write!(f, "Encryption error: {e}"),
            CryptoError::Decrypt(e) => write!(f, "Decryption error: {e}"),
            CryptoError::Decode(e) => write!(f, "Base64 decode error: {e}"),
            CryptoError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Opaque encrypt/decrypt primitive for stored data-source credentials.
///
/// The client factory only ever calls `decrypt`; the admin API calls
/// `encrypt` when a data source is created.
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, data: &serde_json::Value) -> Result<String, CryptoError>;
    fn decrypt(&self, encoded: &str) -> Result<serde_json::Value, CryptoError>;
}

/// AES-256-GCM cipher keyed by the process master key.
#[derive(Clone)]
pub struct MasterKeyCipher {
    key: [u8; 32],
}

impl MasterKeyCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }
}

impl std::fmt::Debug for MasterKeyCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKeyCipher { .. }")
    }
}

impl CredentialCipher for MasterKeyCipher {
    fn encrypt(&self, data: &serde_json::Value) -> Result<String, CryptoError> {
        encrypt_json(data, &self.key)
    }

    fn decrypt(&self, encoded: &str) -> Result<serde_json::Value, CryptoError> {
        decrypt_json(encoded, &self.key)
    }
}

/// Encrypt a JSON value with AES-256-GCM.
/// Returns base64(12-byte nonce ‖ ciphertext+tag).
pub fn encrypt_json(data: &serde_json::Value, key: &[u8; 32]) -> Result<String, CryptoError> {
    let plaintext = serde_json::to_vec(data).map_err(CryptoError::Json)?;

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(key.into());
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_ref())
        .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

    let mut combined = nonce_bytes.to_vec();
    combined.extend_from_slice(&ciphertext);

    Ok(STANDARD.encode(&combined))
}

/// Decrypt a base64-encoded AES-256-GCM ciphertext back to a JSON value.
pub fn decrypt_json(encoded: &str, key: &[u8; 32]) -> Result<serde_json::Value, CryptoError> {
    let data = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CryptoError::Decode(e.to_string()))?;

    if data.len() < 12 {
        return Err(CryptoError::Decrypt(
            "Ciphertext too short (< 12 bytes)".to_string(),
        ));
    }

    let (nonce_bytes, ciphertext) = data.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new(key.into());
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| CryptoError::Decrypt(e.to_string()))?;

    serde_json::from_slice(&plaintext).map_err(CryptoError::Json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        [42u8; 32]
    }

    #[test]
    fn test_round_trip_credentials() {
        let cipher = MasterKeyCipher::new(test_key());
        let data = serde_json::json!({
            "host": "localhost",
            "port": 5432,
            "database": "blog",
            "user": "alice",
            "password": "s3cret",
        });
        let encrypted = cipher.encrypt(&data).unwrap();
        assert!(
            !encrypted.contains("s3cret"),
            "Ciphertext must not leak the password"
        );
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), data);
    }

    #[test]
    fn test_wrong_key_fails() {
        let data = serde_json::json!({"url": "postgres://alice:pw@localhost/blog"});
        let encrypted = MasterKeyCipher::new([1u8; 32]).encrypt(&data).unwrap();
        let result = MasterKeyCipher::new([2u8; 32]).decrypt(&encrypted);
        assert!(
            matches!(result, Err(CryptoError::Decrypt(_))),
            "Decryption with wrong key should fail"
        );
    }

    #[test]
    fn test_corrupted_data_fails() {
        let result = decrypt_json("not-valid-base64!!!", &test_key());
        assert!(matches!(result, Err(CryptoError::Decode(_))));
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let short = STANDARD.encode([0u8; 8]);
        let result = decrypt_json(&short, &test_key());
        assert!(matches!(result, Err(CryptoError::Decrypt(_))));
    }

    #[test]
    fn test_two_encryptions_differ() {
        let key = test_key();
        let data = serde_json::json!({"host": "localhost"});
        let enc1 = encrypt_json(&data, &key).unwrap();
        let enc2 = encrypt_json(&data, &key).unwrap();
        assert_ne!(
            enc1, enc2,
            "Random nonce should produce different ciphertext each time"
        );
    }
}
