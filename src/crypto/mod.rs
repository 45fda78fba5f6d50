//! Field-level encryption for plugin configuration and export URLs.
//!
//! Encrypted columns are sealed and opened at the storage boundary. Every
//! store call that touches an encrypted column receives the cipher as an
//! explicit `&dyn FieldCipher` argument; there is no process-global key.
//!
//! Canonical representations:
//! - An empty configuration map is stored as SQL `NULL`, never as the
//!   encryption of `{}`. A `NULL` column opens to an empty map.
//! - An absent or empty URL is stored as SQL `NULL`.

use std::{collections::BTreeMap, fmt};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Encoding error: {0}")]
    Encoding(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Symmetric key used to seal encrypted columns.
///
/// `Debug` never prints key material.
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    /// Decode a base64 (standard alphabet) key.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("not valid base64: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

/// Encrypt `plaintext` under `key`. Output is `nonce || ciphertext`.
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(nonce.as_slice());
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a blob produced by [`encrypt`]. A wrong key or corrupted data is
/// an error, never an empty result.
pub fn decrypt(sealed: &[u8], key: &EncryptionKey) -> CryptoResult<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(CryptoError::Decrypt("ciphertext too short".into()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decrypt("authentication tag mismatch".into()))
}

/// Cipher applied to encrypted columns.
pub trait FieldCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>>;
    fn decrypt(&self, ciphertext: &[u8]) -> CryptoResult<Vec<u8>>;
}

/// AES-256-GCM cipher bound to a server-held key.
#[derive(Debug, Clone)]
pub struct AesGcmCipher {
    key: EncryptionKey,
}

impl AesGcmCipher {
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }
}

impl FieldCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        encrypt(plaintext, &self.key)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        decrypt(ciphertext, &self.key)
    }
}

/// Seal a configuration map. Empty maps become `None`.
pub fn seal_configurations(
    configurations: &BTreeMap<String, String>,
    cipher: &dyn FieldCipher,
) -> CryptoResult<Option<Vec<u8>>> {
    if configurations.is_empty() {
        return Ok(None);
    }
    let json =
        serde_json::to_vec(configurations).map_err(|e| CryptoError::Encoding(e.to_string()))?;
    cipher.encrypt(&json).map(Some)
}

/// Open a sealed configuration map. `None` opens to an empty map.
pub fn open_configurations(
    sealed: Option<&[u8]>,
    cipher: &dyn FieldCipher,
) -> CryptoResult<BTreeMap<String, String>> {
    let Some(sealed) = sealed else {
        return Ok(BTreeMap::new());
    };
    let json = cipher.decrypt(sealed)?;
    if json.is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_slice(&json).map_err(|e| CryptoError::Encoding(e.to_string()))
}

/// Seal an optional string. `None` and `""` both become `None`.
pub fn seal_str(value: Option<&str>, cipher: &dyn FieldCipher) -> CryptoResult<Option<Vec<u8>>> {
    match value {
        Some(v) if !v.is_empty() => cipher.encrypt(v.as_bytes()).map(Some),
        _ => Ok(None),
    }
}

/// Open a sealed optional string.
pub fn open_str(sealed: Option<&[u8]>, cipher: &dyn FieldCipher) -> CryptoResult<Option<String>> {
    let Some(sealed) = sealed else {
        return Ok(None);
    };
    let bytes = cipher.decrypt(sealed)?;
    let value = String::from_utf8(bytes).map_err(|e| CryptoError::Encoding(e.to_string()))?;
    Ok(if value.is_empty() { None } else { Some(value) })
}


#[cfg(test)]
mod tests {
    use super::{testing::test_key, *};

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let sealed = encrypt(b"https://collector.example.com", &key).unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"https://collector.example.com");
        assert_eq!(
            decrypt(&sealed, &key).unwrap(),
            b"https://collector.example.com"
        );
    }

    #[test]
    fn test_nonce_differs_between_encryptions() {
        let key = test_key();
        let a = encrypt(b"same", &key).unwrap();
        let b = encrypt(b"same", &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt(b"secret", &test_key()).unwrap();
        let other = EncryptionKey::from_bytes(&[9u8; KEY_LEN]).unwrap();
        assert!(matches!(decrypt(&sealed, &other), Err(CryptoError::Decrypt(_))));
    }

    #[test]
    fn test_corrupt_ciphertext_fails() {
        let key = test_key();
        let mut sealed = encrypt(b"secret", &key).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(decrypt(&sealed, &key).is_err());
        assert!(decrypt(&[1, 2, 3], &key).is_err());
    }

    #[test]
    fn test_key_length_validated() {
        assert!(EncryptionKey::from_bytes(&[0u8; 16]).is_err());
        let encoded = STANDARD.encode([1u8; KEY_LEN]);
        assert!(EncryptionKey::from_base64(&encoded).is_ok());
        assert!(EncryptionKey::from_base64("not base64!").is_err());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let rendered = format!("{:?}", test_key());
        assert_eq!(rendered, "EncryptionKey(<redacted>)");
    }

    #[test]
    fn test_empty_configurations_are_not_encrypted() {
        let cipher = AesGcmCipher::new(test_key());
        assert!(
            seal_configurations(&BTreeMap::new(), &cipher)
                .unwrap()
                .is_none()
        );
        assert!(open_configurations(None, &cipher).unwrap().is_empty());
    }

    #[test]
    fn test_configurations_roundtrip() {
        let cipher = AesGcmCipher::new(test_key());
        let configs = BTreeMap::from([("API_KEY".to_string(), "abc123".to_string())]);
        let sealed = seal_configurations(&configs, &cipher).unwrap().unwrap();
        assert_eq!(
            open_configurations(Some(&sealed), &cipher).unwrap(),
            configs
        );
    }

    #[test]
    fn test_empty_string_sealed_as_none() {
        let cipher = AesGcmCipher::new(test_key());
        assert!(seal_str(Some(""), &cipher).unwrap().is_none());
        assert!(seal_str(None, &cipher).unwrap().is_none());
        let sealed = seal_str(Some("https://b"), &cipher).unwrap();
        assert_eq!(
            open_str(sealed.as_deref(), &cipher).unwrap().as_deref(),
            Some("https://b")
        );
    }
}
