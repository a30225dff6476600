//! Stream key encryption for the legacy RTMPS path
//!
//! AES-256-GCM with a 16-byte IV, serialized as
//! `iv(32 hex):tag(32 hex):ciphertext(hex)`. Reads accept both ciphertext
//! and legacy plaintext values; writes always produce ciphertext.

use aes_gcm::{
    aead::{
        generic_array::{typenum::U16, GenericArray},
        rand_core::RngCore,
        Aead, KeyInit, OsRng,
    },
    aes::Aes256,
    AesGcm,
};

use crate::{Error, Result};

/// AES-256-GCM with the 16-byte IV the stored format mandates
type StreamKeyAead = AesGcm<Aes256, U16>;

/// IV size in bytes (32 hex chars on the wire)
const IV_SIZE: usize = 16;

/// GCM authentication tag size in bytes (32 hex chars on the wire)
const TAG_SIZE: usize = 16;

/// Stream key cipher
///
/// The key is loaded from configuration as a 64-char hex string.
#[derive(Clone)]
pub struct StreamKeyCipher {
    cipher: StreamKeyAead,
}

impl std::fmt::Debug for StreamKeyCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamKeyCipher")
            .field("cipher", &"[REDACTED]")
            .finish()
    }
}

impl StreamKeyCipher {
    /// Create a cipher from a 32-byte key
    pub fn new(key_bytes: &[u8]) -> Result<Self> {
        if key_bytes.len() != 32 {
            return Err(Error::Internal(format!(
                "Stream key encryption key must be exactly 32 bytes, got {}",
                key_bytes.len()
            )));
        }
        let cipher = StreamKeyAead::new(GenericArray::from_slice(key_bytes));
        Ok(Self { cipher })
    }

    /// Create from a 64-character hex key string
    pub fn from_hex_key(hex_key: &str) -> Result<Self> {
        let key_bytes =
            hex::decode(hex_key).map_err(|e| Error::Internal(format!("Invalid hex key: {e}")))?;
        Self::new(&key_bytes)
    }

    /// Encrypt a stream key, producing the `iv:tag:data` hex triple
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        // AEAD output is ciphertext with the tag appended
        let mut combined = self
            .cipher
            .encrypt(GenericArray::from_slice(&iv), plaintext.as_bytes())
            .map_err(|e| Error::Internal(format!("Stream key encryption failed: {e}")))?;
        let tag = combined.split_off(combined.len() - TAG_SIZE);

        Ok(format!(
            "{}:{}:{}",
            hex::encode(iv),
            hex::encode(tag),
            hex::encode(combined)
        ))
    }

    /// Decrypt a stored value.
    ///
    /// Values that do not match the ciphertext shape are legacy plaintext
    /// keys and are returned unchanged.
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        if !Self::is_ciphertext(stored) {
            return Ok(stored.to_string());
        }

        let mut segments = stored.split(':');
        let (Some(iv_hex), Some(tag_hex), Some(data_hex)) =
            (segments.next(), segments.next(), segments.next())
        else {
            return Err(Error::Internal("Malformed stream key ciphertext".to_string()));
        };

        let iv = hex::decode(iv_hex)
            .map_err(|e| Error::Internal(format!("Invalid stream key IV: {e}")))?;
        let tag = hex::decode(tag_hex)
            .map_err(|e| Error::Internal(format!("Invalid stream key tag: {e}")))?;
        let mut data = hex::decode(data_hex)
            .map_err(|e| Error::Internal(format!("Invalid stream key data: {e}")))?;
        data.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(GenericArray::from_slice(&iv), data.as_ref())
            .map_err(|_| {
                Error::Internal(
                    "Stream key decryption failed (wrong key or corrupted data)".to_string(),
                )
            })?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::Internal("Decrypted stream key is not valid UTF-8".to_string()))
    }

    /// Check whether a stored value has the canonical `iv:tag:data` shape
    #[must_use]
    pub fn is_ciphertext(value: &str) -> bool {
        let segments: Vec<&str> = value.split(':').collect();
        if segments.len() != 3 {
            return false;
        }
        let [iv, tag, data] = [segments[0], segments[1], segments[2]];

        iv.len() == IV_SIZE * 2
            && tag.len() == TAG_SIZE * 2
            && !data.is_empty()
            && data.len() % 2 == 0
            && [iv, tag, data]
                .iter()
                .all(|s| s.chars().all(|c| c.is_ascii_hexdigit()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> Vec<u8> {
        (0u8..32).collect()
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let cipher = StreamKeyCipher::new(&test_key()).unwrap();
        let plaintext = "sk_us-east-1_abcDEF123456";

        let encrypted = cipher.encrypt(plaintext).unwrap();
        assert!(StreamKeyCipher::is_ciphertext(&encrypted));
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn test_ciphertext_shape() {
        let cipher = StreamKeyCipher::new(&test_key()).unwrap();
        let encrypted = cipher.encrypt("secret").unwrap();

        let segments: Vec<&str> = encrypted.split(':').collect();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].len(), 32);
        assert_eq!(segments[1].len(), 32);
    }

    #[test]
    fn test_decrypt_plaintext_passthrough() {
        let cipher = StreamKeyCipher::new(&test_key()).unwrap();
        assert_eq!(
            cipher.decrypt("sk_legacy_plaintext_key").unwrap(),
            "sk_legacy_plaintext_key"
        );
    }

    #[test]
    fn test_is_ciphertext_no_false_positives() {
        assert!(!StreamKeyCipher::is_ciphertext(""));
        assert!(!StreamKeyCipher::is_ciphertext("hello"));
        assert!(!StreamKeyCipher::is_ciphertext("sk_live_abc123"));
        assert!(!StreamKeyCipher::is_ciphertext("aa:bb:cc"));
        // Wrong IV length
        assert!(!StreamKeyCipher::is_ciphertext(&format!(
            "{}:{}:{}",
            "ab".repeat(8),
            "cd".repeat(16),
            "ef"
        )));
        // Non-hex data segment
        assert!(!StreamKeyCipher::is_ciphertext(&format!(
            "{}:{}:zz",
            "ab".repeat(16),
            "cd".repeat(16)
        )));
        // Four segments
        assert!(!StreamKeyCipher::is_ciphertext(&format!(
            "{}:{}:ab:cd",
            "ab".repeat(16),
            "cd".repeat(16)
        )));
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = StreamKeyCipher::new(&test_key()).unwrap();
        let encrypted = cipher.encrypt("secret").unwrap();

        let other = StreamKeyCipher::new(&[0xffu8; 32]).unwrap();
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_each_encryption_produces_different_ciphertext() {
        let cipher = StreamKeyCipher::new(&test_key()).unwrap();
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a).unwrap(), "same");
        assert_eq!(cipher.decrypt(&b).unwrap(), "same");
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(StreamKeyCipher::new(&[0u8; 16]).is_err());
        assert!(StreamKeyCipher::from_hex_key("abcd").is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = StreamKeyCipher::new(&test_key()).unwrap();
        let encrypted = cipher.encrypt("secret").unwrap();
        let mut tampered: Vec<String> = encrypted.split(':').map(String::from).collect();
        let flipped = if tampered[2].starts_with('0') { "1" } else { "0" };
        tampered[2].replace_range(0..1, flipped);
        assert!(cipher.decrypt(&tampered.join(":")).is_err());
    }
}
