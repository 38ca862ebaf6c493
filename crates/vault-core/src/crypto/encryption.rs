//! AES-256-GCM authenticated encryption
//!
//! Stored format: JSON `{"ciphertext": hex, "iv": hex, "authTag": hex}`
//! - IV: 12 bytes (96 bits) - standard for GCM, fresh per call
//! - Auth tag: 16 bytes (128 bits)
//! - Ciphertext: same length as the plaintext

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::MasterKey;
use crate::error::{Result, VaultError};

/// IV length in bytes
pub const IV_LEN: usize = 12;
/// Authentication tag length in bytes
pub const AUTH_TAG_LEN: usize = 16;

/// Result of one encryption. Meaningless without the key that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncryptedBlob {
    /// Hex-encoded ciphertext
    pub ciphertext: String,
    /// Hex-encoded initialization vector
    pub iv: String,
    /// Hex-encoded GCM authentication tag
    pub auth_tag: String,
}

impl EncryptedBlob {
    /// Serialize for storage in a text column
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored blob. Missing fields are left empty and rejected by `decrypt`.
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s)
            .map_err(|e| VaultError::InvalidFormat(format!("Encrypted blob is not valid JSON: {}", e)))
    }

    /// Decode and length-check all three fields
    fn decode(&self) -> Result<([u8; IV_LEN], [u8; AUTH_TAG_LEN], Vec<u8>)> {
        let ciphertext = decode_field("ciphertext", &self.ciphertext)?;
        let iv_bytes = decode_field("iv", &self.iv)?;
        let tag_bytes = decode_field("authTag", &self.auth_tag)?;

        let iv: [u8; IV_LEN] = iv_bytes.as_slice().try_into().map_err(|_| {
            VaultError::InvalidFormat(format!(
                "Invalid IV length: expected {}, got {}",
                IV_LEN,
                iv_bytes.len()
            ))
        })?;
        let auth_tag: [u8; AUTH_TAG_LEN] = tag_bytes.as_slice().try_into().map_err(|_| {
            VaultError::InvalidFormat(format!(
                "Invalid auth tag length: expected {}, got {}",
                AUTH_TAG_LEN,
                tag_bytes.len()
            ))
        })?;

        Ok((iv, auth_tag, ciphertext))
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    if value.is_empty() {
        return Err(VaultError::InvalidFormat(format!("Missing field: {}", name)));
    }
    hex::decode(value).map_err(|e| VaultError::InvalidFormat(format!("Invalid {} hex: {}", name, e)))
}

/// Encrypt a non-empty string using AES-256-GCM with a random IV
pub fn encrypt(plaintext: &str, key: &MasterKey) -> Result<EncryptedBlob> {
    if plaintext.is_empty() {
        return Err(VaultError::EmptyInput);
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::KeyMaterial(e.to_string()))?;

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    // aes-gcm appends the auth tag to the ciphertext
    let ciphertext_with_tag = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| VaultError::InvalidFormat("Plaintext too large for AES-GCM".to_string()))?;

    let tag_start = ciphertext_with_tag.len() - AUTH_TAG_LEN;

    Ok(EncryptedBlob {
        ciphertext: hex::encode(&ciphertext_with_tag[..tag_start]),
        iv: hex::encode(iv),
        auth_tag: hex::encode(&ciphertext_with_tag[tag_start..]),
    })
}

/// Decrypt and authenticate a blob. No plaintext is returned unless the tag verifies.
pub fn decrypt(blob: &EncryptedBlob, key: &MasterKey) -> Result<String> {
    let (iv, auth_tag, mut ciphertext) = blob.decode()?;

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::KeyMaterial(e.to_string()))?;

    ciphertext.extend_from_slice(&auth_tag);

    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
            .map_err(|_| VaultError::AuthenticationFailed)?,
    );

    String::from_utf8(plaintext.to_vec())
        .map_err(|_| VaultError::InvalidFormat("Decrypted data is not UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> MasterKey {
        MasterKey::generate().unwrap()
    }

    fn flip_first_byte(hex_field: &str) -> String {
        let mut bytes = hex::decode(hex_field).unwrap();
        bytes[0] ^= 0xFF;
        hex::encode(bytes)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let long = "a".repeat(4096);
        for plaintext in ["x", "Hello, World!", "ünïcødé 🔐", long.as_str()] {
            let blob = encrypt(plaintext, &key).unwrap();
            assert_eq!(decrypt(&blob, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_empty_plaintext_rejected() {
        let key = test_key();
        assert!(matches!(encrypt("", &key), Err(VaultError::EmptyInput)));
    }

    #[test]
    fn test_blob_field_lengths() {
        let key = test_key();
        let blob = encrypt("abc", &key).unwrap();
        assert_eq!(blob.iv.len(), IV_LEN * 2);
        assert_eq!(blob.auth_tag.len(), AUTH_TAG_LEN * 2);
        assert_eq!(blob.ciphertext.len(), 6);
    }

    #[test]
    fn test_json_uses_auth_tag_name() {
        let key = test_key();
        let json = encrypt("abc", &key).unwrap().to_json().unwrap();
        assert!(json.contains("\"authTag\""));
        assert!(json.contains("\"iv\""));
        assert!(json.contains("\"ciphertext\""));
        let parsed = EncryptedBlob::from_json(&json).unwrap();
        assert_eq!(decrypt(&parsed, &key).unwrap(), "abc");
    }

    #[test]
    fn test_different_ivs_produce_different_ciphertext() {
        let key = test_key();
        let blob1 = encrypt("same plaintext", &key).unwrap();
        let blob2 = encrypt("same plaintext", &key).unwrap();

        assert_ne!(blob1.iv, blob2.iv);
        assert_ne!(blob1.ciphertext, blob2.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let blob = encrypt("secret data", &test_key()).unwrap();
        assert!(matches!(
            decrypt(&blob, &test_key()),
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails_authentication() {
        let key = test_key();
        let mut blob = encrypt("secret data", &key).unwrap();
        blob.ciphertext = flip_first_byte(&blob.ciphertext);

        assert!(matches!(
            decrypt(&blob, &key),
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_tampered_auth_tag_fails_authentication() {
        let key = test_key();
        let mut blob = encrypt("secret data", &key).unwrap();
        blob.auth_tag = flip_first_byte(&blob.auth_tag);

        assert!(matches!(
            decrypt(&blob, &key),
            Err(VaultError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_missing_fields_are_invalid_format() {
        let key = test_key();
        let blob = encrypt("secret data", &key).unwrap();

        for field in ["ciphertext", "iv", "authTag"] {
            let mut value: serde_json::Value = serde_json::from_str(&blob.to_json().unwrap()).unwrap();
            value.as_object_mut().unwrap().remove(field);
            let partial = EncryptedBlob::from_json(&value.to_string()).unwrap();
            assert!(
                matches!(decrypt(&partial, &key), Err(VaultError::InvalidFormat(_))),
                "missing {} should be InvalidFormat",
                field
            );
        }
    }

    #[test]
    fn test_malformed_fields_are_invalid_format() {
        let key = test_key();
        let good = encrypt("secret data", &key).unwrap();

        let mut bad_hex = good.clone();
        bad_hex.iv = "not_hex".to_string();
        assert!(matches!(decrypt(&bad_hex, &key), Err(VaultError::InvalidFormat(_))));

        let mut short_iv = good.clone();
        short_iv.iv = "00ff".to_string();
        assert!(matches!(decrypt(&short_iv, &key), Err(VaultError::InvalidFormat(_))));

        let mut short_tag = good;
        short_tag.auth_tag = "00ff".to_string();
        assert!(matches!(decrypt(&short_tag, &key), Err(VaultError::InvalidFormat(_))));

        assert!(matches!(
            EncryptedBlob::from_json("not json"),
            Err(VaultError::InvalidFormat(_))
        ));
    }
}
