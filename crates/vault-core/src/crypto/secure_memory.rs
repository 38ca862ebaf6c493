//! Secure memory handling with automatic zeroization

use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Result, VaultError};

/// Length of the master key in bytes (AES-256)
pub const MASTER_KEY_LEN: usize = 32;

/// Master encryption key - automatically zeroed when dropped
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; MASTER_KEY_LEN],
}

impl MasterKey {
    /// Create a new master key from raw bytes
    pub fn new(key: [u8; MASTER_KEY_LEN]) -> Self {
        Self { key }
    }

    /// Generate a fresh key from the operating system CSPRNG
    pub fn generate() -> Result<Self> {
        let mut key = [0u8; MASTER_KEY_LEN];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|e| VaultError::KeyMaterial(format!("OS random source failed: {}", e)))?;
        let master = Self { key };
        key.zeroize();
        Ok(master)
    }

    /// Get the key bytes (use carefully - avoid copying)
    pub fn as_bytes(&self) -> &[u8; MASTER_KEY_LEN] {
        &self.key
    }

    /// Create from a slice (must be exactly 32 bytes)
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() != MASTER_KEY_LEN {
            return None;
        }
        let mut key = [0u8; MASTER_KEY_LEN];
        key.copy_from_slice(slice);
        Some(Self { key })
    }

    /// Hex encoding used by the key file
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.key))
    }

    /// Parse the key file encoding. Surrounding whitespace is ignored.
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            hex::decode(encoded.trim())
                .map_err(|e| VaultError::KeyMaterial(format!("Key file is not valid hex: {}", e)))?,
        );
        Self::from_slice(&bytes).ok_or_else(|| {
            VaultError::KeyMaterial(format!(
                "Key file holds {} bytes, expected {}",
                bytes.len(),
                MASTER_KEY_LEN
            ))
        })
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Decrypted secret value - automatically zeroed when dropped
#[derive(Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct SecretString {
    value: String,
}

impl SecretString {
    /// Create a new secret string
    pub fn new(value: String) -> Self {
        Self { value }
    }

    /// Get the secret value (use carefully)
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Consume and return the inner value
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.value)
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretString")
            .field("value", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_key_from_slice() {
        let bytes = [42u8; 32];
        let key = MasterKey::from_slice(&bytes).unwrap();
        assert_eq!(key.as_bytes(), &bytes);
    }

    #[test]
    fn test_master_key_from_invalid_slice() {
        let bytes = [42u8; 16];
        assert!(MasterKey::from_slice(&bytes).is_none());
    }

    #[test]
    fn test_generated_keys_differ() {
        let a = MasterKey::generate().unwrap();
        let b = MasterKey::generate().unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_hex_roundtrip_tolerates_newline() {
        let key = MasterKey::generate().unwrap();
        let encoded = format!("{}\n", key.to_hex().as_str());
        let parsed = MasterKey::from_hex(&encoded).unwrap();
        assert_eq!(parsed.as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_from_hex_rejects_bad_material() {
        assert!(matches!(
            MasterKey::from_hex("zz"),
            Err(VaultError::KeyMaterial(_))
        ));
        assert!(matches!(
            MasterKey::from_hex("abcd"),
            Err(VaultError::KeyMaterial(_))
        ));
    }

    #[test]
    fn test_debug_redacted() {
        let key = MasterKey::new([7u8; 32]);
        let debug = format!("{:?}", key);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains('7'));

        let secret = SecretString::new("my-secret".to_string());
        assert_eq!(secret.expose(), "my-secret");
        assert!(!format!("{:?}", secret).contains("my-secret"));
    }
}
