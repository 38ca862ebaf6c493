//! Opaque random secrets (webhook secrets and similar)

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

/// Default byte length for generated secrets
pub const DEFAULT_SECRET_BYTES: usize = 32;

/// Draw `byte_len` bytes from the OS CSPRNG and encode them URL-safe without padding.
pub fn generate_secure_key(byte_len: usize) -> Result<String> {
    if byte_len == 0 {
        return Err(VaultError::EmptyInput);
    }

    let mut bytes = Zeroizing::new(vec![0u8; byte_len]);
    OsRng
        .try_fill_bytes(bytes.as_mut_slice())
        .map_err(|e| VaultError::KeyMaterial(format!("OS random source failed: {}", e)))?;

    Ok(URL_SAFE_NO_PAD.encode(bytes.as_slice()))
}
