//! Application server (VAPID) key handling.

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};

use crate::error::{Error, Result};

/// Length of an uncompressed SEC1 P-256 public key.
pub const P256_UNCOMPRESSED_LEN: usize = 65;

/// Decoded application server key, ready for the platform subscribe call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationServerKey(Vec<u8>);

impl ApplicationServerKey {
    /// Decode a URL-safe base64 public key; padding is optional and
    /// surrounding whitespace is ignored.
    pub fn from_base64url(encoded: &str) -> Result<Self> {
        let trimmed = encoded.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidServerKey("key is empty".to_string()));
        }
        let bytes = if trimmed.ends_with('=') {
            URL_SAFE.decode(trimmed)
        } else {
            URL_SAFE_NO_PAD.decode(trimmed)
        }
        .map_err(|e| Error::InvalidServerKey(e.to_string()))?;

        if bytes.len() != P256_UNCOMPRESSED_LEN {
            return Err(Error::InvalidServerKey(format!(
                "expected {P256_UNCOMPRESSED_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[0] != 0x04 {
            return Err(Error::InvalidServerKey(
                "key is not an uncompressed P-256 point".to_string(),
            ));
        }
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Canonical unpadded URL-safe encoding.
    #[must_use]
    pub fn to_base64url(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }
}

#[cfg(test)]
pub(crate) fn test_key() -> String {
    let mut bytes = vec![0x04_u8];
    bytes.extend((1..=64).map(|b: u8| b.wrapping_mul(7)));
    URL_SAFE_NO_PAD.encode(bytes)
}
