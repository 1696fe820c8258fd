//! Password-based key derivation

use crate::envelope::AesVersion;
use ferrobackup_types::{Error, Result};
use sha1::Sha1;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Default PBKDF2 iteration count
pub const DEFAULT_ITERATIONS: u32 = 10_000;

/// Content key derived with PBKDF2-HMAC-SHA1
///
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey {
    bytes: Vec<u8>,
}

impl ContentKey {
    /// Derive the key for `version` from `password`, salted with the IV
    pub fn derive(password: &str, salt: &[u8], iterations: u32, version: AesVersion) -> Result<Self> {
        if iterations == 0 {
            return Err(Error::config("key derivation needs at least one iteration"));
        }
        let mut bytes = vec![0u8; version.key_len()];
        pbkdf2::pbkdf2_hmac::<Sha1>(password.as_bytes(), salt, iterations, &mut bytes);
        Ok(Self { bytes })
    }

    /// Raw key bytes; never log them
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_length_follows_strength() {
        let salt = [7u8; 16];
        assert_eq!(ContentKey::derive("pw", &salt, 10, AesVersion::Aes128).unwrap().as_bytes().len(), 16);
        assert_eq!(ContentKey::derive("pw", &salt, 10, AesVersion::Aes256).unwrap().as_bytes().len(), 32);
    }

    #[test]
    fn test_rfc6070_vector() {
        // PBKDF2-HMAC-SHA1, "password" / "salt", 2 iterations
        let key = ContentKey::derive("password", b"salt", 2, AesVersion::Aes128).unwrap();
        assert_eq!(
            key.as_bytes(),
            &[0xea, 0x6c, 0x01, 0x4d, 0xc7, 0x2d, 0x6f, 0x8c, 0xcd, 0x1e, 0xd9, 0x2a, 0xce, 0x1d, 0x41, 0xf0]
        );
    }

    #[test]
    fn test_salt_changes_key() {
        let first = ContentKey::derive("pw", &[1; 16], 10, AesVersion::Aes256).unwrap();
        let second = ContentKey::derive("pw", &[2; 16], 10, AesVersion::Aes256).unwrap();
        assert_ne!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = ContentKey::derive("pw", &[1; 16], 1, AesVersion::Aes128).unwrap();
        assert!(format!("{:?}", key).contains("REDACTED"));
        assert!(ContentKey::derive("pw", &[1; 16], 0, AesVersion::Aes128).is_err());
    }
}
