//! AES-CBC block transforms with PKCS#7 padding

use crate::envelope::{AesVersion, BLOCK_SIZE};
use crate::key::ContentKey;
use aes::{Aes128, Aes256};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ferrobackup_types::{Error, Result};

fn invalid_key(_: impl std::fmt::Debug) -> Error {
    Error::crypto("key or IV has the wrong length")
}

fn invalid_padding(_: impl std::fmt::Debug) -> Error {
    Error::crypto("invalid padding, wrong password or corrupted data")
}

/// CBC encryptor for either strength
pub enum Encryptor {
    /// AES-128-CBC
    Aes128(cbc::Encryptor<Aes128>),
    /// AES-256-CBC
    Aes256(cbc::Encryptor<Aes256>),
}

impl Encryptor {
    /// Create an encryptor for `key` and `iv`
    pub fn new(version: AesVersion, key: &ContentKey, iv: &[u8]) -> Result<Self> {
        Ok(match version {
            AesVersion::Aes128 => Self::Aes128(
                cbc::Encryptor::new_from_slices(key.as_bytes(), iv).map_err(invalid_key)?,
            ),
            AesVersion::Aes256 => Self::Aes256(
                cbc::Encryptor::new_from_slices(key.as_bytes(), iv).map_err(invalid_key)?,
            ),
        })
    }

    /// Encrypt whole blocks in place; a trailing partial block is left as is
    pub fn encrypt_blocks(&mut self, data: &mut [u8]) {
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(block);
            match self {
                Self::Aes128(cipher) => cipher.encrypt_block_mut(block),
                Self::Aes256(cipher) => cipher.encrypt_block_mut(block),
            }
        }
    }

    /// Pad and encrypt the final bytes of a message
    pub fn finish(self, tail: &[u8]) -> Vec<u8> {
        match self {
            Self::Aes128(cipher) => cipher.encrypt_padded_vec_mut::<Pkcs7>(tail),
            Self::Aes256(cipher) => cipher.encrypt_padded_vec_mut::<Pkcs7>(tail),
        }
    }
}

/// CBC decryptor for either strength
pub enum Decryptor {
    /// AES-128-CBC
    Aes128(cbc::Decryptor<Aes128>),
    /// AES-256-CBC
    Aes256(cbc::Decryptor<Aes256>),
}

impl Decryptor {
    /// Create a decryptor for `key` and `iv`
    pub fn new(version: AesVersion, key: &ContentKey, iv: &[u8]) -> Result<Self> {
        Ok(match version {
            AesVersion::Aes128 => Self::Aes128(
                cbc::Decryptor::new_from_slices(key.as_bytes(), iv).map_err(invalid_key)?,
            ),
            AesVersion::Aes256 => Self::Aes256(
                cbc::Decryptor::new_from_slices(key.as_bytes(), iv).map_err(invalid_key)?,
            ),
        })
    }

    /// Decrypt whole blocks in place
    pub fn decrypt_blocks(&mut self, data: &mut [u8]) {
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(block);
            match self {
                Self::Aes128(cipher) => cipher.decrypt_block_mut(block),
                Self::Aes256(cipher) => cipher.decrypt_block_mut(block),
            }
        }
    }

    /// Decrypt the final blocks of a message and strip their padding
    pub fn finish(self, tail: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Aes128(cipher) => cipher.decrypt_padded_vec_mut::<Pkcs7>(tail),
            Self::Aes256(cipher) => cipher.decrypt_padded_vec_mut::<Pkcs7>(tail),
        }
        .map_err(invalid_padding)
    }
}

/// Ciphertext length of `plaintext_len` bytes, envelope excluded
pub fn ciphertext_len(plaintext_len: u64) -> u64 {
    (plaintext_len / BLOCK_SIZE as u64 + 1) * BLOCK_SIZE as u64
}

/// Encrypt a whole buffer
pub fn encrypt_buffer(version: AesVersion, key: &ContentKey, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    Ok(Encryptor::new(version, key, iv)?.finish(plaintext))
}

/// Decrypt a whole buffer and strip its padding
pub fn decrypt_buffer(version: AesVersion, key: &ContentKey, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(Error::crypto("ciphertext is not a whole number of blocks"));
    }
    Decryptor::new(version, key, iv)?.finish(ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrobackup_types::ErrorKind;
    use rstest::rstest;

    fn key(version: AesVersion) -> ContentKey {
        ContentKey::derive("secret", &[3; 16], 1, version).unwrap()
    }

    #[rstest]
    #[case(0, 16)]
    #[case(2, 16)]
    #[case(15, 16)]
    #[case(16, 32)]
    #[case(33, 48)]
    fn test_padded_lengths(#[case] len: usize, #[case] padded: usize) {
        let version = AesVersion::Aes128;
        let ciphertext = encrypt_buffer(version, &key(version), &[0; 16], &vec![0xAB; len]).unwrap();
        assert_eq!(ciphertext.len(), padded);
        assert_eq!(ciphertext_len(len as u64), padded as u64);
    }

    #[rstest]
    #[case([vec![0; 15], vec![0]].concat())]
    #[case([vec![0; 15], vec![17]].concat())]
    #[case([vec![0; 13], vec![2, 3, 3]].concat())]
    fn test_invalid_padding(#[case] mut block: Vec<u8>) {
        let version = AesVersion::Aes256;
        let iv = [5u8; 16];
        // Encrypt without padding so the decrypted tail is malformed.
        Encryptor::new(version, &key(version), &iv)
            .unwrap()
            .encrypt_blocks(&mut block);
        let error = decrypt_buffer(version, &key(version), &iv, &block).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Crypto);
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![1; 15])]
    fn test_partial_ciphertext(#[case] data: Vec<u8>) {
        let version = AesVersion::Aes128;
        assert!(decrypt_buffer(version, &key(version), &[0; 16], &data).is_err());
    }

    #[test]
    fn test_nist_aes128_cbc_first_block() {
        // NIST SP 800-38A F.2.1
        let key_bytes = [
            0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f, 0x3c,
        ];
        let iv: Vec<u8> = (0u8..16).collect();
        let mut block = [
            0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93, 0x17, 0x2a,
        ];
        let mut encryptor = Encryptor::Aes128(cbc::Encryptor::new_from_slices(&key_bytes, &iv).unwrap());
        encryptor.encrypt_blocks(&mut block);
        assert_eq!(
            block,
            [0x76, 0x49, 0xab, 0xac, 0x81, 0x19, 0xb2, 0x46, 0xce, 0xe9, 0x8e, 0x9b, 0x12, 0xe9, 0x19, 0x7d]
        );
    }

    #[rstest]
    #[case(AesVersion::Aes128)]
    #[case(AesVersion::Aes256)]
    fn test_buffer_roundtrip(#[case] version: AesVersion) {
        let key = ContentKey::derive("secret", &[3; 16], 1, version).unwrap();
        let iv = [9u8; 16];
        let ciphertext = encrypt_buffer(version, &key, &iv, b"hello world").unwrap();
        assert_eq!(ciphertext.len(), 16);
        assert_eq!(decrypt_buffer(version, &key, &iv, &ciphertext).unwrap(), b"hello world");

        let wrong = ContentKey::derive("other", &[3; 16], 1, version).unwrap();
        let decrypted = decrypt_buffer(version, &wrong, &iv, &ciphertext);
        assert!(decrypted.map_or(true, |plain| plain != b"hello world"));
    }
}
