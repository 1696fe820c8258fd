//! Entry name encryption
//!
//! An encrypted name is the base64 form of `envelope || ciphertext` with `/`
//! replaced by `-` so it stays a single path segment.

use crate::cipher::{decrypt_buffer, encrypt_buffer};
use crate::envelope::{AesVersion, Envelope};
use crate::key::ContentKey;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ferrobackup_types::{Error, Result};
use tracing::trace;

/// Encrypt the UTF-8 bytes of `name` with a fresh IV
pub fn encrypt_name(name: &str, version: AesVersion, password: &str, iterations: u32) -> Result<String> {
    let envelope = Envelope::generate(version);
    let key = ContentKey::derive(password, &envelope.iv, iterations, version)?;
    let ciphertext = encrypt_buffer(version, &key, &envelope.iv, name.as_bytes())?;

    let mut payload = envelope.to_bytes().to_vec();
    payload.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(payload).replace('/', "-"))
}

/// Decrypt an encrypted name
pub fn try_decrypt_name(name: &str, password: &str, iterations: u32) -> Result<String> {
    let payload = STANDARD
        .decode(name.replace('-', "/"))
        .map_err(|error| Error::crypto(format!("name is not base64: {}", error)))?;
    let (envelope, ciphertext) = Envelope::split(&payload)?;
    let key = ContentKey::derive(password, &envelope.iv, iterations, envelope.version)?;
    let plaintext = decrypt_buffer(envelope.version, &key, &envelope.iv, ciphertext)?;
    String::from_utf8(plaintext).map_err(|_| Error::crypto("decrypted name is not UTF-8"))
}

/// Decrypt an encrypted name, returning `name` unchanged when it is not one
pub fn decrypt_name(name: &str, password: &str, iterations: u32) -> String {
    match try_decrypt_name(name, password, iterations) {
        Ok(plain) => plain,
        Err(error) => {
            trace!("Keeping undecryptable name '{}': {}", name, error);
            name.to_string()
        }
    }
}
