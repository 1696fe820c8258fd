//! Envelope prefixed to every encrypted payload
//!
//! Layout: one strength selector byte followed by the 16-byte IV. The IV
//! doubles as the PBKDF2 salt for the payload's key.

use ferrobackup_types::{Error, Result};
use rand::RngCore;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};

/// AES block and IV size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Serialized envelope size in bytes
pub const ENVELOPE_LEN: usize = 1 + BLOCK_SIZE;

/// Cipher strength
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AesVersion {
    /// AES-128, selector byte `1`
    Aes128,
    /// AES-256, selector byte `2`
    #[default]
    Aes256,
}

impl AesVersion {
    /// Derived key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes256 => 32,
        }
    }

    /// Selector byte written to the envelope
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Aes128 => 1,
            Self::Aes256 => 2,
        }
    }

    /// Parse a selector byte
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(Self::Aes128),
            2 => Ok(Self::Aes256),
            other => Err(Error::crypto(format!("unknown cipher strength selector {}", other))),
        }
    }
}

impl fmt::Display for AesVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aes128 => write!(f, "AES-128"),
            Self::Aes256 => write!(f, "AES-256"),
        }
    }
}

/// Strength selector and IV of one encrypted payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    /// Cipher strength
    pub version: AesVersion,
    /// Initialization vector, also the key derivation salt
    pub iv: [u8; BLOCK_SIZE],
}

impl Envelope {
    /// Envelope with a fresh random IV
    pub fn generate(version: AesVersion) -> Self {
        let mut iv = [0u8; BLOCK_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);
        Self { version, iv }
    }

    /// Serialized form
    pub fn to_bytes(&self) -> [u8; ENVELOPE_LEN] {
        let mut bytes = [0u8; ENVELOPE_LEN];
        bytes[0] = self.version.to_byte();
        bytes[1..].copy_from_slice(&self.iv);
        bytes
    }

    /// Parse the envelope at the start of `bytes`
    ///
    /// Returns the envelope and the remaining payload.
    pub fn split(bytes: &[u8]) -> Result<(Self, &[u8])> {
        if bytes.len() < ENVELOPE_LEN {
            return Err(Error::crypto("payload shorter than its envelope"));
        }
        let version = AesVersion::from_byte(bytes[0])?;
        let mut iv = [0u8; BLOCK_SIZE];
        iv.copy_from_slice(&bytes[1..ENVELOPE_LEN]);
        Ok((Self { version, iv }, &bytes[ENVELOPE_LEN..]))
    }

    /// Read the envelope from the start of a stream
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut bytes = [0u8; ENVELOPE_LEN];
        reader.read_exact(&mut bytes).await.map_err(|error| {
            if error.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::crypto("stream ended inside the envelope")
            } else {
                Error::from(error)
            }
        })?;
        Self::split(&bytes).map(|(envelope, _)| envelope)
    }
}
