//! Core data types used across FerroBackup

use std::collections::HashMap;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;

/// Length reported by files whose size cannot be known without reading them
pub const UNKNOWN_LENGTH: i64 = -1;

/// Hash algorithms understood by the equality evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HashAlgorithm {
    /// MD5 (128 bit)
    Md5,
    /// SHA-1 (160 bit)
    Sha1,
    /// SHA-256
    Sha256,
    /// SHA-512
    Sha512,
}

impl HashAlgorithm {
    /// Every supported algorithm, in evaluation order
    pub const ALL: [Self; 4] = [Self::Md5, Self::Sha1, Self::Sha256, Self::Sha512];

    /// Well-known name of the algorithm
    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }

    /// The equality method that requests this algorithm
    pub fn method(self) -> EqualityMethods {
        match self {
            Self::Md5 => EqualityMethods::CONTENT_MD5,
            Self::Sha1 => EqualityMethods::CONTENT_SHA1,
            Self::Sha256 => EqualityMethods::CONTENT_SHA256,
            Self::Sha512 => EqualityMethods::CONTENT_SHA512,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bit-set of strategies used to decide whether two files are the same
///
/// As a comparison result the set holds the methods that detected a
/// difference; an empty set means the files are equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EqualityMethods(u32);

impl EqualityMethods {
    /// No method
    pub const NONE: Self = Self(0);
    /// Compare lengths
    pub const LENGTH: Self = Self(0x1);
    /// Source strictly newer than target
    pub const LAST_WRITE_TIME: Self = Self(0x2);
    /// Byte-for-byte comparison
    pub const CONTENT: Self = Self(0x4);
    /// MD5 digest
    pub const CONTENT_MD5: Self = Self(0x8);
    /// SHA-1 digest
    pub const CONTENT_SHA1: Self = Self(0x10);
    /// SHA-256 digest
    pub const CONTENT_SHA256: Self = Self(0x20);
    /// SHA-512 digest
    pub const CONTENT_SHA512: Self = Self(0x40);
    /// Default method set
    pub const DEFAULT: Self = Self(Self::LENGTH.0 | Self::LAST_WRITE_TIME.0);

    const NAMES: [(Self, &'static str); 7] = [
        (Self::LENGTH, "Length"),
        (Self::LAST_WRITE_TIME, "LastWriteTime"),
        (Self::CONTENT, "Content"),
        (Self::CONTENT_MD5, "ContentMd5"),
        (Self::CONTENT_SHA1, "ContentSha1"),
        (Self::CONTENT_SHA256, "ContentSha256"),
        (Self::CONTENT_SHA512, "ContentSha512"),
    ];

    /// Raw bits
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits, dropping unknown ones
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & 0x7f)
    }

    /// True when no method is set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when any bit of `other` is set
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Hash algorithms requested by this set
    pub fn hash_algorithms(self) -> Vec<HashAlgorithm> {
        HashAlgorithm::ALL
            .into_iter()
            .filter(|algorithm| self.contains(algorithm.method()))
            .collect()
    }
}

impl BitOr for EqualityMethods {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EqualityMethods {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EqualityMethods {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for EqualityMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

impl fmt::Debug for EqualityMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EqualityMethods({})", self)
    }
}

impl FromStr for EqualityMethods {
    type Err = String;

    /// Parses `Length|LastWriteTime`, `length, content`, `Default` or `None`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut methods = Self::NONE;
        for part in s.split(['|', ',']).map(str::trim).filter(|p| !p.is_empty()) {
            if part.eq_ignore_ascii_case("none") {
                continue;
            }
            if part.eq_ignore_ascii_case("default") {
                methods |= Self::DEFAULT;
                continue;
            }
            let flag = Self::NAMES
                .iter()
                .find(|(_, name)| name.eq_ignore_ascii_case(part))
                .map(|(flag, _)| *flag)
                .ok_or_else(|| format!("Unknown equality method '{}'", part))?;
            methods |= flag;
        }
        Ok(methods)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for EqualityMethods {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for EqualityMethods {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Instructions for building one storage backend
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProviderConfiguration {
    /// Registry name of the backend
    pub provider_name: String,
    /// Root path inside the backend
    pub path: String,
    /// Backend-specific options
    pub options: HashMap<String, String>,
}

impl ProviderConfiguration {
    /// Create a configuration without options
    pub fn new(provider_name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            path: path.into(),
            options: HashMap::new(),
        }
    }

    /// Add one backend option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Parse `provider://path`; a bare path selects `default_provider`
    pub fn parse(endpoint: &str, default_provider: &str) -> Self {
        match endpoint.split_once("://") {
            Some((provider, path)) if !provider.is_empty() => Self::new(provider, path),
            _ => Self::new(default_provider, endpoint),
        }
    }
}
