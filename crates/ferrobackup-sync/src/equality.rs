//! File equality evaluation
//!
//! Checks run in a fixed order and stop at the first one that finds a
//! difference: length, last write time, then either a byte-for-byte content
//! comparison or one or more digests.

use digest::Digest;
use ferrobackup_types::{
    CancellationToken, ContentStream, EqualityMethods, Error, FileEntry, HashAlgorithm, Result,
    UNKNOWN_LENGTH,
};
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Read size used when comparing or hashing content
pub const CHUNK_SIZE: usize = 81920;

/// Decides whether a source file and a target file are the same
#[derive(Debug, Clone, Copy)]
pub struct EqualityEvaluator {
    methods: EqualityMethods,
}

impl EqualityEvaluator {
    /// Create an evaluator for a method set
    pub fn new(methods: EqualityMethods) -> Self {
        Self { methods }
    }

    /// Configured method set
    pub fn methods(&self) -> EqualityMethods {
        self.methods
    }

    /// Compare two files
    ///
    /// Returns the methods that detected a difference; an empty set means
    /// the files are equal.
    pub async fn compare(
        &self,
        source: &dyn FileEntry,
        target: &dyn FileEntry,
        ct: &CancellationToken,
    ) -> Result<EqualityMethods> {
        if self.methods.contains(EqualityMethods::LENGTH) {
            let (source_length, target_length) = (source.length(), target.length());
            if source_length != UNKNOWN_LENGTH
                && target_length != UNKNOWN_LENGTH
                && source_length != target_length
            {
                return Ok(EqualityMethods::LENGTH);
            }
        }

        if self.methods.contains(EqualityMethods::LAST_WRITE_TIME)
            && source.modified_utc() > target.modified_utc()
        {
            return Ok(EqualityMethods::LAST_WRITE_TIME);
        }

        if self.methods.contains(EqualityMethods::CONTENT) {
            return if content_equal(source, target, ct).await? {
                Ok(EqualityMethods::NONE)
            } else {
                Ok(EqualityMethods::CONTENT)
            };
        }

        let algorithms = self.methods.hash_algorithms();
        if algorithms.is_empty() {
            return Ok(EqualityMethods::NONE);
        }

        let (source_digests, target_digests) = tokio::try_join!(
            digests(source, &algorithms, ct),
            digests(target, &algorithms, ct)
        )?;

        let mut different = EqualityMethods::NONE;
        for ((algorithm, left), right) in algorithms.iter().zip(&source_digests).zip(&target_digests) {
            if left != right {
                debug!("{} digest differs for {}", algorithm, source.name());
                different |= algorithm.method();
            }
        }
        Ok(different)
    }
}

async fn content_equal(
    source: &dyn FileEntry,
    target: &dyn FileEntry,
    ct: &CancellationToken,
) -> Result<bool> {
    let (mut source_stream, mut target_stream) =
        tokio::try_join!(source.open_read(ct), target.open_read(ct))?;

    let mut source_buffer = vec![0u8; CHUNK_SIZE];
    let mut target_buffer = vec![0u8; CHUNK_SIZE];
    loop {
        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let (source_read, target_read) = tokio::try_join!(
            read_chunk(&mut source_stream, &mut source_buffer),
            read_chunk(&mut target_stream, &mut target_buffer)
        )?;

        if source_read != target_read
            || source_buffer[..source_read] != target_buffer[..target_read]
        {
            return Ok(false);
        }
        if source_read == 0 {
            return Ok(true);
        }
    }
}

/// Fill `buffer` unless the stream ends first; returns the bytes read
pub async fn read_chunk(stream: &mut ContentStream, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = stream.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

/// Streaming digest state for one algorithm
enum Hasher {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Self::Md5(md5::Md5::new()),
            HashAlgorithm::Sha1 => Self::Sha1(sha1::Sha1::new()),
            HashAlgorithm::Sha256 => Self::Sha256(sha2::Sha256::new()),
            HashAlgorithm::Sha512 => Self::Sha512(sha2::Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(hasher) => hasher.update(data),
            Self::Sha1(hasher) => hasher.update(data),
            Self::Sha256(hasher) => hasher.update(data),
            Self::Sha512(hasher) => hasher.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Md5(hasher) => hasher.finalize().to_vec(),
            Self::Sha1(hasher) => hasher.finalize().to_vec(),
            Self::Sha256(hasher) => hasher.finalize().to_vec(),
            Self::Sha512(hasher) => hasher.finalize().to_vec(),
        }
    }
}

/// Digest of `data` for one algorithm
pub fn digest_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Digests of `file` for each algorithm, in the same order
///
/// Precomputed values from the backend are used where present; the
/// remaining algorithms share one pass over the content.
async fn digests(
    file: &dyn FileEntry,
    algorithms: &[HashAlgorithm],
    ct: &CancellationToken,
) -> Result<Vec<Vec<u8>>> {
    let mut results: Vec<Option<Vec<u8>>> = algorithms
        .iter()
        .map(|algorithm| file.hash_provider().and_then(|provider| provider.hash(*algorithm)))
        .collect();

    let mut missing: Vec<(usize, Hasher)> = results
        .iter()
        .zip(algorithms)
        .enumerate()
        .filter(|(_, (result, _))| result.is_none())
        .map(|(index, (_, algorithm))| (index, Hasher::new(*algorithm)))
        .collect();

    if !missing.is_empty() {
        let mut stream = file.open_read(ct).await?;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            if ct.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let read = stream.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            for (_, hasher) in &mut missing {
                hasher.update(&buffer[..read]);
            }
        }
        for (index, hasher) in missing {
            results[index] = Some(hasher.finalize());
        }
    }

    Ok(results.into_iter().flatten().collect())
}
