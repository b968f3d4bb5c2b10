mod intern;
mod stage;

pub use intern::HashInterner;
pub use stage::{run_hash_stage, HashStageOutcome};

use crate::category::FileCategory;
use crate::config::HashLevel;
use crate::control::{CancelToken, PauseGate};
use crate::error::{Error, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use sha3::Sha3_256;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Streaming read buffer. Workers suspend (pause/cancel) between fills, so
/// nothing larger than this runs unchecked.
pub const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// A computed content fingerprint ready for interning.
#[derive(Debug, Clone)]
pub struct HashOutput {
    pub bytes: Vec<u8>,
    pub hex: String,
    /// Set when the hybrid movie fingerprint was used, so verification can
    /// recompute it identically.
    pub partial_info: Option<String>,
}

enum AnyDigest {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha3(Sha3_256),
}

impl AnyDigest {
    fn for_level(level: HashLevel) -> Result<Self> {
        match level {
            HashLevel::Sha1 => Ok(AnyDigest::Sha1(Sha1::new())),
            HashLevel::Sha256 => Ok(AnyDigest::Sha256(Sha256::new())),
            HashLevel::Sha3_256 => Ok(AnyDigest::Sha3(Sha3_256::new())),
            HashLevel::SizeName => Err(Error::HashUnavailable("SizeName".into())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            AnyDigest::Sha1(d) => d.update(data),
            AnyDigest::Sha256(d) => d.update(data),
            AnyDigest::Sha3(d) => d.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            AnyDigest::Sha1(d) => d.finalize().to_vec(),
            AnyDigest::Sha256(d) => d.finalize().to_vec(),
            AnyDigest::Sha3(d) => d.finalize().to_vec(),
        }
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
        let _ = write!(acc, "{:02x}", b);
        acc
    })
}

/// Hash one file with the project algorithm. Movies may use the hybrid
/// partial fingerprint when a chunk size is configured and the file is big
/// enough to make it meaningful.
pub fn hash_file(
    path: &Path,
    level: HashLevel,
    file_name: &str,
    size_bytes: u64,
    category: FileCategory,
    movie_chunk_mb: Option<u32>,
    pause: &PauseGate,
    cancel: &CancelToken,
) -> Result<HashOutput> {
    if level == HashLevel::SizeName {
        return Ok(size_name_fingerprint(file_name, size_bytes));
    }

    if category == FileCategory::Movie {
        if let Some(chunk_mb) = movie_chunk_mb {
            let chunk_bytes = chunk_mb as u64 * 1024 * 1024;
            if size_bytes > 2 * chunk_bytes {
                return movie_fingerprint(path, level, size_bytes, chunk_bytes, chunk_mb, pause, cancel);
            }
        }
    }

    let mut file = File::open(path)?;
    let mut digest = AnyDigest::for_level(level)?;
    stream_into(&mut file, &mut digest, None, pause, cancel)?;
    let bytes = digest.finalize();
    let hex = to_hex(&bytes);
    Ok(HashOutput {
        bytes,
        hex,
        partial_info: None,
    })
}

/// Re-hash an already-copied file for verification, honouring any recorded
/// partial-hash parameters.
pub fn rehash_for_verification(
    path: &Path,
    level: HashLevel,
    file_name: &str,
    category: FileCategory,
    partial_info: Option<&str>,
    pause: &PauseGate,
    cancel: &CancelToken,
) -> Result<HashOutput> {
    let size = std::fs::metadata(path)?.len();
    let chunk_mb = partial_info.and_then(parse_chunk_mb);
    hash_file(path, level, file_name, size, category, chunk_mb, pause, cancel)
}

pub fn parse_chunk_mb(info: &str) -> Option<u32> {
    info.strip_prefix("chunk_mb=")?.parse().ok()
}

/// `size + hash(first N MiB) + hash(last N MiB)`: cheap identity for large
/// movie files where full reads dominate scan time.
fn movie_fingerprint(
    path: &Path,
    level: HashLevel,
    size_bytes: u64,
    chunk_bytes: u64,
    chunk_mb: u32,
    pause: &PauseGate,
    cancel: &CancelToken,
) -> Result<HashOutput> {
    let mut file = File::open(path)?;

    let mut head = AnyDigest::for_level(level)?;
    stream_into(&mut file, &mut head, Some(chunk_bytes), pause, cancel)?;

    file.seek(SeekFrom::End(-(chunk_bytes as i64)))?;
    let mut tail = AnyDigest::for_level(level)?;
    stream_into(&mut file, &mut tail, Some(chunk_bytes), pause, cancel)?;

    let mut bytes = size_bytes.to_le_bytes().to_vec();
    bytes.extend_from_slice(&head.finalize());
    bytes.extend_from_slice(&tail.finalize());
    let hex = to_hex(&bytes);
    Ok(HashOutput {
        bytes,
        hex,
        partial_info: Some(format!("chunk_mb={}", chunk_mb)),
    })
}

fn size_name_fingerprint(file_name: &str, size_bytes: u64) -> HashOutput {
    let token = format!("{}:{}", size_bytes, file_name.to_lowercase());
    let bytes = token.into_bytes();
    let hex = to_hex(&bytes);
    HashOutput {
        bytes,
        hex,
        partial_info: None,
    }
}

fn stream_into(
    file: &mut File,
    digest: &mut AnyDigest,
    limit: Option<u64>,
    pause: &PauseGate,
    cancel: &CancelToken,
) -> Result<()> {
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    let mut remaining = limit;
    loop {
        pause.wait_if_paused();
        cancel.check()?;

        let want = match remaining {
            Some(0) => break,
            Some(n) => (n as usize).min(buffer.len()),
            None => buffer.len(),
        };
        let read = file.read(&mut buffer[..want])?;
        if read == 0 {
            break;
        }
        digest.update(&buffer[..read]);
        if let Some(n) = remaining {
            remaining = Some(n - read as u64);
        }
    }
    Ok(())
}
