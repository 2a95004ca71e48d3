//! Hash-level/algorithm implementations for the scanner.
//!
//! `HashLevel` controls *how much* of a file is read to produce the fast
//! change-detection fingerprint (`LocalEntry::hash`); `HashAlgorithm`
//! selects the digest. The remote-facing `LocalEntry::sha1` is always a
//! full-content SHA-1, independent of the configured level/algorithm,
//! because that is the hash the rapid-upload path and the reconciler
//! compare against remote content hashes.

use md5::{Digest, Md5};
use rdrive_core::types::{HashAlgorithm, HashLevel};
use sha1::Sha1;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use twox_hash::XxHash64;

/// Fixed-size head sample for `HashLevel::Head`.
const HEAD_SAMPLE_BYTES: u64 = 64 * 1024;
/// Per-window sample size for `HashLevel::Sampled`.
const SAMPLE_WINDOW_BYTES: u64 = 16 * 1024;
/// Number of windows sampled across the file for `HashLevel::Sampled`.
const SAMPLE_WINDOW_COUNT: u64 = 8;

/// Computes `LocalEntry::hash` for a file of known `size`, per the
/// configured `level`/`algorithm`. Returns an empty vector for `None`.
pub fn compute_hash(
    path: &Path,
    size: u64,
    level: HashLevel,
    algorithm: HashAlgorithm,
) -> std::io::Result<Vec<u8>> {
    match level {
        HashLevel::None => Ok(Vec::new()),
        HashLevel::Head => {
            let mut file = File::open(path)?;
            let mut buf = vec![0u8; HEAD_SAMPLE_BYTES.min(size) as usize];
            file.read_exact(&mut buf)?;
            Ok(digest(algorithm, &[buf]))
        }
        HashLevel::Sampled => {
            let mut file = File::open(path)?;
            let mut samples = Vec::new();
            if size <= SAMPLE_WINDOW_BYTES * SAMPLE_WINDOW_COUNT {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf)?;
                samples.push(buf);
            } else {
                let stride = size / SAMPLE_WINDOW_COUNT;
                for i in 0..SAMPLE_WINDOW_COUNT {
                    let offset = (i * stride).min(size.saturating_sub(SAMPLE_WINDOW_BYTES));
                    file.seek(SeekFrom::Start(offset))?;
                    let window_len = SAMPLE_WINDOW_BYTES.min(size - offset) as usize;
                    let mut buf = vec![0u8; window_len];
                    file.read_exact(&mut buf)?;
                    samples.push(buf);
                }
            }
            Ok(digest(algorithm, &samples))
        }
        HashLevel::Full => {
            let mut file = File::open(path)?;
            let mut buf = vec![0u8; 256 * 1024];
            let mut chunks = Vec::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                chunks.push(buf[..n].to_vec());
            }
            Ok(digest(algorithm, &chunks))
        }
    }
}

fn digest(algorithm: HashAlgorithm, parts: &[Vec<u8>]) -> Vec<u8> {
    match algorithm {
        HashAlgorithm::Sha1 => {
            let mut hasher = Sha1::new();
            for p in parts {
                hasher.update(p);
            }
            hasher.finalize().to_vec()
        }
        HashAlgorithm::Md5 => {
            let mut hasher = Md5::new();
            for p in parts {
                hasher.update(p);
            }
            hasher.finalize().to_vec()
        }
        HashAlgorithm::Xxh => {
            let mut hasher = XxHash64::with_seed(0);
            for p in parts {
                std::hash::Hasher::write(&mut hasher, p);
            }
            std::hash::Hasher::finish(&hasher).to_be_bytes().to_vec()
        }
    }
}

/// Full-content SHA-1, hex-encoded — always this algorithm regardless of the
/// configured `HashAlgorithm`, since it's what the remote drive's dedup
/// protocol and the reconciler's diff compare against.
pub fn full_sha1_hex(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; 256 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Minimal hex encoding so this crate doesn't need a dedicated `hex` dep
/// beyond what `sha1`'s output type requires.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            write!(s, "{b:02x}").unwrap();
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn none_level_is_empty() {
        let f = write_temp(b"hello");
        let h = compute_hash(f.path(), 5, HashLevel::None, HashAlgorithm::Sha1).unwrap();
        assert!(h.is_empty());
    }

    #[test]
    fn full_level_is_deterministic() {
        let f = write_temp(b"the quick brown fox");
        let a = compute_hash(f.path(), 19, HashLevel::Full, HashAlgorithm::Sha1).unwrap();
        let b = compute_hash(f.path(), 19, HashLevel::Full, HashAlgorithm::Sha1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn full_sha1_matches_known_vector() {
        let f = write_temp(b"hi");
        let hex = full_sha1_hex(f.path()).unwrap();
        assert_eq!(hex, "c22b5f9178342609428d6f51b2c5af4c0bde6a42");
    }

    #[test]
    fn sampled_handles_small_files_by_reading_whole_file() {
        let f = write_temp(b"tiny file, fits in one window");
        let h = compute_hash(f.path(), 30, HashLevel::Sampled, HashAlgorithm::Xxh).unwrap();
        assert!(!h.is_empty());
    }
}
