//! Checksum utilities for persisted documents

use crate::error::{PmdError, Result};
use crate::types::ChecksumAlgorithm;
use sha2::{Digest, Sha256, Sha512};
use std::io::Read;
use std::path::Path;

/// Compute the hex digest of an in-memory buffer
pub fn checksum_bytes(data: &[u8], algorithm: ChecksumAlgorithm) -> String {
    match algorithm {
        ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
        ChecksumAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
    }
}

/// Compute checksum for any readable source
pub fn compute_checksum<R: Read>(reader: &mut R, algorithm: ChecksumAlgorithm) -> Result<String> {
    fn digest_into<D: Digest, R: Read>(mut hasher: D, reader: &mut R) -> Result<String> {
        let mut buffer = [0u8; 8192];
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    match algorithm {
        ChecksumAlgorithm::Sha256 => digest_into(Sha256::new(), reader),
        ChecksumAlgorithm::Sha512 => digest_into(Sha512::new(), reader),
    }
}

/// Compute checksum for a file on disk
pub fn compute_file_checksum(
    path: impl AsRef<Path>,
    algorithm: ChecksumAlgorithm,
) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_checksum(&mut file, algorithm)
}

/// Verify that `data` hashes to `expected`
pub fn verify_checksum(data: &[u8], expected: &str, algorithm: ChecksumAlgorithm) -> Result<()> {
    let actual = checksum_bytes(data, algorithm);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(PmdError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_checksum_bytes_sha256() {
        assert_eq!(
            checksum_bytes(b"hello world", ChecksumAlgorithm::Sha256),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_reader_matches_buffer() {
        let data = b"{\"kind\":\"block\",\"next\":145}";
        let mut cursor = Cursor::new(data);
        let streamed = compute_checksum(&mut cursor, ChecksumAlgorithm::Sha512).unwrap();
        assert_eq!(streamed, checksum_bytes(data, ChecksumAlgorithm::Sha512));
    }

    #[test]
    fn test_verify_checksum_mismatch() {
        let err = verify_checksum(b"abc", "deadbeef", ChecksumAlgorithm::Sha256).unwrap_err();
        assert!(matches!(err, PmdError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_file_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, b"hello world").unwrap();
        let digest = compute_file_checksum(&path, ChecksumAlgorithm::Sha256).unwrap();
        assert!(verify_checksum(b"hello world", &digest, ChecksumAlgorithm::Sha256).is_ok());
    }
}
