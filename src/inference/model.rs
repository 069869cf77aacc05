//! Model artifact checks
//!
//! Cheap header validation before handing a file to llama.cpp, so a
//! truncated download or a wrong file turns into a clear reason instead of
//! a loader failure deep inside the backend.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// GGUF magic bytes (little-endian: "GGUF")
pub const GGUF_MAGIC: u32 = 0x46554747;

/// magic(4) + version(4) + tensor_count(8) + metadata_kv_count(8)
const HEADER_LEN: usize = 24;

const SUPPORTED_VERSIONS: std::ops::RangeInclusive<u32> = 2..=3;

/// Errors found while checking a model file
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Failed to open model file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a GGUF file: magic bytes mismatch (expected 0x{:08X}, got 0x{:08X})", GGUF_MAGIC, .0)]
    InvalidMagic(u32),

    #[error("Unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),

    #[error("File too small to be valid GGUF")]
    FileTooSmall,
}

/// Fixed-size header at the start of every GGUF file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GgufHeader {
    pub version: u32,
    pub tensor_count: u64,
    pub metadata_kv_count: u64,
}

impl GgufHeader {
    fn parse(bytes: &[u8; HEADER_LEN]) -> Result<Self, ModelError> {
        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let u64_at = |at: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(buf)
        };

        let magic = u32_at(0);
        if magic != GGUF_MAGIC {
            return Err(ModelError::InvalidMagic(magic));
        }

        let version = u32_at(4);
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(ModelError::UnsupportedVersion(version));
        }

        Ok(Self {
            version,
            tensor_count: u64_at(8),
            metadata_kv_count: u64_at(16),
        })
    }
}

/// Validates that `path` is a GGUF file llama.cpp can read and returns its header.
pub fn validate_gguf<P: AsRef<Path>>(path: P) -> Result<GgufHeader, ModelError> {
    let mut file = File::open(path)?;

    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        match file.read(&mut header[filled..])? {
            0 => return Err(ModelError::FileTooSmall),
            n => filled += n,
        }
    }

    GgufHeader::parse(&header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_header(magic: u32, version: u32) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".gguf").tempfile().unwrap();
        file.write_all(&magic.to_le_bytes()).unwrap();
        file.write_all(&version.to_le_bytes()).unwrap();
        file.write_all(&201u64.to_le_bytes()).unwrap();
        file.write_all(&23u64.to_le_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_valid_header() {
        let file = write_header(GGUF_MAGIC, 3);
        let header = validate_gguf(file.path()).unwrap();
        assert_eq!(
            header,
            GgufHeader {
                version: 3,
                tensor_count: 201,
                metadata_kv_count: 23
            }
        );
    }

    #[test]
    fn test_wrong_magic() {
        let file = write_header(0xDEADBEEF, 3);
        assert!(matches!(
            validate_gguf(file.path()),
            Err(ModelError::InvalidMagic(0xDEADBEEF))
        ));
    }

    #[test]
    fn test_old_version_rejected() {
        let file = write_header(GGUF_MAGIC, 1);
        assert!(matches!(
            validate_gguf(file.path()),
            Err(ModelError::UnsupportedVersion(1))
        ));
    }

    #[test]
    fn test_truncated_download() {
        let mut file = tempfile::Builder::new().suffix(".gguf").tempfile().unwrap();
        file.write_all(&GGUF_MAGIC.to_le_bytes()).unwrap();
        file.flush().unwrap();

        assert!(matches!(validate_gguf(file.path()), Err(ModelError::FileTooSmall)));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate_gguf(dir.path().join("model.gguf")),
            Err(ModelError::Io(_))
        ));
    }
}
