//! Content hashing.
//!
//! Uses SHA256 so collisions in the image root are detected by content, not
//! by mtime or size.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;

/// Hex SHA256 of a file's contents. Symlinks are followed.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_file_and_bytes_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a");
        fs::write(&path, b"libfoo").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"libfoo"));
        assert_ne!(hash_bytes(b"libfoo"), hash_bytes(b"libbar"));
    }

    #[test]
    fn test_missing_file() {
        assert!(hash_file(Path::new("/nonexistent_file_12345")).is_err());
    }
}
