//! Content fingerprinting over full blob bytes.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Hex length of a SHA-256 digest.
pub const CHECKSUM_LENGTH: usize = 64;

/// Fingerprint a blob held in memory.
#[must_use]
pub fn digest_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Fingerprint a file on disk without loading it whole.
pub fn digest_file_hex(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(digest_hex(b"hello"), digest_hex(b"hello"));
        assert_ne!(digest_hex(b"hello"), digest_hex(b"world"));
    }

    #[test]
    fn digest_is_fixed_width_hex() {
        let digest = digest_hex(b"");
        assert_eq!(digest.len(), CHECKSUM_LENGTH);
        assert!(digest.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn known_vector() {
        assert_eq!(
            digest_hex(b"a"),
            "ca978112ca1bbdcafac231b39a23dc4da786eff8147c4e72b9807785afee48bb"
        );
    }

    #[test]
    fn file_digest_matches_memory_digest() {
        let dir = std::env::temp_dir().join(format!("boxsync-checksum-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("blob.bin");
        let data = vec![0xabu8; 200 * 1024];
        std::fs::write(&path, &data).expect("write blob");

        let from_file = digest_file_hex(&path).expect("digest file");
        assert_eq!(from_file, digest_hex(&data));

        std::fs::remove_dir_all(&dir).expect("cleanup");
    }
}
