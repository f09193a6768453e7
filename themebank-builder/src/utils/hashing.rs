//! Content hashing for audio deduplication

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use themebank_common::{Error, Result};

/// SHA-256 of a file's bytes as lowercase hex
///
/// Reads in 1 MB chunks on the blocking pool.
pub async fn hash_file(file_path: &Path) -> Result<String> {
    let path_buf = file_path.to_path_buf();

    let hash = tokio::task::spawn_blocking(move || hash_file_blocking(&path_buf))
        .await
        .map_err(|e| Error::Internal(format!("Hash calculation task failed: {}", e)))??;

    tracing::trace!(path = %file_path.display(), hash = %hash, "Calculated content hash");

    Ok(hash)
}

/// Synchronous variant of [`hash_file`] for code already on the blocking pool
pub fn hash_file_blocking(file_path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(file_path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open {} for hashing: {}", file_path.display(), e),
        ))
    })?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
