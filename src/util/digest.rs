use anyhow::Context;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Streaming SHA-256 of a local file, as 64 lower-case hex characters.
///
/// Reads in 64 KiB chunks so large artifacts never need to fit in memory
/// just to be hashed.
pub async fn sha256_hex_file(path: &Path) -> anyhow::Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {} for hashing", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .with_context(|| format!("read error while hashing {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 of an in-memory byte sequence, as lower-case hex.
///
/// Used for synthesized registry documents (image config, manifest) whose
/// digests must be computed from the exact bytes sent.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
