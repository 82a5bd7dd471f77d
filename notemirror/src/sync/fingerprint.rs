use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 64 * 1024;

/// Cheap change signal derived from listing metadata only.
pub fn weak_fingerprint(id: &str, modified_time: &str, size: u64) -> String {
    format!("{:x}", md5::compute(format!("{id}:{modified_time}:{size}")))
}

/// SHA-256 over the full content of a local file, hex encoded.
pub async fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
