use std::path::Path;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::{TomatoError, TomatoResult};
use crate::http::ApiClient;

/// Returns true if `path` is missing or its size doesn't match
/// `expected_size` (§3-inv-3 / §4.2 step 4). Size-only, no checksum — an
/// MD5 field exists on the server model but isn't part of this contract
/// (Open Question 1, see DESIGN.md).
pub fn needs_download(path: &Path, expected_size: i64) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.len() != expected_size as u64,
        Err(_) => true,
    }
}

/// Streams `url` to a `.tmp` sibling of `dest`, then atomically renames it
/// into place. Never leaves a partially-written file visible at `dest` —
/// on any failure the `.tmp` file is left behind for the next sync to
/// retry (§4.2's partial-failure contract).
pub async fn download_to(client: &ApiClient, url: &str, dest: &Path) -> TomatoResult<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp_path = dest.with_extension(match dest.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });

    let response = client.raw_client().get(url).send().await?;
    if let Some(err) = ApiClient::classify_status(response.status()) {
        return Err(err);
    }

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(TomatoError::from)?;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_needs_download() {
        let path = Path::new("/nonexistent/surely/not/here.mp3");
        assert!(needs_download(path, 1234));
    }

    #[test]
    fn size_mismatch_needs_download() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp3");
        std::fs::write(&path, b"1234567").unwrap();
        assert!(needs_download(&path, 100));
        assert!(!needs_download(&path, 7));
    }
}
