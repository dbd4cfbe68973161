//! Local filesystem bucket

use super::{clamp_range, Bucket, BucketObject, GetOptions, HttpMetadata};
use crate::error::{Result, TileError};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// Bucket reading objects from a directory tree
///
/// The ETag is derived from file size and modification time, so rewriting an
/// archive in place changes it.
pub struct FsBucket {
    root: PathBuf,
}

impl FsBucket {
    pub fn new(root: impl AsRef<Path>) -> Self {
        FsBucket {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(TileError::InvalidParameter(format!(
                "object key '{}' escapes the bucket root",
                key
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Bucket for FsBucket {
    async fn get(&self, key: &str, options: GetOptions) -> Result<Option<BucketObject>> {
        let path = self.resolve(key)?;

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let size = metadata.len();
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let etag = format!("\"{:x}-{:x}\"", size, mtime);

        let condition_holds = options
            .etag_matches
            .as_ref()
            .map_or(true, |expected| *expected == etag);

        let body = if condition_holds {
            let (start, end) = clamp_range(options.range, size);
            let mut file = fs::File::open(&path).await?;
            file.seek(SeekFrom::Start(start)).await?;
            let mut buf = vec![0u8; (end - start) as usize];
            file.read_exact(&mut buf).await?;
            debug!("Read {} bytes at offset {} from {}", buf.len(), start, path.display());
            Some(Bytes::from(buf))
        } else {
            None
        };

        Ok(Some(BucketObject {
            key: key.to_string(),
            etag,
            size,
            http_metadata: HttpMetadata::default(),
            body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_range_from_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("tiles")).unwrap();
        std::fs::write(dir.path().join("tiles/a.pmtiles"), b"abcdefghij").unwrap();

        let bucket = FsBucket::new(dir.path());
        let object = bucket
            .get("tiles/a.pmtiles", GetOptions::range(3, 4))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(object.body.unwrap().as_ref(), b"defg");
        assert_eq!(object.size, 10);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let bucket = FsBucket::new(dir.path());
        assert!(bucket.get("missing.pmtiles", GetOptions::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_etag_mismatch_returns_metadata_only() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.pmtiles"), b"abc").unwrap();

        let bucket = FsBucket::new(dir.path());
        let object = bucket
            .get(
                "a.pmtiles",
                GetOptions::range(0, 3).with_etag(Some("\"stale\"".to_string())),
            )
            .await
            .unwrap()
            .unwrap();
        assert!(object.body.is_none());
    }

    #[tokio::test]
    async fn test_rejects_parent_traversal() {
        let dir = TempDir::new().unwrap();
        let bucket = FsBucket::new(dir.path());
        assert!(bucket.get("../etc/passwd", GetOptions::default()).await.is_err());
    }
}
