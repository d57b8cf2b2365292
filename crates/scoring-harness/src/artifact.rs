//! Model archives handed to the server-under-test.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// A packaged model archive, either on disk or already in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelArtifact {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl ModelArtifact {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        ModelArtifact::Path(path.into())
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        ModelArtifact::Bytes(bytes.into())
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            ModelArtifact::Path(p) => Some(p),
            ModelArtifact::Bytes(_) => None,
        }
    }

    /// File name sent in multipart uploads.
    pub fn file_name(&self) -> String {
        self.path()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model.mar".to_string())
    }

    /// Archive contents, reading from disk for path-backed artifacts.
    pub async fn load(&self) -> Result<Vec<u8>> {
        match self {
            ModelArtifact::Path(p) => Ok(tokio::fs::read(p).await?),
            ModelArtifact::Bytes(b) => Ok(b.clone()),
        }
    }
}

/// SHA-256 hex digest of archive bytes, used to identify uploads in logs.
pub fn artifact_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_path_artifact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Kmeans.mar");
        std::fs::write(&path, b"archive-bytes").unwrap();

        let artifact = ModelArtifact::from_path(&path);
        assert_eq!(artifact.load().await.unwrap(), b"archive-bytes");
        assert_eq!(artifact.file_name(), "Kmeans.mar");
    }

    #[tokio::test]
    async fn test_load_missing_path_is_io_error() {
        let artifact = ModelArtifact::from_path("/nonexistent/model.mar");
        let err = artifact.load().await.unwrap_err();
        assert!(matches!(err, crate::HarnessError::Io(_)));
    }

    #[test]
    fn test_bytes_artifact_has_default_file_name() {
        let artifact = ModelArtifact::from_bytes(vec![1, 2, 3]);
        assert!(artifact.path().is_none());
        assert_eq!(artifact.file_name(), "model.mar");
    }

    #[test]
    fn test_artifact_digest_is_sha256_hex() {
        let digest = artifact_digest(b"abc");
        assert_eq!(digest.len(), 64);
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
