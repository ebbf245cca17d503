// The `kv_file` module reads and writes single-value state files.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// The `StoreError` enum defines the possible errors of the state files.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file could not be written or renamed into place.
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A whole-file string value stored at a fixed path.
///
/// Writes go to a sibling temporary file which is flushed and then renamed
/// over the target, so readers see either the old or the new value.
#[derive(Debug, Clone)]
pub struct KeyValueFile {
    path: PathBuf,
}

impl KeyValueFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the value, returning `None` when the file does not exist.
    pub async fn read(&self) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(contents.trim().to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Durably replaces the value.
    pub async fn write(&self, value: &str) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(write_err)?;
            }
        }

        let tmp_path = self.tmp_path();
        let mut file = fs::File::create(&tmp_path).await.map_err(write_err)?;
        file.write_all(value.as_bytes()).await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        fs::rename(&tmp_path, &self.path).await.map_err(write_err)?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let file = KeyValueFile::new(dir.path().join("absent.txt"));

        assert!(file.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_replaces_value_and_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let file = KeyValueFile::new(dir.path().join("nested").join("value.txt"));

        file.write("first").await.unwrap();
        file.write("second\n").await.unwrap();

        assert_eq!(file.read().await.unwrap().as_deref(), Some("second"));
        assert!(!dir.path().join("nested").join("value.txt.tmp").exists());
    }

    #[tokio::test]
    async fn directory_in_place_of_file_is_a_read_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.txt");
        std::fs::create_dir(&path).unwrap();

        let result = KeyValueFile::new(path).read().await;

        assert!(matches!(result, Err(StoreError::Read { .. })));
    }
}
