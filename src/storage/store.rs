//! Filesystem layout for generated artifacts.
//!
//! Artifacts live at `<output_root>/<batch_tag>/<file name>`. The store is
//! the only component that writes to disk.

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::naming::NamingScheme;
use crate::error::FetchError;
use crate::pipeline::{BatchTag, TaskUnit};

/// A generated image written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistedArtifact {
    /// Full path of the written file.
    pub path: PathBuf,
    /// Batch the artifact belongs to.
    pub batch_tag: BatchTag,
    /// Size of the file.
    pub bytes_written: u64,
}

/// Writes artifacts into per-batch directories.
#[derive(Debug)]
pub struct ArtifactStore {
    output_root: PathBuf,
    naming: NamingScheme,
    sequences: Mutex<HashMap<BatchTag, u64>>,
}

impl ArtifactStore {
    /// Creates a store rooted at `output_root`.
    pub fn new(output_root: impl Into<PathBuf>, naming: NamingScheme) -> Self {
        Self {
            output_root: output_root.into(),
            naming,
            sequences: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding the artifacts of one batch.
    pub fn batch_dir(&self, tag: &BatchTag) -> PathBuf {
        self.output_root.join(tag.as_str())
    }

    /// Creates the batch directory (and any parents) if missing.
    pub async fn prepare_batch(&self, tag: &BatchTag) -> std::io::Result<PathBuf> {
        let dir = self.batch_dir(tag);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Next value of the batch's write counter, starting at 1.
    fn next_sequence(&self, tag: &BatchTag) -> u64 {
        let mut sequences = self
            .sequences
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let counter = sequences.entry(tag.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Writes an artifact for `unit`, named from the current time.
    pub async fn persist(
        &self,
        unit: &TaskUnit,
        bytes: &[u8],
    ) -> Result<PersistedArtifact, FetchError> {
        self.persist_at(unit, bytes, Local::now()).await
    }

    /// Writes an artifact for `unit`, named as if written at `at`.
    ///
    /// Files are opened with create-new semantics: an existing file is never
    /// overwritten and yields `FetchError::ArtifactExists`.
    pub async fn persist_at(
        &self,
        unit: &TaskUnit,
        bytes: &[u8],
        at: DateTime<Local>,
    ) -> Result<PersistedArtifact, FetchError> {
        let tag = unit.batch_tag();
        let dir = self
            .prepare_batch(tag)
            .await
            .map_err(|source| FetchError::DirectoryCreationFailed {
                path: self.batch_dir(tag),
                source,
            })?;

        let sequence = self.next_sequence(tag);
        let path = dir.join(self.naming.file_name(at, sequence, unit));

        write_new(&path, |mut file| async move {
            file.write_all(bytes).await?;
            file.sync_all().await
        })
        .await?;

        Ok(PersistedArtifact {
            path,
            batch_tag: tag.clone(),
            bytes_written: bytes.len() as u64,
        })
    }
}

/// Creates `path` (failing if it exists) and hands the open file to `write`.
///
/// A failed write removes the partial file so no truncated artifact is left
/// behind.
async fn write_new<F, Fut>(path: &Path, write: F) -> Result<(), FetchError>
where
    F: FnOnce(fs::File) -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    let file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => FetchError::ArtifactExists(path.to_path_buf()),
            _ => FetchError::Io(e),
        })?;

    if let Err(e) = write(file).await {
        let _ = fs::remove_file(path).await;
        return Err(FetchError::Io(e));
    }
    Ok(())
}
