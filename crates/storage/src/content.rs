use std::path::{Path, PathBuf};

use boxsync_core::checksum::digest_hex;
use boxsync_core::validation::{validate_file_name, TEMP_PREFIX};
use boxsync_core::FileId;
use tokio::io::AsyncWriteExt;

use crate::StorageError;

/// Blob store: one current file per name plus an append-only versioned copy
/// per version. Current writes are atomic with respect to readers; versioned
/// writes are exclusive-create so concurrent allocation of the same number
/// collides detectably.
pub struct ContentStore {
    files_dir: PathBuf,
    versions_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedBlob {
    pub path: PathBuf,
    pub versioned_path: PathBuf,
    pub checksum: String,
    pub size: u64,
}

impl ContentStore {
    #[must_use]
    pub fn new(files_dir: PathBuf, versions_dir: PathBuf) -> Self {
        Self {
            files_dir,
            versions_dir,
        }
    }

    fn current_path(&self, name: &str) -> PathBuf {
        self.files_dir.join(name)
    }

    fn versioned_path(&self, name: &str, version: u64) -> PathBuf {
        self.versions_dir.join(format!("{name}.v{version}"))
    }

    /// Write the blob as the current file and as the versioned copy.
    ///
    /// The versioned copy is created first with an exclusive create; an
    /// existing copy means another writer claimed this version number and
    /// the caller should retry with the next one.
    pub async fn save(
        &self,
        name: &str,
        blob: &[u8],
        version: u64,
    ) -> Result<SavedBlob, StorageError> {
        validate_file_name(name)?;

        let versioned_path = self.versioned_path(name, version);
        let open = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&versioned_path)
            .await;
        let mut versioned = match open {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::VersionExists {
                    file_name: name.to_owned(),
                    version,
                });
            }
            Err(error) => return Err(error.into()),
        };
        versioned.write_all(blob).await?;
        versioned.flush().await?;

        let path = self.current_path(name);
        write_atomic(&self.files_dir, &path, blob).await?;

        Ok(SavedBlob {
            path,
            versioned_path,
            checksum: digest_hex(blob),
            size: blob.len() as u64,
        })
    }

    /// Current blob when `version` is `None`, the versioned blob otherwise.
    pub async fn get(&self, name: &str, version: Option<u64>) -> Result<Vec<u8>, StorageError> {
        validate_file_name(name)?;
        let path = match version {
            Some(v) => self.versioned_path(name, v),
            None => self.current_path(name),
        };
        read_or_not_found(&path, name, version).await
    }

    pub async fn exists(&self, name: &str) -> bool {
        tokio::fs::try_exists(self.current_path(name))
            .await
            .unwrap_or(false)
    }

    /// Delete the current blob, one versioned blob, or (with `cascade`) the
    /// current blob plus every versioned copy.
    pub async fn delete(
        &self,
        name: &str,
        version: Option<u64>,
        cascade: bool,
    ) -> Result<(), StorageError> {
        validate_file_name(name)?;

        if let Some(v) = version {
            let path = self.versioned_path(name, v);
            return remove_or_not_found(&path, name, Some(v)).await;
        }

        remove_or_not_found(&self.current_path(name), name, None).await?;
        if cascade {
            for v in self.list_versions(name).await? {
                // Cascade is best-effort per copy; a racing reader may have
                // removed one already.
                let _ = tokio::fs::remove_file(self.versioned_path(name, v)).await;
            }
        }
        Ok(())
    }

    /// Names with a current blob, sorted.
    pub async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.files_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Existing version numbers for a name, ascending.
    pub async fn list_versions(&self, name: &str) -> Result<Vec<u64>, StorageError> {
        validate_file_name(name)?;
        let prefix = format!("{name}.v");
        let mut versions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.versions_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(file_name) = entry.file_name().into_string() else {
                continue;
            };
            if let Some(tail) = file_name.strip_prefix(&prefix) {
                if let Ok(version) = tail.parse::<u64>() {
                    versions.push(version);
                }
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Retarget the current blob and every versioned copy to a new name.
    pub async fn rename(&self, old: &str, new: &str) -> Result<(), StorageError> {
        validate_file_name(old)?;
        validate_file_name(new)?;
        if self.exists(new).await {
            return Err(StorageError::BadRequest(format!(
                "cannot rename {old}: {new} already exists"
            )));
        }

        let had_current = self.exists(old).await;
        let versions = self.list_versions(old).await?;
        if !had_current && versions.is_empty() {
            return Err(StorageError::NotFound(format!("file {old}")));
        }

        if had_current {
            tokio::fs::rename(self.current_path(old), self.current_path(new)).await?;
        }
        for v in versions {
            tokio::fs::rename(self.versioned_path(old, v), self.versioned_path(new, v)).await?;
        }
        Ok(())
    }
}

/// Write-to-temp then rename in the same directory, so readers only ever see
/// the old bytes or the new bytes.
async fn write_atomic(dir: &Path, path: &Path, blob: &[u8]) -> Result<(), StorageError> {
    let temp_path = dir.join(format!("{TEMP_PREFIX}{}", FileId::generate()));
    let mut temp = tokio::fs::File::create(&temp_path).await?;
    temp.write_all(blob).await?;
    temp.flush().await?;
    drop(temp);
    if let Err(error) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(error.into());
    }
    Ok(())
}

async fn read_or_not_found(
    path: &Path,
    name: &str,
    version: Option<u64>,
) -> Result<Vec<u8>, StorageError> {
    match tokio::fs::read(path).await {
        Ok(blob) => Ok(blob),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            Err(not_found(name, version))
        }
        Err(error) => Err(error.into()),
    }
}

async fn remove_or_not_found(
    path: &Path,
    name: &str,
    version: Option<u64>,
) -> Result<(), StorageError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            Err(not_found(name, version))
        }
        Err(error) => Err(error.into()),
    }
}

fn not_found(name: &str, version: Option<u64>) -> StorageError {
    match version {
        Some(v) => StorageError::NotFound(format!("version {v} of {name}")),
        None => StorageError::NotFound(format!("file {name}")),
    }
}
