use std::path::{Path, PathBuf};

use boxsync_core::protocol::{ConflictRecord, ConflictResolution, ConflictStatus, VersionRecord};
use boxsync_core::validation::TEMP_PREFIX;
use boxsync_core::FileId;
use tokio::io::AsyncWriteExt;

use crate::versioning::now_rfc3339;
use crate::StorageError;

/// Two uploads of one name count as concurrent when their source mtimes are
/// closer than this, the clients differ, and the contents differ.
pub const CONFLICT_THRESHOLD_MS: i64 = 5_000;

const LEGACY_INDEX: &str = "metadata.json";

/// Record storage is one JSON document per version and one per conflict.
/// Readers union a directory scan; writers replace only their own document,
/// so no cross-process coordination is needed on a shared index.
pub struct MetadataStore {
    records_dir: PathBuf,
    conflicts_dir: PathBuf,
}

impl MetadataStore {
    /// Open the store, migrating a legacy monolithic index if one is present.
    pub async fn open(records_dir: PathBuf, conflicts_dir: PathBuf) -> Result<Self, StorageError> {
        let store = Self {
            records_dir,
            conflicts_dir,
        };
        store.migrate_legacy_index().await?;
        Ok(store)
    }

    fn record_path(&self, file_id: &str) -> PathBuf {
        self.records_dir.join(format!("{file_id}.json"))
    }

    fn conflict_path(&self, id: &str) -> PathBuf {
        self.conflicts_dir.join(format!("{id}.json"))
    }

    pub async fn get_all(&self) -> Result<Vec<VersionRecord>, StorageError> {
        read_documents(&self.records_dir).await
    }

    pub async fn get(&self, file_id: &str) -> Result<VersionRecord, StorageError> {
        match tokio::fs::read(self.record_path(file_id)).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("record {file_id}")))
            }
            Err(error) => Err(error.into()),
        }
    }

    pub async fn get_latest(&self, name: &str) -> Result<Option<VersionRecord>, StorageError> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .filter(|record| record.file_name == name)
            .max_by_key(|record| record.version))
    }

    /// Every version of a name, ascending by version number.
    pub async fn get_all_versions(&self, name: &str) -> Result<Vec<VersionRecord>, StorageError> {
        let mut versions: Vec<VersionRecord> = self
            .get_all()
            .await?
            .into_iter()
            .filter(|record| record.file_name == name)
            .collect();
        versions.sort_by_key(|record| record.version);
        Ok(versions)
    }

    pub async fn next_version(&self, name: &str) -> Result<u64, StorageError> {
        Ok(self
            .get_latest(name)
            .await?
            .map_or(1, |latest| latest.version + 1))
    }

    /// Idempotent by file_id: a re-save replaces the same document.
    pub async fn save(&self, record: &VersionRecord) -> Result<(), StorageError> {
        if record.file_id.is_empty() {
            return Err(StorageError::BadRequest(
                "version record requires a file_id".to_owned(),
            ));
        }
        write_document(&self.records_dir, &self.record_path(&record.file_id), record).await
    }

    pub async fn delete(&self, file_id: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.record_path(file_id)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("record {file_id}")))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Remove every record for a name; returns how many were removed.
    pub async fn delete_by_name(&self, name: &str) -> Result<usize, StorageError> {
        let mut removed = 0;
        for record in self.get_all_versions(name).await? {
            let _ = tokio::fs::remove_file(self.record_path(&record.file_id)).await;
            removed += 1;
        }
        Ok(removed)
    }

    /// Rewrite every record of `old_name` under `new_name`.
    pub async fn rename(&self, old_name: &str, new_name: &str) -> Result<usize, StorageError> {
        let mut rewritten = 0;
        for mut record in self.get_all_versions(old_name).await? {
            record.file_name = new_name.to_owned();
            record.updated_at = now_rfc3339();
            self.save(&record).await?;
            rewritten += 1;
        }
        Ok(rewritten)
    }

    /// Idempotent on id: an existing conflict document is never clobbered,
    /// which also protects an appended resolution.
    pub async fn save_conflict(&self, conflict: &ConflictRecord) -> Result<(), StorageError> {
        let path = self.conflict_path(&conflict.id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }
        write_document(&self.conflicts_dir, &path, conflict).await
    }

    pub async fn get_conflicts(&self) -> Result<Vec<ConflictRecord>, StorageError> {
        let mut conflicts: Vec<ConflictRecord> = read_documents(&self.conflicts_dir).await?;
        conflicts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(conflicts)
    }

    pub async fn get_conflict(&self, id: &str) -> Result<ConflictRecord, StorageError> {
        match tokio::fs::read(self.conflict_path(id)).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("conflict {id}")))
            }
            Err(error) => Err(error.into()),
        }
    }

    pub async fn find_conflict_by_key(
        &self,
        key: &str,
    ) -> Result<Option<ConflictRecord>, StorageError> {
        Ok(self
            .get_conflicts()
            .await?
            .into_iter()
            .find(|conflict| conflict.conflict_key == key))
    }

    /// Transition a conflict from unresolved to resolved, exactly once.
    pub async fn resolve_conflict(
        &self,
        id: &str,
        resolution: ConflictResolution,
    ) -> Result<ConflictRecord, StorageError> {
        let mut conflict = self.get_conflict(id).await?;
        if conflict.status == ConflictStatus::Resolved {
            return Err(StorageError::BadRequest(format!(
                "conflict {id} is already resolved"
            )));
        }
        conflict.status = ConflictStatus::Resolved;
        conflict.resolution = Some(resolution);
        conflict.resolved_at = Some(now_rfc3339());
        write_document(&self.conflicts_dir, &self.conflict_path(id), &conflict).await?;
        Ok(conflict)
    }

    async fn migrate_legacy_index(&self) -> Result<(), StorageError> {
        let Some(parent) = self.records_dir.parent() else {
            return Ok(());
        };
        let legacy = parent.join(LEGACY_INDEX);
        let raw = match tokio::fs::read(&legacy).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(error.into()),
        };

        let records: Vec<VersionRecord> = serde_json::from_slice(&raw)?;
        let mut migrated = 0;
        for record in &records {
            if record.file_id.is_empty() {
                continue;
            }
            let path = self.record_path(&record.file_id);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            write_document(&self.records_dir, &path, record).await?;
            migrated += 1;
        }

        tokio::fs::rename(&legacy, parent.join(format!("{LEGACY_INDEX}.migrated"))).await?;
        tracing::info!(total = records.len(), migrated, "migrated legacy metadata index");
        Ok(())
    }
}

/// Threshold fallback for uploads the sliding window did not observe
/// together: concurrent iff the mtimes are within the threshold, the clients
/// differ, and the checksums differ.
#[must_use]
pub fn detect_conflict(
    incoming_last_modified: i64,
    incoming_client_id: &str,
    incoming_checksum: &str,
    latest: &VersionRecord,
) -> bool {
    (incoming_last_modified - latest.last_modified).abs() < CONFLICT_THRESHOLD_MS
        && incoming_client_id != latest.client_id
        && incoming_checksum != latest.checksum
}

async fn read_documents<T: serde::de::DeserializeOwned>(
    dir: &Path,
) -> Result<Vec<T>, StorageError> {
    let mut documents = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with(TEMP_PREFIX) || !name.ends_with(".json") {
            continue;
        }
        let raw = tokio::fs::read(entry.path()).await?;
        match serde_json::from_slice(&raw) {
            Ok(document) => documents.push(document),
            Err(error) => {
                tracing::warn!(document = %name, %error, "skipping unreadable metadata document");
            }
        }
    }
    Ok(documents)
}

async fn write_document<T: serde::Serialize>(
    dir: &Path,
    path: &Path,
    document: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_vec(document)?;
    let temp_path = dir.join(format!("{TEMP_PREFIX}{}", FileId::generate()));
    let mut temp = tokio::fs::File::create(&temp_path).await?;
    temp.write_all(&raw).await?;
    temp.flush().await?;
    drop(temp);
    if let Err(error) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(error.into());
    }
    Ok(())
}
