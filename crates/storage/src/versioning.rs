use boxsync_core::protocol::VersionRecord;
use boxsync_core::FileId;

use crate::{ContentStore, MetadataStore, StorageError};

/// Two workers can race `next_version`; the versioned blob path is the
/// arbiter, so a handful of retries always lands on a free number.
const MAX_VERSION_RETRIES: usize = 32;

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Everything needed to persist one new version of a logical file.
pub struct NewVersion<'a> {
    pub file_name: &'a str,
    pub blob: &'a [u8],
    pub client_id: &'a str,
    pub last_modified: i64,
    /// Reuse the uploader's id when it supplied one (chunked uploads).
    pub file_id: Option<String>,
    pub restored_from: Option<u64>,
    /// Set for conflict copies: the file name the losing bytes diverged from.
    pub conflicted_with: Option<&'a str>,
}

/// Allocate the next version number, persist the blob, and write the
/// metadata record. Collisions on the versioned path bump the candidate
/// number and retry.
pub async fn commit_version(
    content: &ContentStore,
    metadata: &MetadataStore,
    new: NewVersion<'_>,
) -> Result<VersionRecord, StorageError> {
    let mut version = metadata.next_version(new.file_name).await?;

    for _ in 0..MAX_VERSION_RETRIES {
        match content.save(new.file_name, new.blob, version).await {
            Ok(saved) => {
                let now = now_rfc3339();
                let record = VersionRecord {
                    file_id: new
                        .file_id
                        .clone()
                        .unwrap_or_else(|| FileId::generate().to_string()),
                    file_name: new.file_name.to_owned(),
                    version,
                    size: saved.size,
                    checksum: saved.checksum,
                    client_id: new.client_id.to_owned(),
                    last_modified: new.last_modified,
                    created_at: now.clone(),
                    updated_at: now,
                    restored_from: new.restored_from,
                    conflict: new.conflicted_with.is_some(),
                    conflicted_with: new.conflicted_with.map(ToOwned::to_owned),
                };
                metadata.save(&record).await?;
                return Ok(record);
            }
            Err(StorageError::VersionExists { .. }) => {
                version += 1;
            }
            Err(other) => return Err(other),
        }
    }

    Err(StorageError::VersionExists {
        file_name: new.file_name.to_owned(),
        version,
    })
}
