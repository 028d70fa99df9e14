use std::path::PathBuf;

use boxsync_core::checksum::digest_hex;
use boxsync_core::protocol::VersionRecord;
use boxsync_core::validation::validate_file_name;
use boxsync_core::FileId;

use crate::conflict::record_fallback_conflict;
use crate::versioning::{commit_version, NewVersion};
use crate::{detect_conflict, ContentStore, MetadataStore, StorageError};

/// Reassembles numbered parts into whole files. Parts live in a scratch
/// directory as `<file_id>_<chunk_number>` until the set is complete.
pub struct ChunkAssembler {
    chunks_dir: PathBuf,
}

/// One part of a chunked upload.
pub struct ChunkPart<'a> {
    pub file_id: &'a str,
    pub chunk_number: u32,
    pub total_chunks: u32,
    pub file_name: &'a str,
    pub client_id: &'a str,
    pub last_modified: i64,
    pub bytes: &'a [u8],
}

#[derive(Debug)]
pub enum ChunkOutcome {
    /// Waiting on more parts.
    Pending { received: u32 },
    /// Assembled bytes equal the current latest version; nothing new stored.
    Duplicate { record: VersionRecord },
    /// Whole file materialized as a new version.
    Completed { record: VersionRecord },
}

impl ChunkAssembler {
    #[must_use]
    pub fn new(chunks_dir: PathBuf) -> Self {
        Self { chunks_dir }
    }

    fn part_path(&self, file_id: &str, chunk_number: u32) -> PathBuf {
        self.chunks_dir.join(format!("{file_id}_{chunk_number}"))
    }

    /// Persist one part; when the set is complete, assemble, verify, and
    /// materialize the whole file. Re-sending a part with the same bytes is
    /// a no-op retry (last writer wins per part).
    pub async fn accept(
        &self,
        content: &ContentStore,
        metadata: &MetadataStore,
        part: ChunkPart<'_>,
    ) -> Result<ChunkOutcome, StorageError> {
        validate_file_name(part.file_name)?;
        part.file_id
            .parse::<FileId>()
            .map_err(|error| StorageError::BadRequest(error.to_string()))?;
        if part.total_chunks == 0 {
            return Err(StorageError::BadRequest(
                "total_chunks must be at least 1".to_owned(),
            ));
        }
        if part.chunk_number == 0 || part.chunk_number > part.total_chunks {
            return Err(StorageError::BadRequest(format!(
                "chunk_number {} out of range 1..={}",
                part.chunk_number, part.total_chunks
            )));
        }
        if part.bytes.is_empty() {
            return Err(StorageError::Corrupt(format!(
                "chunk {} of {} is empty",
                part.chunk_number, part.file_id
            )));
        }

        tokio::fs::write(self.part_path(part.file_id, part.chunk_number), part.bytes).await?;

        let received = self.count_parts(part.file_id).await?;
        if received < part.total_chunks {
            return Ok(ChunkOutcome::Pending { received });
        }

        let blob = self.assemble(part.file_id, part.total_chunks).await?;
        let checksum = digest_hex(&blob);

        if let Some(latest) = metadata.get_latest(part.file_name).await? {
            if latest.checksum == checksum {
                self.scrub(part.file_id).await?;
                return Ok(ChunkOutcome::Duplicate { record: latest });
            }
            if detect_conflict(part.last_modified, part.client_id, &checksum, &latest) {
                let rejection = record_fallback_conflict(
                    content,
                    metadata,
                    part.file_name,
                    part.client_id,
                    part.last_modified,
                    &blob,
                    &latest,
                )
                .await?;
                self.scrub(part.file_id).await?;
                return Err(StorageError::Conflict(rejection));
            }
        }

        let record = commit_version(
            content,
            metadata,
            NewVersion {
                file_name: part.file_name,
                blob: &blob,
                client_id: part.client_id,
                last_modified: part.last_modified,
                file_id: Some(part.file_id.to_owned()),
                restored_from: None,
                conflicted_with: None,
            },
        )
        .await?;
        self.scrub(part.file_id).await?;
        Ok(ChunkOutcome::Completed { record })
    }

    /// Parts currently in scratch for an upload.
    pub async fn count_parts(&self, file_id: &str) -> Result<u32, StorageError> {
        let prefix = format!("{file_id}_");
        let mut count = 0;
        let mut entries = tokio::fs::read_dir(&self.chunks_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(&prefix) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn assemble(&self, file_id: &str, total_chunks: u32) -> Result<Vec<u8>, StorageError> {
        let mut blob = Vec::new();
        for n in 1..=total_chunks {
            let path = self.part_path(file_id, n);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StorageError::Corrupt(format!(
                        "chunk {n} of {file_id} is missing"
                    )));
                }
                Err(error) => return Err(error.into()),
            };
            if bytes.is_empty() {
                return Err(StorageError::Corrupt(format!(
                    "chunk {n} of {file_id} is empty"
                )));
            }
            blob.extend_from_slice(&bytes);
        }
        Ok(blob)
    }

    async fn scrub(&self, file_id: &str) -> Result<(), StorageError> {
        let prefix = format!("{file_id}_");
        let mut entries = tokio::fs::read_dir(&self.chunks_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(&prefix) {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rig {
        _temp: tempfile::TempDir,
        content: ContentStore,
        metadata: MetadataStore,
        assembler: ChunkAssembler,
        chunks_dir: PathBuf,
    }

    async fn rig() -> Rig {
        let temp = tempfile::tempdir().expect("tempdir");
        let layout = crate::StorageLayout::new(temp.path());
        layout.ensure().expect("ensure layout");
        Rig {
            content: ContentStore::new(layout.files_dir.clone(), layout.versions_dir.clone()),
            metadata: MetadataStore::open(
                layout.metadata_files_dir.clone(),
                layout.conflicts_dir.clone(),
            )
            .await
            .expect("open metadata"),
            assembler: ChunkAssembler::new(layout.chunks_dir.clone()),
            chunks_dir: layout.chunks_dir,
            _temp: temp,
        }
    }

    fn part<'a>(
        file_id: &'a str,
        chunk_number: u32,
        total_chunks: u32,
        bytes: &'a [u8],
    ) -> ChunkPart<'a> {
        ChunkPart {
            file_id,
            chunk_number,
            total_chunks,
            file_name: "big.bin",
            client_id: "alice",
            last_modified: 1_704_067_200_000,
            bytes,
        }
    }

    fn scratch_is_empty(dir: &PathBuf) -> bool {
        std::fs::read_dir(dir).expect("read scratch").next().is_none()
    }

    #[tokio::test]
    async fn single_chunk_materializes_immediately() {
        let rig = rig().await;
        let outcome = rig
            .assembler
            .accept(&rig.content, &rig.metadata, part("aaaa000000000001", 1, 1, b"tiny"))
            .await
            .expect("accept");

        let ChunkOutcome::Completed { record } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(record.version, 1);
        assert_eq!(
            rig.content.get("big.bin", None).await.expect("current"),
            b"tiny"
        );
        assert!(scratch_is_empty(&rig.chunks_dir));
    }

    #[tokio::test]
    async fn parts_assemble_in_numeric_order_regardless_of_arrival() {
        let rig = rig().await;
        let id = "aaaa000000000001";

        let first = rig
            .assembler
            .accept(&rig.content, &rig.metadata, part(id, 3, 3, b"cc"))
            .await
            .expect("part 3");
        assert!(matches!(first, ChunkOutcome::Pending { received: 1 }));

        let second = rig
            .assembler
            .accept(&rig.content, &rig.metadata, part(id, 1, 3, b"aa"))
            .await
            .expect("part 1");
        assert!(matches!(second, ChunkOutcome::Pending { received: 2 }));

        let third = rig
            .assembler
            .accept(&rig.content, &rig.metadata, part(id, 2, 3, b"bb"))
            .await
            .expect("part 2");
        let ChunkOutcome::Completed { record } = third else {
            panic!("expected completion");
        };
        assert_eq!(record.version, 1);
        assert_eq!(record.size, 6);
        assert_eq!(
            rig.content.get("big.bin", None).await.expect("current"),
            b"aabbcc"
        );
        assert!(scratch_is_empty(&rig.chunks_dir));
    }

    #[tokio::test]
    async fn resent_part_is_an_idempotent_retry() {
        let rig = rig().await;
        let id = "aaaa000000000001";

        rig.assembler
            .accept(&rig.content, &rig.metadata, part(id, 1, 2, b"aa"))
            .await
            .expect("part 1");
        let resent = rig
            .assembler
            .accept(&rig.content, &rig.metadata, part(id, 1, 2, b"aa"))
            .await
            .expect("part 1 retry");
        assert!(matches!(resent, ChunkOutcome::Pending { received: 1 }));

        let done = rig
            .assembler
            .accept(&rig.content, &rig.metadata, part(id, 2, 2, b"bb"))
            .await
            .expect("part 2");
        assert!(matches!(done, ChunkOutcome::Completed { .. }));
        assert_eq!(
            rig.content.get("big.bin", None).await.expect("current"),
            b"aabb"
        );
    }

    #[tokio::test]
    async fn empty_chunk_is_corrupt() {
        let rig = rig().await;
        assert!(matches!(
            rig.assembler
                .accept(&rig.content, &rig.metadata, part("aaaa000000000001", 1, 2, b""))
                .await,
            Err(StorageError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn out_of_range_chunk_number_is_rejected() {
        let rig = rig().await;
        assert!(matches!(
            rig.assembler
                .accept(&rig.content, &rig.metadata, part("aaaa000000000001", 0, 2, b"x"))
                .await,
            Err(StorageError::BadRequest(_))
        ));
        assert!(matches!(
            rig.assembler
                .accept(&rig.content, &rig.metadata, part("aaaa000000000001", 3, 2, b"x"))
                .await,
            Err(StorageError::BadRequest(_))
        ));
        assert!(matches!(
            rig.assembler
                .accept(&rig.content, &rig.metadata, part("not-hex", 1, 1, b"x"))
                .await,
            Err(StorageError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_of_latest_creates_no_new_version() {
        let rig = rig().await;

        let first = rig
            .assembler
            .accept(&rig.content, &rig.metadata, part("aaaa000000000001", 1, 1, b"same"))
            .await
            .expect("first upload");
        assert!(matches!(first, ChunkOutcome::Completed { .. }));

        let second = rig
            .assembler
            .accept(&rig.content, &rig.metadata, part("bbbb000000000002", 1, 1, b"same"))
            .await
            .expect("duplicate upload");
        let ChunkOutcome::Duplicate { record } = second else {
            panic!("expected duplicate");
        };
        assert_eq!(record.version, 1);
        assert_eq!(
            rig.metadata
                .get_all_versions("big.bin")
                .await
                .expect("versions")
                .len(),
            1
        );
        assert!(scratch_is_empty(&rig.chunks_dir));
    }

    #[tokio::test]
    async fn concurrent_chunked_upload_falls_back_to_threshold_detection() {
        let rig = rig().await;

        let mut alice = part("aaaa000000000001", 1, 1, b"A");
        alice.file_name = "note.txt";
        let stored = rig
            .assembler
            .accept(&rig.content, &rig.metadata, alice)
            .await
            .expect("alice upload");
        assert!(matches!(stored, ChunkOutcome::Completed { .. }));

        let mut bob = part("bbbb000000000002", 1, 1, b"B");
        bob.file_name = "note.txt";
        bob.client_id = "bob";
        bob.last_modified += 1_000;
        let error = rig
            .assembler
            .accept(&rig.content, &rig.metadata, bob)
            .await
            .expect_err("bob must conflict");

        let StorageError::Conflict(rejection) = error else {
            panic!("expected conflict, got {error:?}");
        };
        assert_eq!(rejection.conflict_file_name, "note_conflicted_by_bob.txt");
        assert_eq!(
            rig.content
                .get("note_conflicted_by_bob.txt", None)
                .await
                .expect("conflict copy"),
            b"B"
        );
        assert_eq!(rig.metadata.get_conflicts().await.expect("conflicts").len(), 1);
        assert!(scratch_is_empty(&rig.chunks_dir));
    }

    #[tokio::test]
    async fn three_part_upload_round_trips_exact_boundaries() {
        let rig = rig().await;
        let id = "aaaa000000000001";
        // Scaled stand-in for the 10 MiB / 10 MiB / 5 MiB split.
        let parts: [&[u8]; 3] = [&[1u8; 1024][..], &[2u8; 1024][..], &[3u8; 512][..]];

        for (i, bytes) in parts.iter().enumerate() {
            let outcome = rig
                .assembler
                .accept(&rig.content, &rig.metadata, part(id, i as u32 + 1, 3, bytes))
                .await
                .expect("part");
            if i < 2 {
                assert!(matches!(outcome, ChunkOutcome::Pending { .. }));
            } else {
                let ChunkOutcome::Completed { record } = outcome else {
                    panic!("expected completion");
                };
                assert_eq!(record.version, 1);
                assert_eq!(record.size, 2560);
            }
        }

        let whole = rig.content.get("big.bin", None).await.expect("current");
        let expected: Vec<u8> = parts.concat();
        assert_eq!(whole, expected);
        assert!(scratch_is_empty(&rig.chunks_dir));
    }
}
