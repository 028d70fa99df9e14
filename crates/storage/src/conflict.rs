use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use boxsync_core::checksum::digest_hex;
use boxsync_core::protocol::{
    conflict_copy_name, conflict_key, ConflictPeer, ConflictRecord, ConflictRejection,
    ConflictStatus, LoserRecord, VersionRecord, CONFLICT_ALREADY_EXISTS, CONFLICT_TYPE_CONCURRENT,
    CONFLICT_TYPE_MULTI_CLIENT,
};
use boxsync_core::validation::validate_file_name;
use boxsync_core::{ConflictId, FileId};
use tokio::sync::Mutex;

use crate::metadata::detect_conflict;
use crate::versioning::{commit_version, now_rfc3339, NewVersion};
use crate::{ContentStore, MetadataStore, StorageError};

/// How long an upload stays visible to later arrivals for the same name.
pub const CONFLICT_WINDOW: Duration = Duration::from_millis(10_000);

#[derive(Clone)]
struct WindowEntry {
    client_id: String,
    checksum: String,
    last_modified: i64,
    blob: Vec<u8>,
    file_id: String,
    arrived_at: Instant,
}

/// One safe upload as the engine sees it.
pub struct UploadRequest<'a> {
    pub file_name: &'a str,
    pub client_id: &'a str,
    pub last_modified: i64,
    pub bytes: &'a [u8],
}

#[derive(Debug)]
pub enum SafeUploadOutcome {
    /// Incoming bytes equal the current latest version.
    AlreadyUpToDate { record: VersionRecord },
    /// No conflict; stored as the next version.
    Stored { record: VersionRecord },
    /// A conflict fired and this client's upload was promoted.
    ConflictWinner {
        record: VersionRecord,
        conflict_id: String,
    },
    /// A conflict fired and this client's bytes went to a conflict copy.
    ConflictLoser(Box<ConflictRejection>),
}

/// Sliding-window conflict detection for the safe-upload path.
///
/// The window is keyed by file name and lives in this process only; the
/// metadata threshold fallback backstops uploads that land on different
/// workers. The lock is held across the whole upload so detection and
/// materialization are serialized per process.
pub struct ConflictEngine {
    window: Mutex<HashMap<String, Vec<WindowEntry>>>,
    window_duration: Duration,
}

impl Default for ConflictEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConflictEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::with_window(CONFLICT_WINDOW)
    }

    #[must_use]
    pub fn with_window(window_duration: Duration) -> Self {
        Self {
            window: Mutex::new(HashMap::new()),
            window_duration,
        }
    }

    pub async fn upload_safe(
        &self,
        content: &ContentStore,
        metadata: &MetadataStore,
        request: UploadRequest<'_>,
    ) -> Result<SafeUploadOutcome, StorageError> {
        validate_file_name(request.file_name)?;
        let checksum = digest_hex(request.bytes);

        let mut window = self.window.lock().await;
        gc_window(&mut window, self.window_duration);

        let latest = metadata.get_latest(request.file_name).await?;
        if let Some(latest) = &latest {
            if latest.checksum == checksum {
                return Ok(SafeUploadOutcome::AlreadyUpToDate {
                    record: latest.clone(),
                });
            }
        }

        let entries = window.entry(request.file_name.to_owned()).or_default();
        entries.push(WindowEntry {
            client_id: request.client_id.to_owned(),
            checksum: checksum.clone(),
            last_modified: request.last_modified,
            blob: request.bytes.to_vec(),
            file_id: FileId::generate().to_string(),
            arrived_at: Instant::now(),
        });
        dedup_entries(entries);
        let candidates = entries.clone();

        let distinct_clients = candidates
            .iter()
            .map(|entry| entry.client_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        if distinct_clients >= 2 {
            return self
                .materialize_window_conflict(
                    content,
                    metadata,
                    request.file_name,
                    request.client_id,
                    &candidates,
                )
                .await;
        }

        // Single client in the window. A near-simultaneous upload may still
        // have landed on another worker; the threshold fallback catches it.
        if let Some(latest) = &latest {
            if detect_conflict(request.last_modified, request.client_id, &checksum, latest) {
                let rejection = record_fallback_conflict(
                    content,
                    metadata,
                    request.file_name,
                    request.client_id,
                    request.last_modified,
                    request.bytes,
                    latest,
                )
                .await?;
                return Ok(SafeUploadOutcome::ConflictLoser(rejection));
            }
        }

        let record = commit_version(
            content,
            metadata,
            NewVersion {
                file_name: request.file_name,
                blob: request.bytes,
                client_id: request.client_id,
                last_modified: request.last_modified,
                file_id: None,
                restored_from: None,
                conflicted_with: None,
            },
        )
        .await?;
        Ok(SafeUploadOutcome::Stored { record })
    }

    async fn materialize_window_conflict(
        &self,
        content: &ContentStore,
        metadata: &MetadataStore,
        file_name: &str,
        requester: &str,
        candidates: &[WindowEntry],
    ) -> Result<SafeUploadOutcome, StorageError> {
        let pairs: Vec<(String, String)> = candidates
            .iter()
            .map(|entry| (entry.client_id.clone(), entry.checksum.clone()))
            .collect();
        let key = conflict_key(&pairs);

        // A later-arriving loser for an already-processed set gets a 409
        // referencing the existing record, and nothing new is written.
        if let Some(existing) = metadata.find_conflict_by_key(&key).await? {
            return Ok(SafeUploadOutcome::ConflictLoser(Box::new(
                rejection_from_conflict(&existing, requester, CONFLICT_ALREADY_EXISTS),
            )));
        }

        let mut sorted = candidates.to_vec();
        sorted.sort_by_key(|entry| entry.last_modified);
        let Some((winner, losers)) = sorted.split_first() else {
            return Err(StorageError::BadRequest(
                "conflict window unexpectedly empty".to_owned(),
            ));
        };

        let winner_record = match metadata.get_latest(file_name).await? {
            Some(latest) if latest.checksum == winner.checksum => latest,
            _ => {
                commit_version(
                    content,
                    metadata,
                    NewVersion {
                        file_name,
                        blob: &winner.blob,
                        client_id: &winner.client_id,
                        last_modified: winner.last_modified,
                        file_id: Some(winner.file_id.clone()),
                        restored_from: None,
                        conflicted_with: None,
                    },
                )
                .await?
            }
        };

        let mut loser_records = Vec::with_capacity(losers.len());
        for loser in losers {
            let copy_name = conflict_copy_name(file_name, &loser.client_id);
            let record = commit_version(
                content,
                metadata,
                NewVersion {
                    file_name: &copy_name,
                    blob: &loser.blob,
                    client_id: &loser.client_id,
                    last_modified: loser.last_modified,
                    file_id: Some(loser.file_id.clone()),
                    restored_from: None,
                    conflicted_with: Some(file_name),
                },
            )
            .await?;
            loser_records.push(LoserRecord {
                record,
                conflict_file_name: copy_name,
            });
        }

        let mut all_clients: Vec<String> = candidates
            .iter()
            .map(|entry| entry.client_id.clone())
            .collect();
        all_clients.sort();
        all_clients.dedup();

        let conflict_id = ConflictId::generate().to_string();
        let conflict = ConflictRecord {
            id: conflict_id.clone(),
            file_name: file_name.to_owned(),
            reason: "multiple clients modified the file inside the upload window".to_owned(),
            conflict_type: CONFLICT_TYPE_MULTI_CLIENT.to_owned(),
            winner: winner_record.clone(),
            losers: loser_records,
            all_clients,
            timestamp: now_rfc3339(),
            status: ConflictStatus::Unresolved,
            resolution: None,
            resolved_at: None,
            conflict_key: key,
        };
        metadata.save_conflict(&conflict).await?;
        tracing::warn!(
            file = %file_name,
            id = %conflict_id,
            losers = conflict.losers.len(),
            "multi-client conflict materialized"
        );

        if requester == winner.client_id {
            Ok(SafeUploadOutcome::ConflictWinner {
                record: winner_record,
                conflict_id,
            })
        } else {
            Ok(SafeUploadOutcome::ConflictLoser(Box::new(
                rejection_from_conflict(&conflict, requester, &conflict_id),
            )))
        }
    }
}

/// Threshold-fallback materialization: the stored latest version stays the
/// winner and the incoming bytes become a conflict copy. Shared by the
/// chunked path and the cross-worker backstop on the safe path.
pub(crate) async fn record_fallback_conflict(
    content: &ContentStore,
    metadata: &MetadataStore,
    file_name: &str,
    client_id: &str,
    last_modified: i64,
    blob: &[u8],
    latest: &VersionRecord,
) -> Result<Box<ConflictRejection>, StorageError> {
    let checksum = digest_hex(blob);
    let key = conflict_key(&[
        (latest.client_id.clone(), latest.checksum.clone()),
        (client_id.to_owned(), checksum),
    ]);
    if let Some(existing) = metadata.find_conflict_by_key(&key).await? {
        return Ok(Box::new(rejection_from_conflict(
            &existing,
            client_id,
            CONFLICT_ALREADY_EXISTS,
        )));
    }

    let copy_name = conflict_copy_name(file_name, client_id);
    let record = commit_version(
        content,
        metadata,
        NewVersion {
            file_name: &copy_name,
            blob,
            client_id,
            last_modified,
            file_id: None,
            restored_from: None,
            conflicted_with: Some(file_name),
        },
    )
    .await?;

    let mut all_clients = vec![latest.client_id.clone(), client_id.to_owned()];
    all_clients.sort();
    all_clients.dedup();

    let conflict = ConflictRecord {
        id: ConflictId::generate().to_string(),
        file_name: file_name.to_owned(),
        reason: "concurrent modification within the detection threshold".to_owned(),
        conflict_type: CONFLICT_TYPE_CONCURRENT.to_owned(),
        winner: latest.clone(),
        losers: vec![LoserRecord {
            record,
            conflict_file_name: copy_name,
        }],
        all_clients,
        timestamp: now_rfc3339(),
        status: ConflictStatus::Unresolved,
        resolution: None,
        resolved_at: None,
        conflict_key: key,
    };
    metadata.save_conflict(&conflict).await?;
    tracing::warn!(file = %file_name, id = %conflict.id, "threshold conflict materialized");

    let rejection = rejection_from_conflict(&conflict, client_id, &conflict.id);
    Ok(Box::new(rejection))
}

fn rejection_from_conflict(
    conflict: &ConflictRecord,
    requester: &str,
    conflict_id: &str,
) -> ConflictRejection {
    let conflict_file_name = conflict
        .losers
        .iter()
        .find(|loser| loser.record.client_id == requester)
        .map(|loser| loser.conflict_file_name.clone())
        .unwrap_or_else(|| conflict_copy_name(&conflict.file_name, requester));

    ConflictRejection {
        error: "conflict".to_owned(),
        message: format!(
            "{} was modified concurrently; losing changes were preserved as {}",
            conflict.file_name, conflict_file_name
        ),
        file_name: conflict.file_name.clone(),
        winner: ConflictPeer {
            client_id: conflict.winner.client_id.clone(),
            last_modified: conflict.winner.last_modified,
        },
        losers: conflict
            .losers
            .iter()
            .map(|loser| ConflictPeer {
                client_id: loser.record.client_id.clone(),
                last_modified: loser.record.last_modified,
            })
            .collect(),
        conflict_file_name,
        conflict_id: conflict_id.to_owned(),
    }
}

fn gc_window(window: &mut HashMap<String, Vec<WindowEntry>>, duration: Duration) {
    window.retain(|_, entries| {
        entries.retain(|entry| entry.arrived_at.elapsed() <= duration);
        !entries.is_empty()
    });
}

/// Keep the earliest-arriving entry per (client_id, checksum) pair.
fn dedup_entries(entries: &mut Vec<WindowEntry>) {
    let mut seen = HashSet::new();
    entries.retain(|entry| seen.insert((entry.client_id.clone(), entry.checksum.clone())));
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rig {
        _temp: tempfile::TempDir,
        content: ContentStore,
        metadata: MetadataStore,
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
            _temp: temp,
        }
    }

    fn request<'a>(name: &'a str, client: &'a str, last_modified: i64, bytes: &'a [u8]) -> UploadRequest<'a> {
        UploadRequest {
            file_name: name,
            client_id: client,
            last_modified,
            bytes,
        }
    }

    const T0: i64 = 1_704_067_200_000;

    #[tokio::test]
    async fn non_conflicting_uploads_store_sequential_versions() {
        let rig = rig().await;
        let engine = ConflictEngine::new();

        let first = engine
            .upload_safe(&rig.content, &rig.metadata, request("note.txt", "alice", T0, b"a"))
            .await
            .expect("first upload");
        let SafeUploadOutcome::Stored { record } = first else {
            panic!("expected stored, got {first:?}");
        };
        assert_eq!(record.version, 1);

        let second = engine
            .upload_safe(
                &rig.content,
                &rig.metadata,
                request("note.txt", "alice", T0 + 60_000, b"ab"),
            )
            .await
            .expect("second upload");
        let SafeUploadOutcome::Stored { record } = second else {
            panic!("expected stored, got {second:?}");
        };
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn identical_reupload_short_circuits() {
        let rig = rig().await;
        let engine = ConflictEngine::new();

        engine
            .upload_safe(&rig.content, &rig.metadata, request("note.txt", "alice", T0, b"a"))
            .await
            .expect("upload");
        let replay = engine
            .upload_safe(
                &rig.content,
                &rig.metadata,
                request("note.txt", "alice", T0 + 1_000, b"a"),
            )
            .await
            .expect("replay");

        let SafeUploadOutcome::AlreadyUpToDate { record } = replay else {
            panic!("expected up-to-date, got {replay:?}");
        };
        assert_eq!(record.version, 1);
        assert_eq!(
            rig.metadata
                .get_all_versions("note.txt")
                .await
                .expect("versions")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn second_client_inside_window_loses_and_gets_a_conflict_copy() {
        let rig = rig().await;
        let engine = ConflictEngine::new();

        let alice = engine
            .upload_safe(
                &rig.content,
                &rig.metadata,
                request("note.txt", "alice", T0 - 100, b"A"),
            )
            .await
            .expect("alice upload");
        assert!(matches!(alice, SafeUploadOutcome::Stored { .. }));

        let bob = engine
            .upload_safe(
                &rig.content,
                &rig.metadata,
                request("note.txt", "bob", T0 + 900, b"B"),
            )
            .await
            .expect("bob upload");
        let SafeUploadOutcome::ConflictLoser(rejection) = bob else {
            panic!("expected loser, got {bob:?}");
        };
        assert_eq!(rejection.conflict_file_name, "note_conflicted_by_bob.txt");
        assert_eq!(rejection.winner.client_id, "alice");
        assert_ne!(rejection.conflict_id, CONFLICT_ALREADY_EXISTS);

        // Winner stays latest; loser bytes live under the conflict copy.
        assert_eq!(
            rig.content.get("note.txt", None).await.expect("current"),
            b"A"
        );
        assert_eq!(
            rig.content
                .get("note_conflicted_by_bob.txt", None)
                .await
                .expect("copy"),
            b"B"
        );

        let conflicts = rig.metadata.get_conflicts().await.expect("conflicts");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].status, ConflictStatus::Unresolved);
        assert_eq!(conflicts[0].winner.client_id, "alice");
        assert_eq!(conflicts[0].losers[0].record.client_id, "bob");
        assert_eq!(conflicts[0].all_clients, ["alice", "bob"]);

        let copy_record = rig
            .metadata
            .get_latest("note_conflicted_by_bob.txt")
            .await
            .expect("copy latest")
            .expect("some");
        assert!(copy_record.conflict);
        assert_eq!(copy_record.conflicted_with.as_deref(), Some("note.txt"));
    }

    #[tokio::test]
    async fn replayed_loser_gets_already_exists_and_no_new_records() {
        let rig = rig().await;
        let engine = ConflictEngine::new();

        engine
            .upload_safe(
                &rig.content,
                &rig.metadata,
                request("note.txt", "alice", T0 - 100, b"A"),
            )
            .await
            .expect("alice upload");
        engine
            .upload_safe(
                &rig.content,
                &rig.metadata,
                request("note.txt", "bob", T0 + 900, b"B"),
            )
            .await
            .expect("bob upload");

        let copies_before = rig
            .metadata
            .get_all_versions("note_conflicted_by_bob.txt")
            .await
            .expect("copies")
            .len();

        let replay = engine
            .upload_safe(
                &rig.content,
                &rig.metadata,
                request("note.txt", "bob", T0 + 900, b"B"),
            )
            .await
            .expect("bob replay");
        let SafeUploadOutcome::ConflictLoser(rejection) = replay else {
            panic!("expected loser, got {replay:?}");
        };
        assert_eq!(rejection.conflict_id, CONFLICT_ALREADY_EXISTS);

        assert_eq!(rig.metadata.get_conflicts().await.expect("conflicts").len(), 1);
        assert_eq!(
            rig.metadata
                .get_all_versions("note_conflicted_by_bob.txt")
                .await
                .expect("copies")
                .len(),
            copies_before
        );
    }

    #[tokio::test]
    async fn earliest_mtime_wins_even_when_it_arrives_second() {
        let rig = rig().await;
        let engine = ConflictEngine::new();

        // Bob lands first with the later source mtime.
        let bob = engine
            .upload_safe(
                &rig.content,
                &rig.metadata,
                request("note.txt", "bob", T0 + 900, b"B"),
            )
            .await
            .expect("bob upload");
        assert!(matches!(bob, SafeUploadOutcome::Stored { .. }));

        let alice = engine
            .upload_safe(
                &rig.content,
                &rig.metadata,
                request("note.txt", "alice", T0 - 100, b"A"),
            )
            .await
            .expect("alice upload");
        let SafeUploadOutcome::ConflictWinner { record, conflict_id } = alice else {
            panic!("expected winner, got {alice:?}");
        };
        assert_eq!(record.client_id, "alice");
        assert!(!conflict_id.is_empty());

        // Alice was promoted to the next version and bob got the copy.
        assert_eq!(
            rig.content.get("note.txt", None).await.expect("current"),
            b"A"
        );
        assert_eq!(
            rig.content
                .get("note_conflicted_by_bob.txt", None)
                .await
                .expect("copy"),
            b"B"
        );
    }

    #[tokio::test]
    async fn three_clients_produce_one_record_with_two_losers() {
        let rig = rig().await;
        let engine = ConflictEngine::new();

        engine
            .upload_safe(&rig.content, &rig.metadata, request("note.txt", "alice", T0, b"A"))
            .await
            .expect("alice");
        engine
            .upload_safe(
                &rig.content,
                &rig.metadata,
                request("note.txt", "bob", T0 + 500, b"B"),
            )
            .await
            .expect("bob");
        engine
            .upload_safe(
                &rig.content,
                &rig.metadata,
                request("note.txt", "carol", T0 + 800, b"C"),
            )
            .await
            .expect("carol");

        let conflicts = rig.metadata.get_conflicts().await.expect("conflicts");
        // Bob's arrival recorded {alice,bob}; carol's arrival widened the set.
        assert_eq!(conflicts.len(), 2);
        let widened = conflicts
            .iter()
            .find(|c| c.all_clients.len() == 3)
            .expect("three-way record");
        assert_eq!(widened.winner.client_id, "alice");
        assert!(rig
            .content
            .get("note_conflicted_by_carol.txt", None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn expired_window_entries_do_not_conflict() {
        let rig = rig().await;
        let engine = ConflictEngine::with_window(Duration::from_millis(40));

        engine
            .upload_safe(&rig.content, &rig.metadata, request("note.txt", "alice", T0, b"A"))
            .await
            .expect("alice upload");
        tokio::time::sleep(Duration::from_millis(80)).await;

        // Far-apart mtimes: the threshold fallback stays quiet too.
        let bob = engine
            .upload_safe(
                &rig.content,
                &rig.metadata,
                request("note.txt", "bob", T0 + 60_000, b"B"),
            )
            .await
            .expect("bob upload");
        let SafeUploadOutcome::Stored { record } = bob else {
            panic!("expected stored, got {bob:?}");
        };
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn threshold_fallback_fires_when_window_missed_the_pair() {
        let rig = rig().await;
        let engine = ConflictEngine::with_window(Duration::from_millis(40));

        engine
            .upload_safe(&rig.content, &rig.metadata, request("note.txt", "alice", T0, b"A"))
            .await
            .expect("alice upload");
        // Window forgets alice, as if her upload had landed on another worker.
        tokio::time::sleep(Duration::from_millis(80)).await;

        let bob = engine
            .upload_safe(
                &rig.content,
                &rig.metadata,
                request("note.txt", "bob", T0 + 900, b"B"),
            )
            .await
            .expect("bob upload");
        let SafeUploadOutcome::ConflictLoser(rejection) = bob else {
            panic!("expected loser, got {bob:?}");
        };
        assert_eq!(rejection.winner.client_id, "alice");

        let conflicts = rig.metadata.get_conflicts().await.expect("conflicts");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, CONFLICT_TYPE_CONCURRENT);
    }

    #[tokio::test]
    async fn single_client_rapid_edits_never_conflict_with_themselves() {
        let rig = rig().await;
        let engine = ConflictEngine::new();

        engine
            .upload_safe(&rig.content, &rig.metadata, request("note.txt", "alice", T0, b"a"))
            .await
            .expect("first");
        let second = engine
            .upload_safe(
                &rig.content,
                &rig.metadata,
                request("note.txt", "alice", T0 + 200, b"ab"),
            )
            .await
            .expect("second");

        let SafeUploadOutcome::Stored { record } = second else {
            panic!("expected stored, got {second:?}");
        };
        assert_eq!(record.version, 2);
        assert!(rig.metadata.get_conflicts().await.expect("conflicts").is_empty());
    }
}
