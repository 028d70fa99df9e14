use serde::{Deserialize, Serialize};

pub const CONFLICT_TYPE_CONCURRENT: &str = "concurrent_modification";
pub const CONFLICT_TYPE_MULTI_CLIENT: &str = "multi_client_concurrent_modification";

/// One immutable version of a logical file. Written once by a successful
/// upload and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    #[serde(rename = "file_id")]
    pub file_id: String,
    #[serde(rename = "file_name")]
    pub file_name: String,
    #[serde(rename = "version")]
    pub version: u64,
    #[serde(rename = "size")]
    pub size: u64,
    #[serde(rename = "checksum")]
    pub checksum: String,
    #[serde(rename = "client_id")]
    pub client_id: String,
    /// Client-supplied source mtime, epoch milliseconds.
    #[serde(rename = "last_modified")]
    pub last_modified: i64,
    #[serde(rename = "created_at")]
    pub created_at: String,
    #[serde(rename = "updated_at")]
    pub updated_at: String,
    #[serde(rename = "restored_from", default, skip_serializing_if = "Option::is_none")]
    pub restored_from: Option<u64>,
    #[serde(rename = "conflict", default, skip_serializing_if = "is_false")]
    pub conflict: bool,
    #[serde(rename = "conflicted_with", default, skip_serializing_if = "Option::is_none")]
    pub conflicted_with: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStatus {
    Unresolved,
    Resolved,
}

/// A losing upload diverted into a conflict copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoserRecord {
    #[serde(rename = "record")]
    pub record: VersionRecord,
    #[serde(rename = "conflict_file_name")]
    pub conflict_file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    #[serde(rename = "method")]
    pub method: String,
    #[serde(rename = "keep_version", default, skip_serializing_if = "Option::is_none")]
    pub keep_version: Option<u64>,
    #[serde(rename = "client_id")]
    pub client_id: String,
}

/// Detection outcome for simultaneous modification of one file name.
/// Mutable only to append a resolution, exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    #[serde(rename = "id")]
    pub id: String,
    #[serde(rename = "file_name")]
    pub file_name: String,
    #[serde(rename = "reason")]
    pub reason: String,
    #[serde(rename = "conflict_type")]
    pub conflict_type: String,
    #[serde(rename = "winner")]
    pub winner: VersionRecord,
    #[serde(rename = "losers")]
    pub losers: Vec<LoserRecord>,
    #[serde(rename = "all_clients")]
    pub all_clients: Vec<String>,
    #[serde(rename = "timestamp")]
    pub timestamp: String,
    #[serde(rename = "status")]
    pub status: ConflictStatus,
    #[serde(rename = "resolution", default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
    #[serde(rename = "resolved_at", default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<String>,
    /// Stable key over the sorted (client_id, checksum) pairs, used to
    /// suppress duplicate records for one detection event.
    #[serde(rename = "conflict_key")]
    pub conflict_key: String,
}

/// Derive the stable conflict key from the participating uploads.
#[must_use]
pub fn conflict_key(pairs: &[(String, String)]) -> String {
    let mut sorted: Vec<String> = pairs
        .iter()
        .map(|(client_id, checksum)| format!("{client_id}:{checksum}"))
        .collect();
    sorted.sort();
    sorted.dedup();
    sorted.join("|")
}

/// Conflict copy name for a losing client: `<base>_conflicted_by_<client><ext>`.
#[must_use]
pub fn conflict_copy_name(file_name: &str, client_id: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() => {
            format!("{base}_conflicted_by_{client_id}.{ext}")
        }
        _ => format!("{file_name}_conflicted_by_{client_id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: u64) -> VersionRecord {
        VersionRecord {
            file_id: "0123456789abcdef".to_owned(),
            file_name: "note.txt".to_owned(),
            version,
            size: 1,
            checksum: "ca97".to_owned(),
            client_id: "alice".to_owned(),
            last_modified: 1_704_067_200_000,
            created_at: "2024-01-01T00:00:00+00:00".to_owned(),
            updated_at: "2024-01-01T00:00:00+00:00".to_owned(),
            restored_from: None,
            conflict: false,
            conflicted_with: None,
        }
    }

    #[test]
    fn version_record_json_round_trip() {
        let original = record(1);
        let encoded = serde_json::to_string(&original).expect("encode");
        let decoded: VersionRecord = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, original);
    }

    #[test]
    fn version_record_omits_empty_optionals() {
        let encoded = serde_json::to_string(&record(1)).expect("encode");
        assert!(!encoded.contains("restored_from"));
        assert!(!encoded.contains("\"conflict\""));
        assert!(!encoded.contains("conflicted_with"));
    }

    #[test]
    fn version_record_tolerates_missing_optionals() {
        let minimal = r#"{
            "file_id": "0123456789abcdef",
            "file_name": "note.txt",
            "version": 1,
            "size": 1,
            "checksum": "ca97",
            "client_id": "alice",
            "last_modified": 0,
            "created_at": "2024-01-01T00:00:00+00:00",
            "updated_at": "2024-01-01T00:00:00+00:00"
        }"#;
        let decoded: VersionRecord = serde_json::from_str(minimal).expect("decode");
        assert!(!decoded.conflict);
        assert_eq!(decoded.restored_from, None);
    }

    #[test]
    fn conflict_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConflictStatus::Unresolved).expect("encode"),
            "\"unresolved\""
        );
        assert_eq!(
            serde_json::to_string(&ConflictStatus::Resolved).expect("encode"),
            "\"resolved\""
        );
    }

    #[test]
    fn conflict_key_is_order_independent() {
        let forward = conflict_key(&[
            ("alice".to_owned(), "aaa".to_owned()),
            ("bob".to_owned(), "bbb".to_owned()),
        ]);
        let reverse = conflict_key(&[
            ("bob".to_owned(), "bbb".to_owned()),
            ("alice".to_owned(), "aaa".to_owned()),
        ]);
        assert_eq!(forward, reverse);
        assert_eq!(forward, "alice:aaa|bob:bbb");
    }

    #[test]
    fn conflict_copy_name_preserves_extension() {
        assert_eq!(
            conflict_copy_name("note.txt", "bob"),
            "note_conflicted_by_bob.txt"
        );
        assert_eq!(conflict_copy_name("README", "bob"), "README_conflicted_by_bob");
        assert_eq!(
            conflict_copy_name("archive.tar.gz", "bob"),
            "archive.tar_conflicted_by_bob.gz"
        );
        // Leading-dot names have no base to split on.
        assert_eq!(
            conflict_copy_name(".gitignore", "bob"),
            ".gitignore_conflicted_by_bob"
        );
    }
}
