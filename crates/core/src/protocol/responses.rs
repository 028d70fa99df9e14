use serde::{Deserialize, Serialize};

use super::types::{ConflictRecord, VersionRecord};

/// Error body for every non-2xx JSON response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "error")]
    pub error: String,
    #[serde(rename = "message", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "action", default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: None,
            action: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    #[serde(rename = "status")]
    pub status: String,
    #[serde(rename = "uptime_secs")]
    pub uptime_secs: u64,
    #[serde(rename = "timestamp")]
    pub timestamp: String,
}

/// Latest-version metadata for one listed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListEntry {
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "last_modified")]
    pub last_modified: i64,
    #[serde(rename = "size")]
    pub size: u64,
    #[serde(rename = "version")]
    pub version: u64,
    #[serde(rename = "client_id")]
    pub client_id: String,
    #[serde(rename = "total_versions")]
    pub total_versions: u64,
    #[serde(rename = "checksum", default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListResponse {
    #[serde(rename = "success")]
    pub success: bool,
    #[serde(rename = "files")]
    pub files: Vec<FileListEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(rename = "success")]
    pub success: bool,
    #[serde(rename = "message")]
    pub message: String,
    #[serde(rename = "file_id")]
    pub file_id: String,
    #[serde(rename = "file_name")]
    pub file_name: String,
    #[serde(rename = "version")]
    pub version: u64,
    #[serde(rename = "checksum")]
    pub checksum: String,
    #[serde(rename = "size")]
    pub size: u64,
    #[serde(rename = "duplicate", default, skip_serializing_if = "is_false")]
    pub duplicate: bool,
    #[serde(rename = "conflict_id", default, skip_serializing_if = "Option::is_none")]
    pub conflict_id: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Ack for one chunk part; `complete` flips on the part that finished the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkUploadResponse {
    #[serde(rename = "success")]
    pub success: bool,
    #[serde(rename = "message")]
    pub message: String,
    #[serde(rename = "file_name")]
    pub file_name: String,
    #[serde(rename = "received")]
    pub received: u32,
    #[serde(rename = "total_chunks")]
    pub total_chunks: u32,
    #[serde(rename = "complete")]
    pub complete: bool,
    #[serde(rename = "duplicate", default, skip_serializing_if = "is_false")]
    pub duplicate: bool,
    #[serde(rename = "version", default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(rename = "checksum", default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionListResponse {
    #[serde(rename = "success")]
    pub success: bool,
    #[serde(rename = "file_name")]
    pub file_name: String,
    #[serde(rename = "versions")]
    pub versions: Vec<VersionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictListResponse {
    #[serde(rename = "success")]
    pub success: bool,
    #[serde(rename = "conflicts")]
    pub conflicts: Vec<ConflictRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleResponse {
    #[serde(rename = "success")]
    pub success: bool,
    #[serde(rename = "message")]
    pub message: String,
}

/// One participant in a 409 conflict body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPeer {
    #[serde(rename = "client_id")]
    pub client_id: String,
    #[serde(rename = "last_modified")]
    pub last_modified: i64,
}

/// 409 body handed to a losing client. `conflict_id` is `"already-exists"`
/// when the detection event was recorded by an earlier arrival.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRejection {
    #[serde(rename = "error")]
    pub error: String,
    #[serde(rename = "message")]
    pub message: String,
    #[serde(rename = "file_name")]
    pub file_name: String,
    #[serde(rename = "winner")]
    pub winner: ConflictPeer,
    #[serde(rename = "losers")]
    pub losers: Vec<ConflictPeer>,
    #[serde(rename = "conflict_file_name")]
    pub conflict_file_name: String,
    #[serde(rename = "conflict_id")]
    pub conflict_id: String,
}

pub const CONFLICT_ALREADY_EXISTS: &str = "already-exists";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRequest {
    #[serde(rename = "new_name")]
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRequest {
    #[serde(rename = "client_id")]
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRequest {
    #[serde(rename = "method")]
    pub method: String,
    #[serde(rename = "keep_version", default, skip_serializing_if = "Option::is_none")]
    pub keep_version: Option<u64>,
    #[serde(rename = "client_id")]
    pub client_id: String,
}

/// Supervisor observability document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorStatus {
    #[serde(rename = "proxy_port")]
    pub proxy_port: u16,
    #[serde(rename = "bind_address")]
    pub bind_address: String,
    #[serde(rename = "total_servers")]
    pub total_servers: usize,
    #[serde(rename = "healthy_servers")]
    pub healthy_servers: usize,
    #[serde(rename = "shared_storage_root")]
    pub shared_storage_root: String,
    #[serde(rename = "servers")]
    pub servers: Vec<WorkerStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    #[serde(rename = "port")]
    pub port: u16,
    #[serde(rename = "healthy")]
    pub healthy: bool,
    #[serde(rename = "started_at")]
    pub started_at: String,
    #[serde(rename = "last_health_check_at", default, skip_serializing_if = "Option::is_none")]
    pub last_health_check_at: Option<String>,
}
