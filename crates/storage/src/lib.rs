#![forbid(unsafe_code)]

mod chunks;
mod conflict;
mod content;
mod metadata;
mod paths;
mod versioning;

pub use chunks::{ChunkAssembler, ChunkOutcome, ChunkPart};
pub use conflict::{ConflictEngine, SafeUploadOutcome, UploadRequest, CONFLICT_WINDOW};
pub use content::{ContentStore, SavedBlob};
pub use metadata::{detect_conflict, MetadataStore, CONFLICT_THRESHOLD_MS};
pub use paths::StorageLayout;
pub use versioning::{commit_version, NewVersion};

use boxsync_core::protocol::ConflictRejection;
use boxsync_core::validation::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("concurrent modification of {}", .0.file_name)]
    Conflict(Box<ConflictRejection>),
    #[error("payload exceeds {limit_mb} MB limit")]
    PayloadTooLarge { limit_mb: u64 },
    #[error("corrupt chunk data: {0}")]
    Corrupt(String),
    #[error("version {version} of {file_name} already exists")]
    VersionExists { file_name: String, version: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid metadata document: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<ValidationError> for StorageError {
    fn from(error: ValidationError) -> Self {
        match error {
            ValidationError::InvalidFileName => Self::BadRequest(error.to_string()),
            ValidationError::FileTooLarge(limit_mb) => Self::PayloadTooLarge { limit_mb },
        }
    }
}

/// The stores every worker process shares by pointing at one on-disk root.
pub struct SharedStores {
    pub content: ContentStore,
    pub metadata: MetadataStore,
    pub chunks: ChunkAssembler,
    pub conflicts: ConflictEngine,
}

impl SharedStores {
    pub async fn open(layout: &StorageLayout) -> Result<Self, StorageError> {
        layout.ensure()?;
        Ok(Self {
            content: ContentStore::new(layout.files_dir.clone(), layout.versions_dir.clone()),
            metadata: MetadataStore::open(
                layout.metadata_files_dir.clone(),
                layout.conflicts_dir.clone(),
            )
            .await?,
            chunks: ChunkAssembler::new(layout.chunks_dir.clone()),
            conflicts: ConflictEngine::new(),
        })
    }
}
