use std::path::{Path, PathBuf};

/// On-disk layout shared by every supervised worker. All paths resolve under
/// one root so N processes pointing at the same root observe identical state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pub root: PathBuf,
    pub files_dir: PathBuf,
    pub versions_dir: PathBuf,
    pub metadata_files_dir: PathBuf,
    pub conflicts_dir: PathBuf,
    pub chunks_dir: PathBuf,
}

impl StorageLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            files_dir: root.join("files"),
            versions_dir: root.join("versions"),
            metadata_files_dir: root.join("metadata").join("files"),
            conflicts_dir: root.join("metadata").join("conflicts"),
            chunks_dir: root.join("chunks"),
            root,
        }
    }

    #[must_use]
    pub fn with_files_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.files_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_versions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.versions_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_metadata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.metadata_files_dir = dir.join("files");
        self.conflicts_dir = dir.join("conflicts");
        self
    }

    #[must_use]
    pub fn with_conflicts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.conflicts_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_chunks_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.chunks_dir = dir.into();
        self
    }

    /// Create every directory in the layout.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [
            &self.files_dir,
            &self.versions_dir,
            &self.metadata_files_dir,
            &self.conflicts_dir,
            &self.chunks_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Metadata root holding the per-record and per-conflict directories.
    #[must_use]
    pub fn metadata_root(&self) -> &Path {
        self.metadata_files_dir
            .parent()
            .unwrap_or(&self.metadata_files_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_resolves_under_root() {
        let layout = StorageLayout::new("/srv/boxsync");
        assert_eq!(layout.files_dir, PathBuf::from("/srv/boxsync/files"));
        assert_eq!(layout.versions_dir, PathBuf::from("/srv/boxsync/versions"));
        assert_eq!(
            layout.metadata_files_dir,
            PathBuf::from("/srv/boxsync/metadata/files")
        );
        assert_eq!(
            layout.conflicts_dir,
            PathBuf::from("/srv/boxsync/metadata/conflicts")
        );
        assert_eq!(layout.chunks_dir, PathBuf::from("/srv/boxsync/chunks"));
    }

    #[test]
    fn overrides_replace_individual_dirs() {
        let layout = StorageLayout::new("/srv/boxsync")
            .with_files_dir("/fast/files")
            .with_chunks_dir("/scratch/chunks");
        assert_eq!(layout.files_dir, PathBuf::from("/fast/files"));
        assert_eq!(layout.chunks_dir, PathBuf::from("/scratch/chunks"));
        assert_eq!(layout.versions_dir, PathBuf::from("/srv/boxsync/versions"));
    }

    #[test]
    fn ensure_creates_all_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let layout = StorageLayout::new(temp.path().join("root"));
        layout.ensure().expect("ensure layout");
        assert!(layout.files_dir.is_dir());
        assert!(layout.versions_dir.is_dir());
        assert!(layout.metadata_files_dir.is_dir());
        assert!(layout.conflicts_dir.is_dir());
        assert!(layout.chunks_dir.is_dir());
    }
}
