use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use boxsync_core::checksum::digest_file_hex;
use boxsync_core::protocol::{ConflictRejection, FileListEntry};

use crate::queue::{OfflineQueue, QueuedEvent};
use crate::transport::{RemoteStore, TransportError};
use crate::watcher::{WatchEvent, WatchEventKind, WatchHandle};
use crate::ClientError;

/// Server downloads land under this hidden prefix before the final rename;
/// leftovers are swept every reconciler tick.
const CONFLICT_TEMP_PREFIX: &str = ".conflict_server_";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll_interval: Duration,
    pub recently_deleted_ttl: Duration,
    pub recently_uploaded_ttl: Duration,
    /// Window during which a freshly-uploaded name is neither re-uploaded
    /// nor re-downloaded.
    pub reupload_guard: Duration,
    /// Local files younger than this are treated as new even when the
    /// server does not list them.
    pub new_file_grace: Duration,
    pub rename_window_ms: i64,
    pub mtime_tolerance_ms: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            recently_deleted_ttl: Duration::from_secs(30),
            recently_uploaded_ttl: Duration::from_secs(60),
            reupload_guard: Duration::from_secs(30),
            new_file_grace: Duration::from_secs(60),
            rename_window_ms: 10_000,
            mtime_tolerance_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Uploading,
    Synced { version: u64 },
    Conflicted { conflict_id: String },
}

struct FileState {
    status: SyncStatus,
    /// Local bytes captured before a conflict overwrote them.
    snapshot: Option<Vec<u8>>,
}

struct LocalFile {
    name: String,
    path: PathBuf,
    size: u64,
    modified_ms: i64,
}

/// The reconciler: merges watcher events and periodic server listings into
/// uploads, downloads, deletions, and renames. Single-task by design.
pub struct SyncEngine<R: RemoteStore> {
    remote: R,
    folder: PathBuf,
    client_id: String,
    config: EngineConfig,
    watch: Option<WatchHandle>,
    server_online: bool,
    first_sync_done: bool,
    pending_uploads: HashSet<String>,
    pending_downloads: HashSet<String>,
    pending_deletions: HashSet<String>,
    recently_deleted: HashMap<String, Instant>,
    recently_uploaded: HashMap<String, Instant>,
    files: HashMap<String, FileState>,
    offline_queue: OfflineQueue,
}

impl<R: RemoteStore> SyncEngine<R> {
    #[must_use]
    pub fn new(remote: R, folder: PathBuf, client_id: &str) -> Self {
        Self::with_config(remote, folder, client_id, EngineConfig::default())
    }

    #[must_use]
    pub fn with_config(
        remote: R,
        folder: PathBuf,
        client_id: &str,
        config: EngineConfig,
    ) -> Self {
        Self {
            remote,
            folder,
            client_id: client_id.to_owned(),
            config,
            watch: None,
            server_online: false,
            first_sync_done: false,
            pending_uploads: HashSet::new(),
            pending_downloads: HashSet::new(),
            pending_deletions: HashSet::new(),
            recently_deleted: HashMap::new(),
            recently_uploaded: HashMap::new(),
            files: HashMap::new(),
            offline_queue: OfflineQueue::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn set_watch_handle(&mut self, handle: WatchHandle) {
        self.watch = Some(handle);
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.server_online
    }

    #[must_use]
    pub fn status_of(&self, name: &str) -> Option<&SyncStatus> {
        self.files.get(name).map(|state| &state.status)
    }

    /// Local bytes preserved when a conflict adopted the server's state.
    #[must_use]
    pub fn snapshot_of(&self, name: &str) -> Option<&[u8]> {
        self.files
            .get(name)
            .and_then(|state| state.snapshot.as_deref())
    }

    /// Watcher events: deletions are tracked and flushed by the reconciler;
    /// adds and changes upload right away (or queue while offline).
    pub async fn handle_event(&mut self, event: WatchEvent) {
        match event.kind {
            WatchEventKind::Delete => {
                self.pending_deletions.insert(event.file_name.clone());
                self.files.remove(&event.file_name);
            }
            WatchEventKind::Add | WatchEventKind::Change => {
                if self.server_online {
                    self.upload_path(&event.file_name).await;
                } else {
                    self.offline_queue.push(QueuedEvent::Upload {
                        file_name: event.file_name,
                    });
                }
            }
        }
    }

    /// One reconciler pass. Idempotent; a dropped tick is harmless.
    pub async fn tick(&mut self) -> Result<(), ClientError> {
        if !self.remote.health().await {
            if self.server_online {
                tracing::warn!("server went offline, queueing changes");
            }
            self.server_online = false;
            return Ok(());
        }
        let came_online = !self.server_online;
        self.server_online = true;
        if came_online && !self.offline_queue.is_empty() {
            self.flush_offline_queue().await;
        }

        self.prune_expiry_maps();

        let listing = self.remote.list_files().await;
        let server_files = match listing {
            Ok(files) => files,
            Err(TransportError::Offline(reason)) => {
                tracing::warn!(%reason, "listing failed, server offline");
                self.server_online = false;
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };
        let local_files = self.list_local()?;

        let server_names: HashSet<String> =
            server_files.iter().map(|entry| entry.name.clone()).collect();
        let local_names: HashSet<String> =
            local_files.iter().map(|local| local.name.clone()).collect();

        // Rename detection runs before deletions are flushed so a local
        // rename is not torn into an add plus a delete.
        let mut renamed_old = HashSet::new();
        let mut renamed_new = HashSet::new();
        for (old, new) in self.detect_renames(&server_files, &local_files, &server_names, &local_names)
        {
            let renamed = self.remote.rename(&old, &new).await;
            match renamed {
                Ok(()) => {
                    tracing::info!(%old, %new, "renamed on server");
                    self.pending_deletions.remove(&old);
                    self.recently_uploaded.insert(new.clone(), Instant::now());
                    renamed_old.insert(old);
                    renamed_new.insert(new);
                }
                Err(error) => tracing::warn!(%old, %new, %error, "rename failed"),
            }
        }

        // Pending deletions → server.
        let deletions: Vec<String> = self.pending_deletions.drain().collect();
        for name in deletions {
            let deleted = self.remote.delete(&name).await;
            match deleted {
                Ok(()) => {
                    self.recently_deleted.insert(name, Instant::now());
                }
                Err(TransportError::Api { status: 404, .. }) => {
                    self.recently_deleted.insert(name, Instant::now());
                }
                Err(TransportError::Offline(reason)) => {
                    tracing::warn!(%reason, "delete failed, server offline");
                    self.pending_deletions.insert(name);
                    self.server_online = false;
                    return Ok(());
                }
                Err(error) => tracing::warn!(file = %name, %error, "delete failed"),
            }
        }

        // Server → local.
        for entry in &server_files {
            let name = entry.name.as_str();
            if renamed_old.contains(name)
                || self.recently_deleted.contains_key(name)
                || self.pending_deletions.contains(name)
                || self.pending_uploads.contains(name)
                || self.pending_downloads.contains(name)
            {
                continue;
            }
            if let Some(at) = self.recently_uploaded.get(name) {
                if at.elapsed() < self.config.reupload_guard {
                    continue;
                }
            }

            match local_files.iter().find(|local| local.name == name) {
                None => {
                    if let Err(error) = self.download_into_folder(name, entry.last_modified).await
                    {
                        tracing::warn!(file = name, %error, "download failed");
                    } else {
                        self.mark_synced(name, entry.version);
                    }
                }
                Some(local) => self.reconcile_pair(entry, local).await,
            }
        }

        // Local → server.
        let first_sync = !self.first_sync_done;
        for local in &local_files {
            let name = local.name.as_str();
            if server_names.contains(name)
                || renamed_new.contains(name)
                || self.pending_deletions.contains(name)
                || self.recently_deleted.contains_key(name)
                || self.pending_uploads.contains(name)
            {
                continue;
            }
            let age_ms = now_ms().saturating_sub(local.modified_ms);
            if first_sync || age_ms < self.config.new_file_grace.as_millis() as i64 {
                self.upload_path(name).await;
            } else {
                // Not new, not on the server: the server-side deletion is
                // authoritative.
                if let Some(handle) = &self.watch {
                    handle.ignore(name);
                }
                let _ = std::fs::remove_file(&local.path);
                if let Some(handle) = &self.watch {
                    handle.unignore(name);
                }
                self.files.remove(name);
                self.recently_deleted.insert(name.to_owned(), Instant::now());
                tracing::info!(file = name, "removed locally, deleted on server");
            }
        }

        self.cleanup_conflict_temps();
        self.first_sync_done = true;
        Ok(())
    }

    async fn upload_path(&mut self, name: &str) {
        if self.pending_uploads.contains(name) {
            return;
        }
        if let Some(at) = self.recently_uploaded.get(name) {
            if at.elapsed() < self.config.reupload_guard {
                return;
            }
        }
        let path = self.folder.join(name);
        let Ok(bytes) = std::fs::read(&path) else {
            return;
        };
        let Ok(meta) = std::fs::metadata(&path) else {
            return;
        };
        let last_modified = system_time_ms(meta.modified().ok());

        self.pending_uploads.insert(name.to_owned());
        self.files.insert(
            name.to_owned(),
            FileState {
                status: SyncStatus::Uploading,
                snapshot: None,
            },
        );
        let result = self.remote.upload(name, bytes.clone(), last_modified).await;
        self.pending_uploads.remove(name);

        match result {
            Ok(response) => {
                self.recently_uploaded.insert(name.to_owned(), Instant::now());
                self.mark_synced(name, response.version);
            }
            Err(TransportError::Conflict(rejection)) => {
                self.adopt_server_state(name, *rejection, bytes).await;
            }
            Err(TransportError::Offline(reason)) => {
                tracing::warn!(file = name, %reason, "upload failed, server offline");
                self.server_online = false;
                self.offline_queue.push(QueuedEvent::Upload {
                    file_name: name.to_owned(),
                });
            }
            Err(error) => tracing::warn!(file = name, %error, "upload rejected"),
        }
    }

    /// Conflict handling: snapshot the losing local bytes, adopt the
    /// server's current state (watcher suppressed, mtime set to the
    /// winner's), and surface the conflict. No further auto-resolution.
    async fn adopt_server_state(
        &mut self,
        name: &str,
        rejection: ConflictRejection,
        local_snapshot: Vec<u8>,
    ) {
        tracing::warn!(
            file = name,
            conflict = %rejection.conflict_id,
            copy = %rejection.conflict_file_name,
            "server reported a conflict, adopting server state"
        );
        if let Err(error) = self
            .download_into_folder(name, rejection.winner.last_modified)
            .await
        {
            tracing::warn!(file = name, %error, "failed to adopt server state");
        }
        self.recently_uploaded.insert(name.to_owned(), Instant::now());
        self.files.insert(
            name.to_owned(),
            FileState {
                status: SyncStatus::Conflicted {
                    conflict_id: rejection.conflict_id,
                },
                snapshot: Some(local_snapshot),
            },
        );
    }

    async fn download_into_folder(
        &mut self,
        name: &str,
        server_mtime_ms: i64,
    ) -> Result<(), ClientError> {
        self.pending_downloads.insert(name.to_owned());
        if let Some(handle) = &self.watch {
            handle.ignore(name);
        }
        let result = self.download_inner(name, server_mtime_ms).await;
        if let Some(handle) = &self.watch {
            handle.unignore(name);
        }
        self.pending_downloads.remove(name);
        result
    }

    async fn download_inner(&mut self, name: &str, server_mtime_ms: i64) -> Result<(), ClientError> {
        let bytes = self.remote.download(name).await?;
        let temp = self.folder.join(format!("{CONFLICT_TEMP_PREFIX}{name}"));
        std::fs::write(&temp, &bytes)?;
        let target = self.folder.join(name);
        std::fs::rename(&temp, &target)?;
        if server_mtime_ms > 0 {
            let mtime = UNIX_EPOCH + Duration::from_millis(server_mtime_ms as u64);
            let file = std::fs::File::options().write(true).open(&target)?;
            file.set_modified(mtime)?;
        }
        Ok(())
    }

    async fn reconcile_pair(&mut self, entry: &FileListEntry, local: &LocalFile) {
        // (a) version, when we know what we last synced.
        let synced_version = match self.files.get(&local.name) {
            Some(FileState {
                status: SyncStatus::Synced { version },
                ..
            }) => Some(*version),
            _ => None,
        };
        if let Some(version) = synced_version {
            if entry.version > version {
                if let Err(error) = self
                    .download_into_folder(&local.name, entry.last_modified)
                    .await
                {
                    tracing::warn!(file = %local.name, %error, "download failed");
                } else {
                    self.mark_synced(&local.name, entry.version);
                }
                return;
            }
            if entry.version == version {
                return;
            }
        }

        // (b) checksum, when the server publishes one.
        if let Some(server_checksum) = &entry.checksum {
            match digest_file_hex(&local.path) {
                Ok(local_checksum) if &local_checksum == server_checksum => {
                    self.mark_synced(&local.name, entry.version);
                    return;
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(file = %local.name, %error, "could not hash local file");
                    return;
                }
            }
        }

        // (c) mtime with tolerance decides direction.
        if entry.last_modified > local.modified_ms + self.config.mtime_tolerance_ms {
            if let Err(error) = self
                .download_into_folder(&local.name, entry.last_modified)
                .await
            {
                tracing::warn!(file = %local.name, %error, "download failed");
            } else {
                self.mark_synced(&local.name, entry.version);
            }
        } else if local.modified_ms > entry.last_modified + self.config.mtime_tolerance_ms {
            self.upload_path(&local.name).await;
        }
    }

    /// Unmatched local/server pairs with equal size and near-equal mtimes
    /// are treated as one rename, not an add plus a delete.
    fn detect_renames(
        &self,
        server_files: &[FileListEntry],
        local_files: &[LocalFile],
        server_names: &HashSet<String>,
        local_names: &HashSet<String>,
    ) -> Vec<(String, String)> {
        let mut used = HashSet::new();
        let mut renames = Vec::new();
        for old in server_files {
            if local_names.contains(&old.name) || self.recently_deleted.contains_key(&old.name) {
                continue;
            }
            for new in local_files {
                if server_names.contains(&new.name)
                    || used.contains(&new.name)
                    || self.recently_uploaded.contains_key(&new.name)
                {
                    continue;
                }
                if old.size == new.size
                    && (old.last_modified - new.modified_ms).abs() < self.config.rename_window_ms
                {
                    renames.push((old.name.clone(), new.name.clone()));
                    used.insert(new.name.clone());
                    break;
                }
            }
        }
        renames
    }

    async fn flush_offline_queue(&mut self) {
        tracing::info!(
            events = self.offline_queue.len(),
            "server back online, draining offline queue"
        );
        for event in self.offline_queue.drain() {
            match event {
                QueuedEvent::Rename { old_name, new_name } => {
                    if let Err(error) = self.remote.rename(&old_name, &new_name).await {
                        tracing::warn!(%old_name, %new_name, %error, "queued rename failed");
                    }
                }
                QueuedEvent::Upload { file_name } => self.upload_path(&file_name).await,
                QueuedEvent::Delete { file_name } => {
                    self.pending_deletions.insert(file_name);
                }
            }
        }
    }

    fn mark_synced(&mut self, name: &str, version: u64) {
        self.files.insert(
            name.to_owned(),
            FileState {
                status: SyncStatus::Synced { version },
                snapshot: None,
            },
        );
    }

    fn prune_expiry_maps(&mut self) {
        let deleted_ttl = self.config.recently_deleted_ttl;
        self.recently_deleted.retain(|_, at| at.elapsed() < deleted_ttl);
        let uploaded_ttl = self.config.recently_uploaded_ttl;
        self.recently_uploaded.retain(|_, at| at.elapsed() < uploaded_ttl);
    }

    fn cleanup_conflict_temps(&self) {
        let Ok(entries) = std::fs::read_dir(&self.folder) else {
            return;
        };
        for entry in entries.flatten() {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(CONFLICT_TEMP_PREFIX) {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }

    fn list_local(&self) -> Result<Vec<LocalFile>, ClientError> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.folder)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            files.push(LocalFile {
                name,
                path: entry.path(),
                size: meta.len(),
                modified_ms: system_time_ms(meta.modified().ok()),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}

fn now_ms() -> i64 {
    system_time_ms(Some(SystemTime::now()))
}

fn system_time_ms(time: Option<SystemTime>) -> i64 {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
