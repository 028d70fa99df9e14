use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;

use crate::ClientError;

/// Debounce applied to raw file-system events.
pub const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Add,
    Change,
    Delete,
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
    pub file_name: String,
}

/// Suppression controls shared between the watcher callback and the engine:
/// per-name ignores while a download is in flight, plus a global pause.
#[derive(Clone, Default)]
pub struct WatchHandle {
    ignored: Arc<StdMutex<HashSet<String>>>,
    paused: Arc<AtomicBool>,
}

impl WatchHandle {
    pub fn ignore(&self, name: &str) {
        if let Ok(mut ignored) = self.ignored.lock() {
            ignored.insert(name.to_owned());
        }
    }

    pub fn unignore(&self, name: &str) {
        if let Ok(mut ignored) = self.ignored.lock() {
            ignored.remove(name);
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    fn should_emit(&self, name: &str) -> bool {
        if self.paused.load(Ordering::Relaxed) {
            return false;
        }
        match self.ignored.lock() {
            Ok(ignored) => !ignored.contains(name),
            Err(_) => false,
        }
    }
}

/// Watches the sync folder and emits debounced add/change/delete events.
pub struct FolderWatcher {
    rx: mpsc::UnboundedReceiver<WatchEvent>,
    handle: WatchHandle,
    _debouncer: notify_debouncer_full::Debouncer<
        notify::RecommendedWatcher,
        notify_debouncer_full::RecommendedCache,
    >,
}

impl FolderWatcher {
    pub fn start(folder: &Path, debounce: Duration) -> Result<Self, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = WatchHandle::default();
        let callback_handle = handle.clone();

        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            let Ok(events) = result else {
                return;
            };
            for event in events {
                for path in &event.paths {
                    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    // Hidden names cover our own temp and snapshot files.
                    if name.starts_with('.') {
                        continue;
                    }
                    if !callback_handle.should_emit(name) {
                        continue;
                    }
                    if path.is_dir() {
                        continue;
                    }
                    let Some(kind) = classify(&event.event.kind, path.exists()) else {
                        continue;
                    };
                    let _ = tx.send(WatchEvent {
                        kind,
                        path: path.clone(),
                        file_name: name.to_owned(),
                    });
                }
            }
        })
        .map_err(|error| ClientError::Watch(error.to_string()))?;

        debouncer
            .watch(folder, RecursiveMode::NonRecursive)
            .map_err(|error| ClientError::Watch(error.to_string()))?;

        Ok(Self {
            rx,
            handle,
            _debouncer: debouncer,
        })
    }

    #[must_use]
    pub fn handle(&self) -> WatchHandle {
        self.handle.clone()
    }

    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }
}

fn classify(kind: &EventKind, exists: bool) -> Option<WatchEventKind> {
    match kind {
        EventKind::Create(_) => Some(WatchEventKind::Add),
        // Renames surface as Modify(Name); the missing side is a delete.
        EventKind::Modify(_) => Some(if exists {
            WatchEventKind::Change
        } else {
            WatchEventKind::Delete
        }),
        EventKind::Remove(_) => Some(WatchEventKind::Delete),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind};

    use super::*;

    #[test]
    fn classify_maps_event_kinds() {
        assert_eq!(
            classify(&EventKind::Create(CreateKind::File), true),
            Some(WatchEventKind::Add)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content)), true),
            Some(WatchEventKind::Change)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content)), false),
            Some(WatchEventKind::Delete)
        );
        assert_eq!(
            classify(&EventKind::Remove(RemoveKind::File), false),
            Some(WatchEventKind::Delete)
        );
        assert_eq!(classify(&EventKind::Any, true), None);
    }

    #[test]
    fn handle_suppresses_ignored_names() {
        let handle = WatchHandle::default();
        assert!(handle.should_emit("note.txt"));

        handle.ignore("note.txt");
        assert!(!handle.should_emit("note.txt"));
        assert!(handle.should_emit("other.txt"));

        handle.unignore("note.txt");
        assert!(handle.should_emit("note.txt"));
    }

    #[test]
    fn handle_pause_suppresses_everything() {
        let handle = WatchHandle::default();
        handle.pause();
        assert!(!handle.should_emit("note.txt"));
        handle.resume();
        assert!(handle.should_emit("note.txt"));
    }
}
