#![forbid(unsafe_code)]

mod engine;
mod queue;
mod transport;
mod watcher;

pub use engine::{EngineConfig, SyncEngine, SyncStatus};
pub use queue::{OfflineQueue, QueuedEvent};
pub use transport::{ApiClient, RemoteStore, TransportError};
pub use watcher::{FolderWatcher, WatchEvent, WatchEventKind, WatchHandle, WATCH_DEBOUNCE};

use tracing::warn;

/// Client ids are a user-supplied name plus a random suffix, stable for the
/// lifetime of the process.
#[must_use]
pub fn derive_client_id(name: &str) -> String {
    let suffix = boxsync_core::FileId::generate().to_string();
    format!("{name}-{}", &suffix[..8])
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("watcher error: {0}")]
    Watch(String),
}

/// Drive the engine: watcher events as they arrive, reconciler on the poll
/// interval. Single task, so engine state needs no locking.
pub async fn run_sync_loop<R: RemoteStore>(
    mut engine: SyncEngine<R>,
    mut watcher: FolderWatcher,
) -> Result<(), ClientError> {
    engine.set_watch_handle(watcher.handle());
    let mut ticker = tokio::time::interval(engine.config().poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(error) = engine.tick().await {
                    warn!(%error, "sync tick failed");
                }
            }
            event = watcher.next_event() => {
                match event {
                    Some(event) => engine.handle_event(event).await,
                    None => break,
                }
            }
        }
    }
    Ok(())
}
