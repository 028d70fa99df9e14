/// A file-system event held back while the server is unreachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuedEvent {
    Upload { file_name: String },
    Delete { file_name: String },
    Rename { old_name: String, new_name: String },
}

/// FIFO of events accumulated while offline. Drained on reconnect with
/// renames first, so uploads and deletions land on the final names.
#[derive(Debug, Default)]
pub struct OfflineQueue {
    events: Vec<QueuedEvent>,
}

impl OfflineQueue {
    pub fn push(&mut self, event: QueuedEvent) {
        if self.events.contains(&event) {
            return;
        }
        self.events.push(event);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn drain(&mut self) -> Vec<QueuedEvent> {
        let events = std::mem::take(&mut self.events);
        let (renames, rest): (Vec<_>, Vec<_>) = events
            .into_iter()
            .partition(|event| matches!(event, QueuedEvent::Rename { .. }));
        renames.into_iter().chain(rest).collect()
    }
}
