//! Fire-and-forget notification dispatch.
//!
//! The sync engine reports user-facing events through a [`NotificationSink`].
//! Emission never blocks and never fails the caller; sinks swallow their own
//! errors. Delivery surfaces (web UI, chat bridges) implement the trait
//! outside this crate.

use tracing::info;

/// An event a delivery surface may want to show to users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    /// A user was mentioned in a comment.
    Mention {
        document_id: String,
        recipient: String,
        excerpt: String,
    },
    /// A new comment appeared on a document.
    NewComment {
        document_id: String,
        author: Option<String>,
        excerpt: String,
    },
    /// The sync engine updated or cleanly merged a document.
    AiSyncUpdate { document_id: String, slug: String },
    /// A sync proposal conflicted with human edits and needs review.
    AiConflict {
        document_id: String,
        slug: String,
        version_id: String,
        conflicts: usize,
        /// Last human editor of the document, when known.
        recipient: Option<String>,
    },
}

impl NotificationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Mention { .. } => "mention",
            Self::NewComment { .. } => "new_comment",
            Self::AiSyncUpdate { .. } => "ai_sync_update",
            Self::AiConflict { .. } => "ai_conflict",
        }
    }

    pub fn document_id(&self) -> &str {
        match self {
            Self::Mention { document_id, .. }
            | Self::NewComment { document_id, .. }
            | Self::AiSyncUpdate { document_id, .. }
            | Self::AiConflict { document_id, .. } => document_id,
        }
    }
}

/// Receives events from the engine. Implementations must not block and must
/// swallow their own delivery failures.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, event: NotificationEvent);
}

/// Sink that records events in the log stream only.
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn emit(&self, event: NotificationEvent) {
        info!(
            kind = event.kind(),
            document_id = %event.document_id(),
            detail = ?event,
            "notification"
        );
    }
}

/// Sink that buffers events in memory for inspection, used by tests and
/// embedding callers that deliver in batches.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: std::sync::Mutex<Vec<NotificationEvent>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl NotificationSink for CollectingSink {
    fn emit(&self, event: NotificationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
