//! Seam for content synchronization (canvas records).
//!
//! The coordinator routes `update` and `recovery` frames through a [`ContentSync`]
//! implementation and owns the surrounding contract: an applied batch is broadcast to
//! every other connection and marks the snapshot for persistence, a rejected batch
//! makes the coordinator resend the authoritative snapshot to the sender only.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// Result of applying an update batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The batch changed the content; relay it and persist the new snapshot.
    Applied,
    /// Nothing to relay.
    Ignored,
}

/// Failure to apply an update batch.
#[derive(Debug, Error)]
pub enum ContentSyncError {
    /// The batch cannot be applied to the current content.
    #[error("update rejected: {0}")]
    Rejected(String),
}

/// Content model owned by one session coordinator.
pub trait ContentSync: Send + Sync {
    /// Replace the content with a snapshot loaded from storage.
    fn load(&mut self, snapshot: Option<Value>);
    /// Apply one update batch sent by a client.
    fn apply(&mut self, updates: &Value) -> Result<SyncOutcome, ContentSyncError>;
    /// Authoritative snapshot, if any content exists.
    fn snapshot(&self) -> Option<Value>;
}

/// Builds the content model of a freshly spawned coordinator.
pub type ContentFactory = Arc<dyn Fn() -> Box<dyn ContentSync> + Send + Sync>;

/// Content model that keeps the stored snapshot but accepts no updates.
#[derive(Debug, Default)]
pub struct InertContent {
    snapshot: Option<Value>,
}

impl ContentSync for InertContent {
    fn load(&mut self, snapshot: Option<Value>) {
        self.snapshot = snapshot;
    }

    fn apply(&mut self, _updates: &Value) -> Result<SyncOutcome, ContentSyncError> {
        Ok(SyncOutcome::Ignored)
    }

    fn snapshot(&self) -> Option<Value> {
        self.snapshot.clone()
    }
}

/// Factory producing [`InertContent`].
pub fn inert_content() -> ContentFactory {
    Arc::new(|| Box::new(InertContent::default()))
}
