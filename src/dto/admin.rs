//! DTO definitions used by the admin REST API.

use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    services::reconciler::{ChangeSet, EntityChanges},
    state::snapshot::ConfigSnapshot,
};

/// Outcome of one write-behind flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct FlushReport {
    /// Files written.
    pub written: usize,
    /// Files whose write failed and were requeued.
    pub failed: usize,
    /// Files still queued after the flush.
    pub pending: usize,
}

/// Write-behind queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct CacheStatus {
    /// Files waiting to be written.
    pub pending: usize,
    /// Queue length that triggers an early flush.
    pub threshold: usize,
    /// A flush or direct write is in progress.
    pub flushing: bool,
}

/// Names added, removed and modified by a reload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ChangeList {
    /// Present only in the new configuration.
    pub added: Vec<String>,
    /// Present only in the old configuration.
    pub removed: Vec<String>,
    /// Present in both with different settings.
    pub modified: Vec<String>,
}

impl From<&EntityChanges> for ChangeList {
    fn from(changes: &EntityChanges) -> Self {
        Self {
            added: changes.added.clone(),
            removed: changes.removed.clone(),
            modified: changes.modified.clone(),
        }
    }
}

/// What a configuration reload changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReloadReport {
    /// Server changes.
    pub servers: ChangeList,
    /// Group changes.
    pub groups: ChangeList,
    /// The ingress listener was restarted.
    pub ingress_changed: bool,
    /// The banned-word filter was reloaded.
    pub banned_words_changed: bool,
    /// The identity index was rebuilt.
    pub players_changed: bool,
    /// Servers configured after the reload.
    pub server_count: usize,
    /// Groups configured after the reload.
    pub group_count: usize,
    /// Banned words configured after the reload.
    pub banned_word_count: usize,
}

impl ReloadReport {
    /// Summarize `changes` against the snapshot that is now in effect.
    pub fn new(changes: &ChangeSet, snapshot: &ConfigSnapshot) -> Self {
        let summary = snapshot.summary();
        Self {
            servers: (&changes.servers).into(),
            groups: (&changes.groups).into(),
            ingress_changed: changes.ingress_changed,
            banned_words_changed: changes.banned_words_changed,
            players_changed: changes.players_changed,
            server_count: summary.servers,
            group_count: summary.groups,
            banned_word_count: summary.banned_words,
        }
    }

    /// Whether the reload changed nothing.
    pub fn is_noop(&self) -> bool {
        self.servers == ChangeList::default()
            && self.groups == ChangeList::default()
            && !self.ingress_changed
            && !self.banned_words_changed
            && !self.players_changed
    }
}
