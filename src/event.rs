use std::sync::Arc;

use serde::Serialize;

use crate::{HealthSummary, QualifiedName, Record, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Added,
    Modified,
    Deleted,
    Snapshot,
}

/// What subscribers receive.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A single object changed. For deletions `record` is the object's last known state.
    Changed {
        kind: ResourceKind,
        action: Action,
        key: QualifiedName,
        record: Arc<Record>,
        resource_version: Option<String>,
    },
    /// The complete cache of one kind, ordered by key.
    Snapshot {
        kind: ResourceKind,
        objects: Vec<(QualifiedName, Arc<Record>)>,
    },
    /// A freshly computed summary for the whole group.
    Health(Arc<HealthSummary>),
}

impl WatchEvent {
    /// `None` for health summaries, which span all kinds.
    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            WatchEvent::Changed { kind, .. } | WatchEvent::Snapshot { kind, .. } => Some(*kind),
            WatchEvent::Health(_) => None,
        }
    }

    pub fn action(&self) -> Action {
        match self {
            WatchEvent::Changed { action, .. } => *action,
            WatchEvent::Snapshot { .. } | WatchEvent::Health(_) => Action::Snapshot,
        }
    }

    pub fn is_health(&self) -> bool {
        matches!(self, WatchEvent::Health(_))
    }
}
