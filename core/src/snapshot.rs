//! Immutable aggregate snapshots and their atomic publication.

use crate::{
    aggregate::AggregateSet,
    collaborator::RegionMap,
    signals::SignalSet,
    types::BuildId,
};
use chrono::{DateTime, Utc};
use log::info;
use std::sync::{Arc, RwLock};

/// Everything one pipeline run produced. Never mutated after construction.
#[derive(Debug)]
pub struct Snapshot {
    pub build_id: BuildId,
    pub built_at: DateTime<Utc>,
    pub aggregates: AggregateSet,
    pub regions: RegionMap,
    pub signals: SignalSet,
}

/// Holds the currently published snapshot.
///
/// Readers take a cheap `Arc` clone and keep using it for as long as they
/// like; publishing replaces the pointer and never touches the old snapshot.
#[derive(Debug, Default)]
pub struct SnapshotCell {
    current: RwLock<Option<Arc<Snapshot>>>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        let mut slot = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = slot.as_ref() {
            info!("Replacing snapshot {} with {}", previous.build_id, snapshot.build_id);
        }
        *slot = Some(Arc::clone(&snapshot));
        snapshot
    }

    /// The published snapshot, or `None` before the first publish.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
