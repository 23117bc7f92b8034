//! Registry of named snapshots with an active pointer.
//!
//! The manager co-owns the snapshot map, the active pointer and the
//! per-snapshot mutation logs; one outer lock guards all three. Mutations
//! take the active snapshot, produce a new value and publish it atomically
//! through `update_active`. The pristine baseline is held aside so that
//! `reset_to_baseline` restores byte-identical simulation output.

use serde::Serialize;

use std::collections::BTreeMap;

use crate::core::snapshot::Snapshot;
use crate::store::mutation_log::{unix_now, MutationLog};

pub const BASELINE_ID: &str = "baseline";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SnapshotInfo {
    pub id: String,
    pub nodes_count: usize,
    pub pods_count: usize,
    pub is_active: bool,
}

pub struct SnapshotManager {
    snapshots: BTreeMap<String, Snapshot>,
    logs: BTreeMap<String, MutationLog>,
    baseline: Snapshot,
    active_id: String,
}

impl SnapshotManager {
    pub fn new(baseline: Snapshot) -> Self {
        let mut snapshots = BTreeMap::new();
        snapshots.insert(BASELINE_ID.to_string(), baseline.clone());
        let mut logs = BTreeMap::new();
        logs.insert(BASELINE_ID.to_string(), MutationLog::default());
        Self {
            snapshots,
            logs,
            baseline,
            active_id: BASELINE_ID.to_string(),
        }
    }

    pub fn baseline(&self) -> &Snapshot {
        &self.baseline
    }

    pub fn active_id(&self) -> &str {
        &self.active_id
    }

    pub fn active(&self) -> &Snapshot {
        // The active id always resolves while the map is non-empty.
        &self.snapshots[&self.active_id]
    }

    pub fn add(&mut self, id: String, snapshot: Snapshot) {
        self.snapshots.insert(id.clone(), snapshot);
        self.logs.entry(id).or_default();
    }

    /// Registers a captured snapshot under a fresh `live-<unix-time>` id.
    pub fn add_capture(&mut self, snapshot: Snapshot) -> String {
        let mut id = format!("live-{}", unix_now());
        while self.snapshots.contains_key(&id) {
            id.push('x');
        }
        self.add(id.clone(), snapshot);
        id
    }

    pub fn list(&self) -> Vec<SnapshotInfo> {
        self.snapshots
            .iter()
            .map(|(id, snapshot)| SnapshotInfo {
                id: id.clone(),
                nodes_count: snapshot.nodes.len(),
                pods_count: snapshot.pods.len(),
                is_active: *id == self.active_id,
            })
            .collect()
    }

    pub fn set_active(&mut self, id: &str) -> bool {
        if !self.snapshots.contains_key(id) {
            return false;
        }
        self.active_id = id.to_string();
        true
    }

    /// Atomically replaces the active snapshot with a mutated successor.
    pub fn update_active(&mut self, snapshot: Snapshot) {
        self.snapshots.insert(self.active_id.clone(), snapshot);
    }

    /// Restores the active slot to the pristine baseline and drops its
    /// mutation history.
    pub fn reset_active_to_baseline(&mut self) {
        self.snapshots
            .insert(self.active_id.clone(), self.baseline.clone());
        self.active_log_mut().clear();
    }

    pub fn active_log_mut(&mut self) -> &mut MutationLog {
        self.logs.entry(self.active_id.clone()).or_default()
    }

    pub fn active_log(&self) -> Option<&MutationLog> {
        self.logs.get(&self.active_id)
    }
}
