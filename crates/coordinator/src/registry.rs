//! Worker record store
//!
//! In-memory, insertion-ordered map from worker id to its latest metadata.
//! All access goes through short, non-suspending critical sections; callers
//! only ever see cloned snapshots.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use infrazero_common::METRICS;
use infrazero_proto::{WorkerRecord, WorkerStatus};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Partial update applied by [`Registry::update`]
///
/// `None` leaves a field untouched. `latency_ms` is doubly optional so a patch
/// can clear the measurement (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerPatch {
    pub status: Option<WorkerStatus>,
    pub latency_ms: Option<Option<f64>>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub disabled: Option<bool>,
}

impl WorkerPatch {
    /// Successful probe or call
    pub fn healthy(latency_ms: f64, checked_at: Option<DateTime<Utc>>) -> Self {
        Self {
            status: Some(WorkerStatus::Healthy),
            latency_ms: Some(Some(latency_ms)),
            last_checked_at: checked_at,
            disabled: None,
        }
    }

    /// Failed probe or call
    pub fn down(checked_at: Option<DateTime<Utc>>) -> Self {
        Self {
            status: Some(WorkerStatus::Down),
            latency_ms: Some(None),
            last_checked_at: checked_at,
            disabled: None,
        }
    }

    /// Administrative kill
    pub fn disabled() -> Self {
        Self {
            status: Some(WorkerStatus::Down),
            latency_ms: Some(None),
            last_checked_at: None,
            disabled: Some(true),
        }
    }

    /// Merge into `record`. A disabled record only accepts `last_checked_at`.
    fn apply(&self, record: &mut WorkerRecord) {
        if let Some(at) = self.last_checked_at {
            record.last_checked_at = Some(at);
        }
        if record.disabled {
            return;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(latency_ms) = self.latency_ms {
            record.latency_ms = latency_ms;
        }
        if self.disabled == Some(true) {
            record.disabled = true;
        }
    }
}

/// Shared handle to the worker registry
#[derive(Debug, Clone, Default)]
pub struct Registry {
    workers: Arc<RwLock<IndexMap<String, WorkerRecord>>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard the current population and install `records`
    ///
    /// A later record with a duplicate id replaces the earlier one in place.
    pub fn replace_all(&self, records: Vec<WorkerRecord>) {
        let map: IndexMap<String, WorkerRecord> =
            records.into_iter().map(|r| (r.id.clone(), r)).collect();
        let count = map.len();

        {
            let mut workers = self.workers.write();
            *workers = map;
        }

        METRICS.fleet.registry_workers.set(count as i64);
        self.refresh_gauges();
        info!("Registry replaced with {} workers", count);
    }

    /// Snapshot of every record in insertion order
    pub fn list_all(&self) -> Vec<WorkerRecord> {
        self.workers.read().values().cloned().collect()
    }

    /// Snapshot of one record
    pub fn get(&self, id: &str) -> Option<WorkerRecord> {
        self.workers.read().get(id).cloned()
    }

    /// Merge `patch` into the record for `id`; unknown ids are ignored
    pub fn update(&self, id: &str, patch: WorkerPatch) {
        if !self.merge(id, &patch) {
            debug!("Ignoring update for unknown worker {}", id);
        }
    }

    /// Permanently exclude `id` from probing and routing
    ///
    /// Returns false if the id is unknown.
    pub fn disable(&self, id: &str) -> bool {
        self.merge(id, &WorkerPatch::disabled())
    }

    /// Lookup and merge under one write guard; false if `id` is unknown
    fn merge(&self, id: &str, patch: &WorkerPatch) -> bool {
        let transition = {
            let mut workers = self.workers.write();
            match workers.get_mut(id) {
                Some(record) => {
                    let before = record.status;
                    patch.apply(record);
                    Some((before, record.status))
                }
                None => None,
            }
        };

        match transition {
            Some((before, after)) => {
                if before != after {
                    if after == WorkerStatus::Down {
                        warn!("Worker {} transitioned {} -> {}", id, before, after);
                    } else {
                        info!("Worker {} transitioned {} -> {}", id, before, after);
                    }
                    self.refresh_gauges();
                }
                true
            }
            None => false,
        }
    }

    /// Healthy records with a latency measurement, fastest first
    ///
    /// Equal latencies keep insertion order.
    pub fn healthy_sorted(&self) -> Vec<WorkerRecord> {
        let mut healthy: Vec<WorkerRecord> = self
            .workers
            .read()
            .values()
            .filter(|r| r.is_routable() && r.latency_ms.is_some())
            .cloned()
            .collect();

        healthy.sort_by(|a, b| {
            a.latency_ms
                .partial_cmp(&b.latency_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        healthy
    }

    /// Routable records in insertion order
    pub fn eligible(&self) -> Vec<WorkerRecord> {
        self.workers
            .read()
            .values()
            .filter(|r| r.is_routable())
            .cloned()
            .collect()
    }

    /// Number of tracked workers
    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }

    fn refresh_gauges(&self) {
        let healthy = self
            .workers
            .read()
            .values()
            .filter(|r| r.is_routable())
            .count();
        METRICS.fleet.healthy_workers.set(healthy as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, status: WorkerStatus, latency_ms: Option<f64>) -> WorkerRecord {
        let mut r = WorkerRecord::new(id, id, format!("Region {}", id), format!("{}:8000", id));
        r.status = status;
        r.latency_ms = latency_ms;
        r
    }

    #[test]
    fn test_replace_all_drops_previous_population() {
        let registry = Registry::new();
        registry.replace_all(vec![
            record("a", WorkerStatus::Healthy, Some(10.0)),
            record("b", WorkerStatus::Starting, None),
        ]);
        registry.replace_all(vec![
            record("c", WorkerStatus::Starting, None),
            record("d", WorkerStatus::Down, None),
        ]);

        let ids: Vec<String> = registry.list_all().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["c", "d"]);
        assert!(registry.get("a").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_update_changes_only_present_fields() {
        let registry = Registry::new();
        let original = record("a", WorkerStatus::Healthy, Some(10.0));
        registry.replace_all(vec![original.clone()]);

        registry.update(
            "a",
            WorkerPatch {
                latency_ms: Some(Some(42.0)),
                ..WorkerPatch::default()
            },
        );

        let updated = registry.get("a").unwrap();
        assert_eq!(updated.latency_ms, Some(42.0));
        assert_eq!(
            WorkerRecord {
                latency_ms: original.latency_ms,
                ..updated
            },
            original
        );
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let registry = Registry::new();
        registry.replace_all(vec![record("a", WorkerStatus::Healthy, Some(10.0))]);

        registry.update("missing", WorkerPatch::down(Some(Utc::now())));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().status, WorkerStatus::Healthy);
    }

    #[test]
    fn test_down_patch_clears_latency() {
        let registry = Registry::new();
        registry.replace_all(vec![record("a", WorkerStatus::Healthy, Some(10.0))]);
        let now = Utc::now();

        registry.update("a", WorkerPatch::down(Some(now)));

        let r = registry.get("a").unwrap();
        assert_eq!(r.status, WorkerStatus::Down);
        assert_eq!(r.latency_ms, None);
        assert_eq!(r.last_checked_at, Some(now));
    }

    #[test]
    fn test_healthy_sorted_scenario() {
        let registry = Registry::new();
        registry.replace_all(vec![
            record("A", WorkerStatus::Healthy, Some(50.0)),
            record("B", WorkerStatus::Healthy, Some(30.0)),
            record("C", WorkerStatus::Down, None),
        ]);

        let ids: Vec<String> = registry.healthy_sorted().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["B", "A"]);
    }

    #[test]
    fn test_healthy_sorted_excludes_incomplete_records() {
        let registry = Registry::new();
        registry.replace_all(vec![
            record("no-latency", WorkerStatus::Healthy, None),
            record("starting", WorkerStatus::Starting, Some(1.0)),
            record("down", WorkerStatus::Down, Some(2.0)),
            record("slow", WorkerStatus::Healthy, Some(90.0)),
            record("fast", WorkerStatus::Healthy, Some(5.0)),
            record("tie", WorkerStatus::Healthy, Some(90.0)),
        ]);

        let sorted = registry.healthy_sorted();
        let ids: Vec<&str> = sorted.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["fast", "slow", "tie"]);
        assert!(sorted
            .windows(2)
            .all(|w| w[0].latency_ms.unwrap() <= w[1].latency_ms.unwrap()));
    }

    #[test]
    fn test_disable_is_terminal() {
        let registry = Registry::new();
        registry.replace_all(vec![record("a", WorkerStatus::Healthy, Some(10.0))]);

        assert!(registry.disable("a"));
        assert!(!registry.disable("missing"));

        // A probe that was already in flight lands after the kill
        registry.update("a", WorkerPatch::healthy(12.0, Some(Utc::now())));
        registry.update(
            "a",
            WorkerPatch {
                disabled: Some(false),
                ..WorkerPatch::default()
            },
        );

        let r = registry.get("a").unwrap();
        assert!(r.disabled);
        assert_eq!(r.status, WorkerStatus::Down);
        assert_eq!(r.latency_ms, None);
        assert!(r.last_checked_at.is_some());
        assert!(registry.eligible().is_empty());
        assert!(registry.healthy_sorted().is_empty());
    }

    #[test]
    fn test_disable_follows_current_population() {
        let registry = Registry::new();
        registry.replace_all(vec![record("a", WorkerStatus::Healthy, Some(10.0))]);
        registry.replace_all(vec![record("b", WorkerStatus::Healthy, Some(10.0))]);

        assert!(!registry.disable("a"));
        assert!(registry.get("a").is_none());

        assert!(registry.disable("b"));
        assert!(registry.disable("b"));
        assert!(registry.get("b").unwrap().disabled);
    }

    #[test]
    fn test_disable_races_with_replace_all() {
        let registry = Registry::new();
        registry.replace_all(vec![record("a", WorkerStatus::Healthy, Some(10.0))]);

        std::thread::scope(|scope| {
            let replacer = registry.clone();
            scope.spawn(move || {
                for _ in 0..200 {
                    replacer.replace_all(vec![]);
                    replacer.replace_all(vec![record("a", WorkerStatus::Healthy, Some(10.0))]);
                }
            });

            let killer = registry.clone();
            scope.spawn(move || {
                for _ in 0..200 {
                    killer.disable("a");
                }
            });
        });

        // Whatever interleaving happened, the survivor is a complete record
        let a = registry.get("a").unwrap();
        assert_eq!(a.disabled, a.status == WorkerStatus::Down);
        assert_eq!(a.disabled, a.latency_ms.is_none());
    }

    #[test]
    fn test_concurrent_updates_to_different_keys() {
        let registry = Registry::new();
        let ids: Vec<String> = (0..16).map(|i| format!("w{}", i)).collect();
        registry.replace_all(
            ids.iter()
                .map(|id| record(id, WorkerStatus::Starting, None))
                .collect(),
        );

        std::thread::scope(|scope| {
            for (i, id) in ids.iter().enumerate() {
                let registry = registry.clone();
                scope.spawn(move || {
                    for n in 0..100 {
                        registry.update(id, WorkerPatch::healthy((i * 1000 + n) as f64, None));
                    }
                });
            }
        });

        for (i, id) in ids.iter().enumerate() {
            let r = registry.get(id).unwrap();
            assert_eq!(r.status, WorkerStatus::Healthy);
            assert_eq!(r.latency_ms, Some((i * 1000 + 99) as f64));
        }
    }
}
