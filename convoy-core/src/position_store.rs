use chrono::Utc;
use dashmap::DashMap;
use std::{collections::BTreeMap, fmt, time::Duration};
use tokio::time::Instant;

use crate::convoy::PositionRecord;
use crate::types::{ConvoyId, UserId};

/// A record together with the monotonic instant it was written at.
/// Staleness is judged on `seen_at` only; `record.updated_at` is for clients.
#[derive(Debug, Clone)]
pub struct TrackedPosition {
    pub record: PositionRecord,
    pub seen_at: Instant,
}

/// Authoritative `(convoy, user) -> position` table, partitioned by convoy
#[derive(Default)]
pub struct PositionStore {
    partitions: DashMap<ConvoyId, BTreeMap<UserId, TrackedPosition>>,
}

impl fmt::Debug for PositionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PositionStore")
            .field("convoy_count", &self.partitions.len())
            .finish()
    }
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite, stamping the record with the current time
    pub fn upsert(&self, convoy_id: &ConvoyId, mut record: PositionRecord) -> PositionRecord {
        record.updated_at = Utc::now();
        let tracked = TrackedPosition {
            record: record.clone(),
            seen_at: Instant::now(),
        };

        self.partitions
            .entry(convoy_id.clone())
            .or_default()
            .insert(record.user_id.clone(), tracked);

        record
    }

    /// Idempotent
    pub fn remove(&self, convoy_id: &ConvoyId, user_id: &UserId) -> Option<PositionRecord> {
        let removed = self
            .partitions
            .get_mut(convoy_id)
            .and_then(|mut partition| partition.remove(user_id));

        self.partitions
            .remove_if(convoy_id, |_, partition| partition.is_empty());

        removed.map(|tracked| tracked.record)
    }

    pub fn remove_convoy(&self, convoy_id: &ConvoyId) {
        self.partitions.remove(convoy_id);
    }

    pub fn get(&self, convoy_id: &ConvoyId, user_id: &UserId) -> Option<TrackedPosition> {
        self.partitions
            .get(convoy_id)
            .and_then(|partition| partition.get(user_id).cloned())
    }

    /// Point-in-time copy of a convoy's records, ordered by user id
    pub fn list_by_convoy(&self, convoy_id: &ConvoyId) -> Vec<PositionRecord> {
        self.partitions
            .get(convoy_id)
            .map(|partition| {
                partition
                    .values()
                    .map(|tracked| tracked.record.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self, convoy_id: &ConvoyId) -> usize {
        self.partitions
            .get(convoy_id)
            .map(|partition| partition.len())
            .unwrap_or(0)
    }

    pub fn is_stale(tracked: &TrackedPosition, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(tracked.seen_at) > ttl
    }
}
