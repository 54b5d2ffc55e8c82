use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::future::Cache;
use ulid::Ulid;

use crate::observability;

use super::analytics::{OccupancyReport, ReportQuery};

/// Report cache keyed by every report parameter.
///
/// Each restaurant carries a generation counter. Writers bump it before evicting;
/// a report computed under an older generation is never stored, so a report
/// racing a write cannot repopulate the cache with pre-write data.
pub struct ReportCache {
    reports: Cache<ReportQuery, Arc<OccupancyReport>>,
    generations: DashMap<Ulid, u64>,
}

impl ReportCache {
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        let reports = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self {
            reports,
            generations: DashMap::new(),
        }
    }

    pub fn generation(&self, restaurant_id: &Ulid) -> u64 {
        self.generations.get(restaurant_id).map(|g| *g).unwrap_or(0)
    }

    pub async fn get(&self, key: &ReportQuery) -> Option<Arc<OccupancyReport>> {
        let hit = self.reports.get(key).await;
        if hit.is_some() {
            metrics::counter!(observability::REPORT_CACHE_HITS_TOTAL).increment(1);
        } else {
            metrics::counter!(observability::REPORT_CACHE_MISSES_TOTAL).increment(1);
        }
        hit
    }

    /// Store `report` only if no write touched the restaurant since `generation` was read.
    pub async fn insert_if_current(&self, key: ReportQuery, report: Arc<OccupancyReport>, generation: u64) -> bool {
        let restaurant_id = key.restaurant_id;
        if self.generation(&restaurant_id) != generation {
            return false;
        }
        self.reports.insert(key.clone(), report).await;
        // An invalidation may have slipped in between the check and the insert.
        if self.generation(&restaurant_id) != generation {
            self.reports.invalidate(&key).await;
            return false;
        }
        true
    }

    /// Drop every cached report of one restaurant.
    pub async fn invalidate_restaurant(&self, restaurant_id: Ulid) {
        *self.generations.entry(restaurant_id).or_insert(0) += 1;
        let stale: Vec<Arc<ReportQuery>> = self
            .reports
            .iter()
            .filter(|(k, _)| k.restaurant_id == restaurant_id)
            .map(|(k, _)| k)
            .collect();
        for key in stale {
            self.reports.invalidate(key.as_ref()).await;
        }
        tracing::debug!(%restaurant_id, "report cache invalidated");
    }

    /// Drop a deleted restaurant's reports. Its counter stays behind as a tombstone
    /// so a report computed before the delete can never be stored afterwards.
    pub async fn forget_restaurant(&self, restaurant_id: Ulid) {
        self.invalidate_restaurant(restaurant_id).await;
    }
}
