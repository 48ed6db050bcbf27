use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;

use super::{ExclusiveLease, Job, JobQueue, ShardHealth};
use crate::config::GeoConfig;
use crate::error::Result;
use crate::store::{CandidateFilter, NodeScope, Store};
use crate::types::GeoNode;

pub const LEASE_KEY_PREFIX: &str = "geo_repository_sync_worker";

/// Why a tick did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    GeoDatabaseNotConfigured,
    NotSecondary,
    NodeDisabled,
    NoPrimary,
    LeaseTaken,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub skipped: Option<SkipReason>,
    /// Project ids dispatched, in dispatch order.
    pub scheduled: Vec<i64>,
    /// The soft deadline passed or the lease was lost before candidates ran out.
    pub incomplete: bool,
}

impl TickReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Category {
    NeverSynced,
    Failed,
    Dirty,
}

/// Keyset-paged stream of candidate project ids of one category.
///
/// Starts after `start` and wraps around to the lowest id once, so every
/// candidate gets a turn across ticks even when capacity is smaller than the
/// backlog.
struct CandidateSource {
    category: Category,
    start: i64,
    after_id: i64,
    buffer: VecDeque<i64>,
    wrapped: bool,
    exhausted: bool,
    last_taken: Option<i64>,
}

impl CandidateSource {
    fn new(category: Category, start: i64) -> Self {
        Self {
            category,
            start,
            after_id: start,
            buffer: VecDeque::new(),
            wrapped: start == 0,
            exhausted: false,
            last_taken: None,
        }
    }

    fn is_done(&self) -> bool {
        self.exhausted && self.buffer.is_empty()
    }

    fn pop(&mut self) -> Option<i64> {
        let id = self.buffer.pop_front()?;
        self.last_taken = Some(id);
        Some(id)
    }

    /// Where the next tick should pick up.
    fn resume_after(&self) -> i64 {
        if self.is_done() {
            0
        } else {
            self.last_taken.unwrap_or(self.start)
        }
    }

    fn refill(&mut self, store: &dyn Store, filter: &CandidateFilter, batch_size: usize) {
        if !self.buffer.is_empty() || self.exhausted {
            return;
        }

        let found = match self.category {
            Category::NeverSynced => store.find_unsynced_projects(filter, self.after_id, batch_size),
            Category::Failed => store.find_failed_projects(filter, self.after_id, batch_size),
            Category::Dirty => store.find_dirty_projects(filter, self.after_id, batch_size),
        };

        match found {
            Ok(mut ids) => {
                let mut exhausted = ids.len() < batch_size;
                if self.wrapped && self.start > 0 {
                    if let Some(pos) = ids.iter().position(|id| *id > self.start) {
                        ids.truncate(pos);
                        exhausted = true;
                    }
                }
                if let Some(last) = ids.last() {
                    self.after_id = *last;
                }
                self.buffer.extend(ids);

                if exhausted && !self.wrapped {
                    self.wrapped = true;
                    self.after_id = 0;
                } else {
                    self.exhausted = exhausted;
                }
            }
            Err(e) => {
                tracing::warn!("Could not load {:?} candidates: {e}", self.category);
                self.exhausted = true;
            }
        }
    }
}

/// Decides, per tick, which projects a secondary should (re)sync and
/// dispatches one job per project.
pub struct RepositorySyncScheduler {
    store: Arc<dyn Store>,
    lease: Arc<dyn ExclusiveLease>,
    shards: Arc<dyn ShardHealth>,
    queue: Arc<JobQueue>,
    config: Arc<GeoConfig>,
    /// Last candidate taken per node and category, carried between ticks.
    cursors: Mutex<HashMap<(i64, Category), i64>>,
}

impl RepositorySyncScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        lease: Arc<dyn ExclusiveLease>,
        shards: Arc<dyn ShardHealth>,
        queue: Arc<JobQueue>,
        config: Arc<GeoConfig>,
    ) -> Self {
        Self {
            store,
            lease,
            shards,
            queue,
            config,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    pub async fn tick(&self, node: &GeoNode) -> Result<TickReport> {
        if let Some(reason) = self.precondition_failure(node)? {
            tracing::debug!("Skipping sync tick for node {}: {reason:?}", node.id);
            return Ok(TickReport::skipped(reason));
        }

        let key = format!("{LEASE_KEY_PREFIX}:{}", node.id);
        if !self.lease.try_obtain(&key, self.config.lease_timeout())? {
            tracing::debug!("Sync tick for node {} already running elsewhere", node.id);
            return Ok(TickReport::skipped(SkipReason::LeaseTaken));
        }

        let report = self.schedule(node, &key).await;

        if let Err(e) = self.lease.cancel(&key) {
            tracing::warn!("Could not release lease {key}: {e}");
        }

        tracing::info!(
            "Sync tick for node {} scheduled {} projects{}",
            node.id,
            report.scheduled.len(),
            if report.incomplete { " (incomplete)" } else { "" }
        );
        Ok(report)
    }

    fn precondition_failure(&self, node: &GeoNode) -> Result<Option<SkipReason>> {
        if !self.config.geo_database_configured {
            return Ok(Some(SkipReason::GeoDatabaseNotConfigured));
        }
        if !node.is_secondary() {
            return Ok(Some(SkipReason::NotSecondary));
        }
        if !node.enabled {
            return Ok(Some(SkipReason::NodeDisabled));
        }
        if self.store.get_primary_node()?.is_none() {
            return Ok(Some(SkipReason::NoPrimary));
        }
        Ok(None)
    }

    async fn schedule(&self, node: &GeoNode, key: &str) -> TickReport {
        let deadline = Instant::now() + self.config.max_run_time();
        let batch_size = self.config.db_retrieve_batch_size.max(1);
        let capacity_limit = node.repos_max_capacity as usize;
        let features = &self.config.features;
        let mut report = TickReport::default();

        let storages = self.shards.healthy_storages();
        if storages.is_empty() {
            tracing::warn!("No healthy repository storages, nothing to schedule");
            return report;
        }

        let filter = CandidateFilter {
            scope: NodeScope::for_node(node, features),
            storages,
            include_wikis: features.wiki_sync,
        };

        let mut categories = vec![Category::NeverSynced, Category::Failed];
        if features.dirty_refresh {
            categories.push(Category::Dirty);
        }
        let mut sources: Vec<_> = {
            let cursors = self.cursors();
            categories
                .into_iter()
                .map(|category| {
                    let start = cursors.get(&(node.id, category)).copied().unwrap_or(0);
                    CandidateSource::new(category, start)
                })
                .collect()
        };

        let mut seen = HashSet::new();

        loop {
            if Instant::now() >= deadline {
                report.incomplete = true;
                break;
            }

            match self.lease.renew(key, self.config.lease_timeout()) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!("Lost lease {key}, stopping tick");
                    report.incomplete = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!("Could not renew lease {key}: {e}");
                    report.incomplete = true;
                    break;
                }
            }

            let capacity = capacity_limit.saturating_sub(self.queue.in_flight());
            if capacity == 0 {
                break;
            }

            for source in &mut sources {
                source.refill(self.store.as_ref(), &filter, batch_size);
            }
            if sources.iter().all(CandidateSource::is_done) {
                break;
            }

            let batch = self.interleave(&mut sources, &mut seen, capacity);
            for project_id in batch {
                if self.queue.push(Job::new(project_id, node.id)) {
                    report.scheduled.push(project_id);
                }
            }

            let pacing = self.config.pacing();
            if !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            }
        }

        let mut cursors = self.cursors();
        for source in &sources {
            cursors.insert((node.id, source.category), source.resume_after());
        }

        report
    }

    fn cursors(&self) -> std::sync::MutexGuard<'_, HashMap<(i64, Category), i64>> {
        self.cursors.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Takes up to `capacity` new candidates, one per category in turn.
    fn interleave(
        &self,
        sources: &mut [CandidateSource],
        seen: &mut HashSet<i64>,
        capacity: usize,
    ) -> Vec<i64> {
        let mut batch = Vec::new();

        while batch.len() < capacity && sources.iter().any(|s| !s.buffer.is_empty()) {
            for source in sources.iter_mut() {
                if batch.len() >= capacity {
                    break;
                }
                while let Some(project_id) = source.pop() {
                    if self.queue.is_scheduled(project_id) || !seen.insert(project_id) {
                        continue;
                    }
                    batch.push(project_id);
                    break;
                }
            }
        }

        batch
    }
}
