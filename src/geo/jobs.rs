use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

use super::ProjectSyncService;
use crate::error::{Error, Result};

/// Metadata keys `drop_jobs` can match on.
const METADATA_KEYS: [&str; 2] = ["project", "node"];

/// One unit of sync work, keyed by project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: Uuid,
    pub project_id: i64,
    pub node_id: i64,
    pub scheduled_at: DateTime<Utc>,
}

impl Job {
    #[must_use]
    pub fn new(project_id: i64, node_id: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            node_id,
            scheduled_at: Utc::now(),
        }
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Job>,
    running: HashSet<i64>,
}

impl QueueState {
    fn contains(&self, project_id: i64) -> bool {
        self.running.contains(&project_id) || self.pending.iter().any(|j| j.project_id == project_id)
    }
}

/// In-memory queue of sync jobs. A project is never queued or running twice.
pub struct JobQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl JobQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues `job` unless its project is already pending or running.
    pub fn push(&self, job: Job) -> bool {
        {
            let mut state = self.state();
            if state.contains(job.project_id) {
                return false;
            }
            state.pending.push_back(job);
        }
        self.notify.notify_one();
        true
    }

    /// Pending plus running jobs.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        let state = self.state();
        state.pending.len() + state.running.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_scheduled(&self, project_id: i64) -> bool {
        self.state().contains(project_id)
    }

    #[must_use]
    pub fn pending(&self) -> Vec<Job> {
        self.state().pending.iter().cloned().collect()
    }

    fn take(&self) -> Option<Job> {
        let mut state = self.state();
        let job = state.pending.pop_front()?;
        state.running.insert(job.project_id);
        Some(job)
    }

    fn finish(&self, project_id: i64) {
        self.state().running.remove(&project_id);
    }

    /// Removes pending jobs matching `matches`, giving up once `timeout` has
    /// elapsed. Returns the number removed and whether every job was visited.
    fn remove_where(&self, timeout: Duration, matches: impl Fn(&Job) -> bool) -> (usize, bool) {
        let start = Instant::now();
        let mut state = self.state();
        let mut kept = VecDeque::with_capacity(state.pending.len());
        let mut deleted = 0;
        let mut completed = true;

        while let Some(job) = state.pending.pop_front() {
            if start.elapsed() >= timeout {
                completed = false;
                kept.push_back(job);
                kept.extend(state.pending.drain(..));
                break;
            }
            if matches(&job) {
                deleted += 1;
            } else {
                kept.push_back(job);
            }
        }

        state.pending = kept;
        (deleted, completed)
    }

    async fn perform(&self, service: &ProjectSyncService, job: Job) {
        match service.sync(job.node_id, job.project_id).await {
            Ok(outcome) => tracing::debug!(
                "Job {} for project {} finished: {outcome:?}",
                job.id,
                job.project_id
            ),
            Err(e) => tracing::warn!("Job {} for project {} failed: {e}", job.id, job.project_id),
        }
        self.finish(job.project_id);
    }

    /// Runs every pending job to completion on the current task, one at a time.
    pub async fn drain(&self, service: &ProjectSyncService) -> usize {
        let mut performed = 0;
        while let Some(job) = self.take() {
            self.perform(service, job).await;
            performed += 1;
        }
        performed
    }

    /// Executes jobs as they arrive, at most `concurrency` at a time.
    pub async fn run(self: Arc<Self>, service: Arc<ProjectSyncService>, concurrency: usize) {
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        tracing::info!(
            "Queue {} started with concurrency {}",
            self.name,
            concurrency.max(1)
        );

        loop {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                return;
            };

            let job = loop {
                let notified = self.notify.notified();
                if let Some(job) = self.take() {
                    break job;
                }
                notified.await;
            };

            let queue = self.clone();
            let service = service.clone();
            tokio::spawn(async move {
                queue.perform(&service, job).await;
                drop(permit);
            });
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DropJobsResult {
    pub completed: bool,
    pub deleted_jobs: usize,
    pub queue_size: usize,
}

/// Named queues available to administration.
#[derive(Default)]
pub struct Queues {
    queues: HashMap<String, Arc<JobQueue>>,
}

impl Queues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, queue: Arc<JobQueue>) {
        self.queues.insert(queue.name().to_string(), queue);
    }

    pub fn get(&self, name: &str) -> Option<Arc<JobQueue>> {
        self.queues.get(name).cloned()
    }

    /// Deletes pending jobs of `queue` matching every recognized metadata key.
    /// Unrecognized keys are ignored, but at least one must be recognized.
    pub fn drop_jobs(
        &self,
        queue: &str,
        metadata: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<DropJobsResult> {
        let mut project = None;
        let mut node = None;

        for (key, value) in metadata {
            let target = match key.as_str() {
                "project" => &mut project,
                "node" => &mut node,
                _ => continue,
            };
            let id: i64 = value
                .parse()
                .map_err(|_| Error::BadRequest(format!("{key} must be an integer id")))?;
            *target = Some(id);
        }

        if project.is_none() && node.is_none() {
            let mut keys: Vec<&str> = metadata.keys().map(String::as_str).collect();
            keys.sort_unstable();
            return Err(Error::NoMetadata(format!(
                "{{{}}}, expected one of {}",
                keys.join(", "),
                METADATA_KEYS.join(", ")
            )));
        }

        let queue = self
            .get(queue)
            .ok_or_else(|| Error::InvalidQueue(queue.to_string()))?;

        let (deleted_jobs, completed) = queue.remove_where(timeout, |job| {
            project.is_none_or(|id| job.project_id == id) && node.is_none_or(|id| job.node_id == id)
        });

        tracing::info!(
            "Dropped {deleted_jobs} jobs from {} (completed: {completed})",
            queue.name()
        );

        Ok(DropJobsResult {
            completed,
            deleted_jobs,
            queue_size: queue.len(),
        })
    }
}
