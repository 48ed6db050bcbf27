//! Replication core: who syncs what, when, and how far along each node is.

pub mod event_log;
pub mod health;
pub mod jobs;
pub mod lease;
pub mod mirror;
pub mod scheduler;
pub mod shard;
pub mod status;
pub mod sync;

pub use event_log::{EventBatchReport, EventLogProcessor, append_event};
pub use health::{HealthCheck, LocalHealthCheck};
pub use jobs::{DropJobsResult, Job, JobQueue, Queues};
pub use lease::{ExclusiveLease, StoreLease};
pub use mirror::{GitMirror, RepositoryMirror};
pub use scheduler::{RepositorySyncScheduler, SkipReason, TickReport};
pub use shard::{FsShardHealth, ShardHealth};
pub use status::StatusAggregator;
pub use sync::{ProjectSyncService, SyncOutcome};

/// Name of the queue repository sync jobs are dispatched to.
pub const REPOSITORY_SYNC_QUEUE: &str = "geo_project_sync";
