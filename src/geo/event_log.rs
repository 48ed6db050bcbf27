use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{EventLogEntry, EventType, GeoNode, NewEvent, RepoKind};

/// Appends an event to the log. Only the primary writes to its log.
pub fn append_event(store: &dyn Store, current: &GeoNode, event: &NewEvent) -> Result<EventLogEntry> {
    if !current.is_primary() {
        return Err(Error::Conflict(
            "events can only be appended on the primary".to_string(),
        ));
    }

    let entry = store.append_event(event)?;
    tracing::debug!(
        "Appended event {} ({}) for project {}",
        entry.id,
        entry.event_type.as_str(),
        entry.project_id
    );
    Ok(entry)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventBatchReport {
    pub processed: usize,
    pub cursor: i64,
}

/// Consumes the event log on a secondary, one batch per call.
pub struct EventLogProcessor {
    store: Arc<dyn Store>,
    batch_size: usize,
}

impl EventLogProcessor {
    pub fn new(store: Arc<dyn Store>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Applies the events after `node`'s cursor and moves the cursor past the
    /// ones that were consumed. Events for projects this node does not know are
    /// skipped. Any other failure ends the batch at the failing event, which is
    /// retried on the next run.
    pub fn run_once(&self, node: &GeoNode) -> Result<EventBatchReport> {
        let cursor = self
            .store
            .get_event_log_state(node.id)?
            .map_or(0, |state| state.event_id);

        if !node.is_secondary() {
            return Ok(EventBatchReport {
                processed: 0,
                cursor,
            });
        }

        let events = self.store.list_events_after(cursor, self.batch_size)?;
        let mut consumed = None;
        let mut processed = 0;

        for event in &events {
            match self.apply(node, event) {
                Ok(()) => {}
                Err(Error::NotFound) => {
                    tracing::warn!(
                        "Skipping event {} for unknown project {}",
                        event.id,
                        event.project_id
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Event {} for project {} failed, retrying next run: {e}",
                        event.id,
                        event.project_id
                    );
                    break;
                }
            }
            consumed = Some(event.id);
            processed += 1;
        }

        let Some(last) = consumed else {
            return Ok(EventBatchReport {
                processed: 0,
                cursor,
            });
        };

        let cursor = self.store.advance_event_cursor(node.id, last)?;
        tracing::debug!("Node {} processed {processed} events, cursor at {cursor}", node.id);

        Ok(EventBatchReport { processed, cursor })
    }

    fn apply(&self, node: &GeoNode, event: &EventLogEntry) -> Result<()> {
        if event.event_type != EventType::RepositoryDeleted
            && self.store.get_project(event.project_id)?.is_none()
        {
            return Err(Error::NotFound);
        }

        match event.event_type {
            EventType::RepositoryUpdated => self.store.request_resync(
                node.id,
                event.project_id,
                event.source.unwrap_or(RepoKind::Repository),
            ),
            EventType::RepositoryCreated | EventType::RepositoryRenamed => {
                self.store
                    .request_resync(node.id, event.project_id, RepoKind::Repository)
            }
            EventType::RepositoryDeleted => self
                .store
                .delete_project_registry(node.id, event.project_id)
                .map(|_| ()),
        }
    }
}
