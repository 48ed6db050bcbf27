use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::Result;
use crate::store::Store;

/// Short-lived lock keyed by name. Callers always check the returned flag.
pub trait ExclusiveLease: Send + Sync {
    fn try_obtain(&self, key: &str, ttl: Duration) -> Result<bool>;
    /// Extends a lease this holder owns. `false` once it was lost.
    fn renew(&self, key: &str, ttl: Duration) -> Result<bool>;
    fn cancel(&self, key: &str) -> Result<()>;
}

/// Lease stored in the `geo_leases` table, owned by a random per-instance uuid.
pub struct StoreLease {
    store: Arc<dyn Store>,
    uuid: String,
}

impl StoreLease {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            uuid: Uuid::new_v4().to_string(),
        }
    }
}

impl ExclusiveLease for StoreLease {
    fn try_obtain(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.store.try_obtain_lease(key, &self.uuid, ttl)
    }

    fn renew(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.store.renew_lease(key, &self.uuid, ttl)
    }

    fn cancel(&self, key: &str) -> Result<()> {
        if !self.store.release_lease(key, &self.uuid)? {
            tracing::debug!("Lease {key} was no longer held on release");
        }
        Ok(())
    }
}
