//! Periodic keep-alive sweep of expired task records.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::store::TaskStore;

/// Run [`TaskStore::sweep`] every `interval` until the handle is aborted.
pub fn spawn_sweeper(store: Arc<TaskStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "task sweeper started");
        loop {
            tokio::time::sleep(interval).await;
            let purged = store.sweep();
            debug!(purged, remaining = store.len(), "sweep pass");
        }
    })
}
