//! Reacts to connectivity changes: pulls reference data and replays queued writes.

use crate::config::ClientConfig;
use crate::db::LocalDatabase;
use crate::error::{StoreError, SyncError};
use crate::mirror::LocalMirror;
use crate::queue::{ActionQueue, DrainReport};
use crate::transport::SyncTransport;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

pub struct SyncCoordinator {
    db: Arc<LocalDatabase>,
    transport: Arc<dyn SyncTransport>,
    mirror: LocalMirror,
    queue: ActionQueue,
    draining: Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(db: Arc<LocalDatabase>, transport: Arc<dyn SyncTransport>, config: &ClientConfig) -> Self {
        Self {
            mirror: LocalMirror::new(db.clone(), config.category_order.clone()),
            queue: ActionQueue::new(db.clone(), config.retry.clone()),
            db,
            transport,
            draining: Mutex::new(()),
        }
    }

    pub fn database(&self) -> Arc<LocalDatabase> {
        self.db.clone()
    }

    pub fn mirror(&self) -> &LocalMirror {
        &self.mirror
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    pub fn transport(&self) -> Arc<dyn SyncTransport> {
        self.transport.clone()
    }

    /// Prepares the local schema and, when online, catches up with the server.
    pub async fn start(&self, online: bool) -> Result<Option<DrainReport>, SyncError> {
        self.db.initialize()?;
        info!(online, "Sync coordinator started");
        if !online {
            return Ok(None);
        }
        Ok(self.catch_up().await)
    }

    /// Replaces the mirrored tables and menu with the server's current copy.
    pub async fn refresh_static_data(&self) -> Result<(), SyncError> {
        let tables = self.transport.fetch_tables().await?;
        self.mirror.replace_tables(&tables)?;

        let menu = self.transport.fetch_menu().await?;
        self.mirror.replace_menu(&menu)?;

        info!(tables = tables.len(), categories = menu.len(), "Static data refreshed");
        Ok(())
    }

    /// Replays the action queue. Returns `None` when another drain is
    /// already in progress; that drain covers the request.
    pub async fn drain(&self) -> Result<Option<DrainReport>, StoreError> {
        let Ok(_guard) = self.draining.try_lock() else {
            info!("Drain already in progress, skipping");
            return Ok(None);
        };

        let report = self.queue.drain(self.transport.as_ref()).await?;
        if report.is_clean() {
            info!(replayed = report.replayed, "Action queue drained");
        } else {
            warn!(
                replayed = report.replayed,
                retried = report.retried,
                failed = report.failed,
                skipped = report.skipped,
                "Action queue drained with leftovers"
            );
        }
        Ok(Some(report))
    }

    /// Watches `online` until the sender goes away, draining on every
    /// offline to online transition.
    pub async fn run(&self, mut online: watch::Receiver<bool>) {
        let mut was_online = *online.borrow_and_update();

        while online.changed().await.is_ok() {
            let is_online = *online.borrow_and_update();
            match (was_online, is_online) {
                (false, true) => {
                    info!("Connectivity restored");
                    self.catch_up().await;
                }
                (true, false) => warn!("Connectivity lost, writes will be queued"),
                _ => {}
            }
            was_online = is_online;
        }
    }

    /// Queued writes go first so the refreshed mirror reflects them.
    async fn catch_up(&self) -> Option<DrainReport> {
        let report = match self.drain().await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Failed to drain action queue");
                None
            }
        };
        if let Err(e) = self.refresh_static_data().await {
            warn!(error = %e, "Failed to refresh static data");
        }
        report
    }
}
