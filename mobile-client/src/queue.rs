//! Durable queue of writes made while the server was unreachable.
//!
//! Entries are replayed oldest first. Each entry belongs to an entity
//! sub-queue (its `entity_key`); when an entry cannot be delivered, the
//! rest of its sub-queue waits for the next drain while other entities
//! carry on. An entry is removed only after the server accepted it.

use crate::config::RetryPolicy;
use crate::db::LocalDatabase;
use crate::error::{ClientError, StoreError};
use crate::mirror::{parse_timestamp, set_local_order_status};
use crate::models::{PendingAction, QueuedWrite, SyncStatus};
use crate::transport::SyncTransport;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one pass over the queue.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Delivered and removed.
    pub replayed: usize,
    /// Failed transiently and scheduled for another attempt.
    pub retried: usize,
    /// Parked as failed during this pass.
    pub failed: usize,
    /// Left untouched: not yet due, or behind a blocked entry of the same entity.
    pub skipped: usize,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.retried == 0 && self.failed == 0 && self.skipped == 0
    }
}

struct ActionRow {
    id: i64,
    entity_key: String,
    endpoint: String,
    method: String,
    payload: String,
    created_at: String,
    attempts: u32,
    status: String,
    next_attempt_at: Option<String>,
    last_error: Option<String>,
    local_order_id: Option<String>,
}

impl TryFrom<ActionRow> for PendingAction {
    type Error = StoreError;

    fn try_from(row: ActionRow) -> Result<Self, Self::Error> {
        Ok(PendingAction {
            id: row.id,
            entity_key: row.entity_key,
            endpoint: row.endpoint,
            method: row.method.parse()?,
            payload: serde_json::from_str(&row.payload)?,
            created_at: parse_timestamp(&row.created_at)?,
            attempts: row.attempts,
            status: row.status.parse()?,
            next_attempt_at: row.next_attempt_at.as_deref().map(parse_timestamp).transpose()?,
            last_error: row.last_error,
            local_order_id: row.local_order_id,
        })
    }
}

const SELECT_ACTIONS: &str = "SELECT id, entity_key, endpoint, method, payload, created_at, attempts,
        status, next_attempt_at, last_error, local_order_id
    FROM action_queue";

fn load_actions(conn: &Connection, filter: &str) -> Result<Vec<PendingAction>, StoreError> {
    let sql = format!("{} {} ORDER BY id", SELECT_ACTIONS, filter);
    let rows = conn
        .prepare(&sql)?
        .query_map([], |row| {
            Ok(ActionRow {
                id: row.get(0)?,
                entity_key: row.get(1)?,
                endpoint: row.get(2)?,
                method: row.get(3)?,
                payload: row.get(4)?,
                created_at: row.get(5)?,
                attempts: row.get(6)?,
                status: row.get(7)?,
                next_attempt_at: row.get(8)?,
                last_error: row.get(9)?,
                local_order_id: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(PendingAction::try_from).collect()
}

/// Appends `write` using an existing connection, so callers can enqueue
/// inside a wider transaction.
pub(crate) fn insert_action(conn: &Connection, write: &QueuedWrite) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO action_queue (entity_key, endpoint, method, payload, created_at, attempts, status, local_order_id)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
        params![
            write.entity_key,
            write.endpoint,
            write.method.as_str(),
            serde_json::to_string(&write.payload)?,
            Utc::now().to_rfc3339(),
            SyncStatus::Pending.as_str(),
            write.local_order_id
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

#[derive(Clone)]
pub struct ActionQueue {
    db: Arc<LocalDatabase>,
    policy: RetryPolicy,
}

impl ActionQueue {
    pub fn new(db: Arc<LocalDatabase>, policy: RetryPolicy) -> Self {
        Self { db, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn enqueue(&self, write: &QueuedWrite) -> Result<i64, StoreError> {
        let id = self.db.with_conn(|conn| insert_action(conn, write))?;
        info!(id, entity = %write.entity_key, endpoint = %write.endpoint, "Queued write for later sync");
        Ok(id)
    }

    /// Entries still waiting to be delivered.
    pub fn pending(&self) -> Result<Vec<PendingAction>, StoreError> {
        self.db.with_conn(|conn| load_actions(conn, "WHERE status = 'pending'"))
    }

    /// Every entry, including ones parked as failed.
    pub fn all(&self) -> Result<Vec<PendingAction>, StoreError> {
        self.db.with_conn(|conn| load_actions(conn, ""))
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM action_queue", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Whether `entity_key` has entries still waiting to be replayed. A new
    /// write for that entity must queue behind them rather than go straight
    /// to the server. Parked entries are out of line and do not count.
    pub fn has_backlog(&self, entity_key: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT id FROM action_queue WHERE entity_key = ?1 AND status = ?2 LIMIT 1",
                    params![entity_key, SyncStatus::Pending.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Puts a failed entry back in line with a fresh attempt budget.
    pub fn retry(&self, id: i64) -> Result<bool, StoreError> {
        let reset = self.db.with_transaction(|tx| {
            let local_order: Option<Option<String>> = tx
                .query_row(
                    "SELECT local_order_id FROM action_queue WHERE id = ?1 AND status = ?2",
                    params![id, SyncStatus::Failed.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(local_order) = local_order else {
                return Ok(false);
            };

            tx.execute(
                "UPDATE action_queue
                 SET status = ?1, attempts = 0, next_attempt_at = NULL, last_error = NULL
                 WHERE id = ?2",
                params![SyncStatus::Pending.as_str(), id],
            )?;
            if let Some(temp_id) = local_order {
                set_local_order_status(tx, &temp_id, SyncStatus::Pending)?;
            }
            Ok(true)
        })?;
        if reset {
            info!(id, "Failed write reset for retry");
        }
        Ok(reset)
    }

    /// Drops an entry without sending it.
    pub fn discard(&self, id: i64) -> Result<bool, StoreError> {
        let removed = self.db.with_transaction(|tx| {
            let local_order: Option<Option<String>> = tx
                .query_row("SELECT local_order_id FROM action_queue WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            let Some(local_order) = local_order else {
                return Ok(false);
            };

            tx.execute("DELETE FROM action_queue WHERE id = ?1", [id])?;
            if let Some(temp_id) = local_order {
                tx.execute("DELETE FROM local_orders WHERE temp_id = ?1", [temp_id])?;
            }
            Ok(true)
        })?;
        if removed {
            warn!(id, "Queued write discarded");
        }
        Ok(removed)
    }

    /// Replays due entries through `transport`, one at a time. Entries parked
    /// as failed are left alone until someone retries or discards them.
    pub async fn drain(&self, transport: &dyn SyncTransport) -> Result<DrainReport, StoreError> {
        let now = Utc::now();
        let actions = self.pending()?;
        let mut report = DrainReport::default();
        let mut blocked: HashSet<String> = HashSet::new();

        for action in actions {
            if blocked.contains(&action.entity_key) {
                report.skipped += 1;
                continue;
            }
            if !action.is_due(now) {
                report.skipped += 1;
                blocked.insert(action.entity_key);
                continue;
            }

            match transport.send(action.method, &action.endpoint, &action.payload).await {
                Ok(_) => {
                    self.complete(&action)?;
                    report.replayed += 1;
                    info!(id = action.id, endpoint = %action.endpoint, "Replayed queued write");
                }
                Err(err) => {
                    let attempts = action.attempts.saturating_add(1);
                    if err.is_retryable() && attempts < self.policy.max_attempts {
                        let next = next_attempt(now, self.policy.backoff(attempts));
                        self.defer(action.id, attempts, next, &err)?;
                        report.retried += 1;
                        warn!(id = action.id, attempts, error = %err, "Queued write failed, will retry");
                    } else {
                        self.park(&action, attempts, &err)?;
                        report.failed += 1;
                        warn!(id = action.id, attempts, error = %err, "Queued write marked failed");
                    }
                    blocked.insert(action.entity_key);
                }
            }
        }

        Ok(report)
    }

    fn complete(&self, action: &PendingAction) -> Result<(), StoreError> {
        self.db.with_transaction(|tx| {
            tx.execute("DELETE FROM action_queue WHERE id = ?1", [action.id])?;
            if let Some(temp_id) = &action.local_order_id {
                set_local_order_status(tx, temp_id, SyncStatus::Synced)?;
            }
            Ok(())
        })
    }

    fn defer(&self, id: i64, attempts: u32, next: DateTime<Utc>, err: &ClientError) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE action_queue SET attempts = ?1, next_attempt_at = ?2, last_error = ?3 WHERE id = ?4",
                params![attempts, next.to_rfc3339(), err.to_string(), id],
            )?;
            Ok(())
        })
    }

    fn park(&self, action: &PendingAction, attempts: u32, err: &ClientError) -> Result<(), StoreError> {
        self.db.with_transaction(|tx| {
            tx.execute(
                "UPDATE action_queue
                 SET status = ?1, attempts = ?2, next_attempt_at = NULL, last_error = ?3
                 WHERE id = ?4",
                params![SyncStatus::Failed.as_str(), attempts, err.to_string(), action.id],
            )?;
            if let Some(temp_id) = &action.local_order_id {
                set_local_order_status(tx, temp_id, SyncStatus::Failed)?;
            }
            Ok(())
        })
    }
}

fn next_attempt(now: DateTime<Utc>, delay: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(now)
}
