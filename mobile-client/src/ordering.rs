//! Order-taking entry points for the app.
//!
//! Every write tries the server first. If the server cannot be reached, or
//! the entity already has writes waiting in the queue, the write is queued
//! and the mirror is updated as if it had gone through. Rejections from the
//! server are returned to the caller and never queued.

use crate::db::LocalDatabase;
use crate::error::{ClientError, SyncError};
use crate::mirror::{insert_local_order, mark_table, LocalMirror};
use crate::models::{LocalOrder, QueuedWrite, SyncStatus};
use crate::queue::{insert_action, ActionQueue};
use crate::sync::SyncCoordinator;
use crate::transport::SyncTransport;
use chrono::Utc;
use shared::{CreateOrderRequest, CreateOrderResponse, OrderItemStatus, TableStatus};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacedOrder {
    /// The server stored the order.
    Confirmed { order_id: i32 },
    /// Stored on the device; `temp_id` identifies the local order until it syncs.
    Queued { temp_id: String, action_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Queued { action_id: i64 },
}

pub struct OrderingClient {
    db: Arc<LocalDatabase>,
    transport: Arc<dyn SyncTransport>,
    mirror: LocalMirror,
    queue: ActionQueue,
    online: Option<watch::Receiver<bool>>,
}

impl OrderingClient {
    pub fn new(coordinator: &SyncCoordinator) -> Self {
        Self {
            db: coordinator.database(),
            transport: coordinator.transport(),
            mirror: coordinator.mirror().clone(),
            queue: coordinator.queue().clone(),
            online: None,
        }
    }

    /// Skips the network attempt while `online` reads false.
    pub fn with_connectivity(mut self, online: watch::Receiver<bool>) -> Self {
        self.online = Some(online);
        self
    }

    fn known_offline(&self) -> bool {
        self.online.as_ref().is_some_and(|online| !*online.borrow())
    }

    /// Whether a write for `entity_key` may go straight to the server.
    fn can_send_now(&self, entity_key: &str) -> Result<bool, SyncError> {
        Ok(!self.known_offline() && !self.queue.has_backlog(entity_key)?)
    }

    pub async fn place_order(&self, request: CreateOrderRequest) -> Result<PlacedOrder, SyncError> {
        request.validate().map_err(ClientError::Validation)?;
        let write = QueuedWrite::create_order(&request).map_err(ClientError::from)?;

        if self.can_send_now(&write.entity_key)? {
            match self.transport.send(write.method, &write.endpoint, &write.payload).await {
                Ok(body) => {
                    let response: CreateOrderResponse = serde_json::from_value(body).map_err(ClientError::from)?;
                    self.mirror.mark_table(request.table_id, TableStatus::Occupied)?;
                    info!(order_id = response.order_id, table_id = request.table_id, "Order placed");
                    return Ok(PlacedOrder::Confirmed { order_id: response.order_id });
                }
                Err(e) if e.is_retryable() => {
                    warn!(table_id = request.table_id, error = %e, "Server unavailable, queuing order");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let order = LocalOrder {
            temp_id: Uuid::new_v4().to_string(),
            table_id: request.table_id,
            user_id: request.user_id,
            items: request.items,
            created_at: Utc::now(),
            sync_status: SyncStatus::Pending,
        };
        let write = write.with_local_order(order.temp_id.clone());

        let action_id = self.db.with_transaction(|tx| {
            insert_local_order(tx, &order)?;
            let action_id = insert_action(tx, &write)?;
            mark_table(tx, order.table_id, TableStatus::Occupied)?;
            Ok(action_id)
        })?;

        info!(temp_id = %order.temp_id, action_id, table_id = order.table_id, "Order queued for sync");
        Ok(PlacedOrder::Queued { temp_id: order.temp_id, action_id })
    }

    pub async fn checkout(&self, order_id: i32, table_id: i32) -> Result<Delivery, SyncError> {
        let delivery = self.submit(QueuedWrite::checkout(order_id, table_id)).await?;
        self.mirror.mark_table(table_id, TableStatus::Empty)?;
        Ok(delivery)
    }

    pub async fn advance_item(&self, item_id: i32, status: OrderItemStatus) -> Result<Delivery, SyncError> {
        let write = QueuedWrite::advance_item(item_id, status)
            .ok_or_else(|| ClientError::Validation(format!("Item cannot be moved back to {}", status)))?;
        self.submit(write).await
    }

    async fn submit(&self, write: QueuedWrite) -> Result<Delivery, SyncError> {
        if self.can_send_now(&write.entity_key)? {
            match self.transport.send(write.method, &write.endpoint, &write.payload).await {
                Ok(_) => return Ok(Delivery::Sent),
                Err(e) if e.is_retryable() => {
                    warn!(endpoint = %write.endpoint, error = %e, "Server unavailable, queuing write");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let action_id = self.queue.enqueue(&write)?;
        Ok(Delivery::Queued { action_id })
    }
}
