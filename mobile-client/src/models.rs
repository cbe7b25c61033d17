use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{CreateOrderRequest, OrderItemInput, OrderItemStatus, ParseStatusError};
use std::fmt;
use std::str::FromStr;

pub const ORDERS_ENDPOINT: &str = "/api/orders";
pub const CHECKOUT_ENDPOINT: &str = "/api/checkout";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(ParseStatusError { kind: "http method", value: s.to_string() }),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(ParseStatusError { kind: "sync", value: s.to_string() }),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write waiting to be sent to the server.
///
/// `entity_key` names the sub-queue the write belongs to. Writes sharing a
/// key are replayed strictly in order; writes with different keys are
/// independent of each other.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedWrite {
    pub entity_key: String,
    pub endpoint: String,
    pub method: HttpMethod,
    pub payload: serde_json::Value,
    pub local_order_id: Option<String>,
}

impl QueuedWrite {
    pub fn create_order(request: &CreateOrderRequest) -> Result<Self, serde_json::Error> {
        Ok(Self {
            entity_key: table_key(request.table_id),
            endpoint: ORDERS_ENDPOINT.to_string(),
            method: HttpMethod::Post,
            payload: serde_json::to_value(request)?,
            local_order_id: None,
        })
    }

    /// Keyed by table so it stays behind any queued orders for that table.
    pub fn checkout(order_id: i32, table_id: i32) -> Self {
        Self {
            entity_key: table_key(table_id),
            endpoint: CHECKOUT_ENDPOINT.to_string(),
            method: HttpMethod::Post,
            payload: serde_json::json!({ "orderId": order_id }),
            local_order_id: None,
        }
    }

    /// `None` for `Preparing`, which is never a target.
    pub fn advance_item(item_id: i32, status: OrderItemStatus) -> Option<Self> {
        let action = match status {
            OrderItemStatus::Preparing => return None,
            OrderItemStatus::Ready => "complete",
            OrderItemStatus::Served => "serve",
        };
        Some(Self {
            entity_key: format!("item:{}", item_id),
            endpoint: format!("/api/order-items/{}/{}", item_id, action),
            method: HttpMethod::Patch,
            payload: serde_json::Value::Null,
            local_order_id: None,
        })
    }

    pub fn with_local_order(mut self, temp_id: impl Into<String>) -> Self {
        self.local_order_id = Some(temp_id.into());
        self
    }
}

pub fn table_key(table_id: i32) -> String {
    format!("table:{}", table_id)
}

/// One row of the action queue.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub id: i64,
    pub entity_key: String,
    pub endpoint: String,
    pub method: HttpMethod,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub status: SyncStatus,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub local_order_id: Option<String>,
}

impl PendingAction {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

/// An order placed on this device that the server has not confirmed yet.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalOrder {
    pub temp_id: String,
    pub table_id: i32,
    pub user_id: i32,
    pub items: Vec<OrderItemInput>,
    pub created_at: DateTime<Utc>,
    pub sync_status: SyncStatus,
}
