use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Percentage of the subtotal charged as tax on every bill.
pub const TAX_RATE_PERCENT: u32 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} status: {value}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    AwaitingPayment,
    Paid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::AwaitingPayment => "awaiting_payment",
            OrderStatus::Paid => "paid",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_payment" => Ok(OrderStatus::AwaitingPayment),
            "paid" => Ok(OrderStatus::Paid),
            _ => Err(ParseStatusError { kind: "order", value: s.to_string() }),
        }
    }
}

/// Preparation state of a single order line. Variants are declared in
/// lifecycle order, so `Ord` reflects how far along an item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderItemStatus {
    Preparing,
    Ready,
    Served,
}

impl OrderItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderItemStatus::Preparing => "preparing",
            OrderItemStatus::Ready => "ready",
            OrderItemStatus::Served => "served",
        }
    }

    /// Statuses an item may be in for a move to `self` to be a forward step.
    pub fn predecessors(&self) -> Vec<OrderItemStatus> {
        [OrderItemStatus::Preparing, OrderItemStatus::Ready, OrderItemStatus::Served]
            .into_iter()
            .filter(|status| status < self)
            .collect()
    }
}

impl FromStr for OrderItemStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preparing" => Ok(OrderItemStatus::Preparing),
            "ready" => Ok(OrderItemStatus::Ready),
            "served" => Ok(OrderItemStatus::Served),
            _ => Err(ParseStatusError { kind: "order item", value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Empty,
    Occupied,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Empty => "empty",
            TableStatus::Occupied => "occupied",
        }
    }
}

impl FromStr for TableStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "empty" => Ok(TableStatus::Empty),
            "occupied" => Ok(TableStatus::Occupied),
            _ => Err(ParseStatusError { kind: "table", value: s.to_string() }),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for OrderItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running amounts of a bill, always derived from the full set of lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillTotals {
    pub subtotal: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total: BigDecimal,
}

impl BillTotals {
    pub fn zero() -> Self {
        Self {
            subtotal: BigDecimal::from(0),
            tax_amount: BigDecimal::from(0),
            total: BigDecimal::from(0),
        }
    }

    pub fn from_lines<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = (&'a BigDecimal, i32)>,
    {
        let subtotal = lines
            .into_iter()
            .fold(BigDecimal::from(0), |acc, (price, quantity)| acc + price * BigDecimal::from(quantity));
        let tax_amount = (&subtotal * BigDecimal::from(TAX_RATE_PERCENT) / BigDecimal::from(100)).round(2);
        let total = &subtotal + &tax_amount;

        Self { subtotal, tax_amount, total }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemInput {
    /// Dish being ordered.
    pub id: i32,
    pub quantity: i32,
    /// Unit price as shown to the guest; stored as-is on the order line.
    pub price: BigDecimal,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub table_id: i32,
    pub user_id: i32,
    pub items: Vec<OrderItemInput>,
}

impl CreateOrderRequest {
    /// Shape checks that need no database access.
    pub fn validate(&self) -> Result<(), String> {
        if self.items.is_empty() {
            return Err("Order must contain at least one item".to_string());
        }
        for item in &self.items {
            if item.quantity <= 0 {
                return Err(format!("Quantity for dish {} must be positive", item.id));
            }
            if item.price < BigDecimal::from(0) {
                return Err(format!("Price for dish {} must not be negative", item.id));
            }
        }
        Ok(())
    }

    pub fn dish_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.items.iter().map(|item| item.id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub order_id: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub order_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: i32,
    pub table_id: i32,
    pub user_id: i32,
    pub created_at: DateTime<Utc>,
    pub subtotal: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total: BigDecimal,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemView {
    pub id: i32,
    pub order_id: i32,
    pub dish_id: i32,
    pub dish_name: String,
    pub quantity: i32,
    pub price: BigDecimal,
    pub notes: Option<String>,
    pub status: OrderItemStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableOrderResponse {
    pub order: Option<OrderView>,
    pub items: Vec<OrderItemView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KitchenOrder {
    #[serde(flatten)]
    pub order: OrderView,
    pub table_name: String,
    pub items: Vec<OrderItemView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KitchenOrdersPage {
    pub orders: Vec<KitchenOrder>,
    pub total_pages: i64,
    pub current_page: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableView {
    pub id: i32,
    pub name: String,
    pub status: TableStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DishView {
    pub id: i32,
    pub name: String,
    pub price: BigDecimal,
    #[serde(default)]
    pub image: Option<String>,
    pub category_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuCategory {
    pub id: i32,
    pub name: String,
    pub dishes: Vec<DishView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Notification pushed to every connected display. Serialized as
/// `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RealtimeEvent {
    TableStatusUpdated { table_id: i32, status: TableStatus },
    NewOrder,
    OrderStatusUpdated { order_item_id: i32, status: OrderItemStatus },
}

impl RealtimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RealtimeEvent::TableStatusUpdated { .. } => "table_status_updated",
            RealtimeEvent::NewOrder => "new_order",
            RealtimeEvent::OrderStatusUpdated { .. } => "order_status_updated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price(value: i64) -> BigDecimal {
        BigDecimal::from(value)
    }

    #[test]
    fn totals_apply_eight_percent_tax() {
        let p = price(20000);
        let totals = BillTotals::from_lines([(&p, 2)]);
        assert_eq!(totals.subtotal, price(40000));
        assert_eq!(totals.tax_amount, price(3200));
        assert_eq!(totals.total, price(43200));
    }

    #[test]
    fn totals_cover_every_line() {
        let first = price(20000);
        let second = price(15000);
        let totals = BillTotals::from_lines([(&first, 2), (&second, 1)]);
        assert_eq!(totals.subtotal, price(55000));
        assert_eq!(totals.tax_amount, price(4400));
        assert_eq!(totals.total, price(59400));
    }

    #[test]
    fn tax_is_rounded_to_cents() {
        let p: BigDecimal = "0.99".parse().unwrap();
        let totals = BillTotals::from_lines([(&p, 1)]);
        // 0.99 * 8% = 0.0792
        assert_eq!(totals.tax_amount, "0.08".parse::<BigDecimal>().unwrap());
        assert_eq!(totals.total, "1.07".parse::<BigDecimal>().unwrap());
    }

    #[test]
    fn empty_bill_is_zero() {
        let totals = BillTotals::from_lines(std::iter::empty());
        assert_eq!(totals, BillTotals::zero());
    }

    #[test]
    fn item_status_only_moves_forward() {
        assert!(OrderItemStatus::Preparing < OrderItemStatus::Ready);
        assert!(OrderItemStatus::Ready < OrderItemStatus::Served);
        assert!(OrderItemStatus::Preparing.predecessors().is_empty());
        assert_eq!(OrderItemStatus::Ready.predecessors(), vec![OrderItemStatus::Preparing]);
        assert_eq!(
            OrderItemStatus::Served.predecessors(),
            vec![OrderItemStatus::Preparing, OrderItemStatus::Ready]
        );
    }

    #[test]
    fn statuses_round_trip_through_storage_strings() {
        for status in [OrderStatus::AwaitingPayment, OrderStatus::Paid] {
            assert_eq!(status.as_str().parse::<OrderStatus>(), Ok(status));
        }
        for status in [TableStatus::Empty, TableStatus::Occupied] {
            assert_eq!(status.as_str().parse::<TableStatus>(), Ok(status));
        }
        let err = "cooking".parse::<OrderItemStatus>().unwrap_err();
        assert_eq!(err.to_string(), "unknown order item status: cooking");
    }

    #[test]
    fn create_request_rejects_empty_and_non_positive_items() {
        let mut request: CreateOrderRequest = serde_json::from_value(serde_json::json!({
            "tableId": 2,
            "userId": 1,
            "items": [{"id": 1, "quantity": 2, "price": 20000}]
        }))
        .unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(request.items[0].notes, None);

        request.items[0].quantity = 0;
        assert!(request.validate().is_err());

        request.items.clear();
        assert_eq!(
            request.validate().unwrap_err(),
            "Order must contain at least one item"
        );
    }

    #[test]
    fn dish_ids_are_deduplicated() {
        let request: CreateOrderRequest = serde_json::from_value(serde_json::json!({
            "tableId": 2,
            "userId": 1,
            "items": [
                {"id": 3, "quantity": 1, "price": 10},
                {"id": 1, "quantity": 1, "price": 10},
                {"id": 3, "quantity": 2, "price": 10, "notes": "no ice"}
            ]
        }))
        .unwrap();
        assert_eq!(request.dish_ids(), vec![1, 3]);
    }

    #[test]
    fn order_items_compare_by_value() {
        let item = OrderItemInput { id: 3, quantity: 2, price: "10.50".parse().unwrap(), notes: None };
        let same: OrderItemInput =
            serde_json::from_value(serde_json::json!({"id": 3, "quantity": 2, "price": "10.5"})).unwrap();
        assert_eq!(item, same);
        assert_ne!(item, OrderItemInput { quantity: 1, ..item.clone() });
        assert_ne!(item, OrderItemInput { notes: Some("no ice".into()), ..item.clone() });
    }

    #[test]
    fn realtime_events_use_wire_names() {
        let event = RealtimeEvent::TableStatusUpdated { table_id: 2, status: TableStatus::Occupied };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"event": "table_status_updated", "data": {"tableId": 2, "status": "occupied"}})
        );

        assert_eq!(
            serde_json::to_value(RealtimeEvent::NewOrder).unwrap(),
            serde_json::json!({"event": "new_order"})
        );

        let event = RealtimeEvent::OrderStatusUpdated { order_item_id: 7, status: OrderItemStatus::Served };
        assert_eq!(event.name(), "order_status_updated");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"event": "order_status_updated", "data": {"orderItemId": 7, "status": "served"}})
        );
    }
}
