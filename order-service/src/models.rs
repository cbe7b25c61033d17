use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::*;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::orders)]
pub struct Order {
    pub id: i32,
    pub table_id: i32,
    pub user_id: i32,
    pub created_at: DateTime<Utc>,
    pub subtotal: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total: BigDecimal,
    pub status: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewOrder {
    pub table_id: i32,
    pub user_id: i32,
    pub subtotal: BigDecimal,
    pub tax_amount: BigDecimal,
    pub total: BigDecimal,
    pub status: String,
}

impl NewOrder {
    pub fn open(table_id: i32, user_id: i32) -> Self {
        let totals = BillTotals::zero();
        Self {
            table_id,
            user_id,
            subtotal: totals.subtotal,
            tax_amount: totals.tax_amount,
            total: totals.total,
            status: OrderStatus::AwaitingPayment.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::order_items)]
pub struct OrderItem {
    pub id: i32,
    pub order_id: i32,
    pub dish_id: i32,
    pub quantity: i32,
    pub price: BigDecimal,
    pub notes: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::order_items)]
pub struct NewOrderItem {
    pub order_id: i32,
    pub dish_id: i32,
    pub quantity: i32,
    pub price: BigDecimal,
    pub notes: Option<String>,
    pub status: String,
}

impl NewOrderItem {
    /// New lines always start in the kitchen, at the price the caller quoted.
    pub fn from_input(order_id: i32, input: &OrderItemInput) -> Self {
        Self {
            order_id,
            dish_id: input.id,
            quantity: input.quantity,
            price: input.price.clone(),
            notes: input.notes.clone(),
            status: OrderItemStatus::Preparing.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::tables)]
pub struct DiningTable {
    pub id: i32,
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::categories)]
pub struct Category {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::dishes)]
pub struct Dish {
    pub id: i32,
    pub name: String,
    pub price: BigDecimal,
    pub image: Option<String>,
    pub category_id: i32,
}

impl TryFrom<Order> for OrderView {
    type Error = ParseStatusError;

    fn try_from(order: Order) -> Result<Self, Self::Error> {
        Ok(Self {
            id: order.id,
            table_id: order.table_id,
            user_id: order.user_id,
            created_at: order.created_at,
            subtotal: order.subtotal,
            tax_amount: order.tax_amount,
            total: order.total,
            status: order.status.parse()?,
        })
    }
}

/// Builds the wire view of a line from its row and the joined dish name.
pub fn item_view(item: OrderItem, dish_name: String) -> Result<OrderItemView, ParseStatusError> {
    Ok(OrderItemView {
        id: item.id,
        order_id: item.order_id,
        dish_id: item.dish_id,
        dish_name,
        quantity: item.quantity,
        price: item.price,
        notes: item.notes,
        status: item.status.parse()?,
    })
}

impl TryFrom<DiningTable> for TableView {
    type Error = ParseStatusError;

    fn try_from(table: DiningTable) -> Result<Self, Self::Error> {
        Ok(Self {
            id: table.id,
            name: table.name,
            status: table.status.parse()?,
        })
    }
}

impl From<Dish> for DishView {
    fn from(dish: Dish) -> Self {
        Self {
            id: dish.id,
            name: dish.name,
            price: dish.price,
            image: dish.image,
            category_id: dish.category_id,
        }
    }
}
