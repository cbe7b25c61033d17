use bigdecimal::BigDecimal;
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use crate::error::ServiceError;
use crate::events::EventPublisher;
use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Paging window for the kitchen display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KitchenPage {
    pub page: i64,
    pub limit: i64,
    pub date: NaiveDate,
}

impl KitchenPage {
    pub fn new(page: Option<i64>, limit: Option<i64>, date: Option<NaiveDate>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            date: date.unwrap_or_else(|| Utc::now().date_naive()),
        }
    }

    /// Saturates for absurd page numbers; such a page is simply empty.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn total_pages(&self, total_rows: i64) -> i64 {
        (total_rows + self.limit - 1) / self.limit
    }
}

/// Sole writer of orders, order lines and table occupancy.
#[derive(Clone)]
pub struct OrderService {
    pool: DbPool,
    events: Arc<dyn EventPublisher>,
}

impl OrderService {
    pub fn new(pool: DbPool, events: Arc<dyn EventPublisher>) -> Self {
        Self { pool, events }
    }

    async fn conn(&self) -> Result<diesel_async::pooled_connection::bb8::PooledConnection<'_, AsyncPgConnection>, ServiceError> {
        Ok(self.pool.get().await?)
    }

    /// Adds a batch of lines to the table's open bill, opening one if the
    /// table is empty. Returns the order id.
    pub async fn create_or_amend(&self, request: CreateOrderRequest) -> Result<i32, ServiceError> {
        request.validate().map_err(ServiceError::Validation)?;

        let table_id = request.table_id;
        let item_count = request.items.len();
        let mut conn = self.conn().await?;

        let (order_id, opened) = conn.transaction::<_, ServiceError, _>(|conn| {
            Box::pin(async move {
                // Row lock on the table serializes concurrent orders for it.
                let table = tables::table
                    .find(request.table_id)
                    .select(tables::id)
                    .for_update()
                    .first::<i32>(conn)
                    .await
                    .optional()?;
                if table.is_none() {
                    return Err(ServiceError::Validation(format!("Table {} does not exist", request.table_id)));
                }

                let user = users::table
                    .find(request.user_id)
                    .select(users::id)
                    .first::<i32>(conn)
                    .await
                    .optional()?;
                if user.is_none() {
                    return Err(ServiceError::Validation(format!("User {} does not exist", request.user_id)));
                }

                let dish_ids = request.dish_ids();
                let known: Vec<i32> = dishes::table
                    .filter(dishes::id.eq_any(&dish_ids))
                    .select(dishes::id)
                    .load(conn)
                    .await?;
                let missing: Vec<i32> = dish_ids.into_iter().filter(|id| !known.contains(id)).collect();
                if !missing.is_empty() {
                    return Err(ServiceError::Validation(format!("Unknown dish ids: {:?}", missing)));
                }

                let existing = orders::table
                    .filter(orders::table_id.eq(request.table_id))
                    .filter(orders::status.eq(OrderStatus::AwaitingPayment.as_str()))
                    .order(orders::created_at.desc())
                    .select(orders::id)
                    .first::<i32>(conn)
                    .await
                    .optional()?;

                let (order_id, opened) = match existing {
                    Some(order_id) => (order_id, false),
                    None => {
                        let order_id = diesel::insert_into(orders::table)
                            .values(&NewOrder::open(request.table_id, request.user_id))
                            .returning(orders::id)
                            .get_result::<i32>(conn)
                            .await?;

                        diesel::update(tables::table.find(request.table_id))
                            .set(tables::status.eq(TableStatus::Occupied.as_str()))
                            .execute(conn)
                            .await?;

                        (order_id, true)
                    }
                };

                let new_items: Vec<NewOrderItem> = request
                    .items
                    .iter()
                    .map(|item| NewOrderItem::from_input(order_id, item))
                    .collect();
                diesel::insert_into(order_items::table)
                    .values(&new_items)
                    .execute(conn)
                    .await?;

                let lines: Vec<(BigDecimal, i32)> = order_items::table
                    .filter(order_items::order_id.eq(order_id))
                    .select((order_items::price, order_items::quantity))
                    .load(conn)
                    .await?;
                let totals = BillTotals::from_lines(lines.iter().map(|(price, quantity)| (price, *quantity)));

                diesel::update(orders::table.find(order_id))
                    .set((
                        orders::subtotal.eq(totals.subtotal),
                        orders::tax_amount.eq(totals.tax_amount),
                        orders::total.eq(totals.total),
                    ))
                    .execute(conn)
                    .await?;

                Ok((order_id, opened))
            })
        }).await?;

        if opened {
            info!("Opened order {} for table {}", order_id, table_id);
            self.events.publish(RealtimeEvent::TableStatusUpdated {
                table_id,
                status: TableStatus::Occupied,
            });
        }
        info!("Added {} items to order {}", item_count, order_id);
        self.events.publish(RealtimeEvent::NewOrder);

        Ok(order_id)
    }

    /// Moves a line forward to `target`. Returns `false` when it was already
    /// there; moving backwards is rejected.
    pub async fn advance_item_status(&self, item_id: i32, target: OrderItemStatus) -> Result<bool, ServiceError> {
        let mut conn = self.conn().await?;

        let predecessors = target.predecessors();
        let allowed: Vec<&str> = predecessors.iter().map(OrderItemStatus::as_str).collect();
        let updated = diesel::update(
            order_items::table
                .filter(order_items::id.eq(item_id))
                .filter(order_items::status.eq_any(allowed)),
        )
        .set(order_items::status.eq(target.as_str()))
        .execute(&mut conn)
        .await?;

        if updated == 0 {
            let current = order_items::table
                .find(item_id)
                .select(order_items::status)
                .first::<String>(&mut conn)
                .await
                .optional()?;

            return match current {
                None => Err(ServiceError::NotFound(format!("Order item {} not found", item_id))),
                Some(current) => {
                    let current: OrderItemStatus = current.parse()?;
                    if current == target {
                        Ok(false)
                    } else {
                        Err(ServiceError::Validation(format!(
                            "Order item {} is already {}, cannot move it to {}",
                            item_id, current, target
                        )))
                    }
                }
            };
        }

        info!("Order item {} is now {}", item_id, target);
        self.events.publish(RealtimeEvent::OrderStatusUpdated {
            order_item_id: item_id,
            status: target,
        });

        Ok(true)
    }

    /// Marks the order paid and frees its table in one transaction. Returns
    /// the freed table id.
    pub async fn checkout(&self, order_id: i32) -> Result<i32, ServiceError> {
        let mut conn = self.conn().await?;

        let table_id = conn.transaction::<_, ServiceError, _>(|conn| {
            Box::pin(async move {
                let table_id = orders::table
                    .find(order_id)
                    .select(orders::table_id)
                    .first::<i32>(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

                // Same lock order as create_or_amend: table first, then order.
                tables::table
                    .find(table_id)
                    .select(tables::id)
                    .for_update()
                    .first::<i32>(conn)
                    .await?;

                let status: OrderStatus = orders::table
                    .find(order_id)
                    .select(orders::status)
                    .for_update()
                    .first::<String>(conn)
                    .await?
                    .parse()?;
                if status == OrderStatus::Paid {
                    return Err(ServiceError::Conflict(format!("Order {} is already paid", order_id)));
                }

                diesel::update(orders::table.find(order_id))
                    .set(orders::status.eq(OrderStatus::Paid.as_str()))
                    .execute(conn)
                    .await?;

                diesel::update(tables::table.find(table_id))
                    .set(tables::status.eq(TableStatus::Empty.as_str()))
                    .execute(conn)
                    .await?;

                Ok(table_id)
            })
        }).await?;

        info!("Order {} paid, table {} is free", order_id, table_id);
        self.events.publish(RealtimeEvent::TableStatusUpdated {
            table_id,
            status: TableStatus::Empty,
        });

        Ok(table_id)
    }

    /// The table's current open bill, if any.
    pub async fn table_order(&self, table_id: i32) -> Result<TableOrderResponse, ServiceError> {
        let mut conn = self.conn().await?;

        let order = orders::table
            .filter(orders::table_id.eq(table_id))
            .filter(orders::status.eq(OrderStatus::AwaitingPayment.as_str()))
            .order(orders::created_at.desc())
            .select(Order::as_select())
            .first::<Order>(&mut conn)
            .await
            .optional()?;

        let Some(order) = order else {
            return Ok(TableOrderResponse { order: None, items: Vec::new() });
        };

        let items = order_items::table
            .inner_join(dishes::table)
            .filter(order_items::order_id.eq(order.id))
            .order(order_items::id.asc())
            .select((OrderItem::as_select(), dishes::name))
            .load::<(OrderItem, String)>(&mut conn)
            .await?
            .into_iter()
            .map(|(item, dish_name)| item_view(item, dish_name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TableOrderResponse {
            order: Some(OrderView::try_from(order)?),
            items,
        })
    }

    /// Orders placed on `page.date`, newest first, with their lines.
    pub async fn kitchen_orders(&self, page: KitchenPage) -> Result<KitchenOrdersPage, ServiceError> {
        let mut conn = self.conn().await?;

        let start = page.date.and_time(NaiveTime::MIN).and_utc();
        let end = start + Duration::days(1);

        let total_rows = orders::table
            .filter(orders::created_at.ge(start))
            .filter(orders::created_at.lt(end))
            .count()
            .get_result::<i64>(&mut conn)
            .await?;

        let rows = orders::table
            .inner_join(tables::table)
            .filter(orders::created_at.ge(start))
            .filter(orders::created_at.lt(end))
            .order((orders::created_at.desc(), orders::id.desc()))
            .limit(page.limit)
            .offset(page.offset())
            .select((Order::as_select(), tables::name))
            .load::<(Order, String)>(&mut conn)
            .await?;

        let order_ids: Vec<i32> = rows.iter().map(|(order, _)| order.id).collect();
        let mut items_by_order: HashMap<i32, Vec<OrderItemView>> = HashMap::new();
        let lines = order_items::table
            .inner_join(dishes::table)
            .filter(order_items::order_id.eq_any(&order_ids))
            .order(order_items::id.asc())
            .select((OrderItem::as_select(), dishes::name))
            .load::<(OrderItem, String)>(&mut conn)
            .await?;
        for (item, dish_name) in lines {
            let view = item_view(item, dish_name)?;
            items_by_order.entry(view.order_id).or_default().push(view);
        }

        let orders = rows
            .into_iter()
            .map(|(order, table_name)| {
                let items = items_by_order.remove(&order.id).unwrap_or_default();
                Ok(KitchenOrder {
                    order: OrderView::try_from(order)?,
                    table_name,
                    items,
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        Ok(KitchenOrdersPage {
            orders,
            total_pages: page.total_pages(total_rows),
            current_page: page.page,
        })
    }

    pub async fn list_tables(&self) -> Result<Vec<TableView>, ServiceError> {
        let mut conn = self.conn().await?;

        let rows = tables::table
            .order(tables::id.asc())
            .select(DiningTable::as_select())
            .load::<DiningTable>(&mut conn)
            .await?;

        Ok(rows.into_iter().map(TableView::try_from).collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn menu(&self) -> Result<Vec<MenuCategory>, ServiceError> {
        let mut conn = self.conn().await?;

        let categories = categories::table
            .order(categories::id.asc())
            .select(Category::as_select())
            .load::<Category>(&mut conn)
            .await?;
        let dishes = dishes::table
            .order(dishes::id.asc())
            .select(Dish::as_select())
            .load::<Dish>(&mut conn)
            .await?;

        let mut by_category: HashMap<i32, Vec<DishView>> = HashMap::new();
        for dish in dishes {
            by_category.entry(dish.category_id).or_default().push(dish.into());
        }

        Ok(categories
            .into_iter()
            .map(|category| MenuCategory {
                dishes: by_category.remove(&category.id).unwrap_or_default(),
                id: category.id,
                name: category.name,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn kitchen_page_defaults_and_clamps() {
        let page = KitchenPage::new(None, None, Some(date("2024-06-01")));
        assert_eq!(page, KitchenPage { page: 1, limit: DEFAULT_PAGE_SIZE, date: date("2024-06-01") });

        let page = KitchenPage::new(Some(0), Some(1_000), Some(date("2024-06-01")));
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, MAX_PAGE_SIZE);

        let page = KitchenPage::new(Some(3), Some(-5), None);
        assert_eq!(page.limit, 1);
        assert_eq!(page.date, Utc::now().date_naive());
    }

    #[test]
    fn kitchen_page_offsets_and_counts_pages() {
        let page = KitchenPage::new(Some(3), Some(10), None);
        assert_eq!(page.offset(), 20);
        assert_eq!(page.total_pages(0), 0);
        assert_eq!(page.total_pages(10), 1);
        assert_eq!(page.total_pages(21), 3);
    }

    #[test]
    fn huge_page_numbers_do_not_overflow() {
        let page = KitchenPage::new(Some(i64::MAX), Some(MAX_PAGE_SIZE), None);
        assert_eq!(page.offset(), i64::MAX);
        assert_eq!(page.total_pages(5), 1);
    }
}
