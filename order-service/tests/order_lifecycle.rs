//! End-to-end order lifecycle against a real PostgreSQL database.
//!
//! Set `TEST_DATABASE_URL` to a scratch database to run these; every test
//! truncates and reseeds it. Without the variable the tests return early.

use bigdecimal::BigDecimal;
use diesel::prelude::*;
use diesel::connection::SimpleConnection;
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::{bb8::Pool, AsyncDieselConnectionManager};
use diesel_async::AsyncPgConnection;
use diesel_migrations::MigrationHarness;
use order_service::error::ServiceError;
use order_service::events::EventPublisher;
use order_service::handlers::{KitchenPage, OrderService};
use order_service::schema::{order_items, orders};
use order_service::MIGRATIONS;
use shared::*;
use std::sync::{Arc, Mutex};

// Tests share one database, so they take turns.
static DB_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<RealtimeEvent>>,
}

impl RecordingPublisher {
    fn take(&self) -> Vec<RealtimeEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: RealtimeEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct Fixture {
    service: OrderService,
    events: Arc<RecordingPublisher>,
    sync_conn: PgConnection,
}

fn reseed(conn: &mut PgConnection) {
    conn.run_pending_migrations(MIGRATIONS).expect("migrations");
    conn.batch_execute(
        "
        TRUNCATE order_items, orders, dishes, categories, tables, users RESTART IDENTITY CASCADE;
        INSERT INTO users (username) VALUES ('waiter');
        INSERT INTO tables (name) VALUES ('Table 1'), ('Table 2'), ('Table 3');
        INSERT INTO categories (name) VALUES ('Main');
        INSERT INTO dishes (name, price, category_id) VALUES ('Pho', 20000, 1), ('Spring rolls', 15000, 1);
        ",
    )
    .expect("seed");
}

async fn fixture() -> Option<Fixture> {
    let url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("TEST_DATABASE_URL not set, skipping");
            return None;
        }
    };

    let mut sync_conn = PgConnection::establish(&url).expect("connect");
    reseed(&mut sync_conn);

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&url);
    let pool = Pool::builder().max_size(8).build(manager).await.expect("pool");
    let events = Arc::new(RecordingPublisher::default());

    Some(Fixture {
        service: OrderService::new(pool, events.clone()),
        events,
        sync_conn,
    })
}

fn line(dish: i32, quantity: i32, price: i64) -> OrderItemInput {
    OrderItemInput { id: dish, quantity, price: BigDecimal::from(price), notes: None }
}

fn order_for(table_id: i32, items: Vec<OrderItemInput>) -> CreateOrderRequest {
    CreateOrderRequest { table_id, user_id: 1, items }
}

fn open_orders(conn: &mut PgConnection, table_id: i32) -> i64 {
    orders::table
        .filter(orders::table_id.eq(table_id))
        .filter(orders::status.eq("awaiting_payment"))
        .count()
        .get_result(conn)
        .unwrap()
}

async fn table_status(service: &OrderService, table_id: i32) -> TableStatus {
    service
        .list_tables()
        .await
        .unwrap()
        .into_iter()
        .find(|table| table.id == table_id)
        .unwrap()
        .status
}

#[tokio::test]
async fn order_accumulates_until_checkout() {
    let _guard = DB_LOCK.lock().await;
    let Some(mut fx) = fixture().await else { return };

    let order_id = fx.service.create_or_amend(order_for(2, vec![line(1, 2, 20000)])).await.unwrap();
    let bill = fx.service.table_order(2).await.unwrap();
    let order = bill.order.unwrap();
    assert_eq!(order.id, order_id);
    assert_eq!(order.subtotal, BigDecimal::from(40000));
    assert_eq!(order.tax_amount, BigDecimal::from(3200));
    assert_eq!(order.total, BigDecimal::from(43200));
    assert_eq!(order.status, OrderStatus::AwaitingPayment);
    assert_eq!(bill.items.len(), 1);
    assert_eq!(bill.items[0].dish_name, "Pho");
    assert_eq!(bill.items[0].status, OrderItemStatus::Preparing);
    assert_eq!(table_status(&fx.service, 2).await, TableStatus::Occupied);
    assert_eq!(
        fx.events.take(),
        vec![
            RealtimeEvent::TableStatusUpdated { table_id: 2, status: TableStatus::Occupied },
            RealtimeEvent::NewOrder,
        ]
    );

    let amended = fx.service.create_or_amend(order_for(2, vec![line(2, 1, 15000)])).await.unwrap();
    assert_eq!(amended, order_id);
    let order = fx.service.table_order(2).await.unwrap().order.unwrap();
    assert_eq!(order.subtotal, BigDecimal::from(55000));
    assert_eq!(order.tax_amount, BigDecimal::from(4400));
    assert_eq!(order.total, BigDecimal::from(59400));
    assert_eq!(open_orders(&mut fx.sync_conn, 2), 1);
    assert_eq!(fx.events.take(), vec![RealtimeEvent::NewOrder]);

    let freed = fx.service.checkout(order_id).await.unwrap();
    assert_eq!(freed, 2);
    let status: String = orders::table
        .find(order_id)
        .select(orders::status)
        .first(&mut fx.sync_conn)
        .unwrap();
    assert_eq!(status, "paid");
    assert_eq!(table_status(&fx.service, 2).await, TableStatus::Empty);
    assert!(fx.service.table_order(2).await.unwrap().order.is_none());
    assert_eq!(
        fx.events.take(),
        vec![RealtimeEvent::TableStatusUpdated { table_id: 2, status: TableStatus::Empty }]
    );

    let next = fx.service.create_or_amend(order_for(2, vec![line(1, 1, 20000)])).await.unwrap();
    assert_ne!(next, order_id);
    assert_eq!(table_status(&fx.service, 2).await, TableStatus::Occupied);
}

#[tokio::test]
async fn checkout_happens_once() {
    let _guard = DB_LOCK.lock().await;
    let Some(fx) = fixture().await else { return };

    let order_id = fx.service.create_or_amend(order_for(1, vec![line(1, 1, 20000)])).await.unwrap();
    fx.service.checkout(order_id).await.unwrap();

    let again = fx.service.checkout(order_id).await.unwrap_err();
    assert!(matches!(again, ServiceError::Conflict(_)));

    let missing = fx.service.checkout(9999).await.unwrap_err();
    assert!(matches!(missing, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn unit_price_is_captured_at_insertion() {
    let _guard = DB_LOCK.lock().await;
    let Some(mut fx) = fixture().await else { return };

    let order_id = fx.service.create_or_amend(order_for(1, vec![line(1, 1, 18000)])).await.unwrap();
    fx.sync_conn.batch_execute("UPDATE dishes SET price = 99000 WHERE id = 1").unwrap();

    let prices: Vec<BigDecimal> = order_items::table
        .filter(order_items::order_id.eq(order_id))
        .select(order_items::price)
        .load(&mut fx.sync_conn)
        .unwrap();
    assert_eq!(prices, vec![BigDecimal::from(18000)]);

    let order = fx.service.table_order(1).await.unwrap().order.unwrap();
    assert_eq!(order.subtotal, BigDecimal::from(18000));
}

#[tokio::test]
async fn invalid_references_leave_no_trace() {
    let _guard = DB_LOCK.lock().await;
    let Some(mut fx) = fixture().await else { return };

    let err = fx.service.create_or_amend(order_for(42, vec![line(1, 1, 20000)])).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let err = fx.service.create_or_amend(order_for(3, vec![line(1, 1, 20000), line(77, 1, 5)])).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(ref msg) if msg.contains("77")));

    let err = fx
        .service
        .create_or_amend(CreateOrderRequest { table_id: 3, user_id: 55, items: vec![line(1, 1, 20000)] })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    assert_eq!(open_orders(&mut fx.sync_conn, 3), 0);
    assert_eq!(table_status(&fx.service, 3).await, TableStatus::Empty);
    assert!(fx.events.take().is_empty());
}

#[tokio::test]
async fn item_status_moves_forward_only() {
    let _guard = DB_LOCK.lock().await;
    let Some(mut fx) = fixture().await else { return };

    let order_id = fx.service.create_or_amend(order_for(1, vec![line(1, 1, 20000)])).await.unwrap();
    let item_id: i32 = order_items::table
        .filter(order_items::order_id.eq(order_id))
        .select(order_items::id)
        .first(&mut fx.sync_conn)
        .unwrap();
    fx.events.take();

    assert!(fx.service.advance_item_status(item_id, OrderItemStatus::Ready).await.unwrap());
    assert!(!fx.service.advance_item_status(item_id, OrderItemStatus::Ready).await.unwrap());
    assert!(fx.service.advance_item_status(item_id, OrderItemStatus::Served).await.unwrap());

    let err = fx.service.advance_item_status(item_id, OrderItemStatus::Ready).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let err = fx.service.advance_item_status(424242, OrderItemStatus::Served).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    assert_eq!(
        fx.events.take(),
        vec![
            RealtimeEvent::OrderStatusUpdated { order_item_id: item_id, status: OrderItemStatus::Ready },
            RealtimeEvent::OrderStatusUpdated { order_item_id: item_id, status: OrderItemStatus::Served },
        ]
    );
}

#[tokio::test]
async fn concurrent_orders_for_one_table_share_a_bill() {
    let _guard = DB_LOCK.lock().await;
    let Some(mut fx) = fixture().await else { return };

    let mut handles = Vec::new();
    for _ in 0..5 {
        let service = fx.service.clone();
        handles.push(tokio::spawn(async move {
            service.create_or_amend(order_for(3, vec![line(2, 1, 15000)])).await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(open_orders(&mut fx.sync_conn, 3), 1);

    let order = fx.service.table_order(3).await.unwrap().order.unwrap();
    assert_eq!(order.subtotal, BigDecimal::from(75000));
}

#[tokio::test]
async fn kitchen_sees_todays_orders_with_lines() {
    let _guard = DB_LOCK.lock().await;
    let Some(fx) = fixture().await else { return };

    let first = fx.service.create_or_amend(order_for(1, vec![line(1, 2, 20000)])).await.unwrap();
    let second = fx.service.create_or_amend(order_for(2, vec![line(2, 1, 15000), line(1, 1, 20000)])).await.unwrap();

    let page = fx.service.kitchen_orders(KitchenPage::new(Some(1), Some(1), None)).await.unwrap();
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.current_page, 1);
    assert_eq!(page.orders.len(), 1);
    assert_eq!(page.orders[0].order.id, second);
    assert_eq!(page.orders[0].table_name, "Table 2");
    assert_eq!(page.orders[0].items.len(), 2);

    let page = fx.service.kitchen_orders(KitchenPage::new(Some(2), Some(1), None)).await.unwrap();
    assert_eq!(page.orders[0].order.id, first);
}
