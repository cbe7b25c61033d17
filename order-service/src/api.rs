use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shared::*;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use crate::error::ServiceError;
use crate::events::EventBus;
use crate::handlers::{KitchenPage, OrderService};
use crate::realtime;

#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService,
    pub bus: EventBus,
}

#[derive(Debug, Deserialize)]
pub struct KitchenOrdersQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemStatusResponse {
    pub order_item_id: i32,
    pub status: OrderItemStatus,
    pub changed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub order_id: i32,
    pub table_id: i32,
    pub message: String,
}

pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/api/orders", post(create_order))
        .route("/api/orders/table/:table_id", get(get_table_order))
        .route("/api/order-items/:id/serve", patch(serve_item))
        .route("/api/order-items/:id/complete", patch(complete_item))
        .route("/api/checkout", post(checkout))
        .route("/api/kitchen-orders", get(kitchen_orders))
        .route("/api/tables", get(list_tables))
        .route("/api/menu", get(menu))
        .route("/ws", get(realtime::subscribe))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ServiceError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ServiceError::Validation(rejection.body_text()))
}

pub async fn create_order(
    State(state): State<AppState>,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), ServiceError> {
    let request = json_body(payload)?;
    let order_id = state.orders.create_or_amend(request).await?;
    Ok((StatusCode::CREATED, Json(CreateOrderResponse { order_id })))
}

pub async fn get_table_order(
    State(state): State<AppState>,
    Path(table_id): Path<i32>,
) -> Result<Json<TableOrderResponse>, ServiceError> {
    Ok(Json(state.orders.table_order(table_id).await?))
}

pub async fn serve_item(
    State(state): State<AppState>,
    Path(item_id): Path<i32>,
) -> Result<Json<ItemStatusResponse>, ServiceError> {
    advance_item(state, item_id, OrderItemStatus::Served).await
}

pub async fn complete_item(
    State(state): State<AppState>,
    Path(item_id): Path<i32>,
) -> Result<Json<ItemStatusResponse>, ServiceError> {
    advance_item(state, item_id, OrderItemStatus::Ready).await
}

async fn advance_item(
    state: AppState,
    item_id: i32,
    status: OrderItemStatus,
) -> Result<Json<ItemStatusResponse>, ServiceError> {
    let changed = state.orders.advance_item_status(item_id, status).await?;
    Ok(Json(ItemStatusResponse { order_item_id: item_id, status, changed }))
}

pub async fn checkout(
    State(state): State<AppState>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<CheckoutResponse>, ServiceError> {
    let order_id = json_body(payload)?
        .order_id
        .ok_or_else(|| ServiceError::Validation("orderId is required".to_string()))?;

    let table_id = state.orders.checkout(order_id).await?;
    Ok(Json(CheckoutResponse {
        order_id,
        table_id,
        message: "Checkout completed".to_string(),
    }))
}

pub async fn kitchen_orders(
    State(state): State<AppState>,
    Query(query): Query<KitchenOrdersQuery>,
) -> Result<Json<KitchenOrdersPage>, ServiceError> {
    let date = query
        .date
        .as_deref()
        .map(|raw| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| ServiceError::Validation(format!("Invalid date '{}', expected YYYY-MM-DD", raw)))
        })
        .transpose()?;

    let page = KitchenPage::new(query.page, query.limit, date);
    Ok(Json(state.orders.kitchen_orders(page).await?))
}

pub async fn list_tables(State(state): State<AppState>) -> Result<Json<Vec<TableView>>, ServiceError> {
    Ok(Json(state.orders.list_tables().await?))
}

pub async fn menu(State(state): State<AppState>) -> Result<Json<Vec<MenuCategory>>, ServiceError> {
    Ok(Json(state.orders.menu().await?))
}

pub async fn health_check() -> &'static str {
    "OK"
}
