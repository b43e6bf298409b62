use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::models::Order;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateOrderHttpRequest {
    pub hold_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub hold_id: String,
    pub product_id: i32,
    pub quantity: i32,
    pub unit_price: String,
    pub total_price: String,
    pub status: String,
    pub created_at: String,
}

fn order_to_response(order: &Order) -> OrderResponse {
    OrderResponse {
        order_id: order.id.to_string(),
        hold_id: order.hold_id.to_string(),
        product_id: order.product_id,
        quantity: order.quantity,
        unit_price: order.unit_price.to_string(),
        total_price: order.total_price.to_string(),
        status: order.status.clone(),
        created_at: order.created_at.to_rfc3339(),
    }
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/:order_id", get(get_order))
}

async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderHttpRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), Error> {
    let order = state.orders.create_order_from_hold(req.hold_id).await?;
    Ok((StatusCode::CREATED, Json(order_to_response(&order))))
}

async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, Error> {
    let order = Order::find(&state.pool, order_id)
        .await?
        .ok_or(Error::NotFound("order"))?;
    Ok(Json(order_to_response(&order)))
}
