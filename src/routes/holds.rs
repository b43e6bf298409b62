use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateHoldHttpRequest {
    pub product_id: i32,
    pub qty: i32,
}

#[derive(Debug, Serialize)]
pub struct CreateHoldResponse {
    pub hold_id: String,
    pub expires_at: String,
    pub product_id: i32,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct ReleaseHoldResponse {
    pub hold_id: String,
    pub status: String,
}

pub fn hold_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_hold))
        .route("/:hold_id", delete(release_hold))
}

async fn create_hold(
    State(state): State<AppState>,
    Json(req): Json<CreateHoldHttpRequest>,
) -> Result<(StatusCode, Json<CreateHoldResponse>), Error> {
    let hold = state.holds.create_hold(req.product_id, req.qty).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateHoldResponse {
            hold_id: hold.id.to_string(),
            expires_at: hold.expires_at.to_rfc3339(),
            product_id: hold.product_id,
            quantity: hold.quantity,
        }),
    ))
}

async fn release_hold(
    State(state): State<AppState>,
    Path(hold_id): Path<Uuid>,
) -> Result<Json<ReleaseHoldResponse>, Error> {
    let hold = state.holds.release_hold(hold_id).await?;
    Ok(Json(ReleaseHoldResponse {
        hold_id: hold.id.to_string(),
        status: hold.status,
    }))
}
