use std::time::Instant;

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{WebhookOutcome, WebhookRequest};
use crate::error::Error;
use crate::models::PaymentStatus;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookHttpRequest {
    pub idempotency_key: String,
    pub order_id: Uuid,
    pub status: PaymentStatus,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ProcessedResponse {
    pub status: &'static str,
    pub order_id: String,
    pub order_status: String,
    pub webhook_id: String,
    pub processing_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct DuplicateResponse {
    pub status: &'static str,
    pub webhook_id: String,
    pub processing_status: String,
    pub order_status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub status: &'static str,
    pub webhook_id: String,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AlreadyFinalizedResponse {
    pub status: &'static str,
    pub order_status: String,
    pub webhook_id: String,
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook", post(process_webhook))
}

async fn process_webhook(
    State(state): State<AppState>,
    Json(req): Json<WebhookHttpRequest>,
) -> Result<Response, Error> {
    let started = Instant::now();
    let outcome = state
        .webhooks
        .process_webhook(WebhookRequest {
            idempotency_key: req.idempotency_key,
            order_id: req.order_id,
            payment_status: req.status,
            payload: req.payload,
        })
        .await?;

    let response = match outcome {
        WebhookOutcome::Processed { webhook_id, order } => Json(ProcessedResponse {
            status: "processed",
            order_id: order.id.to_string(),
            order_status: order.status,
            webhook_id: webhook_id.to_string(),
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
        .into_response(),
        WebhookOutcome::Duplicate {
            webhook_id,
            processing_status,
            order_status,
        } => Json(DuplicateResponse {
            status: "duplicate",
            webhook_id: webhook_id.to_string(),
            processing_status,
            order_status,
        })
        .into_response(),
        WebhookOutcome::Pending { webhook_id } => Json(PendingResponse {
            status: "pending",
            webhook_id: webhook_id.to_string(),
            message: "order not found yet; webhook stored for later processing",
        })
        .into_response(),
        WebhookOutcome::AlreadyFinalized {
            webhook_id,
            order_status,
        } => Json(AlreadyFinalizedResponse {
            status: "already_finalized",
            order_status,
            webhook_id: webhook_id.to_string(),
        })
        .into_response(),
    };
    Ok(response)
}
