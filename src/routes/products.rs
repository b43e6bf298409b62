use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::error::Error;
use crate::models::Product;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub price: String,
    /// Possibly stale by up to the cache TTL; admission never reads it.
    pub available_stock: i64,
    pub updated_at: String,
}

fn product_to_response(product: &Product, available_stock: i64) -> ProductResponse {
    ProductResponse {
        id: product.id,
        name: product.name.clone(),
        description: product.description.clone(),
        price: product.price.to_string(),
        available_stock,
        updated_at: product.updated_at.to_rfc3339(),
    }
}

pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products))
        .route("/:product_id", get(get_product))
}

async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
) -> Result<Json<ProductResponse>, Error> {
    let product = Product::find(&state.pool, product_id)
        .await?
        .ok_or(Error::NotFound("product"))?;
    let available = state.cache.available(&state.pool, product_id).await?;
    Ok(Json(product_to_response(&product, available)))
}

async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProductResponse>>, Error> {
    let products = Product::list(&state.pool).await?;
    let mut out = Vec::with_capacity(products.len());
    for product in &products {
        let available = state.cache.available(&state.pool, product.id).await?;
        out.push(product_to_response(product, available));
    }
    Ok(Json(out))
}
