use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;

use autoshop_infra::Shop;

use crate::app::{blocking, dto, errors};

pub fn router() -> Router {
    Router::new().route("/", get(list_mechanics).post(add_mechanic))
}

pub async fn list_mechanics(Extension(shop): Extension<Arc<Shop>>) -> axum::response::Response {
    let mechanics = shop.dashboard().mechanics();
    Json(json!({
        "mechanics": mechanics.iter().map(dto::mechanic_to_json).collect::<Vec<_>>(),
    }))
    .into_response()
}

pub async fn add_mechanic(
    Extension(shop): Extension<Arc<Shop>>,
    Json(body): Json<dto::AddMechanicRequest>,
) -> axum::response::Response {
    match blocking(&shop, move |shop| shop.dashboard().add_mechanic(&body.name, &body.code)).await {
        Ok(m) => (StatusCode::CREATED, Json(dto::mechanic_to_json(&m))).into_response(),
        Err(e) => errors::shop_error_to_response(e),
    }
}
