use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use autoshop_infra::{SearchScope, Shop, ShopError};

use crate::app::{blocking, dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/search", get(search))
        .route("/stages", get(stage_counts))
        .route("/maintenance-due", get(maintenance_due))
        .route("/orders/:id", get(order_detail))
        .route("/orders/:id/history", get(order_history))
        .route("/rebuild-index", post(rebuild_index))
}

/// GET /dashboard/search?q=...&scope=history|active|<status>
///
/// Matches customer name, brand, model and plate, newest first.
pub async fn search(
    Extension(shop): Extension<Arc<Shop>>,
    Query(query): Query<dto::SearchQuery>,
) -> axum::response::Response {
    let scope = match query.scope.parse::<SearchScope>() {
        Ok(s) => s,
        Err(reason) => {
            return errors::shop_error_to_response(ShopError::invalid_input("scope", reason));
        }
    };
    let rows = shop.dashboard().search(&query.q, scope);
    Json(json!({ "orders": dto::summaries_to_json(&rows) })).into_response()
}

pub async fn stage_counts(Extension(shop): Extension<Arc<Shop>>) -> axum::response::Response {
    let counts = shop.dashboard().stage_counts();
    Json(json!({ "stages": dto::stage_counts_to_json(&counts) })).into_response()
}

pub async fn maintenance_due(Extension(shop): Extension<Arc<Shop>>) -> axum::response::Response {
    let due = shop.dashboard().maintenance_due(Utc::now());
    Json(json!({
        "interval_days": shop.config().maintenance_interval_days,
        "vehicles": due.iter().map(dto::maintenance_due_to_json).collect::<Vec<_>>(),
    }))
    .into_response()
}

pub async fn order_detail(
    Extension(shop): Extension<Arc<Shop>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match blocking(&shop, move |shop| shop.dashboard().get_detail(order_id)).await {
        Ok(detail) => Json(dto::detail_to_json(&detail)).into_response(),
        Err(e) => errors::shop_error_to_response(e),
    }
}

/// GET /dashboard/orders/:id/history
///
/// Committed events of the order, oldest first.
pub async fn order_history(
    Extension(shop): Extension<Arc<Shop>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match blocking(&shop, move |shop| shop.dashboard().history(order_id)).await {
        Ok(events) => Json(json!({
            "order_id": order_id.to_string(),
            "events": events.iter().map(|e| json!({
                "event_id": e.event_id().to_string(),
                "sequence_number": e.sequence_number(),
                "event_type": e.event_type(),
                "payload": e.payload(),
            })).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => errors::shop_error_to_response(e),
    }
}

/// POST /dashboard/rebuild-index
pub async fn rebuild_index(Extension(shop): Extension<Arc<Shop>>) -> axum::response::Response {
    match blocking(&shop, |shop| shop.rebuild_index()).await {
        Ok(orders) => Json(json!({ "orders_indexed": orders })).into_response(),
        Err(e) => errors::shop_error_to_response(e),
    }
}
