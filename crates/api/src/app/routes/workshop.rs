use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use autoshop_infra::{Shop, ShopError, Workshop};
use autoshop_orders::OrderStatus;

use crate::app::routes::order_reply;
use crate::app::{blocking, dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/:id/approve", post(approve))
        .route("/orders/:id/discard", post(discard))
        .route("/orders/:id/finish", post(finish_repair))
}

fn workshop(shop: &Arc<Shop>, version: &dto::VersionQuery) -> Workshop {
    match version.expected_version {
        Some(v) => shop.workshop().expecting(v),
        None => shop.workshop(),
    }
}

/// GET /workshop/orders?status=pending_approval|in_repair
pub async fn list_orders(
    Extension(shop): Extension<Arc<Shop>>,
    Query(query): Query<dto::StatusQuery>,
) -> axum::response::Response {
    let listed = query
        .status
        .parse::<OrderStatus>()
        .map_err(|reason| ShopError::invalid_input("status", reason))
        .and_then(|status| shop.workshop().list_by_status(status));
    match listed {
        Ok(rows) => Json(json!({ "orders": dto::summaries_to_json(&rows) })).into_response(),
        Err(e) => errors::shop_error_to_response(e),
    }
}

pub async fn approve(
    Extension(shop): Extension<Arc<Shop>>,
    Path(id): Path<String>,
    Query(version): Query<dto::VersionQuery>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    order_reply(blocking(&shop, move |shop| workshop(&shop, &version).approve(order_id)).await)
}

/// POST /workshop/orders/:id/discard
///
/// The body (`{"reason": "..."}`) is optional.
pub async fn discard(
    Extension(shop): Extension<Arc<Shop>>,
    Path(id): Path<String>,
    Query(version): Query<dto::VersionQuery>,
    body: Option<Json<dto::DiscardRequest>>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let reason = body.and_then(|Json(b)| b.reason);
    order_reply(
        blocking(&shop, move |shop| {
            workshop(&shop, &version).discard(order_id, reason.as_deref())
        })
        .await,
    )
}

pub async fn finish_repair(
    Extension(shop): Extension<Arc<Shop>>,
    Path(id): Path<String>,
    Query(version): Query<dto::VersionQuery>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    order_reply(blocking(&shop, move |shop| workshop(&shop, &version).finish_repair(order_id)).await)
}
