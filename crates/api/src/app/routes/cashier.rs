use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use autoshop_infra::{Cashier, Shop};

use crate::app::routes::order_reply;
use crate::app::{blocking, dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/queue", get(queue))
        .route("/orders/:id/invoice", get(invoice))
        .route("/orders/:id/pay", post(pay))
        .route("/orders/:id/receipt", get(receipt))
}

fn cashier(shop: &Arc<Shop>, version: &dto::VersionQuery) -> Cashier {
    match version.expected_version {
        Some(v) => shop.cashier().expecting(v),
        None => shop.cashier(),
    }
}

pub async fn queue(Extension(shop): Extension<Arc<Shop>>) -> axum::response::Response {
    let rows = shop.cashier().queue();
    Json(json!({ "orders": dto::summaries_to_json(&rows) })).into_response()
}

pub async fn invoice(
    Extension(shop): Extension<Arc<Shop>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match blocking(&shop, move |shop| shop.cashier().compute_invoice(order_id)).await {
        Ok(inv) => Json(dto::invoice_to_json(&inv)).into_response(),
        Err(e) => errors::shop_error_to_response(e),
    }
}

/// POST /cashier/orders/:id/pay
///
/// `{"method": "cash" | "card" | "transfer", "warranty": "..."}`
pub async fn pay(
    Extension(shop): Extension<Arc<Shop>>,
    Path(id): Path<String>,
    Query(version): Query<dto::VersionQuery>,
    Json(body): Json<dto::PayRequest>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    order_reply(
        blocking(&shop, move |shop| {
            cashier(&shop, &version).pay(order_id, &body.method, body.warranty.as_deref())
        })
        .await,
    )
}

pub async fn receipt(
    Extension(shop): Extension<Arc<Shop>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match blocking(&shop, move |shop| shop.cashier().receipt(order_id)).await {
        Ok(r) => Json(dto::receipt_to_json(&r)).into_response(),
        Err(e) => errors::shop_error_to_response(e),
    }
}
