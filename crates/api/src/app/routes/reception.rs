use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;

use autoshop_infra::{ReceptionDesk, Shop};
use autoshop_orders::Intake;

use crate::app::routes::order_reply;
use crate::app::{blocking, dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id/intake", put(amend_intake))
        .route("/orders/:id/submit", post(submit_order))
        .route("/queue", get(queue))
}

fn desk(shop: &Arc<Shop>, version: &dto::VersionQuery) -> ReceptionDesk {
    match version.expected_version {
        Some(v) => shop.reception().expecting(v),
        None => shop.reception(),
    }
}

/// POST /reception/orders
///
/// Opens an order and sends it to diagnosis, unless `hold` is set.
pub async fn create_order(
    Extension(shop): Extension<Arc<Shop>>,
    Json(body): Json<dto::CreateOrderRequest>,
) -> axum::response::Response {
    let dto::CreateOrderRequest { intake, hold } = body;
    let created = blocking(&shop, move |shop| {
        let desk = shop.reception();
        let order_id = if hold { desk.hold(intake)? } else { desk.create(intake)? };
        shop.orders().get(order_id)
    })
    .await;

    match created {
        Ok(order) => (StatusCode::CREATED, Json(dto::order_to_json(&order))).into_response(),
        Err(e) => errors::shop_error_to_response(e),
    }
}

pub async fn amend_intake(
    Extension(shop): Extension<Arc<Shop>>,
    Path(id): Path<String>,
    Query(version): Query<dto::VersionQuery>,
    Json(intake): Json<Intake>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    order_reply(blocking(&shop, move |shop| desk(&shop, &version).amend(order_id, intake)).await)
}

pub async fn submit_order(
    Extension(shop): Extension<Arc<Shop>>,
    Path(id): Path<String>,
    Query(version): Query<dto::VersionQuery>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    order_reply(blocking(&shop, move |shop| desk(&shop, &version).submit(order_id)).await)
}

pub async fn queue(Extension(shop): Extension<Arc<Shop>>) -> axum::response::Response {
    let rows = shop.reception().queue();
    Json(json!({ "orders": dto::summaries_to_json(&rows) })).into_response()
}
