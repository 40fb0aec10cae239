use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;

use autoshop_infra::{DiagnosisBay, Shop};

use crate::app::routes::order_reply;
use crate::app::{blocking, dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/queue", get(queue))
        .route("/orders/:id/mechanic", post(assign_mechanic))
        .route("/orders/:id/items", post(add_item))
        .route("/orders/:id/maintenance", post(flag_maintenance))
        .route("/orders/:id/notes", put(set_notes))
        .route("/orders/:id/budget", post(generate_budget))
}

fn bay(shop: &Arc<Shop>, version: &dto::VersionQuery) -> DiagnosisBay {
    match version.expected_version {
        Some(v) => shop.diagnosis().expecting(v),
        None => shop.diagnosis(),
    }
}

pub async fn queue(Extension(shop): Extension<Arc<Shop>>) -> axum::response::Response {
    let rows = shop.diagnosis().queue();
    Json(json!({ "orders": dto::summaries_to_json(&rows) })).into_response()
}

pub async fn assign_mechanic(
    Extension(shop): Extension<Arc<Shop>>,
    Path(id): Path<String>,
    Query(version): Query<dto::VersionQuery>,
    Json(body): Json<dto::AssignMechanicRequest>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let mechanic_id = match errors::parse_mechanic_id(&body.mechanic_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    order_reply(
        blocking(&shop, move |shop| {
            bay(&shop, &version).assign_mechanic(order_id, mechanic_id)
        })
        .await,
    )
}

/// POST /diagnosis/orders/:id/items
///
/// `price` is a decimal amount (`"150.00"` or `150`); `type` is `part` or `labor`.
pub async fn add_item(
    Extension(shop): Extension<Arc<Shop>>,
    Path(id): Path<String>,
    Query(version): Query<dto::VersionQuery>,
    Json(body): Json<dto::AddItemRequest>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (kind, price) = match body.kind().and_then(|k| Ok((k, body.price_cents()?))) {
        Ok(v) => v,
        Err(e) => return errors::shop_error_to_response(e),
    };
    order_reply(
        blocking(&shop, move |shop| {
            bay(&shop, &version).add_item(order_id, &body.description, kind, price)
        })
        .await,
    )
}

pub async fn flag_maintenance(
    Extension(shop): Extension<Arc<Shop>>,
    Path(id): Path<String>,
    Query(version): Query<dto::VersionQuery>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    order_reply(blocking(&shop, move |shop| bay(&shop, &version).set_maintenance_flag(order_id)).await)
}

pub async fn set_notes(
    Extension(shop): Extension<Arc<Shop>>,
    Path(id): Path<String>,
    Query(version): Query<dto::VersionQuery>,
    Json(body): Json<dto::DiagnosisNotesRequest>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    order_reply(
        blocking(&shop, move |shop| {
            bay(&shop, &version).set_diagnosis_notes(order_id, &body.notes)
        })
        .await,
    )
}

/// POST /diagnosis/orders/:id/budget
///
/// Freezes the budget and moves the order to pending approval.
pub async fn generate_budget(
    Extension(shop): Extension<Arc<Shop>>,
    Path(id): Path<String>,
    Query(version): Query<dto::VersionQuery>,
) -> axum::response::Response {
    let order_id = match errors::parse_order_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    order_reply(blocking(&shop, move |shop| bay(&shop, &version).generate_budget(order_id)).await)
}
