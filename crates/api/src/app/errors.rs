use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::{json, Value as JsonValue};
use tracing::error;

use autoshop_infra::ShopError;
use autoshop_mechanics::MechanicId;
use autoshop_orders::OrderId;

pub fn shop_error_to_response(err: ShopError) -> axum::response::Response {
    let status = match &err {
        ShopError::InvalidTransition { .. } | ShopError::OrderFrozen { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ShopError::InvalidItem { .. } | ShopError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        ShopError::DuplicateCode { .. } | ShopError::Conflict(_) => StatusCode::CONFLICT,
        ShopError::NotFound { .. } => StatusCode::NOT_FOUND,
        ShopError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ShopError::Store(_) | ShopError::Deserialize(_) => {
            error!(error = %err, "request failed in storage");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let details = match &err {
        ShopError::InvalidTransition {
            current,
            requested,
            reason,
        } => json!({"current": current, "requested": requested, "reason": reason}),
        ShopError::OrderFrozen { status, field } => json!({"status": status, "field": field}),
        ShopError::InvalidItem { field, reason } | ShopError::InvalidInput { field, reason } => {
            json!({"field": field, "reason": reason})
        }
        ShopError::DuplicateCode { code } => json!({"code": code}),
        ShopError::NotFound { entity, id } => json!({"entity": entity, "id": id}),
        _ => JsonValue::Null,
    };

    (
        status,
        axum::Json(json!({
            "error": err.kind(),
            "message": err.to_string(),
            "retryable": err.is_retryable(),
            "details": details,
        })),
    )
        .into_response()
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_order_id(s: &str) -> Result<OrderId, axum::response::Response> {
    s.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid order id"))
}

pub fn parse_mechanic_id(s: &str) -> Result<MechanicId, axum::response::Response> {
    s.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid mechanic id"))
}
