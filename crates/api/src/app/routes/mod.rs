use axum::{routing::get, Router};

pub mod cashier;
pub mod dashboard;
pub mod diagnosis;
pub mod mechanics;
pub mod reception;
pub mod system;
pub mod workshop;

/// Router for every station endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/stream", get(system::stream))
        .nest("/reception", reception::router())
        .nest("/diagnosis", diagnosis::router())
        .nest("/workshop", workshop::router())
        .nest("/cashier", cashier::router())
        .nest("/dashboard", dashboard::router())
        .nest("/mechanics", mechanics::router())
}

/// 200 with the order as it stands after a write, or the mapped error.
pub(crate) fn order_reply(
    result: autoshop_infra::ShopResult<autoshop_orders::ServiceOrder>,
) -> axum::response::Response {
    use axum::response::IntoResponse;
    match result {
        Ok(order) => axum::Json(crate::app::dto::order_to_json(&order)).into_response(),
        Err(e) => crate::app::errors::shop_error_to_response(e),
    }
}
