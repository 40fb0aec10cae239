//! HTTP API application wiring (Axum router + shop wiring).
//!
//! - `routes/`: one file per station, plus health and the refresh stream
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use autoshop_infra::{Shop, ShopError, ShopResult};

pub mod dto;
pub mod errors;
pub mod routes;

/// Build the full HTTP router around a running shop.
pub fn build_app(shop: Arc<Shop>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(ServiceBuilder::new().layer(Extension(shop)))
}

/// Run a station call off the async runtime.
///
/// Station writes may sleep between conflict retries and wait on the storage
/// deadline, so they never run on a runtime worker.
pub async fn blocking<T, F>(shop: &Arc<Shop>, call: F) -> ShopResult<T>
where
    F: FnOnce(Arc<Shop>) -> ShopResult<T> + Send + 'static,
    T: Send + 'static,
{
    let shop = Arc::clone(shop);
    tokio::task::spawn_blocking(move || call(shop))
        .await
        .map_err(|e| ShopError::Unavailable(format!("station task failed: {e}")))?
}
