use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        Response,
    },
};
use serde::Deserialize;
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, warn};

use autoshop_infra::workers::WorkerHandle;
use autoshop_infra::{Shop, StationView};

use crate::app::errors::json_error;

const HEARTBEAT: Duration = Duration::from_secs(15);

pub async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Only forward signals that touch this view (`reception`, `cashier`, ...).
    pub view: Option<String>,
}

/// SSE body that owns the worker feeding it; the worker stops with the connection.
pub struct RefreshStream {
    events: UnboundedReceiverStream<Result<SseEvent, Infallible>>,
    _worker: WorkerHandle,
}

impl Stream for RefreshStream {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

/// GET /stream
///
/// Server-Sent Events: one `refresh` event per committed order event, naming
/// the views a station should re-query. Order state is never pushed here.
pub async fn stream(
    Extension(shop): Extension<Arc<Shop>>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<RefreshStream>, Response> {
    let view = query.view.as_deref().and_then(parse_view);
    let (tx, rx) = unbounded_channel::<Result<SseEvent, Infallible>>();

    let worker = shop
        .on_refresh("refresh-stream", move |signal| {
            if view.is_some_and(|v| !signal.touches(v)) {
                return Ok(());
            }
            let data = serde_json::to_string(&signal).map_err(|e| e.to_string())?;
            if tx.send(Ok(SseEvent::default().event("refresh").data(data))).is_err() {
                debug!(order_id = %signal.order_id, "refresh stream already closed");
            }
            Ok::<(), String>(())
        })
        .map_err(|e| {
            warn!(error = %e, "could not start refresh stream");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", "refresh stream unavailable")
        })?;

    let body = RefreshStream {
        events: UnboundedReceiverStream::new(rx),
        _worker: worker,
    };
    Ok(Sse::new(body).keep_alive(KeepAlive::new().interval(HEARTBEAT)))
}

fn parse_view(raw: &str) -> Option<StationView> {
    match raw.trim().to_lowercase().as_str() {
        "reception" => Some(StationView::Reception),
        "diagnosis" => Some(StationView::Diagnosis),
        "workshop" => Some(StationView::Workshop),
        "cashier" => Some(StationView::Cashier),
        "dashboard" => Some(StationView::Dashboard),
        "history" => Some(StationView::History),
        _ => None,
    }
}
