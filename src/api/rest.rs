//! REST API for event ingestion

use crate::core::event::Event;
use crate::error::Result;
use crate::storage::Switcher;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// Largest accepted `PUT /api/events` body
pub const MAX_EVENT_BYTES: usize = 1024 * 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared handler state
pub struct AppState {
    pub switcher: Arc<Switcher>,
}

impl AppState {
    pub fn new(switcher: Arc<Switcher>) -> Self {
        Self { switcher }
    }
}

#[derive(Serialize)]
struct StatusPayload {
    status: &'static str,
}

#[derive(Serialize)]
struct ErrorPayload {
    error: String,
}

#[derive(Serialize)]
struct StatsPayload {
    count: CountPayload,
}

#[derive(Serialize)]
struct CountPayload {
    insert: u64,
    failed: u64,
    dropped: u64,
}

/// Dispatch a single request
pub async fn route<B>(
    state: Arc<AppState>,
    req: Request<B>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/ping") => json(StatusCode::OK, &StatusPayload { status: "OK" }),
        (&Method::PUT, "/api/events") => put_event(&state, req).await,
        (&Method::GET, "/api/stats") => {
            let stats = state.switcher.stats();
            json(
                StatusCode::OK,
                &StatsPayload {
                    count: CountPayload {
                        insert: stats.inserted,
                        failed: stats.failed,
                        dropped: stats.dropped,
                    },
                },
            )
        }
        _ => empty(StatusCode::NOT_FOUND),
    };
    Ok(response)
}

async fn put_event<B>(state: &AppState, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let body = match Limited::new(req.into_body(), MAX_EVENT_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            debug!(limit = MAX_EVENT_BYTES, "rejected oversized event");
            return json(
                StatusCode::PAYLOAD_TOO_LARGE,
                &ErrorPayload {
                    error: e.to_string(),
                },
            );
        }
        Err(e) => {
            warn!(error = %e, "could not read request body");
            return unprocessable(e.to_string());
        }
    };

    match Event::from_json(&body) {
        Ok(event) => {
            state.switcher.insert(event);
            empty(StatusCode::CREATED)
        }
        Err(e) => {
            debug!(error = %e, "rejected event");
            unprocessable(e.to_string())
        }
    }
}

fn unprocessable(error: String) -> Response<Full<Bytes>> {
    json(StatusCode::UNPROCESSABLE_ENTITY, &ErrorPayload { error })
}

fn json<T: Serialize>(status: StatusCode, payload: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(payload) {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            warn!(error = %e, "could not encode response");
            empty(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Accept connections on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    info!(addr = %listener.local_addr()?, "http server listening");
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "could not accept connection");
                        continue;
                    }
                };

                let state = Arc::clone(&state);
                let service = ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Incoming>| {
                        info_span!(
                            "request",
                            request_id = %Uuid::new_v4(),
                            method = %req.method(),
                            path = %req.uri().path()
                        )
                    }))
                    .service(tower::service_fn(move |req: Request<Incoming>| {
                        route(Arc::clone(&state), req)
                    }));

                tokio::spawn(async move {
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service))
                        .await
                    {
                        debug!(peer = %peer, error = %e, "connection closed with error");
                    }
                });
            }
            _ = &mut shutdown => {
                info!("http server shutting down");
                return Ok(());
            }
        }
    }
}
