//! HTTP transport for the decision pipeline
//!
//! `POST /ask` answers with a server-sent event stream: an `options` event,
//! then exactly one of `decision` or `error`. `/health` is plain text.

use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderName, HeaderValue, Method, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::error::DecisionError;
use crate::pipeline::{DecisionFrame, DecisionPipeline};

/// Shared state for HTTP server
#[derive(Clone)]
pub struct HttpState {
    pub pipeline: Arc<DecisionPipeline>,
    pub keepalive: Duration,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub query: String,
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    "ok"
}

pub async fn ask_handler(
    State(state): State<HttpState>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return error_response(&DecisionError::Validation {
                message: rejection.body_text(),
            });
        }
    };
    let query = req.query.trim();
    if query.is_empty() {
        return error_response(&DecisionError::Validation {
            message: "query must not be empty".to_string(),
        });
    }

    let events = state
        .pipeline
        .stream(query.to_string())
        .map(|frame| Ok::<_, Infallible>(frame_event(&frame)));
    let sse = Sse::new(events).keep_alive(KeepAlive::new().interval(state.keepalive));
    (
        [(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        )],
        sse,
    )
        .into_response()
}

fn frame_event(frame: &DecisionFrame) -> Event {
    match frame.data() {
        Ok(data) => Event::default()
            .event(frame.event_name())
            .data(data.to_string()),
        Err(e) => {
            warn!("Failed to serialize {} frame: {}", frame.event_name(), e);
            Event::default().event("error").data(
                json!({"error": {"kind": "serialization_error", "stage": "done", "message": e.to_string()}})
                    .to_string(),
            )
        }
    }
}

/// JSON error for requests rejected before a stream opens.
pub fn error_response(err: &DecisionError) -> Response {
    (
        err.status_code(),
        Json(json!({"error": {"kind": err.kind(), "message": err.to_string()}})),
    )
        .into_response()
}

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);
    if origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(parsed))
}

pub fn build_router(state: HttpState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ask", post(ask_handler))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_http_server(
    pipeline: DecisionPipeline,
    bind: SocketAddr,
    keepalive: Duration,
    cors_origins: &[String],
) -> anyhow::Result<()> {
    let state = HttpState {
        pipeline: Arc::new(pipeline),
        keepalive,
    };
    let app = build_router(state, cors_origins);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind HTTP listener: {}", e))?;

    info!("Starting HTTP server on {}", bind);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    Ok(())
}
