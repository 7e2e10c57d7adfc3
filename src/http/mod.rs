use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::polls::PollError;
use crate::state::AppState;

mod polls;

pub fn router(state: AppState) -> Router {
    assert!(
        state.start_time.elapsed() < Duration::from_secs(86_400),
        "Application uptime exceeds 24 hours before router creation"
    );

    // The portal front-end is served from a different origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_live))
        .route("/health/ready", get(health_ready))
        .merge(polls::router())
        .layer(cors)
        .with_state(state)
}

async fn health_live(State(state): State<AppState>) -> Result<Json<HealthResponse>, HttpError> {
    let uptime = state.start_time.elapsed().as_secs();
    let response = HealthResponse {
        status: "live",
        uptime_seconds: uptime,
    };
    Ok(Json(response))
}

async fn health_ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, HttpError> {
    state
        .database
        .ping()
        .await
        .map_err(|err| HttpError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()))?;

    let response = ReadyResponse {
        status: "ready",
        scheduler: SchedulerSummary {
            enabled: state.scheduler_enabled,
            ticks: state.scheduler_status.ticks(),
            last_tick_at: state
                .scheduler_status
                .last_tick()
                .map(|at| at.timestamp()),
        },
        cache_entries: CacheSummary {
            poll_lists: state.cache.poll_lists.entry_count(),
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
    scheduler: SchedulerSummary,
    cache_entries: CacheSummary,
}

#[derive(Debug, Serialize)]
struct SchedulerSummary {
    enabled: bool,
    ticks: u64,
    last_tick_at: Option<i64>,
}

#[derive(Debug, Serialize)]
struct CacheSummary {
    poll_lists: u64,
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: String) -> Self {
        assert!(status != StatusCode::OK, "Error status cannot be 200");
        assert!(!message.is_empty(), "Error message cannot be empty");
        Self { status, message }
    }
}

impl From<PollError> for HttpError {
    fn from(err: PollError) -> Self {
        let status = match &err {
            PollError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PollError::PollNotFound(_)
            | PollError::SuggestionNotFound(_)
            | PollError::UserNotFound(_) => StatusCode::NOT_FOUND,
            PollError::InvalidInput(_) | PollError::Unscoped(_) => StatusCode::BAD_REQUEST,
            PollError::Forbidden { .. } => StatusCode::FORBIDDEN,
            PollError::DiscussionClosed(_)
            | PollError::PollClosed(_)
            | PollError::AlreadyClosed(_)
            | PollError::AlreadyNulled(_)
            | PollError::NotClosed(_)
            | PollError::NotificationsDisabled(_)
            | PollError::AlreadyNotified(_) => StatusCode::CONFLICT,
            PollError::Dispatch(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            error!("Poll request failed: {err}");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        info!("HTTP error: {}", self.message);
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}
