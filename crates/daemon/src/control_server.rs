//! Control HTTP server for RelayBox
//!
//! The boundary the chat front-end (or `relayctl`) talks to: start, stop and
//! inspect the stream session, read the encoder log, and toggle the
//! auxiliary services.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use relaybox_config::ConfigStore;
use thiserror::Error;
use tracing::{error, info};

use crate::classify::FailureReason;
use crate::encode::ModeKind;
use crate::env_report::EnvReport;
use crate::services::{AuxService, ServiceError, ServiceManager};
use crate::session::{SessionController, SessionError, SessionInfo, SessionStatus, StartRequest};

/// Default number of log bytes returned by `GET /session/log`
pub const DEFAULT_LOG_BYTES: u64 = 1500;

/// Errors that can occur when running the control server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid bind address '{0}'")]
    InvalidAddress(String),

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub session: Arc<SessionController>,
    pub services: Arc<ServiceManager>,
}

fn default_mode() -> ModeKind {
    ModeKind::PlainMedia
}

/// Body of `POST /session/start`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartBody {
    pub source: String,
    #[serde(default = "default_mode")]
    pub mode: ModeKind,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl From<StartBody> for StartRequest {
    fn from(body: StartBody) -> Self {
        StartRequest {
            source: body.source,
            mode: body.mode,
            images: body.images,
            endpoint: body.endpoint,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Running,
    AlreadyRunning,
    FailedFast,
    Rejected,
    /// A stop request ended the start before it settled
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartResponse {
    pub ok: bool,
    pub outcome: StartOutcome,
    /// Human-readable status line
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_tail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopResponse {
    pub stopped: bool,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub max_bytes: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn start_rejection(err: SessionError) -> (StatusCode, StartResponse) {
    let (code, outcome) = match &err {
        SessionError::AlreadyRunning => (StatusCode::CONFLICT, StartOutcome::AlreadyRunning),
        SessionError::StoppedDuringStartup => (StatusCode::CONFLICT, StartOutcome::Stopped),
        SessionError::StartupFailure { .. } => (StatusCode::BAD_GATEWAY, StartOutcome::FailedFast),
        SessionError::Auth(_) => (StatusCode::BAD_GATEWAY, StartOutcome::Rejected),
        SessionError::Spawn(_) | SessionError::Playlist(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, StartOutcome::Rejected)
        }
        SessionError::Config(_)
        | SessionError::InvalidRequest(_)
        | SessionError::Resolution(_) => (StatusCode::BAD_REQUEST, StartOutcome::Rejected),
    };

    let status = err.to_string();
    let (reason, hint, log_tail) = match err {
        SessionError::StartupFailure {
            reason, log_tail, ..
        } => (Some(reason), Some(reason.hint()), Some(log_tail)),
        _ => (None, None, None),
    };

    (
        code,
        StartResponse {
            ok: false,
            outcome,
            status,
            session: None,
            reason,
            hint,
            log_tail,
        },
    )
}

/// Handler for POST /session/start
async fn start_session(
    State(state): State<AppState>,
    Json(body): Json<StartBody>,
) -> (StatusCode, Json<StartResponse>) {
    match state.session.start(body.into()).await {
        Ok(session) => (
            StatusCode::OK,
            Json(StartResponse {
                ok: true,
                outcome: StartOutcome::Running,
                status: session.summary(),
                session: Some(session),
                reason: None,
                hint: None,
                log_tail: None,
            }),
        ),
        Err(err) => {
            let (code, response) = start_rejection(err);
            (code, Json(response))
        }
    }
}

/// Handler for POST /session/stop
async fn stop_session(State(state): State<AppState>) -> Json<StopResponse> {
    let outcome = state.session.stop().await;
    let status = state.session.status().await;
    Json(StopResponse {
        stopped: outcome.stopped(),
        status: status.describe(),
    })
}

/// Handler for GET /session/status
async fn session_status(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.session.status().await)
}

/// Handler for GET /session/log
async fn session_log(State(state): State<AppState>, Query(query): Query<LogQuery>) -> String {
    state
        .session
        .log_tail(query.max_bytes.unwrap_or(DEFAULT_LOG_BYTES))
}

fn service_error(err: ServiceError) -> Response {
    let code = match &err {
        ServiceError::Unknown(_) => StatusCode::NOT_FOUND,
        ServiceError::NotConfigured { .. } | ServiceError::Unsupported { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ServiceError::Spawn { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        code,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// Handler for GET /services/:name
async fn service_status(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match name.parse::<AuxService>() {
        Ok(service) => Json(state.services.status(service)).into_response(),
        Err(e) => service_error(e),
    }
}

/// Handler for POST /services/:name/start
async fn service_start(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match name
        .parse::<AuxService>()
        .and_then(|service| state.services.start(service))
    {
        Ok(action) => Json(action).into_response(),
        Err(e) => service_error(e),
    }
}

/// Handler for POST /services/:name/stop
async fn service_stop(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match name.parse::<AuxService>() {
        Ok(service) => Json(state.services.stop(service)).into_response(),
        Err(e) => service_error(e),
    }
}

/// Handler for POST /services/:name/repair
async fn service_repair(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let service = match name.parse::<AuxService>() {
        Ok(AuxService::FileServer) => AuxService::FileServer,
        Ok(service) => {
            return service_error(ServiceError::Unsupported {
                service,
                action: "repair",
            })
        }
        Err(e) => return service_error(e),
    };
    info!(%service, "repairing LAN access");
    match state.services.repair_file_server().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => service_error(e),
    }
}

/// Handler for GET /env
async fn env_report(State(state): State<AppState>) -> Response {
    let config = state.config.snapshot();
    let stream = state.session.status().await;
    let services = state.services.clone();

    let collected = tokio::task::spawn_blocking(move || {
        let file_server = services.status(AuxService::FileServer);
        EnvReport::collect(&config, file_server, &stream)
    })
    .await;

    match collected {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            error!(error = %e, "environment check panicked");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "environment check failed".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Creates the axum Router with the control endpoints
pub fn create_control_router(state: AppState) -> Router {
    Router::new()
        .route("/session/start", post(start_session))
        .route("/session/stop", post(stop_session))
        .route("/session/status", get(session_status))
        .route("/session/log", get(session_log))
        .route("/services/:name", get(service_status))
        .route("/services/:name/start", post(service_start))
        .route("/services/:name/stop", post(service_stop))
        .route("/services/:name/repair", post(service_repair))
        .route("/env", get(env_report))
        .with_state(state)
}

/// Serve the control API on `bind` until `shutdown` resolves
pub async fn run_control_server<F>(
    state: AppState,
    bind: &str,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = bind
        .parse()
        .map_err(|_| ServerError::InvalidAddress(bind.to_string()))?;
    let app = create_control_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
