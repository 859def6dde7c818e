use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::AlarmCommand;
use crate::engine::AlarmCommandError;
use crate::engine::ConfigEntry;
use crate::engine::Engine;
use crate::engine::EngineError;
use crate::engine::EntryError;
use crate::engine::EntryMap;
use crate::engine::EntrySource;
use crate::engine::EntryState;
use crate::engine::FlowError;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    entries: usize,
    entities: usize,
}

/// A config entry as shown to API clients. Credentials stay server-side.
#[derive(Serialize)]
struct EntryView {
    entry_id: String,
    domain: String,
    title: String,
    unique_id: Option<String>,
    source: EntrySource,
    state: EntryState,
    reason: Option<String>,
    options: EntryMap,
}

impl From<ConfigEntry> for EntryView {
    fn from(entry: ConfigEntry) -> Self {
        Self {
            entry_id: entry.entry_id,
            domain: entry.domain,
            title: entry.title,
            unique_id: entry.unique_id,
            source: entry.source,
            state: entry.state,
            reason: entry.reason,
            options: entry.options,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Handler error: a status code and a message for the body.
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError(status, error) = self;
        if status.is_server_error() {
            tracing::warn!("Request failed with {}: {}", status, error);
        } else {
            tracing::debug!("Request rejected with {}: {}", status, error);
        }
        (status, Json(ErrorResponse { error })).into_response()
    }
}

impl From<AlarmCommandError> for ApiError {
    fn from(e: AlarmCommandError) -> Self {
        let status = match &e {
            AlarmCommandError::UnknownEntity(_) => StatusCode::NOT_FOUND,
            AlarmCommandError::Unavailable(_) | AlarmCommandError::NotReady(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AlarmCommandError::Rejected(_) => StatusCode::CONFLICT,
            AlarmCommandError::Service(_) => StatusCode::BAD_GATEWAY,
        };
        ApiError(status, e.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::Entry(EntryError::NotFound(_)) => StatusCode::NOT_FOUND,
            EngineError::Entry(EntryError::AlreadyConfigured { .. }) => StatusCode::CONFLICT,
            EngineError::Flow(flow) => match flow {
                FlowError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                FlowError::InvalidAuth => StatusCode::UNAUTHORIZED,
                FlowError::AlreadyConfigured | FlowError::WrongAccount => StatusCode::CONFLICT,
                FlowError::CannotConnect => StatusCode::BAD_GATEWAY,
                FlowError::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            EngineError::UnknownDomain(_)
            | EngineError::Entry(_)
            | EngineError::Create { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    engine: Arc<Engine>,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            entries: state.engine.entries().len(),
            entities: state.engine.state_snapshot().entities.len(),
        }),
    )
}

/// Handler for GET /v1/states
#[tracing::instrument(skip(state))]
async fn states(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.engine.state_snapshot();
    Json(snapshot.entities.clone())
}

/// Handler for GET /v1/states/:entity_id
#[tracing::instrument(skip(state))]
async fn entity_state(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.engine.state_snapshot();
    let entity = snapshot.entities.get(&entity_id).cloned().ok_or_else(|| {
        ApiError(
            StatusCode::NOT_FOUND,
            format!("no entity named {}", entity_id),
        )
    })?;
    Ok(Json(entity))
}

/// Handler for GET /v1/devices
#[tracing::instrument(skip(state))]
async fn devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.engine.state_snapshot();
    Json(snapshot.devices.values().cloned().collect::<Vec<_>>())
}

/// Handler for GET /v1/entries
#[tracing::instrument(skip(state))]
async fn entries(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let entries: Vec<EntryView> = state
        .engine
        .entries()
        .into_iter()
        .map(EntryView::from)
        .collect();
    Json(entries)
}

/// Handler for GET /v1/notifications
#[tracing::instrument(skip(state))]
async fn notifications(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.engine.state_snapshot();
    Json(snapshot.notifications.values().cloned().collect::<Vec<_>>())
}

/// Handler for POST /v1/alarm/:entity_id/:action
#[tracing::instrument(skip(state))]
async fn alarm(
    State(state): State<Arc<AppState>>,
    Path((entity_id, action)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let command = AlarmCommand::parse(&action).ok_or_else(|| {
        ApiError(
            StatusCode::BAD_REQUEST,
            format!("unknown alarm action '{}'", action),
        )
    })?;
    tracing::info!("Alarm {} requested for {}", command, entity_id);

    state.engine.alarm_command(&entity_id, command).await?;
    Ok(Json(PingResponse {
        status: "ok".to_string(),
    }))
}

/// Handler for POST /v1/entries/:entry_id/reauth
#[tracing::instrument(skip(state, input))]
async fn reauth(
    State(state): State<Arc<AppState>>,
    Path(entry_id): Path<String>,
    Json(input): Json<EntryMap>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state.engine.reauth_entry(&entry_id, &input).await?;
    Ok(Json(EntryView::from(entry)))
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/states", get(states))
        .route("/v1/states/:entity_id", get(entity_state))
        .route("/v1/devices", get(devices))
        .route("/v1/entries", get(entries))
        .route("/v1/entries/:entry_id/reauth", post(reauth))
        .route("/v1/notifications", get(notifications))
        .route("/v1/alarm/:entity_id/:action", post(alarm))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires.
pub async fn serve(
    engine: Arc<Engine>,
    listen: IpAddr,
    port: u16,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, engine });
    let app = create_router(state);

    let addr = SocketAddr::new(listen, port);
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
