use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use clap::Parser;
use serde_json::{Value, json};
use setuplive::store::{InMemoryStore, SessionStore, StoreError};
use setuplive::validate::{self, Rejection};
use setuplive::{ErrorLogEntry, SessionId};
use std::{sync::Arc, time::Duration};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind the service to
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: String,
    /// Retention window for session state, refreshed on every write
    #[arg(long, default_value_t = 3600)]
    ttl_secs: u64,
}

#[derive(Clone)]
struct ServerState {
    store: Arc<dyn SessionStore>,
}

type ApiError = (StatusCode, Json<Value>);

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("setuplive_service=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();

    info!(addr = %args.addr, ttl_secs = args.ttl_secs, "starting service");

    let state = ServerState {
        store: Arc::new(InMemoryStore::with_ttl(Duration::from_secs(args.ttl_secs))),
    };

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}

fn app(state: ServerState) -> Router {
    // The reporting scripts run outside the browser origin model, so every
    // route answers preflight with permissive cross-origin headers.
    Router::new()
        .route(
            "/progress/:session_id",
            get(get_progress).post(put_progress),
        )
        .route(
            "/progress/:session_id/log",
            get(get_error_log).post(append_error_log),
        )
        .route("/notify-complete", post(notify_complete))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `POST /progress/:session_id` — validate and overwrite the current-state
/// record, refreshing its expiration. The store is untouched on rejection.
async fn put_progress(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let session = SessionId::from_str(&session_id);
    let record = validate::progress_record(&session, &body).map_err(rejection_response)?;

    state
        .store
        .put_record(&session, &record)
        .await
        .map_err(|e| store_failure(e, "Failed to store progress"))?;

    info!(
        session = %session,
        step = record.current_step,
        phase = ?record.phase,
        complete = record.complete,
        "progress stored"
    );

    Ok(Json(json!({ "success": true, "sessionId": session.as_str() })))
}

/// `GET /progress/:session_id` — the stored record verbatim, or a
/// distinguished 404 when the key is absent or expired.
async fn get_progress(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = SessionId::from_str(&session_id);
    let record = state
        .store
        .get_record(&session)
        .await
        .map_err(|e| store_failure(e, "Failed to retrieve progress"))?;

    match record {
        Some(record) => Ok(Json(
            serde_json::to_value(&record)
                .map_err(|e| store_failure(StoreError::Codec(e.to_string()), "Failed to retrieve progress"))?,
        )),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Session not found" })),
        )),
    }
}

/// `POST /progress/:session_id/log` — append one entry to the session's
/// error log, refreshing the log's expiration.
async fn append_error_log(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let session = SessionId::from_str(&session_id);
    let entry: ErrorLogEntry = validate::log_entry(&body).map_err(|issues| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid error log entry", "details": issues })),
        )
    })?;

    let total = state
        .store
        .append_log(&session, entry)
        .await
        .map_err(|e| store_failure(e, "Failed to append to error log"))?;

    info!(session = %session, total_errors = total, "error log entry appended");

    Ok(Json(json!({
        "success": true,
        "sessionId": session.as_str(),
        "totalErrors": total,
    })))
}

/// `GET /progress/:session_id/log` — the whole log, empty if nothing has
/// been logged yet. A missing log is not a not-found condition: a session
/// is expected to exist before errors are.
async fn get_error_log(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = SessionId::from_str(&session_id);
    let errors = state
        .store
        .read_log(&session)
        .await
        .map_err(|e| store_failure(e, "Failed to retrieve error log"))?;

    Ok(Json(json!({ "errors": errors })))
}

/// `POST /notify-complete` — best-effort end-of-run summary. Logged, not
/// stored.
async fn notify_complete(Json(body): Json<Value>) -> Result<Json<Value>, ApiError> {
    let notice = validate::completion_notice(&body).map_err(|issues| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid data", "details": issues })),
        )
    })?;

    info!(
        session = %notice.session_id,
        client_email = notice.client_email.as_deref().unwrap_or("not provided"),
        os = ?notice.os,
        tools_installed = notice.tools_installed.unwrap_or(0),
        errors = notice.errors.unwrap_or(0),
        duration_seconds = notice.duration_seconds.unwrap_or(0.0),
        "setup complete"
    );

    let message = match &notice.client_email {
        Some(email) => format!("Setup complete logged for {email}"),
        None => "Setup complete logged".to_string(),
    };

    Ok(Json(json!({ "success": true, "message": message })))
}

fn rejection_response(rejection: Rejection) -> ApiError {
    match rejection {
        Rejection::Shape(issues) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid progress data", "details": issues })),
        ),
        Rejection::IdentityMismatch { .. } => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Session ID mismatch" })),
        ),
    }
}

fn store_failure(e: StoreError, message: &str) -> ApiError {
    error!(error = %e, "store operation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
}
