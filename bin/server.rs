// Fuzzy Record Linkage - Web Server
// JSON-over-HTTP front end for the linker, with Axum

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use fuzzy_linkage::logging::init_logging;
use fuzzy_linkage::{MatchRequest, MatchResponse, VERSION};

const DEFAULT_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_MAX_ROWS: usize = 500;

/// Shared application state
#[derive(Clone)]
struct AppState {
    /// Largest base or target accepted per request
    max_rows: usize,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::<()>::err(message))).into_response()
}

// ============================================================================
// MATCHING
// ============================================================================

/// Size check, then the linker on the blocking pool
async fn execute(state: &AppState, request: MatchRequest) -> Result<MatchResponse, Response> {
    for (side, rows) in [("base", request.base.len()), ("target", request.target.len())] {
        if rows > state.max_rows {
            warn!(side, rows, max_rows = state.max_rows, "request rejected: dataset too large");
            return Err(error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("{} dataset has {} rows; the limit is {}", side, rows, state.max_rows),
            ));
        }
    }

    match tokio::task::spawn_blocking(move || fuzzy_linkage::run(&request)).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => Err(error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())),
        Err(e) => {
            error!("Linkage task failed: {}", e);
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, "linkage task failed"))
        }
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok(HealthResponse {
        status: "OK",
        version: VERSION,
    }))
}

/// POST /api/match - Full response as JSON
async fn match_json(State(state): State<Arc<AppState>>, Json(request): Json<MatchRequest>) -> Response {
    match execute(&state, request).await {
        Ok(response) => (StatusCode::OK, Json(ApiResponse::ok(response))).into_response(),
        Err(response) => response,
    }
}

/// POST /api/match/annotated.csv - Annotated target table as CSV
async fn match_csv(State(state): State<Arc<AppState>>, Json(request): Json<MatchRequest>) -> Response {
    let response = match execute(&state, request).await {
        Ok(response) => response,
        Err(response) => return response,
    };

    match response.annotated.to_csv_string() {
        Ok(csv) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"annotated.csv\""),
            ],
            csv,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to render CSV: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/match", post(match_json))
        .route("/match/annotated.csv", post(match_csv))
        .with_state(Arc::new(state));

    Router::new()
        .nest("/api", api_routes)
        .layer(DefaultBodyLimit::max(32 * 1024 * 1024))
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging(0, std::env::var_os("LINKAGE_JSON_LOGS").is_some());

    println!("🌐 Fuzzy Record Linkage - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let addr = std::env::var("LINKAGE_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let max_rows = match std::env::var("LINKAGE_MAX_ROWS") {
        Ok(value) => value
            .parse()
            .map_err(|e| anyhow::anyhow!("LINKAGE_MAX_ROWS must be a row count: {}", e))?,
        Err(_) => DEFAULT_MAX_ROWS,
    };

    let app = router(AppState { max_rows });

    let listener = tokio::net::TcpListener::bind(addr.as_str()).await?;
    info!(%addr, max_rows, "server listening");

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: POST http://{}/api/match", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}
