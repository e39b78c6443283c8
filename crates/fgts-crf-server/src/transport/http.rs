//! HTTP transport: axum router with the lookup, status and welcome routes.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use fgts_crf::{Cnpj, LookupConfig, Orchestrator};

use crate::types::{
    ApiError, ApiResult, ConsultaRequest, ConsultaResponse, StatusMessage, WELCOME_MESSAGE,
};

/// Shared state handed to every handler.
pub struct AppState {
    pub lookup: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(config: LookupConfig) -> Self {
        Self {
            lookup: Arc::new(Orchestrator::new(config)),
        }
    }
}

/// Build the API router. Exposed separately so tests can drive it in-process.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/api/v1/fgts/status", get(handle_status))
        .route("/api/v1/fgts/consulta", post(handle_consulta))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct HttpTransport {
    state: Arc<AppState>,
}

impl HttpTransport {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Serve until the process is stopped.
    pub async fn run(&self, addr: &str) -> std::io::Result<()> {
        let app = router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(addr).await?;

        tracing::info!("HTTP transport listening on {addr}");

        axum::serve(listener, app).await
    }
}

async fn handle_root() -> Json<StatusMessage> {
    Json(StatusMessage::new(WELCOME_MESSAGE))
}

async fn handle_status() -> Json<StatusMessage> {
    Json(StatusMessage::new("sucesso"))
}

async fn handle_consulta(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ConsultaRequest>, JsonRejection>,
) -> ApiResult<Json<ConsultaResponse>> {
    let Json(request) = payload.map_err(|e| {
        tracing::debug!("Unreadable lookup body: {e}");
        ApiError::Validation
    })?;
    let cnpj = Cnpj::parse(&request.cnpj).map_err(|_| ApiError::Validation)?;

    // Own task per lookup; a panic inside the pipeline becomes a 500.
    let lookup = Arc::clone(&state.lookup);
    let mut task = AbortOnDrop(tokio::spawn(async move { lookup.run_query(&cnpj).await }));
    let outcome = (&mut task.0)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(ConsultaResponse::from(&outcome)))
}

/// Aborts the lookup task when the request goes away before it finishes,
/// so a dropped connection stops the poll loop and releases the session.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
