//! API errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use fgts_crf::PipelineError;

pub const INVALID_CNPJ_DETAIL: &str = "CNPJ deve conter 14 dígitos numéricos.";

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    /// Body missing, malformed, or carrying a bad CNPJ.
    #[error("CNPJ deve conter 14 dígitos numéricos.")]
    Validation,

    #[error("Erro no serviço de consulta: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Ocorreu um erro interno inesperado: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Pipeline(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Validation => tracing::debug!("Rejected lookup request: {self}"),
            ApiError::Pipeline(e) => tracing::warn!(stage = %e.stage, "Lookup failed: {e}"),
            ApiError::Internal(e) => tracing::error!("Lookup task crashed: {e}"),
        }
        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}
