//! JSON bodies exchanged with API callers.

use serde::{Deserialize, Serialize};

use fgts_crf::QueryOutcome;

pub const WELCOME_MESSAGE: &str = "Bem-vindo à API de Consulta FGTS.";

/// Body of `POST /api/v1/fgts/consulta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultaRequest {
    pub cnpj: String,
}

/// Successful lookup, whatever the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultaResponse {
    pub cnpj: Option<String>,
    pub razao_social: Option<String>,
    pub resultado: String,
    pub situacao: String,
}

impl From<&QueryOutcome> for ConsultaResponse {
    fn from(outcome: &QueryOutcome) -> Self {
        let (cnpj, razao_social) = match outcome.company() {
            Some((id, name)) => (Some(id.to_string()), Some(name.to_string())),
            None => (None, None),
        };
        Self {
            cnpj,
            razao_social,
            resultado: outcome.message().to_string(),
            situacao: outcome.kind().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub message: String,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
