//! Core data types for a single CRF lookup and its failure taxonomy.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Number of digits in an unformatted CNPJ.
pub const CNPJ_LEN: usize = 14;

/// A 14-digit employer identifier, without punctuation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cnpj(String);

impl Cnpj {
    /// Validate and wrap a raw identifier.
    pub fn parse(raw: &str) -> Result<Self, InvalidCnpj> {
        if raw.len() == CNPJ_LEN && raw.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidCnpj(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Cnpj {
    type Err = InvalidCnpj;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Cnpj {
    type Error = InvalidCnpj;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Cnpj> for String {
    fn from(value: Cnpj) -> Self {
        value.0
    }
}

impl AsRef<str> for Cnpj {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cnpj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rejected CNPJ input.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("CNPJ must contain exactly 14 numeric digits, got {0:?}")]
pub struct InvalidCnpj(pub String);

/// The encoded captcha payload captured from the form page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaImage {
    mime: String,
    base64: String,
}

impl CaptchaImage {
    /// Parse a `data:<mime>;base64,<body>` URI.
    pub fn from_data_uri(uri: &str) -> LookupResult<Self> {
        let rest = uri
            .strip_prefix("data:")
            .ok_or_else(|| LookupError::SessionParse("captcha source is not a data URI".into()))?;
        let (header, body) = rest
            .split_once(',')
            .ok_or_else(|| LookupError::SessionParse("captcha data URI has no payload".into()))?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or_else(|| LookupError::SessionParse("captcha data URI is not base64".into()))?;
        let mime = if mime.is_empty() { "image/png" } else { mime };

        let base64: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&base64)
            .map_err(|e| LookupError::SessionParse(format!("invalid captcha base64: {e}")))?;
        if decoded.is_empty() {
            return Err(LookupError::SessionParse("captcha image is empty".into()));
        }

        Ok(Self {
            mime: mime.to_string(),
            base64,
        })
    }

    /// Encode raw image bytes fetched from the site.
    pub fn from_bytes(mime: &str, bytes: &[u8]) -> LookupResult<Self> {
        if bytes.is_empty() {
            return Err(LookupError::SessionParse("captcha image is empty".into()));
        }
        Ok(Self {
            mime: mime.to_string(),
            base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        })
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Base64 body without any `data:` prefix.
    pub fn base64(&self) -> &str {
        &self.base64
    }
}

/// Server-side session state captured from one fetch of the form page.
///
/// Immutable once built; the view token and cookies must be echoed back on
/// submission and are only valid for a single query.
#[derive(Debug, Clone)]
pub struct SessionContext {
    cookies: BTreeMap<String, String>,
    view_token: String,
    captcha_image: CaptchaImage,
}

impl SessionContext {
    pub fn new(
        cookies: BTreeMap<String, String>,
        view_token: String,
        captcha_image: CaptchaImage,
    ) -> Self {
        Self {
            cookies,
            view_token,
            captcha_image,
        }
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn view_token(&self) -> &str {
        &self.view_token
    }

    pub fn captcha_image(&self) -> &CaptchaImage {
        &self.captcha_image
    }

    /// Render the cookies as a `Cookie` request header value.
    ///
    /// Returns `None` when the site issued no cookies.
    pub fn cookie_header(&self) -> Option<String> {
        cookie_header(&self.cookies)
    }
}

/// Render a cookie map as a `Cookie` header value, `None` when empty.
pub fn cookie_header(cookies: &BTreeMap<String, String>) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// State of a recognition job as reported by the solving service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Solved(String),
    /// The service gave up on the job with an explicit error code.
    Failed(String),
}

/// A captcha recognition job tracked across status polls.
#[derive(Debug, Clone)]
pub struct CaptchaJob {
    pub id: String,
    pub status: JobStatus,
    pub polls: u32,
}

impl CaptchaJob {
    pub fn new(id: String) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            polls: 0,
        }
    }

    pub fn record(&mut self, status: JobStatus) {
        self.polls += 1;
        self.status = status;
    }
}

/// The classified result of one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QueryOutcome {
    Compliant {
        company_id: String,
        company_name: String,
    },
    NonCompliant {
        company_id: String,
        company_name: String,
    },
    InvalidCaptcha,
    SubjectNotFound,
    UnclassifiedMessage {
        raw_text: String,
    },
}

impl QueryOutcome {
    /// Human-readable summary shown to API callers.
    pub fn message(&self) -> &str {
        match self {
            QueryOutcome::Compliant { .. } => "A empresa informada está REGULAR perante o FGTS.",
            QueryOutcome::NonCompliant { .. } => {
                "A empresa informada está IRREGULAR perante o FGTS."
            }
            QueryOutcome::InvalidCaptcha => "Captcha inválido. Tente novamente.",
            QueryOutcome::SubjectNotFound => "CNPJ não encontrado na base de dados do FGTS.",
            QueryOutcome::UnclassifiedMessage { raw_text } => raw_text,
        }
    }

    /// Snake-case tag of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryOutcome::Compliant { .. } => "compliant",
            QueryOutcome::NonCompliant { .. } => "non_compliant",
            QueryOutcome::InvalidCaptcha => "invalid_captcha",
            QueryOutcome::SubjectNotFound => "subject_not_found",
            QueryOutcome::UnclassifiedMessage { .. } => "unclassified_message",
        }
    }

    /// Identifier and display name echoed by the site, when present.
    pub fn company(&self) -> Option<(&str, &str)> {
        match self {
            QueryOutcome::Compliant {
                company_id,
                company_name,
            }
            | QueryOutcome::NonCompliant {
                company_id,
                company_name,
            } => Some((company_id.as_str(), company_name.as_str())),
            _ => None,
        }
    }
}

/// Pipeline stage that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Session,
    Captcha,
    Submission,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Session => "session",
            Stage::Captcha => "captcha",
            Stage::Submission => "submission",
        };
        f.write_str(name)
    }
}

/// Failures raised inside a single stage.
#[derive(thiserror::Error, Debug)]
pub enum LookupError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("session page is missing expected fields: {0}")]
    SessionParse(String),

    #[error("captcha submission failed: {0}")]
    CaptchaSubmit(String),

    #[error("captcha not solved after {attempts} polls")]
    CaptchaTimeout { attempts: u32 },

    #[error("captcha service rejected the job: {0}")]
    CaptchaRejected(String),

    #[error("could not classify query response: {0}")]
    ResponseParse(String),

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("HTTP client setup failed: {0}")]
    ClientSetup(String),
}

impl From<reqwest::Error> for LookupError {
    fn from(e: reqwest::Error) -> Self {
        LookupError::Network(e.to_string())
    }
}

/// Convenience result type for stage operations.
pub type LookupResult<T> = Result<T, LookupError>;

/// A stage failure tagged with the stage it came from.
#[derive(thiserror::Error, Debug)]
#[error("{stage}: {cause}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub cause: LookupError,
}

impl PipelineError {
    pub fn new(stage: Stage, cause: LookupError) -> Self {
        Self { stage, cause }
    }
}
