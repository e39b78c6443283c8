//! FGTS CRF: employer regularity lookups against the CAIXA consultation form.
//!
//! A lookup is three strictly ordered stages, each with its own error kind:
//! [`SessionAcquirer`] captures the form session, [`CaptchaSolver`] delegates
//! the captcha to an external service, and [`QuerySubmitter`] posts the form
//! and classifies the reply. [`Orchestrator`] runs them for one CNPJ.

pub mod captcha;
pub mod config;
pub mod http;
pub mod markup;
pub mod pipeline;
pub mod session;
pub mod submit;
pub mod types;

pub use captcha::{CaptchaService, CaptchaSolver, PollPolicy, Sleeper, TokioSleeper, TwoCaptchaService};
pub use config::{CaptchaConfig, LookupConfig, SiteConfig};
pub use http::HttpSession;
pub use pipeline::Orchestrator;
pub use session::SessionAcquirer;
pub use submit::{classify_response, QuerySubmitter};
pub use types::*;
