//! Sequences session acquisition, captcha solving, and submission for one lookup.

use std::future::Future;

use tokio::time::Instant;

use crate::captcha::{CaptchaSolver, PollPolicy, Sleeper, TokioSleeper, TwoCaptchaService};
use crate::config::LookupConfig;
use crate::http::HttpSession;
use crate::session::SessionAcquirer;
use crate::submit::QuerySubmitter;
use crate::types::{Cnpj, LookupError, LookupResult, PipelineError, QueryOutcome, Stage};

/// Runs CRF lookups. Holds only configuration; every call gets its own session.
pub struct Orchestrator<C = TokioSleeper> {
    config: LookupConfig,
    sleeper: C,
}

impl Orchestrator<TokioSleeper> {
    pub fn new(config: LookupConfig) -> Self {
        Self::with_sleeper(config, TokioSleeper)
    }
}

impl<C: Sleeper> Orchestrator<C> {
    /// Use a custom delay source between captcha polls.
    pub fn with_sleeper(config: LookupConfig, sleeper: C) -> Self {
        Self { config, sleeper }
    }

    pub fn config(&self) -> &LookupConfig {
        &self.config
    }

    /// Run one lookup, bounded by the configured deadline if there is one.
    ///
    /// A budget too large to represent as an instant means no deadline.
    pub async fn run_query(&self, cnpj: &Cnpj) -> Result<QueryOutcome, PipelineError> {
        let deadline = self
            .config
            .deadline
            .and_then(|budget| Instant::now().checked_add(budget));
        self.run(cnpj, deadline).await
    }

    /// Run one lookup that must finish by `deadline`.
    ///
    /// The deadline covers every stage, including the sleeps between captcha
    /// polls. Expiry reports the stage that was in flight.
    pub async fn run_query_until(
        &self,
        cnpj: &Cnpj,
        deadline: Instant,
    ) -> Result<QueryOutcome, PipelineError> {
        self.run(cnpj, Some(deadline)).await
    }

    async fn run(
        &self,
        cnpj: &Cnpj,
        deadline: Option<Instant>,
    ) -> Result<QueryOutcome, PipelineError> {
        tracing::info!(cnpj = %cnpj, "Starting CRF lookup");

        // Dropped on every exit path, including cancellation of this future.
        let http = HttpSession::new(&self.config.site)
            .map_err(|e| PipelineError::new(Stage::Session, e))?;

        let session = within(
            Stage::Session,
            deadline,
            SessionAcquirer::new(&http, &self.config.site).acquire(),
        )
        .await?;

        let service = TwoCaptchaService::new(http.client().clone(), &self.config.captcha);
        let solver = CaptchaSolver::new(
            &service,
            &self.sleeper,
            PollPolicy::from_config(&self.config.captcha),
        );
        let captcha_text = within(
            Stage::Captcha,
            deadline,
            solver.solve(session.captcha_image(), &self.config.captcha.api_key),
        )
        .await?;

        let outcome = within(
            Stage::Submission,
            deadline,
            QuerySubmitter::new(&http, &self.config.site).submit(cnpj, &session, &captcha_text),
        )
        .await?;

        tracing::info!(cnpj = %cnpj, outcome = outcome.kind(), "CRF lookup finished");
        Ok(outcome)
    }
}

/// Await a stage, tagging its failure and enforcing the optional deadline.
async fn within<T, F>(stage: Stage, deadline: Option<Instant>, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = LookupResult<T>>,
{
    let result = match deadline {
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .unwrap_or(Err(LookupError::DeadlineExceeded)),
        None => fut.await,
    };

    result.map_err(|cause| {
        tracing::warn!(stage = %stage, "CRF lookup failed: {cause}");
        PipelineError::new(stage, cause)
    })
}
