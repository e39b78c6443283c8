//! Stage 2: hand the captcha to an external solving service and poll for the answer.
//!
//! The service and the clock are both traits so the bounded poll loop can be
//! driven by a scripted service and a recording sleeper in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::CaptchaConfig;
use crate::types::{CaptchaImage, CaptchaJob, JobStatus, LookupError, LookupResult};

/// Reply text for a job the service is still working on.
const NOT_READY: &str = "CAPCHA_NOT_READY";

/// An asynchronous captcha recognition service.
#[async_trait]
pub trait CaptchaService: Send + Sync {
    /// Submit an image and return the job identifier.
    async fn submit(&self, image: &CaptchaImage, api_key: &str) -> LookupResult<String>;

    /// Query the current state of a job.
    async fn poll(&self, job_id: &str, api_key: &str) -> LookupResult<JobStatus>;
}

/// Source of delays between polls.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer. Dropping the future cancels the sleep.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Fixed-interval, bounded polling schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn from_config(config: &CaptchaConfig) -> Self {
        Self {
            interval: config.poll_interval,
            max_attempts: config.max_attempts,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&CaptchaConfig::default())
    }
}

/// Runs one captcha job from submission to solution.
pub struct CaptchaSolver<'a, S: ?Sized, C: ?Sized> {
    service: &'a S,
    sleeper: &'a C,
    policy: PollPolicy,
}

impl<'a, S, C> CaptchaSolver<'a, S, C>
where
    S: CaptchaService + ?Sized,
    C: Sleeper + ?Sized,
{
    pub fn new(service: &'a S, sleeper: &'a C, policy: PollPolicy) -> Self {
        Self {
            service,
            sleeper,
            policy,
        }
    }

    /// Submit `image` and wait for its text.
    ///
    /// Sleeps one interval before every poll and gives up after
    /// `max_attempts` pending replies.
    pub async fn solve(&self, image: &CaptchaImage, api_key: &str) -> LookupResult<String> {
        let job_id = self.service.submit(image, api_key).await?;
        let mut job = CaptchaJob::new(job_id);
        tracing::info!(job_id = %job.id, "Captcha submitted, polling for solution");

        while job.polls < self.policy.max_attempts {
            self.sleeper.sleep(self.policy.interval).await;
            let status = self.service.poll(&job.id, api_key).await?;
            job.record(status);

            match &job.status {
                JobStatus::Solved(text) => {
                    tracing::info!(job_id = %job.id, polls = job.polls, "Captcha solved");
                    return Ok(text.clone());
                }
                JobStatus::Failed(code) => {
                    tracing::warn!(job_id = %job.id, code = %code, "Captcha job failed");
                    return Err(LookupError::CaptchaRejected(code.clone()));
                }
                JobStatus::Pending => {
                    tracing::debug!(job_id = %job.id, polls = job.polls, "Captcha still pending");
                }
            }
        }

        tracing::warn!(job_id = %job.id, polls = job.polls, "Captcha polling budget exhausted");
        Err(LookupError::CaptchaTimeout {
            attempts: job.polls,
        })
    }
}

/// JSON reply shape shared by the submit and result endpoints.
#[derive(Debug, Deserialize)]
struct ServiceReply {
    status: i64,
    #[serde(default)]
    request: String,
}

/// Client for a 2captcha-compatible HTTP API.
pub struct TwoCaptchaService {
    http: reqwest::Client,
    submit_url: String,
    result_url: String,
    timeout: Duration,
}

impl TwoCaptchaService {
    pub fn new(http: reqwest::Client, config: &CaptchaConfig) -> Self {
        Self {
            http,
            submit_url: config.submit_url.clone(),
            result_url: config.result_url.clone(),
            timeout: config.request_timeout,
        }
    }
}

#[async_trait]
impl CaptchaService for TwoCaptchaService {
    async fn submit(&self, image: &CaptchaImage, api_key: &str) -> LookupResult<String> {
        let resp = self
            .http
            .post(&self.submit_url)
            .timeout(self.timeout)
            .form(&[
                ("key", api_key),
                ("method", "base64"),
                ("body", image.base64()),
                ("regsense", "1"),
                ("json", "1"),
            ])
            .send()
            .await?;

        let body = reply_body(resp, "submit").await?;
        let reply: ServiceReply = serde_json::from_str(&body)
            .map_err(|e| LookupError::CaptchaSubmit(format!("unreadable reply: {e}")))?;
        if reply.status != 1 || reply.request.trim().is_empty() {
            return Err(LookupError::CaptchaSubmit(if reply.request.is_empty() {
                "no job id returned".to_string()
            } else {
                reply.request
            }));
        }

        Ok(reply.request.trim().to_string())
    }

    async fn poll(&self, job_id: &str, api_key: &str) -> LookupResult<JobStatus> {
        let resp = self
            .http
            .get(&self.result_url)
            .timeout(self.timeout)
            .query(&[
                ("key", api_key),
                ("action", "get"),
                ("id", job_id),
                ("json", "1"),
            ])
            .send()
            .await?;

        let body = reply_body(resp, "result").await?;
        let reply: ServiceReply = serde_json::from_str(&body)
            .map_err(|e| LookupError::Network(format!("malformed captcha poll reply: {e}")))?;

        Ok(job_status(reply))
    }
}

/// Body of a solver reply. A non-success status from either endpoint is a
/// transport failure, whatever the body says.
async fn reply_body(resp: reqwest::Response, endpoint: &str) -> LookupResult<String> {
    let status = resp.status();
    if !status.is_success() {
        return Err(LookupError::Network(format!(
            "HTTP {} from captcha {endpoint} endpoint",
            status.as_u16()
        )));
    }
    Ok(resp.text().await?)
}

fn job_status(reply: ServiceReply) -> JobStatus {
    if reply.status == 1 {
        JobStatus::Solved(reply.request)
    } else if reply.request.starts_with("ERROR") {
        JobStatus::Failed(reply.request)
    } else {
        if reply.request != NOT_READY {
            tracing::debug!("Unexpected pending reply: {}", reply.request);
        }
        JobStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Submit,
        Sleep(Duration),
        Poll,
    }

    type Log = Arc<Mutex<Vec<Event>>>;

    struct ScriptedService {
        log: Log,
        submit: Mutex<Option<LookupResult<String>>>,
        replies: Mutex<VecDeque<LookupResult<JobStatus>>>,
    }

    impl ScriptedService {
        fn new(log: Log, replies: Vec<LookupResult<JobStatus>>) -> Self {
            Self {
                log,
                submit: Mutex::new(Some(Ok("job-1".to_string()))),
                replies: Mutex::new(replies.into()),
            }
        }

        fn failing_submit(log: Log, err: LookupError) -> Self {
            let svc = Self::new(log, Vec::new());
            *svc.submit.lock().unwrap() = Some(Err(err));
            svc
        }
    }

    #[async_trait]
    impl CaptchaService for ScriptedService {
        async fn submit(&self, _image: &CaptchaImage, _api_key: &str) -> LookupResult<String> {
            self.log.lock().unwrap().push(Event::Submit);
            self.submit.lock().unwrap().take().expect("submitted twice")
        }

        async fn poll(&self, job_id: &str, _api_key: &str) -> LookupResult<JobStatus> {
            assert_eq!(job_id, "job-1");
            self.log.lock().unwrap().push(Event::Poll);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(JobStatus::Pending))
        }
    }

    struct RecordingSleeper(Log);

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.0.lock().unwrap().push(Event::Sleep(duration));
        }
    }

    fn image() -> CaptchaImage {
        CaptchaImage::from_data_uri("data:image/png;base64,iVBORw0KGgo=").unwrap()
    }

    fn polls(log: &Log) -> usize {
        log.lock().unwrap().iter().filter(|e| **e == Event::Poll).count()
    }

    fn sleeps(log: &Log) -> Vec<Duration> {
        log.lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Sleep(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_solves_after_pending_replies() {
        let log: Log = Arc::default();
        let k = 3;
        let mut replies: Vec<_> = (0..k).map(|_| Ok(JobStatus::Pending)).collect();
        replies.push(Ok(JobStatus::Solved("X7pQ".into())));
        let service = ScriptedService::new(log.clone(), replies);
        let sleeper = RecordingSleeper(log.clone());

        let solver = CaptchaSolver::new(&service, &sleeper, PollPolicy::default());
        let text = solver.solve(&image(), "key").await.unwrap();

        assert_eq!(text, "X7pQ");
        assert_eq!(polls(&log), k + 1);
        assert_eq!(sleeps(&log), vec![Duration::from_secs(5); k + 1]);
    }

    #[tokio::test]
    async fn test_every_poll_is_preceded_by_a_sleep() {
        let log: Log = Arc::default();
        let service = ScriptedService::new(
            log.clone(),
            vec![Ok(JobStatus::Pending), Ok(JobStatus::Solved("ok".into()))],
        );
        let sleeper = RecordingSleeper(log.clone());
        let policy = PollPolicy {
            interval: Duration::from_millis(250),
            max_attempts: 4,
        };

        CaptchaSolver::new(&service, &sleeper, policy)
            .solve(&image(), "key")
            .await
            .unwrap();

        let interval = Duration::from_millis(250);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                Event::Submit,
                Event::Sleep(interval),
                Event::Poll,
                Event::Sleep(interval),
                Event::Poll,
            ]
        );
    }

    #[tokio::test]
    async fn test_times_out_after_budget() {
        let log: Log = Arc::default();
        let service = ScriptedService::new(log.clone(), Vec::new());
        let sleeper = RecordingSleeper(log.clone());

        let err = CaptchaSolver::new(&service, &sleeper, PollPolicy::default())
            .solve(&image(), "key")
            .await
            .unwrap_err();

        assert!(matches!(err, LookupError::CaptchaTimeout { attempts: 15 }));
        assert_eq!(polls(&log), 15);
        assert_eq!(sleeps(&log).iter().sum::<Duration>(), Duration::from_secs(75));
    }

    #[tokio::test]
    async fn test_submit_failure_skips_polling() {
        let log: Log = Arc::default();
        let service =
            ScriptedService::failing_submit(log.clone(), LookupError::CaptchaSubmit("ERROR_ZERO_BALANCE".into()));
        let sleeper = RecordingSleeper(log.clone());

        let err = CaptchaSolver::new(&service, &sleeper, PollPolicy::default())
            .solve(&image(), "key")
            .await
            .unwrap_err();

        assert!(matches!(err, LookupError::CaptchaSubmit(_)));
        assert_eq!(*log.lock().unwrap(), vec![Event::Submit]);
    }

    #[tokio::test]
    async fn test_transport_error_is_not_a_timeout() {
        let log: Log = Arc::default();
        let service = ScriptedService::new(
            log.clone(),
            vec![
                Ok(JobStatus::Pending),
                Err(LookupError::Network("connection reset".into())),
            ],
        );
        let sleeper = RecordingSleeper(log.clone());

        let err = CaptchaSolver::new(&service, &sleeper, PollPolicy::default())
            .solve(&image(), "key")
            .await
            .unwrap_err();

        assert!(matches!(err, LookupError::Network(_)));
        assert_eq!(polls(&log), 2);
    }

    #[tokio::test]
    async fn test_service_error_code_stops_polling() {
        let log: Log = Arc::default();
        let service = ScriptedService::new(
            log.clone(),
            vec![Ok(JobStatus::Failed("ERROR_CAPTCHA_UNSOLVABLE".into()))],
        );
        let sleeper = RecordingSleeper(log.clone());

        let err = CaptchaSolver::new(&service, &sleeper, PollPolicy::default())
            .solve(&image(), "key")
            .await
            .unwrap_err();

        assert!(matches!(err, LookupError::CaptchaRejected(ref c) if c == "ERROR_CAPTCHA_UNSOLVABLE"));
        assert_eq!(polls(&log), 1);
    }

    #[test]
    fn test_job_status_mapping() {
        let reply = |status, request: &str| ServiceReply {
            status,
            request: request.to_string(),
        };
        assert_eq!(job_status(reply(1, "abc")), JobStatus::Solved("abc".into()));
        assert_eq!(job_status(reply(0, "CAPCHA_NOT_READY")), JobStatus::Pending);
        assert_eq!(
            job_status(reply(0, "ERROR_WRONG_CAPTCHA_ID")),
            JobStatus::Failed("ERROR_WRONG_CAPTCHA_ID".into())
        );
    }
}
