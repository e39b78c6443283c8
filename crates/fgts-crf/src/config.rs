//! Lookup configuration. Passed in by the caller, never read from the environment here.

use std::fmt;
use std::time::Duration;

/// Form page of the CRF employer lookup. GET serves the form, POST submits it.
pub const DEFAULT_FORM_URL: &str =
    "https://consulta-crf.caixa.gov.br/consultacrf/pages/consultaEmpregador.jsf";

/// Browser identity the site accepts.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36 \
     OPR/105.0.0.0 (Edition std-1)";

pub const DEFAULT_CAPTCHA_SUBMIT_URL: &str = "http://2captcha.com/in.php";
pub const DEFAULT_CAPTCHA_RESULT_URL: &str = "http://2captcha.com/res.php";

/// Delay before each status poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Status polls per captcha job.
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 15;

/// Everything one lookup needs.
#[derive(Debug, Clone, Default)]
pub struct LookupConfig {
    pub site: SiteConfig,
    pub captcha: CaptchaConfig,
    /// Overall budget for one lookup. `None` leaves only the per-request timeouts.
    pub deadline: Option<Duration>,
}

/// Target site settings.
#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub form_url: String,
    /// Headers sent on every site request. The user agent lives here too.
    pub identity_headers: Vec<(String, String)>,
    pub page_timeout: Duration,
    pub submit_timeout: Duration,
    /// The site's certificate chain is not verifiable from every host.
    pub accept_invalid_certs: bool,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            form_url: DEFAULT_FORM_URL.to_string(),
            identity_headers: vec![
                ("user-agent".to_string(), DEFAULT_USER_AGENT.to_string()),
                ("authority".to_string(), "consulta-crf.caixa.gov.br".to_string()),
                ("scheme".to_string(), "https".to_string()),
            ],
            page_timeout: Duration::from_secs(30),
            submit_timeout: Duration::from_secs(50),
            accept_invalid_certs: true,
        }
    }
}

impl SiteConfig {
    /// Settings for a different form URL, keeping the default identity.
    pub fn with_form_url(form_url: impl Into<String>) -> Self {
        Self {
            form_url: form_url.into(),
            ..Self::default()
        }
    }
}

/// Captcha solving service settings.
#[derive(Clone)]
pub struct CaptchaConfig {
    pub api_key: String,
    pub submit_url: String,
    pub result_url: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            submit_url: DEFAULT_CAPTCHA_SUBMIT_URL.to_string(),
            result_url: DEFAULT_CAPTCHA_RESULT_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

impl CaptchaConfig {
    /// Point both endpoints at another 2captcha-compatible host.
    ///
    /// `base_url` is the scheme and authority, e.g. `http://127.0.0.1:9000`.
    pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            api_key: api_key.into(),
            submit_url: format!("{base}/in.php"),
            result_url: format!("{base}/res.php"),
            ..Self::default()
        }
    }

    /// Longest time the solver can spend sleeping between polls.
    pub fn worst_case_wait(&self) -> Duration {
        self.poll_interval * self.max_attempts
    }
}

impl fmt::Debug for CaptchaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptchaConfig")
            .field("api_key", &"<redacted>")
            .field("submit_url", &self.submit_url)
            .field("result_url", &self.result_url)
            .field("request_timeout", &self.request_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}
