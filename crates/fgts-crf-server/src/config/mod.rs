//! Configuration loading and resolution.
//!
//! Precedence: explicit flag, then environment variable, then default.

use std::time::Duration;

use fgts_crf::{CaptchaConfig, LookupConfig, SiteConfig};

pub const ENV_API_KEY: &str = "CAPTCHA_API_KEY";
pub const ENV_ADDR: &str = "FGTS_CRF_ADDR";
pub const ENV_FORM_URL: &str = "FGTS_CRF_FORM_URL";
pub const ENV_CAPTCHA_URL: &str = "FGTS_CRF_CAPTCHA_URL";
pub const ENV_DEADLINE_SECS: &str = "FGTS_CRF_DEADLINE_SECS";
pub const ENV_VERIFY_TLS: &str = "FGTS_CRF_VERIFY_TLS";

pub const DEFAULT_ADDR: &str = "127.0.0.1:8000";

/// Values given explicitly on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_key: Option<String>,
    pub addr: Option<String>,
    pub form_url: Option<String>,
    pub captcha_url: Option<String>,
    pub deadline_secs: Option<u64>,
    pub verify_tls: bool,
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub lookup: LookupConfig,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("captcha API key missing: pass --api-key or set CAPTCHA_API_KEY")]
    MissingApiKey,

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

impl ServerConfig {
    /// Resolve against the process environment.
    pub fn resolve(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        Self::resolve_with(overrides, |name| std::env::var(name).ok())
    }

    /// Resolve against an arbitrary variable lookup.
    pub fn resolve_with<F>(overrides: ConfigOverrides, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup_var = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let api_key = overrides
            .api_key
            .or_else(|| lookup_var(ENV_API_KEY))
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let addr = overrides
            .addr
            .or_else(|| lookup_var(ENV_ADDR))
            .unwrap_or_else(|| DEFAULT_ADDR.to_string());

        let mut site = match overrides.form_url.or_else(|| lookup_var(ENV_FORM_URL)) {
            Some(url) => SiteConfig::with_form_url(url),
            None => SiteConfig::default(),
        };
        let verify_tls = overrides.verify_tls
            || match lookup_var(ENV_VERIFY_TLS) {
                Some(value) => parse_bool(ENV_VERIFY_TLS, &value)?,
                None => false,
            };
        site.accept_invalid_certs = !verify_tls;

        let captcha = match overrides.captcha_url.or_else(|| lookup_var(ENV_CAPTCHA_URL)) {
            Some(base) => CaptchaConfig::with_base_url(api_key, &base),
            None => CaptchaConfig {
                api_key,
                ..CaptchaConfig::default()
            },
        };

        let deadline_secs = match overrides.deadline_secs {
            Some(secs) => Some(secs),
            None => lookup_var(ENV_DEADLINE_SECS)
                .map(|raw| {
                    raw.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                        name: ENV_DEADLINE_SECS,
                        value: raw.clone(),
                    })
                })
                .transpose()?,
        };

        Ok(Self {
            addr,
            lookup: LookupConfig {
                site,
                captcha,
                deadline: deadline_secs.filter(|s| *s > 0).map(Duration::from_secs),
            },
        })
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}
