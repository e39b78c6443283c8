//! Per-lookup HTTP session wrapping reqwest.
//!
//! Not a browser. One client per lookup, no cookie jar: cookies are read off
//! responses and sent back explicitly from the [`SessionContext`], so nothing
//! leaks between lookups.
//!
//! [`SessionContext`]: crate::types::SessionContext

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE};
use url::Url;

use crate::config::SiteConfig;
use crate::types::{LookupError, LookupResult};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

/// A text response from the target site.
#[derive(Debug, Clone)]
pub struct PageResponse {
    /// Final URL after redirects.
    pub final_url: Url,
    /// Cookies set by the response, in header order.
    pub cookies: Vec<(String, String)>,
    pub body: String,
}

/// A binary response from the target site.
#[derive(Debug, Clone)]
pub struct ImageResponse {
    pub content_type: Option<String>,
    pub cookies: Vec<(String, String)>,
    pub bytes: Vec<u8>,
}

/// HTTP session owned by a single lookup.
pub struct HttpSession {
    client: reqwest::Client,
    identity: HeaderMap,
}

impl HttpSession {
    /// Build a fresh client for one lookup.
    pub fn new(site: &SiteConfig) -> LookupResult<Self> {
        let identity = identity_headers(&site.identity_headers)?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .danger_accept_invalid_certs(site.accept_invalid_certs)
            .build()
            .map_err(|e| LookupError::ClientSetup(e.to_string()))?;

        Ok(Self { client, identity })
    }

    /// The underlying client, for calls that do not carry the site identity.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// GET a page and decode its body as text.
    pub async fn get_page(
        &self,
        url: &str,
        cookie: Option<&str>,
        timeout: Duration,
    ) -> LookupResult<PageResponse> {
        let resp = self.site_request(self.client.get(url), cookie, timeout).send().await?;
        let resp = ensure_success(resp, url)?;

        let final_url = resp.url().clone();
        let cookies = response_cookies(&resp);
        let body = resp.text().await?;

        Ok(PageResponse {
            final_url,
            cookies,
            body,
        })
    }

    /// GET a binary resource, such as a captcha image referenced by URL.
    pub async fn get_image(
        &self,
        url: &str,
        cookie: Option<&str>,
        timeout: Duration,
    ) -> LookupResult<ImageResponse> {
        let resp = self.site_request(self.client.get(url), cookie, timeout).send().await?;
        let resp = ensure_success(resp, url)?;

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string());
        let cookies = response_cookies(&resp);
        let bytes = resp.bytes().await?.to_vec();

        Ok(ImageResponse {
            content_type,
            cookies,
            bytes,
        })
    }

    /// POST url-encoded form fields, preserving their order, and return the body.
    pub async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
        cookie: Option<&str>,
        timeout: Duration,
    ) -> LookupResult<String> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();

        let builder = self
            .site_request(self.client.post(url), cookie, timeout)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body);

        let resp = ensure_success(builder.send().await?, url)?;
        Ok(resp.text().await?)
    }

    fn site_request(
        &self,
        builder: reqwest::RequestBuilder,
        cookie: Option<&str>,
        timeout: Duration,
    ) -> reqwest::RequestBuilder {
        let builder = builder.headers(self.identity.clone()).timeout(timeout);
        match cookie {
            Some(cookie) => builder.header(COOKIE, cookie),
            None => builder,
        }
    }
}

/// Parse configured header pairs into a header map.
pub fn identity_headers(pairs: &[(String, String)]) -> LookupResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| LookupError::ClientSetup(format!("invalid header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| LookupError::ClientSetup(format!("invalid value for {}: {e}", name.as_str())))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn ensure_success(resp: reqwest::Response, url: &str) -> LookupResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(LookupError::Network(format!("HTTP {} from {url}", status.as_u16())))
    }
}

fn response_cookies(resp: &reqwest::Response) -> Vec<(String, String)> {
    resp.cookies()
        .map(|c| (c.name().to_string(), c.value().to_string()))
        .collect()
}
