//! Stage 1: fetch the form page and capture cookies, view state, and captcha.

use std::collections::BTreeMap;

use scraper::Html;

use crate::config::SiteConfig;
use crate::http::HttpSession;
use crate::markup::{attr, select_first};
use crate::types::{cookie_header, CaptchaImage, LookupError, LookupResult, SessionContext};

/// Hidden JSF field carrying the view state.
pub const VIEW_STATE_SELECTOR: &str = "input[name=\"javax.faces.ViewState\"]";

/// Captcha image inside its wrapper.
pub const CAPTCHA_IMAGE_SELECTOR: &str = "div.captcha-imagem img";

/// Fields pulled from the form page markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPage {
    pub view_token: String,
    /// Raw `src` of the captcha image: a `data:` URI or a URL reference.
    pub captcha_src: String,
}

/// Extract the view token and captcha source from the form page.
pub fn parse_form_page(html: &str) -> LookupResult<FormPage> {
    let document = Html::parse_document(html);

    let view_token = select_first(&document, VIEW_STATE_SELECTOR)
        .and_then(|input| attr(input, "value"))
        .ok_or_else(|| LookupError::SessionParse("view state field not found".into()))?;

    let captcha_src = select_first(&document, CAPTCHA_IMAGE_SELECTOR)
        .and_then(|img| attr(img, "src"))
        .ok_or_else(|| LookupError::SessionParse("captcha image not found".into()))?;

    Ok(FormPage {
        view_token,
        captcha_src,
    })
}

/// Opens a session against the target site. One fetch per call, no retries.
pub struct SessionAcquirer<'a> {
    http: &'a HttpSession,
    site: &'a SiteConfig,
}

impl<'a> SessionAcquirer<'a> {
    pub fn new(http: &'a HttpSession, site: &'a SiteConfig) -> Self {
        Self { http, site }
    }

    pub async fn acquire(&self) -> LookupResult<SessionContext> {
        let page = self
            .http
            .get_page(&self.site.form_url, None, self.site.page_timeout)
            .await?;

        let mut cookies: BTreeMap<String, String> = page.cookies.into_iter().collect();
        let form = parse_form_page(&page.body)?;

        let captcha_image = if form.captcha_src.starts_with("data:") {
            CaptchaImage::from_data_uri(&form.captcha_src)?
        } else {
            let image_url = page.final_url.join(&form.captcha_src).map_err(|e| {
                LookupError::SessionParse(format!(
                    "bad captcha image reference {:?}: {e}",
                    form.captcha_src
                ))
            })?;
            tracing::debug!("Fetching captcha image from {image_url}");

            let image = self
                .http
                .get_image(
                    image_url.as_str(),
                    cookie_header(&cookies).as_deref(),
                    self.site.page_timeout,
                )
                .await?;
            cookies.extend(image.cookies);
            let mime = image.content_type.as_deref().unwrap_or("image/png");
            CaptchaImage::from_bytes(mime, &image.bytes)?
        };

        tracing::debug!(
            cookies = cookies.len(),
            image_mime = captcha_image.mime(),
            "Session acquired"
        );

        Ok(SessionContext::new(cookies, form.view_token, captcha_image))
    }
}
