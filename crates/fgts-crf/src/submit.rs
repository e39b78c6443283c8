//! Stage 3: post the completed form and classify the site's feedback.

use scraper::Html;

use crate::config::SiteConfig;
use crate::http::HttpSession;
use crate::markup::{normalized_text, select_all, select_first};
use crate::types::{Cnpj, LookupError, LookupResult, QueryOutcome, SessionContext};

/// Region of the response carrying the outcome message.
pub const FEEDBACK_SELECTOR: &str = "div.feedback";

/// Labeled values echoed back by the site: identifier first, then name.
pub const VALUE_SELECTOR: &str = "span.valor";

/// Marker phrases, checked in this order. First match wins.
pub const COMPLIANT_MARKER: &str = "REGULAR perante o FGTS";
pub const NON_COMPLIANT_MARKER: &str = "não são suficientes para a comprovação";
pub const INVALID_CAPTCHA_MARKER: &str = "Código Captcha Inválido";
pub const NOT_FOUND_MARKER: &str = "informar o CNPJ correto";

/// Build the JSF form payload. Field order follows the browser's.
pub fn form_fields<'a>(
    cnpj: &'a Cnpj,
    session: &'a SessionContext,
    captcha_text: &'a str,
) -> Vec<(&'static str, &'a str)> {
    vec![
        ("mainForm", "mainForm"),
        ("mainForm:tipoEstabelecimento", "1"),
        ("mainForm:txtCaptcha", captcha_text),
        ("AJAXREQUEST", "_viewRoot"),
        ("mainForm:uf", ""),
        ("javax.faces.ViewState", session.view_token()),
        ("mainForm:btnConsultar", "mainForm:btnConsultar"),
        ("mainForm:txtInscricao1", cnpj.as_str()),
    ]
}

/// Classify a submission response.
///
/// Fails only when the feedback region is missing, or when a compliance
/// verdict lacks the two value fields. Any other feedback text yields
/// [`QueryOutcome::UnclassifiedMessage`].
pub fn classify_response(html: &str) -> LookupResult<QueryOutcome> {
    let document = Html::parse_document(html);

    let feedback = select_first(&document, FEEDBACK_SELECTOR)
        .map(normalized_text)
        .ok_or_else(|| LookupError::ResponseParse("feedback region not found".into()))?;

    if feedback.contains(COMPLIANT_MARKER) {
        let (company_id, company_name) = company_fields(&document)?;
        Ok(QueryOutcome::Compliant {
            company_id,
            company_name,
        })
    } else if feedback.contains(NON_COMPLIANT_MARKER) {
        let (company_id, company_name) = company_fields(&document)?;
        Ok(QueryOutcome::NonCompliant {
            company_id,
            company_name,
        })
    } else if feedback.contains(INVALID_CAPTCHA_MARKER) {
        Ok(QueryOutcome::InvalidCaptcha)
    } else if feedback.contains(NOT_FOUND_MARKER) {
        Ok(QueryOutcome::SubjectNotFound)
    } else {
        Ok(QueryOutcome::UnclassifiedMessage { raw_text: feedback })
    }
}

fn company_fields(document: &Html) -> LookupResult<(String, String)> {
    let mut values = select_all(document, VALUE_SELECTOR).into_iter().map(normalized_text);
    match (values.next(), values.next()) {
        (Some(id), Some(name)) => Ok((id, name)),
        _ => Err(LookupError::ResponseParse(
            "verdict without identifier and name fields".into(),
        )),
    }
}

/// Posts the lookup form within an acquired session.
pub struct QuerySubmitter<'a> {
    http: &'a HttpSession,
    site: &'a SiteConfig,
}

impl<'a> QuerySubmitter<'a> {
    pub fn new(http: &'a HttpSession, site: &'a SiteConfig) -> Self {
        Self { http, site }
    }

    pub async fn submit(
        &self,
        cnpj: &Cnpj,
        session: &SessionContext,
        captcha_text: &str,
    ) -> LookupResult<QueryOutcome> {
        let fields = form_fields(cnpj, session, captcha_text);
        let cookie = session.cookie_header();

        let body = self
            .http
            .post_form(
                &self.site.form_url,
                &fields,
                cookie.as_deref(),
                self.site.submit_timeout,
            )
            .await?;

        let outcome = classify_response(&body)?;
        tracing::info!(cnpj = %cnpj, outcome = outcome.kind(), "Query classified");
        Ok(outcome)
    }
}
