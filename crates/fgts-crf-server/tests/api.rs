//! Router tests driven in-process, with the form site and captcha service mocked.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fgts_crf::{CaptchaConfig, LookupConfig, SiteConfig};
use fgts_crf_server::{router, AppState};

const FORM_PATH: &str = "/consultacrf/pages/consultaEmpregador.jsf";

const FORM_PAGE: &str = r#"<html><body>
<div class="captcha-imagem"><img src="data:image/png;base64,iVBORw0KGgo=" /></div>
<input type="hidden" name="javax.faces.ViewState" value="j_id3" />
</body></html>"#;

// ─────────────────────── helpers ───────────────────────

fn app_for(site: &str, captcha: &str) -> Router {
    app_polling(site, captcha, Duration::from_millis(5), 3)
}

fn app_polling(site: &str, captcha: &str, interval: Duration, max_attempts: u32) -> Router {
    let mut captcha_cfg = CaptchaConfig::with_base_url("test-key", captcha);
    captcha_cfg.poll_interval = interval;
    captcha_cfg.max_attempts = max_attempts;
    let config = LookupConfig {
        site: SiteConfig::with_form_url(format!("{site}{FORM_PATH}")),
        captcha: captcha_cfg,
        deadline: None,
    };
    router(Arc::new(AppState::new(config)))
}

/// App whose upstreams are never reached by the request under test.
fn offline_app() -> Router {
    app_for("http://127.0.0.1:9", "http://127.0.0.1:9")
}

async fn poll_count(captcha: &MockServer) -> usize {
    captcha
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/res.php")
        .count()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn consulta(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/fgts/consulta")
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

async fn mock_upstreams(feedback: &str, values: &[&str]) -> (MockServer, MockServer) {
    let site = MockServer::start().await;
    let captcha = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(FORM_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(FORM_PAGE)
                .append_header("set-cookie", "JSESSIONID=s1; Path=/"),
        )
        .mount(&site)
        .await;

    let values: String = values
        .iter()
        .map(|v| format!("<span class=\"valor\">{v}</span>"))
        .collect();
    Mock::given(method("POST"))
        .and(path(FORM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<div class=\"feedback\">{feedback}</div>{values}"
        )))
        .mount(&site)
        .await;

    Mock::given(method("POST"))
        .and(path("/in.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 1, "request": "77"})))
        .mount(&captcha)
        .await;
    Mock::given(method("GET"))
        .and(path("/res.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 1, "request": "q1w2"})))
        .mount(&captcha)
        .await;

    (site, captcha)
}

// ═══════════════════════════════════════════════════════
// STATIC ROUTES
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn test_root_welcomes() {
    let (status, body) = send(offline_app(), get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Bem-vindo à API de Consulta FGTS"));
}

#[tokio::test]
async fn test_status_is_liveness_only() {
    let (status, body) = send(offline_app(), get("/api/v1/fgts/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "sucesso"}));
}

// ═══════════════════════════════════════════════════════
// VALIDATION
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn test_invalid_cnpj_is_422() {
    for raw in ["123", "12.345.678/0001-90", "1234567800019a", ""] {
        let (status, body) = send(offline_app(), consulta(json!({"cnpj": raw}).to_string())).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "cnpj {raw:?}");
        assert_eq!(body["detail"], "CNPJ deve conter 14 dígitos numéricos.");
    }
}

#[tokio::test]
async fn test_malformed_body_is_422() {
    for raw in ["not json", "{}", r#"{"cnpj": 12345678000190}"#] {
        let (status, body) = send(offline_app(), consulta(raw.to_string())).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "body {raw:?}");
        assert_eq!(body["detail"], "CNPJ deve conter 14 dígitos numéricos.");
    }
}

// ═══════════════════════════════════════════════════════
// LOOKUPS
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn test_compliant_lookup_is_200() {
    let (site, captcha) = mock_upstreams(
        "A empresa abaixo identificada está REGULAR perante o FGTS",
        &["12.345.678/0001-90", "ACME COMERCIO LTDA"],
    )
    .await;
    let app = app_for(&site.uri(), &captcha.uri());

    let (status, body) = send(app, consulta(json!({"cnpj": "12345678000190"}).to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "cnpj": "12.345.678/0001-90",
            "razao_social": "ACME COMERCIO LTDA",
            "resultado": "A empresa informada está REGULAR perante o FGTS.",
            "situacao": "compliant",
        })
    );
}

#[tokio::test]
async fn test_invalid_captcha_is_200_without_company() {
    let (site, captcha) = mock_upstreams("Código Captcha Inválido", &[]).await;
    let app = app_for(&site.uri(), &captcha.uri());

    let (status, body) = send(app, consulta(json!({"cnpj": "12345678000190"}).to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cnpj"], Value::Null);
    assert_eq!(body["razao_social"], Value::Null);
    assert_eq!(body["resultado"], "Captcha inválido. Tente novamente.");
    assert_eq!(body["situacao"], "invalid_captcha");
}

#[tokio::test]
async fn test_site_failure_is_503() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FORM_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&site)
        .await;
    let app = app_for(&site.uri(), "http://127.0.0.1:9");

    let (status, body) = send(app, consulta(json!({"cnpj": "12345678000190"}).to_string())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.starts_with("Erro no serviço de consulta: session:"), "{detail}");
}

#[tokio::test]
async fn test_unsolved_captcha_is_503() {
    let site = MockServer::start().await;
    let captcha = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FORM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(FORM_PAGE))
        .mount(&site)
        .await;
    Mock::given(method("POST"))
        .and(path("/in.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 1, "request": "9"})))
        .mount(&captcha)
        .await;
    Mock::given(method("GET"))
        .and(path("/res.php"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": 0, "request": "CAPCHA_NOT_READY"})),
        )
        .expect(3)
        .mount(&captcha)
        .await;
    let app = app_for(&site.uri(), &captcha.uri());

    let (status, body) = send(app, consulta(json!({"cnpj": "12345678000190"}).to_string())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body["detail"],
        "Erro no serviço de consulta: captcha: captcha not solved after 3 polls"
    );
}

// ═══════════════════════════════════════════════════════
// CANCELLATION
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn test_dropped_request_stops_the_lookup() {
    let site = MockServer::start().await;
    let captcha = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FORM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(FORM_PAGE))
        .mount(&site)
        .await;
    Mock::given(method("POST"))
        .and(path("/in.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 1, "request": "5"})))
        .mount(&captcha)
        .await;
    Mock::given(method("GET"))
        .and(path("/res.php"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": 0, "request": "CAPCHA_NOT_READY"})),
        )
        .mount(&captcha)
        .await;
    let app = app_polling(&site.uri(), &captcha.uri(), Duration::from_millis(100), 15);

    let request = consulta(json!({"cnpj": "12345678000190"}).to_string());
    let dropped = tokio::time::timeout(Duration::from_millis(350), app.oneshot(request)).await;
    assert!(dropped.is_err(), "lookup should still be polling");

    // Let an in-flight poll land before taking the baseline.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let polls_at_drop = poll_count(&captcha).await;
    assert!(polls_at_drop >= 1);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(poll_count(&captcha).await, polls_at_drop);
}
