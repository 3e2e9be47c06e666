/// Integration tests with a mocked AQUA backend
/// Tests verification, debt checks and the wizard without hitting real services
use aqua_ops_api::api::routes;
use aqua_ops_api::config::Config;
use aqua_ops_api::core::debt_check::check_debts;
use aqua_ops_api::core::errors::{AppError, QuotaScope};
use aqua_ops_api::core::records::{ClientRecord, ImportSource, PhoneCandidate};
use aqua_ops_api::core::verification::{verify_batch, PhoneSource, WhatsAppStatus};
use aqua_ops_api::core::wizard::{SystemClock, WizardMachine};
use aqua_ops_api::handlers::AppState;
use aqua_ops_api::integrations::backend_client::BackendClient;
use aqua_ops_api::integrations::wizard_store::MemoryWizardStore;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record(uf: u64, phone: Option<&str>) -> ClientRecord {
    ClientRecord {
        uf,
        titular: Some(format!("Cliente {}", uf)),
        barrio: Some("GENERAL PAZ".to_string()),
        total_deuda: Some(25_000.0),
        phones: phone
            .map(|raw| {
                vec![PhoneCandidate {
                    column: "tel_uni".to_string(),
                    raw: raw.to_string(),
                }]
            })
            .unwrap_or_default(),
        source: ImportSource::Pyse,
    }
}

fn client_for(server: &MockServer) -> BackendClient {
    BackendClient::new(&Config::for_backend(server.uri())).unwrap()
}

async fn mount_empty_phone_lookup(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/clients/phones/by-ufs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

async fn mount_open_limits(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/process/limits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pyse": {"blocked": false, "remaining": 500},
            "whatsapp": {"blocked": false, "remaining": 1000}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_bulk_verification_deduplicates_and_reports_phoneless() {
    let server = MockServer::start().await;
    mount_empty_phone_lookup(&server).await;

    let records = vec![
        record(1, Some("3511000001")),
        record(2, Some("3511000002")),
        record(3, Some("3511000003")),
        record(4, Some("3511000004")),
        record(5, Some("3511000005")),
        record(6, Some("3511000006")),
        record(7, Some("351-100-0001")), // same phone as UF 1
        record(8, None),
        record(9, Some("S/T")),
        record(10, Some("sin")),
    ];

    let expected_phones = vec![
        "+5493511000001",
        "+5493511000002",
        "+5493511000003",
        "+5493511000004",
        "+5493511000005",
        "+5493511000006",
    ];

    Mock::given(method("POST"))
        .and(path("/api/wa/verify/bulk"))
        .and(body_json(json!({ "phones": expected_phones })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"phone": "+5493511000001", "isWhatsApp": true},
                {"phone": "+5493511000002", "isWhatsApp": false},
                {"phone": "+5493511000003", "isWhatsApp": true},
                {"phone": "+5493511000004", "isWhatsApp": true},
                // backend answered without the plus sign
                {"phone": "5493511000005", "isWhatsApp": true}
                // nothing for ...006
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let report = verify_batch(&client_for(&server), &records).await.unwrap();

    assert_eq!(report.phones_checked, 6);
    assert_eq!(report.verified.len(), 7);
    assert_eq!(report.no_phone.len(), 3);
    assert_eq!(report.merged().len(), 10);
    assert!(report
        .no_phone
        .iter()
        .all(|v| v.status == WhatsAppStatus::NoPhone));

    let status_of = |uf: u64| {
        report
            .verified
            .iter()
            .find(|v| v.record.uf == uf)
            .map(|v| v.status)
            .unwrap()
    };
    assert_eq!(status_of(1), WhatsAppStatus::Available);
    assert_eq!(status_of(7), WhatsAppStatus::Available);
    assert_eq!(status_of(2), WhatsAppStatus::NotAvailable);
    assert_eq!(status_of(5), WhatsAppStatus::Available);
    assert_eq!(status_of(6), WhatsAppStatus::Unconfirmed);
}

#[tokio::test]
async fn test_database_phones_take_precedence_and_are_chunked() {
    let server = MockServer::start().await;

    // 250 UFs with a batch size of 100 means three lookups
    Mock::given(method("POST"))
        .and(path("/clients/phones/by-ufs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "1": "351 200 0001",
            "2": null
        })))
        .expect(3)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/wa/verify/bulk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"phone": "+5493512000001", "isWhatsApp": true}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let records: Vec<ClientRecord> = (1..=250)
        .map(|uf| record(uf, Some(format!("35190{:05}", uf).as_str())))
        .collect();

    let report = verify_batch(&client_for(&server), &records).await.unwrap();

    let first = report.verified.iter().find(|v| v.record.uf == 1).unwrap();
    assert_eq!(first.phone.as_deref(), Some("+5493512000001"));
    assert_eq!(first.phone_source, Some(PhoneSource::Database));
    assert_eq!(first.status, WhatsAppStatus::Available);

    let second = report.verified.iter().find(|v| v.record.uf == 2).unwrap();
    assert_eq!(second.phone_source, Some(PhoneSource::Record));
    assert_eq!(report.verified.len(), 250);
}

#[tokio::test]
async fn test_failed_phone_lookup_degrades_to_record_phones() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/clients/phones/by-ufs"))
        .respond_with(ResponseTemplate::new(500).set_body_string("db down"))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/wa/verify/bulk"))
        .and(body_json(json!({ "phones": ["+5493511000001"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"phone": "+5493511000001", "isWhatsApp": true}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let report = verify_batch(&client_for(&server), &[record(1, Some("3511000001"))])
        .await
        .unwrap();
    assert_eq!(report.verified[0].phone_source, Some(PhoneSource::Record));
}

#[tokio::test]
async fn test_verification_backend_error_fails_batch() {
    let server = MockServer::start().await;
    mount_empty_phone_lookup(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/wa/verify/bulk"))
        .respond_with(ResponseTemplate::new(500).set_body_string("session expired"))
        .mount(&server)
        .await;

    let result = verify_batch(&client_for(&server), &[record(1, Some("3511000001"))]).await;
    match result {
        Err(AppError::ExternalApiError(msg)) => assert!(msg.contains("session expired")),
        other => panic!("expected external API error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_whatsapp_quota_is_reported() {
    let server = MockServer::start().await;
    mount_empty_phone_lookup(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/wa/verify/bulk"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": "Cuota diaria de WhatsApp agotada",
            "resetsAt": "2026-03-03T00:00:00Z"
        })))
        .mount(&server)
        .await;

    let result = verify_batch(&client_for(&server), &[record(1, Some("3511000001"))]).await;
    match result {
        Err(AppError::QuotaExceeded {
            scope,
            message,
            resets_at,
        }) => {
            assert_eq!(scope, QuotaScope::WhatsApp);
            assert_eq!(message, "Cuota diaria de WhatsApp agotada");
            assert!(resets_at.is_some());
        }
        other => panic!("expected quota error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_debt_check_classifies_results() {
    let server = MockServer::start().await;
    mount_open_limits(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/process/verify-payment-plans"))
        .and(body_json(json!({ "ufs": [1, 2, 3] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"uf": 1, "comprobantesVencidos": 3, "hasPaymentPlan": false, "totalDeuda": 9000.0},
                {"uf": 2, "comprobantesVencidos": 6, "hasPaymentPlan": true},
                {"uf": 3, "comprobantesVencidos": 0, "error": "UF inexistente en PYSE"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let records = vec![record(1, None), record(2, None), record(3, None)];
    let report = check_debts(&client_for(&server), &records).await.unwrap();

    assert_eq!(report.aptos.len(), 1);
    assert_eq!(report.aptos[0].check.estado_simple, "APTO");
    assert_eq!(report.no_aptos.len(), 1);
    assert_eq!(
        report.no_aptos[0].check.motivo.as_deref(),
        Some("tiene plan de pago")
    );
    assert_eq!(report.errores.len(), 1);
    assert_eq!(
        report.errores[0].check.motivo.as_deref(),
        Some("UF inexistente en PYSE")
    );
}

#[tokio::test]
async fn test_debt_check_blocked_by_pyse_limit() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/process/limits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pyse": {
                "blocked": true,
                "remaining": 0,
                "resetsAt": "2026-03-02T10:00:00Z",
                "message": "Límite horario de consultas PYSE alcanzado"
            }
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/process/verify-payment-plans"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .expect(0)
        .mount(&server)
        .await;

    let result = check_debts(&client_for(&server), &[record(1, None)]).await;
    assert!(matches!(
        result,
        Err(AppError::QuotaExceeded {
            scope: QuotaScope::Pyse,
            ..
        })
    ));
}

// ============ HTTP wizard flow ============

fn app(server: &MockServer) -> axum::Router {
    let config = Config::for_backend(server.uri());
    let state = Arc::new(AppState {
        backend: BackendClient::new(&config).unwrap(),
        wizard: WizardMachine::new(
            Arc::new(MemoryWizardStore::default()),
            Arc::new(SystemClock),
            config.wizard_ttl(),
        ),
        config,
    });
    routes().with_state(state)
}

async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_wizard_stays_on_step_when_backend_fails_then_retries() {
    let server = MockServer::start().await;
    mount_empty_phone_lookup(&server).await;

    // First verification attempt fails, the retry succeeds
    Mock::given(method("POST"))
        .and(path("/api/wa/verify/bulk"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream timeout"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/wa/verify/bulk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"phone": "+5493511000001", "isWhatsApp": true}]
        })))
        .mount(&server)
        .await;

    let app = app(&server);
    let base = "/api/v1/wizard/debt_sending/sess-1";

    let (status, body) = call(
        &app,
        "POST",
        &format!("{}/upload", base),
        Some(json!({
            "source": "pyse",
            "fileName": "febrero.xlsx",
            "rows": [
                {"unidad": "1", "Cliente_01": "PEREZ", "tel_uni": "3511000001"},
                {"unidad": "2", "Cliente_01": "GOMEZ", "tel_uni": "S/T"}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["wizard"]["step"], "verify");
    assert_eq!(body["wizard"]["activeStep"], 1);

    let (status, _) = call(&app, "POST", &format!("{}/verify", base), None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (_, body) = call(&app, "GET", base, None).await;
    assert_eq!(body["activeStep"], 1);

    let (status, body) = call(&app, "POST", &format!("{}/verify", base), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"], "send");
    assert_eq!(body["filteredData"].as_array().unwrap().len(), 1);

    let (status, body) = call(
        &app,
        "POST",
        &format!("{}/back", base),
        Some(json!({"target": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["activeStep"], 0);
    assert_eq!(body["rawData"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_wizard_send_and_relevamiento_report() {
    let server = MockServer::start().await;
    mount_empty_phone_lookup(&server).await;
    mount_open_limits(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/wa/verify/bulk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"phone": "+5493511000001", "isWhatsApp": true}]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/wa/send/debt-notices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobId": "job-42",
            "queued": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = app(&server);
    let base = "/api/v1/wizard/debt_sending/sess-2";

    call(
        &app,
        "POST",
        &format!("{}/upload", base),
        Some(json!({
            "source": "pyse",
            "rows": [{"unidad": 1, "Cliente_01": "PEREZ", "tel_uni": "3511000001"}]
        })),
    )
    .await;
    let (status, _) = call(&app, "POST", &format!("{}/verify", base), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "POST", &format!("{}/send", base), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"], "download");
    assert_eq!(body["sendReceipt"]["jobId"], "job-42");

    let request = Request::builder()
        .uri(format!("{}/report/relevamiento.csv", base))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let csv = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(csv.starts_with("UF,Titular,Barrio,Telefono,Origen Telefono,WhatsApp"));
    assert!(csv.lines().nth(1).unwrap().ends_with(",Archivo,SI"));
}

#[tokio::test]
async fn test_unknown_flow_is_not_found() {
    let server = MockServer::start().await;
    let (status, _) = call(&app(&server), "GET", "/api/v1/wizard/other/sess", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_debt_check_runs_when_backend_has_no_limits_endpoint() {
    let server = MockServer::start().await;

    // Only the payment plan endpoint exists, limits answer 404
    Mock::given(method("POST"))
        .and(path("/api/process/verify-payment-plans"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"uf": 1, "comprobantesVencidos": 4, "hasPaymentPlan": false}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let report = check_debts(&client_for(&server), &[record(1, None)])
        .await
        .unwrap();
    assert_eq!(report.aptos.len(), 1);
    assert!(report.errores.is_empty());
}

#[tokio::test]
async fn test_large_spreadsheet_bodies_are_accepted() {
    let server = MockServer::start().await;
    let app = app(&server);

    // Well past axum's 2 MB default, well under the 25 MB cap
    let values: Vec<Value> = (0..200_000).map(|_| json!("351 123 4567")).collect();
    let body = json!({ "values": values });
    assert!(body.to_string().len() > 2 * 1024 * 1024);

    let (status, response) = call(&app, "POST", "/api/v1/phones/normalize", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    let results = response.as_array().unwrap();
    assert_eq!(results.len(), 200_000);
    assert_eq!(results[0]["normalized"], "+5493511234567");
}
