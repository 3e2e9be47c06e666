use crate::backend_client::{BackendClient, BackendLimits, DebtNotice};
use crate::config::Config;
use crate::debt_check::{check_debts, DebtCheckReport};
use crate::eligibility::{annotate, AnnotatedResult, DebtCheckResult};
use crate::errors::{AppError, QuotaScope};
use crate::phone::normalize_phone_value;
use crate::records::{parse_rows, ImportOutcome, ImportSource};
use crate::reports::{aptos_csv, no_aptos_csv, relevamiento_csv, ReportKind};
use crate::verification::{verify_batch, VerificationReport};
use crate::wizard::{WizardFlow, WizardMachine, WizardState, WizardStep};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Client for the AQUA backend.
    pub backend: BackendClient,
    /// Wizard sessions.
    pub wizard: WizardMachine,
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "aqua-ops-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

#[derive(Debug, Deserialize)]
pub struct NormalizeRequest {
    pub values: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct NormalizedPhone {
    pub raw: Value,
    pub normalized: Option<String>,
}

/// POST /api/v1/phones/normalize
pub async fn normalize_phones(Json(body): Json<NormalizeRequest>) -> Json<Vec<NormalizedPhone>> {
    let results = body
        .values
        .into_iter()
        .map(|raw| NormalizedPhone {
            normalized: normalize_phone_value(&raw),
            raw,
        })
        .collect();
    Json(results)
}

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub results: Vec<DebtCheckResult>,
}

/// POST /api/v1/eligibility/classify
pub async fn classify_results(Json(body): Json<ClassifyRequest>) -> Json<Vec<AnnotatedResult>> {
    Json(body.results.into_iter().map(annotate).collect())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub source: ImportSource,
    pub rows: Vec<Value>,
    #[serde(default)]
    pub file_name: Option<String>,
}

/// POST /api/v1/records/import
///
/// Validates rows without starting a wizard session.
pub async fn import_records(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ImportRequest>,
) -> Result<Json<ImportOutcome>, AppError> {
    let outcome = parse_rows(body.source, &body.rows, state.config.max_import_rows)?;
    Ok(Json(outcome))
}

/// POST /api/v1/whatsapp/verify
pub async fn verify_whatsapp(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ImportRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = parse_rows(body.source, &body.rows, state.config.max_import_rows)?;
    let report = verify_batch(&state.backend, &outcome.records).await?;
    Ok(Json(json!({
        "report": report,
        "rejected": outcome.rejected,
    })))
}

/// POST /api/v1/debts/check
pub async fn check_debt(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ImportRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = parse_rows(body.source, &body.rows, state.config.max_import_rows)?;
    let report = check_debts(&state.backend, &outcome.records).await?;
    Ok(Json(json!({
        "report": report,
        "rejected": outcome.rejected,
    })))
}

/// GET /api/v1/limits
pub async fn limits(State(state): State<Arc<AppState>>) -> Result<Json<BackendLimits>, AppError> {
    Ok(Json(state.backend.fetch_limits().await?))
}

// ============ Wizard ============

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardView {
    pub step: WizardStep,
    #[serde(flatten)]
    pub state: WizardState,
}

impl From<WizardState> for WizardView {
    fn from(state: WizardState) -> Self {
        Self {
            step: state.current_step(),
            state,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub wizard: WizardView,
    pub rejected: Vec<crate::records::RowError>,
}

#[derive(Debug, Serialize)]
pub struct SessionCreated {
    pub session: String,
    pub wizard: WizardView,
}

/// POST /api/v1/wizard/:flow
///
/// Opens a new session id. Nothing is persisted until the first upload.
pub async fn wizard_start(Path(flow): Path<String>) -> Result<Json<SessionCreated>, AppError> {
    let flow: WizardFlow = flow.parse()?;
    let session = Uuid::new_v4().to_string();
    tracing::info!("Opened wizard session {}:{}", flow, session);
    Ok(Json(SessionCreated {
        session,
        wizard: WizardState::new(flow).into(),
    }))
}

/// GET /api/v1/wizard/:flow/:session
pub async fn wizard_resume(
    State(state): State<Arc<AppState>>,
    Path((flow, session)): Path<(String, String)>,
) -> Result<Json<WizardView>, AppError> {
    let flow: WizardFlow = flow.parse()?;
    let wizard = state.wizard.resume(flow, &session).await?;
    Ok(Json(wizard.into()))
}

/// POST /api/v1/wizard/:flow/:session/upload
///
/// Loads the spreadsheet rows and moves past the Upload step.
pub async fn wizard_upload(
    State(state): State<Arc<AppState>>,
    Path((flow, session)): Path<(String, String)>,
    Json(body): Json<ImportRequest>,
) -> Result<Json<UploadResponse>, AppError> {
    let flow: WizardFlow = flow.parse()?;
    let outcome = parse_rows(body.source, &body.rows, state.config.max_import_rows)?;
    let records = outcome.records;

    let wizard = state
        .wizard
        .update(flow, &session, move |wizard, _| {
            wizard.load_records(records, body.file_name)?;
            wizard.advance()
        })
        .await?;

    tracing::info!(
        "Wizard {}:{} loaded {} record(s)",
        flow,
        session,
        wizard.raw_data.len()
    );

    Ok(Json(UploadResponse {
        wizard: wizard.into(),
        rejected: outcome.rejected,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct SelectRequest {
    #[serde(default)]
    pub ufs: Vec<u64>,
}

/// POST /api/v1/wizard/:flow/:session/select
pub async fn wizard_select(
    State(state): State<Arc<AppState>>,
    Path((flow, session)): Path<(String, String)>,
    Json(body): Json<SelectRequest>,
) -> Result<Json<WizardView>, AppError> {
    let flow: WizardFlow = flow.parse()?;
    let wizard = state
        .wizard
        .update(flow, &session, |wizard, _| {
            wizard.select_clients(&body.ufs)?;
            wizard.advance()
        })
        .await?;
    Ok(Json(wizard.into()))
}

/// POST /api/v1/wizard/:flow/:session/verify
///
/// Runs the flow's verification step against the backend, then advances. On backend failure
/// the session stays on the current step and the error is returned for a manual retry.
pub async fn wizard_verify(
    State(state): State<Arc<AppState>>,
    Path((flow, session)): Path<(String, String)>,
) -> Result<Json<WizardView>, AppError> {
    let flow: WizardFlow = flow.parse()?;
    let current = state.wizard.resume(flow, &session).await?;

    let wizard = match current.current_step() {
        WizardStep::Verify => {
            let report: VerificationReport =
                verify_batch(&state.backend, &current.raw_data).await?;
            state
                .wizard
                .commit(&session, current, move |wizard, _| {
                    wizard.apply_verification(report)?;
                    wizard.advance()
                })
                .await?
        }
        WizardStep::VerifyDebt => {
            let report: DebtCheckReport =
                check_debts(&state.backend, &current.filtered_data).await?;
            state
                .wizard
                .commit(&session, current, move |wizard, now| {
                    wizard.apply_debt_check(report, now)?;
                    wizard.advance()
                })
                .await?
        }
        other => {
            return Err(AppError::Validation(format!(
                "No verification to run on step {:?}",
                other
            )))
        }
    };

    Ok(Json(wizard.into()))
}

/// POST /api/v1/wizard/:flow/:session/send
pub async fn wizard_send(
    State(state): State<Arc<AppState>>,
    Path((flow, session)): Path<(String, String)>,
) -> Result<Json<WizardView>, AppError> {
    let flow: WizardFlow = flow.parse()?;
    let current = state.wizard.resume(flow, &session).await?;
    if current.current_step() != WizardStep::Send {
        return Err(AppError::Validation(format!(
            "Sending is only possible on the Send step, wizard is on {:?}",
            current.current_step()
        )));
    }

    state.backend.ensure_quota(QuotaScope::WhatsApp).await?;

    let notices: Vec<DebtNotice> = current
        .verification
        .as_ref()
        .map(|report| {
            report
                .available()
                .filter_map(|v| {
                    v.phone.clone().map(|phone| DebtNotice {
                        uf: v.record.uf,
                        phone,
                        titular: v.record.titular.clone(),
                        total_deuda: v.record.total_deuda,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    if notices.is_empty() {
        return Err(AppError::Validation(
            "Ningún cliente tiene WhatsApp disponible".to_string(),
        ));
    }

    let receipt = state.backend.send_debt_notices(&notices).await?;
    let wizard = state
        .wizard
        .commit(&session, current, move |wizard, now| {
            wizard.apply_send(receipt, now)?;
            wizard.advance()
        })
        .await?;

    Ok(Json(wizard.into()))
}

#[derive(Debug, Deserialize)]
pub struct BackRequest {
    pub target: usize,
}

/// POST /api/v1/wizard/:flow/:session/back
pub async fn wizard_back(
    State(state): State<Arc<AppState>>,
    Path((flow, session)): Path<(String, String)>,
    Json(body): Json<BackRequest>,
) -> Result<Json<WizardView>, AppError> {
    let flow: WizardFlow = flow.parse()?;
    let wizard = state
        .wizard
        .update(flow, &session, |wizard, _| wizard.go_back(body.target))
        .await?;
    Ok(Json(wizard.into()))
}

/// DELETE /api/v1/wizard/:flow/:session
pub async fn wizard_reset(
    State(state): State<Arc<AppState>>,
    Path((flow, session)): Path<(String, String)>,
) -> Result<Json<WizardView>, AppError> {
    let flow: WizardFlow = flow.parse()?;
    let wizard = state.wizard.reset(flow, &session).await?;
    Ok(Json(wizard.into()))
}

/// GET /api/v1/wizard/:flow/:session/report/:kind
pub async fn wizard_report(
    State(state): State<Arc<AppState>>,
    Path((flow, session, kind)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    let flow: WizardFlow = flow.parse()?;
    let kind: ReportKind = kind.parse()?;
    let wizard = state.wizard.resume(flow, &session).await?;

    let missing = || AppError::NotFound("El reporte todavía no fue generado".to_string());
    let (bytes, name) = match kind {
        ReportKind::Aptos => (
            aptos_csv(wizard.debt_report.as_ref().ok_or_else(missing)?)?,
            "aptos",
        ),
        ReportKind::NoAptos => (
            no_aptos_csv(wizard.debt_report.as_ref().ok_or_else(missing)?)?,
            "no_aptos",
        ),
        ReportKind::Relevamiento => (
            relevamiento_csv(wizard.verification.as_ref().ok_or_else(missing)?)?,
            "relevamiento",
        ),
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}_{}.csv\"", name, session),
            ),
        ],
        bytes,
    )
        .into_response())
}
