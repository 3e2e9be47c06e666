// Thin namespace wrapper for API-layer components
pub mod handlers {
    pub use crate::handlers::*;
}

use crate::handlers::{self as h, AppState};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

/// Largest accepted request body. Spreadsheets converted to JSON can be large.
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// All API routes with their body size limits. Rate limiting is added by the server.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/phones/normalize", post(h::normalize_phones))
        .route("/api/v1/eligibility/classify", post(h::classify_results))
        .route("/api/v1/records/import", post(h::import_records))
        .route("/api/v1/whatsapp/verify", post(h::verify_whatsapp))
        .route("/api/v1/debts/check", post(h::check_debt))
        .route("/api/v1/limits", get(h::limits))
        .route("/api/v1/wizard/:flow", post(h::wizard_start))
        .route(
            "/api/v1/wizard/:flow/:session",
            get(h::wizard_resume).delete(h::wizard_reset),
        )
        .route("/api/v1/wizard/:flow/:session/upload", post(h::wizard_upload))
        .route("/api/v1/wizard/:flow/:session/select", post(h::wizard_select))
        .route("/api/v1/wizard/:flow/:session/verify", post(h::wizard_verify))
        .route("/api/v1/wizard/:flow/:session/send", post(h::wizard_send))
        .route("/api/v1/wizard/:flow/:session/back", post(h::wizard_back))
        .route(
            "/api/v1/wizard/:flow/:session/report/:kind",
            get(h::wizard_report),
        )
        // axum's extractors stop at 2 MB unless told otherwise
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
}
