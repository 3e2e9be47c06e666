use crate::circuit_breaker::{create_backend_circuit_breaker, BackendCircuitBreaker};
use crate::config::Config;
use crate::eligibility::DebtCheckResult;
use crate::errors::{AppError, QuotaScope};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

/// WhatsApp availability of one phone, as returned by `/api/wa/verify/bulk`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneVerification {
    pub phone: String,
    pub is_whats_app: bool,
}

#[derive(Debug, Deserialize)]
struct BulkVerifyResponse {
    #[serde(default)]
    results: Vec<PhoneVerification>,
}

#[derive(Debug, Deserialize)]
struct PaymentPlansResponse {
    #[serde(default)]
    results: Vec<DebtCheckResult>,
}

/// One WhatsApp debt notice handed to the backend's send queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtNotice {
    pub uf: u64,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub titular: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_deuda: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub queued: usize,
}

/// State of one external limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitStatus {
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub remaining: Option<u64>,
    #[serde(default)]
    pub resets_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
}

/// External limits the backend enforces on PYSE queries and WhatsApp sends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendLimits {
    #[serde(default)]
    pub pyse: LimitStatus,
    #[serde(default)]
    pub whatsapp: LimitStatus,
}

impl BackendLimits {
    /// Fails with `QuotaExceeded` when the limit for `scope` is currently blocking.
    pub fn ensure_available(&self, scope: QuotaScope) -> Result<(), AppError> {
        let status = match scope {
            QuotaScope::Pyse => &self.pyse,
            QuotaScope::WhatsApp => &self.whatsapp,
        };
        if status.blocked {
            return Err(AppError::QuotaExceeded {
                scope,
                message: status
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("Límite de {} alcanzado", scope)),
                resets_at: status.resets_at,
            });
        }
        Ok(())
    }
}

/// Client for the AQUA backend service.
///
/// Every call is a single attempt with the configured (long) timeout. Failures are surfaced
/// to the caller as-is; the circuit breaker only short-circuits while the backend keeps failing.
#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    phone_lookup_batch_size: usize,
    breaker: BackendCircuitBreaker,
}

impl BackendClient {
    /// Creates a new `BackendClient` from configuration.
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(config.backend_timeout())
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create backend client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            token: config.backend_token.clone(),
            phone_lookup_batch_size: config.phone_lookup_batch_size.max(1),
            breaker: create_backend_circuit_breaker(),
        })
    }

    /// Checks which phones have a WhatsApp account.
    ///
    /// # Arguments
    ///
    /// * `phones` - Canonical phones, already deduplicated by the caller.
    pub async fn verify_whatsapp_bulk(
        &self,
        phones: &[String],
    ) -> Result<Vec<PhoneVerification>, AppError> {
        if phones.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!("Verifying {} phone(s) against WhatsApp", phones.len());

        let response: BulkVerifyResponse = self
            .post_json(
                "/api/wa/verify/bulk",
                &json!({ "phones": phones }),
                QuotaScope::WhatsApp,
            )
            .await?;

        tracing::info!(
            "✓ WhatsApp verification returned {} result(s)",
            response.results.len()
        );
        Ok(response.results)
    }

    /// Looks up the phones stored in the client database for a set of UFs.
    ///
    /// Requests are chunked; UFs the database has no phone for are absent from the map.
    pub async fn phones_by_ufs(&self, ufs: &[u64]) -> Result<HashMap<u64, String>, AppError> {
        let mut phones = HashMap::new();

        for (idx, chunk) in ufs.chunks(self.phone_lookup_batch_size).enumerate() {
            tracing::debug!("Fetching phones for UF chunk {} ({} UFs)", idx + 1, chunk.len());

            let response: HashMap<String, Value> = self
                .post_json(
                    "/clients/phones/by-ufs",
                    &json!({ "ufs": chunk }),
                    QuotaScope::Pyse,
                )
                .await?;

            for (key, value) in response {
                let Ok(uf) = key.trim().parse::<u64>() else {
                    tracing::warn!("Ignoring non-numeric UF key in phone lookup: {}", key);
                    continue;
                };
                if let Some(phone) = crate::phone::cell_to_string(&value) {
                    phones.insert(uf, phone);
                }
            }
        }

        tracing::info!(
            "Client database returned phones for {}/{} UF(s)",
            phones.len(),
            ufs.len()
        );
        Ok(phones)
    }

    /// Asks the backend for overdue invoices and payment plans of each UF.
    pub async fn verify_payment_plans(
        &self,
        ufs: &[u64],
    ) -> Result<Vec<DebtCheckResult>, AppError> {
        if ufs.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!("Checking debt status for {} UF(s)", ufs.len());

        let response: PaymentPlansResponse = self
            .post_json(
                "/api/process/verify-payment-plans",
                &json!({ "ufs": ufs }),
                QuotaScope::Pyse,
            )
            .await?;

        Ok(response.results)
    }

    /// Queues WhatsApp debt notices on the backend.
    pub async fn send_debt_notices(&self, notices: &[DebtNotice]) -> Result<SendReceipt, AppError> {
        tracing::info!("Queueing {} debt notice(s)", notices.len());

        let receipt: SendReceipt = self
            .post_json(
                "/api/wa/send/debt-notices",
                &json!({ "recipients": notices }),
                QuotaScope::WhatsApp,
            )
            .await?;

        tracing::info!(
            "✓ Backend queued {} notice(s), job {:?}",
            receipt.queued,
            receipt.job_id
        );
        Ok(receipt)
    }

    /// Current PYSE and WhatsApp limits.
    pub async fn fetch_limits(&self) -> Result<BackendLimits, AppError> {
        self.guard()?;
        let url = format!("{}/api/process/limits", self.base_url);

        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.read_json(response, QuotaScope::Pyse).await
    }

    /// Fails with `QuotaExceeded` when the backend reports `scope` as blocked.
    ///
    /// A backend that does not serve the limits endpoint, or cannot answer it, leaves the
    /// limits unknown and the caller goes ahead; a real quota hit still comes back as a 429.
    pub async fn ensure_quota(&self, scope: QuotaScope) -> Result<(), AppError> {
        match self.fetch_limits().await {
            Ok(limits) => limits.ensure_available(scope),
            Err(AppError::QuotaExceeded {
                message, resets_at, ..
            }) => Err(AppError::QuotaExceeded {
                scope,
                message,
                resets_at,
            }),
            Err(e @ AppError::BackendUnavailable(_)) => Err(e),
            Err(e) => {
                tracing::warn!("Limits unknown, skipping {} quota check: {}", scope, e);
                Ok(())
            }
        }
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
        scope: QuotaScope,
    ) -> Result<T, AppError> {
        self.guard()?;
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .authorized(self.client.post(&url))
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        self.read_json(response, scope).await
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token {
            Some(ref token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }

    fn guard(&self) -> Result<(), AppError> {
        if !self.breaker.is_call_permitted() {
            return Err(AppError::BackendUnavailable(
                "El servicio no responde, reintente en unos minutos".to_string(),
            ));
        }
        Ok(())
    }

    fn transport_error(&self, e: reqwest::Error) -> AppError {
        self.breaker.on_error();
        tracing::error!("Backend request failed: {}", e);
        AppError::ExternalApiError(format!("Backend request failed: {}", e))
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        scope: QuotaScope,
    ) -> Result<T, AppError> {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            // The backend is healthy, it is the external quota that ran out
            self.breaker.on_success();
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(AppError::QuotaExceeded {
                scope,
                message: body
                    .get("error")
                    .or_else(|| body.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("Límite externo alcanzado")
                    .to_string(),
                resets_at: body
                    .get("resetsAt")
                    .and_then(|r| serde_json::from_value(r.clone()).ok()),
            });
        }

        if !status.is_success() {
            if status.is_server_error() {
                self.breaker.on_error();
            } else {
                self.breaker.on_success();
            }
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Backend returned {}: {}",
                status, error_text
            )));
        }

        self.breaker.on_success();
        response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse backend response: {}", e))
        })
    }
}
