use crate::backend_client::BackendClient;
use crate::eligibility::{annotate, AnnotatedResult, DebtCheckResult};
use crate::errors::{AppError, QuotaScope};
use crate::records::ClientRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A record paired with its classified debt status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckedAccount {
    pub record: ClientRecord,
    pub check: AnnotatedResult,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtCheckReport {
    pub aptos: Vec<CheckedAccount>,
    pub no_aptos: Vec<CheckedAccount>,
    /// Accounts the backend could not check. Reported, never dropped.
    pub errores: Vec<CheckedAccount>,
}

impl DebtCheckReport {
    pub fn total(&self) -> usize {
        self.aptos.len() + self.no_aptos.len() + self.errores.len()
    }
}

/// Splits debt-check results into APTOS, NO APTOS and per-account errors.
///
/// Accounts absent from `results` are reported as errors.
pub fn build_report(records: &[ClientRecord], results: Vec<DebtCheckResult>) -> DebtCheckReport {
    let mut by_uf: HashMap<u64, DebtCheckResult> =
        results.into_iter().map(|r| (r.uf, r)).collect();
    let mut report = DebtCheckReport::default();

    for record in records {
        let result = by_uf.remove(&record.uf).unwrap_or_else(|| DebtCheckResult {
            uf: record.uf,
            comprobantes_vencidos: 0,
            total_deuda: None,
            has_payment_plan: None,
            barrio: None,
            error: Some("Sin respuesta del servicio de deudas".to_string()),
        });

        let check = annotate(result);
        let account = CheckedAccount {
            record: record.clone(),
            check,
        };

        if account.check.result.error.is_some() {
            report.errores.push(account);
        } else if account.check.puede_generar_comprobante {
            report.aptos.push(account);
        } else {
            report.no_aptos.push(account);
        }
    }

    if !by_uf.is_empty() {
        tracing::warn!(
            "Debt check returned {} result(s) for UFs that were not requested",
            by_uf.len()
        );
    }

    report
}

/// Runs the debt check for a batch of records.
///
/// Refuses to start while the PYSE limit is blocking so the hourly quota is not wasted on a
/// batch that would fail halfway.
pub async fn check_debts(
    client: &BackendClient,
    records: &[ClientRecord],
) -> Result<DebtCheckReport, AppError> {
    client.ensure_quota(QuotaScope::Pyse).await?;

    let ufs: Vec<u64> = records.iter().map(|r| r.uf).collect();
    let results = client.verify_payment_plans(&ufs).await?;
    let report = build_report(records, results);

    tracing::info!(
        "✓ Debt check complete: {} APTO, {} NO APTO, {} error(s)",
        report.aptos.len(),
        report.no_aptos.len(),
        report.errores.len()
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ImportSource;

    fn record(uf: u64) -> ClientRecord {
        ClientRecord {
            uf,
            titular: Some(format!("Titular {}", uf)),
            barrio: None,
            total_deuda: None,
            phones: vec![],
            source: ImportSource::Deudas,
        }
    }

    fn result(uf: u64, vencidos: u32, plan: bool) -> DebtCheckResult {
        DebtCheckResult {
            uf,
            comprobantes_vencidos: vencidos,
            total_deuda: Some(1000.0),
            has_payment_plan: Some(plan),
            barrio: None,
            error: None,
        }
    }

    #[test]
    fn test_build_report_splits_by_verdict() {
        let records = vec![record(1), record(2), record(3), record(4)];
        let mut failed = result(4, 0, false);
        failed.error = Some("PYSE timeout".to_string());
        let results = vec![result(1, 3, false), result(2, 5, true), failed];

        let report = build_report(&records, results);

        assert_eq!(report.aptos.len(), 1);
        assert_eq!(report.aptos[0].record.uf, 1);
        assert_eq!(report.no_aptos.len(), 1);
        assert_eq!(
            report.no_aptos[0].check.motivo.as_deref(),
            Some("tiene plan de pago")
        );
        // UF 3 missing from the response, UF 4 failed
        let error_ufs: Vec<u64> = report.errores.iter().map(|a| a.record.uf).collect();
        assert_eq!(error_ufs, vec![3, 4]);
        assert_eq!(report.total(), 4);
    }
}
