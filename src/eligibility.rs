use serde::{Deserialize, Serialize};

/// Minimum number of overdue invoices that makes an account actionable.
pub const MIN_OVERDUE_INVOICES: u32 = 3;

pub const MOTIVO_POCOS_COMPROBANTES: &str = "< 3 comprobantes";
pub const MOTIVO_PLAN_DE_PAGO: &str = "tiene plan de pago";

/// Debt status of one account as reported by the PYSE-backed debt check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtCheckResult {
    pub uf: u64,
    #[serde(default)]
    pub comprobantes_vencidos: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_deuda: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_payment_plan: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barrio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Apto,
    NoApto,
}

impl Verdict {
    pub fn label(self) -> &'static str {
        match self {
            Verdict::Apto => "APTO",
            Verdict::NoApto => "NO APTO",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motivo: Option<String>,
}

/// APTO iff the account has at least three overdue invoices and no active payment plan.
///
/// When both conditions fail the invoice count is the reported reason.
pub fn classify(result: &DebtCheckResult) -> Eligibility {
    if result.comprobantes_vencidos < MIN_OVERDUE_INVOICES {
        return Eligibility {
            verdict: Verdict::NoApto,
            motivo: Some(MOTIVO_POCOS_COMPROBANTES.to_string()),
        };
    }
    if result.has_payment_plan.unwrap_or(false) {
        return Eligibility {
            verdict: Verdict::NoApto,
            motivo: Some(MOTIVO_PLAN_DE_PAGO.to_string()),
        };
    }
    Eligibility {
        verdict: Verdict::Apto,
        motivo: None,
    }
}

/// A debt-check result annotated with the fields the UI derives from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedResult {
    #[serde(flatten)]
    pub result: DebtCheckResult,
    /// "APTO", "NO APTO" or "ERROR".
    pub estado_simple: String,
    pub puede_generar_comprobante: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motivo: Option<String>,
}

/// Derives the display fields. Results carrying an error are not classified.
pub fn annotate(result: DebtCheckResult) -> AnnotatedResult {
    if result.error.is_some() {
        return AnnotatedResult {
            motivo: result.error.clone(),
            result,
            estado_simple: "ERROR".to_string(),
            puede_generar_comprobante: false,
        };
    }

    let eligibility = classify(&result);
    AnnotatedResult {
        result,
        estado_simple: eligibility.verdict.label().to_string(),
        puede_generar_comprobante: eligibility.verdict == Verdict::Apto,
        motivo: eligibility.motivo,
    }
}
