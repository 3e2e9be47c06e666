use crate::debt_check::{CheckedAccount, DebtCheckReport};
use crate::errors::AppError;
use crate::phone::format_international;
use crate::verification::{PhoneSource, VerificationReport, WhatsAppStatus};
use csv::{QuoteStyle, WriterBuilder};
use serde::Deserialize;
use std::str::FromStr;

pub const APTOS_HEADERS: [&str; 6] = [
    "UF",
    "Titular",
    "Barrio",
    "Comprobantes Vencidos",
    "Total Deuda",
    "Telefono",
];

pub const NO_APTOS_HEADERS: [&str; 6] = [
    "UF",
    "Titular",
    "Barrio",
    "Comprobantes Vencidos",
    "Total Deuda",
    "Motivo",
];

pub const RELEVAMIENTO_HEADERS: [&str; 6] = [
    "UF",
    "Titular",
    "Barrio",
    "Telefono",
    "Origen Telefono",
    "WhatsApp",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Aptos,
    NoAptos,
    Relevamiento,
}

impl FromStr for ReportKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches(".csv") {
            "aptos" => Ok(ReportKind::Aptos),
            "no_aptos" => Ok(ReportKind::NoAptos),
            "relevamiento" => Ok(ReportKind::Relevamiento),
            other => Err(AppError::NotFound(format!("Unknown report '{}'", other))),
        }
    }
}

fn amount(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

fn display_phone(phone: &str) -> String {
    format_international(phone).unwrap_or_else(|| phone.to_string())
}

fn write_rows(headers: &[&str], rows: Vec<Vec<String>>) -> Result<Vec<u8>, AppError> {
    let mut wtr = WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .from_writer(Vec::new());

    let to_err = |e: csv::Error| AppError::InternalError(format!("CSV write failed: {}", e));
    wtr.write_record(headers).map_err(to_err)?;
    for row in rows {
        wtr.write_record(&row).map_err(to_err)?;
    }
    wtr.into_inner()
        .map_err(|e| AppError::InternalError(format!("CSV flush failed: {}", e)))
}

fn debt_row(account: &CheckedAccount, last: String) -> Vec<String> {
    vec![
        account.record.uf.to_string(),
        account.record.titular.clone().unwrap_or_default(),
        account
            .check
            .result
            .barrio
            .clone()
            .or_else(|| account.record.barrio.clone())
            .unwrap_or_default(),
        account.check.result.comprobantes_vencidos.to_string(),
        amount(
            account
                .check
                .result
                .total_deuda
                .or(account.record.total_deuda),
        ),
        last,
    ]
}

/// APTOS export: accounts eligible for a collections action.
pub fn aptos_csv(report: &DebtCheckReport) -> Result<Vec<u8>, AppError> {
    let rows = report
        .aptos
        .iter()
        .map(|a| {
            let phone = a
                .record
                .first_valid_phone()
                .map(|p| display_phone(&p))
                .unwrap_or_default();
            debt_row(a, phone)
        })
        .collect();
    write_rows(&APTOS_HEADERS, rows)
}

/// NO APTOS export, including accounts the debt check could not resolve.
pub fn no_aptos_csv(report: &DebtCheckReport) -> Result<Vec<u8>, AppError> {
    let rows = report
        .no_aptos
        .iter()
        .chain(report.errores.iter())
        .map(|a| debt_row(a, a.check.motivo.clone().unwrap_or_default()))
        .collect();
    write_rows(&NO_APTOS_HEADERS, rows)
}

/// Relevamiento export: every record with its phone and WhatsApp status.
pub fn relevamiento_csv(report: &VerificationReport) -> Result<Vec<u8>, AppError> {
    let rows = report
        .merged()
        .into_iter()
        .map(|v| {
            vec![
                v.record.uf.to_string(),
                v.record.titular.clone().unwrap_or_default(),
                v.record.barrio.clone().unwrap_or_default(),
                v.phone.as_deref().map(display_phone).unwrap_or_default(),
                match v.phone_source {
                    Some(PhoneSource::Database) => "Base de clientes",
                    Some(PhoneSource::Record) => "Archivo",
                    None => "",
                }
                .to_string(),
                match v.status {
                    WhatsAppStatus::Available => "SI",
                    WhatsAppStatus::NotAvailable => "NO",
                    WhatsAppStatus::Unconfirmed => "SIN CONFIRMAR",
                    WhatsAppStatus::NoPhone => "SIN TELEFONO",
                }
                .to_string(),
            ]
        })
        .collect();
    write_rows(&RELEVAMIENTO_HEADERS, rows)
}
