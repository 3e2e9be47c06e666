//! Client records imported from spreadsheets.
//!
//! Rows arrive as loosely typed JSON objects whose column names depend on where the
//! spreadsheet came from. They are validated here, once, into [`ClientRecord`].

use crate::errors::AppError;
use crate::phone::{cell_to_string, normalize_phone};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Origin of an imported spreadsheet. Each one uses its own column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportSource {
    /// Export of the PYSE billing system (`Cliente_01`, `tel_uni`, `tel_clien`).
    Pyse,
    /// Debt listing (`titular`, `te_titular`, `te_cliente`, `debt`).
    Deudas,
    /// Accounts typed by an operator (`titular`, `telefono`).
    Manual,
}

impl ImportSource {
    fn name_columns(self) -> &'static [&'static str] {
        match self {
            ImportSource::Pyse => &["Cliente_01", "titular"],
            ImportSource::Deudas | ImportSource::Manual => &["titular", "Cliente_01"],
        }
    }

    /// Phone columns in the order they are tried.
    fn phone_columns(self) -> &'static [&'static str] {
        match self {
            ImportSource::Pyse => &["tel_uni", "tel_clien"],
            ImportSource::Deudas => &["te_titular", "te_cliente", "tel_uni", "tel_clien"],
            ImportSource::Manual => &["telefono"],
        }
    }

    fn debt_columns(self) -> &'static [&'static str] {
        match self {
            ImportSource::Pyse => &["totalDeuda"],
            ImportSource::Deudas => &["debt", "totalDeuda"],
            ImportSource::Manual => &[],
        }
    }
}

/// A raw phone cell together with the column it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneCandidate {
    pub column: String,
    pub raw: String,
}

/// A validated client account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    /// Unidad funcional, unique within a batch.
    pub uf: u64,
    pub titular: Option<String>,
    pub barrio: Option<String>,
    pub total_deuda: Option<f64>,
    /// Phone cells in priority order. May be empty.
    pub phones: Vec<PhoneCandidate>,
    pub source: ImportSource,
}

impl ClientRecord {
    /// First in-record phone that survives normalization.
    pub fn first_valid_phone(&self) -> Option<String> {
        self.phones.iter().find_map(|c| normalize_phone(&c.raw))
    }
}

/// Why a single row was not imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    /// Zero-based row index in the submitted batch.
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub records: Vec<ClientRecord>,
    pub rejected: Vec<RowError>,
}

/// Validates a batch of spreadsheet rows.
///
/// Fails as a whole when the batch is oversized or no row carries the `unidad` column;
/// otherwise bad rows are reported individually and the rest are imported.
pub fn parse_rows(
    source: ImportSource,
    rows: &[Value],
    max_rows: usize,
) -> Result<ImportOutcome, AppError> {
    if rows.len() > max_rows {
        return Err(AppError::Validation(format!(
            "El archivo tiene {} filas, el máximo permitido es {}",
            rows.len(),
            max_rows
        )));
    }

    if !rows.is_empty()
        && !rows
            .iter()
            .any(|row| row.as_object().is_some_and(|o| o.contains_key("unidad")))
    {
        return Err(AppError::Validation(
            "Falta la columna requerida 'unidad'".to_string(),
        ));
    }

    let mut outcome = ImportOutcome::default();
    let mut seen = HashSet::new();

    for (idx, row) in rows.iter().enumerate() {
        let Some(fields) = row.as_object() else {
            outcome.rejected.push(RowError {
                row: idx,
                message: "La fila no es un objeto".to_string(),
            });
            continue;
        };

        match parse_row(source, fields) {
            Ok(record) => {
                if !seen.insert(record.uf) {
                    outcome.rejected.push(RowError {
                        row: idx,
                        message: format!("Unidad {} duplicada", record.uf),
                    });
                    continue;
                }
                outcome.records.push(record);
            }
            Err(message) => outcome.rejected.push(RowError { row: idx, message }),
        }
    }

    tracing::info!(
        "Imported {} {:?} row(s), rejected {}",
        outcome.records.len(),
        source,
        outcome.rejected.len()
    );

    Ok(outcome)
}

fn parse_row(source: ImportSource, fields: &Map<String, Value>) -> Result<ClientRecord, String> {
    let unidad = fields
        .get("unidad")
        .and_then(cell_to_string)
        .ok_or_else(|| "Falta 'unidad'".to_string())?;
    let uf: u64 = unidad
        .strip_suffix(".0")
        .unwrap_or(unidad.as_str())
        .parse()
        .map_err(|_| format!("'unidad' no es numérica: {}", unidad))?;

    let titular = first_text(fields, source.name_columns());
    let barrio = fields.get("barrio_inm").and_then(cell_to_string);
    let total_deuda = source
        .debt_columns()
        .iter()
        .find_map(|col| fields.get(*col).and_then(parse_amount));

    let phones = source
        .phone_columns()
        .iter()
        .filter_map(|col| {
            fields
                .get(*col)
                .and_then(cell_to_string)
                .map(|raw| PhoneCandidate {
                    column: col.to_string(),
                    raw,
                })
        })
        .collect();

    Ok(ClientRecord {
        uf,
        titular,
        barrio,
        total_deuda,
        phones,
        source,
    })
}

fn first_text(fields: &Map<String, Value>, columns: &[&str]) -> Option<String> {
    columns
        .iter()
        .find_map(|col| fields.get(*col).and_then(cell_to_string))
}

/// Parses amounts written either as numbers or as Argentine-formatted text (`$ 1.234,50`).
fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.' || *c == '-')
                .collect();
            if cleaned.is_empty() {
                return None;
            }
            let normalized = if cleaned.contains(',') {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned
            };
            normalized.parse().ok()
        }
        _ => None,
    }
}
