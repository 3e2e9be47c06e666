//! Phone normalization for WhatsApp delivery.
//!
//! Turns the raw phone cells found in client spreadsheets (separators, missing country or
//! area codes, placeholder junk) into a canonical `+54<national>` string, or rejects them.
//!
//! Two historical policies existed for this: a length-branch table keyed on 10/12/13 digit
//! inputs, and the placeholder/area-code-inference policy implemented here. Only the latter
//! is kept. Inputs where the two disagreed are pinned down in the tests below.

use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Country calling code prepended to every canonical number.
pub const COUNTRY_CODE: &str = "54";
/// Area code assumed for local fixed-line numbers (Córdoba capital).
pub const DEFAULT_AREA_CODE: &str = "351";
/// Mobile indicator required by WhatsApp for Argentine numbers.
const MOBILE_INDICATOR: char = '9';

/// Values operators type in phone cells when there is no phone.
const PLACEHOLDERS: [&str; 5] = ["s/t", "sin", "n/a", "na", "400000"];

const MIN_DIGITS: usize = 8;
const MAX_DIGITS: usize = 15;

static NON_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9]+").expect("static regex is valid"));

/// Normalizes a raw phone value into `+54<national>` format.
///
/// Returns `None` when the value is empty, a known placeholder, or cannot be turned into a
/// plausible number. Normalizing an already normalized value returns it unchanged.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let lowered = trimmed.to_lowercase();
    if PLACEHOLDERS.contains(&lowered.as_str()) {
        tracing::debug!("Rejected placeholder phone value: {}", trimmed);
        return None;
    }

    // Several numbers in one cell: only the first one counts
    if let Some((first, _)) = trimmed.split_once('/') {
        return normalize_phone(first);
    }

    let mut digits = NON_DIGITS.replace_all(trimmed, "").into_owned();

    if let Some(rest) = digits.strip_prefix("00") {
        digits = rest.to_string();
    }

    if digits.len() == 6 || digits.len() == 7 {
        digits = format!("{}{}", DEFAULT_AREA_CODE, digits);
    }

    if digits.len() < MIN_DIGITS || digits.len() > MAX_DIGITS {
        return None;
    }

    let mut national = match digits.strip_prefix(COUNTRY_CODE) {
        Some(rest) => rest.to_string(),
        None => digits,
    };
    if !national.starts_with(MOBILE_INDICATOR) {
        national.insert(0, MOBILE_INDICATOR);
    }

    // E.164 allows at most 15 digits including the country code
    if COUNTRY_CODE.len() + national.len() > MAX_DIGITS {
        return None;
    }

    Some(format!("+{}{}", COUNTRY_CODE, national))
}

/// Normalizes a JSON cell, which spreadsheets export either as text or as a number.
pub fn normalize_phone_value(value: &Value) -> Option<String> {
    cell_to_string(value).and_then(|raw| normalize_phone(&raw))
}

/// Renders a spreadsheet cell as text. Integral numbers lose their `.0` suffix.
pub fn cell_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => {
            if let Some(i) = n.as_u64() {
                Some(i.to_string())
            } else if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else {
                n.as_f64().map(|f| {
                    if f.fract() == 0.0 {
                        format!("{:.0}", f)
                    } else {
                        f.to_string()
                    }
                })
            }
        }
        _ => None,
    }
}

/// Formats a canonical number for human-facing reports (e.g. `+54 9 351 123-4567`).
///
/// Falls back to `None` when libphonenumber does not consider the number valid for Argentina,
/// in which case callers print the canonical form instead.
pub fn format_international(canonical: &str) -> Option<String> {
    match phonenumber::parse(Some(CountryId::AR), canonical) {
        Ok(number) if phonenumber::is_valid(&number) => {
            Some(number.format().mode(Mode::International).to_string())
        }
        Ok(_) => None,
        Err(e) => {
            tracing::debug!("Could not parse phone '{}' for display: {:?}", canonical, e);
            None
        }
    }
}
