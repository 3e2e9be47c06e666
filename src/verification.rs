//! Bulk WhatsApp verification of client records
//!
//! 1. Resolve a phone per record (client database first, then the record's own cells)
//! 2. Normalize and deduplicate
//! 3. Verify the distinct phones with one backend call
//! 4. Merge availability back onto every record sharing a phone

use crate::backend_client::BackendClient;
use crate::errors::AppError;
use crate::phone::normalize_phone;
use crate::records::ClientRecord;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Where the verified phone came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhoneSource {
    Database,
    Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhatsAppStatus {
    Available,
    NotAvailable,
    /// The phone was sent for verification but the backend returned nothing for it.
    Unconfirmed,
    /// No resolvable phone; the record was never sent for verification.
    NoPhone,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedRecord {
    pub record: ClientRecord,
    pub phone: Option<String>,
    pub phone_source: Option<PhoneSource>,
    pub status: WhatsAppStatus,
}

impl VerifiedRecord {
    pub fn has_whatsapp(&self) -> bool {
        self.status == WhatsAppStatus::Available
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    /// Records that had a phone, each exactly once.
    pub verified: Vec<VerifiedRecord>,
    /// Records without a resolvable phone, flagged `NoPhone`.
    pub no_phone: Vec<VerifiedRecord>,
    /// Number of distinct phones sent to the backend.
    pub phones_checked: usize,
}

impl VerificationReport {
    /// Every input record, verified ones first.
    pub fn merged(&self) -> Vec<&VerifiedRecord> {
        self.verified.iter().chain(self.no_phone.iter()).collect()
    }

    pub fn available(&self) -> impl Iterator<Item = &VerifiedRecord> {
        self.verified.iter().filter(|v| v.has_whatsapp())
    }
}

/// Resolves one phone per record without contacting the WhatsApp verifier.
///
/// Database phones take precedence; when the database has none, or has one that does not
/// normalize, the record's own phone cells are tried in order.
pub fn resolve_phones(
    records: &[ClientRecord],
    db_phones: &HashMap<u64, String>,
) -> Vec<(ClientRecord, Option<(String, PhoneSource)>)> {
    records
        .iter()
        .map(|record| {
            let from_db = db_phones
                .get(&record.uf)
                .and_then(|raw| normalize_phone(raw))
                .map(|phone| (phone, PhoneSource::Database));
            let resolved = from_db.or_else(|| {
                record
                    .first_valid_phone()
                    .map(|phone| (phone, PhoneSource::Record))
            });
            (record.clone(), resolved)
        })
        .collect()
}

/// Verifies WhatsApp availability for a batch of records.
///
/// A failing database lookup degrades to in-record phones; a failing verification call
/// fails the whole batch so the caller can retry it.
pub async fn verify_batch(
    client: &BackendClient,
    records: &[ClientRecord],
) -> Result<VerificationReport, AppError> {
    tracing::info!("Starting WhatsApp verification for {} record(s)", records.len());

    let ufs: Vec<u64> = records.iter().map(|r| r.uf).collect();
    let db_phones = match client.phones_by_ufs(&ufs).await {
        Ok(phones) => phones,
        Err(e) => {
            tracing::warn!(
                "Client database phone lookup failed, using record phones only: {}",
                e
            );
            HashMap::new()
        }
    };

    let resolved = resolve_phones(records, &db_phones);

    let mut seen = HashSet::new();
    let distinct: Vec<String> = resolved
        .iter()
        .filter_map(|(_, r)| r.as_ref().map(|(phone, _)| phone.clone()))
        .filter(|phone| seen.insert(phone.clone()))
        .collect();

    let availability: HashMap<String, bool> = client
        .verify_whatsapp_bulk(&distinct)
        .await?
        .into_iter()
        .map(|v| {
            // Match on the canonical form in case the backend reformats numbers
            let key = normalize_phone(&v.phone).unwrap_or(v.phone);
            (key, v.is_whats_app)
        })
        .collect();

    let mut report = VerificationReport {
        phones_checked: distinct.len(),
        ..Default::default()
    };

    for (record, resolution) in resolved {
        match resolution {
            Some((phone, source)) => {
                let status = match availability.get(&phone) {
                    Some(true) => WhatsAppStatus::Available,
                    Some(false) => WhatsAppStatus::NotAvailable,
                    None => WhatsAppStatus::Unconfirmed,
                };
                report.verified.push(VerifiedRecord {
                    record,
                    phone: Some(phone),
                    phone_source: Some(source),
                    status,
                });
            }
            None => report.no_phone.push(VerifiedRecord {
                record,
                phone: None,
                phone_source: None,
                status: WhatsAppStatus::NoPhone,
            }),
        }
    }

    tracing::info!(
        "✓ WhatsApp verification done: {} with WhatsApp, {} verified, {} without phone",
        report.available().count(),
        report.verified.len(),
        report.no_phone.len()
    );

    Ok(report)
}
