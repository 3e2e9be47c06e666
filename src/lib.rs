//! AQUA Collections Operations API Library
//!
//! Server-side core of the AQUA collections workflow: phone normalization, debt
//! eligibility, bulk WhatsApp verification against the AQUA backend, and the resumable
//! upload/verify/send wizard.
//!
//! # Modules
//!
//! - `api`: API definitions.
//! - `core`: Core business logic.
//! - `integrations`: Backend client and wizard storage.
//! - `backend_client`: HTTP client for the AQUA backend.
//! - `circuit_breaker`: Circuit breaker around backend calls.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `debt_check`: Debt verification workflow (APTOS / NO APTOS).
//! - `eligibility`: APTO / NO APTO classification.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `phone`: Phone normalization.
//! - `records`: Spreadsheet row validation.
//! - `reports`: CSV exports.
//! - `verification`: Bulk WhatsApp verification.
//! - `wizard`: Wizard state machine.
//! - `wizard_store`: Checksummed wizard snapshot storage.

pub mod api;
pub mod core;
pub mod integrations;

pub mod backend_client;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod debt_check;
pub mod eligibility;
pub mod errors;
pub mod handlers;
pub mod phone;
pub mod records;
pub mod reports;
pub mod verification;
pub mod wizard;
pub mod wizard_store;
