//! Multi-step upload/verify/send wizard.
//!
//! The wizard is linear: steps only move forward through an explicit action, or backward
//! through an explicit "volver". Every mutation is persisted under a fixed key prefix with a
//! timestamp; a snapshot older than the configured TTL is discarded on resume. Going back to
//! the first step is a full reset that deletes the snapshot.

use crate::backend_client::SendReceipt;
use crate::debt_check::DebtCheckReport;
use crate::errors::AppError;
use crate::records::ClientRecord;
use crate::verification::VerificationReport;
use crate::wizard_store::{seal, unseal, WizardStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Prefix of every persisted wizard key.
pub const STORAGE_PREFIX: &str = "aqua_wizard:";

/// Source of the current time, injectable so expiry can be tested.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardFlow {
    /// Upload → Verify WhatsApp → Send notices → Download.
    DebtSending,
    /// Upload → Select clients → Verify debt → Download.
    ClientFiltering,
}

impl WizardFlow {
    pub fn steps(self) -> &'static [WizardStep] {
        match self {
            WizardFlow::DebtSending => &[
                WizardStep::Upload,
                WizardStep::Verify,
                WizardStep::Send,
                WizardStep::Download,
            ],
            WizardFlow::ClientFiltering => &[
                WizardStep::Upload,
                WizardStep::SelectClients,
                WizardStep::VerifyDebt,
                WizardStep::Download,
            ],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WizardFlow::DebtSending => "debt_sending",
            WizardFlow::ClientFiltering => "client_filtering",
        }
    }
}

impl fmt::Display for WizardFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WizardFlow {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debt_sending" => Ok(WizardFlow::DebtSending),
            "client_filtering" => Ok(WizardFlow::ClientFiltering),
            other => Err(AppError::NotFound(format!("Unknown wizard flow '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    Upload,
    Verify,
    Send,
    SelectClients,
    VerifyDebt,
    Download,
}

/// File made available on the Download step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedFile {
    pub file_name: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardState {
    pub flow: WizardFlow,
    pub active_step: usize,
    pub raw_data: Vec<ClientRecord>,
    pub filtered_data: Vec<ClientRecord>,
    pub file_name: Option<String>,
    pub file_name_filtered: Option<String>,
    pub processed_file: Option<ProcessedFile>,
    pub verification: Option<VerificationReport>,
    pub debt_report: Option<DebtCheckReport>,
    pub send_receipt: Option<SendReceipt>,
}

impl WizardState {
    pub fn new(flow: WizardFlow) -> Self {
        Self {
            flow,
            active_step: 0,
            raw_data: Vec::new(),
            filtered_data: Vec::new(),
            file_name: None,
            file_name_filtered: None,
            processed_file: None,
            verification: None,
            debt_report: None,
            send_receipt: None,
        }
    }

    pub fn current_step(&self) -> WizardStep {
        let steps = self.flow.steps();
        steps[self.active_step.min(steps.len() - 1)]
    }

    fn expect_step(&self, expected: WizardStep) -> Result<(), AppError> {
        if self.current_step() != expected {
            return Err(AppError::Validation(format!(
                "Action only allowed on step {:?}, wizard is on {:?}",
                expected,
                self.current_step()
            )));
        }
        Ok(())
    }

    fn base_name(&self) -> String {
        let name = self.file_name.as_deref().unwrap_or("clientes");
        name.rsplit_once('.')
            .map(|(base, _)| base)
            .unwrap_or(name)
            .to_string()
    }

    /// Replaces the uploaded records. Only allowed on the Upload step.
    pub fn load_records(
        &mut self,
        records: Vec<ClientRecord>,
        file_name: Option<String>,
    ) -> Result<(), AppError> {
        self.expect_step(WizardStep::Upload)?;
        if records.is_empty() {
            return Err(AppError::Validation(
                "El archivo no contiene registros válidos".to_string(),
            ));
        }
        let flow = self.flow;
        *self = Self::new(flow);
        self.raw_data = records;
        self.file_name = file_name;
        Ok(())
    }

    /// Stores the WhatsApp verification; records with WhatsApp become the filtered set.
    pub fn apply_verification(&mut self, report: VerificationReport) -> Result<(), AppError> {
        self.expect_step(WizardStep::Verify)?;
        self.filtered_data = report.available().map(|v| v.record.clone()).collect();
        self.file_name_filtered = Some(format!("{}_con_whatsapp.csv", self.base_name()));
        self.verification = Some(report);
        Ok(())
    }

    /// Keeps only the chosen UFs as the filtered set.
    pub fn select_clients(&mut self, ufs: &[u64]) -> Result<(), AppError> {
        self.expect_step(WizardStep::SelectClients)?;
        let wanted: HashSet<u64> = ufs.iter().copied().collect();
        let selected: Vec<ClientRecord> = self
            .raw_data
            .iter()
            .filter(|r| wanted.contains(&r.uf))
            .cloned()
            .collect();
        if selected.is_empty() {
            return Err(AppError::Validation(
                "Seleccione al menos un cliente".to_string(),
            ));
        }
        self.filtered_data = selected;
        self.file_name_filtered = Some(format!("{}_seleccion.csv", self.base_name()));
        Ok(())
    }

    pub fn apply_debt_check(
        &mut self,
        report: DebtCheckReport,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.expect_step(WizardStep::VerifyDebt)?;
        self.processed_file = Some(ProcessedFile {
            file_name: format!("aptos_{}.csv", self.base_name()),
            generated_at: now,
        });
        self.debt_report = Some(report);
        Ok(())
    }

    pub fn apply_send(&mut self, receipt: SendReceipt, now: DateTime<Utc>) -> Result<(), AppError> {
        self.expect_step(WizardStep::Send)?;
        self.processed_file = Some(ProcessedFile {
            file_name: format!("relevamiento_{}.csv", self.base_name()),
            generated_at: now,
        });
        self.send_receipt = Some(receipt);
        Ok(())
    }

    /// Whether the current step produced what the next step needs.
    fn step_complete(&self) -> bool {
        match self.current_step() {
            WizardStep::Upload => !self.raw_data.is_empty(),
            WizardStep::Verify => self.verification.is_some(),
            WizardStep::SelectClients => !self.filtered_data.is_empty(),
            WizardStep::Send => self.send_receipt.is_some(),
            WizardStep::VerifyDebt => self.debt_report.is_some(),
            WizardStep::Download => false,
        }
    }

    /// Moves to the next step.
    pub fn advance(&mut self) -> Result<(), AppError> {
        if self.active_step + 1 >= self.flow.steps().len() {
            return Err(AppError::Validation(
                "El asistente ya está en el último paso".to_string(),
            ));
        }
        if !self.step_complete() {
            return Err(AppError::Validation(format!(
                "Complete el paso {:?} antes de continuar",
                self.current_step()
            )));
        }
        self.active_step += 1;
        Ok(())
    }

    /// Moves back to `target`, clearing everything produced by later steps.
    ///
    /// Moving to step 0 resets the whole state.
    pub fn go_back(&mut self, target: usize) -> Result<(), AppError> {
        if target >= self.active_step {
            return Err(AppError::Validation(format!(
                "Cannot go back from step {} to step {}",
                self.active_step, target
            )));
        }
        if target == 0 {
            *self = Self::new(self.flow);
            return Ok(());
        }

        let steps = self.flow.steps();
        for step in &steps[target + 1..] {
            self.clear_output(*step);
        }
        self.active_step = target;
        Ok(())
    }

    fn clear_output(&mut self, step: WizardStep) {
        match step {
            WizardStep::Upload => {
                self.raw_data.clear();
                self.file_name = None;
            }
            WizardStep::Verify => {
                self.verification = None;
                self.filtered_data.clear();
                self.file_name_filtered = None;
            }
            WizardStep::SelectClients => {
                self.filtered_data.clear();
                self.file_name_filtered = None;
            }
            WizardStep::Send => {
                self.send_receipt = None;
                self.processed_file = None;
            }
            WizardStep::VerifyDebt => {
                self.debt_report = None;
                self.processed_file = None;
            }
            WizardStep::Download => {}
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedWizard {
    state: WizardState,
    timestamp: DateTime<Utc>,
}

/// Loads, mutates and persists wizard sessions.
#[derive(Clone)]
pub struct WizardMachine {
    store: Arc<dyn WizardStore>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
}

impl WizardMachine {
    pub fn new(store: Arc<dyn WizardStore>, clock: Arc<dyn Clock>, ttl: chrono::Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn storage_key(flow: WizardFlow, session: &str) -> String {
        format!("{}{}:{}", STORAGE_PREFIX, flow, session)
    }

    /// Returns the saved state if it is fresh and intact, otherwise a new state at step 0.
    pub async fn resume(&self, flow: WizardFlow, session: &str) -> Result<WizardState, AppError> {
        let key = Self::storage_key(flow, session);
        let Some(serialized) = self.store.load(&key).await? else {
            return Ok(WizardState::new(flow));
        };

        let persisted = unseal(&serialized)
            .and_then(|data| serde_json::from_str::<PersistedWizard>(&data).ok());

        match persisted {
            Some(p) if p.state.flow == flow && self.clock.now() - p.timestamp < self.ttl => {
                tracing::debug!(
                    "Resumed wizard {} at step {}",
                    key,
                    p.state.active_step
                );
                Ok(p.state)
            }
            Some(_) => {
                tracing::info!("Discarding expired wizard state {}", key);
                self.store.clear(&key).await?;
                Ok(WizardState::new(flow))
            }
            None => {
                tracing::warn!("Discarding unreadable wizard state {}", key);
                self.store.clear(&key).await?;
                Ok(WizardState::new(flow))
            }
        }
    }

    /// Writes the state with the current timestamp. A state back at an empty step 0 is not
    /// written; its snapshot is deleted instead.
    pub async fn persist(&self, session: &str, state: &WizardState) -> Result<(), AppError> {
        let key = Self::storage_key(state.flow, session);
        if state.active_step == 0 && state.raw_data.is_empty() {
            return self.store.clear(&key).await;
        }

        let persisted = PersistedWizard {
            state: state.clone(),
            timestamp: self.clock.now(),
        };
        let data = serde_json::to_string(&persisted)?;
        self.store.save(&key, seal(data)?).await
    }

    /// Resumes the session, applies `mutate` and persists the result.
    ///
    /// When `mutate` fails nothing is written and the session stays where it was.
    pub async fn update<F>(
        &self,
        flow: WizardFlow,
        session: &str,
        mutate: F,
    ) -> Result<WizardState, AppError>
    where
        F: FnOnce(&mut WizardState, DateTime<Utc>) -> Result<(), AppError>,
    {
        let state = self.resume(flow, session).await?;
        self.commit(session, state, mutate).await
    }

    /// Applies `mutate` to a state resumed earlier and persists it with a fresh timestamp.
    ///
    /// Used around long backend calls: the snapshot may pass its TTL while the call runs,
    /// but the session the call was made for is still the one that gets written.
    pub async fn commit<F>(
        &self,
        session: &str,
        mut state: WizardState,
        mutate: F,
    ) -> Result<WizardState, AppError>
    where
        F: FnOnce(&mut WizardState, DateTime<Utc>) -> Result<(), AppError>,
    {
        mutate(&mut state, self.clock.now())?;
        self.persist(session, &state).await?;
        Ok(state)
    }

    /// Full reset: deletes the snapshot and returns a fresh state.
    pub async fn reset(&self, flow: WizardFlow, session: &str) -> Result<WizardState, AppError> {
        self.store
            .clear(&Self::storage_key(flow, session))
            .await?;
        tracing::info!("Wizard {}:{} reset", flow, session);
        Ok(WizardState::new(flow))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ImportSource;
    use crate::verification::{PhoneSource, VerifiedRecord, WhatsAppStatus};
    use crate::wizard_store::MemoryWizardStore;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn record(uf: u64) -> ClientRecord {
        ClientRecord {
            uf,
            titular: None,
            barrio: None,
            total_deuda: None,
            phones: vec![],
            source: ImportSource::Manual,
        }
    }

    fn verification_with(ufs_with_whatsapp: &[u64], others: &[u64]) -> VerificationReport {
        let verified = ufs_with_whatsapp
            .iter()
            .map(|uf| (*uf, WhatsAppStatus::Available))
            .chain(others.iter().map(|uf| (*uf, WhatsAppStatus::NotAvailable)))
            .map(|(uf, status)| VerifiedRecord {
                record: record(uf),
                phone: Some(format!("+54935100000{:02}", uf)),
                phone_source: Some(PhoneSource::Record),
                status,
            })
            .collect();
        VerificationReport {
            verified,
            no_phone: vec![],
            phones_checked: ufs_with_whatsapp.len() + others.len(),
        }
    }

    /// Clock that only moves when told to.
    #[derive(Debug)]
    struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        fn new(start: DateTime<Utc>) -> Self {
            Self {
                now: Mutex::new(start),
            }
        }

        fn advance(&self, by: chrono::Duration) {
            let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap_or_else(|e| e.into_inner())
        }
    }

    fn machine() -> (WizardMachine, Arc<ManualClock>, Arc<MemoryWizardStore>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryWizardStore::default());
        let machine = WizardMachine::new(
            store.clone(),
            clock.clone(),
            chrono::Duration::minutes(30),
        );
        (machine, clock, store)
    }

    fn state_at_send() -> WizardState {
        let mut state = WizardState::new(WizardFlow::DebtSending);
        state
            .load_records(vec![record(1), record(2)], Some("enero.xlsx".into()))
            .unwrap();
        state.advance().unwrap();
        state.apply_verification(verification_with(&[1], &[2])).unwrap();
        state.advance().unwrap();
        state
    }

    #[test]
    fn test_forward_transitions_require_step_output() {
        let mut state = WizardState::new(WizardFlow::DebtSending);
        assert!(state.advance().is_err());

        state.load_records(vec![record(1)], None).unwrap();
        state.advance().unwrap();
        assert_eq!(state.current_step(), WizardStep::Verify);
        assert!(state.advance().is_err());
    }

    #[test]
    fn test_verification_filters_whatsapp_records() {
        let state = state_at_send();
        assert_eq!(state.current_step(), WizardStep::Send);
        assert_eq!(state.filtered_data, vec![record(1)]);
        assert_eq!(
            state.file_name_filtered.as_deref(),
            Some("enero_con_whatsapp.csv")
        );
    }

    #[test]
    fn test_go_back_clears_later_outputs_only() {
        let mut state = state_at_send();
        let now = Utc::now();
        state
            .apply_send(
                SendReceipt {
                    job_id: Some("job-1".into()),
                    queued: 1,
                },
                now,
            )
            .unwrap();
        state.advance().unwrap();
        assert_eq!(state.current_step(), WizardStep::Download);

        state.go_back(1).unwrap();
        assert_eq!(state.current_step(), WizardStep::Verify);
        assert!(state.send_receipt.is_none());
        assert!(state.processed_file.is_none());
        // The verify step's own output survives so the user can continue again
        assert!(state.verification.is_some());
        assert_eq!(state.raw_data.len(), 2);
    }

    #[test]
    fn test_go_back_to_zero_resets_everything() {
        let mut state = state_at_send();
        state.go_back(0).unwrap();
        assert_eq!(state, WizardState::new(WizardFlow::DebtSending));
    }

    #[test]
    fn test_go_back_rejects_forward_targets() {
        let mut state = state_at_send();
        assert!(state.go_back(2).is_err());
        assert!(state.go_back(3).is_err());
    }

    #[test]
    fn test_actions_outside_their_step_are_rejected() {
        let mut state = WizardState::new(WizardFlow::ClientFiltering);
        assert!(state.select_clients(&[1]).is_err());

        state.load_records(vec![record(1), record(2)], None).unwrap();
        state.advance().unwrap();
        assert!(state.select_clients(&[99]).is_err());
        state.select_clients(&[2]).unwrap();
        assert_eq!(state.filtered_data, vec![record(2)]);
        assert!(state.load_records(vec![record(3)], None).is_err());
    }

    #[tokio::test]
    async fn test_resume_within_ttl_keeps_step() {
        let (machine, clock, _) = machine();
        machine.persist("s1", &state_at_send()).await.unwrap();

        clock.advance(chrono::Duration::minutes(29));
        let resumed = machine.resume(WizardFlow::DebtSending, "s1").await.unwrap();
        assert_eq!(resumed.active_step, 2);
    }

    #[tokio::test]
    async fn test_resume_after_ttl_discards_state() {
        let (machine, clock, store) = machine();
        machine.persist("s1", &state_at_send()).await.unwrap();

        clock.advance(chrono::Duration::minutes(31));
        let resumed = machine.resume(WizardFlow::DebtSending, "s1").await.unwrap();
        assert_eq!(resumed.active_step, 0);
        assert!(resumed.raw_data.is_empty());

        let key = WizardMachine::storage_key(WizardFlow::DebtSending, "s1");
        assert_eq!(store.load(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_commit_survives_backend_call_longer_than_ttl() {
        let (machine, clock, _) = machine();
        let mut at_verify = WizardState::new(WizardFlow::DebtSending);
        at_verify
            .load_records(vec![record(1), record(2)], Some("enero.xlsx".into()))
            .unwrap();
        at_verify.advance().unwrap();
        machine.persist("s1", &at_verify).await.unwrap();

        let current = machine.resume(WizardFlow::DebtSending, "s1").await.unwrap();
        // The verification call outlives the snapshot TTL
        clock.advance(chrono::Duration::minutes(31));
        let committed = machine
            .commit("s1", current, |wizard, _| {
                wizard.apply_verification(verification_with(&[1], &[2]))?;
                wizard.advance()
            })
            .await
            .unwrap();
        assert_eq!(committed.current_step(), WizardStep::Send);

        let resumed = machine.resume(WizardFlow::DebtSending, "s1").await.unwrap();
        assert_eq!(resumed.active_step, 2);
        assert_eq!(resumed.filtered_data, vec![record(1)]);
    }

    #[tokio::test]
    async fn test_corrupted_snapshot_is_discarded() {
        let (machine, _, store) = machine();
        let key = WizardMachine::storage_key(WizardFlow::DebtSending, "s1");
        store.save(&key, "{garbage".to_string()).await.unwrap();

        let resumed = machine.resume(WizardFlow::DebtSending, "s1").await.unwrap();
        assert_eq!(resumed, WizardState::new(WizardFlow::DebtSending));
    }

    #[tokio::test]
    async fn test_failed_update_leaves_session_untouched() {
        let (machine, _, _) = machine();
        machine.persist("s1", &state_at_send()).await.unwrap();

        let result = machine
            .update(WizardFlow::DebtSending, "s1", |_, _| {
                Err(AppError::ExternalApiError("send failed".into()))
            })
            .await;
        assert!(result.is_err());

        let resumed = machine.resume(WizardFlow::DebtSending, "s1").await.unwrap();
        assert_eq!(resumed.current_step(), WizardStep::Send);
    }

    #[tokio::test]
    async fn test_going_back_to_zero_clears_storage() {
        let (machine, _, store) = machine();
        machine.persist("s1", &state_at_send()).await.unwrap();

        machine
            .update(WizardFlow::DebtSending, "s1", |state, _| state.go_back(0))
            .await
            .unwrap();

        let key = WizardMachine::storage_key(WizardFlow::DebtSending, "s1");
        assert_eq!(store.load(&key).await.unwrap(), None);
    }

    #[test]
    fn test_flow_parsing() {
        assert_eq!(
            "client_filtering".parse::<WizardFlow>().unwrap(),
            WizardFlow::ClientFiltering
        );
        assert!("other".parse::<WizardFlow>().is_err());
    }
}
