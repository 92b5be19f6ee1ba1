//! Student balance model
//!
//! A balance folds attendance into `sessions_attended` from two sources that
//! may disagree: the live count of present marks and the stored counter.
//! The processed ledger keeps the stored counter from counting one
//! attendance summary twice.

pub mod reconciler;

use roster_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

pub use reconciler::{BalanceChange, BalanceReconciler, CountSource};

/// Billing status of a student
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BillingStatus {
    Active,
    Debt,
    FullyConsumed,
    Reserved,
    Dropped,
    Trial,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::Active => "active",
            BillingStatus::Debt => "debt",
            BillingStatus::FullyConsumed => "fully-consumed",
            BillingStatus::Reserved => "reserved",
            BillingStatus::Dropped => "dropped",
            BillingStatus::Trial => "trial",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(BillingStatus::Active),
            "debt" => Ok(BillingStatus::Debt),
            "fully-consumed" => Ok(BillingStatus::FullyConsumed),
            "reserved" => Ok(BillingStatus::Reserved),
            "dropped" => Ok(BillingStatus::Dropped),
            "trial" => Ok(BillingStatus::Trial),
            other => Err(Error::Validation(format!("Unknown billing status '{}'", other))),
        }
    }

    /// Statuses managed by staff, never rewritten by reconciliation
    pub fn is_manual(&self) -> bool {
        matches!(
            self,
            BillingStatus::Reserved | BillingStatus::Dropped | BillingStatus::Trial
        )
    }
}

/// Derive billing status and debt size from the remaining session count
///
/// Returns `(status, debt_sessions)`.
pub fn derive_status(
    current: BillingStatus,
    current_debt: i64,
    remaining: i64,
) -> (BillingStatus, i64) {
    if current.is_manual() {
        return (current, current_debt);
    }

    if remaining < 0 {
        return (BillingStatus::Debt, -remaining);
    }

    match (current, remaining) {
        (BillingStatus::Active, 0) => (BillingStatus::FullyConsumed, 0),
        (BillingStatus::Debt | BillingStatus::FullyConsumed, r) if r > 0 => {
            (BillingStatus::Active, 0)
        }
        (status, _) => (status, 0),
    }
}

/// Bounded FIFO of attendance summary ids already folded into a balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedLedger {
    entries: VecDeque<Uuid>,
    #[serde(skip)]
    capacity: usize,
}

impl ProcessedLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Decode the stored JSON array, dropping the oldest entries over capacity
    pub fn from_json(text: &str, capacity: usize) -> Result<Self> {
        let entries: VecDeque<Uuid> = serde_json::from_str(text)
            .map_err(|e| Error::Internal(format!("Corrupt processed ledger: {}", e)))?;
        let mut ledger = Self {
            entries,
            capacity: capacity.max(1),
        };
        ledger.trim();
        Ok(ledger)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.entries)
            .map_err(|e| Error::Internal(format!("Failed to encode processed ledger: {}", e)))
    }

    pub fn contains(&self, summary_id: Uuid) -> bool {
        self.entries.contains(&summary_id)
    }

    /// Record a summary id; `false` if it was already present
    pub fn record(&mut self, summary_id: Uuid) -> bool {
        if self.contains(summary_id) {
            return false;
        }
        self.entries.push_back(summary_id);
        self.trim();
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn trim(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}

/// Per-student balance record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentBalance {
    pub student_id: Uuid,
    pub full_name: String,
    /// Enrolled class, if any
    pub class_id: Option<Uuid>,
    pub sessions_registered: i64,
    pub sessions_attended: i64,
    /// `registered - attended`, negative when in debt
    pub sessions_remaining: i64,
    pub status: BillingStatus,
    pub debt_sessions: i64,
    pub ledger: ProcessedLedger,
    /// Compare-and-set token, bumped on every write
    pub version: i64,
}

impl StudentBalance {
    /// Recompute remaining, status and debt from the attended counter
    pub fn rederive(&mut self) {
        self.sessions_remaining = self.sessions_registered - self.sessions_attended;
        let (status, debt) =
            derive_status(self.status, self.debt_sessions, self.sessions_remaining);
        self.status = status;
        self.debt_sessions = debt;
    }
}
