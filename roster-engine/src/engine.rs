//! Engine facade
//!
//! Caller-facing operations over the six components. Every mutating
//! operation announces its outcome on the [`EventBus`].

use chrono::{NaiveDate, Utc};
use roster_common::db::HolidayRecord;
use roster_common::time::format_date;
use roster_common::{EngineConfig, EngineEvent, Error, EventBus, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

use crate::attendance::{AttendanceRecorder, AttendanceSheet, SaveAttendanceRequest, SaveReport};
use crate::balance::{BalanceChange, BalanceReconciler, StudentBalance};
use crate::registry::Registry;
use crate::remediation::{
    RemediationGenerator, RemediationObligation, RemediationStatus, StatusChange,
};
use crate::schedule::{expand, ScheduleSpec, TimeWindow};
use crate::sessions::{DateRange, Session, SessionKind, SessionStatus, SessionStore};

pub struct Engine {
    config: EngineConfig,
    registry: Registry,
    sessions: SessionStore,
    recorder: AttendanceRecorder,
    reconciler: BalanceReconciler,
    remediation: RemediationGenerator,
    events: Arc<EventBus>,
}

impl Engine {
    pub fn new(db: SqlitePool, config: EngineConfig) -> Self {
        let registry = Registry::new(db.clone());
        let sessions = SessionStore::new(db.clone());
        let reconciler = BalanceReconciler::new(
            db.clone(),
            config.ledger_capacity,
            config.balance_retry_limit,
        );
        let remediation = RemediationGenerator::new(db.clone());
        let recorder = AttendanceRecorder::new(
            db,
            sessions.clone(),
            remediation.clone(),
            reconciler.clone(),
        );
        let events = Arc::new(EventBus::new(config.event_bus_capacity));

        Self {
            config,
            registry,
            sessions,
            recorder,
            reconciler,
            remediation,
            events,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// (Re)generate the regular sessions of a class over `[from, to]`
    ///
    /// The draft count is capped by the class's total-session cap, or the
    /// configured default when the class has none.
    pub async fn expand_sessions(
        &self,
        class_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Session>> {
        let range = DateRange::new(from, to)?;
        let class = self.registry.class(class_id).await?;

        let spec = ScheduleSpec::parse(&class.schedule_text);
        if spec.is_empty() {
            return Err(Error::Validation(format!(
                "Schedule '{}' of class {} names no weekday",
                class.schedule_text, class_id
            )));
        }

        let cap = class
            .total_sessions
            .filter(|n| *n > 0)
            .map(|n| n as usize)
            .unwrap_or(self.config.default_session_cap as usize);

        let drafts = expand(&spec, class_id, range.from, range.to, cap);
        let sessions = self
            .sessions
            .regenerate(class_id, &drafts, class.room.as_deref(), class.teacher.as_deref())
            .await?;

        let session_count = sessions
            .iter()
            .filter(|s| s.kind == SessionKind::Regular)
            .count();

        info!(
            class_id = %class_id,
            from = %format_date(range.from),
            to = %format_date(range.to),
            drafts = drafts.len(),
            session_count,
            "Sessions expanded"
        );

        self.events.emit_lossy(EngineEvent::SessionsExpanded {
            class_id,
            session_count,
            timestamp: Utc::now(),
        });

        Ok(sessions)
    }

    pub async fn list_sessions(
        &self,
        class_id: Uuid,
        range: Option<DateRange>,
        status: Option<SessionStatus>,
    ) -> Result<Vec<Session>> {
        self.registry.class(class_id).await?;
        self.sessions.list_by_class(class_id, range, status).await
    }

    pub async fn find_session(&self, class_id: Uuid, date: NaiveDate) -> Result<Option<Session>> {
        self.sessions.find_by_class_and_date(class_id, date).await
    }

    pub async fn append_makeup_session(
        &self,
        class_id: Uuid,
        date: NaiveDate,
        time: Option<TimeWindow>,
        note: Option<&str>,
    ) -> Result<Session> {
        self.sessions.append_makeup(class_id, date, time, note).await
    }

    pub async fn cancel_session(&self, session_id: Uuid, reason: Option<&str>) -> Result<Session> {
        self.sessions.cancel(session_id, reason).await
    }

    /// Save attendance and run its follow-ups
    ///
    /// Holidays are not enforced here; see [`Engine::holiday_covering`].
    pub async fn save_attendance(&self, request: SaveAttendanceRequest) -> Result<SaveReport> {
        let class = self.registry.class(request.class_id).await?;
        let on_schedule = ScheduleSpec::parse(&class.schedule_text).permits(request.date);
        if !on_schedule && request.session_id.is_none() {
            warn!(
                class_id = %request.class_id,
                date = %format_date(request.date),
                "Attendance taken on a day outside the class schedule"
            );
        }

        let report = self.recorder.save(request).await?;
        let now = Utc::now();

        self.events.emit_lossy(EngineEvent::AttendanceSaved {
            summary_id: report.summary_id,
            class_id: report.class_id,
            date: report.date,
            detail_count: report.detail_count,
            timestamp: now,
        });

        if let Some(session_id) = report.completed_session_id {
            self.events.emit_lossy(EngineEvent::SessionCompleted {
                session_id,
                summary_id: report.summary_id,
                timestamp: now,
            });
        }

        for outcome in report.remediations.iter().filter(|o| o.created) {
            self.events.emit_lossy(EngineEvent::RemediationCreated {
                obligation_id: outcome.obligation_id,
                student_id: outcome.student_id,
                class_id: report.class_id,
                absence_date: report.date,
                timestamp: now,
            });
        }

        for change in report
            .reconciliations
            .iter()
            .filter_map(|o| o.change.as_ref())
            .filter(|c| c.changed)
        {
            self.emit_balance(&change.balance);
        }

        Ok(report)
    }

    pub async fn get_attendance(&self, class_id: Uuid, date: NaiveDate) -> Result<AttendanceSheet> {
        self.recorder.get(class_id, date).await
    }

    /// Delete an attendance summary; returns the number of released sessions
    pub async fn delete_attendance(&self, summary_id: Uuid) -> Result<u64> {
        self.recorder.delete(summary_id).await
    }

    pub async fn student_balance(&self, student_id: Uuid) -> Result<StudentBalance> {
        self.reconciler.load(student_id).await
    }

    pub async fn recalculate_student_balance(&self, student_id: Uuid) -> Result<BalanceChange> {
        let change = self.reconciler.recalculate(student_id).await?;
        if change.changed {
            self.emit_balance(&change.balance);
        }
        Ok(change)
    }

    pub async fn remediations_for_student(
        &self,
        student_id: Uuid,
        status: Option<RemediationStatus>,
    ) -> Result<Vec<RemediationObligation>> {
        self.remediation.list_for_student(student_id, status).await
    }

    pub async fn transition_remediation(
        &self,
        obligation_id: Uuid,
        status: RemediationStatus,
        actor: &str,
        reason: Option<&str>,
        makeup_session_id: Option<Uuid>,
    ) -> Result<RemediationObligation> {
        self.remediation
            .transition(obligation_id, status, actor, reason, makeup_session_id)
            .await
    }

    pub async fn remediation_history(&self, obligation_id: Uuid) -> Result<Vec<StatusChange>> {
        self.remediation.history(obligation_id).await
    }

    pub async fn holiday_covering(&self, date: NaiveDate) -> Result<Option<HolidayRecord>> {
        self.registry.holiday_covering(date).await
    }

    fn emit_balance(&self, balance: &StudentBalance) {
        self.events.emit_lossy(EngineEvent::BalanceReconciled {
            student_id: balance.student_id,
            sessions_attended: balance.sessions_attended,
            sessions_remaining: balance.sessions_remaining,
            status: balance.status.as_str().to_string(),
            timestamp: Utc::now(),
        });
    }
}
