//! Recording workflow: store the event, recount, consult the policy, and
//! compose the notices.
//!
//! Insert-recount-decide-write for one student runs under two locks: an
//! in-process mutex keyed by student id, and the store's own student lock,
//! which for Postgres is an advisory lock shared by every process. Two
//! recordings therefore never both see the pre-increment count and fire the
//! same threshold.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::compute_late_minutes;
use crate::config::EngineConfig;
use crate::error::{AttendanceError, Result};
use crate::messages;
use crate::models::{
    AlertDecision, AttendanceEvent, EventKind, EventStatus, Student, StudentStats,
};
use crate::policy::{evaluate_stats, ThresholdTable};
use crate::report::{self, RangeSummary};
use crate::store::{EventStore, Roster};
use crate::streak::compute_student_stats;

#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    pub event: AttendanceEvent,
    pub stats: StudentStats,
    pub decision: AlertDecision,
    /// `None` for an on-time arrival.
    pub guardian_message: Option<String>,
    pub escalation_message: Option<String>,
}

pub struct Escalator<S> {
    store: S,
    config: EngineConfig,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: EventStore> Escalator<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn table(&self, kind: EventKind) -> &ThresholdTable {
        match kind {
            EventKind::Absence => &self.config.absence_thresholds,
            EventKind::Late => &self.config.lateness_thresholds,
        }
    }

    async fn student_lock(&self, student_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(student_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the student's entry once no caller holds or waits on it. Clones
    /// are only handed out under the map lock, so a count of one means only
    /// the map is left.
    async fn release_student_lock(&self, student_id: &str) {
        let mut locks = self.locks.lock().await;
        if locks
            .get(student_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(student_id);
        }
    }

    /// Stores `event` and reassesses the student while both locks are held.
    async fn store_and_reassess(
        &self,
        event: &AttendanceEvent,
    ) -> Result<(StudentStats, AlertDecision)> {
        let lock = self.student_lock(&event.student_id).await;
        let result = {
            let _guard = lock.lock().await;
            match self.store.lock_student(&event.student_id).await {
                Ok(held) => {
                    let result = self.insert_and_reassess(event).await;
                    let released = self.store.unlock_student(held).await;
                    result.and_then(|outcome| released.map(|()| outcome))
                }
                Err(err) => Err(err),
            }
        };
        drop(lock);
        self.release_student_lock(&event.student_id).await;
        result
    }

    async fn insert_and_reassess(
        &self,
        event: &AttendanceEvent,
    ) -> Result<(StudentStats, AlertDecision)> {
        self.store.insert_event(event).await?;
        if !event.is_escalation_eligible() {
            debug!(student_id = %event.student_id, "arrival on time, no escalation");
            let stats = self.student_stats(&event.student_id, event.kind).await?;
            return Ok((stats, AlertDecision::none()));
        }
        self.reassess(&event.student_id, event.kind).await
    }

    pub async fn record_absence(
        &self,
        student: &Student,
        date: NaiveDate,
        period: Option<String>,
    ) -> Result<RecordOutcome> {
        let event = AttendanceEvent::absence(student, date, period);
        let (stats, decision) = self.store_and_reassess(&event).await?;
        info!(student_id = %student.id, %date, "absence recorded");

        let escalation_message = decision.should_alert.then(|| {
            messages::escalation_alert_message(
                &student.name,
                &student.id,
                &student.class_room,
                stats.total_count,
                stats.consecutive_days,
            )
        });
        let guardian_message =
            messages::guardian_absence_message(&student.name, date, event.period.as_deref());

        Ok(RecordOutcome {
            event,
            stats,
            decision,
            guardian_message: Some(guardian_message),
            escalation_message,
        })
    }

    pub async fn record_late(
        &self,
        student: &Student,
        date: NaiveDate,
        arrival_time: &str,
    ) -> Result<RecordOutcome> {
        let late_minutes = compute_late_minutes(arrival_time, &self.config.expected_time)?;

        let event = AttendanceEvent::late(student, date, arrival_time.trim(), late_minutes);
        let (stats, decision) = self.store_and_reassess(&event).await?;
        info!(student_id = %student.id, %date, late_minutes, "late arrival recorded");

        if !event.is_escalation_eligible() {
            return Ok(RecordOutcome {
                event,
                stats,
                decision,
                guardian_message: None,
                escalation_message: None,
            });
        }

        let escalation_message = decision.should_alert.then(|| {
            messages::lateness_escalation_message(
                &student.name,
                &student.id,
                &student.class_room,
                stats.total_count,
                stats.total_minutes,
            )
        });
        let guardian_message = messages::guardian_lateness_message(
            &student.name,
            arrival_time.trim(),
            late_minutes,
            date,
        );

        Ok(RecordOutcome {
            event,
            stats,
            decision,
            guardian_message: Some(guardian_message),
            escalation_message,
        })
    }

    /// Recount from the stored history and persist the threshold when it fires.
    /// Callers must hold the student's lock.
    async fn reassess(
        &self,
        student_id: &str,
        kind: EventKind,
    ) -> Result<(StudentStats, AlertDecision)> {
        let stats = self.student_stats(student_id, kind).await?;
        let last = self.store.last_alerted_threshold(student_id, kind).await?;
        let decision = evaluate_stats(&stats, last, self.table(kind));

        if let Some(threshold) = decision.threshold.as_ref().filter(|_| decision.should_alert) {
            self.store
                .set_last_alerted_threshold(student_id, kind, threshold.count)
                .await?;
            info!(
                student_id,
                kind = kind.as_str(),
                threshold = threshold.count,
                label = %threshold.label,
                "escalation threshold reached"
            );
        }
        Ok((stats, decision))
    }

    /// Totals over escalation-eligible events only.
    pub async fn student_stats(&self, student_id: &str, kind: EventKind) -> Result<StudentStats> {
        let history: Vec<AttendanceEvent> = self
            .store
            .events_for_student(student_id, kind)
            .await?
            .into_iter()
            .filter(AttendanceEvent::is_escalation_eligible)
            .collect();
        Ok(compute_student_stats(&history, student_id))
    }

    /// Absence dates for a student, oldest first, ready for a printed form.
    pub async fn absence_dates(&self, student_id: &str) -> Result<Vec<NaiveDate>> {
        let mut dates: Vec<NaiveDate> = self
            .store
            .events_for_student(student_id, EventKind::Absence)
            .await?
            .iter()
            .map(|e| e.date)
            .collect();
        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    pub async fn edit_arrival(
        &self,
        event_id: Uuid,
        arrival_time: &str,
    ) -> Result<AttendanceEvent> {
        let late_minutes = compute_late_minutes(arrival_time, &self.config.expected_time)?;
        let mut event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or(AttendanceError::EventNotFound(event_id))?;
        if event.kind != EventKind::Late {
            return Err(AttendanceError::NotLateEvent(event_id));
        }
        event.arrival_time = Some(arrival_time.trim().to_string());
        event.late_minutes = Some(late_minutes);
        self.store.update_event(&event).await?;
        info!(%event_id, late_minutes, "arrival time edited");
        Ok(event)
    }

    pub async fn advance_status(
        &self,
        event_id: Uuid,
        status: EventStatus,
    ) -> Result<AttendanceEvent> {
        let mut event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or(AttendanceError::EventNotFound(event_id))?;
        event.status = event.status.advance(status)?;
        self.store.update_event(&event).await?;
        Ok(event)
    }

    pub async fn delete_event(&self, event_id: Uuid) -> Result<bool> {
        let removed = self.store.delete_event(event_id).await?;
        if removed {
            info!(%event_id, "attendance event deleted");
        }
        Ok(removed)
    }

    pub async fn range_summary(&self, from: NaiveDate, to: NaiveDate) -> Result<RangeSummary> {
        let events = self.store.events_between(from, to).await?;
        Ok(report::aggregate_range(&events, from, to))
    }
}

impl<S: EventStore + Roster> Escalator<S> {
    pub async fn daily_report(&self, date: NaiveDate) -> Result<String> {
        let events = self.store.events_on(date).await?;
        let sizes: BTreeMap<String, i64> = self.store.class_sizes().await?.into_iter().collect();
        Ok(report::build_daily_report(date, &events, &sizes))
    }

    pub async fn roster_student(&self, student_id: &str) -> Result<Student> {
        self.store
            .student(student_id)
            .await?
            .ok_or_else(|| AttendanceError::UnknownStudent(student_id.to_string()))
    }
}
