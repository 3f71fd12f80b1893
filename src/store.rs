//! Storage contracts for attendance history and alert state.
//!
//! The engine never touches storage itself; the workflow in
//! [`crate::escalation`] is handed something implementing these traits.

#![allow(async_fn_in_trait)]

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::error::{AttendanceError, Result};
use crate::models::{AttendanceEvent, EventKind, Student};

pub trait EventStore {
    /// Held while one student's record-recount-decide-persist cycle runs.
    type StudentLock;

    /// Blocks until no other writer, in this process or another, holds the
    /// student. The lock is released by [`EventStore::unlock_student`] or,
    /// for stores backed by a transaction, when it is dropped.
    async fn lock_student(&self, student_id: &str) -> Result<Self::StudentLock>;

    async fn unlock_student(&self, lock: Self::StudentLock) -> Result<()>;

    async fn events_for_student(
        &self,
        student_id: &str,
        kind: EventKind,
    ) -> Result<Vec<AttendanceEvent>>;

    async fn events_on(&self, date: NaiveDate) -> Result<Vec<AttendanceEvent>>;

    /// Inclusive of both ends.
    async fn events_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<AttendanceEvent>>;

    async fn get_event(&self, id: Uuid) -> Result<Option<AttendanceEvent>>;

    async fn insert_event(&self, event: &AttendanceEvent) -> Result<()>;

    async fn update_event(&self, event: &AttendanceEvent) -> Result<()>;

    /// Hard delete. Returns whether a row was removed.
    async fn delete_event(&self, id: Uuid) -> Result<bool>;

    /// 0 when the student has never been alerted for this kind.
    async fn last_alerted_threshold(&self, student_id: &str, kind: EventKind) -> Result<u32>;

    async fn set_last_alerted_threshold(
        &self,
        student_id: &str,
        kind: EventKind,
        threshold: u32,
    ) -> Result<()>;
}

/// Lets several workflows share one store.
impl<S: EventStore> EventStore for Arc<S> {
    type StudentLock = S::StudentLock;

    async fn lock_student(&self, student_id: &str) -> Result<Self::StudentLock> {
        (**self).lock_student(student_id).await
    }

    async fn unlock_student(&self, lock: Self::StudentLock) -> Result<()> {
        (**self).unlock_student(lock).await
    }

    async fn events_for_student(
        &self,
        student_id: &str,
        kind: EventKind,
    ) -> Result<Vec<AttendanceEvent>> {
        (**self).events_for_student(student_id, kind).await
    }

    async fn events_on(&self, date: NaiveDate) -> Result<Vec<AttendanceEvent>> {
        (**self).events_on(date).await
    }

    async fn events_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<AttendanceEvent>> {
        (**self).events_between(from, to).await
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<AttendanceEvent>> {
        (**self).get_event(id).await
    }

    async fn insert_event(&self, event: &AttendanceEvent) -> Result<()> {
        (**self).insert_event(event).await
    }

    async fn update_event(&self, event: &AttendanceEvent) -> Result<()> {
        (**self).update_event(event).await
    }

    async fn delete_event(&self, id: Uuid) -> Result<bool> {
        (**self).delete_event(id).await
    }

    async fn last_alerted_threshold(&self, student_id: &str, kind: EventKind) -> Result<u32> {
        (**self).last_alerted_threshold(student_id, kind).await
    }

    async fn set_last_alerted_threshold(
        &self,
        student_id: &str,
        kind: EventKind,
        threshold: u32,
    ) -> Result<()> {
        (**self)
            .set_last_alerted_threshold(student_id, kind, threshold)
            .await
    }
}

/// Read-only view of the school roster.
pub trait Roster {
    async fn student(&self, student_id: &str) -> Result<Option<Student>>;

    async fn class_sizes(&self) -> Result<HashMap<String, i64>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    /// One writer at a time across all students.
    writer: Arc<Mutex<()>>,
    events: RwLock<Vec<AttendanceEvent>>,
    alerts: RwLock<HashMap<(String, EventKind), u32>>,
    students: RwLock<Vec<Student>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_students(students: Vec<Student>) -> Self {
        Self {
            students: RwLock::new(students),
            ..Self::default()
        }
    }
}

impl EventStore for MemoryStore {
    type StudentLock = OwnedMutexGuard<()>;

    async fn lock_student(&self, _student_id: &str) -> Result<Self::StudentLock> {
        Ok(self.writer.clone().lock_owned().await)
    }

    async fn unlock_student(&self, lock: Self::StudentLock) -> Result<()> {
        drop(lock);
        Ok(())
    }

    async fn events_for_student(
        &self,
        student_id: &str,
        kind: EventKind,
    ) -> Result<Vec<AttendanceEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.student_id == student_id && e.kind == kind)
            .cloned()
            .collect())
    }

    async fn events_on(&self, date: NaiveDate) -> Result<Vec<AttendanceEvent>> {
        let events = self.events.read().await;
        Ok(events.iter().filter(|e| e.date == date).cloned().collect())
    }

    async fn events_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<AttendanceEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.date >= from && e.date <= to)
            .cloned()
            .collect())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<AttendanceEvent>> {
        let events = self.events.read().await;
        Ok(events.iter().find(|e| e.id == id).cloned())
    }

    async fn insert_event(&self, event: &AttendanceEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn update_event(&self, event: &AttendanceEvent) -> Result<()> {
        let mut events = self.events.write().await;
        let slot = events
            .iter_mut()
            .find(|e| e.id == event.id)
            .ok_or(AttendanceError::EventNotFound(event.id))?;
        *slot = event.clone();
        Ok(())
    }

    async fn delete_event(&self, id: Uuid) -> Result<bool> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|e| e.id != id);
        Ok(events.len() != before)
    }

    async fn last_alerted_threshold(&self, student_id: &str, kind: EventKind) -> Result<u32> {
        let alerts = self.alerts.read().await;
        Ok(alerts
            .get(&(student_id.to_string(), kind))
            .copied()
            .unwrap_or(0))
    }

    async fn set_last_alerted_threshold(
        &self,
        student_id: &str,
        kind: EventKind,
        threshold: u32,
    ) -> Result<()> {
        self.alerts
            .write()
            .await
            .insert((student_id.to_string(), kind), threshold);
        Ok(())
    }
}

impl Roster for MemoryStore {
    async fn student(&self, student_id: &str) -> Result<Option<Student>> {
        let students = self.students.read().await;
        Ok(students.iter().find(|s| s.id == student_id).cloned())
    }

    async fn class_sizes(&self) -> Result<HashMap<String, i64>> {
        let students = self.students.read().await;
        let mut sizes = HashMap::new();
        for student in students.iter() {
            *sizes.entry(student.class_room.clone()).or_insert(0) += 1;
        }
        Ok(sizes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(id: &str, class_room: &str) -> Student {
        Student {
            id: id.to_string(),
            name: format!("طالب {id}"),
            class_room: class_room.to_string(),
            grade: "الأول".to_string(),
            guardian_phone: None,
        }
    }

    #[tokio::test]
    async fn events_round_through_memory_store() {
        let store = MemoryStore::new();
        let s = student("1", "1/1");
        let date = NaiveDate::from_ymd_opt(2025, 12, 22).unwrap();
        let absence = AttendanceEvent::absence(&s, date, None);
        let late = AttendanceEvent::late(&s, date, "07:20", 20);
        store.insert_event(&absence).await.unwrap();
        store.insert_event(&late).await.unwrap();

        assert_eq!(store.events_for_student("1", EventKind::Late).await.unwrap().len(), 1);
        assert_eq!(store.events_on(date).await.unwrap().len(), 2);
        assert!(store.delete_event(absence.id).await.unwrap());
        assert!(!store.delete_event(absence.id).await.unwrap());
        assert!(store.get_event(absence.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn updating_missing_event_fails() {
        let store = MemoryStore::new();
        let event = AttendanceEvent::absence(
            &student("1", "1/1"),
            NaiveDate::from_ymd_opt(2025, 12, 22).unwrap(),
            None,
        );
        assert!(matches!(
            store.update_event(&event).await,
            Err(AttendanceError::EventNotFound(_))
        ));
    }

    #[tokio::test]
    async fn alert_state_is_per_student_and_kind() {
        let store = MemoryStore::new();
        store.set_last_alerted_threshold("1", EventKind::Absence, 5).await.unwrap();
        assert_eq!(store.last_alerted_threshold("1", EventKind::Absence).await.unwrap(), 5);
        assert_eq!(store.last_alerted_threshold("1", EventKind::Late).await.unwrap(), 0);
        assert_eq!(store.last_alerted_threshold("2", EventKind::Absence).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn student_lock_excludes_second_writer() {
        let store = Arc::new(MemoryStore::new());
        let held = store.lock_student("1").await.unwrap();

        tokio::select! {
            biased;
            _ = store.lock_student("1") => panic!("second writer entered while the lock was held"),
            _ = tokio::task::yield_now() => {}
        }

        store.unlock_student(held).await.unwrap();
        let again = store.lock_student("1").await.unwrap();
        store.unlock_student(again).await.unwrap();
    }

    #[tokio::test]
    async fn roster_counts_class_sizes() {
        let store = MemoryStore::with_students(vec![
            student("1", "1/1"),
            student("2", "1/1"),
            student("3", "1/2"),
        ]);
        let sizes = store.class_sizes().await.unwrap();
        assert_eq!(sizes["1/1"], 2);
        assert_eq!(sizes["1/2"], 1);
        assert!(store.student("3").await.unwrap().is_some());
    }
}
