use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AttendanceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Absence,
    Late,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Absence => "absence",
            EventKind::Late => "late",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "absence" => Some(EventKind::Absence),
            "late" => Some(EventKind::Late),
            _ => None,
        }
    }
}

/// Whether the guardian notice or printed form has been produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Notified,
    Printed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Notified => "notified",
            EventStatus::Printed => "printed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(EventStatus::Pending),
            "notified" => Some(EventStatus::Notified),
            "printed" => Some(EventStatus::Printed),
            _ => None,
        }
    }

    /// Moves forward only. Re-applying the current status is a no-op.
    pub fn advance(self, next: EventStatus) -> Result<EventStatus> {
        if next < self {
            return Err(AttendanceError::StatusRegression {
                from: self,
                to: next,
            });
        }
        Ok(next)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: Uuid,
    pub student_id: String,
    pub student_name: String,
    pub class_room: String,
    pub date: NaiveDate,
    pub kind: EventKind,
    pub arrival_time: Option<String>,
    pub late_minutes: Option<u32>,
    pub period: Option<String>,
    pub status: EventStatus,
}

impl AttendanceEvent {
    pub fn absence(student: &Student, date: NaiveDate, period: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id: student.id.clone(),
            student_name: student.name.clone(),
            class_room: student.class_room.clone(),
            date,
            kind: EventKind::Absence,
            arrival_time: None,
            late_minutes: None,
            period,
            status: EventStatus::Pending,
        }
    }

    pub fn late(student: &Student, date: NaiveDate, arrival_time: &str, late_minutes: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id: student.id.clone(),
            student_name: student.name.clone(),
            class_room: student.class_room.clone(),
            date,
            kind: EventKind::Late,
            arrival_time: Some(arrival_time.to_string()),
            late_minutes: Some(late_minutes),
            period: None,
            status: EventStatus::Pending,
        }
    }

    /// A late arrival of zero minutes is recorded but never escalates.
    pub fn is_escalation_eligible(&self) -> bool {
        match self.kind {
            EventKind::Absence => true,
            EventKind::Late => self.late_minutes.unwrap_or(0) > 0,
        }
    }
}

/// Roster entry owned by the school's student registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub class_room: String,
    pub grade: String,
    pub guardian_phone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdScope {
    Consecutive,
    Total,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdEntry {
    pub count: u32,
    pub label: String,
    pub scope: ThresholdScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StudentStats {
    pub total_count: u32,
    pub consecutive_days: u32,
    pub total_minutes: u32,
    pub average_minutes: u32,
    pub most_recent_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertDecision {
    pub should_alert: bool,
    pub threshold: Option<ThresholdEntry>,
}

impl AlertDecision {
    pub fn none() -> Self {
        Self {
            should_alert: false,
            threshold: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_moves_forward_only() {
        assert_eq!(
            EventStatus::Pending.advance(EventStatus::Notified).unwrap(),
            EventStatus::Notified
        );
        assert_eq!(
            EventStatus::Pending.advance(EventStatus::Printed).unwrap(),
            EventStatus::Printed
        );
        assert_eq!(
            EventStatus::Notified.advance(EventStatus::Notified).unwrap(),
            EventStatus::Notified
        );
        assert!(matches!(
            EventStatus::Printed.advance(EventStatus::Pending),
            Err(AttendanceError::StatusRegression { .. })
        ));
    }

    #[test]
    fn on_time_arrival_is_not_eligible() {
        let student = Student {
            id: "1001".to_string(),
            name: "سارة أحمد".to_string(),
            class_room: "1/1".to_string(),
            grade: "الأول".to_string(),
            guardian_phone: None,
        };
        let date = NaiveDate::from_ymd_opt(2025, 12, 22).unwrap();
        assert!(!AttendanceEvent::late(&student, date, "07:00", 0).is_escalation_eligible());
        assert!(AttendanceEvent::late(&student, date, "07:10", 10).is_escalation_eligible());
        assert!(AttendanceEvent::absence(&student, date, None).is_escalation_eligible());
    }

    #[test]
    fn kind_and_status_names_parse_back() {
        assert_eq!(EventKind::parse(EventKind::Late.as_str()), Some(EventKind::Late));
        assert_eq!(
            EventStatus::parse(EventStatus::Printed.as_str()),
            Some(EventStatus::Printed)
        );
        assert_eq!(EventKind::parse("sick"), None);
    }
}
