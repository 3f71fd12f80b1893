use std::collections::HashMap;
use std::path::Path;

use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::compute_late_minutes;
use crate::error::{AttendanceError, Result};
use crate::models::{AttendanceEvent, EventKind, EventStatus, Student};
use crate::store::{EventStore, Roster};

/// First key of the advisory lock pair, so student locks cannot collide with
/// other applications' advisory locks on the same database.
const STUDENT_LOCK_CLASS: i32 = 0x4d4f_5441;

const EVENT_COLUMNS: &str = "id, student_id, student_name, class_room, event_date, kind, \
     arrival_time, late_minutes, period, status";

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed event store and roster.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn upsert_student(&self, student: &Student) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO motabea.students (id, full_name, class_room, grade, guardian_phone)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                class_room = EXCLUDED.class_room,
                grade = EXCLUDED.grade,
                guardian_phone = EXCLUDED.guardian_phone
            "#,
        )
        .bind(&student.id)
        .bind(&student.name)
        .bind(&student.class_room)
        .bind(&student.grade)
        .bind(&student.guardian_phone)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_with_source(
        &self,
        event: &AttendanceEvent,
        source_key: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO motabea.attendance_events
            (id, student_id, student_name, class_room, event_date, kind,
             arrival_time, late_minutes, period, status, source_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(&event.student_id)
        .bind(&event.student_name)
        .bind(&event.class_room)
        .bind(event.date)
        .bind(event.kind.as_str())
        .bind(&event.arrival_time)
        .bind(event.late_minutes.map(|m| m as i32))
        .bind(&event.period)
        .bind(event.status.as_str())
        .bind(source_key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fetch_events(
        &self,
        filter: &str,
        binds: EventFilter<'_>,
    ) -> Result<Vec<AttendanceEvent>> {
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM motabea.attendance_events WHERE {filter} \
             ORDER BY event_date, created_at"
        );
        let rows = match binds {
            EventFilter::Student(student_id, kind) => {
                sqlx::query(&query)
                    .bind(student_id)
                    .bind(kind.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            EventFilter::Range(from, to) => {
                sqlx::query(&query)
                    .bind(from)
                    .bind(to)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(event_from_row).collect()
    }
}

enum EventFilter<'a> {
    Student(&'a str, EventKind),
    Range(NaiveDate, NaiveDate),
}

fn decode_error(message: String) -> AttendanceError {
    AttendanceError::Storage(sqlx::Error::Decode(message.into()))
}

fn event_from_row(row: &PgRow) -> Result<AttendanceEvent> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let late_minutes: Option<i32> = row.try_get("late_minutes")?;
    Ok(AttendanceEvent {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        student_name: row.try_get("student_name")?,
        class_room: row.try_get("class_room")?,
        date: row.try_get("event_date")?,
        kind: EventKind::parse(&kind)
            .ok_or_else(|| decode_error(format!("unknown event kind '{kind}'")))?,
        arrival_time: row.try_get("arrival_time")?,
        late_minutes: late_minutes.map(|m| m.max(0) as u32),
        period: row.try_get("period")?,
        status: EventStatus::parse(&status)
            .ok_or_else(|| decode_error(format!("unknown event status '{status}'")))?,
    })
}

impl EventStore for PgStore {
    /// Open transaction holding `pg_advisory_xact_lock` for the student.
    /// Committing or dropping it releases the lock.
    type StudentLock = Transaction<'static, Postgres>;

    async fn lock_student(&self, student_id: &str) -> Result<Self::StudentLock> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1, hashtext($2))")
            .bind(STUDENT_LOCK_CLASS)
            .bind(student_id)
            .execute(&mut *tx)
            .await?;
        debug!(student_id, "student lock acquired");
        Ok(tx)
    }

    async fn unlock_student(&self, lock: Self::StudentLock) -> Result<()> {
        lock.commit().await?;
        Ok(())
    }

    async fn events_for_student(
        &self,
        student_id: &str,
        kind: EventKind,
    ) -> Result<Vec<AttendanceEvent>> {
        let filter = EventFilter::Student(student_id, kind);
        self.fetch_events("student_id = $1 AND kind = $2", filter)
            .await
    }

    async fn events_on(&self, date: NaiveDate) -> Result<Vec<AttendanceEvent>> {
        self.events_between(date, date).await
    }

    async fn events_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<AttendanceEvent>> {
        let filter = EventFilter::Range(from, to);
        self.fetch_events("event_date >= $1 AND event_date <= $2", filter)
            .await
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<AttendanceEvent>> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM motabea.attendance_events WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn insert_event(&self, event: &AttendanceEvent) -> Result<()> {
        self.insert_with_source(event, None).await?;
        Ok(())
    }

    async fn update_event(&self, event: &AttendanceEvent) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE motabea.attendance_events
            SET arrival_time = $2, late_minutes = $3, period = $4, status = $5
            WHERE id = $1
            "#,
        )
        .bind(event.id)
        .bind(&event.arrival_time)
        .bind(event.late_minutes.map(|m| m as i32))
        .bind(&event.period)
        .bind(event.status.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AttendanceError::EventNotFound(event.id));
        }
        Ok(())
    }

    async fn delete_event(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM motabea.attendance_events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn last_alerted_threshold(&self, student_id: &str, kind: EventKind) -> Result<u32> {
        let value: Option<i32> = sqlx::query(
            "SELECT last_alerted_threshold FROM motabea.alert_states \
             WHERE student_id = $1 AND kind = $2",
        )
        .bind(student_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(|row| row.try_get("last_alerted_threshold"))
        .transpose()?;
        Ok(value.unwrap_or(0).max(0) as u32)
    }

    async fn set_last_alerted_threshold(
        &self,
        student_id: &str,
        kind: EventKind,
        threshold: u32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO motabea.alert_states (student_id, kind, last_alerted_threshold)
            VALUES ($1, $2, $3)
            ON CONFLICT (student_id, kind) DO UPDATE
            SET last_alerted_threshold = EXCLUDED.last_alerted_threshold, updated_at = now()
            "#,
        )
        .bind(student_id)
        .bind(kind.as_str())
        .bind(threshold as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

impl Roster for PgStore {
    async fn student(&self, student_id: &str) -> Result<Option<Student>> {
        let row = sqlx::query(
            "SELECT id, full_name, class_room, grade, guardian_phone \
             FROM motabea.students WHERE id = $1",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Student {
            id: row.try_get("id")?,
            name: row.try_get("full_name")?,
            class_room: row.try_get("class_room")?,
            grade: row.try_get("grade")?,
            guardian_phone: row.try_get("guardian_phone")?,
        }))
    }

    async fn class_sizes(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(
            "SELECT class_room, COUNT(*) AS students FROM motabea.students GROUP BY class_room",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut sizes: HashMap<String, i64> = HashMap::new();
        for row in rows {
            let class_room: String = row.try_get("class_room")?;
            let count: i64 = row.try_get("students")?;
            sizes.insert(class_room, count);
        }
        Ok(sizes)
    }
}

pub async fn seed(store: &PgStore) -> Result<()> {
    let students = vec![
        Student {
            id: "1100231".to_string(),
            name: "عبدالرحمن سالم الدوسري".to_string(),
            class_room: "1/1".to_string(),
            grade: "الأول المتوسط".to_string(),
            guardian_phone: Some("0551234001".to_string()),
        },
        Student {
            id: "1100232".to_string(),
            name: "يوسف خالد الشهري".to_string(),
            class_room: "1/1".to_string(),
            grade: "الأول المتوسط".to_string(),
            guardian_phone: Some("0551234002".to_string()),
        },
        Student {
            id: "1200410".to_string(),
            name: "ريان فهد المطيري".to_string(),
            class_room: "2/3".to_string(),
            grade: "الثاني المتوسط".to_string(),
            guardian_phone: None,
        },
    ];

    for student in &students {
        store.upsert_student(student).await?;
    }

    let monday = NaiveDate::from_ymd_opt(2025, 12, 22)
        .ok_or_else(|| AttendanceError::InvalidDate("2025-12-22".to_string()))?;
    let tuesday = monday + Duration::days(1);
    let seeded = vec![
        ("seed-001", AttendanceEvent::absence(&students[0], monday, None)),
        ("seed-002", AttendanceEvent::absence(&students[0], tuesday, None)),
        ("seed-003", AttendanceEvent::late(&students[1], monday, "07:25", 25)),
        ("seed-004", AttendanceEvent::late(&students[2], tuesday, "07:10", 10)),
    ];

    for (source_key, event) in &seeded {
        store.insert_with_source(event, Some(*source_key)).await?;
    }
    info!(students = students.len(), events = seeded.len(), "seed data inserted");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CsvEventRow {
    pub student_id: String,
    pub student_name: String,
    pub class_room: String,
    pub grade: String,
    pub guardian_phone: Option<String>,
    pub date: NaiveDate,
    pub kind: EventKind,
    pub arrival_time: Option<String>,
    pub period: Option<String>,
    pub source_key: Option<String>,
}

impl CsvEventRow {
    fn student(&self) -> Student {
        Student {
            id: self.student_id.clone(),
            name: self.student_name.clone(),
            class_room: self.class_room.clone(),
            grade: self.grade.clone(),
            guardian_phone: self.guardian_phone.clone(),
        }
    }

    /// The row's own `source_key`, or one derived from its content so that
    /// re-importing the same file does not duplicate keyless rows.
    pub fn source_key(&self) -> String {
        if let Some(key) = self.source_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            return key.to_string();
        }
        format!(
            "import:{}|{}|{}|{}",
            self.student_id.trim(),
            self.date,
            self.kind.as_str(),
            self.period.as_deref().unwrap_or_default().trim()
        )
    }

    /// Late rows need an arrival time; the minutes are recomputed here.
    pub fn to_event(&self, expected_time: &str) -> Result<AttendanceEvent> {
        let student = self.student();
        match self.kind {
            EventKind::Absence => Ok(AttendanceEvent::absence(
                &student,
                self.date,
                self.period.clone(),
            )),
            EventKind::Late => {
                let arrival = self.arrival_time.as_deref().unwrap_or_default();
                let minutes = compute_late_minutes(arrival, expected_time)?;
                Ok(AttendanceEvent::late(&student, self.date, arrival.trim(), minutes))
            }
        }
    }
}

pub fn read_events_csv(csv_path: &Path) -> Result<Vec<CsvEventRow>> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<CsvEventRow>() {
        rows.push(result?);
    }
    Ok(rows)
}

pub async fn import_csv(store: &PgStore, csv_path: &Path, expected_time: &str) -> Result<usize> {
    let rows = read_events_csv(csv_path)?;
    let mut inserted = 0usize;

    for row in &rows {
        let event = row.to_event(expected_time)?;
        store.upsert_student(&row.student()).await?;
        let source_key = row.source_key();
        if store.insert_with_source(&event, Some(&source_key)).await? {
            inserted += 1;
        } else {
            debug!(%source_key, "row already imported");
        }
    }

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
student_id,student_name,class_room,grade,guardian_phone,date,kind,arrival_time,period,source_key
1100231,عبدالرحمن,1/1,الأول,0551234001,2025-12-22,absence,,الحصة الأولى,row-1
1100232,يوسف,1/1,الأول,,2025-12-22,late,07:35,,
";

    #[test]
    fn csv_rows_become_events() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let rows = read_events_csv(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].source_key.as_deref(), Some("row-1"));
        assert_eq!(rows[1].guardian_phone, None);

        let absence = rows[0].to_event("07:00").unwrap();
        assert_eq!(absence.kind, EventKind::Absence);
        assert_eq!(absence.period.as_deref(), Some("الحصة الأولى"));

        let late = rows[1].to_event("07:00").unwrap();
        assert_eq!(late.late_minutes, Some(35));
        assert_eq!(late.status, EventStatus::Pending);
    }

    fn keyless_row(kind: EventKind, period: Option<&str>) -> CsvEventRow {
        CsvEventRow {
            student_id: "1100232".to_string(),
            student_name: "يوسف".to_string(),
            class_room: "1/1".to_string(),
            grade: "الأول".to_string(),
            guardian_phone: None,
            date: NaiveDate::from_ymd_opt(2025, 12, 22).unwrap(),
            kind,
            arrival_time: Some("07:35".to_string()),
            period: period.map(str::to_string),
            source_key: None,
        }
    }

    #[test]
    fn keyless_rows_get_a_stable_source_key() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let first = read_events_csv(file.path()).unwrap();
        let second = read_events_csv(file.path()).unwrap();
        assert_eq!(first[0].source_key(), "row-1");
        assert_eq!(first[1].source_key(), second[1].source_key());
        assert_eq!(first[1].source_key(), "import:1100232|2025-12-22|late|");

        let morning = keyless_row(EventKind::Absence, Some("الحصة الأولى"));
        let noon = keyless_row(EventKind::Absence, Some("الحصة الرابعة"));
        assert_ne!(morning.source_key(), noon.source_key());
        assert_ne!(
            keyless_row(EventKind::Late, None).source_key(),
            keyless_row(EventKind::Absence, None).source_key()
        );

        let blank = CsvEventRow {
            source_key: Some("  ".to_string()),
            ..keyless_row(EventKind::Late, None)
        };
        assert_eq!(blank.source_key(), keyless_row(EventKind::Late, None).source_key());
    }

    #[test]
    fn late_row_without_arrival_is_rejected() {
        let row = CsvEventRow {
            student_id: "1".to_string(),
            student_name: "x".to_string(),
            class_room: "1/1".to_string(),
            grade: "الأول".to_string(),
            guardian_phone: None,
            date: NaiveDate::from_ymd_opt(2025, 12, 22).unwrap(),
            kind: EventKind::Late,
            arrival_time: None,
            period: None,
            source_key: None,
        };
        assert!(matches!(
            row.to_event("07:00"),
            Err(AttendanceError::InvalidTime { .. })
        ));
    }
}
