use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{AttendanceEvent, EventKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub total_count: u32,
    /// Over events carrying late minutes only.
    pub average_minutes: u32,
    pub by_class_room: BTreeMap<String, Vec<AttendanceEvent>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentRangeRow {
    pub student_id: String,
    pub student_name: String,
    pub class_room: String,
    pub absences: u32,
    pub late_days: u32,
    pub late_minutes: u32,
}

impl StudentRangeRow {
    pub fn total(&self) -> u32 {
        self.absences + self.late_days
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeSummary {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub absence_count: u32,
    pub late_count: u32,
    pub students: Vec<StudentRangeRow>,
}

fn rounded_average(total: u32, count: u32) -> u32 {
    if count == 0 {
        0
    } else {
        (total as f64 / count as f64).round() as u32
    }
}

pub fn aggregate_by_date(events: &[AttendanceEvent], date: NaiveDate) -> DailyAggregate {
    let mut by_class_room: BTreeMap<String, Vec<AttendanceEvent>> = BTreeMap::new();
    let mut total_minutes = 0u32;
    let mut timed = 0u32;

    for event in events.iter().filter(|event| event.date == date) {
        if let Some(minutes) = event.late_minutes {
            total_minutes += minutes;
            timed += 1;
        }
        by_class_room
            .entry(event.class_room.clone())
            .or_default()
            .push(event.clone());
    }

    DailyAggregate {
        date,
        total_count: by_class_room.values().map(|list| list.len() as u32).sum(),
        average_minutes: rounded_average(total_minutes, timed),
        by_class_room,
    }
}

/// Matching records on `date` as a rounded whole percentage of the class size,
/// capped at 100. Each record counts, so a student absent for two periods
/// counts twice.
pub fn class_percentage(
    events: &[AttendanceEvent],
    class_room: &str,
    total_students_in_class: i64,
    date: NaiveDate,
) -> u32 {
    if total_students_in_class <= 0 {
        return 0;
    }
    let matching = events
        .iter()
        .filter(|event| event.class_room == class_room && event.date == date)
        .count();
    let percentage = (100.0 * matching as f64 / total_students_in_class as f64).round();
    percentage.min(100.0) as u32
}

/// Per-student totals for a weekly or monthly view, inclusive of both ends.
pub fn aggregate_range(
    events: &[AttendanceEvent],
    from: NaiveDate,
    to: NaiveDate,
) -> RangeSummary {
    let mut rows: HashMap<String, StudentRangeRow> = HashMap::new();
    let mut absence_count = 0;
    let mut late_count = 0;

    for event in events.iter().filter(|e| e.date >= from && e.date <= to) {
        let row = rows
            .entry(event.student_id.clone())
            .or_insert_with(|| StudentRangeRow {
                student_id: event.student_id.clone(),
                student_name: event.student_name.clone(),
                class_room: event.class_room.clone(),
                absences: 0,
                late_days: 0,
                late_minutes: 0,
            });
        match event.kind {
            EventKind::Absence => {
                row.absences += 1;
                absence_count += 1;
            }
            EventKind::Late => {
                row.late_days += 1;
                row.late_minutes += event.late_minutes.unwrap_or(0);
                late_count += 1;
            }
        }
    }

    let mut students: Vec<StudentRangeRow> = rows.into_values().collect();
    students.sort_by(|a, b| {
        b.total()
            .cmp(&a.total())
            .then_with(|| a.student_name.cmp(&b.student_name))
    });

    RangeSummary {
        from,
        to,
        absence_count,
        late_count,
        students,
    }
}

/// Markdown daily sheet handed to the print/export layer.
pub fn build_daily_report(
    date: NaiveDate,
    events: &[AttendanceEvent],
    class_sizes: &BTreeMap<String, i64>,
) -> String {
    let aggregate = aggregate_by_date(events, date);
    let mut output = String::new();

    let _ = writeln!(output, "# التقرير اليومي للغياب والتأخر");
    let _ = writeln!(output, "التاريخ: {}", date);
    let _ = writeln!(output);
    let _ = writeln!(output, "- إجمالي الحالات: {}", aggregate.total_count);
    let _ = writeln!(
        output,
        "- متوسط دقائق التأخر: {}",
        aggregate.average_minutes
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## حسب الفصل");

    if aggregate.by_class_room.is_empty() {
        let _ = writeln!(output, "لا توجد حالات مسجلة في هذا اليوم.");
        return output;
    }

    for (class_room, list) in &aggregate.by_class_room {
        let size = class_sizes.get(class_room).copied().unwrap_or(0);
        let absences = list.iter().filter(|e| e.kind == EventKind::Absence).count();
        let lates = list.len() - absences;
        let _ = writeln!(
            output,
            "- {}: غياب {}، تأخر {} ({}% من الفصل)",
            class_room,
            absences,
            lates,
            class_percentage(events, class_room, size, date)
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## تفاصيل الحالات");
    for list in aggregate.by_class_room.values() {
        let mut sorted = list.clone();
        sorted.sort_by(|a, b| a.student_name.cmp(&b.student_name));
        for event in sorted {
            match event.kind {
                EventKind::Absence => {
                    let _ = writeln!(
                        output,
                        "- {} ({}): غياب",
                        event.student_name, event.class_room
                    );
                }
                EventKind::Late => {
                    let _ = writeln!(
                        output,
                        "- {} ({}): تأخر {} دقيقة، الحضور {}",
                        event.student_name,
                        event.class_room,
                        event.late_minutes.unwrap_or(0),
                        event.arrival_time.as_deref().unwrap_or("-")
                    );
                }
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventStatus;
    use uuid::Uuid;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, d).unwrap()
    }

    fn event(
        student: &str,
        class_room: &str,
        date: NaiveDate,
        late: Option<u32>,
    ) -> AttendanceEvent {
        AttendanceEvent {
            id: Uuid::new_v4(),
            student_id: student.to_string(),
            student_name: format!("طالب {student}"),
            class_room: class_room.to_string(),
            date,
            kind: if late.is_some() {
                EventKind::Late
            } else {
                EventKind::Absence
            },
            arrival_time: late.map(|_| "07:30".to_string()),
            late_minutes: late,
            period: None,
            status: EventStatus::Pending,
        }
    }

    #[test]
    fn groups_same_day_events_by_class() {
        let events = vec![
            event("a", "1/1", day(22), Some(10)),
            event("b", "1/1", day(22), None),
            event("c", "1/2", day(22), Some(15)),
            event("d", "1/2", day(23), Some(40)),
        ];
        let aggregate = aggregate_by_date(&events, day(22));
        assert_eq!(aggregate.total_count, 3);
        assert_eq!(aggregate.average_minutes, 13);
        assert_eq!(aggregate.by_class_room["1/1"].len(), 2);
        assert_eq!(aggregate.by_class_room["1/2"].len(), 1);
    }

    #[test]
    fn empty_day_is_all_zero() {
        let aggregate = aggregate_by_date(&[], day(22));
        assert_eq!(aggregate.total_count, 0);
        assert_eq!(aggregate.average_minutes, 0);
        assert!(aggregate.by_class_room.is_empty());
    }

    #[test]
    fn percentage_handles_empty_class() {
        assert_eq!(class_percentage(&[], "1/1", 0, day(22)), 0);
        assert_eq!(class_percentage(&[], "1/1", -3, day(22)), 0);
    }

    #[test]
    fn percentage_rounds_to_whole_number() {
        let events = vec![
            event("a", "1/1", day(22), None),
            event("b", "1/1", day(22), Some(5)),
            event("c", "1/2", day(22), None),
        ];
        assert_eq!(class_percentage(&events, "1/1", 3, day(22)), 67);
        assert_eq!(class_percentage(&events, "1/1", 30, day(23)), 0);
    }

    #[test]
    fn percentage_counts_every_matching_record() {
        let events = vec![
            event("a", "1/1", day(22), None),
            event("a", "1/1", day(22), None),
            event("b", "1/1", day(21), None),
        ];
        assert_eq!(class_percentage(&events, "1/1", 3, day(22)), 67);
        assert_eq!(class_percentage(&events, "1/1", 1, day(22)), 100);
    }

    #[test]
    fn range_totals_per_student() {
        let events = vec![
            event("a", "1/1", day(21), None),
            event("a", "1/1", day(22), Some(10)),
            event("a", "1/1", day(23), Some(5)),
            event("b", "1/2", day(22), None),
            event("b", "1/2", day(30), None),
        ];
        let summary = aggregate_range(&events, day(21), day(27));
        assert_eq!(summary.absence_count, 2);
        assert_eq!(summary.late_count, 2);
        assert_eq!(summary.students[0].student_id, "a");
        assert_eq!(summary.students[0].late_minutes, 15);
        assert_eq!(summary.students[1].absences, 1);
    }

    #[test]
    fn daily_report_lists_classes() {
        let events = vec![
            event("a", "1/1", day(22), Some(10)),
            event("b", "1/1", day(22), None),
        ];
        let mut sizes = BTreeMap::new();
        sizes.insert("1/1".to_string(), 4);
        let report = build_daily_report(day(22), &events, &sizes);
        assert!(report.contains("2025-12-22"));
        assert!(report.contains("1/1: غياب 1، تأخر 1 (50% من الفصل)"));

        let empty = build_daily_report(day(22), &[], &sizes);
        assert!(empty.contains("لا توجد حالات"));
    }
}
