use chrono::{Duration, NaiveDate};

use crate::models::{AttendanceEvent, StudentStats};

/// Length of the run of back-to-back calendar days ending at the most
/// recent date. Several records on the same day count as one day.
pub fn compute_consecutive_days(dates: &[NaiveDate]) -> u32 {
    let mut sorted = dates.to_vec();
    sorted.sort_by(|a, b| b.cmp(a));
    sorted.dedup();

    let Some(first) = sorted.first() else {
        return 0;
    };

    let mut run = 1;
    let mut previous = *first;
    for date in sorted.iter().skip(1) {
        if previous - *date != Duration::days(1) {
            break;
        }
        run += 1;
        previous = *date;
    }
    run
}

pub fn compute_student_stats(events: &[AttendanceEvent], student_id: &str) -> StudentStats {
    let own: Vec<&AttendanceEvent> = events
        .iter()
        .filter(|event| event.student_id == student_id)
        .collect();

    if own.is_empty() {
        return StudentStats::default();
    }

    let dates: Vec<NaiveDate> = own.iter().map(|event| event.date).collect();
    let total_count = own.len() as u32;
    let total_minutes: u32 = own.iter().filter_map(|event| event.late_minutes).sum();

    StudentStats {
        total_count,
        consecutive_days: compute_consecutive_days(&dates),
        total_minutes,
        average_minutes: (total_minutes as f64 / total_count as f64).round() as u32,
        most_recent_date: dates.iter().max().copied(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventKind, EventStatus};
    use uuid::Uuid;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, d).unwrap()
    }

    fn late_event(student_id: &str, date: NaiveDate, minutes: u32) -> AttendanceEvent {
        AttendanceEvent {
            id: Uuid::new_v4(),
            student_id: student_id.to_string(),
            student_name: "خالد العتيبي".to_string(),
            class_room: "2/3".to_string(),
            date,
            kind: EventKind::Late,
            arrival_time: Some("07:20".to_string()),
            late_minutes: Some(minutes),
            period: None,
            status: EventStatus::Pending,
        }
    }

    #[test]
    fn streak_basics() {
        assert_eq!(compute_consecutive_days(&[]), 0);
        assert_eq!(compute_consecutive_days(&[day(24)]), 1);
        assert_eq!(compute_consecutive_days(&[day(24), day(23), day(22)]), 3);
        assert_eq!(compute_consecutive_days(&[day(24), day(22)]), 1);
    }

    #[test]
    fn streak_ignores_input_order_and_stops_at_gap() {
        let dates = [day(10), day(22), day(24), day(23), day(9)];
        assert_eq!(compute_consecutive_days(&dates), 3);
    }

    #[test]
    fn same_day_records_count_once() {
        let dates = [day(24), day(24), day(23)];
        assert_eq!(compute_consecutive_days(&dates), 2);
    }

    #[test]
    fn streak_crosses_month_boundary() {
        let dates = [
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
        ];
        assert_eq!(compute_consecutive_days(&dates), 2);
    }

    #[test]
    fn stats_only_count_the_requested_student() {
        let events = vec![
            late_event("s1", day(22), 10),
            late_event("s1", day(23), 5),
            late_event("s2", day(23), 40),
        ];
        let stats = compute_student_stats(&events, "s1");
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.consecutive_days, 2);
        assert_eq!(stats.total_minutes, 15);
        assert_eq!(stats.average_minutes, 8);
        assert_eq!(stats.most_recent_date, Some(day(23)));
    }

    #[test]
    fn stats_for_unknown_student_are_zero() {
        let stats = compute_student_stats(&[late_event("s1", day(22), 10)], "missing");
        assert_eq!(stats, StudentStats::default());
        assert_eq!(stats.most_recent_date, None);
    }
}
