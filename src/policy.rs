//! Threshold policy deciding when a student's running count escalates.
//!
//! The table is ordered by `count`. A decision always reports the most
//! advanced threshold the student currently satisfies, and fires only when
//! that threshold is above the one already notified. Thresholds skipped over
//! in a single jump are not replayed.

use serde::{Deserialize, Serialize};

use crate::error::{AttendanceError, Result};
use crate::models::{AlertDecision, StudentStats, ThresholdEntry, ThresholdScope};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdTable {
    entries: Vec<ThresholdEntry>,
}

impl ThresholdTable {
    pub fn new(entries: Vec<ThresholdEntry>) -> Result<Self> {
        let table = Self { entries };
        table.validate()?;
        Ok(table)
    }

    /// Absence checkpoints: guidance referral, guardian summons, education office.
    pub fn absence_default() -> Self {
        Self {
            entries: vec![
                entry(3, "تحويل إلى الموجه الطلابي", ThresholdScope::Consecutive),
                entry(5, "استدعاء ولي الأمر", ThresholdScope::Total),
                entry(10, "إشعار مكتب التعليم", ThresholdScope::Total),
            ],
        }
    }

    pub fn lateness_default() -> Self {
        Self {
            entries: vec![
                entry(5, "تنبيه أول", ThresholdScope::Total),
                entry(10, "تنبيه ثاني", ThresholdScope::Total),
                entry(15, "استدعاء ولي الأمر", ThresholdScope::Total),
                entry(20, "إحالة إلى لجنة التوجيه", ThresholdScope::Total),
            ],
        }
    }

    pub fn entries(&self) -> &[ThresholdEntry] {
        &self.entries
    }

    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(AttendanceError::InvalidThresholdTable(
                "table must have at least one entry".to_string(),
            ));
        }
        let mut previous = 0;
        for item in &self.entries {
            if item.count == 0 {
                return Err(AttendanceError::InvalidThresholdTable(format!(
                    "'{}' has a zero count",
                    item.label
                )));
            }
            if item.count <= previous {
                return Err(AttendanceError::InvalidThresholdTable(format!(
                    "counts must be strictly ascending ({} after {})",
                    item.count, previous
                )));
            }
            previous = item.count;
        }
        Ok(())
    }
}

fn entry(count: u32, label: &str, scope: ThresholdScope) -> ThresholdEntry {
    ThresholdEntry {
        count,
        label: label.to_string(),
        scope,
    }
}

pub fn evaluate(
    cumulative_count: u32,
    last_alerted_threshold: u32,
    table: &ThresholdTable,
) -> AlertDecision {
    let highest = table
        .entries()
        .iter()
        .filter(|item| item.count <= cumulative_count)
        .max_by_key(|item| item.count);
    decide(highest, last_alerted_threshold)
}

/// Same rule as [`evaluate`], but each entry is checked against the count
/// its scope names: the current streak or the running total.
pub fn evaluate_stats(
    stats: &StudentStats,
    last_alerted_threshold: u32,
    table: &ThresholdTable,
) -> AlertDecision {
    let highest = table
        .entries()
        .iter()
        .filter(|item| {
            let count = match item.scope {
                ThresholdScope::Consecutive => stats.consecutive_days,
                ThresholdScope::Total => stats.total_count,
            };
            item.count <= count
        })
        .max_by_key(|item| item.count);
    decide(highest, last_alerted_threshold)
}

fn decide(highest: Option<&ThresholdEntry>, last_alerted_threshold: u32) -> AlertDecision {
    match highest {
        Some(item) if item.count > last_alerted_threshold => AlertDecision {
            should_alert: true,
            threshold: Some(item.clone()),
        },
        _ => AlertDecision::none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(counts: &[u32]) -> ThresholdTable {
        ThresholdTable::new(
            counts
                .iter()
                .map(|count| entry(*count, &format!("t{count}"), ThresholdScope::Total))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn fires_for_reached_threshold_once() {
        let t = table(&[3, 5, 10]);
        let first = evaluate(5, 0, &t);
        assert!(first.should_alert);
        assert_eq!(first.threshold.unwrap().count, 5);

        let again = evaluate(5, 5, &t);
        assert!(!again.should_alert);
        assert!(again.threshold.is_none());
    }

    #[test]
    fn jump_fires_only_the_highest_threshold() {
        let decision = evaluate(12, 0, &table(&[3, 5, 10]));
        assert!(decision.should_alert);
        assert_eq!(decision.threshold.unwrap().count, 10);
    }

    #[test]
    fn below_first_threshold_is_quiet() {
        assert_eq!(evaluate(2, 0, &table(&[3, 5, 10])), AlertDecision::none());
    }

    #[test]
    fn growth_past_notified_threshold_does_not_refire() {
        let t = table(&[3, 5, 10]);
        assert!(!evaluate(4, 3, &t).should_alert);
        assert!(!evaluate(9, 5, &t).should_alert);
        assert!(evaluate(10, 5, &t).should_alert);
    }

    #[test]
    fn scoped_evaluation_uses_streak_for_consecutive_entries() {
        let t = ThresholdTable::absence_default();
        let streak = StudentStats {
            total_count: 3,
            consecutive_days: 3,
            ..StudentStats::default()
        };
        let decision = evaluate_stats(&streak, 0, &t);
        assert_eq!(decision.threshold.unwrap().count, 3);

        let scattered = StudentStats {
            total_count: 4,
            consecutive_days: 1,
            ..StudentStats::default()
        };
        assert!(!evaluate_stats(&scattered, 0, &t).should_alert);

        let many = StudentStats {
            total_count: 5,
            consecutive_days: 1,
            ..StudentStats::default()
        };
        assert_eq!(evaluate_stats(&many, 3, &t).threshold.unwrap().count, 5);
    }

    #[test]
    fn tables_are_validated() {
        assert!(ThresholdTable::absence_default().validate().is_ok());
        assert!(ThresholdTable::lateness_default().validate().is_ok());
        assert!(ThresholdTable::new(vec![]).is_err());
        assert!(ThresholdTable::new(vec![
            entry(5, "a", ThresholdScope::Total),
            entry(3, "b", ThresholdScope::Total),
        ])
        .is_err());
        assert!(ThresholdTable::new(vec![entry(0, "zero", ThresholdScope::Total)]).is_err());
    }

    #[test]
    fn table_loads_from_json() {
        let raw = r#"[
            {"count": 2, "label": "x", "scope": "consecutive"},
            {"count": 4, "label": "y", "scope": "total"}
        ]"#;
        let parsed: ThresholdTable = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.entries().len(), 2);
        assert_eq!(parsed.entries()[0].scope, ThresholdScope::Consecutive);
    }
}
