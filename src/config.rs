use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::clock::{parse_clock, DEFAULT_EXPECTED_TIME};
use crate::error::Result;
use crate::policy::ThresholdTable;
use crate::token::TokenIssuer;

/// School-wide settings for the escalation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Start of the school day, `HH:MM`.
    pub expected_time: String,
    pub absence_thresholds: ThresholdTable,
    pub lateness_thresholds: ThresholdTable,
    pub token_lifetime_minutes: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expected_time: DEFAULT_EXPECTED_TIME.to_string(),
            absence_thresholds: ThresholdTable::absence_default(),
            lateness_thresholds: ThresholdTable::lateness_default(),
            token_lifetime_minutes: 60,
        }
    }
}

impl EngineConfig {
    /// Reads a JSON file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        parse_clock(&self.expected_time)?;
        self.absence_thresholds.validate()?;
        self.lateness_thresholds.validate()?;
        TokenIssuer::from_minutes(self.token_lifetime_minutes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AttendanceError;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"expected_time": "07:30"}}"#).unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.expected_time, "07:30");
        assert_eq!(config.absence_thresholds, ThresholdTable::absence_default());
        assert_eq!(config.token_lifetime_minutes, 60);
    }

    #[test]
    fn rejects_unsorted_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"lateness_thresholds": [
                {{"count": 10, "label": "a", "scope": "total"}},
                {{"count": 5, "label": "b", "scope": "total"}}
            ]}}"#
        )
        .unwrap();
        assert!(matches!(
            EngineConfig::load(file.path()),
            Err(AttendanceError::InvalidThresholdTable(_))
        ));
    }

    #[test]
    fn example_file_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/engine.example.json");
        assert_eq!(EngineConfig::load(&path).unwrap(), EngineConfig::default());
    }

    #[test]
    fn rejects_bad_start_time() {
        let config = EngineConfig {
            expected_time: "7am".to_string(),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_token_lifetime_out_of_range() {
        for minutes in [0, -30, crate::token::MAX_TOKEN_LIFETIME_MINUTES + 1, i64::MAX] {
            let config = EngineConfig {
                token_lifetime_minutes: minutes,
                ..EngineConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(AttendanceError::InvalidTokenLifetime(_))
            ));
        }

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"token_lifetime_minutes": -30}}"#).unwrap();
        assert!(EngineConfig::load(file.path()).is_err());
    }
}
