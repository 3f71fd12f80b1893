//! Time-boxed tokens for quick-access attendance links.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{AttendanceError, Result};

const TOKEN_BYTES: usize = 16;
const DEFAULT_LIFETIME_MINUTES: i64 = 60;

/// One week. Longer links belong to a proper account, not a shared token.
pub const MAX_TOKEN_LIFETIME_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Valid,
    /// Terminal. A fresh token has to be issued.
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> TokenState {
        if self.is_expired_at(now) {
            TokenState::Expired
        } else {
            TokenState::Valid
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenIssuer {
    lifetime: Duration,
}

impl TokenIssuer {
    /// Teacher links use 15, 30, 45 or 60 minutes; quick access uses 60.
    ///
    /// Fails with [`AttendanceError::InvalidTokenLifetime`] unless
    /// `1 <= minutes <= MAX_TOKEN_LIFETIME_MINUTES`.
    pub fn from_minutes(minutes: i64) -> Result<Self> {
        if !(1..=MAX_TOKEN_LIFETIME_MINUTES).contains(&minutes) {
            return Err(AttendanceError::InvalidTokenLifetime(minutes));
        }
        Ok(Self {
            lifetime: Duration::minutes(minutes),
        })
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn issue(&self) -> AccessToken {
        self.issue_at(Utc::now())
    }

    pub fn issue_at(&self, now: DateTime<Utc>) -> AccessToken {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        AccessToken {
            token: hex::encode(bytes),
            issued_at: now,
            expires_at: now
                .checked_add_signed(self.lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

impl Default for TokenIssuer {
    fn default() -> Self {
        Self {
            lifetime: Duration::minutes(DEFAULT_LIFETIME_MINUTES),
        }
    }
}
