//! Absence and lateness escalation engine for the MOTABEA school system.
//!
//! The computation modules (`clock`, `streak`, `policy`, `report`,
//! `messages`, `token`) are pure. `escalation` ties them to an
//! [`store::EventStore`], and `db` provides the Postgres store.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod escalation;
pub mod messages;
pub mod models;
pub mod policy;
pub mod report;
pub mod store;
pub mod streak;
pub mod token;

pub use error::{AttendanceError, Result};
