//! HTTP API handlers for roster-engine

pub mod attendance;
pub mod error;
pub mod health;
pub mod remediations;
pub mod sessions;
pub mod students;

pub use attendance::{delete_attendance, get_attendance, save_attendance};
pub use error::ApiError;
pub use health::health_routes;
pub use remediations::{remediation_history, transition_remediation};
pub use sessions::{
    append_makeup_session, cancel_session, expand_sessions, holiday_covering, list_sessions,
};
pub use students::{recalculate_balance, student_balance, student_remediations};
