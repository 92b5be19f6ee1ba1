//! Weekly schedule handling
//!
//! - `parser`: free-text schedule description -> [`ScheduleSpec`]
//! - `expander`: [`ScheduleSpec`] + date range -> numbered session drafts

pub mod expander;
pub mod parser;

pub use expander::{expand, SessionDraft};
pub use parser::{weekday_label, ScheduleSpec, TimeWindow};
