//! Session expansion
//!
//! Turns a weekly [`ScheduleSpec`] into concrete dated session drafts.
//! Pure and deterministic: the output depends only on the arguments.

use chrono::NaiveDate;
use roster_common::time::weekday_index;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::parser::{weekday_label, ScheduleSpec, TimeWindow};

/// A regular session not yet persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDraft {
    pub class_id: Uuid,
    /// 1-based, gap-free
    pub seq_no: i64,
    pub date: NaiveDate,
    pub weekday_label: String,
    pub time: Option<TimeWindow>,
}

/// Expand a schedule over the inclusive range `[from, to]`
///
/// One draft per date whose weekday is in the schedule, numbered from 1 and
/// capped at `max_count`. An empty weekday set yields no drafts: unlike date
/// validation, expansion never falls back to "every day".
pub fn expand(
    spec: &ScheduleSpec,
    class_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
    max_count: usize,
) -> Vec<SessionDraft> {
    if spec.is_empty() || from > to || max_count == 0 {
        return Vec::new();
    }

    from.iter_days()
        .take_while(|date| *date <= to)
        .filter(|date| spec.includes(*date))
        .take(max_count)
        .enumerate()
        .map(|(idx, date)| SessionDraft {
            class_id,
            seq_no: idx as i64 + 1,
            date,
            weekday_label: weekday_label(weekday_index(date)),
            time: spec.time,
        })
        .collect()
}
