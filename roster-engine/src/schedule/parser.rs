//! Free-text weekly schedule parser
//!
//! Class schedules are typed by staff in whatever convention they prefer:
//! `"Thứ 2, 4, 6 (18h-19h30)"`, `"T3-T5 18:00-19:30"`, `"CN 8h-10h"`,
//! `"Mon, Wed 17:30-19:00"`. All of them normalize to a weekday set
//! (0 = Sunday .. 6 = Saturday) plus an optional time window.
//!
//! Parsing never fails. Unrecognized text yields an empty weekday set, which
//! callers treat as "no constraint" when validating dates.

use chrono::{NaiveDate, NaiveTime};
use roster_common::time::weekday_index;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Daily time window of a class meeting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    /// Build a window; `None` unless `start < end`
    pub fn new(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Parse the normalized `HH:MM-HH:MM` form
    pub fn parse(text: &str) -> Option<Self> {
        let (start, end) = text.split_once('-')?;
        let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
        Self::new(start, end)
    }

    pub fn start_label(&self) -> String {
        self.start.format("%H:%M").to_string()
    }

    pub fn end_label(&self) -> String {
        self.end.format("%H:%M").to_string()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_label(), self.end_label())
    }
}

/// Normalized weekly schedule of a class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// Weekday indices, 0 = Sunday .. 6 = Saturday
    pub weekdays: BTreeSet<u8>,
    pub time: Option<TimeWindow>,
}

impl ScheduleSpec {
    /// Parse a free-text schedule description
    pub fn parse(text: &str) -> Self {
        let mut chars: Vec<char> = fold_text(text).chars().collect();
        let time = extract_time_window(&mut chars);
        let remainder: String = chars.into_iter().collect();

        Self {
            weekdays: parse_weekdays(&remainder),
            time,
        }
    }

    /// No weekday was recognized
    pub fn is_empty(&self) -> bool {
        self.weekdays.is_empty()
    }

    /// Whether the schedule places a meeting on `date`
    pub fn includes(&self, date: NaiveDate) -> bool {
        self.weekdays.contains(&weekday_index(date))
    }

    /// Lenient date check: an empty schedule permits any day
    pub fn permits(&self, date: NaiveDate) -> bool {
        self.is_empty() || self.includes(date)
    }
}

/// Localized label stored on each session ("Thứ 2" .. "Thứ 7", "Chủ nhật")
pub fn weekday_label(index: u8) -> String {
    match index {
        0 => "Chủ nhật".to_string(),
        n => format!("Thứ {}", n + 1),
    }
}

/// Lowercase and strip Vietnamese diacritics so "Thứ", "THỨ" and "thu" compare equal
fn fold_text(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .filter_map(fold_char)
        .collect()
}

fn fold_char(c: char) -> Option<char> {
    // Combining marks left over from decomposed input
    if ('\u{0300}'..='\u{036f}').contains(&c) {
        return None;
    }

    let base = match c {
        'à' | 'á' | 'ả' | 'ã' | 'ạ' | 'ă' | 'ằ' | 'ắ' | 'ẳ' | 'ẵ' | 'ặ' | 'â' | 'ầ' | 'ấ' | 'ẩ'
        | 'ẫ' | 'ậ' => 'a',
        'đ' => 'd',
        'è' | 'é' | 'ẻ' | 'ẽ' | 'ẹ' | 'ê' | 'ề' | 'ế' | 'ể' | 'ễ' | 'ệ' => 'e',
        'ì' | 'í' | 'ỉ' | 'ĩ' | 'ị' => 'i',
        'ò' | 'ó' | 'ỏ' | 'õ' | 'ọ' | 'ô' | 'ồ' | 'ố' | 'ổ' | 'ỗ' | 'ộ' | 'ơ' | 'ờ' | 'ớ' | 'ở'
        | 'ỡ' | 'ợ' => 'o',
        'ù' | 'ú' | 'ủ' | 'ũ' | 'ụ' | 'ư' | 'ừ' | 'ứ' | 'ử' | 'ữ' | 'ự' => 'u',
        'ỳ' | 'ý' | 'ỷ' | 'ỹ' | 'ỵ' => 'y',
        other => other,
    };
    Some(base)
}

/// A number that may be a clock time: `18`, `18h`, `18h30`, `18:30`
#[derive(Debug, Clone, Copy)]
struct TimeToken {
    start: usize,
    end: usize,
    time: Option<NaiveTime>,
    /// Carried an explicit `h` or `:` marker
    marked: bool,
}

fn scan_time_tokens(chars: &[char]) -> Vec<TimeToken> {
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let at_word_start = i == 0 || !chars[i - 1].is_alphanumeric();
        if !chars[i].is_ascii_digit() || !at_word_start {
            i += 1;
            continue;
        }

        let start = i;
        let mut j = i;
        while j < chars.len() && chars[j].is_ascii_digit() {
            j += 1;
        }
        // Three or more digits is not an hour
        if j - start > 2 {
            i = j;
            continue;
        }
        let hour: u32 = chars[start..j].iter().collect::<String>().parse().unwrap_or(99);

        let mut minute = 0;
        let mut marked = false;
        if j < chars.len() && (chars[j] == 'h' || chars[j] == ':') {
            marked = true;
            j += 1;
            let minute_start = j;
            while j < chars.len() && chars[j].is_ascii_digit() && j - minute_start < 2 {
                j += 1;
            }
            if j > minute_start {
                minute = chars[minute_start..j]
                    .iter()
                    .collect::<String>()
                    .parse()
                    .unwrap_or(99);
            }
        }

        tokens.push(TimeToken {
            start,
            end: j,
            time: NaiveTime::from_hms_opt(hour, minute, 0),
            marked,
        });
        i = j;
    }

    tokens
}

fn is_range_separator(text: &str) -> bool {
    matches!(text.trim(), "-" | "–" | "—" | "~" | "den" | "to")
}

/// Find the `TIME sep TIME` pair, then blank out every clock-time token
/// so hours such as `7h` are never read as weekday digits.
///
/// A pair with both ends marked wins over one with a bare start hour, so in
/// `Thứ 3, 5, 7 - 18h-19h30` the trailing `7` stays a weekday.
fn extract_time_window(chars: &mut [char]) -> Option<TimeWindow> {
    let tokens = scan_time_tokens(chars);

    let range_pair = |pair: &[TimeToken], both_marked: bool| {
        let (a, b) = (pair[0], pair[1]);
        let marked = if both_marked {
            a.marked && b.marked
        } else {
            a.marked || b.marked
        };
        if !marked {
            return None;
        }
        let between: String = chars[a.end..b.start].iter().collect();
        if !is_range_separator(&between) {
            return None;
        }
        let window = TimeWindow::new(a.time?, b.time?)?;
        Some((window, a.start, b.end))
    };

    let window = tokens
        .windows(2)
        .find_map(|pair| range_pair(pair, true))
        .or_else(|| tokens.windows(2).find_map(|pair| range_pair(pair, false)));

    for token in tokens.iter().filter(|t| t.marked) {
        chars[token.start..token.end].iter_mut().for_each(|c| *c = ' ');
    }

    window.map(|(window, start, end)| {
        chars[start..end].iter_mut().for_each(|c| *c = ' ');
        window
    })
}

fn parse_weekdays(text: &str) -> BTreeSet<u8> {
    let tokens: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let mut days = BTreeSet::new();
    // Set after "thứ <ordinal>" so a list like "thứ hai, tư, sáu" keeps
    // reading ordinals until some other word shows up.
    let mut in_thu_list = false;
    let mut i = 0;

    while i < tokens.len() {
        if in_thu_list {
            if let Some(day) = vietnamese_ordinal(tokens[i]) {
                days.insert(day);
                i += 1;
                continue;
            }
            in_thu_list = false;
        }

        match tokens[i] {
            // "thứ 2" / "thứ hai" prefix; bare "thu" is the English abbreviation
            "thu" => match tokens.get(i + 1).and_then(|next| vietnamese_ordinal(next)) {
                Some(day) => {
                    days.insert(day);
                    in_thu_list = true;
                    i += 2;
                    continue;
                }
                None => {
                    days.insert(4);
                }
            },
            "chu" if tokens.get(i + 1) == Some(&"nhat") => {
                days.insert(0);
                i += 2;
                continue;
            }
            token => {
                if let Some(day) = token_weekday(token) {
                    days.insert(day);
                }
            }
        }
        i += 1;
    }

    days
}

/// Ordinal following "thứ": digits 2-7 or the spelled-out numbers
fn vietnamese_ordinal(token: &str) -> Option<u8> {
    match token {
        "hai" => Some(1),
        "ba" => Some(2),
        "tu" => Some(3),
        "nam" => Some(4),
        "sau" => Some(5),
        "bay" => Some(6),
        _ => digit_weekday(token),
    }
}

/// Business day numbering: 2 = Monday .. 7 = Saturday
fn digit_weekday(token: &str) -> Option<u8> {
    match token.parse::<u8>() {
        Ok(n @ 2..=7) => Some(n - 1),
        _ => None,
    }
}

fn token_weekday(token: &str) -> Option<u8> {
    if let Some(day) = digit_weekday(token) {
        return Some(day);
    }

    // T2 .. T7
    if let Some(rest) = token.strip_prefix('t') {
        if let Some(day) = digit_weekday(rest) {
            return Some(day);
        }
    }

    match token {
        "cn" | "sunday" | "sun" | "su" => Some(0),
        "monday" | "mon" | "mo" => Some(1),
        "tuesday" | "tues" | "tue" | "tu" => Some(2),
        "wednesday" | "wed" | "we" => Some(3),
        "thursday" | "thurs" | "thur" | "th" => Some(4),
        "friday" | "fri" | "fr" => Some(5),
        "saturday" | "sat" | "sa" => Some(6),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn days(spec: &ScheduleSpec) -> Vec<u8> {
        spec.weekdays.iter().copied().collect()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_vietnamese_digit_list_with_time() {
        let spec = ScheduleSpec::parse("Thứ 2, 4, 6 (18h-19h30)");
        assert_eq!(days(&spec), vec![1, 3, 5]);
        assert_eq!(spec.time.unwrap().to_string(), "18:00-19:30");
    }

    #[test]
    fn test_conventions_normalize_to_same_set() {
        let expected = vec![1, 3, 5];
        for text in [
            "Thứ 2, 4, 6",
            "thu 2 - thu 4 - thu 6",
            "T2, T4, T6",
            "t2/t4/t6",
            "2-4-6",
            "Thứ hai, thứ tư, thứ sáu",
            "Thứ hai, tư, sáu",
            "Mon, Wed, Fri",
            "Monday Wednesday Friday",
            "Mo We Fr",
        ] {
            assert_eq!(days(&ScheduleSpec::parse(text)), expected, "text: {}", text);
        }
    }

    #[test]
    fn test_sunday_tokens() {
        assert_eq!(days(&ScheduleSpec::parse("CN")), vec![0]);
        assert_eq!(days(&ScheduleSpec::parse("Chủ nhật 8h-10h")), vec![0]);
        assert_eq!(days(&ScheduleSpec::parse("T7, CN")), vec![0, 6]);
    }

    #[test]
    fn test_english_thu_without_ordinal_is_thursday() {
        assert_eq!(days(&ScheduleSpec::parse("Tue, Thu")), vec![2, 4]);
    }

    #[test]
    fn test_hours_are_not_weekday_digits() {
        // "7h" must not add Saturday, "5" in 17h-... must not add Thursday
        let spec = ScheduleSpec::parse("T3 7h-8h30");
        assert_eq!(days(&spec), vec![2]);
        assert_eq!(spec.time, TimeWindow::new(hm(7, 0), hm(8, 30)));
    }

    #[test]
    fn test_colon_time_format() {
        let spec = ScheduleSpec::parse("T3-T5 18:00 - 19:30");
        assert_eq!(days(&spec), vec![2, 4]);
        assert_eq!(spec.time, TimeWindow::new(hm(18, 0), hm(19, 30)));
    }

    #[test]
    fn test_unmarked_start_hour() {
        let spec = ScheduleSpec::parse("Thứ 3, 5 (18-19h30)");
        assert_eq!(days(&spec), vec![2, 4]);
        assert_eq!(spec.time, TimeWindow::new(hm(18, 0), hm(19, 30)));
    }

    #[test]
    fn test_spelled_ordinals_after_single_thu() {
        assert_eq!(days(&ScheduleSpec::parse("thứ ba, năm")), vec![2, 4]);
        assert_eq!(days(&ScheduleSpec::parse("Thứ hai, tư, CN")), vec![0, 1, 3]);
        // the list ends at the first word that is not an ordinal
        assert_eq!(days(&ScheduleSpec::parse("Thứ hai, tư và chủ nhật")), vec![0, 1, 3]);
    }

    #[test]
    fn test_last_weekday_digit_before_marked_window() {
        let spec = ScheduleSpec::parse("Thứ 3, 5, 7 - 18h-19h30");
        assert_eq!(days(&spec), vec![2, 4, 6]);
        assert_eq!(spec.time, TimeWindow::new(hm(18, 0), hm(19, 30)));

        let spec = ScheduleSpec::parse("T2, 4, 6 - 7h-8h30");
        assert_eq!(days(&spec), vec![1, 3, 5]);
        assert_eq!(spec.time, TimeWindow::new(hm(7, 0), hm(8, 30)));
    }

    #[test]
    fn test_inverted_window_is_dropped() {
        let spec = ScheduleSpec::parse("T2 19h30-18h");
        assert_eq!(days(&spec), vec![1]);
        assert!(spec.time.is_none());
    }

    #[test]
    fn test_garbage_degrades_to_empty() {
        for text in ["", "lịch linh hoạt", "???", "phòng 101"] {
            let spec = ScheduleSpec::parse(text);
            assert!(spec.is_empty(), "text: {}", text);
        }
    }

    #[test]
    fn test_empty_spec_permits_any_day() {
        let spec = ScheduleSpec::parse("tbd");
        let sunday = NaiveDate::from_ymd_opt(2024, 3, 3).unwrap();
        assert!(spec.permits(sunday));
        assert!(!spec.includes(sunday));
    }

    #[test]
    fn test_time_window_roundtrip_through_label() {
        let window = TimeWindow::parse("18:00-19:30").unwrap();
        assert_eq!(window.to_string(), "18:00-19:30");
        assert!(TimeWindow::parse("19:30-18:00").is_none());
        assert!(TimeWindow::parse("soon").is_none());
    }

    #[test]
    fn test_weekday_labels() {
        assert_eq!(weekday_label(0), "Chủ nhật");
        assert_eq!(weekday_label(1), "Thứ 2");
        assert_eq!(weekday_label(6), "Thứ 7");
    }
}
