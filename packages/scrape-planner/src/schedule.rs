//! Cron schedules for recurring plan execution.
//!
//! Accepts the 6-field form used by the job scheduler
//! (`sec min hour day-of-month month day-of-week`, e.g. `0 0 0 * * MON`)
//! and the classic 5-field form without seconds.
//!
//! Field syntax: `*`, `?`, `n`, `a-b`, `*/s`, `a-b/s`, `a/s` and comma lists.
//! Months accept `JAN`..`DEC`, weekdays `SUN`..`SAT`; weekday `7` is Sunday.
//! When both day-of-month and day-of-week are restricted a day matches if
//! either does.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use tracing::warn;

use crate::error::ScheduleError;

/// Days searched ahead: four years covers every Feb 29.
const SEARCH_HORIZON_DAYS: i64 = 366 * 4 + 1;

const MONTH_NAMES: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Second,
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl FieldKind {
    fn name(self) -> &'static str {
        match self {
            FieldKind::Second => "second",
            FieldKind::Minute => "minute",
            FieldKind::Hour => "hour",
            FieldKind::DayOfMonth => "day-of-month",
            FieldKind::Month => "month",
            FieldKind::DayOfWeek => "day-of-week",
        }
    }

    fn range(self) -> (u32, u32) {
        match self {
            FieldKind::Second | FieldKind::Minute => (0, 59),
            FieldKind::Hour => (0, 23),
            FieldKind::DayOfMonth => (1, 31),
            FieldKind::Month => (1, 12),
            FieldKind::DayOfWeek => (0, 7),
        }
    }

    fn names(self) -> Option<(&'static [&'static str], u32)> {
        match self {
            FieldKind::Month => Some((MONTH_NAMES, 1)),
            FieldKind::DayOfWeek => Some((WEEKDAY_NAMES, 0)),
            _ => None,
        }
    }
}

/// Values a field allows, as a membership table indexed by value.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldSet {
    allowed: Vec<bool>,
    restricted: bool,
}

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        self.allowed.get(value as usize).copied().unwrap_or(false)
    }
}

fn parse_value(raw: &str, kind: FieldKind) -> Option<u32> {
    if let Ok(n) = raw.parse::<u32>() {
        return Some(n);
    }
    let (names, offset) = kind.names()?;
    let upper = raw.to_ascii_uppercase();
    names
        .iter()
        .position(|n| *n == upper)
        .map(|i| i as u32 + offset)
}

/// Parse one field into its allowed values; `None` when malformed or out of range.
fn parse_field(field: &str, min: u32, max: u32, kind: Option<FieldKind>) -> Option<FieldSet> {
    let mut allowed = vec![false; max as usize + 1];
    let restricted = !(field == "*" || field == "?");

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().ok()?;
                if step == 0 {
                    return None;
                }
                (range, step)
            }
            None => (part, 1),
        };

        let value = |raw: &str| match kind {
            Some(kind) => parse_value(raw, kind),
            None => raw.parse::<u32>().ok(),
        };

        let (start, end) = if range == "*" || range == "?" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (value(a)?, value(b)?)
        } else {
            let start = value(range)?;
            // `a/s` runs from a to the end of the range
            if part.contains('/') {
                (start, max)
            } else {
                (start, start)
            }
        };

        if start < min || end > max || start > end {
            return None;
        }

        let mut v = start;
        while v <= end {
            allowed[v as usize] = true;
            match v.checked_add(step) {
                Some(next) => v = next,
                None => break,
            }
        }
    }

    Some(FieldSet {
        allowed,
        restricted,
    })
}

/// Whether `field` is a valid cron field for values in `min..=max`.
pub fn is_valid_cron_field(field: &str, min: u32, max: u32) -> bool {
    !field.is_empty() && min <= max && parse_field(field, min, max, None).is_some()
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    seconds: FieldSet,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let (second, rest) = match fields.len() {
            6 => (fields[0], &fields[1..]),
            5 => ("0", &fields[..]),
            count => {
                return Err(ScheduleError::FieldCount {
                    expression: expression.to_string(),
                    count,
                })
            }
        };

        let field = |raw: &str, kind: FieldKind| {
            let (min, max) = kind.range();
            parse_field(raw, min, max, Some(kind)).ok_or_else(|| ScheduleError::InvalidField {
                expression: expression.to_string(),
                field: kind.name(),
                value: raw.to_string(),
            })
        };

        let mut days_of_week = field(rest[4], FieldKind::DayOfWeek)?;
        // 7 is Sunday
        if days_of_week.contains(7) {
            days_of_week.allowed[0] = true;
        }

        Ok(Self {
            expression: expression.to_string(),
            seconds: field(second, FieldKind::Second)?,
            minutes: field(rest[0], FieldKind::Minute)?,
            hours: field(rest[1], FieldKind::Hour)?,
            days_of_month: field(rest[2], FieldKind::DayOfMonth)?,
            months: field(rest[3], FieldKind::Month)?,
            days_of_week,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        if !self.months.contains(date.month()) {
            return false;
        }
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        if self.days_of_month.restricted && self.days_of_week.restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First matching time on `date` at or after `from`.
    fn first_time_on(&self, from: NaiveTime) -> Option<NaiveTime> {
        for h in from.hour()..24 {
            if !self.hours.contains(h) {
                continue;
            }
            let min_start = if h == from.hour() { from.minute() } else { 0 };
            for m in min_start..60 {
                if !self.minutes.contains(m) {
                    continue;
                }
                let sec_start = if h == from.hour() && m == from.minute() {
                    from.second()
                } else {
                    0
                };
                for s in sec_start..60 {
                    if self.seconds.contains(s) {
                        return NaiveTime::from_hms_opt(h, m, s);
                    }
                }
            }
        }
        None
    }

    /// Next fire time strictly after `now`, within the search horizon.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = now.with_nanosecond(0)? + Duration::seconds(1);
        let first_day = start.date_naive();

        for offset in 0..SEARCH_HORIZON_DAYS {
            let date = first_day + Duration::days(offset);
            if !self.day_matches(date) {
                continue;
            }
            let from = if offset == 0 {
                start.time()
            } else {
                NaiveTime::MIN
            };
            if let Some(time) = self.first_time_on(from) {
                return Some(Utc.from_utc_datetime(&date.and_time(time)));
            }
        }
        None
    }
}

/// Whether a 5- or 6-field cron expression is valid.
pub fn is_valid_cron_expression(expression: &str) -> bool {
    CronSchedule::parse(expression).is_ok()
}

/// Next run of `expression` after `now`.
///
/// Falls back to one hour from `now` when the expression is invalid or
/// never fires within four years (e.g. `0 0 0 30 2 *`).
pub fn calculate_next_run(expression: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let next = CronSchedule::parse(expression)
        .map_err(|e| warn!(expression = %expression, error = %e, "Invalid cron expression"))
        .ok()
        .and_then(|schedule| schedule.next_after(now));

    next.unwrap_or_else(|| {
        warn!(expression = %expression, "No upcoming run found, scheduling in one hour");
        now + Duration::hours(1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_field_validation() {
        assert!(is_valid_cron_field("*", 0, 59));
        assert!(is_valid_cron_field("*/15", 0, 59));
        assert!(is_valid_cron_field("1-5", 0, 6));
        assert!(is_valid_cron_field("0,30", 0, 59));
        assert!(is_valid_cron_field("10-20/5", 0, 59));
        assert!(!is_valid_cron_field("60", 0, 59));
        assert!(!is_valid_cron_field("5-1", 0, 59));
        assert!(!is_valid_cron_field("*/0", 0, 59));
        assert!(!is_valid_cron_field("abc", 0, 59));
        assert!(!is_valid_cron_field("", 0, 59));
        assert!(!is_valid_cron_field("1-70", 0, 59));
    }

    #[test]
    fn test_huge_step_allows_only_the_start() {
        let schedule = CronSchedule::parse("1/4294967295 * * * *").unwrap();
        assert_eq!(
            schedule.next_after(at("2024-03-10T10:15:00Z")),
            Some(at("2024-03-10T11:01:00Z"))
        );
        assert!(is_valid_cron_field("58/4294967295", 0, 59));
    }

    #[test]
    fn test_expression_validation() {
        assert!(is_valid_cron_expression("0 0 * * * *"));
        assert!(is_valid_cron_expression("0 0 0 * * MON"));
        assert!(is_valid_cron_expression("30 6 * * 1-5"));
        assert!(is_valid_cron_expression("*/5 * * * *"));
        assert!(!is_valid_cron_expression("0 0 * *"));
        assert!(!is_valid_cron_expression("0 0 25 * * *"));

        assert_eq!(
            CronSchedule::parse("* * *").unwrap_err(),
            ScheduleError::FieldCount {
                expression: "* * *".to_string(),
                count: 3
            }
        );
    }

    #[test]
    fn test_hourly() {
        let next = calculate_next_run("0 0 * * * *", at("2024-03-10T10:15:30Z"));
        assert_eq!(next, at("2024-03-10T11:00:00Z"));
    }

    #[test]
    fn test_next_run_is_strictly_after_now() {
        let next = calculate_next_run("0 0 * * * *", at("2024-03-10T10:00:00Z"));
        assert_eq!(next, at("2024-03-10T11:00:00Z"));
    }

    #[test]
    fn test_weekly_monday() {
        // 2024-03-10 is a Sunday
        let next = calculate_next_run("0 0 0 * * MON", at("2024-03-10T10:00:00Z"));
        assert_eq!(next, at("2024-03-11T00:00:00Z"));

        let sunday = calculate_next_run("0 0 12 * * 7", at("2024-03-11T00:00:00Z"));
        assert_eq!(sunday, at("2024-03-17T12:00:00Z"));
    }

    #[test]
    fn test_five_field_form() {
        let next = calculate_next_run("30 6 * * *", at("2024-03-10T07:00:00Z"));
        assert_eq!(next, at("2024-03-11T06:30:00Z"));
    }

    #[test]
    fn test_leap_day_within_horizon() {
        let next = calculate_next_run("0 0 0 29 2 *", at("2025-01-01T00:00:00Z"));
        assert_eq!(next, at("2028-02-29T00:00:00Z"));
    }

    #[test]
    fn test_day_of_month_or_weekday() {
        // the 1st or any Friday; 2024-03-10 is a Sunday
        let next = calculate_next_run("0 0 9 1 * FRI", at("2024-03-10T10:00:00Z"));
        assert_eq!(next, at("2024-03-15T09:00:00Z"));

        let next = calculate_next_run("0 0 9 11 * FRI", at("2024-03-10T10:00:00Z"));
        assert_eq!(next, at("2024-03-11T09:00:00Z"));
    }

    #[test]
    fn test_impossible_or_invalid_falls_back_to_one_hour() {
        let now = at("2024-03-10T10:00:00Z");
        assert_eq!(calculate_next_run("0 0 0 30 2 *", now), at("2024-03-10T11:00:00Z"));
        assert_eq!(calculate_next_run("nonsense", now), at("2024-03-10T11:00:00Z"));
    }
}
