//! Cron expressions for recurring jobs.
//!
//! Jobs carry standard five-field expressions
//! (`minute hour day-of-month month day-of-week`, Sunday = 0 or 7). The
//! `cron` crate wants a leading seconds field and numbers weekdays 1-7 from
//! Sunday, so expressions are normalized before parsing. Six-field
//! expressions are taken to already carry the seconds field.
//!
//! When both day-of-month and day-of-week are restricted, a day matches if
//! either field does. The `cron` crate requires both, so such expressions
//! are split into two schedules and the earlier trigger wins.

use crate::error::{JobError, JobResult};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

const WEEKDAYS: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Field positions once the seconds field is in place.
const DAY_OF_MONTH: usize = 3;
const DAY_OF_WEEK: usize = 5;

/// A parsed cron expression.
#[derive(Debug, Clone)]
pub struct Recurrence {
    expression: String,
    schedules: Vec<Schedule>,
}

impl Recurrence {
    /// Parse a five- or six-field cron expression.
    pub fn parse(expression: &str) -> JobResult<Self> {
        let schedules = normalize(expression)?
            .iter()
            .map(|normalized| {
                Schedule::from_str(normalized).map_err(|e| invalid(expression, e.to_string()))
            })
            .collect::<JobResult<Vec<_>>>()?;

        Ok(Self {
            expression: expression.trim().to_string(),
            schedules,
        })
    }

    /// The expression as written by the caller.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First trigger strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&now).next())
            .min()
    }
}

/// Next trigger of `expression` strictly after `now`.
///
/// Returns `Ok(None)` for an empty expression, which marks a job as not
/// recurring.
pub fn next_run_at(expression: Option<&str>, now: DateTime<Utc>) -> JobResult<Option<DateTime<Utc>>> {
    let Some(expression) = expression.map(str::trim).filter(|e| !e.is_empty()) else {
        return Ok(None);
    };

    let recurrence = Recurrence::parse(expression)?;
    recurrence
        .next_after(now)
        .map(Some)
        .ok_or_else(|| invalid(expression, "expression never fires again".to_string()))
}

fn invalid(expression: &str, reason: String) -> JobError {
    JobError::InvalidCron {
        expression: expression.to_string(),
        reason,
    }
}

/// Expressions for the `cron` crate: one, or two when either day field
/// may match.
fn normalize(expression: &str) -> JobResult<Vec<String>> {
    let mut fields: Vec<String> = expression.split_whitespace().map(str::to_string).collect();

    match fields.len() {
        5 => fields.insert(0, "0".to_string()),
        6 => {}
        n => return Err(invalid(expression, format!("expected 5 or 6 fields, found {n}"))),
    }

    fields[DAY_OF_WEEK] =
        weekday_field(&fields[DAY_OF_WEEK]).map_err(|reason| invalid(expression, reason))?;

    if !is_restricted(&fields[DAY_OF_MONTH]) || !is_restricted(&fields[DAY_OF_WEEK]) {
        return Ok(vec![fields.join(" ")]);
    }

    let mut by_month_day = fields.clone();
    by_month_day[DAY_OF_WEEK] = "*".to_string();
    let mut by_weekday = fields;
    by_weekday[DAY_OF_MONTH] = "*".to_string();

    Ok(vec![by_month_day.join(" "), by_weekday.join(" ")])
}

/// False for fields starting with `*` or `?`, which match every day.
fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field.starts_with('?'))
}

/// Rewrites numeric weekdays (0-7, Sunday first) as names.
fn weekday_field(field: &str) -> Result<String, String> {
    let mut items = Vec::new();

    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (item, None),
        };
        let step_suffix = step.map(|s| format!("/{s}")).unwrap_or_default();

        if base == "*" || base == "?" {
            items.push(format!("{base}{step_suffix}"));
            continue;
        }

        match base.split_once('-') {
            Some((start, end)) if step.is_some() && is_number(start) && is_number(end) => {
                // Expand so a range ending on 7 keeps its Sunday.
                items.extend(expand_range(start, end, step.unwrap_or_default())?);
            }
            Some((start, end)) => {
                let start_day = weekday(start)?;
                let end_is_sunday = end == "7";
                let end_day = weekday(end)?;

                if end_is_sunday && start_day != "SUN" && step.is_none() {
                    // 5-7 wraps past Saturday into Sunday.
                    items.push(format!("{start_day}-SAT"));
                    items.push("SUN".to_string());
                } else if end_is_sunday {
                    items.push(format!("{start_day}-SAT{step_suffix}"));
                } else {
                    items.push(format!("{start_day}-{end_day}{step_suffix}"));
                }
            }
            None => items.push(format!("{}{step_suffix}", weekday(base)?)),
        }
    }

    Ok(items.join(","))
}

fn is_number(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

/// `start-end/step` over numeric weekdays as a list of names.
fn expand_range(start: &str, end: &str, step: &str) -> Result<Vec<String>, String> {
    let parse = |token: &str| token.parse::<usize>().map_err(|e| format!("{token}: {e}"));
    let (start, end, step) = (parse(start)?, parse(end)?, parse(step)?);

    if step == 0 {
        return Err("step must be positive".to_string());
    }
    if start > end {
        return Err(format!("day of week range {start}-{end} is reversed"));
    }

    let mut days = Vec::new();
    for n in (start..=end).step_by(step) {
        let day = weekday(&n.to_string())?;
        if !days.contains(&day) {
            days.push(day);
        }
    }
    Ok(days)
}

fn weekday(token: &str) -> Result<String, String> {
    match token.parse::<usize>() {
        Ok(7) => Ok("SUN".to_string()),
        Ok(n) if n < 7 => Ok(WEEKDAYS[n].to_string()),
        Ok(n) => Err(format!("day of week {n} out of range")),
        Err(_) => Ok(token.to_ascii_uppercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_daily_at_ten_rolls_to_next_day() {
        let next = next_run_at(Some("0 10 * * *"), at(2025, 7, 7, 13, 50, 0)).unwrap();
        assert_eq!(next, Some(at(2025, 7, 8, 10, 0, 0)));
    }

    #[test]
    fn test_next_is_strictly_after_now() {
        let now = at(2025, 7, 8, 10, 0, 0);
        let next = next_run_at(Some("0 10 * * *"), now).unwrap();
        assert_eq!(next, Some(at(2025, 7, 9, 10, 0, 0)));
    }

    #[test]
    fn test_every_five_minutes() {
        let next = next_run_at(Some("*/5 * * * *"), at(2025, 7, 7, 13, 51, 12)).unwrap();
        assert_eq!(next, Some(at(2025, 7, 7, 13, 55, 0)));
    }

    #[test]
    fn test_empty_expression_is_not_recurring() {
        assert_eq!(next_run_at(None, Utc::now()).unwrap(), None);
        assert_eq!(next_run_at(Some("   "), Utc::now()).unwrap(), None);
    }

    #[test]
    fn test_numeric_weekdays_start_on_sunday() {
        // 2025-07-07 is a Monday.
        let next = next_run_at(Some("0 9 * * 0"), at(2025, 7, 7, 12, 0, 0)).unwrap();
        assert_eq!(next, Some(at(2025, 7, 13, 9, 0, 0)));

        let next = next_run_at(Some("0 9 * * 7"), at(2025, 7, 7, 12, 0, 0)).unwrap();
        assert_eq!(next, Some(at(2025, 7, 13, 9, 0, 0)));
    }

    #[test]
    fn test_weekday_range() {
        // Friday evening: next weekday run is Monday.
        let next = next_run_at(Some("30 8 * * 1-5"), at(2025, 7, 11, 18, 0, 0)).unwrap();
        assert_eq!(next, Some(at(2025, 7, 14, 8, 30, 0)));
    }

    #[test]
    fn test_weekday_field_rewrites() {
        assert_eq!(weekday_field("1-5").unwrap(), "MON-FRI");
        assert_eq!(weekday_field("0,6").unwrap(), "SUN,SAT");
        assert_eq!(weekday_field("5-7").unwrap(), "FRI-SAT,SUN");
        assert_eq!(weekday_field("*/2").unwrap(), "*/2");
        assert_eq!(weekday_field("mon-fri").unwrap(), "MON-FRI");
        assert_eq!(weekday_field("5-7/2").unwrap(), "FRI,SUN");
        assert_eq!(weekday_field("1-5/2").unwrap(), "MON,WED,FRI");
        assert_eq!(weekday_field("0-7/7").unwrap(), "SUN");
        assert!(weekday_field("8").is_err());
        assert!(weekday_field("1-5/0").is_err());
    }

    #[test]
    fn test_stepped_range_ending_on_sunday() {
        // Saturday noon: Friday-and-Sunday schedule fires the next morning.
        let next = next_run_at(Some("0 9 * * 5-7/2"), at(2025, 7, 12, 12, 0, 0)).unwrap();
        assert_eq!(next, Some(at(2025, 7, 13, 9, 0, 0)));
    }

    #[test]
    fn test_month_day_or_weekday() {
        // First of the month or any Monday; 2025-07-07 is a Monday.
        let now = at(2025, 7, 7, 13, 50, 0);
        let next = next_run_at(Some("0 0 1 * 1"), now).unwrap();
        assert_eq!(next, Some(at(2025, 7, 14, 0, 0, 0)));

        // From the last Monday of July the first of August comes first.
        let next = next_run_at(Some("0 0 1 * 1"), at(2025, 7, 28, 1, 0, 0)).unwrap();
        assert_eq!(next, Some(at(2025, 8, 1, 0, 0, 0)));
    }

    #[test]
    fn test_unrestricted_day_field_keeps_single_schedule() {
        assert_eq!(normalize("0 0 1 * *").unwrap().len(), 1);
        assert_eq!(normalize("0 0 * * 1").unwrap().len(), 1);
        assert_eq!(normalize("0 0 */2 * 1").unwrap().len(), 1);
        assert_eq!(
            normalize("0 0 1 * 1").unwrap(),
            vec!["0 0 0 1 * *".to_string(), "0 0 0 * * MON".to_string()]
        );
    }

    #[test]
    fn test_six_field_expression_keeps_seconds() {
        let next = next_run_at(Some("30 0 10 * * *"), at(2025, 7, 7, 13, 50, 0)).unwrap();
        assert_eq!(next, Some(at(2025, 7, 8, 10, 0, 30)));
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(matches!(
            Recurrence::parse("not a cron"),
            Err(JobError::InvalidCron { .. })
        ));
        assert!(matches!(
            Recurrence::parse("61 * * * *"),
            Err(JobError::InvalidCron { .. })
        ));
    }

    #[test]
    fn test_expression_is_kept_verbatim() {
        let recurrence = Recurrence::parse(" 0 10 * * * ").unwrap();
        assert_eq!(recurrence.expression(), "0 10 * * *");
    }
}
