//! Trigger calculation: weekly recurrence and one-shot "today or tomorrow".
//! All times are local wall-clock (`NaiveDateTime`).

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use deskpilot_core::{DeskPilotError, Result};
use std::fmt;
use std::str::FromStr;

/// A validated `HH:MM` time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RunTime {
    pub hour: u32,
    pub minute: u32,
}

impl RunTime {
    pub fn as_time(&self) -> NaiveTime {
        // hour/minute are range-checked at construction
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl FromStr for RunTime {
    type Err = DeskPilotError;

    fn from_str(s: &str) -> Result<Self> {
        parse_run_time(s)
    }
}

impl fmt::Display for RunTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Parse `"HH:MM"`: exactly two integer fields, hour 0-23, minute 0-59.
pub fn parse_run_time(s: &str) -> Result<RunTime> {
    let invalid = || DeskPilotError::InvalidRunTime(s.to_string());
    let (hour, minute) = s.split_once(':').ok_or_else(invalid)?;
    let hour = clock_field(hour).ok_or_else(invalid)?;
    let minute = clock_field(minute).ok_or_else(invalid)?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok(RunTime { hour, minute })
}

/// One or two ASCII digits, nothing else.
fn clock_field(field: &str) -> Option<u32> {
    if field.is_empty() || field.len() > 2 || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Map a weekday name (full or 3-letter, any case) to a `Weekday`.
pub fn parse_weekday(name: &str) -> Result<Weekday> {
    let day = match name.trim().to_ascii_lowercase().as_str() {
        "monday" | "mon" => Weekday::Mon,
        "tuesday" | "tue" => Weekday::Tue,
        "wednesday" | "wed" => Weekday::Wed,
        "thursday" | "thu" => Weekday::Thu,
        "friday" | "fri" => Weekday::Fri,
        "saturday" | "sat" => Weekday::Sat,
        "sunday" | "sun" => Weekday::Sun,
        _ => return Err(DeskPilotError::InvalidWeekday(name.to_string())),
    };
    Ok(day)
}

/// Canonical lowercase 3-letter form (`mon`..`sun`).
pub fn weekday_abbrev(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

/// Fires on each listed weekday at a fixed time, forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyTrigger {
    /// Sorted Monday-first, no duplicates.
    days: Vec<Weekday>,
    time: RunTime,
}

impl WeeklyTrigger {
    pub fn days(&self) -> &[Weekday] {
        &self.days
    }

    pub fn time(&self) -> RunTime {
        self.time
    }

    fn next_after(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let today = now.date();
        (0..=7).find_map(|offset| {
            let date = today + Duration::days(offset);
            if !self.days.contains(&date.weekday()) {
                return None;
            }
            let candidate = date.and_time(self.time.as_time());
            (candidate > now).then_some(candidate)
        })
    }
}

/// A computed schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Weekly(WeeklyTrigger),
    Once { at: NaiveDateTime },
}

impl Trigger {
    /// Next fire time strictly after `now`; `None` once a one-shot has passed.
    pub fn next_fire_after(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Trigger::Weekly(weekly) => weekly.next_after(now),
            Trigger::Once { at } => (*at > now).then_some(*at),
        }
    }

    /// First fire time for a freshly armed trigger.
    pub fn first_fire(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Trigger::Weekly(weekly) => weekly.next_after(now),
            // A one-shot keeps its computed instant even if `now` has moved past it;
            // the engine's misfire grace decides whether it still runs.
            Trigger::Once { at } => Some(*at),
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, Trigger::Weekly(_))
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Weekly(weekly) => {
                let days: Vec<&str> = weekly.days.iter().map(|d| weekday_abbrev(*d)).collect();
                write!(
                    f,
                    "cron[day_of_week='{}', hour='{}', minute='{}']",
                    days.join(","),
                    weekly.time.hour,
                    weekly.time.minute
                )
            }
            Trigger::Once { at } => write!(f, "date[{}]", at.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// Build a weekly trigger. Fails fast on an empty list or an unknown day name.
pub fn weekly_trigger<S: AsRef<str>>(weekdays: &[S], time: RunTime) -> Result<Trigger> {
    if weekdays.is_empty() {
        return Err(DeskPilotError::InvalidWeekday(String::new()));
    }
    let mut days = weekdays
        .iter()
        .map(|d| parse_weekday(d.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    days.sort_by_key(|d| d.num_days_from_monday());
    days.dedup();
    Ok(Trigger::Weekly(WeeklyTrigger { days, time }))
}

/// Today at `time` if that is strictly after `now`, else tomorrow at `time`.
pub fn one_shot_trigger(time: RunTime, now: NaiveDateTime) -> Trigger {
    let today: NaiveDate = now.date();
    let candidate = today.and_time(time.as_time());
    let at = if candidate > now {
        candidate
    } else {
        candidate + Duration::days(1)
    };
    Trigger::Once { at }
}

/// Build the trigger for a job's `run_time` and `recurring_days`.
pub fn trigger_for<S: AsRef<str>>(
    run_time: &str,
    recurring_days: &[S],
    now: NaiveDateTime,
) -> Result<Trigger> {
    let time = parse_run_time(run_time)?;
    if recurring_days.is_empty() {
        Ok(one_shot_trigger(time, now))
    } else {
        weekly_trigger(recurring_days, time)
    }
}

/// Drop sub-second precision so displayed times stay stable.
pub fn truncate_to_second(t: NaiveDateTime) -> NaiveDateTime {
    t.with_nanosecond(0).unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_parse_run_time() {
        assert_eq!(parse_run_time("14:30").unwrap(), RunTime { hour: 14, minute: 30 });
        assert_eq!(parse_run_time("0:05").unwrap(), RunTime { hour: 0, minute: 5 });
        assert_eq!("23:59".parse::<RunTime>().unwrap().to_string(), "23:59");
    }

    #[test]
    fn test_parse_run_time_invalid() {
        for bad in [
            "24:00", "12:60", "1230", "12:30:00", "ab:cd", "", ":", " +9 : 05", "+9:05",
            " 09:00", "09:00 ", "009:00", "9:5 ", "-1:30",
        ] {
            let err = parse_run_time(bad).unwrap_err();
            assert!(matches!(err, DeskPilotError::InvalidRunTime(_)), "{bad}");
        }
    }

    #[test]
    fn test_parse_weekday() {
        assert_eq!(parse_weekday("Monday").unwrap(), Weekday::Mon);
        assert_eq!(parse_weekday("SUNDAY").unwrap(), Weekday::Sun);
        assert_eq!(parse_weekday("wed").unwrap(), Weekday::Wed);
        assert!(matches!(
            parse_weekday("Funday"),
            Err(DeskPilotError::InvalidWeekday(_))
        ));
    }

    #[test]
    fn test_one_shot_today_or_tomorrow() {
        let time = parse_run_time("10:00").unwrap();
        // 2026-10-15 is a Thursday
        let morning = at(2026, 10, 15, 9, 0);
        assert_eq!(
            one_shot_trigger(time, morning),
            Trigger::Once { at: at(2026, 10, 15, 10, 0) }
        );

        let late = at(2026, 10, 15, 11, 0);
        assert_eq!(
            one_shot_trigger(time, late),
            Trigger::Once { at: at(2026, 10, 16, 10, 0) }
        );
    }

    #[test]
    fn test_one_shot_exact_time_rolls_to_tomorrow() {
        let time = parse_run_time("10:00").unwrap();
        let now = at(2026, 10, 15, 10, 0);
        let trigger = one_shot_trigger(time, now);
        assert_eq!(trigger.first_fire(now), Some(at(2026, 10, 16, 10, 0)));
    }

    #[test]
    fn test_one_shot_is_always_in_future() {
        let time = parse_run_time("00:00").unwrap();
        for hour in 0..24 {
            let now = at(2026, 12, 31, hour, 30);
            let fire = one_shot_trigger(time, now).first_fire(now).unwrap();
            assert!(fire > now);
        }
    }

    #[test]
    fn test_weekly_next_fire() {
        let trigger = weekly_trigger(&["Monday", "Wednesday"], parse_run_time("14:30").unwrap())
            .unwrap();
        // Thursday -> next Monday
        let now = at(2026, 10, 15, 9, 0);
        assert_eq!(trigger.next_fire_after(now), Some(at(2026, 10, 19, 14, 30)));
        // Monday before the time -> same day
        let monday = at(2026, 10, 19, 8, 0);
        assert_eq!(trigger.next_fire_after(monday), Some(at(2026, 10, 19, 14, 30)));
        // Monday exactly at the time -> Wednesday
        let fired = at(2026, 10, 19, 14, 30);
        assert_eq!(trigger.next_fire_after(fired), Some(at(2026, 10, 21, 14, 30)));
    }

    #[test]
    fn test_weekly_single_day_wraps_a_week() {
        let trigger = weekly_trigger(&["thu"], parse_run_time("09:00").unwrap()).unwrap();
        let now = at(2026, 10, 15, 9, 0);
        assert_eq!(trigger.next_fire_after(now), Some(at(2026, 10, 22, 9, 0)));
    }

    #[test]
    fn test_weekly_rejects_bad_days() {
        let time = parse_run_time("09:00").unwrap();
        assert!(weekly_trigger(&["Monday", "Someday"], time).is_err());
        let empty: [&str; 0] = [];
        assert!(weekly_trigger(&empty, time).is_err());
    }

    #[test]
    fn test_once_has_no_next_after_firing() {
        let trigger = Trigger::Once { at: at(2026, 10, 15, 10, 0) };
        assert_eq!(trigger.next_fire_after(at(2026, 10, 15, 10, 0)), None);
        assert_eq!(
            trigger.next_fire_after(at(2026, 10, 15, 9, 59)),
            Some(at(2026, 10, 15, 10, 0))
        );
        assert!(!trigger.is_recurring());
    }

    #[test]
    fn test_display() {
        let weekly = weekly_trigger(&["Wednesday", "monday", "Mon"], parse_run_time("14:30").unwrap())
            .unwrap();
        assert_eq!(
            weekly.to_string(),
            "cron[day_of_week='mon,wed', hour='14', minute='30']"
        );
        let once = Trigger::Once { at: at(2026, 10, 15, 10, 0) };
        assert_eq!(once.to_string(), "date[2026-10-15 10:00:00]");
    }

    #[test]
    fn test_trigger_for() {
        let now = at(2026, 10, 15, 9, 0);
        let none: [&str; 0] = [];
        assert!(matches!(trigger_for("10:00", &none, now), Ok(Trigger::Once { .. })));
        assert!(trigger_for("10:00", &["Friday"], now).unwrap().is_recurring());
        assert!(trigger_for("25:00", &["Friday"], now).is_err());
    }
}
