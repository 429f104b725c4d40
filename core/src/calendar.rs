//! Calendar-aware day boundaries.
//!
//! The store never decides what "today" is. Callers pass a [`Calendar`] and an
//! instant, and the calendar maps that instant to the half-open range
//! `[start_of_day, start_of_next_day)` in UTC.

use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Duration, FixedOffset, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Utc,
};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calendar {
    Utc,
    /// The process's local timezone, resolved at call time.
    Local,
    Fixed(FixedOffset),
    Zone(Tz),
}

impl Calendar {
    /// Wall-clock time of `at` in this calendar.
    #[must_use]
    pub fn local_time(&self, at: DateTime<Utc>) -> NaiveDateTime {
        match self {
            Calendar::Utc => at.naive_utc(),
            Calendar::Local => at.with_timezone(&Local).naive_local(),
            Calendar::Fixed(offset) => at.with_timezone(offset).naive_local(),
            Calendar::Zone(tz) => at.with_timezone(tz).naive_local(),
        }
    }

    /// The calendar date `at` falls on.
    #[must_use]
    pub fn date_of(&self, at: DateTime<Utc>) -> NaiveDate {
        self.local_time(at).date()
    }

    /// First instant of `date` in this calendar.
    #[must_use]
    pub fn start_of_date(&self, date: NaiveDate) -> DateTime<Utc> {
        match self {
            Calendar::Utc => start_in(&Utc, date),
            Calendar::Local => start_in(&Local, date),
            Calendar::Fixed(offset) => start_in(offset, date),
            Calendar::Zone(tz) => start_in(tz, date),
        }
    }

    #[must_use]
    pub fn start_of_day(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        self.start_of_date(self.date_of(at))
    }

    /// `[start, end)` of the day containing `at`. The end is the start of the
    /// next calendar date, so DST days are 23 or 25 hours long.
    #[must_use]
    pub fn day_range(&self, at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let date = self.date_of(at);
        let next = date.succ_opt().unwrap_or(date);
        (self.start_of_date(date), self.start_of_date(next))
    }

    #[must_use]
    pub fn is_same_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.date_of(a) == self.date_of(b)
    }
}

fn start_in<Z: TimeZone>(tz: &Z, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t.with_timezone(&Utc),
        // Midnight skipped by a DST jump: the day starts at the first local
        // time that exists.
        LocalResult::None => (1..=96)
            .find_map(|quarter| {
                tz.from_local_datetime(&(midnight + Duration::minutes(15 * quarter)))
                    .earliest()
            })
            .map_or_else(
                || Utc.from_utc_datetime(&midnight),
                |t| t.with_timezone(&Utc),
            ),
    }
}

impl fmt::Display for Calendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Calendar::Utc => f.write_str("utc"),
            Calendar::Local => f.write_str("local"),
            Calendar::Fixed(offset) => write!(f, "{offset}"),
            Calendar::Zone(tz) => f.write_str(tz.name()),
        }
    }
}

/// Accepts `utc`, `local`, a fixed offset such as `+02:00`, or an IANA zone
/// name such as `Europe/London`.
impl FromStr for Calendar {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "utc" | "z" => return Ok(Calendar::Utc),
            "local" => return Ok(Calendar::Local),
            _ => {}
        }
        if s.starts_with('+') || s.starts_with('-') {
            return s
                .parse::<FixedOffset>()
                .map(Calendar::Fixed)
                .map_err(|_| format!("Invalid UTC offset '{s}'. Use e.g. +02:00"));
        }
        s.parse::<Tz>()
            .map(Calendar::Zone)
            .map_err(|_| format!("Unknown timezone '{s}'. Use utc, local, +HH:MM, or an IANA name"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_utc_day_range() {
        let (start, end) = Calendar::Utc.day_range(utc(2025, 11, 6, 15, 30));
        assert_eq!(start, utc(2025, 11, 6, 0, 0));
        assert_eq!(end, utc(2025, 11, 7, 0, 0));
    }

    #[test]
    fn test_fixed_offset_shifts_boundaries() {
        let tokyo = Calendar::Fixed(FixedOffset::east_opt(9 * 3600).unwrap());
        // 20:00 UTC on the 6th is already the 7th in UTC+9.
        let at = utc(2025, 11, 6, 20, 0);
        assert_eq!(tokyo.date_of(at), NaiveDate::from_ymd_opt(2025, 11, 7).unwrap());
        let (start, end) = tokyo.day_range(at);
        assert_eq!(start, utc(2025, 11, 6, 15, 0));
        assert_eq!(end, utc(2025, 11, 7, 15, 0));
    }

    #[test]
    fn test_dst_spring_forward_day_is_23_hours() {
        let london = Calendar::Zone(chrono_tz::Europe::London);
        let (start, end) = london.day_range(utc(2024, 3, 31, 12, 0));
        assert_eq!(start, utc(2024, 3, 31, 0, 0));
        assert_eq!(end, utc(2024, 3, 31, 23, 0));
        assert_eq!(end - start, Duration::hours(23));
    }

    #[test]
    fn test_dst_fall_back_day_is_25_hours() {
        let london = Calendar::Zone(chrono_tz::Europe::London);
        let (start, end) = london.day_range(utc(2024, 10, 27, 12, 0));
        assert_eq!(end - start, Duration::hours(25));
    }

    #[test]
    fn test_midnight_gap_starts_day_at_first_valid_time() {
        // Santiago springs forward at local midnight.
        let santiago = Calendar::Zone(chrono_tz::America::Santiago);
        let date = NaiveDate::from_ymd_opt(2024, 9, 8).unwrap();
        let start = santiago.start_of_date(date);
        assert_eq!(santiago.date_of(start), date);
        assert_eq!(start, utc(2024, 9, 8, 4, 0));
    }

    #[test]
    fn test_same_day_depends_on_calendar() {
        let a = utc(2025, 11, 6, 23, 0);
        let b = utc(2025, 11, 7, 1, 0);
        assert!(!Calendar::Utc.is_same_day(a, b));
        let new_york = Calendar::Zone(chrono_tz::America::New_York);
        assert!(new_york.is_same_day(a, b));
    }

    #[test]
    fn test_parse_calendar() {
        assert_eq!("UTC".parse::<Calendar>().unwrap(), Calendar::Utc);
        assert_eq!("local".parse::<Calendar>().unwrap(), Calendar::Local);
        assert_eq!(
            "+02:00".parse::<Calendar>().unwrap(),
            Calendar::Fixed(FixedOffset::east_opt(7200).unwrap())
        );
        assert_eq!(
            "Europe/Paris".parse::<Calendar>().unwrap(),
            Calendar::Zone(chrono_tz::Europe::Paris)
        );
        assert!("Mars/Olympus".parse::<Calendar>().is_err());
    }
}
