//! Date/time constraints.
//!
//! A [`TemporalRange`] is always a validated `start <= end` pair of naive
//! datetimes (UTC assumed). Inputs may be day strings (`YYYY-MM-DD` or the
//! day-of-year form `YYYY-DOY`), dates or full datetimes; dates take the
//! optional time-of-day arguments, defaulting to `00:00:00` / `23:59:59`.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::HashMap;

use crate::error::{Error, Result};

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One end of a user supplied date range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateInput {
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl From<&str> for DateInput {
    fn from(v: &str) -> Self {
        DateInput::Text(v.to_string())
    }
}

impl From<String> for DateInput {
    fn from(v: String) -> Self {
        DateInput::Text(v)
    }
}

impl From<NaiveDate> for DateInput {
    fn from(v: NaiveDate) -> Self {
        DateInput::Date(v)
    }
}

impl From<NaiveDateTime> for DateInput {
    fn from(v: NaiveDateTime) -> Self {
        DateInput::DateTime(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemporalRange {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl TemporalRange {
    pub fn from_string_pair(
        start: &str,
        end: &str,
        start_time: Option<NaiveTime>,
        end_time: Option<NaiveTime>,
    ) -> Result<Self> {
        Self::resolve(start.into(), end.into(), start_time, end_time)
    }

    pub fn from_date_pair(
        start: NaiveDate,
        end: NaiveDate,
        start_time: Option<NaiveTime>,
        end_time: Option<NaiveTime>,
    ) -> Result<Self> {
        Self::resolve(start.into(), end.into(), start_time, end_time)
    }

    /// Builds a range from full datetimes. Their own time-of-day wins: a
    /// `start_time`/`end_time` passed here is ignored with a warning.
    pub fn from_datetime_pair(
        start: NaiveDateTime,
        end: NaiveDateTime,
        start_time: Option<NaiveTime>,
        end_time: Option<NaiveTime>,
    ) -> Result<Self> {
        Self::resolve(start.into(), end.into(), start_time, end_time)
    }

    /// Builds a range from a `{start_date, end_date}` mapping.
    pub fn from_dict(
        map: &HashMap<String, DateInput>,
        start_time: Option<NaiveTime>,
        end_time: Option<NaiveTime>,
    ) -> Result<Self> {
        let (Some(start), Some(end)) = (map.get("start_date"), map.get("end_date")) else {
            return Err(Error::InvalidRange(
                "date mapping must contain `start_date` and `end_date`".to_string(),
            ));
        };
        Self::resolve(start.clone(), end.clone(), start_time, end_time)
    }

    /// Builds a range from a `[start, end]` list; any other length is rejected.
    pub fn from_list(
        dates: &[DateInput],
        start_time: Option<NaiveTime>,
        end_time: Option<NaiveTime>,
    ) -> Result<Self> {
        match dates {
            [start, end] => Self::resolve(start.clone(), end.clone(), start_time, end_time),
            _ => Err(Error::InvalidRange(format!(
                "date range must be exactly 2 elements, got {}",
                dates.len()
            ))),
        }
    }

    fn resolve(
        start: DateInput,
        end: DateInput,
        start_time: Option<NaiveTime>,
        end_time: Option<NaiveTime>,
    ) -> Result<Self> {
        let (start_date, own_start) = split_input(start)?;
        let (end_date, own_end) = split_input(end)?;

        if start_date > end_date {
            return Err(Error::InvalidRange(format!(
                "start date {} is after end date {}",
                start_date, end_date
            )));
        }

        if own_start.is_some() && start_time.is_some() {
            log::warn!(
                "start date already carries a time of day; the supplied start time {:?} is ignored",
                start_time
            );
        }
        if own_end.is_some() && end_time.is_some() {
            log::warn!(
                "end date already carries a time of day; the supplied end time {:?} is ignored",
                end_time
            );
        }

        let start = start_date.and_time(own_start.or(start_time).unwrap_or(NaiveTime::MIN));
        let end = end_date.and_time(own_end.or(end_time).unwrap_or_else(end_of_day));

        if start > end {
            return Err(Error::InvalidRange(format!(
                "start {} is after end {}",
                start.format(ISO_FORMAT),
                end.format(ISO_FORMAT)
            )));
        }

        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    /// ISO8601 strings for both ends, optionally with the `Z` designator.
    pub fn to_iso_pair(&self, utc_designator: bool) -> (String, String) {
        let z = if utc_designator { "Z" } else { "" };
        (
            format!("{}{}", self.start.format(ISO_FORMAT), z),
            format!("{}{}", self.end.format(ISO_FORMAT), z),
        )
    }

    /// Search dialect: `start Z,end Z`.
    pub fn to_cmr_format(&self) -> String {
        let (s, e) = self.to_iso_pair(true);
        format!("{},{}", s, e)
    }

    /// Subsetting dialect: `start,end` without the designator.
    pub fn to_subsetter_format(&self) -> String {
        let (s, e) = self.to_iso_pair(false);
        format!("{},{}", s, e)
    }

    /// Async job dialect: `time("start Z":"end Z")`.
    pub fn to_harmony_subset(&self) -> String {
        let (s, e) = self.to_iso_pair(true);
        format!("time(\"{}\":\"{}\")", s, e)
    }
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}

fn split_input(input: DateInput) -> Result<(NaiveDate, Option<NaiveTime>)> {
    match input {
        DateInput::Text(s) => Ok((parse_date(&s)?, None)),
        DateInput::Date(d) => Ok((d, None)),
        DateInput::DateTime(dt) => Ok((dt.date(), Some(dt.time()))),
    }
}

/// Parses `YYYY-MM-DD` or the day-of-year form `YYYY-DOY` (DOY in 1..=366).
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let trimmed = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(d);
    }

    let invalid = || Error::InvalidDateFormat(s.to_string());
    let (year, doy) = trimmed.split_once('-').ok_or_else(invalid)?;
    if year.len() != 4 || doy.is_empty() || doy.len() > 3 {
        return Err(invalid());
    }
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let doy: u32 = doy.parse().map_err(|_| invalid())?;
    if !(1..=366).contains(&doy) {
        return Err(invalid());
    }
    NaiveDate::from_yo_opt(year, doy).ok_or_else(invalid)
}

/// Parses a time of day given as `HH:MM:SS` or `HH:MM`.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    let trimmed = s.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|_| Error::InvalidDateFormat(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn string_pair_defaults_to_full_days() {
        let r = TemporalRange::from_string_pair("2019-02-20", "2019-02-28", None, None).unwrap();
        assert_eq!(r.start().time(), hms(0, 0, 0));
        assert_eq!(r.end().time(), hms(23, 59, 59));
        assert_eq!(r.start().date(), ymd(2019, 2, 20));
        assert_eq!(r.end().date(), ymd(2019, 2, 28));
    }

    #[test]
    fn day_of_year_honours_leap_years() {
        assert_eq!(parse_date("2020-40").unwrap(), ymd(2020, 2, 9));
        assert_eq!(parse_date("2019-060").unwrap(), ymd(2019, 3, 1));
        assert_eq!(parse_date("2020-366").unwrap(), ymd(2020, 12, 31));
        assert!(matches!(parse_date("2019-366"), Err(Error::InvalidDateFormat(_))));
        assert!(matches!(parse_date("2019-0"), Err(Error::InvalidDateFormat(_))));
    }

    #[test]
    fn garbage_dates_are_rejected() {
        for bad in ["20190220", "Feb 20 2019", "2019-02-30", "2019-1000", ""] {
            assert!(
                matches!(parse_date(bad), Err(Error::InvalidDateFormat(_))),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn explicit_times_apply_to_dates() {
        let r = TemporalRange::from_date_pair(
            ymd(2019, 2, 20),
            ymd(2019, 2, 28),
            Some(hms(12, 30, 0)),
            Some(hms(6, 0, 0)),
        )
        .unwrap();
        assert_eq!(r.start().time(), hms(12, 30, 0));
        assert_eq!(r.end().time(), hms(6, 0, 0));
    }

    #[test]
    fn datetime_time_of_day_wins_over_arguments() {
        let start = ymd(2019, 2, 20).and_time(hms(3, 0, 0));
        let end = ymd(2019, 2, 28).and_time(hms(4, 0, 0));
        let r = TemporalRange::from_datetime_pair(start, end, Some(hms(12, 0, 0)), None).unwrap();
        assert_eq!(r.start(), start);
        assert_eq!(r.end(), end);
    }

    #[test]
    fn reversed_ranges_fail() {
        let err = TemporalRange::from_string_pair("2019-02-28", "2019-02-20", None, None);
        assert!(matches!(err, Err(Error::InvalidRange(_))));

        // Same day, but the times put start after end.
        let err = TemporalRange::from_string_pair(
            "2019-02-20",
            "2019-02-20",
            Some(hms(18, 0, 0)),
            Some(hms(6, 0, 0)),
        );
        assert!(matches!(err, Err(Error::InvalidRange(_))));
    }

    #[test]
    fn list_must_have_two_elements() {
        let one = [DateInput::from("2019-02-20")];
        let three = [
            DateInput::from("2019-02-20"),
            DateInput::from("2019-02-21"),
            DateInput::from("2019-02-22"),
        ];
        assert!(matches!(TemporalRange::from_list(&one, None, None), Err(Error::InvalidRange(_))));
        assert!(matches!(TemporalRange::from_list(&three, None, None), Err(Error::InvalidRange(_))));

        let two = [DateInput::from("2019-02-20"), DateInput::from(ymd(2019, 2, 22))];
        assert!(TemporalRange::from_list(&two, None, None).is_ok());
    }

    #[test]
    fn dict_requires_both_keys() {
        let mut map = HashMap::new();
        map.insert("start_date".to_string(), DateInput::from("2019-02-20"));
        assert!(matches!(TemporalRange::from_dict(&map, None, None), Err(Error::InvalidRange(_))));

        map.insert("end_date".to_string(), DateInput::from("2019-060"));
        let r = TemporalRange::from_dict(&map, None, None).unwrap();
        assert_eq!(r.end().date(), ymd(2019, 3, 1));
    }

    #[test]
    fn dialect_renderings_differ_only_in_designator() {
        let r = TemporalRange::from_string_pair("2019-02-20", "2019-02-28", None, None).unwrap();
        assert_eq!(r.to_cmr_format(), "2019-02-20T00:00:00Z,2019-02-28T23:59:59Z");
        assert_eq!(r.to_subsetter_format(), "2019-02-20T00:00:00,2019-02-28T23:59:59");
        assert_eq!(
            r.to_harmony_subset(),
            "time(\"2019-02-20T00:00:00Z\":\"2019-02-28T23:59:59Z\")"
        );
    }

    #[test]
    fn time_of_day_parsing() {
        assert_eq!(parse_time_of_day("12:34:56").unwrap(), hms(12, 34, 56));
        assert_eq!(parse_time_of_day("07:05").unwrap(), hms(7, 5, 0));
        assert!(parse_time_of_day("25:00:00").is_err());
    }
}
