//! Conversion between storage time (UTC) and display time.
//!
//! Timestamps are stored and compared in UTC. Everything the user sees, and every
//! calendar date an entry is filed under, is computed in a single configured
//! display zone. A calendar day in the display zone generally straddles two UTC
//! days, so day and month boundaries are always computed locally first and then
//! converted.

use anyhow::{anyhow, Result};
use chrono::{
    DateTime, Days, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone,
    Utc,
};
use chrono_tz::Tz;

use crate::error::{AppError, AppResult};

/// Fixed-width UTC layout used for every timestamp written to the database.
/// String order equals chronological order, so range queries can compare text.
pub const STORAGE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Naive layouts written by older versions of the schema.
const LEGACY_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayZone(Tz);

impl DisplayZone {
    /// Parse an IANA zone name such as `Asia/Tokyo`
    pub fn parse(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        trimmed
            .parse::<Tz>()
            .map(Self)
            .map_err(|e| anyhow!("invalid timezone id {trimmed:?}: {e}"))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub fn to_display(&self, instant: DateTime<Utc>) -> DateTime<Tz> {
        instant.with_timezone(&self.0)
    }

    pub fn to_storage<Z: TimeZone>(local: DateTime<Z>) -> DateTime<Utc> {
        local.with_timezone(&Utc)
    }

    /// Calendar date an instant falls on in the display zone
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        self.to_display(instant).date_naive()
    }

    pub fn today(&self) -> NaiveDate {
        self.local_date(Utc::now())
    }

    /// UTC instant at which `date` begins in the display zone.
    ///
    /// When midnight is skipped by a DST transition the first instant that does
    /// exist that day is used; when it occurs twice the earlier one wins.
    pub fn day_start_utc(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_time(NaiveTime::MIN);
        match self.0.from_local_datetime(&midnight) {
            LocalResult::Single(local) => Self::to_storage(local),
            LocalResult::Ambiguous(earliest, _) => Self::to_storage(earliest),
            LocalResult::None => (1..=96)
                .map(|quarter| midnight + Duration::minutes(15 * quarter))
                .find_map(|probe| self.0.from_local_datetime(&probe).earliest())
                .map(Self::to_storage)
                .unwrap_or_else(|| {
                    let offset = self.0.offset_from_utc_datetime(&midnight).fix();
                    normalize_legacy(midnight - Duration::seconds(offset.local_minus_utc() as i64))
                }),
        }
    }

    /// `[start, end)` in UTC covering one local calendar day
    pub fn day_range_utc(&self, date: NaiveDate) -> AppResult<(DateTime<Utc>, DateTime<Utc>)> {
        let next = date
            .checked_add_days(Days::new(1))
            .ok_or_else(|| AppError::InvalidDate(date.to_string()))?;
        Ok((self.day_start_utc(date), self.day_start_utc(next)))
    }

    /// `[start, end)` in UTC covering one local calendar month
    pub fn month_range_utc(
        &self,
        year: i32,
        month: u32,
    ) -> AppResult<(DateTime<Utc>, DateTime<Utc>)> {
        let first = first_of_month(year, month)?;
        let (next_year, next_month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
        let next_first = first_of_month(next_year, next_month)?;
        Ok((self.day_start_utc(first), self.day_start_utc(next_first)))
    }
}

pub(crate) fn first_of_month(year: i32, month: u32) -> AppResult<NaiveDate> {
    if !(1..=12).contains(&month) {
        return Err(AppError::InvalidDate(format!("month {month} out of range")));
    }
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| AppError::InvalidDate(format!("{year}-{month:02} out of range")))
}

/// Attach UTC to a timestamp that was stored without zone information
pub fn normalize_legacy(naive: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&naive)
}

/// Parse a timestamp read from the database.
///
/// Accepts RFC 3339 with any offset and the naive legacy layouts, which are
/// taken to be UTC.
pub fn parse_stored(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(raw) {
        return Ok(with_offset.with_timezone(&Utc));
    }
    for layout in LEGACY_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return Ok(normalize_legacy(naive));
        }
    }
    Err(anyhow!("unrecognised timestamp {raw:?}"))
}

pub fn format_stored(instant: DateTime<Utc>) -> String {
    instant.format(STORAGE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokyo() -> DisplayZone {
        DisplayZone::parse("Asia/Tokyo").unwrap()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).single().unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_rejects_unknown_zone() {
        assert!(DisplayZone::parse("Mars/Olympus_Mons").is_err());
        assert_eq!(DisplayZone::parse(" Asia/Tokyo ").unwrap().name(), "Asia/Tokyo");
    }

    #[test]
    fn test_local_date_crosses_utc_day_boundary() {
        let zone = tokyo();
        // 2025-12-01 00:30 in Tokyo is still November 30th in UTC
        assert_eq!(zone.local_date(utc(2025, 11, 30, 15, 30)), date(2025, 12, 1));
        assert_eq!(zone.local_date(utc(2025, 11, 30, 14, 59)), date(2025, 11, 30));
    }

    #[test]
    fn test_new_year_bucket() {
        let zone = tokyo();
        assert_eq!(zone.local_date(utc(2025, 12, 31, 16, 0)), date(2026, 1, 1));
    }

    #[test]
    fn test_storage_display_roundtrip() {
        let zone = tokyo();
        let berlin = DisplayZone::parse("Europe/Berlin").unwrap();
        for instant in [
            utc(2025, 12, 31, 16, 0),
            utc(2024, 2, 29, 23, 59),
            utc(2026, 3, 29, 1, 30),
            utc(1999, 12, 31, 23, 0),
        ] {
            assert_eq!(DisplayZone::to_storage(zone.to_display(instant)), instant);
            assert_eq!(DisplayZone::to_storage(berlin.to_display(instant)), instant);
        }
    }

    #[test]
    fn test_day_range_in_tokyo() {
        let (start, end) = tokyo().day_range_utc(date(2025, 12, 1)).unwrap();
        assert_eq!(start, utc(2025, 11, 30, 15, 0));
        assert_eq!(end, utc(2025, 12, 1, 15, 0));
    }

    #[test]
    fn test_day_range_on_dst_change_is_23_hours() {
        let berlin = DisplayZone::parse("Europe/Berlin").unwrap();
        let (start, end) = berlin.day_range_utc(date(2026, 3, 29)).unwrap();
        assert_eq!(start, utc(2026, 3, 28, 23, 0));
        assert_eq!((end - start).num_hours(), 23);
    }

    #[test]
    fn test_day_start_inside_dst_gap() {
        // Santiago skips from 00:00 to 01:00 when DST begins
        let santiago = DisplayZone::parse("America/Santiago").unwrap();
        let start = santiago.day_start_utc(date(2025, 9, 7));
        assert_eq!(santiago.local_date(start), date(2025, 9, 7));
        assert_eq!(santiago.local_date(start - Duration::seconds(1)), date(2025, 9, 6));
    }

    #[test]
    fn test_month_range_december_rolls_over() {
        let (start, end) = tokyo().month_range_utc(2025, 12).unwrap();
        assert_eq!(start, utc(2025, 11, 30, 15, 0));
        assert_eq!(end, utc(2025, 12, 31, 15, 0));
    }

    #[test]
    fn test_month_range_rejects_bad_month() {
        assert!(matches!(
            tokyo().month_range_utc(2025, 13),
            Err(AppError::InvalidDate(_))
        ));
        assert!(matches!(
            tokyo().month_range_utc(2025, 0),
            Err(AppError::InvalidDate(_))
        ));
    }

    #[test]
    fn test_parse_stored_formats() {
        let expected = utc(2025, 12, 31, 16, 0);
        assert_eq!(parse_stored("2025-12-31T16:00:00.000000Z").unwrap(), expected);
        assert_eq!(parse_stored("2026-01-01T01:00:00+09:00").unwrap(), expected);
        // Legacy naive values are UTC
        assert_eq!(parse_stored("2025-12-31 16:00:00").unwrap(), expected);
        assert_eq!(parse_stored("2025-12-31 16:00:00.000000").unwrap(), expected);
        assert_eq!(parse_stored("2025-12-31T16:00:00").unwrap(), expected);
        assert!(parse_stored("yesterday").is_err());
    }

    #[test]
    fn test_format_stored_sorts_chronologically() {
        let earlier = format_stored(utc(2025, 9, 1, 9, 0));
        let later = format_stored(utc(2025, 10, 1, 8, 0));
        assert_eq!(earlier, "2025-09-01T09:00:00.000000Z");
        assert!(earlier < later);
        assert_eq!(parse_stored(&later).unwrap(), utc(2025, 10, 1, 8, 0));
    }

    #[test]
    fn test_normalize_legacy_assumes_utc() {
        let naive = date(2025, 12, 1).and_hms_opt(6, 30, 0).unwrap();
        let normalized = normalize_legacy(naive);
        assert_eq!(normalized, utc(2025, 12, 1, 6, 30));
        assert_eq!(tokyo().local_date(normalized), date(2025, 12, 1));
    }
}
