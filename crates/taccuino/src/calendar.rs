use chrono::{Datelike, Days, NaiveDate};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::timezone::first_of_month;

/// Seven consecutive dates, Sunday first
pub type Week = [NaiveDate; 7];

/// All weeks needed to draw one month, padded with days of the
/// neighbouring months so every row is complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthGrid {
    pub year: i32,
    pub month: u32,
    pub weeks: Vec<Week>,
}

impl MonthGrid {
    pub fn in_month(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.weeks.iter().flatten().copied()
    }

    pub fn previous(&self) -> (i32, u32) {
        shift_month(self.year, self.month, -1)
    }

    pub fn next(&self) -> (i32, u32) {
        shift_month(self.year, self.month, 1)
    }
}

/// Build the Sunday-first grid for `year`/`month`
pub fn build_month_grid(year: i32, month: u32) -> AppResult<MonthGrid> {
    let first = first_of_month(year, month)?;
    let (next_year, next_month) = shift_month(year, month, 1);
    let last = first_of_month(next_year, next_month)?
        .pred_opt()
        .ok_or_else(|| AppError::InvalidDate(format!("{year}-{month:02}")))?;

    let lead = first.weekday().num_days_from_sunday() as u64;
    let trail = 6 - last.weekday().num_days_from_sunday() as u64;

    let start = first
        .checked_sub_days(Days::new(lead))
        .ok_or_else(|| AppError::InvalidDate(format!("{year}-{month:02}")))?;
    let end = last
        .checked_add_days(Days::new(trail))
        .ok_or_else(|| AppError::InvalidDate(format!("{year}-{month:02}")))?;

    let days: Vec<NaiveDate> = start.iter_days().take_while(|d| *d <= end).collect();
    let weeks = days
        .chunks_exact(7)
        .map(|chunk| {
            let mut week = [start; 7];
            week.copy_from_slice(chunk);
            week
        })
        .collect();

    Ok(MonthGrid { year, month, weeks })
}

/// Move `delta` months away from `year`/`month`
pub fn shift_month(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let index = year as i64 * 12 + (month as i64 - 1) + delta as i64;
    (index.div_euclid(12) as i32, index.rem_euclid(12) as u32 + 1)
}
