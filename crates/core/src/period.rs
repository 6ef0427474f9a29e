use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    /// The calendar month containing `date`.
    pub fn month_of(date: NaiveDate) -> Self {
        let start = date.with_day(1).unwrap_or(date);
        let end = start
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt())
            .unwrap_or(NaiveDate::MAX);
        DateRange { start, end }
    }

    /// Widens both ends by `days`, saturating at the calendar limits.
    pub fn expand(self, days: u32) -> Self {
        let days = Days::new(u64::from(days));
        DateRange {
            start: self.start.checked_sub_days(days).unwrap_or(NaiveDate::MIN),
            end: self.end.checked_add_days(days).unwrap_or(NaiveDate::MAX),
        }
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Absolute whole-day distance between two dates.
pub fn days_between(a: NaiveDate, b: NaiveDate) -> u64 {
    (a - b).num_days().unsigned_abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn date_range_contains() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 12, 31));
        assert!(range.contains(date(2024, 6, 15)));
        assert!(range.contains(date(2024, 1, 1))); // inclusive start
        assert!(range.contains(date(2024, 12, 31))); // inclusive end
        assert!(!range.contains(date(2023, 12, 31)));
        assert!(!range.contains(date(2025, 1, 1)));
    }

    #[test]
    fn month_of_handles_short_months() {
        let feb = DateRange::month_of(date(2024, 2, 17));
        assert_eq!(feb.start, date(2024, 2, 1));
        assert_eq!(feb.end, date(2024, 2, 29));

        let dec = DateRange::month_of(date(2025, 12, 3));
        assert_eq!(dec.end, date(2025, 12, 31));
    }

    #[test]
    fn expand_adds_buffer_on_both_sides() {
        let jan = DateRange::month_of(date(2025, 1, 1)).expand(14);
        assert_eq!(jan.start, date(2024, 12, 18));
        assert_eq!(jan.end, date(2025, 2, 14));
    }

    #[test]
    fn days_between_is_symmetric() {
        assert_eq!(days_between(date(2025, 1, 15), date(2025, 1, 18)), 3);
        assert_eq!(days_between(date(2025, 1, 18), date(2025, 1, 15)), 3);
        assert_eq!(days_between(date(2025, 1, 15), date(2025, 1, 15)), 0);
    }

    #[test]
    fn date_range_display() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 12, 31));
        assert_eq!(range.to_string(), "2024-01-01 to 2024-12-31");
    }
}
