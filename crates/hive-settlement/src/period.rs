use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};

use hive_core::types::Timestamp;

/// ISO year-week period string (`YYYY-WW`) for a timestamp.
pub fn period_string(timestamp: Timestamp) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_opt(timestamp, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let week = dt.iso_week();
    format!("{}-{:02}", week.year(), week.week())
}

/// Period string for the week before `timestamp`.
pub fn previous_period(timestamp: Timestamp) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_opt(timestamp, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let prev = dt - Duration::weeks(1);
    let week = prev.iso_week();
    format!("{}-{:02}", week.year(), week.week())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_iso_year_week() {
        // 2026-01-15 is in ISO week 3 of 2026.
        let ts = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap().timestamp();
        assert_eq!(period_string(ts), "2026-03");
    }

    #[test]
    fn iso_year_differs_from_calendar_year_at_boundaries() {
        // 2027-01-01 falls in ISO week 53 of 2026.
        let ts = Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap().timestamp();
        assert_eq!(period_string(ts), "2026-53");
    }

    #[test]
    fn previous_period_steps_back_one_week() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap().timestamp();
        assert_eq!(previous_period(ts), "2026-02");
    }

    #[test]
    fn week_numbers_are_zero_padded() {
        let ts = Utc.with_ymd_and_hms(2026, 2, 3, 0, 0, 0).unwrap().timestamp();
        let period = period_string(ts);
        assert_eq!(period.len(), 7);
    }
}
