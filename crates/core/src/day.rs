use chrono::{Duration, Local, NaiveDate, TimeZone};

/// Local-time bounds of one calendar day, in epoch milliseconds.
///
/// Every source parser and every duration/token algorithm filters against
/// the same pair of instants, so the sources cannot disagree about what
/// "today" means regardless of how they store timestamps internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub date: NaiveDate,
    /// 00:00:00.000 local time.
    pub start_ms: i64,
    /// 23:59:59.999 local time.
    pub end_ms: i64,
}

impl DayWindow {
    pub fn for_date(date: NaiveDate) -> Self {
        let start_ms = local_midnight_ms(date);
        let end_ms = local_midnight_ms(date + Duration::days(1)) - 1;
        Self {
            date,
            start_ms,
            end_ms,
        }
    }

    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.start_ms && ts_ms <= self.end_ms
    }

    /// Whether a `[start, end]` range has any overlap with the day.
    pub fn overlaps(&self, start_ms: i64, end_ms: i64) -> bool {
        start_ms <= self.end_ms && end_ms >= self.start_ms
    }

    pub fn clamp(&self, ts_ms: i64) -> i64 {
        ts_ms.clamp(self.start_ms, self.end_ms)
    }
}

fn local_midnight_ms(date: NaiveDate) -> i64 {
    let naive = date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
    // On DST transitions local midnight can be ambiguous or skipped;
    // earliest() picks the first valid instant either way.
    match Local.from_local_datetime(&naive).earliest() {
        Some(dt) => dt.timestamp_millis(),
        None => Local
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.timestamp_millis() - 3_600_000)
            .unwrap_or_else(|| naive.and_utc().timestamp_millis()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> DayWindow {
        DayWindow::for_date(NaiveDate::from_ymd_opt(2026, 3, 10).unwrap())
    }

    #[test]
    fn test_window_spans_exactly_one_day() {
        let w = window();
        assert_eq!(w.end_ms - w.start_ms, 86_400_000 - 1);
    }

    #[test]
    fn test_contains_bounds() {
        let w = window();
        assert!(w.contains(w.start_ms));
        assert!(w.contains(w.end_ms));
        assert!(!w.contains(w.start_ms - 1));
        assert!(!w.contains(w.end_ms + 1));
    }

    #[test]
    fn test_overlaps() {
        let w = window();
        assert!(w.overlaps(w.start_ms - 1000, w.start_ms + 1000));
        assert!(w.overlaps(w.end_ms, w.end_ms + 5000));
        assert!(!w.overlaps(w.end_ms + 1, w.end_ms + 5000));
        assert!(!w.overlaps(w.start_ms - 5000, w.start_ms - 1));
    }

    #[test]
    fn test_clamp() {
        let w = window();
        assert_eq!(w.clamp(w.start_ms - 99), w.start_ms);
        assert_eq!(w.clamp(w.end_ms + 99), w.end_ms);
        let mid = w.start_ms + 1234;
        assert_eq!(w.clamp(mid), mid);
    }

    #[test]
    fn test_consecutive_days_are_adjacent() {
        let a = DayWindow::for_date(NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
        let b = DayWindow::for_date(NaiveDate::from_ymd_opt(2026, 3, 11).unwrap());
        assert_eq!(a.end_ms + 1, b.start_ms);
    }
}
