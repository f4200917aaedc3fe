use chrono::{NaiveDate, NaiveDateTime};

use crate::models::MonthKey;

/// Every calendar month overlapping `[start, end)`, in order.
pub fn months_in_window(start: NaiveDateTime, end: NaiveDateTime) -> Vec<MonthKey> {
    let mut months = Vec::new();
    if end <= start {
        return months;
    }
    let mut current = MonthKey::of(start);
    while current.start() < end {
        months.push(current);
        current = current.next();
    }
    months
}

/// The `count` full months before the month containing `today`, as `[start, end)`.
pub fn trailing_full_months(today: NaiveDate, count: u32) -> (NaiveDateTime, NaiveDateTime) {
    let anchor = MonthKey::of(today.and_time(chrono::NaiveTime::MIN));
    let mut first = anchor;
    for _ in 0..count {
        first = first.previous();
    }
    (first.start(), anchor.start())
}

/// Twelve full months ending at the start of the month containing `asof`.
pub fn rolling_12_full_months(asof: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    trailing_full_months(asof, 12)
}
