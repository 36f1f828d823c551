use crate::errors::{AppError, AppResult};
use crate::models::{Granularity, TimeWindow};
use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

use super::plan::{Column, Condition, ConditionValue, Operator};

/// Decides whether a query window is split into a coarser inner range.
///
/// Returns the extra conditions restricting the main query to the inner range
/// and the granularity it should run at.
pub trait GranularityStrategy: fmt::Debug + Send + Sync {
    fn split(&self, window: &TimeWindow, configured: Granularity) -> (Vec<Condition>, Option<Granularity>);
}

/// Runs the day-aligned middle of a long, unaligned window at daily granularity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitByDay;

impl GranularityStrategy for SplitByDay {
    fn split(&self, window: &TimeWindow, configured: Granularity) -> (Vec<Condition>, Option<Granularity>) {
        if configured == Granularity::Day || window.duration_seconds() <= Granularity::Day.seconds() {
            return (Vec::new(), Some(configured));
        }
        match day_aligned_inner(window) {
            Some(inner) if inner != *window => (
                vec![
                    Condition::compare(Column::Timestamp, Operator::Gte, ConditionValue::Time(inner.start)),
                    Condition::compare(Column::Timestamp, Operator::Lt, ConditionValue::Time(inner.end)),
                ],
                Some(Granularity::Day),
            ),
            _ => (Vec::new(), Some(configured)),
        }
    }
}

/// Timeseries keep one bucket size across the whole window.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreserveGranularity;

impl GranularityStrategy for PreserveGranularity {
    fn split(&self, _window: &TimeWindow, configured: Granularity) -> (Vec<Condition>, Option<Granularity>) {
        (Vec::new(), Some(configured))
    }
}

pub fn day_aligned_inner(window: &TimeWindow) -> Option<TimeWindow> {
    let day = Granularity::Day.seconds();
    let start = window.start.timestamp();
    let end = window.end.timestamp();
    let inner_start = start.div_euclid(day) * day + if start.rem_euclid(day) == 0 { 0 } else { day };
    let inner_end = end.div_euclid(day) * day;
    if inner_end <= inner_start {
        return None;
    }
    Some(TimeWindow::new(timestamp(inner_start)?, timestamp(inner_end)?))
}

/// Parts of `window` outside `inner`.
pub fn edges(window: &TimeWindow, inner: &TimeWindow) -> Vec<TimeWindow> {
    let mut edges = Vec::new();
    if window.start < inner.start {
        edges.push(TimeWindow::new(window.start, inner.start));
    }
    if inner.end < window.end {
        edges.push(TimeWindow::new(inner.end, window.end));
    }
    edges
}

/// Largest granularity both window bounds sit on.
pub fn granularity_for_window(window: &TimeWindow) -> Granularity {
    Granularity::ALL
        .into_iter()
        .find(|granularity| window.is_aligned_to(*granularity))
        .unwrap_or(Granularity::Minute)
}

/// Largest granularity that evenly divides a timeseries interval.
pub fn granularity_for_interval(interval_seconds: i64) -> AppResult<Granularity> {
    if interval_seconds <= 0 || interval_seconds % Granularity::Minute.seconds() != 0 {
        return Err(AppError::InvalidSearchQuery(format!(
            "interval must be a positive multiple of 60 seconds, got {interval_seconds}"
        )));
    }
    Ok(Granularity::ALL
        .into_iter()
        .find(|granularity| interval_seconds % granularity.seconds() == 0)
        .unwrap_or(Granularity::Minute))
}

fn timestamp(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn preserve_never_splits() {
        let windows = [
            TimeWindow::new(at(1, 5), at(9, 7)),
            TimeWindow::new(at(1, 0), at(2, 0)),
            TimeWindow::new(at(1, 5), at(1, 6)),
        ];
        for window in windows {
            for granularity in Granularity::ALL {
                assert_eq!(PreserveGranularity.split(&window, granularity), (Vec::new(), Some(granularity)));
            }
        }
    }

    #[test]
    fn split_by_day_restricts_to_aligned_middle() {
        let window = TimeWindow::new(at(1, 5), at(4, 7));
        let (conditions, granularity) = SplitByDay.split(&window, Granularity::Hour);
        assert_eq!(granularity, Some(Granularity::Day));
        assert_eq!(
            conditions,
            vec![
                Condition::compare(Column::Timestamp, Operator::Gte, ConditionValue::Time(at(2, 0))),
                Condition::compare(Column::Timestamp, Operator::Lt, ConditionValue::Time(at(4, 0))),
            ]
        );
    }

    #[test]
    fn split_by_day_leaves_short_windows_alone() {
        let window = TimeWindow::new(at(1, 5), at(1, 23));
        assert_eq!(SplitByDay.split(&window, Granularity::Hour), (Vec::new(), Some(Granularity::Hour)));
    }

    #[test]
    fn edges_cover_the_unaligned_fringes() {
        let window = TimeWindow::new(at(1, 5), at(4, 7));
        let inner = day_aligned_inner(&window).expect("inner");
        assert_eq!(
            edges(&window, &inner),
            vec![TimeWindow::new(at(1, 5), at(2, 0)), TimeWindow::new(at(4, 0), at(4, 7))]
        );
    }

    #[test]
    fn picks_granularity_from_window_and_interval() {
        assert_eq!(granularity_for_window(&TimeWindow::new(at(1, 0), at(3, 0))), Granularity::Day);
        assert_eq!(granularity_for_window(&TimeWindow::new(at(1, 4), at(3, 0))), Granularity::Hour);
        assert_eq!(granularity_for_interval(7_200).expect("2h"), Granularity::Hour);
        assert_eq!(granularity_for_interval(300).expect("5m"), Granularity::Minute);
        assert!(granularity_for_interval(90).is_err());
    }
}
