//! # Time series
//! Daily mention counts with a trailing moving average.
//!
//! Days without mentions are simply absent (no gap filling); the average runs
//! over the last `window` *points*, not calendar days.

use std::collections::{BTreeMap, VecDeque};

use chrono::NaiveDate;

use crate::model::{Mention, TimeSeriesPoint};

/// Count mentions per calendar day and smooth over a trailing window of
/// `window` points (`[max(0, i-w+1), i]`). `window <= 1` leaves counts as is.
pub fn build<'a, I>(mentions: I, window: usize) -> Vec<TimeSeriesPoint>
where
    I: IntoIterator<Item = &'a Mention>,
{
    let mut per_day: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for m in mentions {
        *per_day.entry(m.date).or_default() += 1;
    }
    let counts: Vec<(NaiveDate, u64)> = per_day.into_iter().collect();
    let smoothed = moving_average(counts.iter().map(|(_, c)| *c), window);

    counts
        .into_iter()
        .zip(smoothed)
        .map(|((date, raw_count), smoothed_count)| TimeSeriesPoint {
            date,
            raw_count,
            smoothed_count,
        })
        .collect()
}

/// Trailing mean over at most `window` values (fewer at the start).
pub fn moving_average<I>(values: I, window: usize) -> Vec<f64>
where
    I: IntoIterator<Item = u64>,
{
    let w = window.max(1);
    let mut buf: VecDeque<u64> = VecDeque::with_capacity(w);
    let mut sum: u64 = 0;
    let mut out = Vec::new();

    for v in values {
        buf.push_back(v);
        sum += v;
        if buf.len() > w {
            if let Some(old) = buf.pop_front() {
                sum -= old;
            }
        }
        out.push(sum as f64 / buf.len() as f64);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn on(day: u32, n: usize) -> Vec<Mention> {
        (0..n)
            .map(|i| Mention {
                date: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
                source_domain: "example.com".into(),
                url: format!("https://example.com/{day}/{i}"),
                matched_keyword: "uncertainty".into(),
                context_window: Vec::new(),
                co_occurring_terms: BTreeSet::new(),
            })
            .collect()
    }

    #[test]
    fn trailing_average_over_points() {
        assert_eq!(moving_average([10, 20, 30], 2), vec![10.0, 15.0, 25.0]);
        assert_eq!(moving_average([10, 20, 30], 1), vec![10.0, 20.0, 30.0]);
        assert_eq!(moving_average([10, 20, 30], 0), vec![10.0, 20.0, 30.0]);
        assert_eq!(moving_average([3, 6, 9, 12], 7), vec![3.0, 4.5, 6.0, 7.5]);
        assert!(moving_average(Vec::<u64>::new(), 3).is_empty());
    }

    #[test]
    fn groups_by_day_sorted_without_gap_filling() {
        let mut ms = on(5, 30);
        ms.extend(on(1, 10));
        ms.extend(on(3, 20));
        let series = build(&ms, 2);
        let dates: Vec<u32> = series.iter().map(|p| chrono::Datelike::day(&p.date)).collect();
        assert_eq!(dates, vec![1, 3, 5]);
        let raw: Vec<u64> = series.iter().map(|p| p.raw_count).collect();
        assert_eq!(raw, vec![10, 20, 30]);
        let smooth: Vec<f64> = series.iter().map(|p| p.smoothed_count).collect();
        assert_eq!(smooth, vec![10.0, 15.0, 25.0]);
    }

    #[test]
    fn window_one_returns_raw_counts() {
        let ms = on(2, 4);
        let series = build(&ms, 1);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].smoothed_count, 4.0);
    }
}
