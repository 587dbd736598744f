//! Forward-window maxima over a date-sorted series.
//!
//! For every query date `t` we need `max S(d)` over observations with
//! `t < d <= t + horizon`. Both window bounds only move forward as `t`
//! increases, so a monotonic deque answers all queries in O(n + q).
//! The naive scan is kept for small inputs and as a cross-check.

use std::collections::VecDeque;

use chrono::{Duration, NaiveDate};

/// Maximum observed value in `(t, t + horizon]` for each query date.
///
/// `obs` and `queries` must be sorted ascending. `None` means no observation
/// falls inside the window.
pub fn forward_max_deque(
    obs: &[(NaiveDate, f64)],
    queries: &[NaiveDate],
    horizon: Duration,
) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(queries.len());
    // Indices into `obs`, values strictly decreasing from front to back.
    let mut deque: VecDeque<usize> = VecDeque::new();
    let mut hi = 0;

    for &t in queries {
        let end = t + horizon;
        while hi < obs.len() && obs[hi].0 <= end {
            while deque.back().is_some_and(|&b| obs[b].1 <= obs[hi].1) {
                deque.pop_back();
            }
            deque.push_back(hi);
            hi += 1;
        }
        while deque.front().is_some_and(|&f| obs[f].0 <= t) {
            deque.pop_front();
        }
        out.push(deque.front().map(|&f| obs[f].1));
    }
    out
}

/// Same contract as [`forward_max_deque`], scanning each window directly.
pub fn forward_max_naive(
    obs: &[(NaiveDate, f64)],
    queries: &[NaiveDate],
    horizon: Duration,
) -> Vec<Option<f64>> {
    queries
        .iter()
        .map(|&t| {
            let end = t + horizon;
            let start = obs.partition_point(|o| o.0 <= t);
            obs[start..]
                .iter()
                .take_while(|o| o.0 <= end)
                .map(|o| o.1)
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand::rngs::StdRng;

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + Duration::days(n)
    }

    #[test]
    fn window_excludes_start_and_includes_end() {
        let obs = vec![
            (day(0), 100.0),
            (day(30), 100.0),
            (day(60), 650.0),
            (day(90), 100.0),
            (day(120), 100.0),
        ];
        let queries = vec![day(0), day(60), day(90)];
        let h = Duration::days(30);

        let expected = vec![Some(100.0), Some(100.0), Some(100.0)];
        assert_eq!(forward_max_deque(&obs, &queries, h), expected);
        assert_eq!(forward_max_naive(&obs, &queries, h), expected);

        let wide = Duration::days(90);
        assert_eq!(forward_max_deque(&obs, &[day(0)], wide), vec![Some(650.0)]);
        assert_eq!(forward_max_deque(&obs, &[day(120)], wide), vec![None]);
    }

    #[test]
    fn deque_matches_naive_on_random_series() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut obs = Vec::new();
        let mut n = 0i64;
        for _ in 0..400 {
            n += rng.gen_range(1..5);
            obs.push((day(n), rng.gen_range(50.0..900.0)));
        }
        // Queries include days that are not observation days.
        let queries: Vec<NaiveDate> = (0..n + 10).step_by(3).map(day).collect();

        for h in [1, 7, 30, 90] {
            let h = Duration::days(h);
            assert_eq!(
                forward_max_deque(&obs, &queries, h),
                forward_max_naive(&obs, &queries, h)
            );
        }
    }
}
