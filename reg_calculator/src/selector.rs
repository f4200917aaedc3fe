use chrono::Duration;
use log::warn;

use crate::error::EstimateError;
use crate::models::{HourlyRecord, RankingMetric};

/// Longest run of back-to-back hours an asset of this duration can sustain.
///
/// `round(duration_hours)`, at least one hour.
pub fn max_consecutive_hours(duration_hours: f64) -> Result<usize, EstimateError> {
    if !duration_hours.is_finite() || duration_hours <= 0.0 {
        return Err(EstimateError::InvalidDuration(duration_hours));
    }
    Ok((duration_hours.round() as usize).max(1))
}

/// Greedy top-N hour selection under a maximum contiguous-run constraint.
///
/// Hours are visited by score, highest first, ties in chronological order. An
/// hour is taken unless it would join (or bridge) selected neighbours into a
/// run longer than `max_consecutive`. Hours are contiguous only when exactly
/// one hour apart, so gaps in the series break a run. The candidate counts
/// once in its run.
///
/// This is a heuristic, not an optimal solution of the constrained top-N
/// problem: an early pick can block a better combination later on. It is
/// deterministic for a given series.
#[derive(Debug, Clone, Copy)]
pub struct DurationFeasibleSelector {
    ranking: RankingMetric,
    max_consecutive: usize,
}

impl DurationFeasibleSelector {
    pub fn new(ranking: RankingMetric, max_consecutive: usize) -> Self {
        let max_consecutive = if max_consecutive == 0 {
            warn!("max_consecutive of 0 is not meaningful, using 1");
            1
        } else {
            max_consecutive
        };
        Self {
            ranking,
            max_consecutive,
        }
    }

    pub fn max_consecutive(&self) -> usize {
        self.max_consecutive
    }

    /// Pick up to `hours_budget` hours, returned in chronological order.
    pub fn select(&self, series: &[HourlyRecord], hours_budget: usize) -> Vec<HourlyRecord> {
        if hours_budget == 0 || series.is_empty() {
            return Vec::new();
        }

        let mut hours = series.to_vec();
        hours.sort_by_key(|record| record.timestamp);
        let linked_to_next: Vec<bool> = hours
            .windows(2)
            .map(|pair| pair[1].timestamp - pair[0].timestamp == Duration::hours(1))
            .collect();

        let scores: Vec<f64> = hours.iter().map(|record| self.ranking.score(record)).collect();
        let mut candidates: Vec<usize> = (0..hours.len()).collect();
        candidates.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

        let mut selected = vec![false; hours.len()];
        let mut picked = 0;
        for idx in candidates {
            if picked >= hours_budget {
                break;
            }
            if run_length_with(idx, &selected, &linked_to_next) > self.max_consecutive {
                continue;
            }
            selected[idx] = true;
            picked += 1;
        }

        hours
            .into_iter()
            .zip(selected)
            .filter_map(|(record, keep)| keep.then_some(record))
            .collect()
    }
}

/// Length of the selected run `idx` would sit in if it were selected too.
fn run_length_with(idx: usize, selected: &[bool], linked_to_next: &[bool]) -> usize {
    let mut run = 1;
    let mut left = idx;
    while left > 0 && linked_to_next[left - 1] && selected[left - 1] {
        run += 1;
        left -= 1;
    }
    let mut right = idx;
    while right + 1 < selected.len() && linked_to_next[right] && selected[right + 1] {
        run += 1;
        right += 1;
    }
    run
}

/// Selection entry point taking the constraint directly.
pub fn select(
    series: &[HourlyRecord],
    hours_budget: usize,
    ranking: RankingMetric,
    max_consecutive: usize,
) -> Vec<HourlyRecord> {
    DurationFeasibleSelector::new(ranking, max_consecutive).select(series, hours_budget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn base() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2024-01-01 00:00", "%Y-%m-%d %H:%M").unwrap()
    }

    fn series(capability: &[f64]) -> Vec<HourlyRecord> {
        capability
            .iter()
            .enumerate()
            .map(|(h, price)| {
                HourlyRecord::new(base() + Duration::hours(h as i64), *price, 0.0, 1.0)
            })
            .collect()
    }

    fn hour_offsets(selected: &[HourlyRecord]) -> Vec<i64> {
        selected
            .iter()
            .map(|r| (r.timestamp - base()).num_hours())
            .collect()
    }

    fn longest_run(selected: &[HourlyRecord]) -> usize {
        let mut longest = 0;
        let mut run = 0;
        let mut previous: Option<NaiveDateTime> = None;
        for record in selected {
            run = match previous {
                Some(p) if record.timestamp - p == Duration::hours(1) => run + 1,
                _ => 1,
            };
            longest = longest.max(run);
            previous = Some(record.timestamp);
        }
        longest
    }

    #[test]
    fn test_max_consecutive_hours() {
        assert_eq!(max_consecutive_hours(4.0), Ok(4));
        assert_eq!(max_consecutive_hours(2.5), Ok(3));
        assert_eq!(max_consecutive_hours(0.25), Ok(1));
        assert!(max_consecutive_hours(0.0).is_err());
        assert!(max_consecutive_hours(-2.0).is_err());
        assert!(max_consecutive_hours(f64::NAN).is_err());
    }

    #[test]
    fn test_tied_scores_split_into_runs() {
        let hours = series(&[10.0; 48]);
        let selected = select(&hours, 6, RankingMetric::Combined, 3);

        assert_eq!(selected.len(), 6);
        assert_eq!(hour_offsets(&selected), vec![0, 1, 2, 4, 5, 6]);
        assert_eq!(longest_run(&selected), 3);
    }

    #[test]
    fn test_zero_budget_or_empty_series() {
        let hours = series(&[5.0, 6.0]);
        assert!(select(&hours, 0, RankingMetric::Combined, 2).is_empty());
        assert!(select(&[], 10, RankingMetric::Combined, 2).is_empty());
    }

    #[test]
    fn test_picks_highest_scores_first() {
        let hours = series(&[1.0, 9.0, 3.0, 8.0, 2.0]);
        let selected = select(&hours, 2, RankingMetric::CapabilityOnly, 4);
        assert_eq!(hour_offsets(&selected), vec![1, 3]);
    }

    #[test]
    fn test_bridging_candidate_is_rejected() {
        // Hours 1 and 3 are picked first; hour 2 would join them into a run of 3.
        let hours = series(&[0.0, 10.0, 5.0, 9.0, 0.0]);
        let selected = select(&hours, 3, RankingMetric::CapabilityOnly, 2);
        assert_eq!(hour_offsets(&selected), vec![0, 1, 3]);
    }

    #[test]
    fn test_gaps_break_contiguity() {
        let mut hours = series(&[5.0, 5.0]);
        hours.push(HourlyRecord::new(base() + Duration::hours(3), 5.0, 0.0, 1.0));
        hours.push(HourlyRecord::new(base() + Duration::hours(4), 5.0, 0.0, 1.0));

        let selected = select(&hours, 4, RankingMetric::Combined, 2);
        assert_eq!(hour_offsets(&selected), vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_zero_max_consecutive_is_coerced() {
        let selector = DurationFeasibleSelector::new(RankingMetric::Combined, 0);
        assert_eq!(selector.max_consecutive(), 1);
        let selected = selector.select(&series(&[1.0; 6]), 6);
        assert_eq!(hour_offsets(&selected), vec![0, 2, 4]);
    }

    #[test]
    fn test_unsorted_input_returns_chronological() {
        let mut hours = series(&[1.0, 7.0, 3.0, 5.0]);
        hours.reverse();
        let selected = select(&hours, 4, RankingMetric::Combined, 4);
        assert_eq!(hour_offsets(&selected), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_performance_ranking_uses_mileage() {
        let hours = vec![
            HourlyRecord::new(base(), 0.0, 10.0, 1.0),
            HourlyRecord::new(base() + Duration::hours(2), 0.0, 6.0, 2.0),
        ];
        let selected = select(&hours, 1, RankingMetric::PerformanceOnly, 1);
        assert_eq!(hour_offsets(&selected), vec![2]);
    }

    #[test]
    fn test_run_and_budget_bounds_hold_for_varied_scores() {
        let mut state: u64 = 42;
        let prices: Vec<f64> = (0..500)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) % 100) as f64
            })
            .collect();
        let hours = series(&prices);

        for max_consecutive in 1..=5 {
            for budget in [0, 1, 17, 250, 499, 1000] {
                let selected = select(&hours, budget, RankingMetric::Combined, max_consecutive);
                assert!(selected.len() <= budget.min(hours.len()));
                assert!(longest_run(&selected) <= max_consecutive);
                assert!(selected.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
            }
        }
    }
}
