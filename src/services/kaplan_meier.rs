//! Kaplan-Meier product-limit estimator
//!
//! Interval boundaries are the distinct failure times; a trailing interval
//! reaches the largest observed time when that is a censoring time. Each
//! interval carries the survival in effect when it opens, so the first one is
//! always stamped 1.0.

use thiserror::Error;

use crate::models::observation::Observation;
use crate::models::survival::SurvivalInterval;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KaplanMeierError {
    #[error("times and censoring flags differ in length ({times} vs {censored})")]
    LengthMismatch { times: usize, censored: usize },
    #[error("at least 2 observations are required, got {0}")]
    TooFewObservations(usize),
    #[error("times must be ascending (index {index})")]
    UnsortedTimes { index: usize },
    #[error("negative time {time} at index {index}")]
    NegativeTime { index: usize, time: i64 },
    #[error("no positive time to build an interval from")]
    EmptyTimeline,
}

/// Estimate the survival curve of ascending `times` (minutes)
pub fn estimate(times: &[i64], censored: &[bool]) -> Result<Vec<SurvivalInterval>, KaplanMeierError> {
    validate(times, censored)?;

    let mut intervals = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (&time, &is_censored) in times.iter().zip(censored) {
        end = time;
        if !is_censored && end > start {
            intervals.push(SurvivalInterval::new(start, end));
            start = end;
        }
    }
    if end > start {
        intervals.push(SurvivalInterval::new(start, end));
    }
    if intervals.is_empty() {
        return Err(KaplanMeierError::EmptyTimeline);
    }

    let mut at_risk = times.len() as f64;
    let mut cumulative_survival = 1.0_f64;
    let mut current = 0;
    intervals[current].cumulative_survival = cumulative_survival;

    for (&time, &is_censored) in times.iter().zip(censored) {
        if time > intervals[current].end {
            let passed = &intervals[current];
            at_risk -= passed.number_censored as f64;
            let survivors = at_risk - passed.number_died as f64;
            cumulative_survival *= survivors / at_risk;
            at_risk -= passed.number_died as f64;

            while current + 1 < intervals.len() && time > intervals[current].end {
                current += 1;
                intervals[current].cumulative_survival = cumulative_survival;
            }
        }

        if is_censored {
            intervals[current].number_censored += 1;
        } else {
            intervals[current].number_died += 1;
        }
    }

    Ok(intervals)
}

/// Estimate from observations already ordered by time to revocation
pub fn estimate_from_observations(
    observations: &[Observation],
) -> Result<Vec<SurvivalInterval>, KaplanMeierError> {
    let (times, censored): (Vec<i64>, Vec<bool>) = observations
        .iter()
        .map(|o| (o.time_to_revocation, o.censored))
        .unzip();
    estimate(&times, &censored)
}

/// Minutes a job can run while survival stays at or above `threshold`.
///
/// The end of the last interval still at the threshold, or of the first
/// interval when none is; 0 for an empty curve.
pub fn survival_horizon(intervals: &[SurvivalInterval], threshold: f64) -> i64 {
    intervals
        .iter()
        .take_while(|interval| interval.cumulative_survival >= threshold)
        .last()
        .or_else(|| intervals.first())
        .map(|interval| interval.end)
        .unwrap_or(0)
}

fn validate(times: &[i64], censored: &[bool]) -> Result<(), KaplanMeierError> {
    if times.len() != censored.len() {
        return Err(KaplanMeierError::LengthMismatch {
            times: times.len(),
            censored: censored.len(),
        });
    }
    if times.len() < 2 {
        return Err(KaplanMeierError::TooFewObservations(times.len()));
    }
    for (index, &time) in times.iter().enumerate() {
        if time < 0 {
            return Err(KaplanMeierError::NegativeTime { index, time });
        }
        if index > 0 && time < times[index - 1] {
            return Err(KaplanMeierError::UnsortedTimes { index });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_reference_dataset() {
        let times = [1, 2, 3, 4, 5, 10, 120];
        let censored = [false, false, false, false, false, false, true];

        let intervals = estimate(&times, &censored).unwrap();

        let bounds: Vec<(i64, i64)> = intervals.iter().map(|i| (i.start, i.end)).collect();
        assert_eq!(
            bounds,
            vec![(0, 1), (1, 2), (2, 3), (3, 4), (4, 5), (5, 10), (10, 120)]
        );

        let expected = [1.0, 6.0 / 7.0, 5.0 / 7.0, 4.0 / 7.0, 3.0 / 7.0, 2.0 / 7.0, 1.0 / 7.0];
        for (interval, expected) in intervals.iter().zip(expected) {
            assert_close(interval.cumulative_survival, expected);
        }

        assert!(intervals[..6].iter().all(|i| i.number_died == 1 && i.number_censored == 0));
        assert_eq!(intervals[6].number_died, 0);
        assert_eq!(intervals[6].number_censored, 1);
    }

    #[test]
    fn test_ties_and_censoring_inside_an_interval() {
        // Two deaths at 60, a censor at 90, a death at 120, a censor at 200
        let times = [60, 60, 90, 120, 200];
        let censored = [false, false, true, false, true];

        let intervals = estimate(&times, &censored).unwrap();
        assert_eq!(intervals.len(), 3);

        assert_eq!((intervals[0].start, intervals[0].end), (0, 60));
        assert_eq!(intervals[0].number_died, 2);
        assert_close(intervals[0].cumulative_survival, 1.0);

        assert_eq!((intervals[1].start, intervals[1].end), (60, 120));
        assert_eq!(intervals[1].number_died, 1);
        assert_eq!(intervals[1].number_censored, 1);
        assert_close(intervals[1].cumulative_survival, 3.0 / 5.0);

        // 2 at risk after the censor, one of them dies
        assert_eq!((intervals[2].start, intervals[2].end), (120, 200));
        assert_close(intervals[2].cumulative_survival, 3.0 / 5.0 * 1.0 / 2.0);
    }

    #[test]
    fn test_all_censored_yields_single_flat_interval() {
        let intervals = estimate(&[70, 80, 90], &[true, true, true]).unwrap();
        assert_eq!(intervals.len(), 1);
        assert_eq!((intervals[0].start, intervals[0].end), (0, 90));
        assert_eq!(intervals[0].number_censored, 3);
        assert_close(intervals[0].cumulative_survival, 1.0);
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert_eq!(
            estimate(&[1, 2], &[false]),
            Err(KaplanMeierError::LengthMismatch { times: 2, censored: 1 })
        );
        assert_eq!(
            estimate(&[5], &[false]),
            Err(KaplanMeierError::TooFewObservations(1))
        );
        assert_eq!(
            estimate(&[5, 3], &[false, false]),
            Err(KaplanMeierError::UnsortedTimes { index: 1 })
        );
        assert_eq!(
            estimate(&[-1, 3], &[false, false]),
            Err(KaplanMeierError::NegativeTime { index: 0, time: -1 })
        );
        assert_eq!(
            estimate(&[0, 0], &[false, true]),
            Err(KaplanMeierError::EmptyTimeline)
        );
    }

    #[test]
    fn test_survival_horizon() {
        let times = [1, 2, 3, 4, 5, 10, 120];
        let censored = [false, false, false, false, false, false, true];
        let intervals = estimate(&times, &censored).unwrap();

        assert_eq!(survival_horizon(&intervals, 0.95), 1);
        assert_eq!(survival_horizon(&intervals, 0.5), 4);
        assert_eq!(survival_horizon(&intervals, 0.0), 120);
        assert_eq!(survival_horizon(&[], 0.95), 0);
    }
}
