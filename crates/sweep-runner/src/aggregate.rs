use serde::Serialize;

use crate::error::DimensionMismatch;
use crate::parse::Sample;

/// Per-position extrema across every sample folded so far.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateState {
    pub minima: Vec<f64>,
    pub maxima: Vec<f64>,
}

impl AggregateState {
    fn from_values(values: &[f64]) -> Self {
        Self {
            minima: values.to_vec(),
            maxima: values.to_vec(),
        }
    }

    fn fold(&mut self, minima: &[f64], maxima: &[f64]) {
        for (current, v) in self.minima.iter_mut().zip(minima) {
            *current = current.min(*v);
        }
        for (current, v) in self.maxima.iter_mut().zip(maxima) {
            *current = current.max(*v);
        }
    }
}

/// Running min/max accumulator.
///
/// The first sample initializes both vectors; later samples only move
/// `minima` down and `maxima` up. Folding order never changes the result.
#[derive(Debug, Clone)]
pub struct StatAggregator {
    arity: usize,
    count: usize,
    state: Option<AggregateState>,
}

impl StatAggregator {
    pub fn new(arity: usize) -> Self {
        Self {
            arity,
            count: 0,
            state: None,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn update(&mut self, sample: &Sample) -> Result<(), DimensionMismatch> {
        self.check(sample.values().len())?;
        let values = sample.values();
        match self.state.as_mut() {
            Some(state) => state.fold(values, values),
            None => self.state = Some(AggregateState::from_values(values)),
        }
        self.count += 1;
        Ok(())
    }

    /// Reduces another partial aggregate into this one.
    pub fn merge(&mut self, other: StatAggregator) -> Result<(), DimensionMismatch> {
        self.check(other.arity)?;
        let Some(theirs) = other.state else {
            return Ok(());
        };
        match self.state.as_mut() {
            Some(state) => state.fold(&theirs.minima, &theirs.maxima),
            None => self.state = Some(theirs),
        }
        self.count += other.count;
        Ok(())
    }

    pub fn state(&self) -> Option<&AggregateState> {
        self.state.as_ref()
    }

    /// Current extrema, or `None` before the first sample. Does not reset.
    pub fn finalize(&self) -> Option<AggregateState> {
        self.state.clone()
    }

    fn check(&self, actual: usize) -> Result<(), DimensionMismatch> {
        if actual != self.arity {
            return Err(DimensionMismatch {
                expected: self.arity,
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(values: &[f64]) -> Sample {
        Sample::new(values.to_vec(), values.len()).expect("sample")
    }

    fn fold_all(samples: &[Sample]) -> AggregateState {
        let mut agg = StatAggregator::new(samples[0].values().len());
        for s in samples {
            agg.update(s).expect("update");
        }
        agg.finalize().expect("state")
    }

    #[test]
    fn single_sample_sets_both_extrema() {
        let s = sample(&[1.0, -2.0, 3.5]);
        let state = fold_all(std::slice::from_ref(&s));
        assert_eq!(state.minima, s.values());
        assert_eq!(state.maxima, s.values());
    }

    #[test]
    fn tracks_true_min_and_max_per_position() {
        let samples = vec![
            sample(&[1.0, 2.0, 3.0]),
            sample(&[0.5, 2.5, 3.5]),
            sample(&[4.0, -1.0, 3.25]),
        ];
        let state = fold_all(&samples);
        assert_eq!(state.minima, vec![0.5, -1.0, 3.0]);
        assert_eq!(state.maxima, vec![4.0, 2.5, 3.5]);
    }

    #[test]
    fn result_is_independent_of_order() {
        let samples = vec![
            sample(&[3.0, 0.0]),
            sample(&[-1.0, 7.0]),
            sample(&[2.0, -4.0]),
            sample(&[9.0, 1.0]),
        ];
        let forward = fold_all(&samples);
        let mut reversed = samples.clone();
        reversed.reverse();
        assert_eq!(fold_all(&reversed), forward);
        let rotated = vec![
            samples[2].clone(),
            samples[0].clone(),
            samples[3].clone(),
            samples[1].clone(),
        ];
        assert_eq!(fold_all(&rotated), forward);
    }

    #[test]
    fn extrema_move_monotonically() {
        let mut agg = StatAggregator::new(2);
        let mut last: Option<AggregateState> = None;
        for s in [
            sample(&[5.0, 5.0]),
            sample(&[6.0, 4.0]),
            sample(&[1.0, 9.0]),
            sample(&[3.0, 3.0]),
        ] {
            agg.update(&s).expect("update");
            let state = agg.finalize().expect("state");
            for i in 0..2 {
                assert!(state.minima[i] <= s.values()[i]);
                assert!(s.values()[i] <= state.maxima[i]);
            }
            if let Some(prev) = &last {
                for i in 0..2 {
                    assert!(state.minima[i] <= prev.minima[i]);
                    assert!(state.maxima[i] >= prev.maxima[i]);
                }
            }
            last = Some(state);
        }
        assert_eq!(agg.count(), 4);
    }

    #[test]
    fn mismatched_sample_is_rejected_without_touching_state() {
        let mut agg = StatAggregator::new(3);
        agg.update(&sample(&[1.0, 2.0, 3.0])).expect("update");
        let err = agg.update(&sample(&[0.0, 0.0])).expect_err("mismatch");
        assert_eq!(
            err,
            DimensionMismatch {
                expected: 3,
                actual: 2
            }
        );
        assert_eq!(agg.count(), 1);
        assert_eq!(
            agg.state().expect("state").minima,
            vec![1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn finalize_is_read_only() {
        let mut agg = StatAggregator::new(1);
        assert!(agg.finalize().is_none());
        agg.update(&sample(&[2.0])).expect("update");
        let first = agg.finalize();
        let second = agg.finalize();
        assert_eq!(first, second);
        assert_eq!(agg.count(), 1);
    }

    #[test]
    fn merge_equals_sequential_fold() {
        let samples = vec![
            sample(&[1.0, 8.0]),
            sample(&[4.0, -3.0]),
            sample(&[-2.0, 0.5]),
            sample(&[6.0, 2.0]),
        ];
        let mut left = StatAggregator::new(2);
        let mut right = StatAggregator::new(2);
        for s in &samples[..2] {
            left.update(s).expect("left");
        }
        for s in &samples[2..] {
            right.update(s).expect("right");
        }
        left.merge(right).expect("merge");
        assert_eq!(left.count(), 4);
        assert_eq!(left.finalize().expect("state"), fold_all(&samples));
    }

    #[test]
    fn merge_handles_empty_sides() {
        let mut empty = StatAggregator::new(2);
        let mut full = StatAggregator::new(2);
        full.update(&sample(&[1.0, 2.0])).expect("update");
        empty.merge(full.clone()).expect("merge into empty");
        assert_eq!(empty.finalize(), full.finalize());
        full.merge(StatAggregator::new(2)).expect("merge empty");
        assert_eq!(full.count(), 1);
        assert!(StatAggregator::new(2).merge(StatAggregator::new(3)).is_err());
    }
}
