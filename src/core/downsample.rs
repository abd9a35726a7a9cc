use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::core::DataPoint;
use crate::core::windowing::first_index_at_or_after;

/// Factors reached while enforcing the point limit, in escalation order.
pub type Escalations = SmallVec<[usize; 4]>;

/// Progressive power-of-two downsampler for one ordered series.
///
/// Points enter one at a time. At factor `F` they collect in a pending group
/// and every complete group of `F` becomes one visible point stamped with the
/// group's first time and carrying the mean of its non-null values. Whenever
/// the visible buffer outgrows the limit the factor doubles and the existing
/// visible points are averaged pairwise, so each escalation costs O(n).
#[derive(Debug, Clone)]
pub struct DownsamplePipeline {
    time_field: String,
    value_field: String,
    limit: Option<usize>,
    factor: usize,
    visible: Vec<DataPoint>,
    pending: Vec<DataPoint>,
}

impl DownsamplePipeline {
    #[must_use]
    pub fn new(
        time_field: impl Into<String>,
        value_field: impl Into<String>,
        limit: Option<usize>,
    ) -> Self {
        Self {
            time_field: time_field.into(),
            value_field: value_field.into(),
            limit,
            factor: 1,
            visible: Vec::new(),
            pending: Vec::new(),
        }
    }

    #[must_use]
    pub fn factor(&self) -> usize {
        self.factor
    }

    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    #[must_use]
    pub fn visible(&self) -> &[DataPoint] {
        &self.visible
    }

    #[must_use]
    pub fn pending(&self) -> &[DataPoint] {
        &self.pending
    }

    /// Earliest time still held, visible or pending.
    #[must_use]
    pub fn earliest_time(&self) -> Option<f64> {
        self.visible
            .first()
            .or_else(|| self.pending.first())
            .and_then(|point| point.time(&self.time_field))
    }

    /// Feeds one point and returns any escalations it caused.
    pub fn ingest(&mut self, point: DataPoint) -> Escalations {
        if self.factor == 1 {
            self.visible.push(point);
        } else {
            self.pending.push(point);
            if self.pending.len() >= self.factor {
                let merged = merge_group(&self.pending, &self.value_field);
                self.pending.clear();
                self.visible.push(merged);
            }
        }
        self.enforce_limit()
    }

    /// Changes the point limit, coarsening immediately when the buffer is over it.
    ///
    /// Raising the limit never refines the buffer; that needs a rebuild from raw data.
    pub fn set_limit(&mut self, limit: Option<usize>) -> Escalations {
        self.limit = limit;
        self.enforce_limit()
    }

    /// Drops every point older than `cutoff` and returns how many went away.
    pub fn retain_from(&mut self, cutoff: f64) -> usize {
        let visible_cut = first_index_at_or_after(&self.visible, &self.time_field, cutoff);
        let pending_cut = first_index_at_or_after(&self.pending, &self.time_field, cutoff);
        self.visible.drain(..visible_cut);
        self.pending.drain(..pending_cut);
        if visible_cut + pending_cut > 0 {
            trace!(
                cutoff,
                dropped = visible_cut + pending_cut,
                "dropped points outside window"
            );
        }
        visible_cut + pending_cut
    }

    /// Clears all data and returns the factor that was active if it was above 1.
    pub fn reset(&mut self) -> Option<usize> {
        self.visible.clear();
        self.pending.clear();
        let previous = self.factor;
        self.factor = 1;
        (previous > 1).then_some(previous)
    }

    fn enforce_limit(&mut self) -> Escalations {
        let mut escalations = Escalations::new();
        let Some(limit) = self.limit else {
            return escalations;
        };
        while self.visible.len() > limit && self.visible.len() > 1 {
            self.escalate();
            escalations.push(self.factor);
        }
        escalations
    }

    fn escalate(&mut self) {
        let previous = self.factor;
        self.factor *= 2;

        let mut coarse = Vec::with_capacity(self.visible.len() / 2 + 1);
        let mut points = std::mem::take(&mut self.visible).into_iter();
        let mut leftover = None;
        loop {
            match (points.next(), points.next()) {
                (Some(first), Some(second)) => {
                    coarse.push(merge_group(&[first, second], &self.value_field));
                }
                (Some(first), None) => {
                    leftover = Some(first);
                    break;
                }
                _ => break,
            }
        }
        self.visible = coarse;

        // An unpaired point already stands for `previous` raw samples, so it
        // re-enters the pending group with that weight ahead of the raw tail.
        if let Some(point) = leftover {
            let raw_tail = std::mem::take(&mut self.pending);
            self.pending = std::iter::repeat_n(point, previous).chain(raw_tail).collect();
        }

        debug!(
            factor = self.factor,
            visible = self.visible.len(),
            pending = self.pending.len(),
            "downsample escalated"
        );
    }
}

/// Merges a group into one point: first member's record, mean of non-null values.
#[must_use]
pub fn merge_group(group: &[DataPoint], value_field: &str) -> DataPoint {
    let (sum, count) = group
        .iter()
        .filter_map(|point| point.value(value_field))
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    let mean = (count > 0).then(|| sum / count as f64);
    match group.first() {
        Some(first) => first.with_value(value_field, mean),
        None => DataPoint::new(),
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::{DownsamplePipeline, merge_group};
    use crate::core::DataPoint;

    fn sample(t: f64, v: f64) -> DataPoint {
        DataPoint::sample("t", t, "v", Some(v))
    }

    fn values(pipeline: &DownsamplePipeline) -> Vec<f64> {
        pipeline
            .visible()
            .iter()
            .map(|point| point.value("v").expect("value"))
            .collect()
    }

    #[test]
    fn escalation_pairs_existing_points() {
        let mut pipeline = DownsamplePipeline::new("t", "v", Some(10));
        for i in 1..=10 {
            assert!(pipeline.ingest(sample(i as f64 * 1000.0, i as f64)).is_empty());
        }
        let escalations = pipeline.ingest(sample(11_000.0, 11.0));
        assert_eq!(escalations.as_slice(), &[2]);
        assert_eq!(values(&pipeline), vec![1.5, 3.5, 5.5, 7.5, 9.5]);
        let times: Vec<f64> = pipeline
            .visible()
            .iter()
            .map(|point| point.time("t").expect("time"))
            .collect();
        assert_eq!(times, vec![1000.0, 3000.0, 5000.0, 7000.0, 9000.0]);
        assert_eq!(pipeline.pending().len(), 1);
    }

    #[test]
    fn pending_group_merges_when_full() {
        let mut pipeline = DownsamplePipeline::new("t", "v", Some(10));
        for i in 1..=12 {
            pipeline.ingest(sample(i as f64, i as f64));
        }
        assert_eq!(pipeline.factor(), 2);
        assert_eq!(pipeline.visible().len(), 6);
        assert_relative_eq!(values(&pipeline)[5], 11.5);
        assert!(pipeline.pending().is_empty());
    }

    #[test]
    fn leftover_keeps_its_weight_in_the_next_group() {
        let mut pipeline = DownsamplePipeline::new("t", "v", Some(2));
        // factor 2 after the third point, visible [1.5], pending [3]
        for i in 1..=3 {
            pipeline.ingest(sample(i as f64, i as f64));
        }
        assert_eq!(pipeline.factor(), 2);
        pipeline.ingest(sample(4.0, 4.0));
        pipeline.ingest(sample(5.0, 5.0));
        // visible [1.5, 3.5], pending [5]
        assert_eq!(pipeline.factor(), 2);
        pipeline.ingest(sample(6.0, 6.0));
        assert_eq!(pipeline.factor(), 4);
        assert_eq!(values(&pipeline), vec![2.5]);
        // the unpaired 5.5 re-enters pending twice
        assert_eq!(pipeline.pending().len(), 2);
        pipeline.ingest(sample(7.0, 7.0));
        pipeline.ingest(sample(8.0, 8.0));
        assert_eq!(values(&pipeline), vec![2.5, 6.5]);
    }

    #[test]
    fn factor_only_grows_and_stays_power_of_two() {
        let mut pipeline = DownsamplePipeline::new("t", "v", Some(7));
        let mut previous = 1;
        for i in 0..500 {
            pipeline.ingest(sample(i as f64, 1.0));
            let factor = pipeline.factor();
            assert!(factor.is_power_of_two());
            assert!(factor >= previous);
            assert!(pipeline.visible().len() <= 7);
            previous = factor;
        }
    }

    #[test]
    fn merge_ignores_null_values() {
        let group = vec![
            DataPoint::sample("t", 1.0, "v", None),
            sample(2.0, 4.0),
            sample(3.0, 8.0),
        ];
        let merged = merge_group(&group, "v");
        assert_eq!(merged.time("t"), Some(1.0));
        assert_relative_eq!(merged.value("v").expect("value"), 6.0);

        let all_null = merge_group(&[DataPoint::sample("t", 1.0, "v", None)], "v");
        assert_eq!(all_null.value("v"), None);
    }

    #[test]
    fn retain_and_reset() {
        let mut pipeline = DownsamplePipeline::new("t", "v", Some(4));
        for i in 0..10 {
            pipeline.ingest(sample(i as f64, i as f64));
        }
        assert_eq!(pipeline.factor(), 4);
        let held = pipeline.visible().len() + pipeline.pending().len();
        assert_eq!(pipeline.retain_from(100.0), held);
        assert!(pipeline.visible().is_empty());
        assert_eq!(pipeline.reset(), Some(4));
        assert_eq!(pipeline.factor(), 1);
        assert_eq!(pipeline.reset(), None);
    }

    #[test]
    fn lowering_the_limit_coarsens_immediately() {
        let mut pipeline = DownsamplePipeline::new("t", "v", None);
        for i in 0..8 {
            pipeline.ingest(sample(i as f64, i as f64));
        }
        let escalations = pipeline.set_limit(Some(2));
        assert_eq!(escalations.as_slice(), &[2, 4]);
        assert_eq!(values(&pipeline), vec![1.5, 5.5]);
    }
}
