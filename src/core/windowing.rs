use crate::core::DataPoint;

/// Index of the first point whose time is `>= cutoff`.
///
/// `points` must be sorted ascending by `time_field`; points without a readable
/// time sort before everything else.
#[must_use]
pub fn first_index_at_or_after(points: &[DataPoint], time_field: &str, cutoff: f64) -> usize {
    points.partition_point(|point| point.time(time_field).is_none_or(|time| time < cutoff))
}

/// Computes the fixed-width domain a windowed series wants to display.
///
/// With an existing range that `max_t` overruns, the window slides to end at
/// `max_t`, except when that would move the start backward: then the window is
/// re-anchored one full width ahead of the existing start. A range that already
/// contains `max_t` is returned unchanged. Without a range the window hugs the
/// newest data when the data spans more than one width, otherwise the oldest.
#[must_use]
pub fn calculate_windowed_domain(
    current_range: Option<(f64, f64)>,
    window_ms: f64,
    min_t: f64,
    max_t: f64,
) -> (f64, f64) {
    match current_range {
        Some((start, end)) if max_t > end => {
            if start > max_t - window_ms {
                (start, start + window_ms)
            } else {
                (max_t - window_ms, max_t)
            }
        }
        Some(range) => range,
        None if max_t - min_t > window_ms => (max_t - window_ms, max_t),
        None => (min_t, min_t + window_ms),
    }
}
