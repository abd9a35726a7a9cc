use tracing::trace;

use crate::error::{ChartError, ChartResult};

/// Tick sequences longer than this collapse to a doubled step when they can.
const MAX_TICKS_BEFORE_COALESCE: usize = 8;
/// Outward padding applied when a snapped boundary lands exactly on a data extreme.
const EDGE_PAD_STEPS: f64 = 1.5;
/// Spans below this fraction of the domain magnitude are treated as a single value.
const NEGLIGIBLE_RELATIVE_SPAN: f64 = 1e-10;

/// Computes evenly spaced, human friendly tick boundaries covering `[min, max]`.
///
/// Steps are 1, 2, 5 or 10 times a power of ten. Domains straddling zero share
/// one grid on both sides so `0` is always a tick.
pub fn calculate_tick_values(min: f64, max: f64, desired_tick_count: usize) -> ChartResult<Vec<f64>> {
    if !min.is_finite() || !max.is_finite() {
        return Err(ChartError::InvalidData(
            "tick domain bounds must be finite".to_owned(),
        ));
    }
    if desired_tick_count == 0 {
        return Err(ChartError::InvalidData(
            "desired tick count must be > 0".to_owned(),
        ));
    }
    let (min, max) = if min <= max { (min, max) } else { (max, min) };

    if min < 0.0 && max > 0.0 {
        return mixed_sign_ticks(min, max, desired_tick_count);
    }
    if min < 0.0 && max == 0.0 {
        let mirrored = calculate_tick_values(0.0, -min, desired_tick_count)?;
        return Ok(mirrored.into_iter().rev().map(|tick| -tick).collect());
    }

    let (start, stop, step) = padded_domain(min, max, desired_tick_count)?;
    let (ticks, step) = generate_range(start, stop, step)?;
    Ok(ensure_coverage(ticks, min, max, step))
}

/// Returns the nice step for a span without snapping or padding.
pub fn nice_step(span: f64, desired_tick_count: usize) -> ChartResult<f64> {
    if !span.is_finite() || span <= 0.0 || desired_tick_count == 0 {
        return Err(ChartError::DegenerateTickDomain {
            start: 0.0,
            stop: span,
            step: f64::NAN,
        });
    }

    let count = desired_tick_count as f64;
    let mut step = 10f64.powf((span / count).log10().floor());
    let error = count * step / span;
    if error <= 0.15 {
        step *= 10.0;
    } else if error <= 0.35 {
        step *= 5.0;
    } else if error <= 0.75 {
        step *= 2.0;
    }
    Ok(step)
}

fn mixed_sign_ticks(min: f64, max: f64, desired_tick_count: usize) -> ChartResult<Vec<f64>> {
    let half = (desired_tick_count / 2).max(1);
    let positive = nice_step(max, half)?;
    let negative = nice_step(-min, half)?;
    let step = positive.max(negative);

    let start = (min / step).floor() * step;
    let stop = (max / step).ceil() * step;
    trace!(min, max, step, "mixed-sign tick grid");
    let (ticks, step) = generate_range(start, stop, step)?;
    Ok(ensure_coverage(ticks, min, max, step))
}

fn padded_domain(min: f64, max: f64, desired_tick_count: usize) -> ChartResult<(f64, f64, f64)> {
    let magnitude = min.abs().max(max.abs());
    let (min, max) = if max - min <= magnitude * NEGLIGIBLE_RELATIVE_SPAN {
        widen_degenerate(min, desired_tick_count)
    } else {
        (min, max)
    };

    let step = nice_step(max - min, desired_tick_count)?;
    let mut start = (min / step).floor() * step;
    let mut stop = (max / step).ceil() * step;

    let tolerance = step * 1e-9;
    if (start - min).abs() <= tolerance {
        start = ((min - EDGE_PAD_STEPS * step) / step).ceil() * step;
    }
    if (stop - max).abs() <= tolerance {
        stop = ((max + EDGE_PAD_STEPS * step) / step).floor() * step;
    }

    Ok((start, stop, step))
}

/// Forces a zero-width domain open by `step * desired_tick_count`, growing away from zero.
fn widen_degenerate(value: f64, desired_tick_count: usize) -> (f64, f64) {
    let count = desired_tick_count as f64;
    let step = if value == 0.0 {
        1.0
    } else {
        10f64.powf((value.abs() / count).log10().floor())
    };
    let span = step * count;
    if value < 0.0 {
        (value - span, value)
    } else {
        (value, value + span)
    }
}

/// Generates `start..=stop` by `step` on an integer grid to avoid accumulated drift.
///
/// Returns the ticks with the step they were generated at, which doubles when
/// a long sequence coalesces.
fn generate_range(start: f64, stop: f64, step: f64) -> ChartResult<(Vec<f64>, f64)> {
    let count = (stop - start) / step;
    if !count.is_finite() || step <= 0.0 {
        return Err(ChartError::DegenerateTickDomain { start, stop, step });
    }

    let scale = integral_scale(step);
    if !scale.is_finite() {
        return Err(ChartError::DegenerateTickDomain { start, stop, step });
    }
    let scaled_start = (start * scale).round();
    let scaled_stop = (stop * scale).round();
    let scaled_step = (step * scale).round();
    if scaled_step <= 0.0 {
        return Err(ChartError::DegenerateTickDomain { start, stop, step });
    }

    let steps = ((scaled_stop - scaled_start) / scaled_step + 1e-9).floor() as usize;
    let ticks: Vec<f64> = (0..=steps)
        .map(|index| (scaled_start + scaled_step * index as f64) / scale)
        .collect();

    let scaled_last = scaled_start + scaled_step * steps as f64;
    let last_is_double_multiple = scaled_last % (2.0 * scaled_step) == 0.0;
    if ticks.len() > MAX_TICKS_BEFORE_COALESCE && last_is_double_multiple {
        let doubled = step * 2.0;
        let aligned_start = (start / doubled).floor() * doubled;
        trace!(len = ticks.len(), doubled, "coalescing ticks to coarser step");
        return generate_range(aligned_start, stop, doubled);
    }

    Ok((ticks, step))
}

/// Power of ten that lifts a 1/2/5 step to a whole number.
fn integral_scale(step: f64) -> f64 {
    let exponent = -step.abs().log10().floor();
    if exponent <= 0.0 {
        1.0
    } else {
        10f64.powf(exponent)
    }
}

/// Guards the first/last tick against rounding that pulls them inside the data.
fn ensure_coverage(mut ticks: Vec<f64>, min: f64, max: f64, step: f64) -> Vec<f64> {
    if let Some(&first) = ticks.first() {
        if first > min {
            ticks.insert(0, first - step);
        }
    }
    if let Some(&last) = ticks.last() {
        if last < max {
            ticks.push(last + step);
        }
    }
    ticks
}
