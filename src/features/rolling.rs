//! Trailing rolling-window sums over ordered per-group slices.

/// Trailing rolling sum over `values` with a minimum-periods rule.
///
/// Position `i` covers the last `window` values ending at `i` (fewer near the
/// start of the slice). The value is `None` until at least `min_periods`
/// periods have been observed. Callers fill missing inputs before windowing,
/// so every element of `values` participates.
pub fn rolling_sum(values: &[f64], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    let mut running = 0.0;
    for (i, &value) in values.iter().enumerate() {
        running += value;
        if i >= window {
            running -= values[i - window];
        }
        if i + 1 >= min_periods.max(1) {
            out.push(Some(running));
        } else {
            out.push(None);
        }
    }
    out
}
