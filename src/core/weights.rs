//! Distance and correlation weighting shared by the fusion kernels.

use ndarray::Array2;

use crate::core::window_stats::WindowedStats;

/// Precomputed distance weights for a square window.
///
/// `D = 1 + 2 * dist / window_size`, so the center weighs 1 and the
/// penalty grows linearly with pixel distance from it. Computed once per
/// prediction and indexed by window-relative offsets.
pub fn distance_kernel(window_size: usize) -> Array2<f64> {
    let hw = (window_size / 2) as f64;
    Array2::from_shape_fn((window_size, window_size), |(wr, wc)| {
        let dy = wr as f64 - hw;
        let dx = wc as f64 - hw;
        1.0 + 2.0 * (dx * dx + dy * dy).sqrt() / window_size as f64
    })
}

/// Pearson correlation coefficient from accumulated window sums.
///
/// Degenerate neighborhoods (fewer than two samples, or zero variance on
/// either side) count as perfectly homogeneous: the result is 1.0, never
/// NaN, so heterogeneity weighting quietly switches itself off there.
pub fn correlation_from_sums(n: f64, sx: f64, sy: f64, sxx: f64, syy: f64, sxy: f64) -> f64 {
    if n < 2.0 {
        return 1.0;
    }
    let var_x = n * sxx - sx * sx;
    let var_y = n * syy - sy * sy;
    if var_x <= 0.0 || var_y <= 0.0 {
        return 1.0;
    }
    let cov = n * sxy - sx * sy;
    (cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0)
}

/// Per-pixel local weight for the correlation-weighted variant: Pearson
/// correlation between two pooled sample streams over each window.
///
/// `x_stats` and `y_stats` carry the windowed sums and sums of squares of
/// the two streams over jointly-usable cells; `xy_stats.sum` carries the
/// windowed sum of their products. All three must have been computed over
/// the same rectangle, window, and validity.
pub fn local_weights(
    x_stats: &WindowedStats,
    y_stats: &WindowedStats,
    xy_stats: &WindowedStats,
) -> Array2<f64> {
    let rect = x_stats.rect();
    Array2::from_shape_fn((rect.height, rect.width), |(r, c)| {
        correlation_from_sums(
            x_stats.count[[r, c]] as f64,
            x_stats.sum[[r, c]],
            y_stats.sum[[r, c]],
            x_stats.sum_sq[[r, c]],
            y_stats.sum_sq[[r, c]],
            xy_stats.sum[[r, c]],
        )
    })
}
