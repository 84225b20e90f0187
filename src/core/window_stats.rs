//! Incremental windowed statistics over a prediction rectangle.
//!
//! The moving-window sum is separable: a vertical pass maintains per-column
//! strip sums (adding the row entering the window, subtracting the row
//! leaving it), and a horizontal pass slides a 1-D moving sum over those
//! strips. After the first row/column the per-pixel cost is O(1) instead of
//! O(window^2). Out-of-bounds window cells simply contribute nothing; there
//! is no padding or reflection at the raster edges.

use ndarray::Array2;

use crate::types::Rectangle;

/// Masked local sums over a square window, one value set per pixel of the
/// prediction rectangle.
///
/// `count` tracks how many usable samples entered each window; a zero count
/// means "no information", and [`mean`](WindowedStats::mean) /
/// [`variance`](WindowedStats::variance) return `None` there. Callers must
/// treat that as "no constraint" (infinite tolerance), never as an error.
#[derive(Debug, Clone)]
pub struct WindowedStats {
    rect: Rectangle,
    window_size: usize,
    pub sum: Array2<f64>,
    pub sum_sq: Array2<f64>,
    pub count: Array2<u32>,
}

impl WindowedStats {
    /// Compute windowed sums for one band.
    ///
    /// `sample(row, col)` returns the value at absolute image coordinates,
    /// or `None` when the cell is masked out or nodata. The window size must
    /// be odd (validated by the options layer before any engine runs);
    /// `rect` must fit within `image_height` x `image_width`.
    pub fn compute<F>(
        image_height: usize,
        image_width: usize,
        rect: Rectangle,
        window_size: usize,
        sample: F,
    ) -> Self
    where
        F: Fn(usize, usize) -> Option<f64>,
    {
        debug_assert!(window_size % 2 == 1 && window_size >= 3);
        debug_assert!(rect.fits_within(image_width, image_height));

        let hw = window_size / 2;
        let mut stats = Self {
            rect,
            window_size,
            sum: Array2::zeros((rect.height, rect.width)),
            sum_sq: Array2::zeros((rect.height, rect.width)),
            count: Array2::zeros((rect.height, rect.width)),
        };
        if rect.is_empty() {
            return stats;
        }

        // Column strips cover the window columns of every output column,
        // clipped to the raster.
        let x0 = rect.x.saturating_sub(hw);
        let x1 = (rect.x + rect.width - 1 + hw).min(image_width - 1);
        let ncols = x1 - x0 + 1;
        let mut strip_sum = vec![0.0f64; ncols];
        let mut strip_sq = vec![0.0f64; ncols];
        let mut strip_cnt = vec![0u32; ncols];

        let add_row = |r: usize, strip_sum: &mut [f64], strip_sq: &mut [f64], strip_cnt: &mut [u32], sign: f64| {
            for (i, x) in (x0..=x1).enumerate() {
                if let Some(v) = sample(r, x) {
                    strip_sum[i] += sign * v;
                    strip_sq[i] += sign * v * v;
                    if sign > 0.0 {
                        strip_cnt[i] += 1;
                    } else {
                        strip_cnt[i] -= 1;
                    }
                }
            }
        };

        // Seed the strips with the window rows of the first output row.
        let r_lo = rect.y.saturating_sub(hw);
        let r_hi = (rect.y + hw).min(image_height - 1);
        for r in r_lo..=r_hi {
            add_row(r, &mut strip_sum, &mut strip_sq, &mut strip_cnt, 1.0);
        }

        for oy in 0..rect.height {
            let out_row = rect.y + oy;
            if oy > 0 {
                // Row leaving the window as the center moved down by one.
                let prev_center = out_row - 1;
                if prev_center >= hw {
                    add_row(prev_center - hw, &mut strip_sum, &mut strip_sq, &mut strip_cnt, -1.0);
                }
                // Row entering the window.
                let entering = out_row + hw;
                if entering < image_height {
                    add_row(entering, &mut strip_sum, &mut strip_sq, &mut strip_cnt, 1.0);
                }
            }

            // Horizontal moving sum over the strips.
            let mut h_sum = 0.0f64;
            let mut h_sq = 0.0f64;
            let mut h_cnt = 0u32;
            for ox in 0..rect.width {
                let out_col = rect.x + ox;
                if ox == 0 {
                    let c_lo = out_col.saturating_sub(hw).max(x0);
                    let c_hi = (out_col + hw).min(x1);
                    for c in c_lo..=c_hi {
                        h_sum += strip_sum[c - x0];
                        h_sq += strip_sq[c - x0];
                        h_cnt += strip_cnt[c - x0];
                    }
                } else {
                    let prev_center = out_col - 1;
                    if prev_center >= hw {
                        let leaving = prev_center - hw;
                        h_sum -= strip_sum[leaving - x0];
                        h_sq -= strip_sq[leaving - x0];
                        h_cnt -= strip_cnt[leaving - x0];
                    }
                    let entering = out_col + hw;
                    if entering <= x1 {
                        h_sum += strip_sum[entering - x0];
                        h_sq += strip_sq[entering - x0];
                        h_cnt += strip_cnt[entering - x0];
                    }
                }
                stats.sum[[oy, ox]] = h_sum;
                stats.sum_sq[[oy, ox]] = h_sq;
                stats.count[[oy, ox]] = h_cnt;
            }
        }
        stats
    }

    pub fn rect(&self) -> Rectangle {
        self.rect
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Local mean at rectangle-relative coordinates; `None` when the window
    /// held no usable samples.
    pub fn mean(&self, row: usize, col: usize) -> Option<f64> {
        let n = self.count[[row, col]];
        if n == 0 {
            None
        } else {
            Some(self.sum[[row, col]] / n as f64)
        }
    }

    /// Local population variance; `None` when the window held no usable
    /// samples. Never negative.
    pub fn variance(&self, row: usize, col: usize) -> Option<f64> {
        let n = self.count[[row, col]];
        if n == 0 {
            return None;
        }
        let n = n as f64;
        let mean = self.sum[[row, col]] / n;
        Some((self.sum_sq[[row, col]] / n - mean * mean).max(0.0))
    }

    pub fn stddev(&self, row: usize, col: usize) -> Option<f64> {
        self.variance(row, col).map(f64::sqrt)
    }

    /// Pool another band's (or date's) sums into this one. Both sides must
    /// cover the same rectangle and window.
    pub fn merge(&mut self, other: &WindowedStats) {
        debug_assert_eq!(self.rect, other.rect);
        debug_assert_eq!(self.window_size, other.window_size);
        self.sum += &other.sum;
        self.sum_sq += &other.sum_sq;
        self.count += &other.count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force_sum(
        values: &Array2<f64>,
        center: (usize, usize),
        window: usize,
    ) -> (f64, u32) {
        let (h, w) = values.dim();
        let hw = (window / 2) as i64;
        let mut sum = 0.0;
        let mut count = 0;
        for dr in -hw..=hw {
            for dc in -hw..=hw {
                let r = center.0 as i64 + dr;
                let c = center.1 as i64 + dc;
                if r >= 0 && r < h as i64 && c >= 0 && c < w as i64 {
                    sum += values[[r as usize, c as usize]];
                    count += 1;
                }
            }
        }
        (sum, count)
    }

    #[test]
    fn test_matches_brute_force_full_rect() {
        let values =
            Array2::from_shape_fn((9, 7), |(r, c)| ((r * 13 + c * 5 + 3) % 17) as f64);
        let rect = Rectangle::full(7, 9);
        let stats = WindowedStats::compute(9, 7, rect, 5, |r, c| Some(values[[r, c]]));

        for r in 0..9 {
            for c in 0..7 {
                let (sum, count) = brute_force_sum(&values, (r, c), 5);
                assert_eq!(stats.sum[[r, c]], sum, "sum at ({}, {})", r, c);
                assert_eq!(stats.count[[r, c]], count, "count at ({}, {})", r, c);
            }
        }
    }

    #[test]
    fn test_matches_brute_force_sub_rect() {
        let values =
            Array2::from_shape_fn((10, 12), |(r, c)| ((r * 7 + c * 11 + 1) % 23) as f64);
        let rect = Rectangle::new(3, 2, 6, 5);
        let stats = WindowedStats::compute(10, 12, rect, 3, |r, c| Some(values[[r, c]]));

        for oy in 0..5 {
            for ox in 0..6 {
                let (sum, count) =
                    brute_force_sum(&values, (rect.y + oy, rect.x + ox), 3);
                assert_eq!(stats.sum[[oy, ox]], sum);
                assert_eq!(stats.count[[oy, ox]], count);
            }
        }
    }

    #[test]
    fn test_zero_count_yields_none() {
        let rect = Rectangle::full(4, 4);
        let stats = WindowedStats::compute(4, 4, rect, 3, |_, _| None);
        assert_eq!(stats.count[[1, 1]], 0);
        assert!(stats.mean(1, 1).is_none());
        assert!(stats.variance(1, 1).is_none());
    }

    #[test]
    fn test_variance_of_constant_is_zero() {
        let rect = Rectangle::full(5, 5);
        let stats = WindowedStats::compute(5, 5, rect, 3, |_, _| Some(4.0));
        assert_eq!(stats.variance(2, 2), Some(0.0));
        assert_eq!(stats.mean(2, 2), Some(4.0));
    }

    #[test]
    fn test_merge_pools_counts() {
        let rect = Rectangle::full(3, 3);
        let mut a = WindowedStats::compute(3, 3, rect, 3, |_, _| Some(1.0));
        let b = WindowedStats::compute(3, 3, rect, 3, |_, _| Some(3.0));
        a.merge(&b);
        assert_eq!(a.count[[1, 1]], 18);
        assert_eq!(a.mean(1, 1), Some(2.0));
    }
}
