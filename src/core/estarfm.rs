//! Correlation/regression-weighted spatiotemporal fusion.
//!
//! On top of the shared window search this variant weighs every
//! neighborhood by a per-pixel correlation coefficient between the
//! high- and low-resolution series (the "local weight"), filters candidates
//! with class tolerances derived from global or windowed standard
//! deviations, and corrects the temporal update with a regression slope
//! fitted over the accepted candidate samples.

use ndarray::{Array2, Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::core::mask::{usable_sample, MaskView};
use crate::core::weights::{distance_kernel, local_weights};
use crate::core::window_stats::WindowedStats;
use crate::store::ImageStore;
use crate::types::{
    with_pixel_type, FusionError, FusionPixel, FusionResult, RasterImage, Rectangle,
};

/// Minimum accepted candidates before the regression correction is trusted
const REGRESSION_MIN_CANDIDATES: usize = 6;

/// Heuristic bound on how steep a candidate regression slope may be,
/// relative to the high/low sample spread, before it is considered
/// statistically unjustified
const SLOPE_LIMIT_FACTOR: f64 = 5.0;

/// How the per-band candidate tolerance is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToleranceMode {
    /// One tolerance per band from the whole image's standard deviation
    Global,
    /// Per-pixel tolerance from the windowed standard deviation
    Local,
}

/// How the candidate regression slope is fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegressionMode {
    /// Ordinary least squares over the pooled candidate samples
    Ordinary,
    /// Candidate-weighted least squares
    VarianceWeighted,
}

/// Options for the correlation/regression-weighted variant. Always
/// double-pair: two distinct reference dates are required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstarfmOptions {
    high_tag: Option<String>,
    low_tag: Option<String>,
    dates: Option<(i32, i32)>,
    window_size: usize,
    number_classes: u32,
    tolerance_mode: ToleranceMode,
    regression_mode: RegressionMode,
    value_range: Option<(f64, f64)>,
    epsilon: f64,
}

impl Default for EstarfmOptions {
    fn default() -> Self {
        Self {
            high_tag: None,
            low_tag: None,
            dates: None,
            window_size: 31,
            number_classes: 4,
            tolerance_mode: ToleranceMode::Global,
            regression_mode: RegressionMode::Ordinary,
            value_range: None,
            epsilon: 1e-6,
        }
    }
}

impl EstarfmOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_resolution_tags(
        &mut self,
        high_tag: impl Into<String>,
        low_tag: impl Into<String>,
    ) -> FusionResult<()> {
        let high = high_tag.into();
        let low = low_tag.into();
        if high.is_empty() || low.is_empty() {
            return Err(FusionError::Config(
                "Resolution tags must be non-empty".to_string(),
            ));
        }
        if high == low {
            return Err(FusionError::Config(format!(
                "High and low resolution tags must differ, both are '{}'",
                high
            )));
        }
        self.high_tag = Some(high);
        self.low_tag = Some(low);
        Ok(())
    }

    /// The two reference pair dates; they must differ.
    pub fn set_pair_dates(&mut self, date1: i32, date2: i32) -> FusionResult<()> {
        if date1 == date2 {
            return Err(FusionError::Config(format!(
                "Pair dates must differ, both are {}",
                date1
            )));
        }
        self.dates = Some((date1, date2));
        Ok(())
    }

    pub fn pair_dates(&self) -> FusionResult<(i32, i32)> {
        self.dates
            .ok_or_else(|| FusionError::Config("No pair dates configured".to_string()))
    }

    pub fn set_window_size(&mut self, window_size: usize) -> FusionResult<()> {
        if window_size < 3 || window_size % 2 == 0 {
            return Err(FusionError::Config(format!(
                "Window size must be odd and >= 3, got {}",
                window_size
            )));
        }
        self.window_size = window_size;
        Ok(())
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Tolerance divisor: candidates must lie within `2 * stddev / classes`
    /// of the window center.
    pub fn set_number_classes(&mut self, classes: u32) -> FusionResult<()> {
        if classes == 0 {
            return Err(FusionError::Config(
                "Number of classes must be positive".to_string(),
            ));
        }
        self.number_classes = classes;
        Ok(())
    }

    pub fn number_classes(&self) -> u32 {
        self.number_classes
    }

    pub fn set_tolerance_mode(&mut self, mode: ToleranceMode) {
        self.tolerance_mode = mode;
    }

    pub fn tolerance_mode(&self) -> ToleranceMode {
        self.tolerance_mode
    }

    pub fn set_regression_mode(&mut self, mode: RegressionMode) {
        self.regression_mode = mode;
    }

    pub fn regression_mode(&self) -> RegressionMode {
        self.regression_mode
    }

    /// Optional global value range; also arms the regression sanity check.
    pub fn set_value_range(&mut self, range: Option<(f64, f64)>) -> FusionResult<()> {
        if let Some((lo, hi)) = range {
            if !lo.is_finite() || !hi.is_finite() || lo > hi {
                return Err(FusionError::Config(format!(
                    "Invalid value range [{}, {}]",
                    lo, hi
                )));
            }
        }
        self.value_range = range;
        Ok(())
    }

    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.value_range
    }

    /// Division guard for near-zero weights and temporal differences.
    pub fn set_epsilon(&mut self, epsilon: f64) -> FusionResult<()> {
        if !epsilon.is_finite() || epsilon <= 0.0 {
            return Err(FusionError::Config(format!(
                "Epsilon must be positive, got {}",
                epsilon
            )));
        }
        self.epsilon = epsilon;
        Ok(())
    }

    fn ensure_ready(&self) -> FusionResult<(&str, &str, (i32, i32))> {
        let high = self
            .high_tag
            .as_deref()
            .ok_or_else(|| FusionError::Config("Resolution tags not configured".to_string()))?;
        let low = self
            .low_tag
            .as_deref()
            .ok_or_else(|| FusionError::Config("Resolution tags not configured".to_string()))?;
        let dates = self
            .dates
            .ok_or_else(|| FusionError::Config("Pair dates not configured".to_string()))?;
        Ok((high, low, dates))
    }
}

/// Per-band candidate tolerance, resolved for one pair date.
enum Tolerance {
    Global(f64),
    Local(WindowedStats),
}

impl Tolerance {
    #[inline]
    fn at(&self, classes: u32, oy: usize, ox: usize) -> f64 {
        match self {
            Tolerance::Global(t) => *t,
            // Zero-information windows impose no constraint.
            Tolerance::Local(stats) => stats
                .stddev(oy, ox)
                .map(|s| 2.0 * s / classes as f64)
                .unwrap_or(f64::INFINITY),
        }
    }
}

struct EstarfmPair<'v, T> {
    date: i32,
    high: ArrayView3<'v, T>,
    low: ArrayView3<'v, T>,
    high_nodata: Option<Vec<f64>>,
    low_nodata: Option<Vec<f64>>,
    /// Per-band tolerance source
    tolerance: Vec<Tolerance>,
    /// Per-band |windowed mean(low) - windowed mean(low_pred)|
    temporal_diff: Vec<Array2<f64>>,
}

struct EstarfmKernel<'v, T> {
    pairs: [EstarfmPair<'v, T>; 2],
    low_pred: ArrayView3<'v, T>,
    low_pred_nodata: Option<Vec<f64>>,
    valid: MaskView<'v>,
    prediction: MaskView<'v>,
    dist: Array2<f64>,
    /// Per-pixel correlation local weight over the prediction rectangle
    local_weight: Array2<f64>,
    rect: Rectangle,
    height: usize,
    width: usize,
    bands: usize,
    window: usize,
    classes: u32,
    regression: RegressionMode,
    value_range: Option<(f64, f64)>,
    epsilon: f64,
}

/// Running sums for the candidate regression; two pooled samples (one per
/// pair date) enter per accepted window position.
#[derive(Default)]
struct RegressionSums {
    n: f64,
    sx: f64,
    sy: f64,
    sxx: f64,
    syy: f64,
    sxy: f64,
    wn: f64,
    wsx: f64,
    wsy: f64,
    wsxx: f64,
    wsxy: f64,
}

impl RegressionSums {
    #[inline]
    fn push(&mut self, low: f64, high: f64, weight: f64) {
        self.n += 1.0;
        self.sx += low;
        self.sy += high;
        self.sxx += low * low;
        self.syy += high * high;
        self.sxy += low * high;
        self.wn += weight;
        self.wsx += weight * low;
        self.wsy += weight * high;
        self.wsxx += weight * low * low;
        self.wsxy += weight * low * high;
    }

    /// Fitted slope of high on low; 1.0 when the low samples carry no
    /// variance (scale the temporal correction through unchanged).
    fn slope(&self, mode: RegressionMode) -> f64 {
        let (n, sx, sy, sxx, sxy) = match mode {
            RegressionMode::Ordinary => (self.n, self.sx, self.sy, self.sxx, self.sxy),
            RegressionMode::VarianceWeighted => {
                (self.wn, self.wsx, self.wsy, self.wsxx, self.wsxy)
            }
        };
        let den = n * sxx - sx * sx;
        if den.abs() < 1e-12 {
            1.0
        } else {
            (n * sxy - sx * sy) / den
        }
    }

    fn stddev_low(&self) -> f64 {
        if self.n < 1.0 {
            return 0.0;
        }
        let mean = self.sx / self.n;
        (self.sxx / self.n - mean * mean).max(0.0).sqrt()
    }

    fn stddev_high(&self) -> f64 {
        if self.n < 1.0 {
            return 0.0;
        }
        let mean = self.sy / self.n;
        (self.syy / self.n - mean * mean).max(0.0).sqrt()
    }
}

impl<'v, T: FusionPixel> EstarfmKernel<'v, T> {
    fn predict_pixel(&self, band: usize, row: usize, col: usize) -> f64 {
        let oy = row - self.rect.y;
        let ox = col - self.rect.x;
        let lp_center = usable_sample(&self.low_pred, &self.low_pred_nodata, &self.valid, band, row, col);

        let centers: Vec<Option<(f64, f64)>> = self
            .pairs
            .iter()
            .map(|pair| {
                let h = usable_sample(&pair.high, &pair.high_nodata, &self.valid, band, row, col);
                let l = usable_sample(&pair.low, &pair.low_nodata, &self.valid, band, row, col);
                h.zip(l)
            })
            .collect();

        // The regression path needs both reference pixels.
        let both_centers = centers[0].zip(centers[1]);

        let mut predicted = None;
        if let Some(((hc1, _), (hc2, _))) = both_centers {
            let hc = [hc1, hc2];
            let tolerance = [
                self.pairs[0].tolerance[band].at(self.classes, oy, ox),
                self.pairs[1].tolerance[band].at(self.classes, oy, ox),
            ];
            let local_weight = self.local_weight[[oy, ox]];
            let hw = self.window / 2;
            let r_lo = row.saturating_sub(hw);
            let r_hi = (row + hw).min(self.height - 1);
            let c_lo = col.saturating_sub(hw);
            let c_hi = (col + hw).min(self.width - 1);

            let mut candidates = 0usize;
            let mut weight_sum = 0.0f64;
            let mut weighted_temporal = [0.0f64; 2];
            let mut weighted_high = [0.0f64; 2];
            let mut regression = RegressionSums::default();

            for r in r_lo..=r_hi {
                for c in c_lo..=c_hi {
                    let lp = match usable_sample(&self.low_pred, &self.low_pred_nodata, &self.valid, band, r, c) {
                        Some(v) => v,
                        None => continue,
                    };
                    let mut values = [(0.0f64, 0.0f64); 2];
                    let mut ok = true;
                    for (k, pair) in self.pairs.iter().enumerate() {
                        let h = usable_sample(&pair.high, &pair.high_nodata, &self.valid, band, r, c);
                        let l = usable_sample(&pair.low, &pair.low_nodata, &self.valid, band, r, c);
                        match h.zip(l) {
                            Some(hl) => values[k] = hl,
                            None => {
                                ok = false;
                                break;
                            }
                        }
                    }
                    if !ok {
                        continue;
                    }
                    // Candidate must resemble the center at both pair dates.
                    if (values[0].0 - hc[0]).abs() > tolerance[0]
                        || (values[1].0 - hc[1]).abs() > tolerance[1]
                    {
                        continue;
                    }
                    let d = self.dist[[r + hw - row, c + hw - col]];
                    let w = 1.0 / ((1.0 - local_weight) * d + self.epsilon);
                    candidates += 1;
                    weight_sum += w;
                    for k in 0..2 {
                        let (h, l) = values[k];
                        weighted_temporal[k] += w * (lp - l);
                        weighted_high[k] += w * h;
                        regression.push(l, h, w);
                    }
                }
            }

            if candidates >= REGRESSION_MIN_CANDIDATES && weight_sum > 0.0 {
                let slope = regression.slope(self.regression);
                let mut pair_predictions = [0.0f64; 2];
                for k in 0..2 {
                    let corrected = hc[k] + slope * weighted_temporal[k] / weight_sum;
                    pair_predictions[k] = match self.value_range {
                        Some((lo, hi)) => {
                            let sd_low = regression.stddev_low();
                            let unjustified = sd_low <= self.epsilon
                                || slope.abs()
                                    > SLOPE_LIMIT_FACTOR * regression.stddev_high()
                                        / sd_low;
                            if unjustified || corrected < lo || corrected > hi {
                                // Regression looks spurious; use the plain
                                // value-weighted average instead.
                                weighted_high[k] / weight_sum
                            } else {
                                corrected
                            }
                        }
                        None => corrected,
                    };
                }

                // Symmetric combination, weighted by inverse absolute
                // low-resolution temporal change over the window.
                let d1 = self.pairs[0].temporal_diff[band][[oy, ox]];
                let d2 = self.pairs[1].temporal_diff[band][[oy, ox]];
                let t1 = 1.0 / (d1 + self.epsilon);
                let t2 = 1.0 / (d2 + self.epsilon);
                let total = t1 + t2;
                predicted =
                    Some((t1 * pair_predictions[0] + t2 * pair_predictions[1]) / total);
            }
        }

        let predicted = predicted.unwrap_or_else(|| {
            // Too few candidates (or unusable centers): distance-free blend
            // of the reference pixels, weighted by inverse temporal change
            // at the center alone.
            let mut weight_sum = 0.0;
            let mut value_sum = 0.0;
            if let Some(lp) = lp_center {
                for center in centers.iter().flatten() {
                    let (h, l) = *center;
                    let w = 1.0 / ((lp - l).abs() + self.epsilon);
                    weight_sum += w;
                    value_sum += w * (h + lp - l);
                }
            }
            if weight_sum > 0.0 {
                value_sum / weight_sum
            } else {
                lp_center.unwrap_or(0.0)
            }
        });

        match self.value_range {
            Some((lo, hi)) => predicted.clamp(lo, hi),
            None => predicted,
        }
    }

    fn predict_row(&self, oy: usize) -> Vec<T> {
        let row = self.rect.y + oy;
        let mut out = vec![T::zero(); self.bands * self.rect.width];
        for band in 0..self.bands {
            for ox in 0..self.rect.width {
                let col = self.rect.x + ox;
                if !self.prediction.is_valid(band, row, col) {
                    continue;
                }
                out[band * self.rect.width + ox] =
                    T::from_sample(self.predict_pixel(band, row, col));
            }
        }
        out
    }
}

/// Correlation/regression-weighted fusion engine.
pub struct EstarfmEngine<'a> {
    options: EstarfmOptions,
    store: &'a ImageStore,
    output: Option<RasterImage>,
}

impl<'a> EstarfmEngine<'a> {
    pub fn new(options: EstarfmOptions, store: &'a ImageStore) -> FusionResult<Self> {
        options.ensure_ready()?;
        Ok(Self {
            options,
            store,
            output: None,
        })
    }

    pub fn options(&self) -> &EstarfmOptions {
        &self.options
    }

    /// Predict the high-resolution image at `date` over the full grid.
    pub fn predict(
        &mut self,
        date: i32,
        valid_mask: Option<&RasterImage>,
        prediction_mask: Option<&RasterImage>,
    ) -> FusionResult<RasterImage> {
        self.predict_window(None, date, valid_mask, prediction_mask)
    }

    /// Predict over a sub-rectangle of the grid (`None` = full grid).
    pub fn predict_window(
        &mut self,
        rect: Option<Rectangle>,
        date: i32,
        valid_mask: Option<&RasterImage>,
        prediction_mask: Option<&RasterImage>,
    ) -> FusionResult<RasterImage> {
        if self.store.is_empty() {
            return Err(FusionError::InvalidState(
                "Prediction requested before any image was attached to the store".to_string(),
            ));
        }
        let (high_tag, low_tag, (date1, date2)) = self.options.ensure_ready()?;

        let required = [
            (high_tag, date1),
            (low_tag, date1),
            (high_tag, date2),
            (low_tag, date2),
            (low_tag, date),
        ];
        let missing: Vec<String> = required
            .iter()
            .filter(|(tag, d)| !self.store.contains(tag, *d))
            .map(|(tag, d)| format!("({}, {})", tag, d))
            .collect();
        if !missing.is_empty() {
            return Err(FusionError::MissingInput(format!(
                "Required rasters absent from store: {}",
                missing.join(", ")
            )));
        }

        let reference = self.store.get(high_tag, date1).unwrap();
        let (bands, height, width) = reference.dim();
        let ref_name = format!("high-resolution image at date {}", date1);
        reference.validate_nodata(&ref_name)?;
        for (tag, d, role) in [
            (low_tag, date1, "low"),
            (high_tag, date2, "high"),
            (low_tag, date2, "low"),
            (low_tag, date, "low"),
        ] {
            let other = self.store.get(tag, d).unwrap();
            let other_name = format!("{}-resolution image at date {}", role, d);
            reference.expect_compatible(&ref_name, other, &other_name)?;
            other.validate_nodata(&other_name)?;
        }

        let rect = rect.unwrap_or_else(|| Rectangle::full(width, height));
        if rect.is_empty() || !rect.fits_within(width, height) {
            return Err(FusionError::Config(format!(
                "Prediction rectangle {}x{}+{}+{} does not fit the {}x{} grid",
                rect.width, rect.height, rect.x, rect.y, width, height
            )));
        }

        let valid = MaskView::from_raster(valid_mask, "valid mask", bands, height, width)?;
        let prediction =
            MaskView::from_raster(prediction_mask, "prediction mask", bands, height, width)?;

        log::info!(
            "Correlation-weighted prediction at date {} over {}x{} ({} band(s), window {})",
            date,
            rect.width,
            rect.height,
            bands,
            self.options.window_size
        );

        let ptype = reference.pixel_type();
        with_pixel_type!(ptype, P => self.predict_typed::<P>(rect, date, valid, prediction))
    }

    fn predict_typed<'m, T: FusionPixel>(
        &mut self,
        rect: Rectangle,
        date: i32,
        valid: MaskView<'m>,
        prediction: MaskView<'m>,
    ) -> FusionResult<RasterImage>
    where
        'a: 'm,
    {
        let (high_tag, low_tag, (date1, date2)) = self.options.ensure_ready()?;
        let reference = self.store.get(high_tag, date1).unwrap();
        let (bands, height, width) = reference.dim();
        let window = self.options.window_size;
        let low_pred = self.store.get(low_tag, date).unwrap();
        let low_pred_view = T::view(low_pred).expect("base type validated");

        // Pooled windowed co-moments of (high, low) across both dates and
        // all bands feed the per-pixel correlation local weight.
        let mut pooled: Option<(WindowedStats, WindowedStats, WindowedStats)> = None;

        let mut build_pair = |d: i32| -> EstarfmPair<'m, T> {
            let high = self.store.get(high_tag, d).unwrap();
            let low = self.store.get(low_tag, d).unwrap();
            let high_view = T::view(high).expect("base type validated");
            let low_view = T::view(low).expect("base type validated");

            let mut tolerance = Vec::with_capacity(bands);
            let mut temporal_diff = Vec::with_capacity(bands);
            for band in 0..bands {
                let high_sample = |r: usize, c: usize| {
                    usable_sample(&high_view, &high.nodata, &valid, band, r, c)
                };
                let low_sample = |r: usize, c: usize| {
                    usable_sample(&low_view, &low.nodata, &valid, band, r, c)
                };
                let pred_sample = |r: usize, c: usize| {
                    usable_sample(&low_pred_view, &low_pred.nodata, &valid, band, r, c)
                };

                // Correlation sums over jointly-usable (high, low) cells.
                let joint_high = WindowedStats::compute(height, width, rect, window, |r, c| {
                    low_sample(r, c).and_then(|_| high_sample(r, c))
                });
                let joint_low = WindowedStats::compute(height, width, rect, window, |r, c| {
                    high_sample(r, c).and_then(|_| low_sample(r, c))
                });
                let joint_product = WindowedStats::compute(height, width, rect, window, |r, c| {
                    match (high_sample(r, c), low_sample(r, c)) {
                        (Some(h), Some(l)) => Some(h * l),
                        _ => None,
                    }
                });
                match pooled.as_mut() {
                    Some((x, y, xy)) => {
                        x.merge(&joint_high);
                        y.merge(&joint_low);
                        xy.merge(&joint_product);
                    }
                    None => pooled = Some((joint_high, joint_low, joint_product)),
                }

                // Tolerance for the candidate similarity test.
                tolerance.push(match self.options.tolerance_mode {
                    ToleranceMode::Global => {
                        Tolerance::Global(global_tolerance(
                            height,
                            width,
                            self.options.number_classes,
                            &high_sample,
                        ))
                    }
                    ToleranceMode::Local => Tolerance::Local(WindowedStats::compute(
                        height,
                        width,
                        rect,
                        window,
                        &high_sample,
                    )),
                });

                // Windowed |mean(low) - mean(low_pred)| drives the
                // cross-pair combination weights.
                let low_stats = WindowedStats::compute(height, width, rect, window, |r, c| {
                    pred_sample(r, c).and_then(|_| low_sample(r, c))
                });
                let pred_stats = WindowedStats::compute(height, width, rect, window, |r, c| {
                    low_sample(r, c).and_then(|_| pred_sample(r, c))
                });
                temporal_diff.push(Array2::from_shape_fn(
                    (rect.height, rect.width),
                    |(oy, ox)| match (low_stats.mean(oy, ox), pred_stats.mean(oy, ox)) {
                        (Some(a), Some(b)) => (a - b).abs(),
                        _ => 0.0,
                    },
                ));
            }

            EstarfmPair {
                date: d,
                high: high_view,
                low: low_view,
                high_nodata: high.nodata.clone(),
                low_nodata: low.nodata.clone(),
                tolerance,
                temporal_diff,
            }
        };

        let pair1 = build_pair(date1);
        let pair2 = build_pair(date2);
        let (x_stats, y_stats, xy_stats) = pooled.expect("at least one band processed");
        let local_weight = local_weights(&x_stats, &y_stats, &xy_stats);
        log::debug!(
            "Local weights ready for pair dates {} and {}",
            pair1.date,
            pair2.date
        );

        let kernel = EstarfmKernel {
            pairs: [pair1, pair2],
            low_pred: low_pred_view,
            low_pred_nodata: low_pred.nodata.clone(),
            valid,
            prediction,
            dist: distance_kernel(window),
            local_weight,
            rect,
            height,
            width,
            bands,
            window,
            classes: self.options.number_classes,
            regression: self.options.regression_mode,
            value_range: self.options.value_range,
            epsilon: self.options.epsilon,
        };

        let rows = predict_rows(&kernel, rect);

        let dim = (bands, rect.height, rect.width);
        let mut out: Array3<T> = match self
            .output
            .take()
            .filter(|img| img.pixel_type() == T::TYPE && img.dim() == dim)
            .and_then(T::unwrap_buffer)
        {
            Some(buffer) => buffer.into_owned(),
            None => Array3::zeros(dim),
        };
        for (oy, row_values) in rows.into_iter().enumerate() {
            for band in 0..bands {
                for ox in 0..rect.width {
                    out[[band, oy, ox]] = row_values[band * rect.width + ox];
                }
            }
        }

        let mut image = RasterImage::new(T::wrap(out.into_shared()));
        image.geo_transform = reference.geo_transform.clone();
        image.nodata = reference.nodata.clone();
        self.output = Some(image.clone());
        log::info!("Correlation-weighted prediction at date {} complete", date);
        Ok(image)
    }
}

#[cfg(feature = "parallel")]
fn predict_rows<T: FusionPixel>(kernel: &EstarfmKernel<'_, T>, rect: Rectangle) -> Vec<Vec<T>> {
    use rayon::prelude::*;
    (0..rect.height)
        .into_par_iter()
        .map(|oy| kernel.predict_row(oy))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn predict_rows<T: FusionPixel>(kernel: &EstarfmKernel<'_, T>, rect: Rectangle) -> Vec<Vec<T>> {
    (0..rect.height).map(|oy| kernel.predict_row(oy)).collect()
}

/// Whole-image `2 * stddev / classes` tolerance for one band.
fn global_tolerance<F>(height: usize, width: usize, classes: u32, sample: &F) -> f64
where
    F: Fn(usize, usize) -> Option<f64>,
{
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut n = 0u64;
    for r in 0..height {
        for c in 0..width {
            if let Some(v) = sample(r, c) {
                sum += v;
                sum_sq += v * v;
                n += 1;
            }
        }
    }
    if n == 0 {
        return f64::INFINITY;
    }
    let mean = sum / n as f64;
    let variance = (sum_sq / n as f64 - mean * mean).max(0.0);
    2.0 * variance.sqrt() / classes as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_dates_must_differ() {
        let mut options = EstarfmOptions::new();
        assert!(options.set_pair_dates(7, 7).is_err());
        assert!(options.set_pair_dates(7, 8).is_ok());
        assert_eq!(options.pair_dates().unwrap(), (7, 8));
    }

    #[test]
    fn test_zero_classes_rejected() {
        let mut options = EstarfmOptions::new();
        assert!(options.set_number_classes(0).is_err());
        assert!(options.set_number_classes(6).is_ok());
    }

    #[test]
    fn test_even_window_rejected() {
        let mut options = EstarfmOptions::new();
        assert!(options.set_window_size(8).is_err());
        assert!(options.set_window_size(9).is_ok());
    }

    #[test]
    fn test_epsilon_must_be_positive() {
        let mut options = EstarfmOptions::new();
        assert!(options.set_epsilon(0.0).is_err());
        assert!(options.set_epsilon(1e-9).is_ok());
    }

    #[test]
    fn test_slope_of_identity_samples() {
        let mut sums = RegressionSums::default();
        for i in 0..10 {
            let v = i as f64;
            sums.push(v, v, 1.0);
        }
        let slope = sums.slope(RegressionMode::Ordinary);
        approx::assert_relative_eq!(slope, 1.0);
    }

    #[test]
    fn test_slope_without_variance_defaults_to_one() {
        let mut sums = RegressionSums::default();
        for _ in 0..10 {
            sums.push(3.0, 7.0, 1.0);
        }
        assert_eq!(sums.slope(RegressionMode::Ordinary), 1.0);
        assert_eq!(sums.slope(RegressionMode::VarianceWeighted), 1.0);
    }

    #[test]
    fn test_global_tolerance_of_constant_is_zero() {
        let sample = |_r: usize, _c: usize| Some(5.0);
        assert_eq!(global_tolerance(4, 4, 4, &sample), 0.0);
    }

    #[test]
    fn test_engine_requires_complete_options() {
        let store = ImageStore::new();
        assert!(EstarfmEngine::new(EstarfmOptions::new(), &store).is_err());
    }
}
