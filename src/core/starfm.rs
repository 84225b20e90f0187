//! Similarity-weighted spatiotemporal fusion.
//!
//! For every output pixel the kernel scans a square window in one or two
//! reference image pairs (high + low resolution at a pair date), accepts
//! candidates whose spectral and temporal differences are no worse than the
//! best pair at the window center, and blends their local predictions with
//! inverse difference-and-distance weights.

use ndarray::{Array2, Array3, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::core::mask::{usable_sample, MaskView};
use crate::core::weights::distance_kernel;
use crate::store::ImageStore;
use crate::types::{
    with_pixel_type, FusionError, FusionPixel, FusionResult, RasterImage, Rectangle,
};

/// Reference pair configuration: one pair date, or two distinct ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairDates {
    Single(i32),
    Double(i32, i32),
}

impl PairDates {
    pub fn dates(&self) -> Vec<i32> {
        match *self {
            PairDates::Single(d) => vec![d],
            PairDates::Double(d1, d2) => vec![d1, d2],
        }
    }
}

/// Options for the similarity-weighted variant.
///
/// Constructed with defaults, mutated through validating setters that fail
/// fast, and immutable while a prediction runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StarfmOptions {
    high_tag: Option<String>,
    low_tag: Option<String>,
    dates: Option<PairDates>,
    window_size: usize,
    number_classes: Option<u32>,
    spectral_uncertainty: f64,
    temporal_uncertainty: f64,
    log_scale_factor: Option<f64>,
    strict_filtering: bool,
    copy_on_zero_diff: bool,
    use_temporal_difference: Option<bool>,
    value_range: Option<(f64, f64)>,
}

impl Default for StarfmOptions {
    fn default() -> Self {
        Self {
            high_tag: None,
            low_tag: None,
            dates: None,
            window_size: 31,
            number_classes: None,
            spectral_uncertainty: 0.0,
            temporal_uncertainty: 0.0,
            log_scale_factor: None,
            strict_filtering: true,
            copy_on_zero_diff: true,
            use_temporal_difference: None,
            value_range: None,
        }
    }
}

impl StarfmOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure which stored series is the high-resolution one and which
    /// the low-resolution one. The strings are opaque; nothing is ever
    /// inferred from their content.
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

    /// Switch to single-pair mode with the given pair date.
    pub fn set_pair_date(&mut self, date: i32) {
        self.dates = Some(PairDates::Single(date));
    }

    /// Switch to double-pair mode. The two pair dates must differ.
    pub fn set_pair_dates(&mut self, date1: i32, date2: i32) -> FusionResult<()> {
        if date1 == date2 {
            return Err(FusionError::Config(format!(
                "Pair dates must differ in double-pair mode, both are {}",
                date1
            )));
        }
        self.dates = Some(PairDates::Double(date1, date2));
        Ok(())
    }

    /// The single pair date; an error when not in single-pair mode.
    pub fn pair_date(&self) -> FusionResult<i32> {
        match self.dates {
            Some(PairDates::Single(d)) => Ok(d),
            Some(PairDates::Double(..)) => Err(FusionError::Config(
                "pair_date() queried while configured for double-pair mode".to_string(),
            )),
            None => Err(FusionError::Config("No pair date configured".to_string())),
        }
    }

    /// Both pair dates; an error when not in double-pair mode.
    pub fn pair_dates(&self) -> FusionResult<(i32, i32)> {
        match self.dates {
            Some(PairDates::Double(d1, d2)) => Ok((d1, d2)),
            Some(PairDates::Single(_)) => Err(FusionError::Config(
                "pair_dates() queried while configured for single-pair mode".to_string(),
            )),
            None => Err(FusionError::Config("No pair dates configured".to_string())),
        }
    }

    pub fn is_double_pair(&self) -> bool {
        matches!(self.dates, Some(PairDates::Double(..)))
    }

    /// Window side length; must be odd and at least 3.
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

    /// Optional class-similarity prefilter: when set, a candidate must also
    /// lie within `2 * stddev / classes` of the center in the pair-date
    /// high-resolution image. `None` disables the prefilter.
    pub fn set_number_classes(&mut self, classes: Option<u32>) -> FusionResult<()> {
        if classes == Some(0) {
            return Err(FusionError::Config(
                "Number of classes must be positive".to_string(),
            ));
        }
        self.number_classes = classes;
        Ok(())
    }

    pub fn number_classes(&self) -> Option<u32> {
        self.number_classes
    }

    /// Spectral and temporal measurement uncertainties; both non-negative.
    pub fn set_uncertainties(&mut self, spectral: f64, temporal: f64) -> FusionResult<()> {
        if !spectral.is_finite() || !temporal.is_finite() || spectral < 0.0 || temporal < 0.0 {
            return Err(FusionError::Config(format!(
                "Uncertainties must be finite and non-negative, got spectral {} temporal {}",
                spectral, temporal
            )));
        }
        self.spectral_uncertainty = spectral;
        self.temporal_uncertainty = temporal;
        Ok(())
    }

    pub fn uncertainties(&self) -> (f64, f64) {
        (self.spectral_uncertainty, self.temporal_uncertainty)
    }

    /// `Some(b)` with positive `b` switches candidate weighting to the
    /// logarithmic form `ln(S*b + 2) * ln(T*b + 2) * D`; `None` keeps the
    /// linear form `(S + 1)(T + 1) * D`.
    pub fn set_log_scale_factor(&mut self, factor: Option<f64>) -> FusionResult<()> {
        if let Some(b) = factor {
            if !b.is_finite() || b <= 0.0 {
                return Err(FusionError::Config(format!(
                    "Logarithmic scale factor must be positive, got {}",
                    b
                )));
            }
        }
        self.log_scale_factor = factor;
        Ok(())
    }

    /// Strict filtering requires a candidate to pass both similarity tests;
    /// loose filtering accepts it when either passes.
    pub fn set_strict_filtering(&mut self, strict: bool) {
        self.strict_filtering = strict;
    }

    /// Copy the reference high-resolution pixel whenever the center's
    /// spectral or temporal difference is exactly zero, overriding the
    /// weighted result.
    pub fn set_copy_on_zero_diff(&mut self, copy: bool) {
        self.copy_on_zero_diff = copy;
    }

    /// Temporal-difference policy. `None` derives it from the pair mode
    /// (double-pair uses temporal differences, single-pair forces them to
    /// zero); `Some(_)` overrides either way.
    pub fn set_use_temporal_difference(&mut self, use_temporal: Option<bool>) {
        self.use_temporal_difference = use_temporal;
    }

    /// Optional global value range; predictions are clamped into it.
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

    /// Everything a prediction needs must be set.
    fn ensure_ready(&self) -> FusionResult<(&str, &str, PairDates)> {
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
            .ok_or_else(|| FusionError::Config("Pair date(s) not configured".to_string()))?;
        Ok((high, low, dates))
    }
}

/// One validated reference pair, resolved from the store.
struct PairInputs<'v, T> {
    date: i32,
    high: ArrayView3<'v, T>,
    low: ArrayView3<'v, T>,
    high_nodata: Option<Vec<f64>>,
    low_nodata: Option<Vec<f64>>,
    /// Per-band class-similarity tolerance, infinite when disabled
    class_tolerance: Vec<f64>,
}

/// Read-only state shared by every pixel of one prediction.
struct StarfmKernel<'v, T> {
    pairs: Vec<PairInputs<'v, T>>,
    low_pred: ArrayView3<'v, T>,
    low_pred_nodata: Option<Vec<f64>>,
    valid: MaskView<'v>,
    prediction: MaskView<'v>,
    dist: Array2<f64>,
    height: usize,
    width: usize,
    bands: usize,
    window: usize,
    use_temporal: bool,
    strict: bool,
    copy_on_zero: bool,
    spectral_threshold_pad: f64,
    temporal_threshold_pad: f64,
    combined_uncertainty: f64,
    log_scale: Option<f64>,
    value_range: Option<(f64, f64)>,
}

impl<'v, T: FusionPixel> StarfmKernel<'v, T> {
    fn predict_pixel(&self, band: usize, row: usize, col: usize) -> f64 {
        let lp_center = usable_sample(&self.low_pred, &self.low_pred_nodata, &self.valid, band, row, col);

        // Center differences per pair; thresholds come from the best pair.
        let mut centers: Vec<Option<(f64, f64, f64, f64)>> = Vec::with_capacity(self.pairs.len());
        for pair in &self.pairs {
            let h = usable_sample(&pair.high, &pair.high_nodata, &self.valid, band, row, col);
            let l = usable_sample(&pair.low, &pair.low_nodata, &self.valid, band, row, col);
            centers.push(match (h, l, lp_center) {
                (Some(h), Some(l), Some(lp)) => Some((h, l, (h - l).abs(), (lp - l).abs())),
                _ => None,
            });
        }

        // Zero-difference copy uses the raw temporal difference even when
        // the weighting policy suppresses it, otherwise a forced T = 0
        // would copy everywhere.
        if self.copy_on_zero {
            for center in centers.iter().flatten() {
                let (h, _, s, t_raw) = *center;
                if s == 0.0 || t_raw == 0.0 {
                    return self.clamp(h);
                }
            }
        }

        let s_threshold = centers
            .iter()
            .flatten()
            .map(|&(_, _, s, _)| s)
            .fold(f64::INFINITY, f64::min)
            + self.spectral_threshold_pad;
        let t_threshold = centers
            .iter()
            .flatten()
            .map(|&(_, _, _, t)| if self.use_temporal { t } else { 0.0 })
            .fold(f64::INFINITY, f64::min)
            + self.temporal_threshold_pad;

        let hw = self.window / 2;
        let r_lo = row.saturating_sub(hw);
        let r_hi = (row + hw).min(self.height - 1);
        let c_lo = col.saturating_sub(hw);
        let c_hi = (col + hw).min(self.width - 1);

        let mut weight_sum = 0.0f64;
        let mut value_sum = 0.0f64;
        for r in r_lo..=r_hi {
            for c in c_lo..=c_hi {
                let lp = match usable_sample(&self.low_pred, &self.low_pred_nodata, &self.valid, band, r, c) {
                    Some(v) => v,
                    None => continue,
                };
                let d = self.dist[[r + hw - row, c + hw - col]];
                for (pair, center) in self.pairs.iter().zip(&centers) {
                    let h = match usable_sample(&pair.high, &pair.high_nodata, &self.valid, band, r, c) {
                        Some(v) => v,
                        None => continue,
                    };
                    let l = match usable_sample(&pair.low, &pair.low_nodata, &self.valid, band, r, c) {
                        Some(v) => v,
                        None => continue,
                    };
                    if let Some((h_center, _, _, _)) = center {
                        if (h - h_center).abs() > pair.class_tolerance[band] {
                            continue;
                        }
                    }
                    let s = (h - l).abs();
                    let t = if self.use_temporal { (lp - l).abs() } else { 0.0 };
                    let pass_s = s <= s_threshold;
                    let pass_t = t <= t_threshold;
                    let accepted = if self.strict {
                        pass_s && pass_t
                    } else {
                        pass_s || pass_t
                    };
                    if !accepted {
                        continue;
                    }
                    let reliability = (s + 1.0) * (t + 1.0);
                    let mut combined = match self.log_scale {
                        Some(b) => (s * b + 2.0).ln() * (t * b + 2.0).ln() * d,
                        None => reliability * d,
                    };
                    if reliability < self.combined_uncertainty {
                        // Differences below the measurement uncertainty are
                        // noise; do not let them dominate the average.
                        combined = 1.0;
                    }
                    weight_sum += 1.0 / combined;
                    value_sum += (h + lp - l) / combined;
                }
            }
        }

        let predicted = if weight_sum > 0.0 {
            value_sum / weight_sum
        } else {
            // Degenerate window: no candidate anywhere. Fall back to the
            // plain local value(s) at the center.
            let mut sum = 0.0;
            let mut n = 0;
            for center in centers.iter().flatten() {
                let (h, l, _, _) = *center;
                if let Some(lp) = lp_center {
                    sum += h + lp - l;
                    n += 1;
                }
            }
            if n > 0 {
                sum / n as f64
            } else {
                lp_center.unwrap_or(0.0)
            }
        };
        self.clamp(predicted)
    }

    #[inline]
    fn clamp(&self, value: f64) -> f64 {
        match self.value_range {
            Some((lo, hi)) => value.clamp(lo, hi),
            None => value,
        }
    }

    fn predict_row(&self, rect: Rectangle, oy: usize) -> Vec<T> {
        let row = rect.y + oy;
        let mut out = vec![T::zero(); self.bands * rect.width];
        for band in 0..self.bands {
            for ox in 0..rect.width {
                let col = rect.x + ox;
                if !self.prediction.is_valid(band, row, col) {
                    continue;
                }
                out[band * rect.width + ox] = T::from_sample(self.predict_pixel(band, row, col));
            }
        }
        out
    }
}

/// Similarity-weighted fusion engine.
///
/// Borrows a dated image store, owns its options and a reusable output
/// buffer. Validation re-runs on every `predict` call because the masks and
/// the prediction date vary per call.
pub struct StarfmEngine<'a> {
    options: StarfmOptions,
    store: &'a ImageStore,
    output: Option<RasterImage>,
}

impl<'a> StarfmEngine<'a> {
    /// Validate that the options are complete and bind the engine to a
    /// store.
    pub fn new(options: StarfmOptions, store: &'a ImageStore) -> FusionResult<Self> {
        options.ensure_ready()?;
        Ok(Self {
            options,
            store,
            output: None,
        })
    }

    pub fn options(&self) -> &StarfmOptions {
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
    /// Output pixels outside the prediction mask are left at zero; the
    /// contract leaves them undefined.
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
        let (high_tag, low_tag, dates) = self.options.ensure_ready()?;
        let pair_dates = dates.dates();

        // Every required (tag, date) raster, with precise reporting of the
        // absent ones.
        let mut required: Vec<(String, i32)> = Vec::new();
        for &d in &pair_dates {
            required.push((high_tag.to_string(), d));
            required.push((low_tag.to_string(), d));
        }
        required.push((low_tag.to_string(), date));
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

        let reference = self.store.get(high_tag, pair_dates[0]).unwrap();
        let (bands, height, width) = reference.dim();
        let ref_name = format!("high-resolution image at date {}", pair_dates[0]);
        for &d in &pair_dates {
            let high = self.store.get(high_tag, d).unwrap();
            let low = self.store.get(low_tag, d).unwrap();
            let high_name = format!("high-resolution image at date {}", d);
            let low_name = format!("low-resolution image at date {}", d);
            reference.expect_compatible(&ref_name, high, &high_name)?;
            reference.expect_compatible(&ref_name, low, &low_name)?;
            high.validate_nodata(&high_name)?;
            low.validate_nodata(&low_name)?;
        }
        let low_pred = self.store.get(low_tag, date).unwrap();
        let low_pred_name = format!("low-resolution image at date {}", date);
        reference.expect_compatible(&ref_name, low_pred, &low_pred_name)?;
        low_pred.validate_nodata(&low_pred_name)?;

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
            "Similarity-weighted prediction at date {} over {}x{} ({} band(s), {} pair(s), window {})",
            date,
            rect.width,
            rect.height,
            bands,
            pair_dates.len(),
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
        let (high_tag, low_tag, dates) = self.options.ensure_ready()?;
        let pair_dates = dates.dates();
        let reference = self.store.get(high_tag, pair_dates[0]).unwrap();
        let (bands, height, width) = reference.dim();

        let mut pairs: Vec<PairInputs<'_, T>> = Vec::with_capacity(pair_dates.len());
        for &d in &pair_dates {
            let high = self.store.get(high_tag, d).unwrap();
            let low = self.store.get(low_tag, d).unwrap();
            let class_tolerance = match self.options.number_classes {
                Some(classes) => class_tolerances::<T>(high, &valid, classes),
                None => vec![f64::INFINITY; bands],
            };
            pairs.push(PairInputs {
                date: d,
                high: T::view(high).expect("base type validated"),
                low: T::view(low).expect("base type validated"),
                high_nodata: high.nodata.clone(),
                low_nodata: low.nodata.clone(),
                class_tolerance,
            });
        }
        let low_pred = self.store.get(low_tag, date).unwrap();

        let use_temporal = self
            .options
            .use_temporal_difference
            .unwrap_or(self.options.is_double_pair());
        let (sigma_s, sigma_t) = self.options.uncertainties();
        let kernel = StarfmKernel {
            pairs,
            low_pred: T::view(low_pred).expect("base type validated"),
            low_pred_nodata: low_pred.nodata.clone(),
            valid,
            prediction,
            dist: distance_kernel(self.options.window_size),
            height,
            width,
            bands,
            window: self.options.window_size,
            use_temporal,
            strict: self.options.strict_filtering,
            copy_on_zero: self.options.copy_on_zero_diff,
            spectral_threshold_pad: sigma_s * std::f64::consts::SQRT_2,
            temporal_threshold_pad: sigma_t * std::f64::consts::SQRT_2,
            combined_uncertainty: (sigma_s * sigma_s + sigma_t * sigma_t).sqrt(),
            log_scale: self.options.log_scale_factor,
            value_range: self.options.value_range,
        };
        for pair in &kernel.pairs {
            log::debug!(
                "Pair date {}: class tolerances {:?}",
                pair.date,
                pair.class_tolerance
            );
        }

        let rows = predict_rows(&kernel, rect);

        let dim = (bands, rect.height, rect.width);
        let mut out: Array3<T> = match self
            .output
            .take()
            .filter(|img| img.pixel_type() == T::TYPE && img.dim() == dim)
            .and_then(T::unwrap_buffer)
        {
            // Zero-copy when the previous output is no longer shared.
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
        log::info!("Similarity-weighted prediction at date {} complete", date);
        Ok(image)
    }
}

#[cfg(feature = "parallel")]
fn predict_rows<T: FusionPixel>(kernel: &StarfmKernel<'_, T>, rect: Rectangle) -> Vec<Vec<T>> {
    use rayon::prelude::*;
    (0..rect.height)
        .into_par_iter()
        .map(|oy| kernel.predict_row(rect, oy))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn predict_rows<T: FusionPixel>(kernel: &StarfmKernel<'_, T>, rect: Rectangle) -> Vec<Vec<T>> {
    (0..rect.height)
        .map(|oy| kernel.predict_row(rect, oy))
        .collect()
}

/// Whole-image `2 * stddev / classes` tolerance per band of one
/// high-resolution pair image.
fn class_tolerances<T: FusionPixel>(
    image: &RasterImage,
    valid: &MaskView<'_>,
    classes: u32,
) -> Vec<f64> {
    let (bands, height, width) = image.dim();
    let view = T::view(image).expect("base type validated");
    let mut tolerances = Vec::with_capacity(bands);
    for band in 0..bands {
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        let mut n = 0u64;
        for row in 0..height {
            for col in 0..width {
                if let Some(v) =
                    usable_sample(&view, &image.nodata, valid, band, row, col)
                {
                    sum += v;
                    sum_sq += v * v;
                    n += 1;
                }
            }
        }
        if n == 0 {
            tolerances.push(f64::INFINITY);
        } else {
            let mean = sum / n as f64;
            let variance = (sum_sq / n as f64 - mean * mean).max(0.0);
            tolerances.push(2.0 * variance.sqrt() / classes as f64);
        }
    }
    tolerances
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_window_rejected() {
        let mut options = StarfmOptions::new();
        assert!(options.set_window_size(4).is_err());
        assert!(options.set_window_size(1).is_err());
        assert!(options.set_window_size(3).is_ok());
        assert_eq!(options.window_size(), 3);
    }

    #[test]
    fn test_equal_pair_dates_rejected() {
        let mut options = StarfmOptions::new();
        assert!(options.set_pair_dates(10, 10).is_err());
        assert!(options.set_pair_dates(10, 20).is_ok());
        assert_eq!(options.pair_dates().unwrap(), (10, 20));
    }

    #[test]
    fn test_date_query_in_wrong_mode_fails() {
        let mut options = StarfmOptions::new();
        options.set_pair_date(5);
        assert!(options.pair_date().is_ok());
        assert!(options.pair_dates().is_err());

        options.set_pair_dates(5, 6).unwrap();
        assert!(options.pair_date().is_err());
        assert!(options.pair_dates().is_ok());
    }

    #[test]
    fn test_equal_tags_rejected() {
        let mut options = StarfmOptions::new();
        assert!(options.set_resolution_tags("fine", "fine").is_err());
        assert!(options.set_resolution_tags("", "coarse").is_err());
        assert!(options.set_resolution_tags("fine", "coarse").is_ok());
    }

    #[test]
    fn test_negative_uncertainty_rejected() {
        let mut options = StarfmOptions::new();
        assert!(options.set_uncertainties(-1.0, 0.0).is_err());
        assert!(options.set_uncertainties(0.0, f64::NAN).is_err());
        assert!(options.set_uncertainties(2.0, 3.0).is_ok());
    }

    #[test]
    fn test_log_scale_factor_must_be_positive() {
        let mut options = StarfmOptions::new();
        assert!(options.set_log_scale_factor(Some(0.0)).is_err());
        assert!(options.set_log_scale_factor(Some(-2.0)).is_err());
        assert!(options.set_log_scale_factor(Some(0.5)).is_ok());
        assert!(options.set_log_scale_factor(None).is_ok());
    }

    #[test]
    fn test_engine_requires_complete_options() {
        let store = ImageStore::new();
        let options = StarfmOptions::new();
        assert!(matches!(
            StarfmEngine::new(options, &store),
            Err(FusionError::Config(_))
        ));
    }

    #[test]
    fn test_predict_on_empty_store_is_invalid_state() {
        let store = ImageStore::new();
        let mut options = StarfmOptions::new();
        options.set_resolution_tags("fine", "coarse").unwrap();
        options.set_pair_date(1);
        let mut engine = StarfmEngine::new(options, &store).unwrap();
        assert!(matches!(
            engine.predict(2, None, None),
            Err(FusionError::InvalidState(_))
        ));
    }

    #[test]
    fn test_missing_inputs_are_enumerated() {
        let mut store = ImageStore::new();
        store.insert("fine", 1, RasterImage::filled::<u8>(1, 3, 3, 10));
        let mut options = StarfmOptions::new();
        options.set_resolution_tags("fine", "coarse").unwrap();
        options.set_pair_date(1);
        options.set_window_size(3).unwrap();
        let mut engine = StarfmEngine::new(options, &store).unwrap();

        let err = engine.predict(2, None, None).unwrap_err();
        let msg = format!("{}", err);
        assert!(matches!(err, FusionError::MissingInput(_)));
        assert!(msg.contains("(coarse, 1)"));
        assert!(msg.contains("(coarse, 2)"));
        assert!(!msg.contains("(fine, 1)"));
    }
}
