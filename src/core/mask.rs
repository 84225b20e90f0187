//! Validity mask resolution for the fusion kernels.
//!
//! Masks are 8-bit rasters where 255 marks a usable cell and 0 an excluded
//! one. A single-band mask broadcasts over all bands of the target.

use ndarray::ArrayView3;

use crate::types::{FusionError, FusionPixel, FusionResult, PixelType, RasterImage};

/// Cell value marking "usable" in a mask raster
pub const MASK_VALID: u8 = 255;

/// Read-only mask accessor with broadcasting resolved up front, so the
/// per-pixel check is a plain array read.
#[derive(Debug, Clone, Copy)]
pub struct MaskView<'a> {
    data: Option<ArrayView3<'a, u8>>,
    broadcast: bool,
}

impl<'a> MaskView<'a> {
    /// The "no mask supplied" case: every cell is usable.
    pub fn all_valid() -> Self {
        Self {
            data: None,
            broadcast: false,
        }
    }

    /// Validate `mask` against a target of `bands` x `height` x `width` and
    /// wrap it. Fails fast, before any pixel work, when the mask is not
    /// 8-bit, its size differs from the target, or its band count is
    /// neither 1 nor the target's.
    pub fn from_raster(
        mask: Option<&'a RasterImage>,
        name: &str,
        bands: usize,
        height: usize,
        width: usize,
    ) -> FusionResult<Self> {
        let mask = match mask {
            Some(m) => m,
            None => return Ok(Self::all_valid()),
        };
        if mask.pixel_type() != PixelType::U8 {
            return Err(FusionError::ShapeMismatch(format!(
                "{} must be uint8, found {}",
                name,
                mask.pixel_type()
            )));
        }
        let (mbands, mheight, mwidth) = mask.dim();
        if (mheight, mwidth) != (height, width) {
            return Err(FusionError::ShapeMismatch(format!(
                "{} is {}x{} but the target raster is {}x{}",
                name, mwidth, mheight, width, height
            )));
        }
        if mbands != 1 && mbands != bands {
            return Err(FusionError::ShapeMismatch(format!(
                "{} has {} band(s), expected 1 or {}",
                name, mbands, bands
            )));
        }
        let view = match mask.data() {
            crate::types::RasterData::U8(a) => a.view(),
            _ => unreachable!("pixel type checked above"),
        };
        Ok(Self {
            data: Some(view),
            broadcast: mbands == 1,
        })
    }

    #[inline]
    pub fn is_valid(&self, band: usize, row: usize, col: usize) -> bool {
        match &self.data {
            None => true,
            Some(m) => {
                let b = if self.broadcast { 0 } else { band };
                m[[b, row, col]] == MASK_VALID
            }
        }
    }
}

/// Sample a raster cell as f64, or `None` when the cell is masked out,
/// non-finite, or equal to the band's nodata value.
#[inline]
pub(crate) fn usable_sample<T: FusionPixel>(
    img: &ArrayView3<'_, T>,
    nodata: &Option<Vec<f64>>,
    valid: &MaskView<'_>,
    band: usize,
    row: usize,
    col: usize,
) -> Option<f64> {
    if !valid.is_valid(band, row, col) {
        return None;
    }
    let v = img[[band, row, col]].to_sample();
    if !v.is_finite() {
        return None;
    }
    if let Some(nd) = nodata {
        if v == nd[band] {
            return None;
        }
    }
    Some(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_mask_is_all_valid() {
        let view = MaskView::from_raster(None, "valid mask", 3, 4, 5).unwrap();
        assert!(view.is_valid(2, 3, 4));
    }

    #[test]
    fn test_single_band_broadcasts() {
        let mut values = vec![0u8; 4];
        values[3] = MASK_VALID;
        let mask = RasterImage::from_vec::<u8>(1, 2, 2, values).unwrap();
        let view = MaskView::from_raster(Some(&mask), "valid mask", 3, 2, 2).unwrap();
        for band in 0..3 {
            assert!(view.is_valid(band, 1, 1));
            assert!(!view.is_valid(band, 0, 0));
        }
    }

    #[test]
    fn test_band_count_mismatch_rejected() {
        let mask = RasterImage::filled::<u8>(2, 2, 2, MASK_VALID);
        let err = MaskView::from_raster(Some(&mask), "valid mask", 3, 2, 2).unwrap_err();
        assert!(matches!(err, FusionError::ShapeMismatch(_)));
        assert!(format!("{}", err).contains("expected 1 or 3"));
    }

    #[test]
    fn test_non_u8_mask_rejected() {
        let mask = RasterImage::filled::<u16>(1, 2, 2, 255);
        let err = MaskView::from_raster(Some(&mask), "valid mask", 1, 2, 2).unwrap_err();
        assert!(format!("{}", err).contains("uint8"));
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mask = RasterImage::filled::<u8>(1, 3, 3, MASK_VALID);
        assert!(MaskView::from_raster(Some(&mask), "valid mask", 1, 2, 2).is_err());
    }
}
