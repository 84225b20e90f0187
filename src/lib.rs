//! stfusion: Spatiotemporal Raster Fusion
//!
//! Predicts high-resolution raster imagery at dates where only a
//! low-resolution observation exists, by fusing a high-spatial /
//! low-temporal series with a low-spatial / high-temporal one over
//! reference dates where both were acquired.
//!
//! Two sliding-window engines are provided: a similarity-weighted one
//! ([`StarfmEngine`]) that blends neighborhood candidates by spectral,
//! temporal, and spatial closeness, and a correlation/regression-weighted
//! one ([`EstarfmEngine`]) that adds per-pixel correlation weighting and a
//! regression-corrected temporal update between two reference pairs.

pub mod core;
pub mod store;
pub mod types;

// Re-export main types for easier access
pub use crate::core::{
    EstarfmEngine, EstarfmOptions, MaskView, PairDates, RegressionMode, StarfmEngine,
    StarfmOptions, ToleranceMode, MASK_VALID,
};
pub use store::{ImageKey, ImageStore};
pub use types::{
    FusionError, FusionPixel, FusionResult, GeoTransform, PixelType, RasterData, RasterImage,
    Rectangle,
};
