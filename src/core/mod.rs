//! Core fusion modules

pub mod estarfm;
pub mod mask;
pub mod starfm;
pub mod weights;
pub mod window_stats;

// Re-export main types
pub use estarfm::{EstarfmEngine, EstarfmOptions, RegressionMode, ToleranceMode};
pub use mask::{MaskView, MASK_VALID};
pub use starfm::{PairDates, StarfmEngine, StarfmOptions};
pub use weights::{correlation_from_sums, distance_kernel, local_weights};
pub use window_stats::WindowedStats;
