use ndarray::{ArcArray, Array3, ArrayView3, Ix3};
use serde::{Deserialize, Serialize};

/// Reference-counted 3-D raster buffer (band x row x column)
pub type RasterBuffer<T> = ArcArray<T, Ix3>;

/// Numeric base type of a raster band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelType {
    U8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl std::fmt::Display for PixelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PixelType::U8 => "uint8",
            PixelType::U16 => "uint16",
            PixelType::I16 => "int16",
            PixelType::U32 => "uint32",
            PixelType::I32 => "int32",
            PixelType::F32 => "float32",
            PixelType::F64 => "float64",
        };
        write!(f, "{}", name)
    }
}

/// Axis-aligned pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rectangle {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    /// Full-image rectangle for the given dimensions
    pub fn full(width: usize, height: usize) -> Self {
        Self { x: 0, y: 0, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// True if this rectangle lies entirely inside an image of the given size
    pub fn fits_within(&self, width: usize, height: usize) -> bool {
        self.x + self.width <= width && self.y + self.height <= height
    }
}

/// Geospatial transformation parameters (affine, GDAL convention)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

/// Error types for fusion processing
#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    /// Rejected by an options setter or pre-prediction validation
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A required (tag, date) raster is absent from the image store
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Size, band count, or base type disagreement between compared rasters
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Programming-invariant violation, unrecoverable by retrying with other options
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type for fusion operations
pub type FusionResult<T> = Result<T, FusionError>;

/// Type-tagged raster payload
#[derive(Debug, Clone)]
pub enum RasterData {
    U8(RasterBuffer<u8>),
    U16(RasterBuffer<u16>),
    I16(RasterBuffer<i16>),
    U32(RasterBuffer<u32>),
    I32(RasterBuffer<i32>),
    F32(RasterBuffer<f32>),
    F64(RasterBuffer<f64>),
}

impl RasterData {
    pub fn pixel_type(&self) -> PixelType {
        match self {
            RasterData::U8(_) => PixelType::U8,
            RasterData::U16(_) => PixelType::U16,
            RasterData::I16(_) => PixelType::I16,
            RasterData::U32(_) => PixelType::U32,
            RasterData::I32(_) => PixelType::I32,
            RasterData::F32(_) => PixelType::F32,
            RasterData::F64(_) => PixelType::F64,
        }
    }

    /// (bands, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        match self {
            RasterData::U8(a) => a.dim(),
            RasterData::U16(a) => a.dim(),
            RasterData::I16(a) => a.dim(),
            RasterData::U32(a) => a.dim(),
            RasterData::I32(a) => a.dim(),
            RasterData::F32(a) => a.dim(),
            RasterData::F64(a) => a.dim(),
        }
    }
}

/// Multi-band raster image with shared ownership of its buffer.
///
/// Cloning is cheap: the pixel data is reference counted, so crops and
/// copies handed across threads all address the same allocation until one
/// of them needs mutation (copy-on-write).
#[derive(Debug, Clone)]
pub struct RasterImage {
    data: RasterData,
    /// Optional affine georeferencing, carried through predictions
    pub geo_transform: Option<GeoTransform>,
    /// Optional per-band nodata values; a source sample equal to its band's
    /// nodata is treated as unusable
    pub nodata: Option<Vec<f64>>,
}

impl RasterImage {
    pub fn new(data: RasterData) -> Self {
        Self {
            data,
            geo_transform: None,
            nodata: None,
        }
    }

    /// Build a raster from a flat band-major vector
    pub fn from_vec<T: FusionPixel>(
        bands: usize,
        height: usize,
        width: usize,
        values: Vec<T>,
    ) -> FusionResult<Self> {
        let arr = Array3::from_shape_vec((bands, height, width), values).map_err(|e| {
            FusionError::ShapeMismatch(format!(
                "Buffer length does not match {}x{}x{}: {}",
                bands, height, width, e
            ))
        })?;
        Ok(Self::new(T::wrap(arr.into_shared())))
    }

    /// Build a constant-valued raster
    pub fn filled<T: FusionPixel>(bands: usize, height: usize, width: usize, value: T) -> Self {
        Self::new(T::wrap(Array3::from_elem((bands, height, width), value).into_shared()))
    }

    pub fn data(&self) -> &RasterData {
        &self.data
    }

    pub fn pixel_type(&self) -> PixelType {
        self.data.pixel_type()
    }

    pub fn bands(&self) -> usize {
        self.data.dim().0
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    /// (bands, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Read one sample widened to f64 (dispatches on the type tag; not for
    /// use inside pixel loops)
    pub fn get_f64(&self, band: usize, row: usize, col: usize) -> f64 {
        match &self.data {
            RasterData::U8(a) => a[[band, row, col]] as f64,
            RasterData::U16(a) => a[[band, row, col]] as f64,
            RasterData::I16(a) => a[[band, row, col]] as f64,
            RasterData::U32(a) => a[[band, row, col]] as f64,
            RasterData::I32(a) => a[[band, row, col]] as f64,
            RasterData::F32(a) => a[[band, row, col]] as f64,
            RasterData::F64(a) => a[[band, row, col]],
        }
    }

    /// Shared crop: a view of `rect` in every band that keeps the original
    /// buffer alive without copying pixels.
    pub fn crop(&self, rect: Rectangle) -> FusionResult<RasterImage> {
        let (_, height, width) = self.dim();
        if !rect.fits_within(width, height) {
            return Err(FusionError::ShapeMismatch(format!(
                "Crop {}x{}+{}+{} exceeds image size {}x{}",
                rect.width, rect.height, rect.x, rect.y, width, height
            )));
        }
        let rows = rect.y..rect.y + rect.height;
        let cols = rect.x..rect.x + rect.width;
        macro_rules! crop_arm {
            ($variant:ident, $a:expr) => {
                RasterData::$variant(
                    $a.clone()
                        .slice_move(ndarray::s![.., rows.clone(), cols.clone()]),
                )
            };
        }
        let data = match &self.data {
            RasterData::U8(a) => crop_arm!(U8, a),
            RasterData::U16(a) => crop_arm!(U16, a),
            RasterData::I16(a) => crop_arm!(I16, a),
            RasterData::U32(a) => crop_arm!(U32, a),
            RasterData::I32(a) => crop_arm!(I32, a),
            RasterData::F32(a) => crop_arm!(F32, a),
            RasterData::F64(a) => crop_arm!(F64, a),
        };
        Ok(RasterImage {
            data,
            geo_transform: self.geo_transform.clone(),
            nodata: self.nodata.clone(),
        })
    }

    /// Check base type, band count, and size against another raster,
    /// reporting expected vs. found with both rasters named.
    pub fn expect_compatible(
        &self,
        name: &str,
        other: &RasterImage,
        other_name: &str,
    ) -> FusionResult<()> {
        if self.pixel_type() != other.pixel_type() {
            return Err(FusionError::ShapeMismatch(format!(
                "{} has base type {} but {} has {}",
                name,
                self.pixel_type(),
                other_name,
                other.pixel_type()
            )));
        }
        if self.dim() != other.dim() {
            let (b0, h0, w0) = self.dim();
            let (b1, h1, w1) = other.dim();
            return Err(FusionError::ShapeMismatch(format!(
                "{} is {} band(s) of {}x{} but {} is {} band(s) of {}x{}",
                name, b0, w0, h0, other_name, b1, w1, h1
            )));
        }
        Ok(())
    }

    /// Check that per-band nodata, when present, carries exactly one value
    /// per band.
    pub fn validate_nodata(&self, name: &str) -> FusionResult<()> {
        if let Some(nd) = &self.nodata {
            if nd.len() != self.bands() {
                return Err(FusionError::ShapeMismatch(format!(
                    "{} carries {} nodata value(s) for {} band(s)",
                    name,
                    nd.len(),
                    self.bands()
                )));
            }
        }
        Ok(())
    }
}

/// Numeric element type usable as raster samples.
///
/// Implemented for the seven supported base types; the engines match on
/// [`PixelType`] once per prediction and run a kernel monomorphized over
/// this trait, so the per-pixel loops carry no dynamic dispatch.
pub trait FusionPixel:
    Copy + PartialOrd + Send + Sync + num_traits::ToPrimitive + num_traits::Zero + 'static
{
    const TYPE: PixelType;

    /// Widen to f64 for kernel arithmetic
    fn to_sample(self) -> f64;

    /// Narrow from f64, rounding and saturating at the type bounds
    fn from_sample(value: f64) -> Self;

    /// Typed view into a raster, `None` when the tag disagrees
    fn view(image: &RasterImage) -> Option<ArrayView3<'_, Self>>;

    /// Take the typed buffer out of a raster, `None` when the tag disagrees
    fn unwrap_buffer(image: RasterImage) -> Option<RasterBuffer<Self>>;

    /// Wrap a typed array back into the tagged payload
    fn wrap(buffer: RasterBuffer<Self>) -> RasterData;
}

macro_rules! impl_int_pixel {
    ($t:ty, $variant:ident) => {
        impl FusionPixel for $t {
            const TYPE: PixelType = PixelType::$variant;

            #[inline]
            fn to_sample(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_sample(value: f64) -> Self {
                if value.is_nan() {
                    return 0;
                }
                let rounded = value.round();
                if rounded <= <$t>::MIN as f64 {
                    <$t>::MIN
                } else if rounded >= <$t>::MAX as f64 {
                    <$t>::MAX
                } else {
                    rounded as $t
                }
            }

            fn view(image: &RasterImage) -> Option<ArrayView3<'_, Self>> {
                match image.data() {
                    RasterData::$variant(a) => Some(a.view()),
                    _ => None,
                }
            }

            fn unwrap_buffer(image: RasterImage) -> Option<RasterBuffer<Self>> {
                match image.data {
                    RasterData::$variant(a) => Some(a),
                    _ => None,
                }
            }

            fn wrap(buffer: RasterBuffer<Self>) -> RasterData {
                RasterData::$variant(buffer)
            }
        }
    };
}

macro_rules! impl_float_pixel {
    ($t:ty, $variant:ident) => {
        impl FusionPixel for $t {
            const TYPE: PixelType = PixelType::$variant;

            #[inline]
            fn to_sample(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_sample(value: f64) -> Self {
                value as $t
            }

            fn view(image: &RasterImage) -> Option<ArrayView3<'_, Self>> {
                match image.data() {
                    RasterData::$variant(a) => Some(a.view()),
                    _ => None,
                }
            }

            fn unwrap_buffer(image: RasterImage) -> Option<RasterBuffer<Self>> {
                match image.data {
                    RasterData::$variant(a) => Some(a),
                    _ => None,
                }
            }

            fn wrap(buffer: RasterBuffer<Self>) -> RasterData {
                RasterData::$variant(buffer)
            }
        }
    };
}

impl_int_pixel!(u8, U8);
impl_int_pixel!(u16, U16);
impl_int_pixel!(i16, I16);
impl_int_pixel!(u32, U32);
impl_int_pixel!(i32, I32);
impl_float_pixel!(f32, F32);
impl_float_pixel!(f64, F64);

/// Run `$body` with `$T` bound to the concrete element type of `$pt`.
///
/// This is the single dispatch point from a runtime [`PixelType`] tag to the
/// monomorphized kernels; it is evaluated once per `predict` call.
macro_rules! with_pixel_type {
    ($pt:expr, $T:ident => $body:expr) => {
        match $pt {
            $crate::types::PixelType::U8 => {
                type $T = u8;
                $body
            }
            $crate::types::PixelType::U16 => {
                type $T = u16;
                $body
            }
            $crate::types::PixelType::I16 => {
                type $T = i16;
                $body
            }
            $crate::types::PixelType::U32 => {
                type $T = u32;
                $body
            }
            $crate::types::PixelType::I32 => {
                type $T = i32;
                $body
            }
            $crate::types::PixelType::F32 => {
                type $T = f32;
                $body
            }
            $crate::types::PixelType::F64 => {
                type $T = f64;
                $body
            }
        }
    };
}

pub(crate) use with_pixel_type;

impl RasterImage {
    /// Copy-convert to another base type, rounding and saturating when the
    /// target is an integer type. Metadata is carried over unchanged.
    pub fn cast_to(&self, ptype: PixelType) -> RasterImage {
        if ptype == self.pixel_type() {
            return self.clone();
        }
        let (bands, height, width) = self.dim();
        let mut image = with_pixel_type!(ptype, P => {
            let arr = Array3::from_shape_fn((bands, height, width), |(b, r, c)| {
                P::from_sample(self.get_f64(b, r, c))
            });
            RasterImage::new(P::wrap(arr.into_shared()))
        });
        image.geo_transform = self.geo_transform.clone();
        image.nodata = self.nodata.clone();
        image
    }
}
