//! Keyed image store for dated raster series

use std::collections::HashMap;

use crate::types::RasterImage;

/// Key of one stored raster: which resolution series it belongs to, and the
/// ordinal date it was acquired at. Dates are opaque integers; only ordering
/// and equality are ever used.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageKey {
    pub tag: String,
    pub date: i32,
}

impl ImageKey {
    pub fn new(tag: impl Into<String>, date: i32) -> Self {
        Self { tag: tag.into(), date }
    }
}

impl std::fmt::Display for ImageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.tag, self.date)
    }
}

/// In-memory store of dated rasters, indexed by (resolution tag, date).
///
/// The fusion engines borrow a store for the duration of a prediction and
/// never mutate it; images are cheap to insert because the pixel buffers are
/// reference counted.
#[derive(Debug, Default)]
pub struct ImageStore {
    images: HashMap<ImageKey, RasterImage>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the raster for (tag, date)
    pub fn insert(&mut self, tag: impl Into<String>, date: i32, image: RasterImage) {
        let key = ImageKey::new(tag, date);
        if self.images.insert(key.clone(), image).is_some() {
            log::debug!("Replaced image {} in store", key);
        }
    }

    pub fn get(&self, tag: &str, date: i32) -> Option<&RasterImage> {
        self.images.get(&ImageKey::new(tag, date))
    }

    pub fn contains(&self, tag: &str, date: i32) -> bool {
        self.images.contains_key(&ImageKey::new(tag, date))
    }

    pub fn remove(&mut self, tag: &str, date: i32) -> Option<RasterImage> {
        self.images.remove(&ImageKey::new(tag, date))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// All dates stored under one tag, sorted ascending
    pub fn dates_for_tag(&self, tag: &str) -> Vec<i32> {
        let mut dates: Vec<i32> = self
            .images
            .keys()
            .filter(|k| k.tag == tag)
            .map(|k| k.date)
            .collect();
        dates.sort_unstable();
        dates
    }
}
