use stfusion::{
    EstarfmEngine, EstarfmOptions, FusionError, ImageStore, RasterImage, Rectangle,
    RegressionMode, ToleranceMode,
};

fn lcg_values(len: usize, seed: u64) -> Vec<u16> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 33) % 1000) as u16
        })
        .collect()
}

fn base_options() -> EstarfmOptions {
    let mut options = EstarfmOptions::new();
    options.set_resolution_tags("fine", "coarse").unwrap();
    options.set_pair_dates(1, 3).unwrap();
    options.set_window_size(5).unwrap();
    options
}

/// Constant-valued series with a uniform temporal shift: the prediction is
/// exactly the reference plus the low-resolution change.
fn constant_store() -> ImageStore {
    let mut store = ImageStore::new();
    store.insert("fine", 1, RasterImage::filled::<f64>(1, 5, 5, 100.0));
    store.insert("coarse", 1, RasterImage::filled::<f64>(1, 5, 5, 105.0));
    store.insert("fine", 3, RasterImage::filled::<f64>(1, 5, 5, 110.0));
    store.insert("coarse", 3, RasterImage::filled::<f64>(1, 5, 5, 115.0));
    store.insert("coarse", 2, RasterImage::filled::<f64>(1, 5, 5, 109.0));
    store
}

#[test]
fn test_identical_series_is_reproduced_exactly() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut store = ImageStore::new();
    let image = RasterImage::from_vec::<u16>(2, 7, 8, lcg_values(2 * 7 * 8, 5)).unwrap();
    for date in [1, 3] {
        store.insert("fine", date, image.clone());
        store.insert("coarse", date, image.clone());
    }
    store.insert("coarse", 2, image.clone());

    let mut engine = EstarfmEngine::new(base_options(), &store).unwrap();
    let out = engine.predict(2, None, None).unwrap();

    for band in 0..2 {
        for r in 0..7 {
            for c in 0..8 {
                assert_eq!(out.get_f64(band, r, c), image.get_f64(band, r, c));
            }
        }
    }
}

#[test]
fn test_uniform_temporal_shift_is_interpolated() {
    let store = constant_store();
    let mut engine = EstarfmEngine::new(base_options(), &store).unwrap();
    let out = engine.predict(2, None, None).unwrap();

    // 100 at date 1, 110 at date 3, low-resolution change says +4 by the
    // prediction date, symmetric from either side.
    for r in 0..5 {
        for c in 0..5 {
            approx::assert_relative_eq!(out.get_f64(0, r, c), 104.0, max_relative = 1e-12);
        }
    }
}

#[test]
fn test_local_tolerance_and_weighted_regression() {
    let store = constant_store();
    let mut options = base_options();
    options.set_tolerance_mode(ToleranceMode::Local);
    options.set_regression_mode(RegressionMode::VarianceWeighted);
    let mut engine = EstarfmEngine::new(options, &store).unwrap();
    let out = engine.predict(2, None, None).unwrap();

    for r in 0..5 {
        for c in 0..5 {
            approx::assert_relative_eq!(out.get_f64(0, r, c), 104.0, max_relative = 1e-12);
        }
    }
}

#[test]
fn test_windowed_prediction_covers_only_the_rect() {
    let store = constant_store();
    let mut engine = EstarfmEngine::new(base_options(), &store).unwrap();
    let out = engine
        .predict_window(Some(Rectangle::new(1, 1, 2, 2)), 2, None, None)
        .unwrap();
    assert_eq!(out.dim(), (1, 2, 2));
    for r in 0..2 {
        for c in 0..2 {
            approx::assert_relative_eq!(out.get_f64(0, r, c), 104.0, max_relative = 1e-12);
        }
    }
}

#[test]
fn test_out_of_range_correction_falls_back_to_average() {
    let mut store = ImageStore::new();
    for date in [1, 3] {
        store.insert("fine", date, RasterImage::filled::<f64>(1, 5, 5, 100.0));
        store.insert("coarse", date, RasterImage::filled::<f64>(1, 5, 5, 100.0));
    }
    // Implausible jump in the low-resolution series.
    store.insert("coarse", 2, RasterImage::filled::<f64>(1, 5, 5, 150.0));

    // Without a configured range the correction is applied as fitted.
    let mut engine = EstarfmEngine::new(base_options(), &store).unwrap();
    let out = engine.predict(2, None, None).unwrap();
    approx::assert_relative_eq!(out.get_f64(0, 2, 2), 150.0, max_relative = 1e-12);

    // With one, the out-of-range correction is replaced by the weighted
    // average of the accepted reference pixels.
    let mut options = base_options();
    options.set_value_range(Some((0.0, 120.0))).unwrap();
    let mut engine = EstarfmEngine::new(options, &store).unwrap();
    let out = engine.predict(2, None, None).unwrap();
    for r in 0..5 {
        for c in 0..5 {
            approx::assert_relative_eq!(out.get_f64(0, r, c), 100.0, max_relative = 1e-12);
        }
    }
}

#[test]
fn test_missing_inputs_are_enumerated() {
    let mut store = ImageStore::new();
    store.insert("fine", 1, RasterImage::filled::<u8>(1, 2, 2, 0));
    store.insert("coarse", 1, RasterImage::filled::<u8>(1, 2, 2, 0));
    store.insert("fine", 3, RasterImage::filled::<u8>(1, 2, 2, 0));

    let mut engine = EstarfmEngine::new(base_options(), &store).unwrap();
    let err = engine.predict(2, None, None).unwrap_err();
    assert!(matches!(err, FusionError::MissingInput(_)));
    let msg = format!("{}", err);
    assert!(msg.contains("(coarse, 3)"));
    assert!(msg.contains("(coarse, 2)"));
    assert!(!msg.contains("(fine, 1)"));
}

#[test]
fn test_short_nodata_vector_is_rejected() {
    let mut store = constant_store();
    let mut low = RasterImage::filled::<f64>(1, 5, 5, 115.0);
    low.nodata = Some(vec![0.0, 0.0]);
    store.insert("coarse", 3, low);

    let mut engine = EstarfmEngine::new(base_options(), &store).unwrap();
    let err = engine.predict(2, None, None).unwrap_err();
    assert!(matches!(err, FusionError::ShapeMismatch(_)));
    assert!(format!("{}", err).contains("nodata value(s)"));
}

#[test]
fn test_incompatible_raster_is_rejected() {
    let mut store = constant_store();
    store.insert("fine", 3, RasterImage::filled::<f64>(1, 4, 4, 110.0));

    let mut engine = EstarfmEngine::new(base_options(), &store).unwrap();
    let err = engine.predict(2, None, None).unwrap_err();
    assert!(matches!(err, FusionError::ShapeMismatch(_)));
    let msg = format!("{}", err);
    assert!(msg.contains("date 1"));
    assert!(msg.contains("date 3"));
}
