use chrono::{TimeZone, Utc};
use hotspot::core::pipeline::Pipeline;
use hotspot::io::config::{HistogramConfig, SamplingConfig};
use hotspot::io::{FixedPoints, InMemoryCatalog, SeededSampler};
use hotspot::{Band, GeoTransform, HotspotError, RasterImage, RunConfig};
use ndarray::Array2;

const CLEAR: f64 = 21824.0;
const CLOUD: f64 = 21824.0 + 32.0;

fn reflectance_dn(reflectance: f64) -> f64 {
    (reflectance + 0.2) / 0.0000275
}

fn temperature_dn(kelvin: f64) -> f64 {
    (kelvin - 149.0) / 0.00341802
}

/// 60x60 grid of 0.001-degree cells around the test AOI
fn optical_scene(id: &str, year: i32, month: u32, qa: impl Fn(usize, usize) -> f64) -> RasterImage {
    let transform = GeoTransform::north_up(77.09, 28.65, 0.001, 0.001);
    let dim = (60, 60);
    RasterImage::new(id, transform)
        .with_acquired(Utc.with_ymd_and_hms(year, month, 1, 5, 20, 0).unwrap())
        .with_band(Band::new("SR_B4", Array2::from_elem(dim, reflectance_dn(0.1))))
        .unwrap()
        .with_band(Band::new(
            "SR_B5",
            Array2::from_shape_fn(dim, |(_, c)| reflectance_dn(0.2 + 0.005 * c as f64)),
        ))
        .unwrap()
        .with_band(Band::new(
            "ST_B10",
            Array2::from_shape_fn(dim, |(r, _)| temperature_dn(295.0 + 0.2 * r as f64)),
        ))
        .unwrap()
        .with_band(Band::new("QA_PIXEL", Array2::from_shape_fn(dim, |(r, c)| qa(r, c))))
        .unwrap()
}

/// 9x9 grid of 0.01-degree cells for the auxiliary layers
fn layer_image(
    id: &str,
    band: &str,
    acquired: Option<(i32, u32)>,
    value: impl Fn(usize, usize) -> f64,
) -> RasterImage {
    let transform = GeoTransform::north_up(77.08, 28.66, 0.01, 0.01);
    let image = RasterImage::new(id, transform)
        .with_band(Band::new(band, Array2::from_shape_fn((9, 9), |(r, c)| value(r, c))))
        .unwrap();
    match acquired {
        Some((year, month)) => image.with_acquired(Utc.with_ymd_and_hms(year, month, 15, 0, 0, 0).unwrap()),
        None => image,
    }
}

fn test_config() -> RunConfig {
    let mut config = RunConfig::default();
    config.aoi = vec![[77.10, 28.64], [77.14, 28.64], [77.14, 28.60], [77.10, 28.60]];
    config.optical.scale_m = 100.0;
    config.sampling = SamplingConfig {
        count: 12,
        seed: 42,
        buffer_m: 500.0,
    };
    config.ranking.top_k = 3;
    config.histogram = Some(HistogramConfig {
        layer: "Urbanization".to_string(),
        scale_m: 200.0,
        min_class: 1,
        max_class: 17,
    });
    config
}

fn catalog(config: &RunConfig, clouded: bool) -> InMemoryCatalog {
    let optical = config.optical.collection.clone();
    let layer = |name: &str| config.layer(name).unwrap().collection.clone();
    let qa = move |_: usize, c: usize| if clouded || c < 30 { CLOUD } else { CLEAR };

    InMemoryCatalog::new()
        .with_image(&optical, optical_scene("LC08_20220601", 2022, 6, |_, _| if clouded { CLOUD } else { CLEAR }))
        .with_image(&optical, optical_scene("LC08_20220701", 2022, 7, qa))
        .with_image(&optical, optical_scene("LC08_20220801", 2022, 8, |_, _| if clouded { CLOUD } else { CLEAR }))
        .with_image(&optical, optical_scene("LC08_20210101", 2021, 1, |_, _| 0.0))
        .with_image(
            layer("NO2"),
            layer_image("NO2_a", "NO2_column_number_density", Some((2022, 6)), |_, c| 1e-4 * (1.0 + c as f64)),
        )
        .with_image(
            layer("NO2"),
            layer_image("NO2_b", "NO2_column_number_density", Some((2022, 9)), |_, c| 1e-4 * (1.0 + c as f64) + 2e-5),
        )
        .with_image(
            layer("CO"),
            layer_image("CO_a", "CO_column_number_density", Some((2022, 7)), |r, _| 0.03 + 0.001 * r as f64),
        )
        .with_image(
            layer("GIMMS_NDVI"),
            layer_image("GIMMS_2013", "ndvi", Some((2013, 7)), |_, c| 0.3 + 0.01 * c as f64),
        )
        .with_image(
            layer("Population"),
            layer_image("GPW_2020", "population_density", None, |r, _| 100.0 * (r as f64 + 1.0)),
        )
        .with_image(
            layer("Urbanization"),
            layer_image("LCZ", "LCZ_Filter", None, |r, c| ((r + c) % 17 + 1) as f64),
        )
}

#[test]
fn test_full_run_produces_report() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = test_config();
    let source = catalog(&config, false);
    let pipeline = Pipeline::new(config).unwrap();
    let report = pipeline.run_seeded(&source).unwrap();

    assert_eq!(report.optical_images, 3);
    assert_eq!(report.sampled_points, 12);
    assert_eq!(report.excluded_points, 0);

    // Six derived indices plus five auxiliary layers
    assert_eq!(report.summaries.len(), 11);
    let lst = report.summary("LST").unwrap();
    assert_eq!(lst.unit, "°C");
    assert!(lst.stats.mean > 20.0 && lst.stats.mean < 35.0, "LST mean {}", lst.stats.mean);
    let ndvi = report.summary("NDVI").unwrap();
    assert!(ndvi.stats.min >= -1.0 && ndvi.stats.max <= 1.0);
    let uhi = report.summary("UHI").unwrap();
    assert!(uhi.stats.mean.abs() < 0.5);

    assert_eq!(report.ranked.len(), 3);
    for (i, site) in report.ranked.iter().enumerate() {
        assert_eq!(site.rank, i + 1);
        assert_eq!(site.features.len(), 6);
    }
    // CO is the last sort key and therefore the primary order
    for pair in report.ranked.windows(2) {
        assert!(pair[0].feature("CO").unwrap() >= pair[1].feature("CO").unwrap());
    }

    let series: Vec<(&str, usize)> = report
        .time_series
        .iter()
        .map(|s| (s.name.as_str(), s.points.len()))
        .collect();
    // The population grid carries no acquisition time, so its series is empty
    assert_eq!(
        series,
        vec![("NO2", 2), ("GIMMS_NDVI", 1), ("Population", 0), ("CO", 1), ("LST", 3)]
    );
    let thermal = report.time_series.iter().find(|s| s.name == "LST").unwrap();
    assert!(thermal.points.iter().all(|p| p.value > 15.0 && p.value < 40.0));

    let histogram = report.histogram.as_ref().unwrap();
    assert_eq!(histogram.buckets.len(), 17);
    assert!(histogram.buckets.iter().map(|b| b.count).sum::<usize>() > 0);

    assert_eq!(report.location_labels().len(), 3);
    assert!(report.location_labels()[0].starts_with("Location 1: 28.6"));
}

fn ranked_sites(seed: u64) -> Vec<(f64, f64)> {
    let mut config = test_config();
    config.sampling.seed = seed;
    let source = catalog(&config, false);
    Pipeline::new(config)
        .unwrap()
        .run_seeded(&source)
        .unwrap()
        .ranked
        .iter()
        .map(|site| (site.lon, site.lat))
        .collect()
}

#[test]
fn test_configured_seed_drives_sampling() {
    let first = ranked_sites(42);
    assert_eq!(first.len(), 3);
    assert_eq!(first, ranked_sites(42));
    assert_ne!(first, ranked_sites(43));

    // Same sites as an explicitly built sampler with that seed
    let config = test_config();
    let source = catalog(&config, false);
    let explicit = Pipeline::new(config)
        .unwrap()
        .run(&source, &SeededSampler::new(42))
        .unwrap();
    let explicit: Vec<(f64, f64)> = explicit.ranked.iter().map(|s| (s.lon, s.lat)).collect();
    assert_eq!(first, explicit);
}

#[test]
fn test_summaries_reuse_index_chain_reductions() {
    let config = test_config();
    let source = catalog(&config, false);
    let pipeline = Pipeline::new(config).unwrap();

    let optical = pipeline.optical_collection(&source).unwrap();
    let indices = pipeline.thermal_indices(&optical).unwrap();
    let report = pipeline.run_seeded(&source).unwrap();

    assert_eq!(report.summary("NDVI").unwrap().stats, indices.ndvi_stats);
    assert_eq!(report.summary("LST").unwrap().stats, indices.lst_stats);
}

#[test]
fn test_report_written_as_json() {
    let config = test_config();
    let source = catalog(&config, false);
    let report = Pipeline::new(config)
        .unwrap()
        .run(&source, &SeededSampler::new(7))
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hotspots.json");
    report.write_json(&path).unwrap();

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["ranked"].as_array().unwrap().len(), 3);
    assert_eq!(json["summaries"].as_array().unwrap().len(), 11);
}

#[test]
fn test_fully_clouded_aoi_fails_fast() {
    let config = test_config();
    let source = catalog(&config, true);
    let result = Pipeline::new(config).unwrap().run(&source, &SeededSampler::new(1));

    match result {
        Err(HotspotError::EmptyRegion { raster, .. }) => assert_eq!(raster, "NDVI"),
        other => panic!("expected EmptyRegion for NDVI, got {:?}", other.map(|r| r.ranked.len())),
    }
}

#[test]
fn test_fixed_points_limited_to_aoi() {
    let config = test_config();
    let source = catalog(&config, false);
    // The last point lies outside the AOI and is never scored
    let sampler = FixedPoints::new(vec![(77.11, 28.61), (77.12, 28.62), (77.13, 28.63), (80.0, 20.0)]);
    let report = Pipeline::new(config).unwrap().run(&source, &sampler).unwrap();

    assert_eq!(report.sampled_points, 3);
    assert_eq!(report.ranked.len(), 3);
}

#[test]
fn test_missing_collection_is_reported() {
    let config = test_config();
    let source = InMemoryCatalog::new();
    let result = Pipeline::new(config).unwrap().run(&source, &SeededSampler::new(1));
    assert!(matches!(result, Err(HotspotError::UnknownCollection(_))));
}
