use hotspot::core::ranking::SortDirection;
use hotspot::io::config::LayerDates;
use hotspot::{HotspotError, RunConfig};
use std::io::Write;

const DELHI_RUN: &str = r#"{
    "aoi": [
        [77.348709, 28.842898],
        [77.348709, 28.412356],
        [76.935635, 28.412356],
        [76.935635, 28.842898]
    ],
    "date_range": { "start": "2022-05-01", "end": "2022-12-31" },
    "sampling": { "count": 70, "seed": 2022, "buffer_m": 1000 },
    "layers": [
        {
            "name": "NO2",
            "unit": "mol/m²",
            "collection": "COPERNICUS/S5P/NRTI/L3_NO2",
            "band": "NO2_column_number_density",
            "scale_m": 1000
        },
        {
            "name": "Population",
            "collection": "CIESIN/GPWv411/GPW_Population_Density",
            "band": "population_density",
            "dates": "unfiltered",
            "scale_m": 1000
        },
        {
            "name": "GIMMS_NDVI",
            "collection": "NASA/GIMMS/3GV0",
            "band": "ndvi",
            "dates": { "fixed": { "start": "2013-06-01", "end": "2013-12-31" } },
            "scale_m": 1000
        }
    ],
    "ranking": {
        "top_k": 10,
        "indicators": [
            { "name": "LST", "layer": "LST", "scale_m": 30 },
            { "name": "NO2", "layer": "NO2", "scale_m": 1000 },
            { "name": "NDVI", "layer": "GIMMS_NDVI", "scale_m": 1000 },
            { "name": "Population", "layer": "Population", "scale_m": 1000 }
        ],
        "sort_keys": [
            { "indicator": "LST", "direction": "desc" },
            { "indicator": "NO2", "direction": "desc" },
            { "indicator": "NDVI", "direction": "asc" },
            { "indicator": "Population", "direction": "desc" }
        ]
    },
    "time_series": ["NO2", "LST"],
    "histogram": null
}"#;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_run_config_from_file() {
    let _ = env_logger::builder().is_test(true).try_init();

    let file = write_config(DELHI_RUN);
    let config = RunConfig::from_json_file(file.path()).unwrap();

    assert_eq!(config.aoi.len(), 4);
    assert_eq!(config.sampling.seed, 2022);
    assert_eq!(config.layers.len(), 3);
    assert_eq!(config.layer("Population").unwrap().dates, LayerDates::Unfiltered);
    assert_eq!(config.layer("NO2").unwrap().dates, LayerDates::Run);
    assert!(matches!(config.layer("GIMMS_NDVI").unwrap().dates, LayerDates::Fixed(_)));
    assert!(config.histogram.is_none());

    let keys = &config.ranking.sort_keys;
    assert_eq!(keys.len(), 4);
    assert_eq!(keys[2].indicator, "NDVI");
    assert_eq!(keys[2].direction, SortDirection::Ascending);
    assert_eq!(keys[3].indicator, "Population");

    // Sections left out fall back to the Landsat 8 defaults
    assert_eq!(config.optical.red_band, "SR_B4");
    assert_eq!(config.optical.qa_tests.len(), 2);
    assert_eq!(config.max_pixels, 1_000_000_000);
}

#[test]
fn test_sort_key_on_unranked_indicator_rejected() {
    let json = DELHI_RUN.replace(
        r#"{ "indicator": "Population", "direction": "desc" }"#,
        r#"{ "indicator": "CO", "direction": "desc" }"#,
    );
    let file = write_config(&json);
    assert!(matches!(
        RunConfig::from_json_file(file.path()),
        Err(HotspotError::InvalidConfig(_))
    ));
}

#[test]
fn test_time_series_on_unknown_layer_rejected() {
    let json = DELHI_RUN.replace(r#"["NO2", "LST"]"#, r#"["SO2"]"#);
    assert!(matches!(RunConfig::from_json_str(&json), Err(HotspotError::InvalidConfig(_))));
}

#[test]
fn test_reversed_dates_rejected() {
    let json = DELHI_RUN.replace(
        r#"{ "start": "2022-05-01", "end": "2022-12-31" }"#,
        r#"{ "start": "2022-12-31", "end": "2022-05-01" }"#,
    );
    assert!(matches!(RunConfig::from_json_str(&json), Err(HotspotError::InvalidConfig(_))));
}

#[test]
fn test_malformed_json_and_missing_file() {
    assert!(matches!(RunConfig::from_json_str("{ \"aoi\": "), Err(HotspotError::Json(_))));

    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.json");
    assert!(matches!(RunConfig::from_json_file(missing), Err(HotspotError::Io(_))));
}
