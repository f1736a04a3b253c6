//! Run configuration loaded once per pipeline run

use crate::core::calibrate::{compile_band_pattern, BandCorrection};
use crate::core::indices::{ThermalIndexParams, EM, FV, LST, NDVI, UHI, UTFVI};
use crate::core::quality_mask::{BitTest, QA_CLOUD_BIT, QA_CLOUD_SHADOW_BIT};
use crate::core::ranking::SortKey;
use crate::core::zonal::DEFAULT_MAX_PIXELS;
use crate::io::collection::TemporalStatistic;
use crate::types::{DateRange, Geometry, HotspotError, HotspotResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Reserved time-series name for the optical thermal band in degrees Celsius
pub const THERMAL_SERIES: &str = LST;

/// Indicator names produced by the index chain
pub const DERIVED_INDICATORS: [&str; 6] = [NDVI, FV, EM, LST, UHI, UTFVI];

/// Optical/thermal imagery feeding the index chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpticalConfig {
    pub collection: String,
    pub red_band: String,
    pub nir_band: String,
    pub thermal_band: String,
    pub qa_band: String,
    pub corrections: Vec<BandCorrection>,
    pub qa_tests: Vec<BitTest>,
    pub composite: TemporalStatistic,
    pub scale_m: f64,
}

impl Default for OpticalConfig {
    fn default() -> Self {
        Self {
            collection: "LANDSAT/LC08/C02/T1_L2".to_string(),
            red_band: "SR_B4".to_string(),
            nir_band: "SR_B5".to_string(),
            thermal_band: "ST_B10".to_string(),
            qa_band: "QA_PIXEL".to_string(),
            corrections: vec![
                BandCorrection::landsat_c2_reflectance(),
                BandCorrection::landsat_c2_temperature(),
            ],
            qa_tests: vec![
                BitTest::cleared(QA_CLOUD_SHADOW_BIT),
                BitTest::cleared(QA_CLOUD_BIT),
            ],
            composite: TemporalStatistic::Median,
            scale_m: 30.0,
        }
    }
}

impl OpticalConfig {
    pub fn index_params(&self) -> ThermalIndexParams {
        ThermalIndexParams {
            nir_band: self.nir_band.clone(),
            red_band: self.red_band.clone(),
            thermal_band: self.thermal_band.clone(),
            scale_m: self.scale_m,
        }
    }
}

/// Date filter applied when fetching an auxiliary layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerDates {
    /// The run's date range
    Run,
    /// No date filter (static products)
    Unfiltered,
    Fixed(DateRange),
}

impl Default for LayerDates {
    fn default() -> Self {
        LayerDates::Run
    }
}

/// Auxiliary raster layer fetched and aggregated directly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    #[serde(default)]
    pub unit: String,
    pub collection: String,
    pub band: String,
    #[serde(default = "default_aggregate")]
    pub aggregate: TemporalStatistic,
    #[serde(default)]
    pub dates: LayerDates,
    pub scale_m: f64,
}

fn default_aggregate() -> TemporalStatistic {
    TemporalStatistic::Mean
}

impl LayerConfig {
    fn new(
        name: &str,
        unit: &str,
        collection: &str,
        band: &str,
        aggregate: TemporalStatistic,
        dates: LayerDates,
        scale_m: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            collection: collection.to_string(),
            band: band.to_string(),
            aggregate,
            dates,
            scale_m,
        }
    }

    /// Date range to fetch with, given the run's range
    pub fn effective_dates<'a>(&'a self, run: &'a DateRange) -> Option<&'a DateRange> {
        match &self.dates {
            LayerDates::Run => Some(run),
            LayerDates::Unfiltered => None,
            LayerDates::Fixed(range) => Some(range),
        }
    }
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

fn default_layers() -> Vec<LayerConfig> {
    use TemporalStatistic::{Mean, Median};
    vec![
        LayerConfig::new(
            "NO2",
            "mol/m²",
            "COPERNICUS/S5P/NRTI/L3_NO2",
            "NO2_column_number_density",
            Mean,
            LayerDates::Run,
            1000.0,
        ),
        LayerConfig::new(
            "CO",
            "mol/m²",
            "COPERNICUS/S5P/OFFL/L3_CO",
            "CO_column_number_density",
            Mean,
            LayerDates::Run,
            1113.2,
        ),
        LayerConfig::new(
            "GIMMS_NDVI",
            "unitless",
            "NASA/GIMMS/3GV0",
            "ndvi",
            Mean,
            LayerDates::Fixed(DateRange::new(date(2013, 6, 1), date(2013, 12, 31))),
            1000.0,
        ),
        LayerConfig::new(
            "Population",
            "persons/km²",
            "CIESIN/GPWv411/GPW_Population_Density",
            "population_density",
            Mean,
            LayerDates::Unfiltered,
            1000.0,
        ),
        LayerConfig::new(
            "Urbanization",
            "LCZ class",
            "RUB/RUBCLIM/LCZ/global_lcz_map/latest",
            "LCZ_Filter",
            Median,
            LayerDates::Unfiltered,
            1000.0,
        ),
    ]
}

/// Candidate site sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub count: usize,
    pub seed: u64,
    pub buffer_m: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            count: 70,
            seed: 0,
            buffer_m: 1000.0,
        }
    }
}

/// Indicator scored at each site: a feature name bound to a layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedIndicator {
    pub name: String,
    /// Derived index (NDVI, FV, EM, LST, UHI, UTFVI) or auxiliary layer name
    pub layer: String,
    pub scale_m: f64,
}

impl RankedIndicator {
    fn new(name: &str, layer: &str, scale_m: f64) -> Self {
        Self {
            name: name.to_string(),
            layer: layer.to_string(),
            scale_m,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub top_k: usize,
    pub indicators: Vec<RankedIndicator>,
    /// Applied left to right; the last key is the primary order
    pub sort_keys: Vec<SortKey>,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            indicators: vec![
                RankedIndicator::new("LST", LST, 30.0),
                RankedIndicator::new("NO2", "NO2", 1000.0),
                RankedIndicator::new("NDVI", "GIMMS_NDVI", 1000.0),
                RankedIndicator::new("Population", "Population", 1000.0),
                RankedIndicator::new("Urbanization", "Urbanization", 1000.0),
                RankedIndicator::new("CO", "CO", 1113.2),
            ],
            sort_keys: vec![
                SortKey::desc("LST"),
                SortKey::desc("NO2"),
                SortKey::asc("NDVI"),
                SortKey::desc("Population"),
                SortKey::desc("Urbanization"),
                SortKey::desc("CO"),
            ],
        }
    }
}

/// Class frequency table of a categorical layer over the AOI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramConfig {
    pub layer: String,
    pub scale_m: f64,
    pub min_class: i64,
    pub max_class: i64,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            layer: "Urbanization".to_string(),
            scale_m: 40.0,
            min_class: 1,
            max_class: 17,
        }
    }
}

fn default_aoi() -> Vec<[f64; 2]> {
    vec![
        [77.348709, 28.842898],
        [77.348709, 28.412356],
        [76.935635, 28.412356],
        [76.935635, 28.842898],
    ]
}

fn default_date_range() -> DateRange {
    DateRange::new(date(2022, 5, 1), date(2022, 12, 31))
}

fn default_max_pixels() -> usize {
    DEFAULT_MAX_PIXELS
}

fn default_time_series() -> Vec<String> {
    ["NO2", "GIMMS_NDVI", "Population", "CO", THERMAL_SERIES]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_histogram() -> Option<HistogramConfig> {
    Some(HistogramConfig::default())
}

/// Complete description of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// AOI ring as `[lon, lat]` vertices
    #[serde(default = "default_aoi")]
    pub aoi: Vec<[f64; 2]>,
    /// Start inclusive, end exclusive
    #[serde(default = "default_date_range")]
    pub date_range: DateRange,
    #[serde(default)]
    pub optical: OpticalConfig,
    #[serde(default = "default_layers")]
    pub layers: Vec<LayerConfig>,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default = "default_max_pixels")]
    pub max_pixels: usize,
    /// Layers (or the thermal band, as `LST`) tracked image by image
    #[serde(default = "default_time_series")]
    pub time_series: Vec<String>,
    #[serde(default = "default_histogram")]
    pub histogram: Option<HistogramConfig>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            aoi: default_aoi(),
            date_range: default_date_range(),
            optical: OpticalConfig::default(),
            layers: default_layers(),
            sampling: SamplingConfig::default(),
            ranking: RankingConfig::default(),
            max_pixels: default_max_pixels(),
            time_series: default_time_series(),
            histogram: default_histogram(),
        }
    }
}

fn invalid(msg: impl Into<String>) -> HotspotError {
    HotspotError::InvalidConfig(msg.into())
}

fn check_scale(what: &str, scale_m: f64) -> HotspotResult<()> {
    if scale_m > 0.0 && scale_m.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("{} scale must be positive, got {}", what, scale_m)))
    }
}

impl RunConfig {
    pub fn from_json_str(json: &str) -> HotspotResult<Self> {
        let config: RunConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> HotspotResult<Self> {
        log::info!("Loading run configuration from {}", path.as_ref().display());
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> HotspotResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn aoi_geometry(&self) -> HotspotResult<Geometry> {
        Geometry::polygon(&self.aoi)
    }

    pub fn layer(&self, name: &str) -> Option<&LayerConfig> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Names usable as indicator sources: derived indices then auxiliary layers
    pub fn indicator_names(&self) -> Vec<&str> {
        let mut names = DERIVED_INDICATORS.to_vec();
        names.extend(self.layers.iter().map(|l| l.name.as_str()));
        names
    }

    pub fn validate(&self) -> HotspotResult<()> {
        if self.aoi.len() < 3 {
            return Err(invalid(format!("AOI needs at least 3 vertices, got {}", self.aoi.len())));
        }
        if self.aoi.iter().flatten().any(|c| !c.is_finite()) {
            return Err(invalid("AOI vertices must be finite"));
        }
        if self.date_range.start >= self.date_range.end {
            return Err(invalid(format!(
                "date range start {} must be before end {}",
                self.date_range.start, self.date_range.end
            )));
        }
        if self.max_pixels == 0 {
            return Err(invalid("max_pixels must be at least 1"));
        }

        for correction in &self.optical.corrections {
            compile_band_pattern(&correction.pattern)?;
        }
        for test in &self.optical.qa_tests {
            if test.bit >= 64 || test.value > 1 {
                return Err(invalid(format!("invalid QA bit test {:?}", test)));
            }
        }
        check_scale("optical", self.optical.scale_m)?;

        let builtin = self.indicator_names();
        let mut seen = HashSet::new();
        for layer in &self.layers {
            check_scale(&format!("layer {}", layer.name), layer.scale_m)?;
            if !seen.insert(layer.name.as_str()) || DERIVED_INDICATORS.contains(&layer.name.as_str()) {
                return Err(invalid(format!("duplicate or reserved layer name '{}'", layer.name)));
            }
            if let LayerDates::Fixed(range) = &layer.dates {
                if range.start >= range.end {
                    return Err(invalid(format!("layer {} has an empty date range", layer.name)));
                }
            }
        }

        if !(self.sampling.buffer_m > 0.0) {
            return Err(invalid(format!(
                "sample buffer must be positive, got {}",
                self.sampling.buffer_m
            )));
        }

        let ranking = &self.ranking;
        if ranking.top_k == 0 {
            return Err(invalid("top_k must be at least 1"));
        }
        for indicator in &ranking.indicators {
            check_scale(&format!("indicator {}", indicator.name), indicator.scale_m)?;
            if !builtin.contains(&indicator.layer.as_str()) {
                return Err(invalid(format!(
                    "indicator {} refers to unknown layer '{}'",
                    indicator.name, indicator.layer
                )));
            }
        }
        for key in &ranking.sort_keys {
            if !ranking.indicators.iter().any(|i| i.name == key.indicator) {
                return Err(invalid(format!(
                    "sort key '{}' is not a ranked indicator",
                    key.indicator
                )));
            }
        }

        for series in &self.time_series {
            if series != THERMAL_SERIES && self.layer(series).is_none() {
                return Err(invalid(format!("time series '{}' names no layer", series)));
            }
        }

        if let Some(histogram) = &self.histogram {
            check_scale("histogram", histogram.scale_m)?;
            if histogram.min_class > histogram.max_class {
                return Err(invalid("histogram min_class exceeds max_class"));
            }
            if !builtin.contains(&histogram.layer.as_str()) {
                return Err(invalid(format!("histogram layer '{}' is unknown", histogram.layer)));
            }
        }

        Ok(())
    }
}
