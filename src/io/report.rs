//! Plain-data run report consumed by display layers

use crate::core::zonal::ClassHistogram;
use crate::io::collection::TimeSeries;
use crate::types::{CandidatePoint, DateRange, HotspotResult, ZonalStats};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// AOI-wide statistics of one indicator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSummary {
    pub name: String,
    pub unit: String,
    pub scale_m: f64,
    pub stats: ZonalStats,
}

/// Everything one pipeline run produces
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub date_range: DateRange,
    /// Optical images that went into the composite
    pub optical_images: usize,
    pub summaries: Vec<IndicatorSummary>,
    /// Best sites first, rank 1-based
    pub ranked: Vec<CandidatePoint>,
    pub sampled_points: usize,
    pub excluded_points: usize,
    pub time_series: Vec<TimeSeries>,
    pub histogram: Option<ClassHistogram>,
}

impl PipelineReport {
    pub fn summary(&self, name: &str) -> Option<&IndicatorSummary> {
        self.summaries.iter().find(|s| s.name == name)
    }

    /// `"Location N: lat, lon"` for every ranked site
    pub fn location_labels(&self) -> Vec<String> {
        self.ranked.iter().map(location_label).collect()
    }

    pub fn to_json_string(&self) -> HotspotResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> HotspotResult<()> {
        let path = path.as_ref();
        log::info!("Writing report to {}", path.display());
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

/// Display label of a ranked site
pub fn location_label(point: &CandidatePoint) -> String {
    format!("Location {}: {:.6}, {:.6}", point.rank, point.lat, point.lon)
}
