//! Core raster processing and ranking modules

pub mod calibrate;
pub mod indices;
pub mod pipeline;
pub mod quality_mask;
pub mod ranking;
pub mod zonal;

// Re-export main types
pub use calibrate::{BandCorrection, RadiometricCorrector};
pub use indices::{IndexProcessor, ThermalIndexParams, ThermalIndices};
pub use pipeline::{LoadedLayer, Pipeline};
pub use quality_mask::{BitTest, QualityMasker};
pub use ranking::{
    cascade_sort, rank_candidates, IndicatorSpec, RankingOutcome, SiteRanker, SortDirection, SortKey,
};
pub use zonal::{
    reduce_region, summarize_samples, ClassHistogram, HistogramBucket, ZonalReducer, ZonalStatistic,
};
