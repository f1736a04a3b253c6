//! Data sources, configuration and reporting

pub mod collection;
pub mod config;
pub mod report;
pub mod sampling;

pub use collection::{
    CollectionSource, InMemoryCatalog, RasterCollection, SeriesPoint, TemporalStatistic, TimeSeries,
};
pub use config::{
    HistogramConfig, LayerConfig, LayerDates, OpticalConfig, RankedIndicator, RankingConfig, RunConfig,
    SamplingConfig,
};
pub use report::{location_label, IndicatorSummary, PipelineReport};
pub use sampling::{FixedPoints, PointSampler, SeededSampler};
