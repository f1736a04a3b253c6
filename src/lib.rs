//! hotspot: satellite-derived heat, vegetation and pollution indicators
//!
//! Turns multi-band optical/thermal imagery and auxiliary raster layers into
//! per-pixel indices (NDVI, vegetation fraction, emissivity, land-surface
//! temperature, UHI, UTFVI), summarizes any raster over a region, and ranks
//! candidate sites inside an area of interest by cascading sort keys.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use crate::types::{
    Band, BoundingBox, CandidatePoint, DateRange, GeoTransform, Geometry, HotspotError, HotspotResult,
    IndicatorRaster, PixelGrid, RasterImage, ValidityMask, ZonalStats,
};
pub use crate::core::{Pipeline, SiteRanker, SortKey, ZonalReducer};
pub use crate::io::{CollectionSource, InMemoryCatalog, PipelineReport, RunConfig, SeededSampler};
