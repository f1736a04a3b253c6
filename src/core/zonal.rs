//! Zonal statistics of a raster restricted to a geometry
//!
//! The raster is sampled on a regular grid at the requested nominal scale.
//! The grid is anchored on the geometry's anchor point (the centre of a
//! buffered point, the bounding-box centre of a polygon) and each sample
//! reads the raster cell containing it. Invalid cells and samples outside
//! the raster footprint are excluded from every aggregate.

use crate::types::{
    meters_to_degrees, Band, GeoTransform, Geometry, HotspotError, HotspotResult,
    IndicatorRaster, ZonalStats,
};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Default sample budget per reduction
pub const DEFAULT_MAX_PIXELS: usize = 1_000_000_000;

/// Scalar statistic selectable from a reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZonalStatistic {
    Mean,
    StdDev,
    Min,
    Max,
}

impl ZonalStatistic {
    pub fn select(&self, stats: &ZonalStats) -> f64 {
        match self {
            ZonalStatistic::Mean => stats.mean,
            ZonalStatistic::StdDev => stats.std_dev,
            ZonalStatistic::Min => stats.min,
            ZonalStatistic::Max => stats.max,
        }
    }
}

/// Frequency of one integer class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistogramBucket {
    pub class: i64,
    pub count: usize,
}

/// Class frequencies of a categorical raster over a region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassHistogram {
    pub layer: String,
    pub buckets: Vec<HistogramBucket>,
}

/// Deterministic sampling grid over a geometry
#[derive(Debug, Clone)]
struct SampleGrid {
    anchor: (f64, f64),
    step_lon: f64,
    step_lat: f64,
    /// Strided half-extents in grid steps
    half_cols: i64,
    half_rows: i64,
    stride: i64,
}

impl SampleGrid {
    fn new(geometry: &Geometry, scale_m: f64, max_pixels: usize) -> HotspotResult<Self> {
        if !(scale_m > 0.0) {
            return Err(HotspotError::InvalidConfig(format!(
                "reduction scale must be positive, got {}",
                scale_m
            )));
        }

        let anchor = geometry.anchor();
        let bounds = geometry.bounds();
        let (step_lon, step_lat) = meters_to_degrees(scale_m, anchor.1);

        let reach_lon = (bounds.max_lon - anchor.0).max(anchor.0 - bounds.min_lon);
        let reach_lat = (bounds.max_lat - anchor.1).max(anchor.1 - bounds.min_lat);
        let full_cols = (reach_lon / step_lon).ceil();
        let full_rows = (reach_lat / step_lat).ceil();

        if !full_cols.is_finite() || !full_rows.is_finite() || full_cols < 0.0 || full_rows < 0.0 {
            return Err(HotspotError::Processing(format!(
                "cannot build sampling grid for {}",
                geometry.describe()
            )));
        }
        let (full_cols, full_rows) = (full_cols as i64, full_rows as i64);

        let stride = Self::stride_for(full_cols, full_rows, max_pixels as u128);
        if stride > 1 {
            log::debug!(
                "Sampling grid of {} exceeds {} samples, using stride {}",
                geometry.describe(),
                max_pixels,
                stride
            );
        }

        Ok(Self {
            anchor,
            step_lon,
            step_lat,
            half_cols: full_cols / stride,
            half_rows: full_rows / stride,
            stride,
        })
    }

    fn count(half_cols: i64, half_rows: i64) -> u128 {
        (2 * half_cols as u128 + 1) * (2 * half_rows as u128 + 1)
    }

    /// Smallest stride whose symmetric grid fits in `max_pixels`
    fn stride_for(full_cols: i64, full_rows: i64, max_pixels: u128) -> i64 {
        if Self::count(full_cols, full_rows) <= max_pixels {
            return 1;
        }

        // count() is non-increasing in the stride and a stride past both
        // half-extents leaves only the anchor sample
        let (mut lo, mut hi) = (1i64, full_cols.max(full_rows) + 1);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if Self::count(full_cols / mid, full_rows / mid) <= max_pixels {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo
    }

    fn sample_count(&self) -> u128 {
        Self::count(self.half_cols, self.half_rows)
    }

    /// Sample locations of one grid row, west to east
    fn row(&self, row_offset: i64) -> impl Iterator<Item = (f64, f64)> + '_ {
        let lat = self.anchor.1 - (row_offset * self.stride) as f64 * self.step_lat;
        (-self.half_cols..=self.half_cols)
            .map(move |c| (self.anchor.0 + (c * self.stride) as f64 * self.step_lon, lat))
    }

    /// Row offsets, north to south
    fn row_offsets(&self) -> RangeInclusive<i64> {
        -self.half_rows..=self.half_rows
    }
}

/// Zonal statistics reducer with a fixed sample budget
#[derive(Debug, Clone, Copy)]
pub struct ZonalReducer {
    max_pixels: usize,
}

impl Default for ZonalReducer {
    fn default() -> Self {
        Self {
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

impl ZonalReducer {
    pub fn new(max_pixels: usize) -> HotspotResult<Self> {
        if max_pixels == 0 {
            return Err(HotspotError::InvalidConfig(
                "max_pixels must be at least 1".to_string(),
            ));
        }
        Ok(Self { max_pixels })
    }

    pub fn max_pixels(&self) -> usize {
        self.max_pixels
    }

    /// Valid sample values of a band inside `geometry`, in grid order
    pub fn collect_samples(
        &self,
        band: &Band,
        transform: &GeoTransform,
        geometry: &Geometry,
        scale_m: f64,
    ) -> HotspotResult<Vec<f64>> {
        let grid = SampleGrid::new(geometry, scale_m, self.max_pixels)?;
        let dims = band.dim();
        log::trace!(
            "Sampling {} at {}m: up to {} samples",
            band.name,
            scale_m,
            grid.sample_count()
        );

        let sample_row = |row_offset: i64| -> Vec<f64> {
            grid.row(row_offset)
                .filter(|&(lon, lat)| geometry.contains(lon, lat))
                .filter_map(|(lon, lat)| transform.pixel_at(lon, lat, dims))
                .filter_map(|(row, col)| band.get(row, col))
                .collect()
        };

        #[cfg(feature = "parallel")]
        let rows: Vec<Vec<f64>> = {
            use rayon::prelude::*;
            let offsets: Vec<i64> = grid.row_offsets().collect();
            offsets.into_par_iter().map(sample_row).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let rows: Vec<Vec<f64>> = grid.row_offsets().map(sample_row).collect();

        Ok(rows.into_iter().flatten().collect())
    }

    /// Mean, standard deviation, min and max of a band over a geometry
    pub fn summarize_band(
        &self,
        band: &Band,
        transform: &GeoTransform,
        geometry: &Geometry,
        scale_m: f64,
    ) -> HotspotResult<ZonalStats> {
        let samples = self.collect_samples(band, transform, geometry, scale_m)?;
        summarize_samples(&samples).ok_or_else(|| HotspotError::EmptyRegion {
            raster: band.name.clone(),
            geometry: geometry.describe(),
        })
    }

    pub fn summarize(
        &self,
        raster: &IndicatorRaster,
        geometry: &Geometry,
        scale_m: f64,
    ) -> HotspotResult<ZonalStats> {
        self.summarize_band(raster.band(), raster.transform(), geometry, scale_m)
    }

    /// Single statistic of an indicator over a geometry
    pub fn reduce(
        &self,
        raster: &IndicatorRaster,
        geometry: &Geometry,
        statistic: ZonalStatistic,
        scale_m: f64,
    ) -> HotspotResult<f64> {
        let stats = self.summarize(raster, geometry, scale_m)?;
        Ok(statistic.select(&stats))
    }

    /// Frequency of each integer class in `classes` over a geometry
    ///
    /// Values are rounded to the nearest integer; values outside the class
    /// range are ignored.
    pub fn histogram(
        &self,
        raster: &IndicatorRaster,
        geometry: &Geometry,
        scale_m: f64,
        classes: RangeInclusive<i64>,
    ) -> HotspotResult<ClassHistogram> {
        let samples = self.collect_samples(raster.band(), raster.transform(), geometry, scale_m)?;

        let mut buckets: Vec<HistogramBucket> = classes
            .clone()
            .map(|class| HistogramBucket { class, count: 0 })
            .collect();
        let mut counted = 0usize;

        for value in samples {
            let class = value.round();
            if class < *classes.start() as f64 || class > *classes.end() as f64 {
                continue;
            }
            let idx = (class as i64 - classes.start()) as usize;
            buckets[idx].count += 1;
            counted += 1;
        }

        if counted == 0 {
            return Err(HotspotError::EmptyRegion {
                raster: raster.name().to_string(),
                geometry: geometry.describe(),
            });
        }

        Ok(ClassHistogram {
            layer: raster.name().to_string(),
            buckets,
        })
    }
}

/// Population statistics of a sample set; `None` when empty
pub fn summarize_samples(samples: &[f64]) -> Option<ZonalStats> {
    if samples.is_empty() {
        return None;
    }

    let count = samples.len();
    let mean = samples.iter().sum::<f64>() / count as f64;
    let variance = samples.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / count as f64;
    let (min, max) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    Some(ZonalStats {
        mean,
        std_dev: variance.sqrt(),
        min,
        max,
        count,
    })
}

/// One-shot reduction with an explicit sample budget
pub fn reduce_region(
    raster: &IndicatorRaster,
    geometry: &Geometry,
    statistic: ZonalStatistic,
    scale_m: f64,
    max_pixels: usize,
) -> HotspotResult<f64> {
    ZonalReducer::new(max_pixels)?.reduce(raster, geometry, statistic, scale_m)
}
