//! Raster collections and the sources that supply them
//!
//! `CollectionSource` is the seam to whatever data store holds the imagery.
//! `InMemoryCatalog` is the in-process implementation used by tests and by
//! callers that load rasters themselves.

use crate::core::calibrate::compile_band_pattern;
use crate::core::zonal::ZonalReducer;
use crate::types::{
    Band, DateRange, GeoTransform, Geometry, HotspotError, HotspotResult, PixelGrid,
    RasterImage, ValidityMask,
};
use chrono::{DateTime, Utc};
use ndarray::Zip;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-pixel statistic used to collapse a collection into one image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalStatistic {
    Mean,
    Median,
}

impl TemporalStatistic {
    /// Combine the valid observations of one pixel; `None` when there are none
    fn combine(&self, observations: &mut [f64]) -> Option<f64> {
        if observations.is_empty() {
            return None;
        }
        let n = observations.len();
        match self {
            TemporalStatistic::Mean => Some(observations.iter().sum::<f64>() / n as f64),
            TemporalStatistic::Median => {
                observations.sort_by(|a, b| a.total_cmp(b));
                if n % 2 == 1 {
                    Some(observations[n / 2])
                } else {
                    Some((observations[n / 2 - 1] + observations[n / 2]) / 2.0)
                }
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TemporalStatistic::Mean => "mean",
            TemporalStatistic::Median => "median",
        }
    }
}

/// Regional mean of one band for one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub image_id: String,
    pub acquired: DateTime<Utc>,
    pub value: f64,
}

/// Time-stamped regional means of one band across a collection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeries {
    pub name: String,
    pub unit: String,
    pub points: Vec<SeriesPoint>,
}

impl TimeSeries {
    /// Shift every value from Kelvin to degrees Celsius
    pub fn kelvin_to_celsius(mut self) -> Self {
        for point in &mut self.points {
            point.value -= crate::core::indices::KELVIN_OFFSET;
        }
        self.unit = "°C".to_string();
        self
    }
}

/// Ordered sequence of images sharing a nominal band schema
#[derive(Debug, Clone, Default)]
pub struct RasterCollection {
    id: String,
    images: Vec<RasterImage>,
}

impl RasterCollection {
    pub fn new(id: impl Into<String>, images: Vec<RasterImage>) -> Self {
        Self {
            id: id.into(),
            images,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn images(&self) -> &[RasterImage] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    fn with_images(&self, images: Vec<RasterImage>) -> Self {
        Self {
            id: self.id.clone(),
            images,
        }
    }

    /// Images acquired inside `range`; images without a timestamp are dropped
    pub fn filter_date(&self, range: &DateRange) -> Self {
        let images = self
            .images
            .iter()
            .filter(|img| img.acquired().map_or(false, |t| range.contains(&t)))
            .cloned()
            .collect();
        self.with_images(images)
    }

    /// Images whose footprint intersects the bounding box of `geometry`
    pub fn filter_bounds(&self, geometry: &Geometry) -> Self {
        let bounds = geometry.bounds();
        let images = self
            .images
            .iter()
            .filter(|img| img.footprint().map_or(false, |fp| fp.intersects(&bounds)))
            .cloned()
            .collect();
        self.with_images(images)
    }

    /// Keep only bands whose full name matches one of `patterns`
    pub fn select_bands(&self, patterns: &[&str]) -> HotspotResult<Self> {
        let regexes = patterns
            .iter()
            .map(|p| compile_band_pattern(p))
            .collect::<HotspotResult<Vec<_>>>()?;

        Ok(self.map(|img| {
            let bands = img
                .bands()
                .iter()
                .filter(|b| regexes.iter().any(|re| re.is_match(&b.name)))
                .cloned()
                .collect();
            img.derive(bands)
        }))
    }

    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(&RasterImage) -> RasterImage,
    {
        self.with_images(self.images.iter().map(f).collect())
    }

    pub fn try_map<F>(&self, f: F) -> HotspotResult<Self>
    where
        F: Fn(&RasterImage) -> HotspotResult<RasterImage>,
    {
        let images = self.images.iter().map(f).collect::<HotspotResult<Vec<_>>>()?;
        Ok(self.with_images(images))
    }

    /// Per-pixel mean or median over the valid observations of each band
    ///
    /// The output carries the union of band names in first-seen order. A
    /// pixel with no valid observation in any image is invalid.
    pub fn temporal_aggregate(&self, statistic: TemporalStatistic) -> HotspotResult<RasterImage> {
        let (dim, transform) = self.common_grid()?;

        let mut names: Vec<&str> = Vec::new();
        for image in &self.images {
            for name in image.band_names() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }

        log::info!(
            "Temporal {} of {} images ({} bands, {}x{})",
            statistic.label(),
            self.images.len(),
            names.len(),
            dim.0,
            dim.1
        );

        let bands = names
            .iter()
            .map(|name| {
                let sources: Vec<&Band> = self
                    .images
                    .iter()
                    .filter_map(|img| img.band(name).ok())
                    .collect();
                aggregate_band(name, &sources, dim, statistic)
            })
            .collect();

        RasterImage::from_parts(
            format!("{}_{}", self.id, statistic.label()),
            None,
            transform,
            bands,
        )
    }

    /// Grid shared by every image with bands
    fn common_grid(&self) -> HotspotResult<((usize, usize), GeoTransform)> {
        let mut grid: Option<((usize, usize), GeoTransform)> = None;

        for image in &self.images {
            let Some(dim) = image.dim() else { continue };
            match grid {
                None => grid = Some((dim, *image.transform())),
                Some((expected, transform)) => {
                    if dim != expected {
                        return Err(HotspotError::ShapeMismatch {
                            expected,
                            actual: dim,
                        });
                    }
                    if *image.transform() != transform {
                        return Err(HotspotError::Processing(format!(
                            "image {} is not on the grid of collection {}",
                            image.id(),
                            self.id
                        )));
                    }
                }
            }
        }

        grid.ok_or_else(|| HotspotError::EmptyCollection(self.id.clone()))
    }

    /// Regional mean of `band` for every image, in acquisition order
    ///
    /// Images with no valid pixels in `region` are skipped. Images without
    /// an acquisition time cannot be placed on the time axis and are skipped
    /// as well.
    pub fn series_by_region(
        &self,
        name: &str,
        band: &str,
        region: &Geometry,
        scale_m: f64,
        reducer: &ZonalReducer,
    ) -> HotspotResult<TimeSeries> {
        let mut points = Vec::with_capacity(self.images.len());

        for image in &self.images {
            let Some(acquired) = image.acquired() else {
                log::warn!("Skipping image {} in series {}: no acquisition time", image.id(), name);
                continue;
            };
            let source = image.band(band)?;
            match reducer.summarize_band(source, image.transform(), region, scale_m) {
                Ok(stats) => points.push(SeriesPoint {
                    image_id: image.id().to_string(),
                    acquired,
                    value: stats.mean,
                }),
                Err(HotspotError::EmptyRegion { .. }) => {
                    log::warn!("Skipping image {} in series {}: no valid pixels", image.id(), name);
                }
                Err(e) => return Err(e),
            }
        }

        points.sort_by_key(|p| p.acquired);
        log::debug!("Series {}: {} of {} images", name, points.len(), self.images.len());

        Ok(TimeSeries {
            name: name.to_string(),
            unit: String::new(),
            points,
        })
    }
}

fn aggregate_band(
    name: &str,
    sources: &[&Band],
    dim: (usize, usize),
    statistic: TemporalStatistic,
) -> Band {
    let mut values = PixelGrid::from_elem(dim, f64::NAN);
    let mut mask = ValidityMask::from_elem(dim, false);

    let combine = |(row, col): (usize, usize), value: &mut f64, valid: &mut bool| {
        let mut observations: Vec<f64> = sources.iter().filter_map(|b| b.get(row, col)).collect();
        if let Some(combined) = statistic.combine(&mut observations) {
            *value = combined;
            *valid = true;
        }
    };

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut values).and(&mut mask).par_for_each(combine);

    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut values).and(&mut mask).for_each(combine);

    Band {
        name: name.to_string(),
        values,
        mask,
    }
}

/// Supplier of named raster collections
pub trait CollectionSource {
    /// Images of `collection_id`, optionally restricted to a date range and
    /// to images intersecting `bounds`
    fn fetch(
        &self,
        collection_id: &str,
        date_range: Option<&DateRange>,
        bounds: Option<&Geometry>,
    ) -> HotspotResult<RasterCollection>;
}

/// Collections held in memory, keyed by collection id
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    collections: HashMap<String, Vec<RasterImage>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection_id: impl Into<String>, image: RasterImage) {
        self.collections
            .entry(collection_id.into())
            .or_default()
            .push(image);
    }

    pub fn with_image(mut self, collection_id: impl Into<String>, image: RasterImage) -> Self {
        self.insert(collection_id, image);
        self
    }

    pub fn collection_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.collections.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl CollectionSource for InMemoryCatalog {
    fn fetch(
        &self,
        collection_id: &str,
        date_range: Option<&DateRange>,
        bounds: Option<&Geometry>,
    ) -> HotspotResult<RasterCollection> {
        let images = self
            .collections
            .get(collection_id)
            .ok_or_else(|| HotspotError::UnknownCollection(collection_id.to_string()))?;

        let mut collection = RasterCollection::new(collection_id, images.clone());
        if let Some(range) = date_range {
            collection = collection.filter_date(range);
        }
        if let Some(geometry) = bounds {
            collection = collection.filter_bounds(geometry);
        }

        log::debug!(
            "Fetched {} of {} images from {}",
            collection.len(),
            images.len(),
            collection_id
        );
        Ok(collection)
    }
}
