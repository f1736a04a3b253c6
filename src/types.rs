use chrono::{DateTime, NaiveDate, Utc};
use geo::{BoundingRect, Contains};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Real-valued pixel grid (rows x cols), physical units after correction
pub type PixelGrid = Array2<f64>;

/// Per-pixel validity flags, `true` = usable observation
pub type ValidityMask = Array2<bool>;

/// Meters per degree of latitude (equirectangular approximation)
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Convert a distance in meters to (longitude, latitude) degree spans at `lat`
pub fn meters_to_degrees(meters: f64, lat: f64) -> (f64, f64) {
    let meters_per_degree_lon = METERS_PER_DEGREE * lat.to_radians().cos();
    (meters / meters_per_degree_lon, meters / METERS_PER_DEGREE)
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lon + self.max_lon) / 2.0,
            (self.min_lat + self.max_lat) / 2.0,
        )
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
            && self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
    }
}

/// Geospatial transformation parameters
///
/// Maps pixel (col, row) to geographic (lon, lat):
/// ```text
/// lon = top_left_x + col * pixel_width + row * rotation_x
/// lat = top_left_y + col * rotation_y + row * pixel_height
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform; `pixel_height` is given positive and stored negative
    pub fn north_up(top_left_lon: f64, top_left_lat: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x: top_left_lon,
            pixel_width,
            rotation_x: 0.0,
            top_left_y: top_left_lat,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    /// Geographic coordinates of a pixel center
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let col_f = col as f64 + 0.5;
        let row_f = row as f64 + 0.5;
        (
            self.top_left_x + col_f * self.pixel_width + row_f * self.rotation_x,
            self.top_left_y + col_f * self.rotation_y + row_f * self.pixel_height,
        )
    }

    /// Pixel containing the given coordinate, if it falls inside a `dims` grid
    pub fn pixel_at(&self, lon: f64, lat: f64, dims: (usize, usize)) -> Option<(usize, usize)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det.abs() < 1e-18 {
            return None;
        }

        let dx = lon - self.top_left_x;
        let dy = lat - self.top_left_y;
        let col = (self.pixel_height * dx - self.rotation_x * dy) / det;
        let row = (-self.rotation_y * dx + self.pixel_width * dy) / det;

        if !col.is_finite() || !row.is_finite() || col < 0.0 || row < 0.0 {
            return None;
        }

        let (row, col) = (row.floor() as usize, col.floor() as usize);
        if row < dims.0 && col < dims.1 {
            Some((row, col))
        } else {
            None
        }
    }

    /// Bounding box covered by a `dims` grid
    pub fn footprint(&self, dims: (usize, usize)) -> BoundingBox {
        let (rows, cols) = (dims.0 as f64, dims.1 as f64);
        let corners = [
            (self.top_left_x, self.top_left_y),
            (
                self.top_left_x + cols * self.pixel_width,
                self.top_left_y + cols * self.rotation_y,
            ),
            (
                self.top_left_x + rows * self.rotation_x,
                self.top_left_y + rows * self.pixel_height,
            ),
            (
                self.top_left_x + cols * self.pixel_width + rows * self.rotation_x,
                self.top_left_y + cols * self.rotation_y + rows * self.pixel_height,
            ),
        ];

        corners.iter().fold(
            BoundingBox {
                min_lon: f64::INFINITY,
                max_lon: f64::NEG_INFINITY,
                min_lat: f64::INFINITY,
                max_lat: f64::NEG_INFINITY,
            },
            |bbox, &(lon, lat)| BoundingBox {
                min_lon: bbox.min_lon.min(lon),
                max_lon: bbox.max_lon.max(lon),
                min_lat: bbox.min_lat.min(lat),
                max_lat: bbox.max_lat.max(lat),
            },
        )
    }
}

/// A single named band with its validity mask
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub name: String,
    pub values: PixelGrid,
    pub mask: ValidityMask,
}

impl Band {
    /// Band whose mask flags every finite value as valid
    pub fn new(name: impl Into<String>, values: PixelGrid) -> Self {
        let mask = values.mapv(f64::is_finite);
        Self {
            name: name.into(),
            values,
            mask,
        }
    }

    /// Band with an explicit mask; non-finite values are never valid
    pub fn with_mask(name: impl Into<String>, values: PixelGrid, mut mask: ValidityMask) -> HotspotResult<Self> {
        if values.dim() != mask.dim() {
            return Err(HotspotError::ShapeMismatch {
                expected: values.dim(),
                actual: mask.dim(),
            });
        }
        Zip::from(&mut mask)
            .and(&values)
            .for_each(|valid, value| *valid &= value.is_finite());
        Ok(Self {
            name: name.into(),
            values,
            mask,
        })
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// Value at (row, col) if the pixel is valid and finite
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        match self.mask.get((row, col)) {
            Some(true) => self.values.get((row, col)).copied().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|&&valid| valid).count()
    }

    pub fn renamed(&self, name: impl Into<String>) -> Band {
        Band {
            name: name.into(),
            values: self.values.clone(),
            mask: self.mask.clone(),
        }
    }
}

/// Multi-band raster sharing one grid footprint
///
/// Immutable once built; every processing stage returns a new image.
#[derive(Debug, Clone)]
pub struct RasterImage {
    id: String,
    acquired: Option<DateTime<Utc>>,
    transform: GeoTransform,
    bands: Vec<Band>,
}

impl RasterImage {
    pub fn new(id: impl Into<String>, transform: GeoTransform) -> Self {
        Self {
            id: id.into(),
            acquired: None,
            transform,
            bands: Vec::new(),
        }
    }

    /// Assemble an image from parts, checking that all bands share one grid
    pub fn from_parts(
        id: impl Into<String>,
        acquired: Option<DateTime<Utc>>,
        transform: GeoTransform,
        bands: Vec<Band>,
    ) -> HotspotResult<Self> {
        let mut image = Self {
            id: id.into(),
            acquired,
            transform,
            bands: Vec::with_capacity(bands.len()),
        };
        for band in bands {
            image = image.with_band(band)?;
        }
        Ok(image)
    }

    /// Same id, timestamp and grid carrying a new set of same-shaped bands
    pub(crate) fn derive(&self, bands: Vec<Band>) -> RasterImage {
        debug_assert!(bands.iter().all(|b| Some(b.dim()) == self.dim()));
        RasterImage {
            id: self.id.clone(),
            acquired: self.acquired,
            transform: self.transform,
            bands,
        }
    }

    pub fn with_acquired(mut self, acquired: DateTime<Utc>) -> Self {
        self.acquired = Some(acquired);
        self
    }

    /// Add a band, replacing any existing band of the same name
    pub fn with_band(mut self, band: Band) -> HotspotResult<Self> {
        if let Some(dim) = self.dim() {
            if band.dim() != dim {
                return Err(HotspotError::ShapeMismatch {
                    expected: dim,
                    actual: band.dim(),
                });
            }
        }

        match self.bands.iter_mut().find(|b| b.name == band.name) {
            Some(existing) => *existing = band,
            None => self.bands.push(band),
        }
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn acquired(&self) -> Option<DateTime<Utc>> {
        self.acquired
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn has_band(&self, name: &str) -> bool {
        self.bands.iter().any(|b| b.name == name)
    }

    pub fn band(&self, name: &str) -> HotspotResult<&Band> {
        self.bands
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| HotspotError::MissingBand {
                band: name.to_string(),
                image: self.id.clone(),
            })
    }

    /// Grid dimensions (rows, cols); `None` for an image without bands
    pub fn dim(&self) -> Option<(usize, usize)> {
        self.bands.first().map(Band::dim)
    }

    pub fn footprint(&self) -> Option<BoundingBox> {
        self.dim().map(|dim| self.transform.footprint(dim))
    }
}

/// Single-band raster tagged with the indicator it represents
#[derive(Debug, Clone)]
pub struct IndicatorRaster {
    name: String,
    unit: String,
    image: RasterImage,
}

impl IndicatorRaster {
    pub fn new(
        name: impl Into<String>,
        unit: impl Into<String>,
        transform: GeoTransform,
        values: PixelGrid,
        mask: ValidityMask,
    ) -> HotspotResult<Self> {
        let name = name.into();
        let band = Band::with_mask(name.clone(), values, mask)?;
        let image = RasterImage::new(name.clone(), transform).with_band(band)?;
        Ok(Self {
            name,
            unit: unit.into(),
            image,
        })
    }

    /// Wrap one band of an existing image as an indicator
    pub fn from_image_band(
        image: &RasterImage,
        band_name: &str,
        name: impl Into<String>,
        unit: impl Into<String>,
    ) -> HotspotResult<Self> {
        let name = name.into();
        let band = image.band(band_name)?.renamed(name.clone());
        let image = RasterImage::new(name.clone(), *image.transform())
            .with_band(band)?;
        Ok(Self {
            name,
            unit: unit.into(),
            image,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn image(&self) -> &RasterImage {
        &self.image
    }

    pub fn transform(&self) -> &GeoTransform {
        self.image.transform()
    }

    pub fn band(&self) -> &Band {
        // Constructors always insert exactly one band
        &self.image.bands()[0]
    }
}

/// Region used as a read-only aggregation or filter argument
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point { lon: f64, lat: f64 },
    /// Point buffered by a radius in meters
    Circle { lon: f64, lat: f64, radius_m: f64 },
    Polygon(geo::Polygon<f64>),
}

impl Geometry {
    pub fn point(lon: f64, lat: f64) -> Self {
        Geometry::Point { lon, lat }
    }

    /// Polygon from a ring of `[lon, lat]` vertices (closing vertex optional)
    pub fn polygon(vertices: &[[f64; 2]]) -> HotspotResult<Self> {
        if vertices.len() < 3 {
            return Err(HotspotError::InvalidConfig(format!(
                "polygon needs at least 3 vertices, got {}",
                vertices.len()
            )));
        }
        let ring: Vec<(f64, f64)> = vertices.iter().map(|v| (v[0], v[1])).collect();
        Ok(Geometry::Polygon(geo::Polygon::new(
            geo::LineString::from(ring),
            vec![],
        )))
    }

    /// Buffer a point by `radius_m` meters
    pub fn buffer(&self, radius_m: f64) -> HotspotResult<Self> {
        if !(radius_m > 0.0) {
            return Err(HotspotError::InvalidConfig(format!(
                "buffer radius must be positive, got {}",
                radius_m
            )));
        }
        match *self {
            Geometry::Point { lon, lat } | Geometry::Circle { lon, lat, .. } => {
                Ok(Geometry::Circle { lon, lat, radius_m })
            }
            Geometry::Polygon(_) => Err(HotspotError::Processing(
                "buffering is only supported for point geometries".to_string(),
            )),
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        match self {
            Geometry::Point { lon, lat } => BoundingBox {
                min_lon: *lon,
                max_lon: *lon,
                min_lat: *lat,
                max_lat: *lat,
            },
            Geometry::Circle { lon, lat, radius_m } => {
                let (dlon, dlat) = meters_to_degrees(*radius_m, *lat);
                BoundingBox {
                    min_lon: lon - dlon,
                    max_lon: lon + dlon,
                    min_lat: lat - dlat,
                    max_lat: lat + dlat,
                }
            }
            Geometry::Polygon(polygon) => match polygon.bounding_rect() {
                Some(rect) => BoundingBox {
                    min_lon: rect.min().x,
                    max_lon: rect.max().x,
                    min_lat: rect.min().y,
                    max_lat: rect.max().y,
                },
                None => BoundingBox {
                    min_lon: f64::NAN,
                    max_lon: f64::NAN,
                    min_lat: f64::NAN,
                    max_lat: f64::NAN,
                },
            },
        }
    }

    /// Reference location the zonal sampling grid is anchored on
    pub fn anchor(&self) -> (f64, f64) {
        match self {
            Geometry::Point { lon, lat } | Geometry::Circle { lon, lat, .. } => (*lon, *lat),
            Geometry::Polygon(_) => self.bounds().center(),
        }
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        match self {
            Geometry::Point { lon: plon, lat: plat } => lon == *plon && lat == *plat,
            Geometry::Circle {
                lon: clon,
                lat: clat,
                radius_m,
            } => {
                let dx = (lon - clon) * METERS_PER_DEGREE * clat.to_radians().cos();
                let dy = (lat - clat) * METERS_PER_DEGREE;
                dx * dx + dy * dy <= radius_m * radius_m
            }
            Geometry::Polygon(polygon) => polygon.contains(&geo::Point::new(lon, lat)),
        }
    }

    /// Short human-readable description for error messages
    pub fn describe(&self) -> String {
        match self {
            Geometry::Point { lon, lat } => format!("point({:.6}, {:.6})", lon, lat),
            Geometry::Circle { lon, lat, radius_m } => {
                format!("point({:.6}, {:.6}) buffered {}m", lon, lat, radius_m)
            }
            Geometry::Polygon(polygon) => {
                format!("polygon({} vertices)", polygon.exterior().0.len())
            }
        }
    }
}

/// Calendar date range, start inclusive and end exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: &DateTime<Utc>) -> bool {
        let date = time.date_naive();
        date >= self.start && date < self.end
    }
}

/// Scalar aggregate of one raster over one geometry at one scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZonalStats {
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// Number of valid samples that contributed
    pub count: usize,
}

/// Sampled site with its indicator feature vector and assigned rank
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidatePoint {
    /// Position in the input point list
    pub index: usize,
    pub lon: f64,
    pub lat: f64,
    pub features: BTreeMap<String, f64>,
    /// 1-based rank, 0 until ranking assigns one
    pub rank: usize,
}

impl CandidatePoint {
    pub fn feature(&self, name: &str) -> Option<f64> {
        self.features.get(name).copied()
    }
}

/// Error types for indicator processing
#[derive(Debug, thiserror::Error)]
pub enum HotspotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing band '{band}' in image '{image}'")]
    MissingBand { band: String, image: String },

    #[error("No valid pixels of '{raster}' inside {geometry}")]
    EmptyRegion { raster: String, geometry: String },

    #[error("Grid shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Empty collection: {0}")]
    EmptyCollection(String),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for indicator operations
pub type HotspotResult<T> = Result<T, HotspotError>;
