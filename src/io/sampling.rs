//! Candidate site generation inside a region

use crate::io::config::SamplingConfig;
use crate::types::{Geometry, HotspotError, HotspotResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Supplier of point geometries inside a region
pub trait PointSampler {
    fn random_points(&self, region: &Geometry, count: usize) -> HotspotResult<Vec<Geometry>>;
}

/// Uniform rejection sampler with a fixed seed
///
/// The same seed, region and count always yield the same points.
#[derive(Debug, Clone, Copy)]
pub struct SeededSampler {
    seed: u64,
    /// Candidate draws allowed per requested point before giving up
    max_attempts_per_point: usize,
}

impl SeededSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_attempts_per_point: 1000,
        }
    }

    /// Sampler seeded from the run configuration
    pub fn from_config(config: &SamplingConfig) -> Self {
        Self::new(config.seed)
    }

    pub fn with_max_attempts(mut self, max_attempts_per_point: usize) -> Self {
        self.max_attempts_per_point = max_attempts_per_point.max(1);
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl PointSampler for SeededSampler {
    fn random_points(&self, region: &Geometry, count: usize) -> HotspotResult<Vec<Geometry>> {
        let bounds = region.bounds();
        if !(bounds.width() > 0.0 && bounds.height() > 0.0) {
            return Err(HotspotError::Processing(format!(
                "cannot sample points inside {}: region has no area",
                region.describe()
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let max_attempts = count.saturating_mul(self.max_attempts_per_point);
        let mut points = Vec::with_capacity(count);
        let mut attempts = 0usize;

        while points.len() < count {
            if attempts >= max_attempts {
                return Err(HotspotError::Processing(format!(
                    "only {} of {} points found inside {} after {} draws",
                    points.len(),
                    count,
                    region.describe(),
                    attempts
                )));
            }
            attempts += 1;

            let lon = rng.random_range(bounds.min_lon..bounds.max_lon);
            let lat = rng.random_range(bounds.min_lat..bounds.max_lat);
            if region.contains(lon, lat) {
                points.push(Geometry::point(lon, lat));
            }
        }

        log::debug!(
            "Sampled {} points in {} draws (seed {})",
            points.len(),
            attempts,
            self.seed
        );
        Ok(points)
    }
}

/// Fixed coordinate list injected by the caller
#[derive(Debug, Clone, Default)]
pub struct FixedPoints {
    points: Vec<(f64, f64)>,
}

impl FixedPoints {
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        Self { points }
    }
}

impl PointSampler for FixedPoints {
    /// First `count` listed points that fall inside `region`
    fn random_points(&self, region: &Geometry, count: usize) -> HotspotResult<Vec<Geometry>> {
        let points: Vec<Geometry> = self
            .points
            .iter()
            .filter(|&&(lon, lat)| region.contains(lon, lat))
            .take(count)
            .map(|&(lon, lat)| Geometry::point(lon, lat))
            .collect();

        if points.len() < count {
            log::warn!(
                "Only {} of {} fixed points lie inside {}",
                points.len(),
                count,
                region.describe()
            );
        }
        Ok(points)
    }
}
