//! Multi-criteria site ranking by cascading stable sorts
//!
//! Sort keys are applied one after another with a stable sort, in the
//! order given. Each pass only reorders within groups the next pass leaves
//! tied, so the LAST key is the primary ordering and earlier keys break its
//! ties. This is not equivalent to a weighted score and must not be
//! collapsed into one.

use crate::core::zonal::{ZonalReducer, ZonalStatistic};
use crate::types::{CandidatePoint, Geometry, HotspotError, HotspotResult, IndicatorRaster};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "asc", alias = "ascending")]
    Ascending,
    #[serde(rename = "desc", alias = "descending")]
    Descending,
}

/// One ranking pass: order candidates by `indicator` in `direction`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub indicator: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(indicator: impl Into<String>) -> Self {
        Self {
            indicator: indicator.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(indicator: impl Into<String>) -> Self {
        Self {
            indicator: indicator.into(),
            direction: SortDirection::Descending,
        }
    }

    fn compare(&self, a: &CandidatePoint, b: &CandidatePoint) -> Ordering {
        // Presence and finiteness are checked before sorting
        let va = a.feature(&self.indicator).unwrap_or(f64::NAN);
        let vb = b.feature(&self.indicator).unwrap_or(f64::NAN);
        let ord = va.total_cmp(&vb);
        match self.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    }
}

/// Indicator scored at every candidate site
#[derive(Debug, Clone)]
pub struct IndicatorSpec<'a> {
    /// Feature name in the candidate's feature vector
    pub name: String,
    pub raster: &'a IndicatorRaster,
    /// Nominal reduction scale in meters
    pub scale_m: f64,
}

impl<'a> IndicatorSpec<'a> {
    pub fn new(name: impl Into<String>, raster: &'a IndicatorRaster, scale_m: f64) -> Self {
        Self {
            name: name.into(),
            raster,
            scale_m,
        }
    }
}

/// Ranked shortlist plus bookkeeping about the input set
#[derive(Debug, Clone)]
pub struct RankingOutcome {
    pub ranked: Vec<CandidatePoint>,
    /// Points with a complete feature vector
    pub scored: usize,
    /// Points dropped because some indicator had no valid pixels
    pub excluded: usize,
}

/// Apply the sort keys in order with a stable sort
pub fn cascade_sort(candidates: &mut [CandidatePoint], keys: &[SortKey]) -> HotspotResult<()> {
    for key in keys {
        let missing = |c: &&CandidatePoint| !c.feature(&key.indicator).is_some_and(f64::is_finite);
        if let Some(c) = candidates.iter().find(missing) {
            return Err(HotspotError::InvalidConfig(format!(
                "sort key '{}' has no finite value for candidate {}",
                key.indicator, c.index
            )));
        }
    }

    for key in keys {
        // slice::sort_by is stable
        candidates.sort_by(|a, b| key.compare(a, b));
    }
    Ok(())
}

/// Cascade-sort, truncate to `top_k` and assign 1-based ranks
pub fn rank_candidates(
    mut candidates: Vec<CandidatePoint>,
    keys: &[SortKey],
    top_k: usize,
) -> HotspotResult<Vec<CandidatePoint>> {
    cascade_sort(&mut candidates, keys)?;
    candidates.truncate(top_k);
    for (i, candidate) in candidates.iter_mut().enumerate() {
        candidate.rank = i + 1;
    }
    Ok(candidates)
}

/// Scores sample sites over a fixed buffer and ranks them
pub struct SiteRanker {
    reducer: ZonalReducer,
    buffer_m: f64,
}

impl SiteRanker {
    pub fn new(reducer: ZonalReducer, buffer_m: f64) -> HotspotResult<Self> {
        if !(buffer_m > 0.0) {
            return Err(HotspotError::InvalidConfig(format!(
                "sample buffer must be positive, got {}",
                buffer_m
            )));
        }
        Ok(Self { reducer, buffer_m })
    }

    /// Feature vector of one site, `None` when an indicator has no data there
    fn score_point(
        &self,
        index: usize,
        point: &Geometry,
        specs: &[IndicatorSpec<'_>],
    ) -> HotspotResult<Option<CandidatePoint>> {
        let region = point.buffer(self.buffer_m)?;
        let (lon, lat) = point.anchor();
        let mut features = BTreeMap::new();

        for spec in specs {
            match self
                .reducer
                .reduce(spec.raster, &region, ZonalStatistic::Mean, spec.scale_m)
            {
                Ok(value) => {
                    features.insert(spec.name.clone(), value);
                }
                Err(HotspotError::EmptyRegion { .. }) => {
                    log::debug!(
                        "Excluding point {} ({:.6}, {:.6}): no valid {} pixels",
                        index,
                        lon,
                        lat,
                        spec.name
                    );
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Some(CandidatePoint {
            index,
            lon,
            lat,
            features,
            rank: 0,
        }))
    }

    /// Feature vectors for every scorable point, in input order
    pub fn score_points(
        &self,
        points: &[Geometry],
        specs: &[IndicatorSpec<'_>],
    ) -> HotspotResult<Vec<CandidatePoint>> {
        log::info!(
            "Scoring {} points on {} indicators (buffer {}m)",
            points.len(),
            specs.len(),
            self.buffer_m
        );

        #[cfg(feature = "parallel")]
        let scored: Vec<Option<CandidatePoint>> = {
            use rayon::prelude::*;
            points
                .par_iter()
                .enumerate()
                .map(|(i, point)| self.score_point(i, point, specs))
                .collect::<HotspotResult<_>>()?
        };

        #[cfg(not(feature = "parallel"))]
        let scored: Vec<Option<CandidatePoint>> = points
            .iter()
            .enumerate()
            .map(|(i, point)| self.score_point(i, point, specs))
            .collect::<HotspotResult<_>>()?;

        Ok(scored.into_iter().flatten().collect())
    }

    /// Score, cascade-sort and truncate to the `top_k` best sites
    pub fn rank(
        &self,
        points: &[Geometry],
        specs: &[IndicatorSpec<'_>],
        sort_keys: &[SortKey],
        top_k: usize,
    ) -> HotspotResult<RankingOutcome> {
        for key in sort_keys {
            if !specs.iter().any(|s| s.name == key.indicator) {
                return Err(HotspotError::InvalidConfig(format!(
                    "sort key '{}' does not name a scored indicator",
                    key.indicator
                )));
            }
        }

        let candidates = self.score_points(points, specs)?;
        let scored = candidates.len();
        let excluded = points.len() - scored;
        if excluded > 0 {
            log::warn!("{} of {} points could not be scored and were excluded", excluded, points.len());
        }

        let ranked = rank_candidates(candidates, sort_keys, top_k)?;
        log::info!("Ranked {} scorable points, kept top {}", scored, ranked.len());

        Ok(RankingOutcome {
            ranked,
            scored,
            excluded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::Array2;

    fn candidate(index: usize, features: &[(&str, f64)]) -> CandidatePoint {
        CandidatePoint {
            index,
            lon: 0.0,
            lat: 0.0,
            features: features.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            rank: 0,
        }
    }

    fn order(candidates: &[CandidatePoint]) -> Vec<usize> {
        candidates.iter().map(|c| c.index).collect()
    }

    #[test]
    fn test_last_key_dominates() {
        let candidates = vec![
            candidate(0, &[("A", 3.0), ("B", 1.0)]),
            candidate(1, &[("A", 1.0), ("B", 2.0)]),
            candidate(2, &[("A", 2.0), ("B", 2.0)]),
            candidate(3, &[("A", 0.0), ("B", 1.0)]),
            candidate(4, &[("A", 5.0), ("B", 3.0)]),
        ];
        let keys = [SortKey::asc("A"), SortKey::desc("B")];
        let ranked = rank_candidates(candidates, &keys, 10).unwrap();

        // B descending first, A ascending inside equal-B groups
        assert_eq!(order(&ranked), vec![4, 1, 2, 3, 0]);
        assert_eq!(ranked.iter().map(|c| c.rank).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_full_ties_keep_input_order() {
        let candidates: Vec<_> = (0..6).map(|i| candidate(i, &[("A", 1.0)])).collect();
        let ranked = rank_candidates(candidates, &[SortKey::desc("A")], 4).unwrap();
        assert_eq!(order(&ranked), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_top_k_truncation() {
        let candidates: Vec<_> = (0..5).map(|i| candidate(i, &[("A", i as f64)])).collect();
        let ranked = rank_candidates(candidates.clone(), &[SortKey::desc("A")], 2).unwrap();
        assert_eq!(order(&ranked), vec![4, 3]);

        let all = rank_candidates(candidates, &[SortKey::desc("A")], 50).unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_missing_feature_rejected() {
        let mut candidates = vec![candidate(0, &[("A", 1.0)]), candidate(1, &[("B", 1.0)])];
        assert!(cascade_sort(&mut candidates, &[SortKey::asc("A")]).is_err());
    }

    #[test]
    fn test_non_finite_feature_rejected() {
        let mut candidates = vec![
            candidate(0, &[("A", 1.0)]),
            candidate(1, &[("A", f64::NAN)]),
            candidate(2, &[("A", 2.0)]),
        ];
        assert!(matches!(
            cascade_sort(&mut candidates, &[SortKey::desc("A")]),
            Err(HotspotError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_sort_direction_serde() {
        let key: SortKey = serde_json::from_str(r#"{"indicator": "LST", "direction": "desc"}"#).unwrap();
        assert_eq!(key, SortKey::desc("LST"));
        let key: SortKey = serde_json::from_str(r#"{"indicator": "NDVI", "direction": "ascending"}"#).unwrap();
        assert_eq!(key, SortKey::asc("NDVI"));
    }

    /// Five 0.05-degree blocks side by side, one value per block
    fn block_raster(name: &str, block_values: [f64; 5], masked_block: Option<usize>) -> IndicatorRaster {
        let transform = GeoTransform::north_up(77.0, 28.55, 0.005, 0.005);
        let values = Array2::from_shape_fn((10, 50), |(_, c)| block_values[c / 10]);
        let mask = Array2::from_shape_fn((10, 50), |(_, c)| Some(c / 10) != masked_block);
        IndicatorRaster::new(name, "", transform, values, mask).unwrap()
    }

    fn block_centre(block: usize) -> Geometry {
        Geometry::point(77.0 + 0.025 + 0.05 * block as f64, 28.525)
    }

    #[test]
    fn test_site_ranker_scores_and_excludes() {
        let heat = block_raster("LST", [30.0, 45.0, 38.0, 45.0, 41.0], None);
        let no2 = block_raster("NO2", [1.0, 2.0, 3.0, 4.0, 5.0], Some(2));
        let specs = [IndicatorSpec::new("LST", &heat, 100.0), IndicatorSpec::new("NO2", &no2, 100.0)];

        let mut points: Vec<Geometry> = (0..5).map(block_centre).collect();
        points.push(Geometry::point(10.0, 10.0)); // outside every raster

        let ranker = SiteRanker::new(ZonalReducer::default(), 1000.0).unwrap();
        let outcome = ranker
            .rank(&points, &specs, &[SortKey::desc("NO2"), SortKey::desc("LST")], 3)
            .unwrap();

        assert_eq!(outcome.scored, 4);
        assert_eq!(outcome.excluded, 2);
        // LST primary: blocks 1 and 3 tie at 45, NO2 desc puts 3 first
        assert_eq!(order(&outcome.ranked), vec![3, 1, 4]);
        let first = &outcome.ranked[0];
        assert_eq!(first.rank, 1);
        assert!((first.feature("LST").unwrap() - 45.0).abs() < 1e-12);
        assert!((first.feature("NO2").unwrap() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_sort_key_rejected() {
        let heat = block_raster("LST", [1.0; 5], None);
        let specs = [IndicatorSpec::new("LST", &heat, 100.0)];
        let ranker = SiteRanker::new(ZonalReducer::default(), 1000.0).unwrap();
        let result = ranker.rank(&[block_centre(0)], &specs, &[SortKey::desc("CO")], 3);
        assert!(matches!(result, Err(HotspotError::InvalidConfig(_))));
    }
}
