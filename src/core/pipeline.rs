//! End-to-end run: imagery in, indicator summaries and ranked sites out
//!
//! Stages, in order:
//! 1. fetch the optical collection, correct and QA-mask every image
//! 2. temporal composite and the NDVI -> FV -> EM -> LST -> UHI/UTFVI chain
//! 3. auxiliary layers (pollutants, vegetation, population, urbanization)
//! 4. AOI summaries, candidate sampling and ranking
//! 5. per-image time series and the class histogram

use crate::core::calibrate::RadiometricCorrector;
use crate::core::indices::{IndexProcessor, ThermalIndices, LST, NDVI};
use crate::core::quality_mask::QualityMasker;
use crate::core::ranking::{IndicatorSpec, SiteRanker};
use crate::core::zonal::{ClassHistogram, ZonalReducer};
use crate::io::collection::{CollectionSource, RasterCollection, TimeSeries};
use crate::io::config::{LayerConfig, RunConfig, THERMAL_SERIES};
use crate::io::report::{IndicatorSummary, PipelineReport};
use crate::io::sampling::{PointSampler, SeededSampler};
use crate::types::{Geometry, HotspotError, HotspotResult, IndicatorRaster, ZonalStats};

/// Auxiliary layer as fetched and composited for one run
pub struct LoadedLayer<'a> {
    pub config: &'a LayerConfig,
    pub collection: RasterCollection,
    pub raster: IndicatorRaster,
}

/// Pipeline bound to one validated run configuration
pub struct Pipeline {
    config: RunConfig,
    aoi: Geometry,
    reducer: ZonalReducer,
}

impl Pipeline {
    pub fn new(config: RunConfig) -> HotspotResult<Self> {
        config.validate()?;
        let aoi = config.aoi_geometry()?;
        let reducer = ZonalReducer::new(config.max_pixels)?;
        Ok(Self {
            config,
            aoi,
            reducer,
        })
    }

    pub fn standard() -> HotspotResult<Self> {
        Self::new(RunConfig::default())
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn aoi(&self) -> &Geometry {
        &self.aoi
    }

    /// Optical collection over the AOI and run dates, corrected and masked
    pub fn optical_collection(&self, source: &dyn CollectionSource) -> HotspotResult<RasterCollection> {
        let optical = &self.config.optical;
        let corrector = RadiometricCorrector::new(&optical.corrections)?;
        let masker = QualityMasker::new(optical.qa_band.clone(), optical.qa_tests.clone())?;

        let raw = source.fetch(
            &optical.collection,
            Some(&self.config.date_range),
            Some(&self.aoi),
        )?;
        log::info!("Optical collection {}: {} images", optical.collection, raw.len());

        raw.try_map(|image| masker.mask(&corrector.correct(image)))
    }

    /// Composite the optical collection and derive the thermal indices
    pub fn thermal_indices(&self, optical: &RasterCollection) -> HotspotResult<ThermalIndices> {
        let composite = optical.temporal_aggregate(self.config.optical.composite)?;
        IndexProcessor::new(self.config.optical.index_params(), self.reducer).derive(&composite, &self.aoi)
    }

    /// Fetch and composite every configured auxiliary layer
    pub fn auxiliary_layers(&self, source: &dyn CollectionSource) -> HotspotResult<Vec<LoadedLayer<'_>>> {
        self.config
            .layers
            .iter()
            .map(|layer| {
                let dates = layer.effective_dates(&self.config.date_range);
                let collection = source
                    .fetch(&layer.collection, dates, Some(&self.aoi))?
                    .select_bands(&[regex::escape(&layer.band).as_str()])?;
                log::info!(
                    "Layer {} from {}: {} images",
                    layer.name,
                    layer.collection,
                    collection.len()
                );

                let composite = collection.temporal_aggregate(layer.aggregate)?;
                let raster =
                    IndicatorRaster::from_image_band(&composite, &layer.band, layer.name.as_str(), layer.unit.as_str())?;
                Ok(LoadedLayer {
                    config: layer,
                    collection,
                    raster,
                })
            })
            .collect()
    }

    /// Run with candidate sites drawn from the configured sampling seed
    pub fn run_seeded(&self, source: &dyn CollectionSource) -> HotspotResult<PipelineReport> {
        self.run(source, &SeededSampler::from_config(&self.config.sampling))
    }

    /// Execute every stage and collect the report
    pub fn run(
        &self,
        source: &dyn CollectionSource,
        sampler: &dyn PointSampler,
    ) -> HotspotResult<PipelineReport> {
        log::info!(
            "Starting run over {} from {} to {}",
            self.aoi.describe(),
            self.config.date_range.start,
            self.config.date_range.end
        );

        let optical = self.optical_collection(source)?;
        let indices = self.thermal_indices(&optical)?;
        let layers = self.auxiliary_layers(source)?;

        let mut indicators: Vec<(&IndicatorRaster, f64)> = indices
            .all()
            .into_iter()
            .map(|raster| (raster, self.config.optical.scale_m))
            .collect();
        indicators.extend(layers.iter().map(|l| (&l.raster, l.config.scale_m)));

        // The index chain already reduced NDVI and LST over the AOI at the optical scale
        let reduced = [(NDVI, indices.ndvi_stats), (LST, indices.lst_stats)];
        let summaries = self.summarize(&indicators, &reduced)?;

        let points = self.sampler_points(sampler)?;
        let specs = self
            .config
            .ranking
            .indicators
            .iter()
            .map(|ranked| {
                let (raster, _) = lookup(&indicators, &ranked.layer)?;
                Ok(IndicatorSpec::new(ranked.name.as_str(), raster, ranked.scale_m))
            })
            .collect::<HotspotResult<Vec<_>>>()?;

        let ranker = SiteRanker::new(self.reducer, self.config.sampling.buffer_m)?;
        let outcome = ranker.rank(
            &points,
            &specs,
            &self.config.ranking.sort_keys,
            self.config.ranking.top_k,
        )?;

        let time_series = self.time_series(&optical, &layers)?;
        let histogram = self.histogram(&indicators)?;

        log::info!(
            "Run complete: {} summaries, {} ranked sites, {} series",
            summaries.len(),
            outcome.ranked.len(),
            time_series.len()
        );

        Ok(PipelineReport {
            date_range: self.config.date_range,
            optical_images: optical.len(),
            summaries,
            ranked: outcome.ranked,
            sampled_points: points.len(),
            excluded_points: outcome.excluded,
            time_series,
            histogram,
        })
    }

    fn sampler_points(&self, sampler: &dyn PointSampler) -> HotspotResult<Vec<Geometry>> {
        let points = sampler.random_points(&self.aoi, self.config.sampling.count)?;
        log::info!("Sampled {} candidate sites", points.len());
        Ok(points)
    }

    /// AOI statistics per indicator; indicators without valid AOI pixels are left out
    fn summarize(
        &self,
        indicators: &[(&IndicatorRaster, f64)],
        reduced: &[(&str, ZonalStats)],
    ) -> HotspotResult<Vec<IndicatorSummary>> {
        let mut summaries = Vec::with_capacity(indicators.len());
        for &(raster, scale_m) in indicators {
            let known = reduced
                .iter()
                .find(|(name, _)| *name == raster.name())
                .map(|&(_, stats)| stats);
            let stats = match known {
                Some(stats) => Ok(stats),
                None => self.reducer.summarize(raster, &self.aoi, scale_m),
            };
            match stats {
                Ok(stats) => {
                    log::info!(
                        "AOI {}: mean {:.6} std {:.6} ({} samples)",
                        raster.name(),
                        stats.mean,
                        stats.std_dev,
                        stats.count
                    );
                    summaries.push(IndicatorSummary {
                        name: raster.name().to_string(),
                        unit: raster.unit().to_string(),
                        scale_m,
                        stats,
                    });
                }
                Err(HotspotError::EmptyRegion { .. }) => {
                    log::warn!("No valid {} pixels inside the AOI, summary omitted", raster.name());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summaries)
    }

    fn time_series(
        &self,
        optical: &RasterCollection,
        layers: &[LoadedLayer<'_>],
    ) -> HotspotResult<Vec<TimeSeries>> {
        self.config
            .time_series
            .iter()
            .map(|name| {
                if name == THERMAL_SERIES {
                    let optical_cfg = &self.config.optical;
                    let series = optical.series_by_region(
                        name,
                        &optical_cfg.thermal_band,
                        &self.aoi,
                        optical_cfg.scale_m,
                        &self.reducer,
                    )?;
                    return Ok(series.kelvin_to_celsius());
                }

                let layer = layers
                    .iter()
                    .find(|l| &l.config.name == name)
                    .ok_or_else(|| HotspotError::InvalidConfig(format!("time series '{}' names no layer", name)))?;
                let mut series = layer.collection.series_by_region(
                    name,
                    &layer.config.band,
                    &self.aoi,
                    layer.config.scale_m,
                    &self.reducer,
                )?;
                series.unit = layer.config.unit.clone();
                Ok(series)
            })
            .collect()
    }

    fn histogram(&self, indicators: &[(&IndicatorRaster, f64)]) -> HotspotResult<Option<ClassHistogram>> {
        let Some(config) = &self.config.histogram else {
            return Ok(None);
        };
        let (raster, _) = lookup(indicators, &config.layer)?;

        match self
            .reducer
            .histogram(raster, &self.aoi, config.scale_m, config.min_class..=config.max_class)
        {
            Ok(histogram) => Ok(Some(histogram)),
            Err(HotspotError::EmptyRegion { .. }) => {
                log::warn!("No {} classes inside the AOI, histogram omitted", config.layer);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn lookup<'a>(
    indicators: &[(&'a IndicatorRaster, f64)],
    name: &str,
) -> HotspotResult<(&'a IndicatorRaster, f64)> {
    indicators
        .iter()
        .find(|(raster, _)| raster.name() == name)
        .copied()
        .ok_or_else(|| HotspotError::InvalidConfig(format!("unknown indicator layer '{}'", name)))
}
