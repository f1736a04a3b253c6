//! Vegetation and thermal indices derived from corrected, masked bands
//!
//! Every index is a pure function of its input rasters plus AOI-wide scalar
//! statistics. Numerically degenerate pixels (zero denominators, log of a
//! non-positive emissivity, non-finite results) are written as invalid
//! pixels instead of aborting the raster. Outputs inherit the intersection
//! of their inputs' validity masks.

use crate::core::zonal::ZonalReducer;
use crate::types::{
    Band, GeoTransform, Geometry, HotspotError, HotspotResult, IndicatorRaster, PixelGrid,
    RasterImage, ValidityMask, ZonalStats,
};
use ndarray::Zip;

pub const NDVI: &str = "NDVI";
pub const FV: &str = "FV";
pub const EM: &str = "EM";
pub const LST: &str = "LST";
pub const UHI: &str = "UHI";
pub const UTFVI: &str = "UTFVI";

/// Emissivity model: EM = FV * slope + intercept
pub const EMISSIVITY_SLOPE: f64 = 0.004;
pub const EMISSIVITY_INTERCEPT: f64 = 0.986;

/// Wavelength term of the single-channel LST inversion
pub const LST_WAVELENGTH: f64 = 0.00115;
/// Radiation constant term of the single-channel LST inversion
pub const LST_RHO: f64 = 0.48359547432;

pub const KELVIN_OFFSET: f64 = 273.15;

/// Denominators at or below this magnitude are treated as zero
const DENOMINATOR_EPS: f64 = 1e-10;

/// Apply `f` to every valid pixel; `None` or non-finite results become invalid
fn map_unary<F>(band: &Band, f: F) -> (PixelGrid, ValidityMask)
where
    F: Fn(f64) -> Option<f64> + Sync + Send,
{
    let apply = |&v: &f64, &valid: &bool| -> f64 {
        if !valid {
            return f64::NAN;
        }
        f(v).filter(|r| r.is_finite()).unwrap_or(f64::NAN)
    };

    #[cfg(feature = "parallel")]
    let values = Zip::from(&band.values).and(&band.mask).par_map_collect(apply);
    #[cfg(not(feature = "parallel"))]
    let values = Zip::from(&band.values).and(&band.mask).map_collect(apply);

    let mask = values.mapv(f64::is_finite);
    (values, mask)
}

/// Two-band version of [`map_unary`]; a pixel invalid in either input is invalid
fn map_binary<F>(a: &Band, b: &Band, f: F) -> HotspotResult<(PixelGrid, ValidityMask)>
where
    F: Fn(f64, f64) -> Option<f64> + Sync + Send,
{
    if a.dim() != b.dim() {
        return Err(HotspotError::ShapeMismatch {
            expected: a.dim(),
            actual: b.dim(),
        });
    }

    let apply = |&va: &f64, &ma: &bool, &vb: &f64, &mb: &bool| -> f64 {
        if !(ma && mb) {
            return f64::NAN;
        }
        f(va, vb).filter(|r| r.is_finite()).unwrap_or(f64::NAN)
    };

    #[cfg(feature = "parallel")]
    let values = Zip::from(&a.values)
        .and(&a.mask)
        .and(&b.values)
        .and(&b.mask)
        .par_map_collect(apply);
    #[cfg(not(feature = "parallel"))]
    let values = Zip::from(&a.values)
        .and(&a.mask)
        .and(&b.values)
        .and(&b.mask)
        .map_collect(apply);

    let mask = values.mapv(f64::is_finite);
    Ok((values, mask))
}

fn log_degenerate(name: &str, input_valid: usize, mask: &ValidityMask) {
    let output_valid = mask.iter().filter(|&&v| v).count();
    let dropped = input_valid.saturating_sub(output_valid);
    if dropped > 0 {
        log::debug!("{}: {} pixels invalidated by numeric guards", name, dropped);
    }
}

fn build(
    name: &str,
    unit: &str,
    transform: &GeoTransform,
    input_valid: usize,
    (values, mask): (PixelGrid, ValidityMask),
) -> HotspotResult<IndicatorRaster> {
    log_degenerate(name, input_valid, &mask);
    IndicatorRaster::new(name, unit, *transform, values, mask)
}

/// Normalized difference `(a - b) / (a + b)` of two bands of one image
///
/// Pixels with `a + b == 0` are invalid. Results outside [-1, 1], which
/// only arise from negative reflectances, are invalid as well.
pub fn normalized_difference(
    image: &RasterImage,
    band_a: &str,
    band_b: &str,
    name: &str,
) -> HotspotResult<IndicatorRaster> {
    let a = image.band(band_a)?;
    let b = image.band(band_b)?;
    let input_valid = a.valid_count().min(b.valid_count());

    let result = map_binary(a, b, |va, vb| {
        let sum = va + vb;
        if sum.abs() <= DENOMINATOR_EPS {
            return None;
        }
        let nd = (va - vb) / sum;
        (-1.0..=1.0).contains(&nd).then_some(nd)
    })?;

    build(name, "unitless", image.transform(), input_valid, result)
}

/// NDVI = (NIR - RED) / (NIR + RED)
pub fn ndvi(image: &RasterImage, nir_band: &str, red_band: &str) -> HotspotResult<IndicatorRaster> {
    log::info!("Computing NDVI from {} and {} on {}", nir_band, red_band, image.id());
    normalized_difference(image, nir_band, red_band, NDVI)
}

/// Vegetation fraction FV = ((NDVI - min) / (max - min))^2
///
/// A degenerate range (max == min) invalidates every pixel.
pub fn vegetation_fraction(ndvi: &IndicatorRaster, ndvi_min: f64, ndvi_max: f64) -> HotspotResult<IndicatorRaster> {
    let range = ndvi_max - ndvi_min;
    let input_valid = ndvi.band().valid_count();

    if !range.is_finite() || range.abs() <= DENOMINATOR_EPS {
        log::warn!(
            "Degenerate NDVI range [{}, {}]: every FV pixel is invalid",
            ndvi_min,
            ndvi_max
        );
        let dim = ndvi.band().dim();
        return build(
            FV,
            "fraction",
            ndvi.transform(),
            input_valid,
            (PixelGrid::from_elem(dim, f64::NAN), ValidityMask::from_elem(dim, false)),
        );
    }

    let result = map_unary(ndvi.band(), |v| {
        let scaled = (v - ndvi_min) / range;
        Some(scaled * scaled)
    });
    build(FV, "fraction", ndvi.transform(), input_valid, result)
}

/// Emissivity EM = FV * 0.004 + 0.986
pub fn emissivity(fv: &IndicatorRaster) -> HotspotResult<IndicatorRaster> {
    let input_valid = fv.band().valid_count();
    let result = map_unary(fv.band(), |v| Some(v * EMISSIVITY_SLOPE + EMISSIVITY_INTERCEPT));
    build(EM, "emissivity", fv.transform(), input_valid, result)
}

/// Land-surface temperature in Celsius from brightness temperature (Kelvin)
///
/// `LST = tb / (1 + (0.00115 * tb / 0.48359547432) * ln(EM)) - 273.15`
pub fn land_surface_temperature(thermal: &Band, em: &IndicatorRaster) -> HotspotResult<IndicatorRaster> {
    let input_valid = thermal.valid_count().min(em.band().valid_count());

    let result = map_binary(thermal, em.band(), |tb, e| {
        if e <= 0.0 {
            return None;
        }
        let denominator = 1.0 + (LST_WAVELENGTH * (tb / LST_RHO)) * e.ln();
        if denominator.abs() <= DENOMINATOR_EPS {
            return None;
        }
        Some(tb / denominator - KELVIN_OFFSET)
    })?;

    build(LST, "°C", em.transform(), input_valid, result)
}

/// Urban heat island z-score (LST - mean) / std_dev
///
/// A zero AOI standard deviation invalidates every pixel.
pub fn urban_heat_island(lst: &IndicatorRaster, lst_mean: f64, lst_std_dev: f64) -> HotspotResult<IndicatorRaster> {
    let input_valid = lst.band().valid_count();

    if !lst_std_dev.is_finite() || lst_std_dev.abs() <= DENOMINATOR_EPS {
        log::warn!("AOI LST standard deviation is {}: every UHI pixel is invalid", lst_std_dev);
        let dim = lst.band().dim();
        return build(
            UHI,
            "z-score",
            lst.transform(),
            input_valid,
            (PixelGrid::from_elem(dim, f64::NAN), ValidityMask::from_elem(dim, false)),
        );
    }

    let result = map_unary(lst.band(), |v| Some((v - lst_mean) / lst_std_dev));
    build(UHI, "z-score", lst.transform(), input_valid, result)
}

/// Urban thermal field variance index (LST - mean) / LST; LST == 0 is invalid
pub fn urban_thermal_field_variance(lst: &IndicatorRaster, lst_mean: f64) -> HotspotResult<IndicatorRaster> {
    let input_valid = lst.band().valid_count();
    let result = map_unary(lst.band(), |v| {
        if v.abs() <= DENOMINATOR_EPS {
            return None;
        }
        Some((v - lst_mean) / v)
    });
    build(UTFVI, "unitless", lst.transform(), input_valid, result)
}

/// Band names and reduction scale for the thermal index chain
#[derive(Debug, Clone)]
pub struct ThermalIndexParams {
    pub nir_band: String,
    pub red_band: String,
    pub thermal_band: String,
    /// Nominal resolution (m) for the AOI normalisation statistics
    pub scale_m: f64,
}

impl Default for ThermalIndexParams {
    fn default() -> Self {
        Self {
            nir_band: "SR_B5".to_string(),  // Landsat 8 OLI NIR
            red_band: "SR_B4".to_string(),  // Landsat 8 OLI red
            thermal_band: "ST_B10".to_string(), // Landsat 8 TIRS surface temperature
            scale_m: 30.0,
        }
    }
}

/// All indicators derived from one composite, with the AOI statistics used
#[derive(Debug, Clone)]
pub struct ThermalIndices {
    pub ndvi: IndicatorRaster,
    pub fv: IndicatorRaster,
    pub em: IndicatorRaster,
    pub lst: IndicatorRaster,
    pub uhi: IndicatorRaster,
    pub utfvi: IndicatorRaster,
    pub ndvi_stats: ZonalStats,
    pub lst_stats: ZonalStats,
}

impl ThermalIndices {
    pub fn all(&self) -> [&IndicatorRaster; 6] {
        [&self.ndvi, &self.fv, &self.em, &self.lst, &self.uhi, &self.utfvi]
    }
}

/// Index derivation engine for a corrected, masked composite
pub struct IndexProcessor {
    params: ThermalIndexParams,
    reducer: ZonalReducer,
}

impl IndexProcessor {
    pub fn new(params: ThermalIndexParams, reducer: ZonalReducer) -> Self {
        Self { params, reducer }
    }

    pub fn standard() -> Self {
        Self::new(ThermalIndexParams::default(), ZonalReducer::default())
    }

    /// NDVI -> FV -> EM -> LST -> UHI/UTFVI over `aoi`
    ///
    /// Fails fast when an AOI normalisation statistic cannot be computed,
    /// since every later index depends on it.
    pub fn derive(&self, composite: &RasterImage, aoi: &Geometry) -> HotspotResult<ThermalIndices> {
        let p = &self.params;
        log::info!("Deriving thermal indices for {} over {}", composite.id(), aoi.describe());

        let thermal = composite.band(&p.thermal_band)?;
        let ndvi = ndvi(composite, &p.nir_band, &p.red_band)?;

        let ndvi_stats = self.reducer.summarize(&ndvi, aoi, p.scale_m)?;
        log::info!("AOI NDVI range: [{:.4}, {:.4}]", ndvi_stats.min, ndvi_stats.max);

        let fv = vegetation_fraction(&ndvi, ndvi_stats.min, ndvi_stats.max)?;
        let em = emissivity(&fv)?;
        let lst = land_surface_temperature(thermal, &em)?;

        let lst_stats = self.reducer.summarize(&lst, aoi, p.scale_m)?;
        log::info!(
            "AOI LST mean {:.2}°C, std {:.2}°C ({} samples)",
            lst_stats.mean,
            lst_stats.std_dev,
            lst_stats.count
        );

        let uhi = urban_heat_island(&lst, lst_stats.mean, lst_stats.std_dev)?;
        let utfvi = urban_thermal_field_variance(&lst, lst_stats.mean)?;

        Ok(ThermalIndices {
            ndvi,
            fv,
            em,
            lst,
            uhi,
            utfvi,
            ndvi_stats,
            lst_stats,
        })
    }
}
