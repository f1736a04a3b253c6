use crate::types::{Band, HotspotError, HotspotResult, RasterImage};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Linear scale/offset applied to every band whose name matches `pattern`
///
/// Patterns are regular expressions matched against the whole band name,
/// so `SR_B.` selects `SR_B1`..`SR_B7` but not `SR_B10`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandCorrection {
    pub pattern: String,
    pub scale: f64,
    pub offset: f64,
}

impl BandCorrection {
    pub fn new(pattern: impl Into<String>, scale: f64, offset: f64) -> Self {
        Self {
            pattern: pattern.into(),
            scale,
            offset,
        }
    }

    /// Landsat 8 Collection 2 Level 2 surface reflectance bands
    pub fn landsat_c2_reflectance() -> Self {
        Self::new("SR_B.", 0.0000275, -0.2)
    }

    /// Landsat 8 Collection 2 Level 2 surface temperature bands (Kelvin)
    pub fn landsat_c2_temperature() -> Self {
        Self::new("ST_B.*", 0.00341802, 149.0)
    }
}

/// Compile a band-name pattern anchored to the full name
pub(crate) fn compile_band_pattern(pattern: &str) -> HotspotResult<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
        HotspotError::InvalidConfig(format!("invalid band pattern '{}': {}", pattern, e))
    })
}

/// Radiometric correction processor: raw digital numbers to physical units
pub struct RadiometricCorrector {
    corrections: Vec<(Regex, BandCorrection)>,
}

impl RadiometricCorrector {
    /// Create a corrector, compiling every band pattern up front
    pub fn new(corrections: &[BandCorrection]) -> HotspotResult<Self> {
        let corrections = corrections
            .iter()
            .map(|c| Ok((compile_band_pattern(&c.pattern)?, c.clone())))
            .collect::<HotspotResult<Vec<_>>>()?;
        Ok(Self { corrections })
    }

    /// Corrector with the Landsat 8 C2 L2 reflectance and temperature factors
    pub fn landsat_c2() -> HotspotResult<Self> {
        Self::new(&[
            BandCorrection::landsat_c2_reflectance(),
            BandCorrection::landsat_c2_temperature(),
        ])
    }

    /// Apply `v * scale + offset` to matching bands, others pass through
    ///
    /// The first matching correction wins. Footprint, masks and metadata
    /// are carried over unchanged.
    pub fn correct(&self, image: &RasterImage) -> RasterImage {
        log::debug!("Applying radiometric correction to image {}", image.id());

        let bands: Vec<Band> = image
            .bands()
            .iter()
            .map(|band| match self.correction_for(&band.name) {
                Some(c) => {
                    log::trace!(
                        "Band {}: scale {} offset {} (pattern '{}')",
                        band.name, c.scale, c.offset, c.pattern
                    );
                    Band {
                        name: band.name.clone(),
                        values: band.values.mapv(|v| v * c.scale + c.offset),
                        mask: band.mask.clone(),
                    }
                }
                None => band.clone(),
            })
            .collect();

        image.derive(bands)
    }

    fn correction_for(&self, band_name: &str) -> Option<&BandCorrection> {
        self.corrections
            .iter()
            .find(|(re, _)| re.is_match(band_name))
            .map(|(_, c)| c)
    }
}
