//! Bitmask-based quality masking from a QA band
//!
//! A pixel stays valid only when every configured bit test passes on the
//! integer QA value. The resulting validity is intersected with each band's
//! existing mask, so masking twice with the same tests is a no-op.

use crate::types::{Band, HotspotError, HotspotResult, RasterImage, ValidityMask};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// Landsat C2 QA_PIXEL bit for cloud shadow
pub const QA_CLOUD_SHADOW_BIT: u8 = 3;
/// Landsat C2 QA_PIXEL bit for cloud
pub const QA_CLOUD_BIT: u8 = 5;

/// Requires bit `bit` of the QA value to equal `value` (0 or 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitTest {
    pub bit: u8,
    pub value: u8,
}

impl BitTest {
    pub fn cleared(bit: u8) -> Self {
        Self { bit, value: 0 }
    }

    pub fn passes(&self, qa: u64) -> bool {
        ((qa >> self.bit) & 1) as u8 == self.value
    }
}

/// Quality masking processor
pub struct QualityMasker {
    qa_band: String,
    tests: Vec<BitTest>,
}

impl QualityMasker {
    pub fn new(qa_band: impl Into<String>, tests: Vec<BitTest>) -> HotspotResult<Self> {
        for test in &tests {
            if test.bit >= 64 || test.value > 1 {
                return Err(HotspotError::InvalidConfig(format!(
                    "invalid QA bit test: bit {} must be < 64 and value {} must be 0 or 1",
                    test.bit, test.value
                )));
            }
        }
        Ok(Self {
            qa_band: qa_band.into(),
            tests,
        })
    }

    /// Landsat C2 cloud and cloud-shadow mask on QA_PIXEL
    pub fn landsat_c2() -> Self {
        Self {
            qa_band: "QA_PIXEL".to_string(),
            tests: vec![
                BitTest::cleared(QA_CLOUD_SHADOW_BIT),
                BitTest::cleared(QA_CLOUD_BIT),
            ],
        }
    }

    /// Per-pixel validity derived from the QA band alone
    ///
    /// QA pixels that are themselves invalid, negative or non-integral
    /// fail every test.
    pub fn qa_validity(&self, image: &RasterImage) -> HotspotResult<ValidityMask> {
        let qa = image.band(&self.qa_band)?;

        Ok(Zip::from(&qa.values)
            .and(&qa.mask)
            .map_collect(|&value, &valid| {
                if !valid || !value.is_finite() || value < 0.0 || value.fract() != 0.0 {
                    return false;
                }
                let bits = value as u64;
                self.tests.iter().all(|t| t.passes(bits))
            }))
    }

    /// Apply the QA validity to every band of the image
    pub fn mask(&self, image: &RasterImage) -> HotspotResult<RasterImage> {
        let validity = self.qa_validity(image)?;

        let rejected = validity.iter().filter(|&&v| !v).count();
        log::debug!(
            "QA mask on {} from {}: {} of {} pixels rejected",
            image.id(),
            self.qa_band,
            rejected,
            validity.len()
        );

        let bands = image
            .bands()
            .iter()
            .map(|band| Band {
                name: band.name.clone(),
                values: band.values.clone(),
                mask: Zip::from(&band.mask)
                    .and(&validity)
                    .map_collect(|&existing, &qa_ok| existing && qa_ok),
            })
            .collect();

        Ok(image.derive(bands))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::array;

    fn image_with_qa(qa: ndarray::Array2<f64>) -> RasterImage {
        let transform = GeoTransform::north_up(77.0, 28.8, 0.001, 0.001);
        let dim = qa.dim();
        RasterImage::new("LC08_qa", transform)
            .with_band(Band::new("SR_B4", ndarray::Array2::from_elem(dim, 0.1)))
            .unwrap()
            .with_band(Band::new("QA_PIXEL", qa))
            .unwrap()
    }

    #[test]
    fn test_cloud_and_shadow_bits_rejected() {
        // 0 clear, 8 = bit 3 shadow, 32 = bit 5 cloud, 21824 = typical clear land
        let image = image_with_qa(array![[0.0, 8.0], [32.0, 21824.0]]);
        let masked = QualityMasker::landsat_c2().mask(&image).unwrap();

        let mask = &masked.band("SR_B4").unwrap().mask;
        assert_eq!(mask, &array![[true, false], [false, true]]);
        // QA band itself is masked too
        assert_eq!(&masked.band("QA_PIXEL").unwrap().mask, mask);
    }

    #[test]
    fn test_mask_is_idempotent() {
        let image = image_with_qa(array![[0.0, 8.0, 40.0], [32.0, 1.0, 2.0]]);
        let masker = QualityMasker::landsat_c2();
        let once = masker.mask(&image).unwrap();
        let twice = masker.mask(&once).unwrap();

        for band in once.bands() {
            assert_eq!(band.mask, twice.band(&band.name).unwrap().mask);
        }
    }

    #[test]
    fn test_existing_mask_is_intersected() {
        let transform = GeoTransform::north_up(0.0, 1.0, 0.5, 0.5);
        let red = Band::with_mask("SR_B4", array![[0.1, 0.2], [0.3, 0.4]], array![[false, true], [true, true]]).unwrap();
        let image = RasterImage::new("img", transform)
            .with_band(red)
            .unwrap()
            .with_band(Band::new("QA_PIXEL", array![[0.0, 0.0], [32.0, 0.0]]))
            .unwrap();

        let masked = QualityMasker::landsat_c2().mask(&image).unwrap();
        assert_eq!(masked.band("SR_B4").unwrap().mask, array![[false, true], [false, true]]);
    }

    #[test]
    fn test_missing_qa_band() {
        let transform = GeoTransform::north_up(0.0, 1.0, 0.5, 0.5);
        let image = RasterImage::new("img", transform)
            .with_band(Band::new("SR_B4", array![[0.1]]))
            .unwrap();

        let result = QualityMasker::landsat_c2().mask(&image);
        assert!(matches!(result, Err(HotspotError::MissingBand { .. })));
    }

    #[test]
    fn test_required_set_bit() {
        let masker = QualityMasker::new("QA_PIXEL", vec![BitTest { bit: 6, value: 1 }]).unwrap();
        let image = image_with_qa(array![[64.0, 0.0]]);
        let masked = masker.mask(&image).unwrap();
        assert_eq!(masked.band("SR_B4").unwrap().mask, array![[true, false]]);
    }

    #[test]
    fn test_invalid_bit_test_rejected() {
        assert!(QualityMasker::new("QA_PIXEL", vec![BitTest { bit: 64, value: 0 }]).is_err());
        assert!(QualityMasker::new("QA_PIXEL", vec![BitTest { bit: 3, value: 2 }]).is_err());
    }
}
