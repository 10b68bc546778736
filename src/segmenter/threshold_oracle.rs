use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::region_labelling::Connectivity;

use super::mask::{MASK_ON, bounding_box, mean_position};
use super::oracle::{OracleError, RawMaskProposal, SegmentationOracle};

/// Deterministic stand-in for a learned mask generator
///
/// Thresholds the grayscale image and proposes every 4-connected bright
/// component as one mask.
#[derive(Debug, Clone)]
pub struct ThresholdOracle {
    /// Pixels at or above this gray level are foreground
    pub threshold: u8,
    /// Components with fewer pixels are not proposed
    pub min_region_area: u32,
}

impl ThresholdOracle {
    pub fn new(threshold: u8, min_region_area: u32) -> Self {
        Self {
            threshold,
            min_region_area,
        }
    }
}

/// Split a binary image into one mask per connected component
fn split_components(binary: &GrayImage) -> Vec<GrayImage> {
    let (width, height) = binary.dimensions();
    let components =
        imageproc::region_labelling::connected_components(binary, Connectivity::Four, Luma([0u8]));
    let mut masks: Vec<GrayImage> = Vec::new();
    for (x, y, pixel) in components.enumerate_pixels() {
        let index = pixel[0] as usize;
        // Skip background
        if index == 0 {
            continue;
        }
        let index = index - 1;
        while masks.len() <= index {
            masks.push(ImageBuffer::new(width, height));
        }
        masks[index].put_pixel(x, y, Luma([MASK_ON]));
    }
    masks
}

impl SegmentationOracle for ThresholdOracle {
    fn generate(&mut self, image: &RgbImage) -> Result<Vec<RawMaskProposal>, OracleError> {
        let gray = image::imageops::grayscale(image);
        let binary = imageproc::contrast::threshold(
            &gray,
            self.threshold.saturating_sub(1),
            imageproc::contrast::ThresholdType::Binary,
        );
        let (width, height) = image.dimensions();
        let proposals = split_components(&binary)
            .into_iter()
            .filter_map(|segmentation| {
                let area = super::mask::count_pixels(&segmentation);
                if area == 0 || area < self.min_region_area {
                    return None;
                }
                let bbox = bounding_box(&segmentation)?;
                let (cx, cy) = mean_position(&segmentation)?;
                Some(RawMaskProposal {
                    segmentation,
                    area,
                    bbox: [
                        bbox.left() as u32,
                        bbox.top() as u32,
                        bbox.width(),
                        bbox.height(),
                    ],
                    predicted_iou: 1.0,
                    point_coords: vec![[cx as f32, cy as f32]],
                    stability_score: 1.0,
                    crop_box: [0, 0, width, height],
                })
            })
            .collect();
        Ok(proposals)
    }
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    fn two_blobs() -> RgbImage {
        RgbImage::from_fn(40, 30, |x, y| {
            let bright = (x >= 2 && x < 10 && y >= 2 && y < 6) || (x >= 20 && x < 23 && y >= 20 && y < 23);
            if bright { Rgb([220, 220, 220]) } else { Rgb([10, 10, 10]) }
        })
    }

    #[test]
    fn proposes_each_bright_component() {
        let mut oracle = ThresholdOracle::new(128, 0);
        let mut proposals = oracle.generate(&two_blobs()).unwrap();
        proposals.sort_by_key(|p| p.area);
        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[0].area, 9);
        assert_eq!(proposals[0].bbox, [20, 20, 3, 3]);
        assert_eq!(proposals[0].point_coords, vec![[21.0, 21.0]]);
        assert_eq!(proposals[1].area, 32);
        assert_eq!(proposals[1].crop_box, [0, 0, 40, 30]);
        assert_eq!(proposals[1].segmentation.dimensions(), (40, 30));
    }

    #[test]
    fn small_components_are_dropped() {
        let mut oracle = ThresholdOracle::new(128, 10);
        let proposals = oracle.generate(&two_blobs()).unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].area, 32);
    }

    #[test]
    fn dark_image_has_no_proposals() {
        let mut oracle = ThresholdOracle::new(128, 0);
        let image = RgbImage::from_pixel(8, 8, Rgb([5, 5, 5]));
        assert!(oracle.generate(&image).unwrap().is_empty());
    }
}
