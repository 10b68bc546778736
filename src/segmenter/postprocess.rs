use image::Luma;
use imageproc::distance_transform::Norm;
use tracing::{debug, info};

use super::mask::{IntensityImage, LabelImage, MaskRecord, ensure_shape, try_new_label_image};
use super::raster::by_descending_area;
use crate::Result;

/// Radius of the disk used to open each mask
pub const OPENING_RADIUS: u8 = 3;

/// Size and intensity bounds a mask must satisfy to count as an object
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterBounds {
    /// Exclusive lower bound on the record area
    pub min_size: u32,
    /// Exclusive upper bound on the record area
    pub max_size: u32,
    /// Pixels darker than this never belong to a mask
    pub min_intensity: u8,
}

impl FilterBounds {
    fn accepts_area(&self, area: u32) -> bool {
        area > self.min_size && area < self.max_size
    }
}

/// Absolute upper size bound from a fraction of the image pixel count
///
/// Rounded up, so that `area < bound` holds exactly when `area` is below the
/// unrounded product.
pub fn max_size_from_fraction(fraction: f64, height: u32, width: u32) -> u32 {
    let bound = fraction * height as f64 * width as f64;
    bound.ceil().clamp(0.0, u32::MAX as f64) as u32
}

/// Filter records down to plausible objects and paint the survivors
///
/// Records are visited by descending area. Pixels below the intensity bound
/// are dropped from a working copy of each mask; records left with no pixels
/// are skipped. The working mask is opened with a radius 3 disk and, when the
/// record's original area lies strictly between the size bounds, painted with
/// the record's 1-based position in the visiting order. Skipped records still
/// consume their position, so ids may have gaps. Surviving records are
/// returned unchanged, only the label image reflects the opening. The label
/// image takes the extent of `reference`, every mask must match it.
pub fn postprocess(
    records: &[MaskRecord],
    reference: &IntensityImage,
    bounds: FilterBounds,
) -> Result<(LabelImage, Vec<MaskRecord>)> {
    let (width, height) = reference.dimensions();
    let mut labels = try_new_label_image(width, height, records.len())?;
    let survivors = filter_into(records, reference, bounds, Some(&mut labels))?;
    Ok((labels, survivors))
}

/// Same selection as `postprocess` without building a label image
pub fn filter_records(
    records: &[MaskRecord],
    reference: &IntensityImage,
    bounds: FilterBounds,
) -> Result<Vec<MaskRecord>> {
    filter_into(records, reference, bounds, None)
}

fn filter_into(
    records: &[MaskRecord],
    reference: &IntensityImage,
    bounds: FilterBounds,
    mut labels: Option<&mut LabelImage>,
) -> Result<Vec<MaskRecord>> {
    let (width, height) = reference.dimensions();
    let min_intensity = bounds.min_intensity as f32;
    let mut survivors = Vec::new();

    for (index, record) in by_descending_area(records).into_iter().enumerate() {
        ensure_shape(&record.segmentation, width, height)?;
        let mut working = record.segmentation.clone();
        let mut remaining = 0u32;
        for (pixel, intensity) in working.pixels_mut().zip(reference.pixels()) {
            if intensity[0] < min_intensity {
                pixel[0] = 0;
            } else if pixel[0] != 0 {
                remaining += 1;
            }
        }
        if remaining == 0 {
            debug!("mask {} has no pixels above intensity {}", index + 1, bounds.min_intensity);
            continue;
        }
        if !bounds.accepts_area(record.area) {
            continue;
        }
        if let Some(labels) = labels.as_deref_mut() {
            let opened = imageproc::morphology::open(&working, Norm::L2, OPENING_RADIUS);
            let label = Luma([index as u32 + 1]);
            for (pixel, target) in opened.pixels().zip(labels.pixels_mut()) {
                if pixel[0] != 0 {
                    *target = label;
                }
            }
        }
        survivors.push(record.clone());
    }
    info!(
        "{} of {} masks kept after postprocessing",
        survivors.len(),
        records.len()
    );
    Ok(survivors)
}
