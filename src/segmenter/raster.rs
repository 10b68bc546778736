use std::cmp::Reverse;

use image::Luma;
use itertools::Itertools; // for sorted_by_key()
use tracing::debug;

use super::mask::{LabelImage, MaskRecord, ensure_shape, try_new_label_image};
use crate::Result;

/// Records ordered by descending area, ties keep their input order
pub fn by_descending_area(records: &[MaskRecord]) -> Vec<&MaskRecord> {
    records
        .iter()
        .sorted_by_key(|record| Reverse(record.area))
        .collect()
}

/// Paint every record into one label image
///
/// Records are painted largest first with ids 1, 2, ... in that order, so a
/// smaller mask overwrites a larger one where they overlap. An empty input
/// yields `None`.
pub fn rasterize(records: &[MaskRecord]) -> Result<Option<LabelImage>> {
    let sorted = by_descending_area(records);
    let Some(first) = sorted.first() else {
        return Ok(None);
    };
    let (width, height) = first.segmentation.dimensions();
    let mut labels = try_new_label_image(width, height, records.len())?;
    for (index, record) in sorted.iter().enumerate() {
        ensure_shape(&record.segmentation, width, height)?;
        let label = Luma([index as u32 + 1]);
        for (pixel, target) in record.segmentation.pixels().zip(labels.pixels_mut()) {
            if pixel[0] != 0 {
                *target = label;
            }
        }
    }
    debug!("rasterized {} masks into a {width}x{height} label image", sorted.len());
    Ok(Some(labels))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::segmenter::mask::tests::rect_mask;

    #[test]
    fn empty_input_yields_nothing() {
        assert!(rasterize(&[]).unwrap().is_none());
    }

    #[test]
    fn ids_follow_descending_area_rank() {
        let records = vec![
            MaskRecord::from_mask(rect_mask(30, 30, 0, 0, 2, 2)),
            MaskRecord::from_mask(rect_mask(30, 30, 10, 10, 5, 5)),
            MaskRecord::from_mask(rect_mask(30, 30, 20, 20, 3, 3)),
        ];
        let labels = rasterize(&records).unwrap().unwrap();
        assert_eq!(labels.get_pixel(0, 0)[0], 3);
        assert_eq!(labels.get_pixel(12, 12)[0], 1);
        assert_eq!(labels.get_pixel(21, 21)[0], 2);

        let distinct: BTreeSet<u32> = labels.pixels().map(|p| p[0]).filter(|&v| v != 0).collect();
        assert_eq!(distinct, BTreeSet::from([1, 2, 3]));
        let painted = labels.pixels().filter(|p| p[0] != 0).count();
        assert_eq!(painted, 4 + 25 + 9);
    }

    #[test]
    fn smaller_mask_stays_visible_over_larger() {
        let records = vec![
            MaskRecord::from_mask(rect_mask(20, 20, 5, 5, 3, 3)),
            MaskRecord::from_mask(rect_mask(20, 20, 0, 0, 20, 20)),
        ];
        let labels = rasterize(&records).unwrap().unwrap();
        assert_eq!(labels.get_pixel(6, 6)[0], 2);
        assert_eq!(labels.get_pixel(0, 0)[0], 1);
    }

    #[test]
    fn equal_areas_keep_input_order() {
        let records = vec![
            MaskRecord::from_mask(rect_mask(10, 10, 0, 0, 2, 2)),
            MaskRecord::from_mask(rect_mask(10, 10, 5, 5, 2, 2)),
        ];
        let labels = rasterize(&records).unwrap().unwrap();
        assert_eq!(labels.get_pixel(0, 0)[0], 1);
        assert_eq!(labels.get_pixel(5, 5)[0], 2);
    }
}
