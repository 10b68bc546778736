use image::{GrayImage, Luma};

use super::mask::{MASK_ON, MaskRecord, ensure_shape, mean_position};
use crate::{Error, Result};

/// Radius of the disk drawn at each centroid
pub const CENTROID_RADIUS: i32 = 3;

/// Compute one centroid per record and draw them as small disks
///
/// The centroid is the mean position of the mask pixels truncated to integers,
/// returned as (x, y) in record order.
pub fn centroids(records: &[MaskRecord]) -> Result<(GrayImage, Vec<(u32, u32)>)> {
    let Some(first) = records.first() else {
        return Err(Error::EmptyInput {
            operation: "centroid extraction",
        });
    };
    let (width, height) = first.segmentation.dimensions();
    let mut points_image = GrayImage::new(width, height);
    let mut points = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        ensure_shape(&record.segmentation, width, height)?;
        let (x, y) = mean_position(&record.segmentation).ok_or(Error::EmptyMask { index })?;
        let (x, y) = (x as u32, y as u32);
        imageproc::drawing::draw_filled_circle_mut(
            &mut points_image,
            (x as i32, y as i32),
            CENTROID_RADIUS,
            Luma([MASK_ON]),
        );
        points.push((x, y));
    }
    Ok((points_image, points))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmenter::mask::tests::rect_mask;

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(centroids(&[]), Err(Error::EmptyInput { .. })));
    }

    #[test]
    fn centroids_are_truncated_means_in_x_y_order() {
        let records = vec![
            MaskRecord::from_mask(rect_mask(50, 40, 10, 20, 4, 2)),
            MaskRecord::from_mask(rect_mask(50, 40, 30, 5, 5, 5)),
        ];
        let (image, points) = centroids(&records).unwrap();
        // mean x of 10..14 is 11.5, mean y of 20..22 is 20.5
        assert_eq!(points, vec![(11, 20), (32, 7)]);
        assert_eq!(image.dimensions(), (50, 40));
        assert_eq!(image.get_pixel(11, 20)[0], MASK_ON);
        assert_eq!(image.get_pixel(14, 20)[0], MASK_ON);
        assert_eq!(image.get_pixel(32, 7)[0], MASK_ON);
        assert_eq!(image.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn record_without_pixels_is_reported() {
        let records = vec![
            MaskRecord::from_mask(rect_mask(10, 10, 0, 0, 2, 2)),
            MaskRecord::from_mask(GrayImage::new(10, 10)),
        ];
        assert!(matches!(centroids(&records), Err(Error::EmptyMask { index: 1 })));
    }
}
