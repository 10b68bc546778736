use image::{GrayImage, Luma};
use tracing::debug;

use super::grid::TileGrid;
use super::mask::{MASK_ON, MaskRecord, ensure_shape};
use crate::Result;

/// Re-project per-tile records into one list in global coordinates
///
/// `per_tile` holds one list per tile in row-major order; the grid side is the
/// integer square root of its length. Output order is tile order, then the
/// order within each tile. Only the occupancy mask moves: `bbox`,
/// `point_coords` and `crop_box` stay in tile-local coordinates.
pub fn stitch(per_tile: Vec<Vec<MaskRecord>>, height: u32, width: u32) -> Result<Vec<MaskRecord>> {
    let grid = TileGrid::new(height, width, per_tile.len() as u32)?;
    let mut stitched = Vec::with_capacity(per_tile.iter().map(Vec::len).sum());
    for (index, records) in per_tile.into_iter().enumerate() {
        let (offset_x, offset_y) = grid.tile_offset(index);
        for record in records {
            ensure_shape(&record.segmentation, grid.tile_width, grid.tile_height)?;
            let mut global = GrayImage::new(width, height);
            for (x, y, pixel) in record.segmentation.enumerate_pixels() {
                if pixel[0] != 0 {
                    global.put_pixel(x + offset_x, y + offset_y, Luma([MASK_ON]));
                }
            }
            stitched.push(record.with_segmentation(global));
        }
        debug!("stitched tile {} at offset {offset_x}x{offset_y}", index + 1);
    }
    Ok(stitched)
}
