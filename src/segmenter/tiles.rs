use image::RgbImage;
use image::imageops::crop_imm;

use super::grid::TileGrid;
use super::mask::ensure_shape_dims;
use crate::Result;

/// Crop an image into the tiles of a grid, row-major
///
/// Every tile is an owned copy, so writes to a tile never reach the source.
pub fn extract_tiles(image: &RgbImage, grid: &TileGrid) -> Result<Vec<RgbImage>> {
    ensure_shape_dims(
        image.dimensions(),
        grid.image_width,
        grid.image_height,
    )?;
    let tiles = grid
        .tiles()
        .map(|rect| {
            crop_imm(
                image,
                rect.left() as u32,
                rect.top() as u32,
                rect.width(),
                rect.height(),
            )
            .to_image()
        })
        .collect();
    Ok(tiles)
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 7]))
    }

    #[test]
    fn tiles_follow_grid_order_and_size() {
        let image = gradient(81, 61);
        let grid = TileGrid::new(61, 81, 4).unwrap();
        let tiles = extract_tiles(&image, &grid).unwrap();
        assert_eq!(tiles.len(), 4);
        for (index, tile) in tiles.iter().enumerate() {
            assert_eq!(tile.dimensions(), (40, 30));
            let (x, y) = grid.tile_offset(index);
            assert_eq!(tile.get_pixel(0, 0), &Rgb([x as u8, y as u8, 7]));
            assert_eq!(tile.get_pixel(5, 3), &Rgb([x as u8 + 5, y as u8 + 3, 7]));
        }
    }

    #[test]
    fn tiles_are_independent_copies() {
        let image = gradient(20, 20);
        let grid = TileGrid::new(20, 20, 4).unwrap();
        let mut tiles = extract_tiles(&image, &grid).unwrap();
        tiles[0].put_pixel(0, 0, Rgb([255, 255, 255]));
        assert_eq!(image.get_pixel(0, 0), &Rgb([0, 0, 7]));
    }

    #[test]
    fn rejects_image_of_other_size() {
        let image = gradient(20, 20);
        let grid = TileGrid::new(40, 40, 4).unwrap();
        assert!(extract_tiles(&image, &grid).is_err());
    }
}
