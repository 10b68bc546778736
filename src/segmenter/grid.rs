use image::Luma;
use imageproc::rect::Rect;

use super::mask::{LabelImage, try_new_label_image};
use crate::{Error, Result};

/// Label drawn on the boundary lines between sectors
pub const SECTOR_LINE_LABEL: u32 = 255;

/// Thickness of the sector boundary lines, in pixels
const SECTOR_LINE_THICKNESS: u32 = 2;

/// Square tiling of an image
///
/// Tiles are `tile_width` x `tile_height` and ordered row-major. When the image
/// size is not a multiple of `side`, a strip of at most `side - 1` pixels at the
/// right and bottom edges belongs to no tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub side: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub image_width: u32,
    pub image_height: u32,
}

impl TileGrid {
    /// Compute the grid for a `width` x `height` image split into `cell_count` tiles
    pub fn new(height: u32, width: u32, cell_count: u32) -> Result<Self> {
        let invalid = || Error::InvalidGrid {
            cell_count,
            width,
            height,
        };
        let side = (cell_count as f64).sqrt().floor() as u32;
        if cell_count == 0 || side * side != cell_count {
            return Err(invalid());
        }
        let tile_height = height / side;
        let tile_width = width / side;
        if tile_height == 0 || tile_width == 0 {
            return Err(invalid());
        }
        Ok(Self {
            side,
            tile_width,
            tile_height,
            image_width: width,
            image_height: height,
        })
    }

    /// Number of tiles in the grid
    pub fn len(&self) -> usize {
        (self.side * self.side) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.side == 0
    }

    /// Rectangle covered by tile `index` in global coordinates
    pub fn tile_rect(&self, index: usize) -> Rect {
        let (x, y) = self.tile_offset(index);
        Rect::at(x as i32, y as i32).of_size(self.tile_width, self.tile_height)
    }

    /// Global (x, y) of the top-left pixel of tile `index`
    pub fn tile_offset(&self, index: usize) -> (u32, u32) {
        let row = index as u32 / self.side;
        let column = index as u32 % self.side;
        (column * self.tile_width, row * self.tile_height)
    }

    /// Iterate over all tile rectangles in row-major order
    pub fn tiles(&self) -> impl Iterator<Item = Rect> + '_ {
        (0..self.len()).map(|index| self.tile_rect(index))
    }

    /// Draw the grid as a label image
    ///
    /// With `show_sectors` each tile is filled with its 1-based index, otherwise
    /// tiles stay 0. Boundary lines are always drawn with `SECTOR_LINE_LABEL`.
    pub fn sector_overlay(&self, show_sectors: bool) -> Result<LabelImage> {
        let mut overlay = try_new_label_image(self.image_width, self.image_height, self.len())?;
        if show_sectors {
            for (index, rect) in self.tiles().enumerate() {
                imageproc::drawing::draw_filled_rect_mut(
                    &mut overlay,
                    rect,
                    Luma([index as u32 + 1]),
                );
            }
        }
        let line = Luma([SECTOR_LINE_LABEL]);
        for rect in self.tiles() {
            let vertical = Rect::at(rect.left(), rect.top())
                .of_size(SECTOR_LINE_THICKNESS, self.tile_height + 1);
            let horizontal = Rect::at(rect.left(), rect.top())
                .of_size(self.tile_width + 1, SECTOR_LINE_THICKNESS);
            imageproc::drawing::draw_filled_rect_mut(&mut overlay, vertical, line);
            imageproc::drawing::draw_filled_rect_mut(&mut overlay, horizontal, line);
        }
        Ok(overlay)
    }
}

/// Compute the tiling of a `width` x `height` image together with its sector overlay
pub fn partition(
    height: u32,
    width: u32,
    cell_count: u32,
    show_sectors: bool,
) -> Result<(TileGrid, LabelImage)> {
    let grid = TileGrid::new(height, width, cell_count)?;
    let overlay = grid.sector_overlay(show_sectors)?;
    Ok((grid, overlay))
}
