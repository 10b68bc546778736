use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::{GrayImage, RgbImage};
use imageproc::point::Point;
use imageproc::rect::Rect;
use tracing::{debug, info, warn};

use super::mask::{MaskRecord, count_pixels};
use crate::{Error, Result};

/// Share of the progress range reserved for mask generation when postprocessing follows
pub const PROGRESS_CAP_WITH_POSTPROCESSING: f32 = 50.0;

/// Share of the progress range reserved for mask generation otherwise
pub const PROGRESS_CAP: f32 = 90.0;

/// Failure reported by a segmentation oracle
pub type OracleError = Box<dyn std::error::Error + Send + Sync>;

/// One raw mask proposal, as an oracle hands it over
#[derive(Debug, Clone)]
pub struct RawMaskProposal {
    /// Occupancy mask with the same extent as the input image, non-zero inside
    pub segmentation: GrayImage,
    pub area: u32,
    /// x, y, width, height
    pub bbox: [u32; 4],
    pub predicted_iou: f32,
    pub point_coords: Vec<[f32; 2]>,
    pub stability_score: f32,
    /// x, y, width, height
    pub crop_box: [u32; 4],
}

/// External mask generator invoked once per image or tile
///
/// Calls are strictly sequential, implementations may hold exclusive
/// resources between calls.
pub trait SegmentationOracle {
    fn generate(&mut self, image: &RgbImage) -> core::result::Result<Vec<RawMaskProposal>, OracleError>;
}

impl<F> SegmentationOracle for F
where
    F: FnMut(&RgbImage) -> core::result::Result<Vec<RawMaskProposal>, OracleError>,
{
    fn generate(&mut self, image: &RgbImage) -> core::result::Result<Vec<RawMaskProposal>, OracleError> {
        self(image)
    }
}

/// Shared flag asking a running segmentation to stop at the next checkpoint
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Fail with `Error::Cancelled` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

fn to_rect(values: [u32; 4]) -> Rect {
    let [x, y, width, height] = values;
    Rect::at(x as i32, y as i32).of_size(width.max(1), height.max(1))
}

/// Turn raw oracle output for one image into mask records
fn normalize(
    proposals: Vec<RawMaskProposal>,
    image: &RgbImage,
    target: &str,
) -> Result<Vec<MaskRecord>> {
    let (width, height) = image.dimensions();
    proposals
        .into_iter()
        .map(|proposal| {
            if proposal.segmentation.dimensions() != (width, height) {
                return Err(Error::OracleInvocation {
                    target: target.to_owned(),
                    message: format!(
                        "mask is {}x{} but the image is {width}x{height}",
                        proposal.segmentation.width(),
                        proposal.segmentation.height()
                    ),
                });
            }
            let area = count_pixels(&proposal.segmentation);
            if area != proposal.area {
                warn!(
                    "{target}: oracle reported area {} for a mask of {area} pixels",
                    proposal.area
                );
            }
            Ok(MaskRecord {
                segmentation: proposal.segmentation,
                area,
                bbox: to_rect(proposal.bbox),
                predicted_iou: proposal.predicted_iou,
                point_coords: proposal
                    .point_coords
                    .into_iter()
                    .map(|[x, y]| Point::new(x, y))
                    .collect(),
                stability_score: proposal.stability_score,
                crop_box: to_rect(proposal.crop_box),
            })
        })
        .collect()
}

fn invoke<O: SegmentationOracle + ?Sized>(
    oracle: &mut O,
    image: &RgbImage,
    target: &str,
) -> Result<Vec<MaskRecord>> {
    let proposals = oracle
        .generate(image)
        .map_err(|e| Error::OracleInvocation {
            target: target.to_owned(),
            message: e.to_string(),
        })?;
    debug!("{target}: oracle returned {} proposals", proposals.len());
    normalize(proposals, image, target)
}

/// Run the oracle once on a whole image
pub fn segment_one<O: SegmentationOracle + ?Sized>(
    oracle: &mut O,
    image: &RgbImage,
) -> Result<Vec<MaskRecord>> {
    invoke(oracle, image, "image")
}

/// Progress after one more tile went through the oracle
#[derive(Debug)]
pub struct TileProgress<'a> {
    /// Cumulative progress, 0 to the generation cap
    pub percent: f32,
    /// Records of every tile completed so far, one list per tile in tile order
    pub per_tile: &'a [Vec<MaskRecord>],
    /// 1-based index of the tile just completed
    pub tile: usize,
}

impl TileProgress<'_> {
    /// Number of records accumulated over all completed tiles
    pub fn record_count(&self) -> usize {
        self.per_tile.iter().map(Vec::len).sum()
    }
}

/// Lazy tile-by-tile segmentation
///
/// Each call to `next_tile` runs the oracle on one more tile. The sequence is
/// consumed once: after the last tile or after a failure it yields nothing.
pub struct TiledSegmentation<'o, O: SegmentationOracle + ?Sized> {
    oracle: &'o mut O,
    tiles: std::vec::IntoIter<RgbImage>,
    total: usize,
    cap: f32,
    per_tile: Vec<Vec<MaskRecord>>,
    cancel: CancelToken,
    done: bool,
}

/// Prepare segmentation of `tiles`, reserving the progress range for later stages
pub fn segment_tiled<O: SegmentationOracle + ?Sized>(
    oracle: &mut O,
    tiles: Vec<RgbImage>,
    postprocessing: bool,
) -> TiledSegmentation<'_, O> {
    let total = tiles.len();
    TiledSegmentation {
        oracle,
        tiles: tiles.into_iter(),
        total,
        cap: if postprocessing {
            PROGRESS_CAP_WITH_POSTPROCESSING
        } else {
            PROGRESS_CAP
        },
        per_tile: Vec::with_capacity(total),
        cancel: CancelToken::new(),
        done: false,
    }
}

impl<'o, O: SegmentationOracle + ?Sized> TiledSegmentation<'o, O> {
    /// Stop before the next tile once `cancel` fires
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Process the next tile, None once all tiles are done or a tile failed
    pub fn next_tile(&mut self) -> Option<Result<TileProgress<'_>>> {
        if self.done {
            return None;
        }
        let Some(tile) = self.tiles.next() else {
            self.done = true;
            return None;
        };
        if let Err(e) = self.cancel.check() {
            self.done = true;
            return Some(Err(e));
        }
        let index = self.per_tile.len() + 1;
        let target = format!("tile {index}/{}", self.total);
        match invoke(&mut *self.oracle, &tile, &target) {
            Ok(records) => {
                self.per_tile.push(records);
                let percent = (index as f32 / self.total as f32) * self.cap;
                info!(
                    "masks generated for tile {index}/{}, progress {percent:.2}%",
                    self.total
                );
                Some(Ok(TileProgress {
                    percent,
                    per_tile: &self.per_tile,
                    tile: index,
                }))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }

    /// Drive every remaining tile, reporting progress to `on_progress`
    pub fn run_to_end(mut self, mut on_progress: impl FnMut(&TileProgress<'_>)) -> Result<Vec<Vec<MaskRecord>>> {
        while let Some(step) = self.next_tile() {
            on_progress(&step?);
        }
        Ok(self.per_tile)
    }

    /// Per-tile records produced so far
    pub fn into_per_tile(self) -> Vec<Vec<MaskRecord>> {
        self.per_tile
    }
}
